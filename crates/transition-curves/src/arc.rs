//! Pan/tilt arc motion around a pivot direction.
//!
//! Device angles are mapped onto the unit sphere, the circle through the
//! current position around the pivot axis is rotated into the XY plane, and
//! the arc between current and target is sampled by its angle parameter `t`.
//! Every sample is mapped back to device channel units when the arc is solved,
//! so a running transition only has to index into the step table.

use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::vector::{
    add, dot, from_spherical, length, scale, sub, to_spherical, Quaternion, Vec3, OZ,
};
use crate::GeometryError;

/// Tolerance for the current/target distance check.
pub const EPSILON: f64 = 1e-6;

/// Channel layout and angle range of a moving head.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcConfig {
    pub pan_channel: u16,
    pub tilt_channel: u16,
    /// Full-scale pan angle in degrees (channel value 255).
    pub pan_angle: f64,
    /// Full-scale tilt angle in degrees (channel value 255).
    pub tilt_angle: f64,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            pan_channel: 1,
            tilt_channel: 3,
            pan_angle: 540.0,
            tilt_angle: 255.0,
        }
    }
}

/// A pan/tilt position in channel units (0..=255, fractions allowed).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanTilt {
    pub pan: f64,
    pub tilt: f64,
}

impl PanTilt {
    pub fn new(pan: f64, tilt: f64) -> Self {
        Self { pan, tilt }
    }
}

/// Portion of the arc that is actually played, as fractions of its length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackInterval {
    start: f64,
    end: f64,
}

impl PlaybackInterval {
    pub const FULL: Self = Self {
        start: 0.0,
        end: 1.0,
    };

    pub fn new(start: f64, end: f64) -> Result<Self, GeometryError> {
        if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) || start > end {
            return Err(GeometryError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }
}

impl Default for PlaybackInterval {
    fn default() -> Self {
        Self::FULL
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArcRequest {
    pub current: PanTilt,
    pub target: PanTilt,
    /// Pivot direction the arc rotates around.
    pub center: PanTilt,
    pub config: ArcConfig,
    pub duration_ms: f64,
    pub step_count: u32,
    pub interval: PlaybackInterval,
}

/// Geometry fixed for the lifetime of one arc transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcParams {
    pub pan_channel: u16,
    pub tilt_channel: u16,
    pub pan_angle: f64,
    pub tilt_angle: f64,
    pub radius: f64,
    /// Maps the solved XY plane back to device space.
    pub back_rotation: Quaternion,
    /// Circle center on the pivot axis.
    pub pivot_point: Vec3,
}

/// One precomputed arc sample in channel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArcStep {
    pub t: f64,
    pub pan: u8,
    pub tilt: u8,
    /// Milliseconds since the first played sample.
    pub offset_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArcSolution {
    pub params: ArcParams,
    pub current_t: f64,
    pub new_t: f64,
    /// Signed angle from `current_t` to `new_t`, in (-PI, PI].
    pub delta: f64,
    pub steps: Vec<ArcStep>,
}

pub fn channel_to_rad(value: f64, span_degrees: f64) -> f64 {
    (value * span_degrees / 255.0).to_radians()
}

pub fn rad_to_channel(rad: f64, span_degrees: f64) -> f64 {
    rad.to_degrees() * 255.0 / span_degrees
}

/// Round and clamp a channel-unit value into the DMX range.
pub fn clamp_channel(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// Shortest signed angular distance, folded into (-PI, PI].
pub fn shortest_delta(from: f64, to: f64) -> f64 {
    let mut delta = to - from;
    while delta > PI {
        delta -= TAU;
    }
    while delta <= -PI {
        delta += TAU;
    }
    delta
}

fn plane_angle(point: &Vec3) -> f64 {
    if point[0].abs() < 1e-12 && point[1].abs() < 1e-12 {
        return 0.0;
    }
    point[1].atan2(point[0]).rem_euclid(TAU)
}

impl ArcParams {
    /// Point on the circle for parameter `t`, in device space.
    pub fn point_at(&self, t: f64) -> Vec3 {
        let local = [self.radius * t.cos(), self.radius * t.sin(), 0.0];
        add(&self.back_rotation.rotate(&local), &self.pivot_point)
    }

    /// Pan/tilt in radians for parameter `t`.
    ///
    /// `atan2` only yields one turn of pan; the branch closest to
    /// `reference_pan` is returned so fixtures with more than 360 degrees of
    /// pan keep moving continuously.
    pub fn angles_at(&self, t: f64, reference_pan: f64) -> (f64, f64) {
        let (_, theta, phi) = to_spherical(&self.point_at(t));
        let turns = ((reference_pan - phi) / TAU).round();
        (phi + turns * TAU, theta)
    }

    /// Pan/tilt channel values for parameter `t`.
    pub fn decode(&self, t: f64, reference_pan: f64) -> (u8, u8) {
        let (pan, tilt) = self.angles_at(t, reference_pan);
        (
            clamp_channel(rad_to_channel(pan, self.pan_angle)),
            clamp_channel(rad_to_channel(tilt, self.tilt_angle)),
        )
    }
}

pub struct ArcSolver;

impl ArcSolver {
    pub fn solve(request: &ArcRequest) -> Result<ArcSolution, GeometryError> {
        let config = &request.config;
        for span in [config.pan_angle, config.tilt_angle] {
            if !(span.is_finite() && span > 0.0) {
                return Err(GeometryError::InvalidAngleSpan(span));
            }
        }

        let to_sphere = |p: &PanTilt| {
            from_spherical(
                channel_to_rad(p.tilt, config.tilt_angle),
                channel_to_rad(p.pan, config.pan_angle),
            )
        };
        let current_point = to_sphere(&request.current);
        let target_point = to_sphere(&request.target);
        // Points on the unit sphere, so already normalized.
        let normal = to_sphere(&request.center);

        // Center of the circle: projection of the current point onto the pivot axis.
        let pivot_point = scale(&normal, dot(&current_point, &normal));

        let current_local = sub(&current_point, &pivot_point);
        let target_local = sub(&target_point, &pivot_point);

        let rotation = Quaternion::rotation_between(&normal, &OZ);
        let back_rotation = rotation.conjugate();
        let current_plane = rotation.rotate(&current_local);
        let target_plane = rotation.rotate(&target_local);

        let radius = length(&current_local);
        let target_distance = length(&target_local);
        if (target_distance - radius).abs() > EPSILON || target_plane[2].abs() > EPSILON {
            return Err(GeometryError::InvalidCenterPoint {
                radius,
                target_distance,
            });
        }

        let current_t = plane_angle(&current_plane);
        let new_t = plane_angle(&target_plane);
        let delta = shortest_delta(current_t, new_t);

        let params = ArcParams {
            pan_channel: config.pan_channel,
            tilt_channel: config.tilt_channel,
            pan_angle: config.pan_angle,
            tilt_angle: config.tilt_angle,
            radius,
            back_rotation,
            pivot_point,
        };

        let exact_current = (
            clamp_channel(request.current.pan),
            clamp_channel(request.current.tilt),
        );
        let exact_target = (
            clamp_channel(request.target.pan),
            clamp_channel(request.target.tilt),
        );

        if request.step_count == 0 {
            return Ok(ArcSolution {
                params,
                current_t,
                new_t,
                delta,
                steps: vec![ArcStep {
                    t: current_t + delta,
                    pan: exact_target.0,
                    tilt: exact_target.1,
                    offset_ms: 0.0,
                }],
            });
        }

        let step_count = request.step_count;
        let angle_step = delta / f64::from(step_count);
        let step_ms = request.duration_ms / f64::from(step_count);
        let first = (f64::from(step_count) * request.interval.start()).round() as u32;
        let last = (f64::from(step_count) * request.interval.end()).round() as u32;

        let mut reference_pan = channel_to_rad(request.current.pan, config.pan_angle);
        let mut steps = Vec::with_capacity((last - first + 1) as usize);
        for i in first..=last {
            let t = current_t + f64::from(i) * angle_step;
            let (pan_rad, tilt_rad) = params.angles_at(t, reference_pan);
            reference_pan = pan_rad;
            let (pan, tilt) = if i == 0 {
                exact_current
            } else if i == step_count {
                exact_target
            } else {
                (
                    clamp_channel(rad_to_channel(pan_rad, config.pan_angle)),
                    clamp_channel(rad_to_channel(tilt_rad, config.tilt_angle)),
                )
            };
            steps.push(ArcStep {
                t,
                pan,
                tilt,
                offset_ms: f64::from(i - first) * step_ms,
            });
        }

        Ok(ArcSolution {
            params,
            current_t,
            new_t,
            delta,
            steps,
        })
    }
}
