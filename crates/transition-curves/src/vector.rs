//! Minimal 3-vector and quaternion helpers for the arc solver.

pub type Vec3 = [f64; 3];

pub const OZ: Vec3 = [0.0, 0.0, 1.0];

pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn length(v: &Vec3) -> f64 {
    dot(v, v).sqrt()
}

pub fn add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(v: &Vec3, s: f64) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// Returns `None` for vectors too short to carry a direction.
pub fn normalize(v: &Vec3) -> Option<Vec3> {
    let len = length(v);
    if len > 1e-12 {
        Some([v[0] / len, v[1] / len, v[2] / len])
    } else {
        None
    }
}

/// Unit vector for spherical angles (theta from +Z, phi around Z from +X).
pub fn from_spherical(theta: f64, phi: f64) -> Vec3 {
    [theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos()]
}

/// Spherical coordinates `(r, theta, phi)` of a point.
///
/// `phi` comes back from `atan2` in (-PI, PI]; the origin maps to all zeros.
pub fn to_spherical(v: &Vec3) -> (f64, f64, f64) {
    let r = length(v);
    if r <= 1e-12 {
        return (0.0, 0.0, 0.0);
    }
    let theta = (v[2] / r).clamp(-1.0, 1.0).acos();
    let phi = v[1].atan2(v[0]);
    (r, theta, phi)
}

/// Unit quaternion used as a rotation. Stored as `(w, x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Rotation of `angle` radians around the unit `axis`.
    pub fn from_axis_angle(axis: &Vec3, angle: f64) -> Self {
        let half = angle / 2.0;
        let s = half.sin();
        Self {
            w: half.cos(),
            x: axis[0] * s,
            y: axis[1] * s,
            z: axis[2] * s,
        }
    }

    /// Shortest rotation taking unit vector `from` onto unit vector `to`.
    pub fn rotation_between(from: &Vec3, to: &Vec3) -> Self {
        let cos_angle = dot(from, to).clamp(-1.0, 1.0);
        if cos_angle > 1.0 - 1e-12 {
            return Self::IDENTITY;
        }
        if cos_angle < -1.0 + 1e-12 {
            // Antiparallel: any axis perpendicular to `from` works.
            let helper = if from[0].abs() < 0.9 {
                [1.0, 0.0, 0.0]
            } else {
                [0.0, 1.0, 0.0]
            };
            let axis = normalize(&cross(from, &helper)).unwrap_or([1.0, 0.0, 0.0]);
            return Self::from_axis_angle(&axis, std::f64::consts::PI);
        }
        let axis = normalize(&cross(from, to)).unwrap_or([1.0, 0.0, 0.0]);
        Self::from_axis_angle(&axis, cos_angle.acos())
    }

    pub fn conjugate(&self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    pub fn mul(&self, o: &Self) -> Self {
        Self {
            w: self.w * o.w - self.x * o.x - self.y * o.y - self.z * o.z,
            x: self.w * o.x + self.x * o.w + self.y * o.z - self.z * o.y,
            y: self.w * o.y - self.x * o.z + self.y * o.w + self.z * o.x,
            z: self.w * o.z + self.x * o.y - self.y * o.x + self.z * o.w,
        }
    }

    /// Rotate `v` by this quaternion (`q v q*`).
    pub fn rotate(&self, v: &Vec3) -> Vec3 {
        let p = Self {
            w: 0.0,
            x: v[0],
            y: v[1],
            z: v[2],
        };
        let r = self.mul(&p).mul(&self.conjugate());
        [r.x, r.y, r.z]
    }
}
