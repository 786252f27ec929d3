//! Transition curves and arc geometry for DMX channel transitions.
//!
//! Pure math: nothing here touches a frame, a clock or a socket. Callers
//! precompute a step table once per transition and replay it tick by tick.

pub mod arc;
pub mod curve;
pub mod vector;

use thiserror::Error;

pub use arc::{
    ArcConfig, ArcParams, ArcRequest, ArcSolution, ArcSolver, ArcStep, PanTilt, PlaybackInterval,
};
pub use curve::{Curve, CurveStep, DEFAULT_GAMMA};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CurveError {
    #[error("Unknown transition type: {0}")]
    UnknownKind(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Invalid center point (radius {radius:.6}, target distance {target_distance:.6})")]
    InvalidCenterPoint { radius: f64, target_distance: f64 },

    #[error("Angle span must be a positive number of degrees, got {0}")]
    InvalidAngleSpan(f64),

    #[error("Playback interval [{start}, {end}] is not an ordered range within [0, 1]")]
    InvalidInterval { start: f64, end: f64 },
}
