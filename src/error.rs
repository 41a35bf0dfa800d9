//! Error types for gridnav-core.

use thiserror::Error;

/// Planning error type.
///
/// Only conditions the caller must handle are errors. Out-of-bounds
/// placements are tolerated no-ops (logged at warn level), and a curvature
/// bound miss is reported as a flag on the fit result, not an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("no traversable neighbor at ({x}, {y}) after {steps} steps")]
    PathNotFound { x: i32, y: i32, steps: usize },

    #[error("spline of degree {degree} needs at least {required} points, got {got}")]
    SplineFitFailed {
        degree: usize,
        required: usize,
        got: usize,
    },

    #[error("robot position has not been set")]
    MissingRobot,

    #[error("end position has not been set")]
    MissingEnd,
}

pub type Result<T> = std::result::Result<T, PlanError>;
