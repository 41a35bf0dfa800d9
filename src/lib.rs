//! Collision-aware grid path planning for mobile robots.
//!
//! This crate predicts where constant-velocity obstacles cross a robot's
//! nominal path, bakes them into a weighted occupancy grid with repulsion
//! halos, relaxes travel costs over that grid, extracts a discrete path,
//! and post-processes it into a smooth curvature-bounded trajectory.

pub mod environment;
pub mod error;
pub mod models;
pub mod planner;
pub mod post_process;
pub mod spatial;

pub use environment::Environment;
pub use error::{PlanError, Result};
pub use models::{
    EnvironmentConfig, ExpansionPolicy, GridCell, MovementPattern, Obstacle, ObstacleId,
    ObstacleSpec, RepulsionKind, RepulsionPoint,
};
pub use planner::{
    segment_by_orientation, PathPlanner, PlannerConfig, RawPath, SearchStats,
};
pub use post_process::{
    max_curvature, menger_curvature, stitch_dubins, PathPostProcessor, PostProcessConfig,
    SmoothedTrajectory,
};
pub use spatial::{bresenham, euclidean_distance};
