//! Data models for the grid planner.

use serde::{Deserialize, Serialize};

/// Stable handle into the environment's obstacle arena.
pub type ObstacleId = usize;

/// Neighbor offset set used by relaxation and extraction. All offsets are
/// single-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementPattern {
    /// 8-connected: orthogonal + diagonal.
    Queen,
    /// 4-connected orthogonal.
    Rook,
    /// 4-connected diagonal.
    Bishop,
}

impl MovementPattern {
    pub fn offsets(self) -> &'static [(i32, i32)] {
        const QUEEN: [(i32, i32); 8] = [
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ];
        const ROOK: [(i32, i32); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        const BISHOP: [(i32, i32); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
        match self {
            MovementPattern::Queen => &QUEEN,
            MovementPattern::Rook => &ROOK,
            MovementPattern::Bishop => &BISHOP,
        }
    }
}

/// How relaxation treats cells that are not free (obstacle or repulsion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionPolicy {
    /// Non-free cells enter the open list with a large fixed penalty cost.
    PenalizeObstacles,
    /// Non-free cells are never expanded into.
    BlockObstacles,
}

/// One cell of the planning grid.
///
/// `cost` is `None` until the cell has been relaxed by a search; only then
/// is its value meaningful. `repulsion_factor` accumulates additively from
/// obstacle footprints and their halos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridCell {
    pub x: i32,
    pub y: i32,
    pub cost: Option<f64>,
    pub parent: Option<(i32, i32)>,
    pub is_robot: bool,
    pub is_end: bool,
    pub is_obstacle: bool,
    pub orientation: (f64, f64),
    pub repulsion_factor: f64,
    pub distance_to_robot: f64,
    pub distance_to_end: f64,
    pub total_obstacle_distance: f64,
}

impl GridCell {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            cost: None,
            parent: None,
            is_robot: false,
            is_end: false,
            is_obstacle: false,
            orientation: (0.0, 0.0),
            repulsion_factor: 0.0,
            distance_to_robot: 0.0,
            distance_to_end: 0.0,
            total_obstacle_distance: 0.0,
        }
    }

    /// A cell is free when it carries neither an obstacle nor any repulsion.
    pub fn is_free(&self) -> bool {
        !self.is_obstacle && self.repulsion_factor == 0.0
    }
}

/// Caller-supplied description of a dynamic obstacle.
///
/// The footprint is an axis-aligned cell range in the obstacle's own frame:
/// `major_range` extends along the velocity direction, `minor_range`
/// perpendicular to it. A zero-velocity obstacle orients its major axis
/// along +y, so the minor axis spans x.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObstacleSpec {
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,
    pub major_range: (i32, i32),
    pub minor_range: (i32, i32),
}

/// Arena entry: a registered obstacle with its precomputed trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: ObstacleId,
    pub spec: ObstacleSpec,
    /// Predicted cell position at each timestep, `trajectory[0]` being the
    /// initial position. May leave the grid; bounds are checked at stamping.
    pub trajectory: Vec<(i32, i32)>,
}

impl Obstacle {
    pub fn position_at(&self, timestep: usize) -> Option<(i32, i32)> {
        self.trajectory.get(timestep).copied()
    }
}

/// Whether a repulsion contribution came from a footprint cell itself or
/// from the dilated halo around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepulsionKind {
    Core,
    Halo,
}

/// One additive repulsion contribution, kept in a registry alongside the
/// per-cell sums so clearance checks and halo/core distinction stay cheap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RepulsionPoint {
    pub x: i32,
    pub y: i32,
    pub factor: f64,
    pub kind: RepulsionKind,
}

/// Environment tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Chebyshev radius of the soft repulsion halo around footprint cells.
    pub repulsion_offset: i32,
    /// Repulsion added per footprint cell.
    pub core_repulsion: f64,
    /// Repulsion added per halo cell. Smaller than `core_repulsion`.
    pub halo_repulsion: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            repulsion_offset: 2,
            core_repulsion: 1.0,
            halo_repulsion: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queen_offsets_are_all_eight_single_steps() {
        let offsets = MovementPattern::Queen.offsets();
        assert_eq!(offsets.len(), 8);
        for &(dx, dy) in offsets {
            assert!(dx.abs() <= 1 && dy.abs() <= 1);
            assert!((dx, dy) != (0, 0));
        }
    }

    #[test]
    fn rook_and_bishop_partition_queen() {
        let rook = MovementPattern::Rook.offsets();
        let bishop = MovementPattern::Bishop.offsets();
        assert_eq!(rook.len() + bishop.len(), 8);
        assert!(rook.iter().all(|&(dx, dy)| dx == 0 || dy == 0));
        assert!(bishop.iter().all(|&(dx, dy)| dx != 0 && dy != 0));
    }

    #[test]
    fn fresh_cell_is_free_and_unrelaxed() {
        let cell = GridCell::new(3, 4);
        assert!(cell.is_free());
        assert!(cell.cost.is_none());
        assert!(cell.parent.is_none());
    }
}
