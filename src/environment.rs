//! Planning environment: grid state, obstacle registry, collision
//! prediction, and grid baking.
//!
//! The environment owns a flat row-major grid of [`GridCell`]s and an arena
//! of registered obstacles with precomputed constant-velocity trajectories.
//! `predict_collisions` intersects those trajectories with the robot's
//! nominal Bresenham path; `bake_grid` then stamps every obstacle footprint
//! (at its collision timestep, or at timestep 0 when it never collides)
//! into the grid as hard obstacle cells surrounded by a soft repulsion halo.

use std::collections::BTreeMap;

use crate::error::{PlanError, Result};
use crate::models::{
    EnvironmentConfig, GridCell, Obstacle, ObstacleId, ObstacleSpec, RepulsionKind, RepulsionPoint,
};
use crate::spatial::{bresenham, dilation_offsets, euclidean_distance, footprint_cells};

#[derive(Debug, Clone)]
pub struct Environment {
    width: usize,
    height: usize,
    config: EnvironmentConfig,
    grid: Vec<GridCell>,
    obstacles: Vec<Obstacle>,
    collisions: BTreeMap<usize, Vec<ObstacleId>>,
    repulsion_points: Vec<RepulsionPoint>,
    robot: Option<(i32, i32)>,
    robot_heading: (f64, f64),
    end: Option<(i32, i32)>,
    nominal_path: Vec<(i32, i32)>,
    horizon: usize,
}

impl Environment {
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_config(width, height, EnvironmentConfig::default())
    }

    pub fn with_config(width: usize, height: usize, config: EnvironmentConfig) -> Self {
        let horizon = ((width * width + height * height) as f64).sqrt().floor() as usize;
        Self {
            width,
            height,
            config,
            grid: Self::fresh_grid(width, height),
            obstacles: Vec::new(),
            collisions: BTreeMap::new(),
            repulsion_points: Vec::new(),
            robot: None,
            robot_heading: (0.0, 0.0),
            end: None,
            nominal_path: Vec::new(),
            horizon,
        }
    }

    fn fresh_grid(width: usize, height: usize) -> Vec<GridCell> {
        let mut grid = Vec::with_capacity(width * height);
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                grid.push(GridCell::new(x, y));
            }
        }
        grid
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Prediction horizon in timesteps: the grid diagonal, floored.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn is_inside(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    fn idx(&self, x: i32, y: i32) -> usize {
        y as usize * self.width + x as usize
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<&GridCell> {
        if self.is_inside(x, y) {
            Some(&self.grid[self.idx(x, y)])
        } else {
            None
        }
    }

    pub(crate) fn cell_mut(&mut self, x: i32, y: i32) -> Option<&mut GridCell> {
        if self.is_inside(x, y) {
            let idx = self.idx(x, y);
            Some(&mut self.grid[idx])
        } else {
            None
        }
    }

    pub fn grid(&self) -> &[GridCell] {
        &self.grid
    }

    pub fn robot(&self) -> Option<(i32, i32)> {
        self.robot
    }

    pub fn robot_heading(&self) -> (f64, f64) {
        self.robot_heading
    }

    pub fn end(&self) -> Option<(i32, i32)> {
        self.end
    }

    pub fn nominal_path(&self) -> &[(i32, i32)] {
        &self.nominal_path
    }

    pub fn collisions(&self) -> &BTreeMap<usize, Vec<ObstacleId>> {
        &self.collisions
    }

    pub fn repulsion_points(&self) -> &[RepulsionPoint] {
        &self.repulsion_points
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Record the robot start position and heading. An out-of-grid position
    /// is kept in the registry but will never be placed on the grid.
    pub fn set_robot(&mut self, position: (i32, i32), heading: (f64, f64)) {
        if !self.is_inside(position.0, position.1) {
            tracing::warn!(x = position.0, y = position.1, "robot position outside grid, placement ignored");
        }
        self.robot = Some(position);
        self.robot_heading = heading;
    }

    /// Record the goal position, same bounds policy as [`set_robot`].
    ///
    /// [`set_robot`]: Environment::set_robot
    pub fn set_end(&mut self, position: (i32, i32)) {
        if !self.is_inside(position.0, position.1) {
            tracing::warn!(x = position.0, y = position.1, "end position outside grid, placement ignored");
        }
        self.end = Some(position);
    }

    /// Register an obstacle and eagerly precompute its trajectory over the
    /// full prediction horizon. Returns the arena handle.
    pub fn register_obstacle(&mut self, spec: ObstacleSpec) -> ObstacleId {
        if !self.is_inside(spec.x, spec.y) {
            tracing::warn!(x = spec.x, y = spec.y, "obstacle starts outside grid, stamps will be skipped");
        }
        let id = self.obstacles.len();
        let trajectory = (0..=self.horizon)
            .map(|t| (spec.x + t as i32 * spec.dx, spec.y + t as i32 * spec.dy))
            .collect();
        self.obstacles.push(Obstacle { id, spec, trajectory });
        id
    }

    pub fn register_obstacles<I>(&mut self, specs: I) -> Vec<ObstacleId>
    where
        I: IntoIterator<Item = ObstacleSpec>,
    {
        specs.into_iter().map(|s| self.register_obstacle(s)).collect()
    }

    /// Intersect every obstacle trajectory with the robot's nominal
    /// Bresenham path. A collision is an exact cell match at the same
    /// timestep. Rebuilds the collision table.
    pub fn predict_collisions(&mut self) -> Result<&BTreeMap<usize, Vec<ObstacleId>>> {
        let (rx, ry) = self.robot.ok_or(PlanError::MissingRobot)?;
        let (ex, ey) = self.end.ok_or(PlanError::MissingEnd)?;
        self.nominal_path = bresenham(rx, ry, ex, ey);
        self.collisions.clear();

        for (t, &nominal) in self.nominal_path.iter().enumerate() {
            for obstacle in &self.obstacles {
                if obstacle.position_at(t) == Some(nominal) {
                    self.collisions.entry(t).or_default().push(obstacle.id);
                }
            }
        }
        tracing::debug!(collisions = self.collisions.len(), "collision prediction complete");
        Ok(&self.collisions)
    }

    /// Rebuild the grid from the current registries.
    ///
    /// Places the robot and end flags, precomputes per-cell distances to
    /// both endpoints, then stamps every obstacle: once per collision-table
    /// entry at the colliding timestep, and at timestep 0 for obstacles that
    /// never collide. All registered obstacles end up as hard obstacles.
    pub fn bake_grid(&mut self) {
        self.grid = Self::fresh_grid(self.width, self.height);
        self.repulsion_points.clear();

        if let Some((rx, ry)) = self.robot {
            let heading = self.robot_heading;
            if let Some(cell) = self.cell_mut(rx, ry) {
                cell.is_robot = true;
                cell.orientation = heading;
            }
        }
        if let Some((ex, ey)) = self.end {
            if let Some(cell) = self.cell_mut(ex, ey) {
                cell.is_end = true;
            }
        }

        let robot = self.robot;
        let end = self.end;
        for cell in &mut self.grid {
            if let Some((rx, ry)) = robot {
                cell.distance_to_robot = euclidean_distance(cell.x, cell.y, rx, ry);
            }
            if let Some((ex, ey)) = end {
                cell.distance_to_end = euclidean_distance(cell.x, cell.y, ex, ey);
            }
        }

        // Colliding obstacles are stamped where the collision happens.
        let mut stamps: Vec<(ObstacleId, usize)> = Vec::new();
        for (&t, ids) in &self.collisions {
            for &id in ids {
                stamps.push((id, t));
            }
        }
        let colliding: Vec<bool> = {
            let mut seen = vec![false; self.obstacles.len()];
            for &(id, _) in &stamps {
                seen[id] = true;
            }
            seen
        };
        for (id, seen) in colliding.iter().enumerate() {
            if !seen {
                stamps.push((id, 0));
            }
        }

        for (id, timestep) in stamps {
            self.stamp_obstacle(id, timestep);
        }
    }

    /// Stamp one obstacle footprint at its predicted position for
    /// `timestep`: hard obstacle cells with core repulsion, a Chebyshev
    /// halo of softer repulsion around them, and grid-wide obstacle
    /// distance accumulation. Off-grid cells are skipped.
    fn stamp_obstacle(&mut self, id: ObstacleId, timestep: usize) {
        let obstacle = &self.obstacles[id];
        let Some((ox, oy)) = obstacle.position_at(timestep) else {
            return;
        };
        let spec = obstacle.spec;
        let footprint = footprint_cells(ox, oy, spec.dx, spec.dy, spec.major_range, spec.minor_range);

        for cell in &mut self.grid {
            cell.total_obstacle_distance += euclidean_distance(cell.x, cell.y, ox, oy);
        }

        let core = self.config.core_repulsion;
        let halo = self.config.halo_repulsion;
        let offsets = dilation_offsets(self.config.repulsion_offset);

        for &(fx, fy) in &footprint {
            if let Some(cell) = self.cell_mut(fx, fy) {
                cell.is_obstacle = true;
                cell.orientation = (spec.dx as f64, spec.dy as f64);
            } else {
                tracing::warn!(x = fx, y = fy, obstacle = id, "footprint cell outside grid, skipped");
                continue;
            }
            self.put_repulsion(fx, fy, core, RepulsionKind::Core);
            for &(dx, dy) in &offsets {
                self.put_repulsion(fx + dx, fy + dy, halo, RepulsionKind::Halo);
            }
        }
    }

    /// Reset all relaxation state (costs and parents) while keeping
    /// obstacles, repulsion, and distances intact. Runs before every
    /// relaxation so repeated searches over one baked grid start clean.
    pub fn clear_relaxation(&mut self) {
        for cell in &mut self.grid {
            cell.cost = None;
            cell.parent = None;
        }
    }

    /// Add a repulsion contribution at a cell. Out-of-grid cells are
    /// silently skipped.
    pub fn put_repulsion(&mut self, x: i32, y: i32, factor: f64, kind: RepulsionKind) {
        if let Some(cell) = self.cell_mut(x, y) {
            cell.repulsion_factor += factor;
            self.repulsion_points.push(RepulsionPoint { x, y, factor, kind });
        }
    }

    /// Subtract a previously added repulsion contribution, clamping the
    /// cell sum at zero and dropping the matching registry entry. Used when
    /// an obstacle moves between bakes.
    pub fn remove_repulsion(&mut self, x: i32, y: i32, factor: f64) {
        if let Some(cell) = self.cell_mut(x, y) {
            cell.repulsion_factor = (cell.repulsion_factor - factor).max(0.0);
            if let Some(pos) = self
                .repulsion_points
                .iter()
                .position(|p| p.x == x && p.y == y && (p.factor - factor).abs() < f64::EPSILON)
            {
                self.repulsion_points.remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_at(x: i32, y: i32) -> ObstacleSpec {
        ObstacleSpec {
            x,
            y,
            dx: 0,
            dy: 0,
            major_range: (0, 0),
            minor_range: (0, 0),
        }
    }

    #[test]
    fn horizon_is_floored_grid_diagonal() {
        let env = Environment::new(10, 10);
        assert_eq!(env.horizon(), 14);
        let obstacle_env_horizon = Environment::new(3, 4).horizon();
        assert_eq!(obstacle_env_horizon, 5);
    }

    #[test]
    fn out_of_bounds_robot_is_kept_but_never_placed() {
        let mut env = Environment::new(10, 10);
        env.set_robot((15, 3), (1.0, 0.0));
        env.set_end((9, 9));
        env.bake_grid();
        assert_eq!(env.robot(), Some((15, 3)));
        assert!(env.grid().iter().all(|c| !c.is_robot));
        assert!(env.cell(9, 9).is_some_and(|c| c.is_end));
    }

    #[test]
    fn stationary_obstacle_on_nominal_path_collides_at_its_timestep() {
        let mut env = Environment::new(10, 10);
        env.set_robot((0, 0), (1.0, 0.0));
        env.set_end((4, 0));
        let id = env.register_obstacle(spec_at(4, 0));
        let collisions = env.predict_collisions().unwrap();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions.get(&4), Some(&vec![id]));
    }

    #[test]
    fn obstacle_moving_across_nominal_path_collides_where_timesteps_align() {
        let mut env = Environment::new(10, 10);
        env.set_robot((0, 0), (1.0, 0.0));
        env.set_end((9, 0));
        // Crosses (3, 0) at t = 3, exactly when the robot is there.
        env.register_obstacle(ObstacleSpec {
            x: 3,
            y: 3,
            dx: 0,
            dy: -1,
            major_range: (0, 0),
            minor_range: (0, 0),
        });
        let collisions = env.predict_collisions().unwrap();
        assert_eq!(collisions.keys().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn footprint_stamps_hard_cells_and_softer_halo() {
        let mut env = Environment::with_config(
            12,
            12,
            EnvironmentConfig {
                repulsion_offset: 1,
                ..EnvironmentConfig::default()
            },
        );
        env.set_robot((0, 0), (1.0, 0.0));
        env.set_end((11, 0));
        env.register_obstacle(ObstacleSpec {
            x: 5,
            y: 5,
            dx: 0,
            dy: 0,
            major_range: (0, 0),
            minor_range: (-1, 1),
        });
        env.predict_collisions().unwrap();
        env.bake_grid();

        for (x, y) in [(4, 5), (5, 5), (6, 5)] {
            let cell = env.cell(x, y).unwrap();
            assert!(cell.is_obstacle, "({x}, {y}) should be a hard obstacle");
            assert!(cell.repulsion_factor >= env.config.core_repulsion);
        }
        // Halo cell: repulsion-bearing but traversable in principle.
        let halo = env.cell(5, 4).unwrap();
        assert!(!halo.is_obstacle);
        assert!(halo.repulsion_factor > 0.0);

        let cores: Vec<_> = env
            .repulsion_points()
            .iter()
            .filter(|p| p.kind == RepulsionKind::Core)
            .collect();
        assert_eq!(cores.len(), 3);
        assert!(env
            .repulsion_points()
            .iter()
            .filter(|p| p.kind == RepulsionKind::Halo)
            .all(|p| p.factor < env.config.core_repulsion));
    }

    #[test]
    fn non_colliding_obstacle_is_stamped_at_its_initial_position() {
        let mut env = Environment::new(10, 10);
        env.set_robot((0, 0), (1.0, 0.0));
        env.set_end((9, 0));
        // Moves away from the path; never collides.
        env.register_obstacle(ObstacleSpec {
            x: 5,
            y: 5,
            dx: 0,
            dy: 1,
            major_range: (0, 0),
            minor_range: (0, 0),
        });
        env.predict_collisions().unwrap();
        env.bake_grid();
        assert!(env.collisions().is_empty());
        assert!(env.cell(5, 5).is_some_and(|c| c.is_obstacle));
    }

    #[test]
    fn remove_repulsion_clamps_at_zero_and_drops_registry_entry() {
        let mut env = Environment::new(5, 5);
        env.put_repulsion(2, 2, 1.0, RepulsionKind::Core);
        env.remove_repulsion(2, 2, 1.0);
        assert_eq!(env.cell(2, 2).unwrap().repulsion_factor, 0.0);
        assert!(env.repulsion_points().is_empty());
        env.remove_repulsion(2, 2, 1.0);
        assert_eq!(env.cell(2, 2).unwrap().repulsion_factor, 0.0);
    }

    #[test]
    fn distances_are_precomputed_for_every_cell() {
        let mut env = Environment::new(4, 4);
        env.set_robot((0, 0), (1.0, 0.0));
        env.set_end((3, 3));
        env.bake_grid();
        let cell = env.cell(3, 0).unwrap();
        approx::assert_relative_eq!(cell.distance_to_robot, 3.0);
        approx::assert_relative_eq!(cell.distance_to_end, 3.0);
    }
}
