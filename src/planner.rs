//! Weighted grid relaxation and greedy path extraction.
//!
//! `relax_from` floods costs outward from an origin cell with a binary-heap
//! open list whose sort key blends accumulated cost against the straight
//! line distance to the opposite endpoint (`k_factor`). Extraction then
//! walks from the robot downhill over the relaxed costs, refusing obstacle
//! and repulsion-bearing cells.
//!
//! Repulsion is deliberately applied in a second phase: every relaxed cell
//! gains `repulsion_factor * repulsion_penalty` only after the relaxation
//! loop has finished, so repulsion never influences heap ordering, only the
//! extraction that follows.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::error::{PlanError, Result};
use crate::models::{ExpansionPolicy, MovementPattern};
use crate::spatial::{bresenham, euclidean_distance, path_orientations};

/// Wrapper to allow f64 ordering in the heap.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FloatOrd(f64);

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Open-list entry. Ordered by blended sort key, then raw cost, then
/// coordinates for determinism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenEntry {
    sort_key: FloatOrd,
    cost: FloatOrd,
    x: i32,
    y: i32,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key
            .cmp(&other.sort_key)
            .then_with(|| self.cost.cmp(&other.cost))
            .then_with(|| self.x.cmp(&other.x))
            .then_with(|| self.y.cmp(&other.y))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Planner tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Seed cost for non-free cells under `PenalizeObstacles`.
    pub obstacle_penalty: f64,
    /// Multiplier applied to each cell's repulsion factor in the post-pass.
    pub repulsion_penalty: f64,
    /// Blend between accumulated cost (1.0) and distance-to-target (0.0).
    pub k_factor: f64,
    /// Optional sort-key term weighting distance to all stamped obstacles.
    pub obstacle_distance_weight: f64,
    pub movement: MovementPattern,
    pub expansion: ExpansionPolicy,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            obstacle_penalty: 500.0,
            repulsion_penalty: 10.0,
            k_factor: 0.5,
            obstacle_distance_weight: 0.0,
            movement: MovementPattern::Queen,
            expansion: ExpansionPolicy::PenalizeObstacles,
        }
    }
}

/// Relaxation statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SearchStats {
    /// Cells finalized (popped and expanded).
    pub nodes_expanded: usize,
    /// Cells that received a cost.
    pub relaxed_cells: usize,
}

/// Discrete path produced by extraction, with per-step orientations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPath {
    pub points: Vec<(i32, i32)>,
    /// One step vector per consecutive point pair.
    pub orientations: Vec<(i32, i32)>,
    pub nodes_expanded: usize,
}

impl RawPath {
    /// Split the path into runs of identical step orientation.
    pub fn segments(&self) -> Vec<Vec<(i32, i32)>> {
        segment_by_orientation(&self.points, &self.orientations)
    }

    /// Collapse knots: whenever a later point is reachable from the current
    /// one in a single `movement` offset, jump straight to the farthest such
    /// point and drop the detour in between. Orientations are rebuilt from
    /// the surviving points.
    pub fn remove_knots(&mut self, movement: MovementPattern) {
        if self.points.len() < 3 {
            return;
        }
        let offsets = movement.offsets();
        let mut kept = vec![self.points[0]];
        let mut i = 0;
        while i + 1 < self.points.len() {
            let (cx, cy) = self.points[i];
            let mut next = i + 1;
            for (j, &(px, py)) in self.points.iter().enumerate().skip(i + 1) {
                if offsets.contains(&(px - cx, py - cy)) {
                    next = j;
                }
            }
            kept.push(self.points[next]);
            i = next;
        }
        self.points = kept;
        self.orientations = path_orientations(&self.points);
    }
}

/// Group consecutive path points by step orientation. A straight path
/// yields one segment; each direction change opens a new one.
pub fn segment_by_orientation(
    points: &[(i32, i32)],
    orientations: &[(i32, i32)],
) -> Vec<Vec<(i32, i32)>> {
    if points.len() < 2 || orientations.is_empty() {
        return vec![points.to_vec()];
    }
    let mut segments = vec![vec![points[0]]];
    let mut previous = orientations[0];
    for (idx, &orientation) in orientations.iter().enumerate().skip(1) {
        if orientation == previous {
            if let Some(last) = segments.last_mut() {
                last.push(points[idx]);
            }
        } else {
            segments.push(vec![points[idx]]);
            previous = orientation;
        }
    }
    if let (Some(last), Some(&end)) = (segments.last_mut(), points.last()) {
        last.push(end);
    }
    segments
}

pub struct PathPlanner {
    config: PlannerConfig,
}

impl PathPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(PlannerConfig::default())
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// End-to-end planning over a baked environment: relax from the goal
    /// toward the robot, then extract the robot's path to the goal.
    ///
    /// Short-circuits without a search when the robot already stands on the
    /// goal or when the grid carries no obstacle or repulsion at all; both
    /// cases return the direct interpolated path.
    pub fn plan(&self, env: &mut Environment) -> Result<RawPath> {
        let robot = env.robot().ok_or(PlanError::MissingRobot)?;
        let end = env.end().ok_or(PlanError::MissingEnd)?;

        if robot == end {
            return Ok(RawPath {
                points: vec![robot],
                orientations: Vec::new(),
                nodes_expanded: 0,
            });
        }
        let grid_is_free = env.grid().iter().all(|c| c.is_free());
        if grid_is_free {
            tracing::debug!("grid carries no obstacles, returning direct path");
            let points = bresenham(robot.0, robot.1, end.0, end.1);
            let orientations = path_orientations(&points);
            return Ok(RawPath {
                points,
                orientations,
                nodes_expanded: 0,
            });
        }

        let stats = self.relax_from(
            env,
            end,
            robot,
            self.config.movement,
            self.config.expansion,
            self.config.k_factor,
        );
        tracing::debug!(
            nodes_expanded = stats.nodes_expanded,
            relaxed_cells = stats.relaxed_cells,
            "relaxation complete"
        );
        let mut raw = self.extract_path(env, robot, end, self.config.movement)?;
        raw.nodes_expanded = stats.nodes_expanded;
        Ok(raw)
    }

    /// Flood costs outward from `origin` until `target` appears in the open
    /// frontier (it never has to be finalized) or the frontier empties.
    ///
    /// Sort key per cell: `k_factor * cost + (1 - k_factor) * h`, where `h`
    /// is the cell's straight-line distance to `target`, plus the optional
    /// obstacle-distance term. Decrease-key is lazy: improved cells are
    /// re-pushed and stale heap entries skipped against the best-known cost
    /// map. After the loop, every relaxed cell gains its repulsion term.
    pub fn relax_from(
        &self,
        env: &mut Environment,
        origin: (i32, i32),
        target: (i32, i32),
        movement: MovementPattern,
        expansion: ExpansionPolicy,
        k_factor: f64,
    ) -> SearchStats {
        let mut stats = SearchStats::default();
        if env.cell(origin.0, origin.1).is_none() {
            tracing::warn!(x = origin.0, y = origin.1, "relaxation origin outside grid");
            return stats;
        }
        // Costs from an earlier relaxation would otherwise survive into the
        // repulsion pass and compound its penalty.
        env.clear_relaxation();

        let mut open: BinaryHeap<Reverse<OpenEntry>> = BinaryHeap::new();
        let mut best_cost: HashMap<(i32, i32), f64> = HashMap::new();
        let mut in_open: HashSet<(i32, i32)> = HashSet::new();
        let mut closed: HashSet<(i32, i32)> = HashSet::new();

        if let Some(cell) = env.cell_mut(origin.0, origin.1) {
            cell.cost = Some(0.0);
            cell.parent = None;
        }
        let origin_key = self.sort_key(env, origin, target, 0.0, k_factor);
        open.push(Reverse(OpenEntry {
            sort_key: FloatOrd(origin_key),
            cost: FloatOrd(0.0),
            x: origin.0,
            y: origin.1,
        }));
        best_cost.insert(origin, 0.0);
        in_open.insert(origin);
        stats.relaxed_cells += 1;

        loop {
            // Early exit: the target only has to reach the frontier.
            if in_open.contains(&target) {
                break;
            }
            let Some(Reverse(entry)) = open.pop() else {
                break;
            };
            let pos = (entry.x, entry.y);
            if let Some(&best) = best_cost.get(&pos) {
                if entry.cost.0 > best + 1e-9 {
                    continue; // stale heap entry
                }
            }
            if !closed.insert(pos) {
                continue;
            }
            in_open.remove(&pos);
            stats.nodes_expanded += 1;
            let parent_cost = entry.cost.0;

            for &(dx, dy) in movement.offsets() {
                let neighbor = (pos.0 + dx, pos.1 + dy);
                if closed.contains(&neighbor) {
                    continue;
                }
                let Some(cell) = env.cell(neighbor.0, neighbor.1) else {
                    continue;
                };
                let free = cell.is_free();
                let step = (((dx * dx) + (dy * dy)) as f64).sqrt();

                let candidate = if free {
                    parent_cost + step
                } else {
                    match expansion {
                        ExpansionPolicy::BlockObstacles => continue,
                        // Non-free cells enter once, at the flat penalty.
                        ExpansionPolicy::PenalizeObstacles => {
                            if best_cost.contains_key(&neighbor) {
                                continue;
                            }
                            self.config.obstacle_penalty
                        }
                    }
                };

                let improved = match best_cost.get(&neighbor) {
                    None => true,
                    Some(&current) => free && candidate + 1e-9 < current,
                };
                if !improved {
                    continue;
                }
                if !best_cost.contains_key(&neighbor) {
                    stats.relaxed_cells += 1;
                }
                best_cost.insert(neighbor, candidate);
                if let Some(cell) = env.cell_mut(neighbor.0, neighbor.1) {
                    cell.cost = Some(candidate);
                    cell.parent = Some(pos);
                }
                let key = self.sort_key(env, neighbor, target, candidate, k_factor);
                open.push(Reverse(OpenEntry {
                    sort_key: FloatOrd(key),
                    cost: FloatOrd(candidate),
                    x: neighbor.0,
                    y: neighbor.1,
                }));
                in_open.insert(neighbor);
            }
        }

        self.add_repulsion_penalty(env);
        stats
    }

    /// Post-relaxation pass: fold each cell's repulsion into its cost.
    fn add_repulsion_penalty(&self, env: &mut Environment) {
        let penalty = self.config.repulsion_penalty;
        for y in 0..env.height() as i32 {
            for x in 0..env.width() as i32 {
                let Some(cell) = env.cell_mut(x, y) else {
                    continue;
                };
                if let Some(cost) = cell.cost {
                    if cell.repulsion_factor > 0.0 {
                        cell.cost = Some(cost + cell.repulsion_factor * penalty);
                    }
                }
            }
        }
    }

    fn sort_key(
        &self,
        env: &Environment,
        pos: (i32, i32),
        target: (i32, i32),
        cost: f64,
        k_factor: f64,
    ) -> f64 {
        let (heuristic, obstacle_distance) = match env.cell(pos.0, pos.1) {
            Some(cell) => {
                let h = if env.robot() == Some(target) {
                    cell.distance_to_robot
                } else if env.end() == Some(target) {
                    cell.distance_to_end
                } else {
                    euclidean_distance(pos.0, pos.1, target.0, target.1)
                };
                (h, cell.total_obstacle_distance)
            }
            None => (euclidean_distance(pos.0, pos.1, target.0, target.1), 0.0),
        };
        k_factor * cost
            + (1.0 - k_factor) * heuristic
            + self.config.obstacle_distance_weight * obstacle_distance
    }

    /// Greedy descent from `from` to `to` over post-repulsion costs.
    ///
    /// At each step the lowest-cost neighbor among in-bounds, non-obstacle,
    /// repulsion-free, cost-bearing, unvisited cells is taken. A visited
    /// set and a `width * height` step budget guarantee termination; a dead
    /// end or an exhausted budget is [`PlanError::PathNotFound`].
    pub fn extract_path(
        &self,
        env: &Environment,
        from: (i32, i32),
        to: (i32, i32),
        movement: MovementPattern,
    ) -> Result<RawPath> {
        let budget = env.width() * env.height();
        let mut points = vec![from];
        let mut visited: HashSet<(i32, i32)> = HashSet::new();
        visited.insert(from);
        let mut current = from;
        let mut steps = 0;

        while current != to {
            if steps >= budget {
                return Err(PlanError::PathNotFound {
                    x: current.0,
                    y: current.1,
                    steps,
                });
            }
            let mut best: Option<((i32, i32), f64)> = None;
            for &(dx, dy) in movement.offsets() {
                let neighbor = (current.0 + dx, current.1 + dy);
                if visited.contains(&neighbor) {
                    continue;
                }
                let Some(cell) = env.cell(neighbor.0, neighbor.1) else {
                    continue;
                };
                if !cell.is_free() {
                    continue;
                }
                let Some(cost) = cell.cost else {
                    continue;
                };
                if best.map_or(true, |(_, b)| cost < b) {
                    best = Some((neighbor, cost));
                }
            }
            let Some((next, _)) = best else {
                return Err(PlanError::PathNotFound {
                    x: current.0,
                    y: current.1,
                    steps,
                });
            };
            visited.insert(next);
            points.push(next);
            current = next;
            steps += 1;
        }

        let orientations = path_orientations(&points);
        Ok(RawPath {
            points,
            orientations,
            nodes_expanded: 0,
        })
    }
}
