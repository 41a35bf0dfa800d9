//! Raw path post-processing: simplification, B-spline smoothing with a
//! curvature-bounded refit loop, clearance reporting, and Dubins stitching.
//!
//! Smoothing never fails on curvature alone: when the bound cannot be met
//! within the retry budget the best attempt is returned with
//! `curvature_exceeded` set and a warning logged.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::models::RepulsionPoint;

/// Post-processing tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PostProcessConfig {
    /// Ramer-Douglas-Peucker tolerance.
    pub epsilon: f64,
    /// Simplified segments longer than this get original points reinserted.
    pub max_segment_distance: f64,
    pub spline_degree: usize,
    /// Laplacian smoothing passes over interior control points.
    pub spline_smoothness: usize,
    /// Curvature bound in inverse grid units.
    pub max_curvature: f64,
    /// Refit attempts before giving up on the curvature bound.
    pub max_fit_attempts: usize,
    /// Dense samples evaluated along the spline.
    pub sample_points: usize,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            max_segment_distance: 5.0,
            spline_degree: 3,
            spline_smoothness: 5,
            max_curvature: 15.0,
            max_fit_attempts: 5,
            sample_points: 500,
        }
    }
}

/// Smoothed, densely sampled trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothedTrajectory {
    pub points: Vec<(f64, f64)>,
    pub max_curvature: f64,
    /// True when the curvature bound was not met within the retry budget.
    pub curvature_exceeded: bool,
    /// Smoothing passes of the returned fit.
    pub smoothing_passes: usize,
    /// Minimum distance from the curve to any repulsion point, if any exist.
    pub min_clearance: Option<f64>,
    /// Closest (curve point, repulsion point) pair behind `min_clearance`.
    pub closest_repulsion: Option<((f64, f64), (f64, f64))>,
}

pub struct PathPostProcessor {
    config: PostProcessConfig,
}

impl PathPostProcessor {
    pub fn new(config: PostProcessConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(PostProcessConfig::default())
    }

    pub fn config(&self) -> &PostProcessConfig {
        &self.config
    }

    /// Simplify, fit, and measure clearance for a raw cell path.
    pub fn process(
        &self,
        path: &[(i32, i32)],
        repulsions: &[RepulsionPoint],
    ) -> Result<SmoothedTrajectory> {
        let simplified = self.simplify(path);
        let fit = self.fit_spline(&simplified)?;
        let clearance = min_clearance(&fit.points, repulsions);
        Ok(SmoothedTrajectory {
            points: fit.points,
            max_curvature: fit.max_curvature,
            curvature_exceeded: fit.curvature_exceeded,
            smoothing_passes: fit.smoothing_passes,
            min_clearance: clearance.map(|(d, _)| d),
            closest_repulsion: clearance.map(|(_, pair)| pair),
        })
    }

    /// Reduce a raw path while preserving its first and last three points
    /// as anchors, then reinsert original points wherever the reduction
    /// left a segment longer than `max_segment_distance`.
    ///
    /// Paths shorter than six points pass through unchanged.
    pub fn simplify(&self, path: &[(i32, i32)]) -> Vec<(f64, f64)> {
        let original: Vec<(f64, f64)> = path.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
        if original.len() < 6 {
            return original;
        }
        let n = original.len();
        let mut simplified = Vec::new();
        simplified.extend_from_slice(&original[..3]);
        simplified.extend(rdp(&original[3..n - 3], self.config.epsilon));
        simplified.extend_from_slice(&original[n - 3..]);
        self.refine_long_segments(&simplified, &original)
    }

    /// Split simplified segments longer than the distance bound by pulling
    /// in the original point nearest each segment midpoint. Stops a segment
    /// as soon as the nearest point makes no progress.
    fn refine_long_segments(
        &self,
        simplified: &[(f64, f64)],
        original: &[(f64, f64)],
    ) -> Vec<(f64, f64)> {
        let Some(&first) = simplified.first() else {
            return Vec::new();
        };
        let mut refined = vec![first];
        for window in simplified.windows(2) {
            let (mut start, end) = (window[0], window[1]);
            while point_distance(start, end) > self.config.max_segment_distance {
                let midpoint = ((start.0 + end.0) / 2.0, (start.1 + end.1) / 2.0);
                let Some(closest) = closest_point(original, midpoint) else {
                    break;
                };
                if closest == start || closest == end {
                    break;
                }
                refined.push(closest);
                start = closest;
            }
            refined.push(end);
        }
        refined
    }

    /// Fit a clamped B-spline through the simplified points, escalating the
    /// smoothing passes until the sampled curvature fits the bound or the
    /// retry budget is spent.
    fn fit_spline(&self, simplified: &[(f64, f64)]) -> Result<SplineFit> {
        let degree = self.config.spline_degree;
        let required = degree + 1;
        if simplified.len() < required {
            return Err(PlanError::SplineFitFailed {
                degree,
                required,
                got: simplified.len(),
            });
        }

        let attempts = self.config.max_fit_attempts.max(1);
        let step = self.config.spline_smoothness.max(1);
        let mut passes = self.config.spline_smoothness;
        let mut best: Option<SplineFit> = None;

        for _ in 0..attempts {
            let control = smooth_control_points(simplified, passes);
            let points = evaluate_bspline(&control, degree, self.config.sample_points);
            let curvature = max_curvature(&points);
            let fit = SplineFit {
                points,
                max_curvature: curvature,
                smoothing_passes: passes,
                curvature_exceeded: false,
            };
            if curvature <= self.config.max_curvature {
                return Ok(fit);
            }
            if best.as_ref().map_or(true, |b| curvature < b.max_curvature) {
                best = Some(fit);
            }
            passes += step;
        }

        // Retry budget spent: hand back the flattest attempt, flagged.
        match best {
            Some(mut fit) => {
                tracing::warn!(
                    max_curvature = fit.max_curvature,
                    bound = self.config.max_curvature,
                    attempts,
                    "curvature bound not met, returning best attempt"
                );
                fit.curvature_exceeded = true;
                Ok(fit)
            }
            None => Err(PlanError::SplineFitFailed {
                degree,
                required,
                got: simplified.len(),
            }),
        }
    }
}

struct SplineFit {
    points: Vec<(f64, f64)>,
    max_curvature: f64,
    smoothing_passes: usize,
    curvature_exceeded: bool,
}

/// Ramer-Douglas-Peucker reduction.
fn rdp(points: &[(f64, f64)], epsilon: f64) -> Vec<(f64, f64)> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let first = points[0];
    let last = points[points.len() - 1];
    let mut max_distance = 0.0;
    let mut max_index = 0;
    for (i, &p) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let d = perpendicular_distance(p, first, last);
        if d > max_distance {
            max_distance = d;
            max_index = i;
        }
    }
    if max_distance > epsilon {
        let mut left = rdp(&points[..=max_index], epsilon);
        let right = rdp(&points[max_index..], epsilon);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

fn perpendicular_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let length = (dx * dx + dy * dy).sqrt();
    if length < f64::EPSILON {
        return point_distance(p, a);
    }
    ((dy * p.0 - dx * p.1 + b.0 * a.1 - b.1 * a.0) / length).abs()
}

fn point_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    (dx * dx + dy * dy).sqrt()
}

fn closest_point(points: &[(f64, f64)], to: (f64, f64)) -> Option<(f64, f64)> {
    points
        .iter()
        .copied()
        .min_by(|&a, &b| point_distance(a, to).total_cmp(&point_distance(b, to)))
}

/// Laplacian smoothing over interior points; endpoints stay fixed.
fn smooth_control_points(points: &[(f64, f64)], passes: usize) -> Vec<(f64, f64)> {
    let mut smoothed = points.to_vec();
    if smoothed.len() < 3 {
        return smoothed;
    }
    for _ in 0..passes {
        let previous = smoothed.clone();
        for i in 1..smoothed.len() - 1 {
            smoothed[i] = (
                0.25 * previous[i - 1].0 + 0.5 * previous[i].0 + 0.25 * previous[i + 1].0,
                0.25 * previous[i - 1].1 + 0.5 * previous[i].1 + 0.25 * previous[i + 1].1,
            );
        }
    }
    smoothed
}

/// Sample a clamped uniform B-spline over its control points via De Boor.
fn evaluate_bspline(control: &[(f64, f64)], degree: usize, samples: usize) -> Vec<(f64, f64)> {
    let n = control.len();
    let p = degree.min(n - 1);
    let knots = clamped_knots(n, p);
    let samples = samples.max(2);
    (0..samples)
        .map(|s| {
            let t = s as f64 / (samples - 1) as f64;
            let span = find_span(n, p, t, &knots);
            de_boor(span, t, p, &knots, control)
        })
        .collect()
}

fn clamped_knots(n: usize, p: usize) -> Vec<f64> {
    let mut knots = Vec::with_capacity(n + p + 1);
    for i in 0..n + p + 1 {
        let knot = if i <= p {
            0.0
        } else if i >= n {
            1.0
        } else {
            (i - p) as f64 / (n - p) as f64
        };
        knots.push(knot);
    }
    knots
}

fn find_span(n: usize, p: usize, t: f64, knots: &[f64]) -> usize {
    if t >= 1.0 {
        return n - 1;
    }
    let mut span = p;
    while span + 1 < n && knots[span + 1] <= t {
        span += 1;
    }
    span
}

fn de_boor(span: usize, t: f64, p: usize, knots: &[f64], control: &[(f64, f64)]) -> (f64, f64) {
    let mut d: Vec<(f64, f64)> = (0..=p).map(|j| control[j + span - p]).collect();
    for r in 1..=p {
        for j in (r..=p).rev() {
            let i = j + span - p;
            let denom = knots[i + p - r + 1] - knots[i];
            let alpha = if denom.abs() < f64::EPSILON {
                0.0
            } else {
                (t - knots[i]) / denom
            };
            d[j] = (
                (1.0 - alpha) * d[j - 1].0 + alpha * d[j].0,
                (1.0 - alpha) * d[j - 1].1 + alpha * d[j].1,
            );
        }
    }
    d[p]
}

/// Menger curvature of the circle through three points: `4 * area / (a*b*c)`.
/// Collinear or coincident points have zero curvature.
pub fn menger_curvature(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    let ab = point_distance(a, b);
    let bc = point_distance(b, c);
    let ca = point_distance(c, a);
    let product = ab * bc * ca;
    if product < 1e-12 {
        return 0.0;
    }
    let s = (ab + bc + ca) / 2.0;
    let area_sq = s * (s - ab) * (s - bc) * (s - ca);
    if area_sq <= 0.0 {
        return 0.0;
    }
    4.0 * area_sq.sqrt() / product
}

/// Largest Menger curvature over consecutive point triples.
pub fn max_curvature(points: &[(f64, f64)]) -> f64 {
    points
        .windows(3)
        .map(|w| menger_curvature(w[0], w[1], w[2]))
        .fold(0.0, f64::max)
}

/// Minimum distance from the sampled curve to any repulsion point,
/// together with the closest pair. `None` when either side is empty.
fn min_clearance(
    samples: &[(f64, f64)],
    repulsions: &[RepulsionPoint],
) -> Option<(f64, ((f64, f64), (f64, f64)))> {
    let mut best: Option<(f64, ((f64, f64), (f64, f64)))> = None;
    for &sample in samples {
        for point in repulsions {
            let rp = (point.x as f64, point.y as f64);
            let d = point_distance(sample, rp);
            if best.map_or(true, |(b, _)| d < b) {
                best = Some((d, (sample, rp)));
            }
        }
    }
    best
}

/// Stitch a raw cell path into Dubins segments using a caller-supplied
/// Dubins planner `(x0, y0, yaw0, x1, y1, yaw1, curvature) -> points`.
///
/// Windows of `window_size` points are planned between their endpoint
/// headings (taken from the following step, or from `end_heading` at the
/// goal), advancing by `stride` points per window.
pub fn stitch_dubins<F>(
    path: &[(i32, i32)],
    end_heading: (f64, f64),
    window_size: usize,
    stride: usize,
    curvature: f64,
    mut plan: F,
) -> Vec<(f64, f64)>
where
    F: FnMut(f64, f64, f64, f64, f64, f64, f64) -> Vec<(f64, f64)>,
{
    if path.len() < 2 {
        return path.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
    }
    let window = window_size.max(2);
    let stride = stride.max(1);
    let yaw_at = |i: usize| -> f64 {
        if i + 1 < path.len() {
            let (dx, dy) = (path[i + 1].0 - path[i].0, path[i + 1].1 - path[i].1);
            (dy as f64).atan2(dx as f64)
        } else {
            end_heading.1.atan2(end_heading.0)
        }
    };

    let mut stitched = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window - 1).min(path.len() - 1);
        let (x0, y0) = path[start];
        let (x1, y1) = path[end];
        stitched.extend(plan(
            x0 as f64,
            y0 as f64,
            yaw_at(start),
            x1 as f64,
            y1 as f64,
            yaw_at(end),
            curvature,
        ));
        if end == path.len() - 1 {
            break;
        }
        start += stride;
    }
    stitched
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn straight_path(len: i32) -> Vec<(i32, i32)> {
        (0..len).map(|x| (x, 0)).collect()
    }

    #[test]
    fn rdp_collapses_a_straight_line_to_its_endpoints() {
        let line: Vec<(f64, f64)> = (0..10).map(|x| (x as f64, 0.0)).collect();
        let reduced = rdp(&line, 0.5);
        assert_eq!(reduced, vec![(0.0, 0.0), (9.0, 0.0)]);
    }

    #[test]
    fn rdp_keeps_a_significant_corner() {
        let corner = vec![
            (0.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
            (2.0, 1.0),
            (2.0, 2.0),
        ];
        let reduced = rdp(&corner, 0.5);
        assert!(reduced.contains(&(2.0, 0.0)));
        assert_eq!(reduced.first(), Some(&(0.0, 0.0)));
        assert_eq!(reduced.last(), Some(&(2.0, 2.0)));
    }

    #[test]
    fn short_paths_pass_through_simplification_unchanged() {
        let processor = PathPostProcessor::with_defaults();
        let simplified = processor.simplify(&straight_path(5));
        assert_eq!(simplified.len(), 5);
    }

    #[test]
    fn simplification_preserves_three_anchor_points_each_side() {
        let processor = PathPostProcessor::with_defaults();
        let path = straight_path(12);
        let simplified = processor.simplify(&path);
        for anchor in [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (9.0, 0.0), (10.0, 0.0), (11.0, 0.0)] {
            assert!(simplified.contains(&anchor), "missing anchor {anchor:?}");
        }
    }

    #[test]
    fn long_segments_get_original_points_reinserted() {
        let processor = PathPostProcessor::new(PostProcessConfig {
            max_segment_distance: 2.0,
            ..PostProcessConfig::default()
        });
        let simplified = processor.simplify(&straight_path(11));
        // The middle RDP segment (3,0)..(7,0) is longer than the bound, so
        // the original midpoint comes back.
        assert!(simplified.contains(&(5.0, 0.0)));
    }

    #[test]
    fn straight_line_spline_has_near_zero_curvature() {
        let processor = PathPostProcessor::with_defaults();
        let smoothed = processor.process(&straight_path(11), &[]).unwrap();
        assert_eq!(smoothed.points.len(), 500);
        assert!(smoothed.max_curvature < 1e-6);
        assert!(!smoothed.curvature_exceeded);
        assert_relative_eq!(smoothed.points[0].0, 0.0, epsilon = 1e-9);
        assert_relative_eq!(smoothed.points[499].0, 10.0, epsilon = 1e-9);
        assert!(smoothed.min_clearance.is_none());
    }

    #[test]
    fn too_few_points_is_a_spline_fit_failure() {
        let processor = PathPostProcessor::with_defaults();
        let err = processor.process(&straight_path(3), &[]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::PlanError::SplineFitFailed { got: 3, .. }
        ));
    }

    #[test]
    fn unreachable_curvature_bound_flags_the_best_attempt() {
        let processor = PathPostProcessor::new(PostProcessConfig {
            max_curvature: 1e-9,
            max_fit_attempts: 2,
            spline_smoothness: 1,
            ..PostProcessConfig::default()
        });
        let mut path: Vec<(i32, i32)> = (0..=5).map(|x| (x, 0)).collect();
        path.extend((1..=5).map(|y| (5, y)));
        let smoothed = processor.process(&path, &[]).unwrap();
        assert!(smoothed.curvature_exceeded);
        assert!(smoothed.max_curvature > 1e-9);
    }

    #[test]
    fn menger_curvature_is_inverse_circle_radius() {
        let k = menger_curvature((2.0, 0.0), (0.0, 2.0), (-2.0, 0.0));
        assert_relative_eq!(k, 0.5, epsilon = 1e-9);
        assert_relative_eq!(
            menger_curvature((0.0, 0.0), (1.0, 0.0), (2.0, 0.0)),
            0.0
        );
    }

    #[test]
    fn clearance_reports_distance_to_nearest_repulsion() {
        use crate::models::{RepulsionKind, RepulsionPoint};
        let processor = PathPostProcessor::with_defaults();
        let repulsions = [RepulsionPoint {
            x: 3,
            y: 4,
            factor: 1.0,
            kind: RepulsionKind::Core,
        }];
        let smoothed = processor.process(&straight_path(11), &repulsions).unwrap();
        let clearance = smoothed.min_clearance.unwrap();
        assert!((clearance - 4.0).abs() < 0.01, "clearance {clearance}");
        assert!(smoothed.closest_repulsion.is_some());
    }

    #[test]
    fn dubins_stitching_windows_the_path() {
        let path = straight_path(5);
        let mut calls = Vec::new();
        let stitched = stitch_dubins(
            &path,
            (1.0, 0.0),
            3,
            2,
            1.0,
            |x0, y0, _yaw0, x1, y1, _yaw1, _c| {
                calls.push(((x0, y0), (x1, y1)));
                vec![(x0, y0), (x1, y1)]
            },
        );
        assert_eq!(calls, vec![((0.0, 0.0), (2.0, 0.0)), ((2.0, 0.0), (4.0, 0.0))]);
        assert_eq!(stitched.len(), 4);
    }
}
