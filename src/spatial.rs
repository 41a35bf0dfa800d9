//! Grid geometry helpers: distances, line rasterization, obstacle
//! footprints, and halo dilation offsets.

use std::collections::BTreeSet;

/// Euclidean distance between two cells.
pub fn euclidean_distance(x0: i32, y0: i32, x1: i32, y1: i32) -> f64 {
    let dx = (x1 - x0) as f64;
    let dy = (y1 - y0) as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Integer Bresenham line from `(x0, y0)` to `(x1, y1)`, inclusive of both
/// endpoints. Works in all octants.
pub fn bresenham(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<(i32, i32)> {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);
    let mut points = Vec::new();
    loop {
        points.push((x, y));
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    points
}

/// Rasterize an obstacle footprint centered on `(cx, cy)`.
///
/// The major axis is the unit direction of `(dx, dy)`; the minor axis its
/// 90° rotation. A zero velocity orients the major axis along +y, so the
/// minor axis spans x. Offsets are evaluated in f64 and rounded to cells,
/// deduplicated.
pub fn footprint_cells(
    cx: i32,
    cy: i32,
    dx: i32,
    dy: i32,
    major_range: (i32, i32),
    minor_range: (i32, i32),
) -> Vec<(i32, i32)> {
    let (ux, uy) = if dx == 0 && dy == 0 {
        (0.0, 1.0)
    } else {
        let len = (((dx * dx) + (dy * dy)) as f64).sqrt();
        (dx as f64 / len, dy as f64 / len)
    };
    let (px, py) = (-uy, ux);

    let mut cells = BTreeSet::new();
    for u in major_range.0..=major_range.1 {
        for v in minor_range.0..=minor_range.1 {
            let fx = cx as f64 + u as f64 * ux + v as f64 * px;
            let fy = cy as f64 + u as f64 * uy + v as f64 * py;
            cells.insert((fx.round() as i32, fy.round() as i32));
        }
    }
    cells.into_iter().collect()
}

/// All offsets within Chebyshev distance `radius` of the origin, origin
/// excluded. Used to dilate footprint cells into a soft repulsion halo.
pub fn dilation_offsets(radius: i32) -> Vec<(i32, i32)> {
    let mut offsets = Vec::new();
    for dx in -radius..=radius {
        for dy in -radius..=radius {
            if (dx, dy) != (0, 0) {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

/// Per-step orientation vectors of a cell path (one fewer than points).
pub fn path_orientations(path: &[(i32, i32)]) -> Vec<(i32, i32)> {
    path.windows(2)
        .map(|w| (w[1].0 - w[0].0, w[1].1 - w[0].1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn euclidean_distance_diagonal() {
        assert_relative_eq!(euclidean_distance(0, 0, 3, 4), 5.0);
        assert_relative_eq!(euclidean_distance(2, 2, 2, 2), 0.0);
    }

    #[test]
    fn bresenham_horizontal_line() {
        let line = bresenham(0, 0, 4, 0);
        assert_eq!(line, vec![(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)]);
    }

    #[test]
    fn bresenham_diagonal_line() {
        let line = bresenham(0, 0, 3, 3);
        assert_eq!(line, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn bresenham_reverse_direction() {
        let line = bresenham(4, 2, 0, 2);
        assert_eq!(line.first(), Some(&(4, 2)));
        assert_eq!(line.last(), Some(&(0, 2)));
        assert_eq!(line.len(), 5);
    }

    #[test]
    fn zero_velocity_footprint_minor_axis_spans_x() {
        let cells = footprint_cells(5, 5, 0, 0, (0, 0), (-1, 1));
        assert_eq!(cells, vec![(4, 5), (5, 5), (6, 5)]);
    }

    #[test]
    fn moving_footprint_major_axis_follows_velocity() {
        let cells = footprint_cells(5, 5, 1, 0, (-1, 1), (0, 0));
        assert_eq!(cells, vec![(4, 5), (5, 5), (6, 5)]);
    }

    #[test]
    fn dilation_offsets_fill_chebyshev_square() {
        let offsets = dilation_offsets(1);
        assert_eq!(offsets.len(), 8);
        let offsets = dilation_offsets(2);
        assert_eq!(offsets.len(), 24);
        assert!(!offsets.contains(&(0, 0)));
    }

    #[test]
    fn orientations_track_direction_changes() {
        let path = [(0, 0), (1, 0), (2, 0), (2, 1)];
        assert_eq!(path_orientations(&path), vec![(1, 0), (1, 0), (0, 1)]);
    }
}
