//! Panel geometry: grid arrangement and bound clamping.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Split a container into an even grid for `count` panels, row-major, with at
/// most `max_columns` columns.
pub fn grid_layout(
    count: usize,
    container_width: f64,
    container_height: f64,
    max_columns: usize,
) -> Vec<Rect> {
    if count == 0 {
        return Vec::new();
    }
    let columns = max_columns.max(1).min(count);
    let rows = count.div_ceil(columns);
    let width = container_width / columns as f64;
    let height = container_height / rows as f64;

    (0..count)
        .map(|i| Rect {
            x: (i % columns) as f64 * width,
            y: (i / columns) as f64 * height,
            width,
            height,
        })
        .collect()
}

/// Clamp `value` into `[min, max]`. A non-finite value lands on `min`; when
/// `min > max`, `min` wins.
pub fn clamp_extent(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.max(min).min(max.max(min))
}

/// Clamp a position so a panel of `extent` stays inside `[0, bound]`.
pub fn clamp_offset(value: f64, extent: f64, bound: f64) -> f64 {
    clamp_extent(value, 0.0, (bound - extent).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_of_five_in_three_columns() {
        let cells = grid_layout(5, 1200.0, 800.0, 3);
        assert_eq!(cells.len(), 5);
        assert_eq!(cells[0], Rect { x: 0.0, y: 0.0, width: 400.0, height: 400.0 });
        assert_eq!(cells[2].x, 800.0);
        assert_eq!(cells[3], Rect { x: 0.0, y: 400.0, width: 400.0, height: 400.0 });
    }

    #[test]
    fn fewer_panels_than_columns() {
        let cells = grid_layout(2, 1000.0, 500.0, 3);
        assert_eq!(cells[1], Rect { x: 500.0, y: 0.0, width: 500.0, height: 500.0 });
        assert!(grid_layout(0, 1000.0, 500.0, 3).is_empty());
        assert_eq!(grid_layout(3, 300.0, 300.0, 0).len(), 3);
    }

    #[test]
    fn clamping() {
        assert_eq!(clamp_extent(-50.0, 100.0, 800.0), 100.0);
        assert_eq!(clamp_extent(9999.0, 100.0, 800.0), 800.0);
        assert_eq!(clamp_extent(f64::NAN, 100.0, 800.0), 100.0);
        assert_eq!(clamp_extent(50.0, 300.0, 200.0), 300.0);
        assert_eq!(clamp_offset(-10.0, 400.0, 1920.0), 0.0);
        assert_eq!(clamp_offset(1800.0, 400.0, 1920.0), 1520.0);
        assert_eq!(clamp_offset(30.0, 400.0, 300.0), 0.0);
    }
}
