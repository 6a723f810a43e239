//! Uniform spatial hash over the image bounds.
//!
//! Each cell holds the ids of every mask whose bounding box overlaps it, so a
//! point lookup only has to consider the masks registered in one cell. A mask
//! spanning several cells is listed in each of them. The grid never owns
//! masks; ids index into the mask store.

use serde::{Deserialize, Serialize};

use crate::geometry::PixelRect;

/// Shrink applied to a mask's far edges before computing its cell range, so a
/// mask ending exactly on a cell boundary is not registered in the next cell.
const EDGE_EPSILON: f64 = 0.00001;

/// Upper bound on cells per axis.
pub const MAX_DIVISIONS: u32 = 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpatialGrid {
    x_divisions: u32,
    y_divisions: u32,
    bounds: PixelRect,
    buckets: Vec<Vec<usize>>,
}

impl SpatialGrid {
    /// Divisions are clamped to `1..=MAX_DIVISIONS` and to the bounds' size,
    /// so no cell is narrower than a pixel.
    pub fn new(x_divisions: u32, y_divisions: u32, bounds: PixelRect) -> Self {
        let x_divisions = x_divisions.min(bounds.width).min(MAX_DIVISIONS).max(1);
        let y_divisions = y_divisions.min(bounds.height).min(MAX_DIVISIONS).max(1);
        Self {
            x_divisions,
            y_divisions,
            bounds,
            buckets: vec![Vec::new(); x_divisions as usize * y_divisions as usize],
        }
    }

    pub fn divisions(&self) -> (u32, u32) {
        (self.x_divisions, self.y_divisions)
    }

    pub fn bounds(&self) -> PixelRect {
        self.bounds
    }

    #[inline]
    fn cell_width(&self) -> f64 {
        self.bounds.width as f64 / self.x_divisions as f64
    }

    #[inline]
    fn cell_height(&self) -> f64 {
        self.bounds.height as f64 / self.y_divisions as f64
    }

    /// Register `id` in every cell its rect overlaps.
    pub fn insert(&mut self, id: usize, rect: PixelRect) {
        if rect.is_empty() || !rect.intersects(&self.bounds) {
            return;
        }

        let ox = rect.x as f64 - self.bounds.x as f64;
        let oy = rect.y as f64 - self.bounds.y as f64;
        let w = rect.width as f64 - EDGE_EPSILON;
        let h = rect.height as f64 - EDGE_EPSILON;

        let cw = self.cell_width();
        let ch = self.cell_height();
        let last_x = self.x_divisions as i64 - 1;
        let last_y = self.y_divisions as i64 - 1;

        let x_start = ((ox / cw).floor() as i64).clamp(0, last_x);
        let x_end = (((ox + w) / cw).floor() as i64).clamp(0, last_x);
        let y_start = ((oy / ch).floor() as i64).clamp(0, last_y);
        let y_end = (((oy + h) / ch).floor() as i64).clamp(0, last_y);

        for cy in y_start..=y_end {
            for cx in x_start..=x_end {
                let idx = (cy * self.x_divisions as i64 + cx) as usize;
                self.buckets[idx].push(id);
            }
        }
    }

    /// Index of the cell containing `(x, y)`, clamped to the grid.
    pub fn cell_index(&self, x: f64, y: f64) -> usize {
        let cx = (((x - self.bounds.x as f64) / self.cell_width()).floor() as i64)
            .clamp(0, self.x_divisions as i64 - 1);
        let cy = (((y - self.bounds.y as f64) / self.cell_height()).floor() as i64)
            .clamp(0, self.y_divisions as i64 - 1);
        (cy * self.x_divisions as i64 + cx) as usize
    }

    /// Ids registered in the cell containing `(x, y)`.
    pub fn query(&self, x: f64, y: f64) -> &[usize] {
        &self.buckets[self.cell_index(x, y)]
    }

    /// Total id references across all cells (duplicates included).
    pub fn reference_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_land_in_overlapping_cells_only() {
        let mut grid = SpatialGrid::new(4, 4, PixelRect::new(0, 0, 8, 8));
        grid.insert(0, PixelRect::new(0, 0, 6, 6));
        grid.insert(1, PixelRect::new(2, 0, 1, 1));
        grid.insert(2, PixelRect::new(6, 6, 2, 2));

        assert_eq!(grid.query(2.0, 0.0), &[0, 1]);
        assert_eq!(grid.query(7.0, 7.0), &[2]);
        // 6×6 rect ends exactly on the cell edge at x = 6
        assert_eq!(grid.reference_count(), 9 + 1 + 1);
    }

    #[test]
    fn queries_clamp_to_grid() {
        let mut grid = SpatialGrid::new(2, 2, PixelRect::new(0, 0, 10, 10));
        grid.insert(7, PixelRect::new(5, 5, 5, 5));
        assert_eq!(grid.query(100.0, 100.0), &[7]);
        assert!(grid.query(-3.0, -3.0).is_empty());
    }

    #[test]
    fn oversized_divisions_are_clamped() {
        let mut grid = SpatialGrid::new(100_000, 100_000, PixelRect::new(0, 0, 40, 20));
        assert_eq!(grid.divisions(), (40, 20));
        grid.insert(3, PixelRect::new(21, 1, 18, 18));
        assert_eq!(grid.query(30.0, 10.0), &[3]);
        assert!(grid.query(5.0, 5.0).is_empty());

        let huge = SpatialGrid::new(u32::MAX, u32::MAX, PixelRect::new(0, 0, 5000, 5000));
        assert_eq!(huge.divisions(), (MAX_DIVISIONS, MAX_DIVISIONS));

        let zero = SpatialGrid::new(0, 0, PixelRect::new(0, 0, 10, 10));
        assert_eq!(zero.divisions(), (1, 1));
    }

    #[test]
    fn rect_outside_bounds_is_ignored() {
        let mut grid = SpatialGrid::new(2, 2, PixelRect::new(0, 0, 10, 10));
        grid.insert(1, PixelRect::new(20, 20, 3, 3));
        grid.insert(2, PixelRect::new(0, 0, 0, 5));
        assert_eq!(grid.reference_count(), 0);
    }
}
