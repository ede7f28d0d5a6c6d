// THEORY:
// The `GridManager` is the spatial aggregation layer. It overlays a grid of
// square cells on the video frame and counts how many detection centers fall
// into each cell, producing the raw "heat" that the renderer later paints.
//
// Key architectural principles:
// 1.  **Truncating grid**: the grid has `width / grid_size` columns and
//     `height / grid_size` rows (integer division). Pixels beyond the last full
//     row or column are folded into it by clamping the cell index, so a center
//     on or past the frame edge still lands in the final cell.
// 2.  **Center binning**: a detection contributes exactly one count, at the
//     center of its bounding box. Box size does not spread the heat; that
//     visual spreading is the renderer's job.
// 3.  **Self-relative normalization**: after counting, every cell is divided by
//     the busiest cell, so intensities lie in [0, 1]. An all-zero grid is left
//     untouched instead of being divided by zero.
// 4.  **Stateless utility**: like the blob detector before it, a `GridManager`
//     holds only geometry. Each call to `aggregate` starts from a fresh grid.

use crate::core_modules::detection::{Detection, Dimensions};
use crate::error::{AnalyticsError, Result};
use serde::Serialize;

/// A row-major 2D matrix of cell intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityGrid {
    /// Number of columns.
    width: usize,
    /// Number of rows.
    height: usize,
    cells: Vec<f64>,
}

impl IntensityGrid {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![0.0; width * height],
        }
    }

    /// Builds a grid from rows. All rows must share the first row's length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != width) {
            return Err(AnalyticsError::Config("grid rows have unequal lengths".to_string()));
        }
        Ok(Self {
            width,
            height,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.cells[y * self.width + x]
    }

    pub fn add(&mut self, x: usize, y: usize, amount: f64) {
        self.cells[y * self.width + x] += amount;
    }

    pub fn max(&self) -> f64 {
        self.cells.iter().copied().fold(0.0, f64::max)
    }

    pub fn count_nonzero(&self) -> usize {
        self.cells.iter().filter(|&&v| v != 0.0).count()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Divides every cell by the maximum. Returns the maximum seen before
    /// scaling.
    pub fn normalize(&mut self) -> f64 {
        let max = self.max();
        if max > 0.0 {
            for v in &mut self.cells {
                *v /= max;
            }
        }
        max
    }

    /// The grid as nested rows, for serialization.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        if self.width == 0 {
            return vec![Vec::new(); self.height];
        }
        self.cells.chunks(self.width).map(<[f64]>::to_vec).collect()
    }
}

/// Summary of one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GridStatistics {
    /// Detections that survived the brand filter.
    pub total_detections: usize,
    /// Peak cell count before normalization.
    pub max_intensity: f64,
    pub active_cells: usize,
    pub total_cells: usize,
}

/// A normalized grid together with its statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAggregate {
    pub grid: IntensityGrid,
    pub statistics: GridStatistics,
}

/// Owns the grid geometry for one frame size and cell size.
#[derive(Debug, Clone, Copy)]
pub struct GridManager {
    /// The side of a square cell in source pixels.
    grid_size: u32,
    /// Columns (video_width / grid_size).
    grid_width: u32,
    /// Rows (video_height / grid_size).
    grid_height: u32,
}

impl GridManager {
    pub fn new(video_width: u32, video_height: u32, grid_size: u32) -> Result<Self> {
        if grid_size == 0 {
            return Err(AnalyticsError::InvalidGridSize(grid_size));
        }
        Ok(Self {
            grid_size,
            grid_width: video_width / grid_size,
            grid_height: video_height / grid_size,
        })
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn grid_dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.grid_width,
            height: self.grid_height,
        }
    }

    pub fn total_cells(&self) -> usize {
        self.grid_width as usize * self.grid_height as usize
    }

    /// A well-formed all-zero grid of this manager's shape.
    pub fn empty_grid(&self) -> IntensityGrid {
        IntensityGrid::zeros(self.grid_width as usize, self.grid_height as usize)
    }

    /// Maps a point in source pixels to its (column, row) cell, clamping to the
    /// grid edges. `None` when the grid has no cells.
    pub fn cell_for(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return None;
        }
        let clamp = |v: f64, cells: u32| {
            let idx = (v / self.grid_size as f64).floor();
            idx.clamp(0.0, cells.saturating_sub(1) as f64) as usize
        };
        Some((clamp(x, self.grid_width), clamp(y, self.grid_height)))
    }

    /// Counts detection centers per cell and normalizes the result.
    /// `brand_filter` keeps only detections whose brand matches, ignoring case.
    pub fn aggregate(&self, detections: &[Detection], brand_filter: Option<&str>) -> Result<GridAggregate> {
        let mut grid = self.empty_grid();
        let mut total_detections = 0;

        let surviving = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| brand_filter.is_none_or(|brand| d.matches_brand(brand)));

        for (index, detection) in surviving {
            detection.check_bbox(index)?;
            total_detections += 1;
            let (cx, cy) = detection.center();
            if let Some((x, y)) = self.cell_for(cx, cy) {
                grid.add(x, y, 1.0);
            }
        }

        let max_intensity = grid.normalize();
        let statistics = GridStatistics {
            total_detections,
            max_intensity,
            active_cells: grid.count_nonzero(),
            total_cells: self.total_cells(),
        };
        Ok(GridAggregate { grid, statistics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(cx: f64, cy: f64, brand: &str) -> Detection {
        Detection::new([cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0], 0.9, brand, 0)
    }

    #[test]
    fn grid_shape_truncates() {
        let manager = GridManager::new(1000, 500, 50).unwrap();
        let grid = manager.empty_grid();
        assert_eq!((grid.height(), grid.width()), (10, 20));

        let manager = GridManager::new(1030, 520, 50).unwrap();
        assert_eq!(manager.grid_dimensions(), Dimensions { width: 20, height: 10 });
    }

    #[test]
    fn zero_grid_size_is_rejected() {
        assert_eq!(
            GridManager::new(100, 100, 0).unwrap_err(),
            AnalyticsError::InvalidGridSize(0)
        );
    }

    #[test]
    fn centers_past_the_edge_clamp_into_last_cell() {
        let manager = GridManager::new(1030, 520, 50).unwrap();
        assert_eq!(manager.cell_for(1029.0, 519.0), Some((19, 9)));
        assert_eq!(manager.cell_for(1000.0, 500.0), Some((19, 9)));
        assert_eq!(manager.cell_for(-20.0, 0.0), Some((0, 0)));
        assert_eq!(manager.cell_for(74.9, 50.0), Some((1, 1)));
    }

    #[test]
    fn cell_lookup_on_cellless_grid_is_none() {
        let narrow = GridManager::new(40, 400, 50).unwrap();
        assert_eq!(narrow.grid_dimensions(), Dimensions { width: 0, height: 8 });
        assert_eq!(narrow.cell_for(20.0, 20.0), None);
        let flat = GridManager::new(400, 10, 50).unwrap();
        assert_eq!(flat.cell_for(0.0, 0.0), None);
    }

    #[test]
    fn intensities_normalize_against_busiest_cell() {
        let manager = GridManager::new(200, 100, 50).unwrap();
        let detections = vec![
            at(25.0, 25.0, "Nike"),
            at(30.0, 20.0, "Nike"),
            at(175.0, 75.0, "Nike"),
        ];
        let agg = manager.aggregate(&detections, None).unwrap();
        assert_eq!(agg.grid.get(0, 0), 1.0);
        assert_eq!(agg.grid.get(3, 1), 0.5);
        assert_eq!(agg.statistics.max_intensity, 2.0);
        assert_eq!(agg.statistics.active_cells, 2);
        assert_eq!(agg.statistics.total_cells, 8);
        assert_eq!(agg.statistics.total_detections, 3);
        assert!(agg.grid.to_rows().iter().flatten().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn brand_filter_excludes_other_brands() {
        let manager = GridManager::new(200, 100, 50).unwrap();
        let detections = vec![at(25.0, 25.0, "Nike"), at(125.0, 75.0, "Adidas")];
        let agg = manager.aggregate(&detections, Some("nike")).unwrap();
        assert_eq!(agg.statistics.total_detections, 1);
        assert_eq!(agg.statistics.active_cells, 1);
        assert_eq!(agg.grid.get(2, 1), 0.0);
    }

    #[test]
    fn empty_input_gives_zero_grid() {
        let manager = GridManager::new(1000, 500, 50).unwrap();
        let agg = manager.aggregate(&[], None).unwrap();
        assert_eq!(agg.grid.max(), 0.0);
        assert_eq!(agg.statistics.active_cells, 0);
        assert_eq!(agg.statistics.total_cells, 200);
    }

    #[test]
    fn zero_sized_grid_stays_well_formed() {
        let manager = GridManager::new(40, 40, 50).unwrap();
        let agg = manager.aggregate(&[at(20.0, 20.0, "Nike")], None).unwrap();
        assert!(agg.grid.is_empty());
        assert_eq!(agg.statistics.total_cells, 0);
        assert_eq!(agg.statistics.total_detections, 1);
    }

    #[test]
    fn rows_round_trip_shape() {
        let grid = IntensityGrid::from_rows(vec![vec![0.0, 1.0], vec![0.5, 0.0]]).unwrap();
        assert_eq!(grid.get(1, 0), 1.0);
        assert_eq!(grid.get(0, 1), 0.5);
        assert!(IntensityGrid::from_rows(vec![vec![0.0], vec![1.0, 2.0]]).is_err());
    }
}
