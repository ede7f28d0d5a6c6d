// THEORY:
// `spatial_heatmap` chains the spatial layer end to end: detections are binned by
// the `GridManager`, painted by the `HeatmapRenderer`, and encoded into a data
// URI, and the three results are packaged with their geometry and statistics
// into one `HeatmapResult`.
//
// It is also where faults become defaults. A bad grid size or a non-finite
// bounding box yields the empty result; a render fault yields the small blank
// fallback image; an encoding fault yields an empty URI. In every case the
// caller receives a complete `HeatmapResult` plus the diagnostics.

use crate::core_modules::color_ramp::color_ramp::ColorRamp;
use crate::core_modules::detection::{Detection, Dimensions};
use crate::core_modules::grid_manager::{GridManager, GridStatistics, IntensityGrid};
use crate::core_modules::heatmap_renderer::{HeatmapRenderer, RenderOptions};
use crate::core_modules::image_helper::image_helper;
use crate::error::Outcome;
use image::{DynamicImage, RgbaImage};
use serde::Serialize;

pub const DEFAULT_GRID_SIZE: u32 = 50;

/// What to render and how.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapOptions {
    pub grid_size: u32,
    /// Keep only this brand (case-insensitive).
    pub brand_filter: Option<String>,
    pub render: RenderOptions,
}

impl Default for HeatmapOptions {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            brand_filter: None,
            render: RenderOptions::default(),
        }
    }
}

/// A rendered spatial heatmap and everything needed to place it.
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapResult {
    /// The raw RGBA buffer. Not serialized; `heatmap_image` carries it.
    #[serde(skip)]
    pub image: RgbaImage,
    /// `data:image/png;base64,...`, or empty when nothing was rendered.
    pub heatmap_image: String,
    /// Normalized intensities, one row per grid row.
    pub intensity_matrix: Vec<Vec<f64>>,
    pub grid_size: u32,
    pub video_dimensions: Dimensions,
    pub grid_dimensions: Dimensions,
    pub statistics: GridStatistics,
    pub brand_filter: Option<String>,
}

impl HeatmapResult {
    /// A zero-filled result with no image.
    pub fn empty(video: Dimensions, grid: Dimensions, grid_size: u32) -> Self {
        let zeros = IntensityGrid::zeros(grid.width as usize, grid.height as usize);
        Self {
            image: RgbaImage::new(0, 0),
            heatmap_image: String::new(),
            intensity_matrix: zeros.to_rows(),
            grid_size,
            video_dimensions: video,
            grid_dimensions: grid,
            statistics: GridStatistics {
                total_cells: zeros.len(),
                ..GridStatistics::default()
            },
            brand_filter: None,
        }
    }
}

/// Aggregates, renders and encodes one heatmap.
pub fn generate_heatmap(
    detections: &[Detection],
    video: Dimensions,
    options: &HeatmapOptions,
    ramp: &ColorRamp,
) -> Outcome<HeatmapResult> {
    let grid_size = options.grid_size;
    let manager = match GridManager::new(video.width, video.height, grid_size) {
        Ok(manager) => manager,
        Err(err) => {
            log::error!("error generating heatmap data: {err}");
            return Outcome::degraded(HeatmapResult::empty(video, Dimensions::default(), grid_size), err);
        }
    };
    let grid_dimensions = manager.grid_dimensions();

    let aggregate = match manager.aggregate(detections, options.brand_filter.as_deref()) {
        Ok(aggregate) => aggregate,
        Err(err) => {
            log::error!("error generating heatmap data: {err}");
            return Outcome::degraded(HeatmapResult::empty(video, grid_dimensions, grid_size), err);
        }
    };

    if aggregate.statistics.total_detections == 0 || aggregate.grid.is_empty() {
        let mut empty = HeatmapResult::empty(video, grid_dimensions, grid_size);
        empty.statistics.total_detections = aggregate.statistics.total_detections;
        return Outcome::clean(empty);
    }

    let renderer = HeatmapRenderer::new(ramp.clone(), options.render);
    let (image, render_fault) = renderer.render_or_fallback(&aggregate.grid, grid_size);
    let dynamic = DynamicImage::ImageRgba8(image);
    let (heatmap_image, encode_fault) = image_helper::to_data_uri_or_empty(&dynamic);

    let statistics = aggregate.statistics;
    log::info!(
        "generated heatmap with {} detections, max intensity: {}, active cells: {}",
        statistics.total_detections,
        statistics.max_intensity,
        statistics.active_cells
    );

    let mut outcome = Outcome::clean(HeatmapResult {
        image: dynamic.into_rgba8(),
        heatmap_image,
        intensity_matrix: aggregate.grid.to_rows(),
        grid_size,
        video_dimensions: video,
        grid_dimensions,
        statistics,
        brand_filter: options.brand_filter.clone(),
    });
    for fault in [render_fault, encode_fault].into_iter().flatten() {
        outcome.push(fault);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    fn at(cx: f64, cy: f64, brand: &str) -> Detection {
        Detection::new([cx - 4.0, cy - 4.0, cx + 4.0, cy + 4.0], 0.8, brand, 0)
    }

    #[test]
    fn empty_detections_give_empty_payload() {
        let outcome = generate_heatmap(&[], dims(1000, 500), &HeatmapOptions::default(), &ColorRamp::default());
        assert!(!outcome.is_degraded());
        let result = outcome.value;
        assert_eq!(result.heatmap_image, "");
        assert_eq!(result.intensity_matrix.len(), 10);
        assert!(result.intensity_matrix.iter().all(|row| row.len() == 20));
        assert!(result.intensity_matrix.iter().flatten().all(|&v| v == 0.0));
        assert_eq!(result.statistics.active_cells, 0);
        assert_eq!(result.statistics.total_cells, 200);
    }

    #[test]
    fn renders_and_encodes_detections() {
        let detections = vec![at(125.0, 125.0, "Nike"), at(130.0, 120.0, "Nike"), at(375.0, 75.0, "Nike")];
        let outcome = generate_heatmap(&detections, dims(500, 250), &HeatmapOptions::default(), &ColorRamp::default());
        assert!(!outcome.is_degraded(), "{:?}", outcome.diagnostics);
        let result = outcome.value;
        assert!(result.heatmap_image.starts_with("data:image/png;base64,"));
        assert_eq!(result.image.dimensions(), (500, 250));
        assert_eq!(result.grid_dimensions, dims(10, 5));
        assert_eq!(result.intensity_matrix[2][2], 1.0);
        assert_eq!(result.intensity_matrix[1][7], 0.5);
        assert_eq!(result.statistics.max_intensity, 2.0);
        assert_eq!(result.statistics.active_cells, 2);
    }

    #[test]
    fn filter_with_no_matches_is_empty() {
        let options = HeatmapOptions {
            brand_filter: Some("Adidas".to_string()),
            ..HeatmapOptions::default()
        };
        let outcome = generate_heatmap(&[at(10.0, 10.0, "Nike")], dims(100, 100), &options, &ColorRamp::default());
        assert_eq!(outcome.value.heatmap_image, "");
        assert_eq!(outcome.value.statistics.total_detections, 0);
        assert_eq!(outcome.value.brand_filter, None);
    }

    #[test]
    fn zero_grid_size_degrades() {
        let options = HeatmapOptions { grid_size: 0, ..HeatmapOptions::default() };
        let outcome = generate_heatmap(&[at(10.0, 10.0, "Nike")], dims(100, 100), &options, &ColorRamp::default());
        assert_eq!(outcome.diagnostics, vec![AnalyticsError::InvalidGridSize(0)]);
        assert!(outcome.value.intensity_matrix.is_empty());
        assert_eq!(outcome.value.heatmap_image, "");
    }

    #[test]
    fn non_finite_bbox_degrades_to_zero_grid() {
        let bad = Detection::new([f64::NAN, 0.0, 1.0, 1.0], 0.5, "Nike", 0);
        let outcome = generate_heatmap(&[bad], dims(100, 100), &HeatmapOptions::default(), &ColorRamp::default());
        assert!(outcome.is_degraded());
        assert_eq!(outcome.value.intensity_matrix, vec![vec![0.0, 0.0], vec![0.0, 0.0]]);
    }

    #[test]
    fn render_fault_keeps_grid_and_ships_fallback_image() {
        let options = HeatmapOptions { grid_size: 1, ..HeatmapOptions::default() };
        let outcome = generate_heatmap(&[at(5.0, 5.0, "Nike")], dims(20, 20), &options, &ColorRamp::default());
        assert_eq!(outcome.diagnostics, vec![AnalyticsError::DegenerateCell(1)]);
        assert_eq!(outcome.value.image.dimensions(), (100, 100));
        assert!(outcome.value.heatmap_image.starts_with("data:image/png;base64,"));
        assert_eq!(outcome.value.statistics.active_cells, 1);
    }

    #[test]
    fn rendering_is_deterministic() {
        let detections = vec![at(60.0, 60.0, "Nike"), at(240.0, 160.0, "Nike")];
        let run = || generate_heatmap(&detections, dims(300, 200), &HeatmapOptions::default(), &ColorRamp::default()).value;
        let (a, b) = (run(), run());
        assert_eq!(a.intensity_matrix, b.intensity_matrix);
        assert_eq!(a.statistics, b.statistics);
        assert_eq!(a.image, b.image);
    }
}
