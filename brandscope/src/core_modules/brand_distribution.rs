// THEORY:
// The brand distribution composer answers "where on screen does each brand
// appear". It partitions the detections by brand and runs the full spatial
// heatmap pass once per brand on a coarser grid. Each brand is normalized against
// its own busiest cell, so two brands' heatmaps show layout, not relative volume.
//
// Cost is one full render per brand, which is fine for dashboard-sized inputs.
// Callers that need throughput can fan the per-brand passes out across threads
// (see `parallel_pipeline`); grouping, per-brand composition and assembly are
// separate functions here so both paths share them.

use crate::core_modules::color_ramp::color_ramp::ColorRamp;
use crate::core_modules::detection::{Detection, Dimensions};
use crate::core_modules::heatmap_renderer::RenderOptions;
use crate::core_modules::spatial_heatmap::{HeatmapOptions, HeatmapResult, generate_heatmap};
use crate::error::{AnalyticsError, Outcome, Result};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DISTRIBUTION_GRID_SIZE: u32 = 30;

/// One brand's share of the distribution.
#[derive(Debug, Clone, Serialize)]
pub struct BrandDistributionEntry {
    pub detection_count: usize,
    pub heatmap_data: HeatmapResult,
    /// Mean detector score, unrounded.
    pub average_confidence: f64,
    /// Raw bounding boxes, in input order.
    pub positions: Vec<[f64; 4]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrandDistributionResult {
    pub brand_data: BTreeMap<String, BrandDistributionEntry>,
    pub total_brands: usize,
    pub total_detections: usize,
    pub video_dimensions: Dimensions,
}

impl BrandDistributionResult {
    pub fn empty() -> Self {
        Self {
            brand_data: BTreeMap::new(),
            total_brands: 0,
            total_detections: 0,
            video_dimensions: Dimensions::default(),
        }
    }
}

/// Splits detections by brand. Blank brand names are grouped as `Unknown`.
pub fn group_by_brand(detections: &[Detection]) -> BTreeMap<String, Vec<Detection>> {
    let mut groups: BTreeMap<String, Vec<Detection>> = BTreeMap::new();
    for detection in detections {
        groups
            .entry(detection.brand_key().to_string())
            .or_default()
            .push(detection.clone());
    }
    groups
}

/// Rejects inputs the composer cannot summarize.
pub fn check_scores(detections: &[Detection]) -> Result<()> {
    detections
        .iter()
        .enumerate()
        .try_for_each(|(index, d)| d.check_score(index))
}

/// Heatmap options used for every brand pass.
pub fn brand_heatmap_options(grid_size: u32) -> HeatmapOptions {
    HeatmapOptions {
        grid_size,
        brand_filter: None,
        render: RenderOptions::default(),
    }
}

/// Runs the heatmap pass for a single brand's detections.
pub fn compose_entry(
    brand_detections: &[Detection],
    video: Dimensions,
    options: &HeatmapOptions,
    ramp: &ColorRamp,
) -> Outcome<BrandDistributionEntry> {
    let detection_count = brand_detections.len();
    let average_confidence = if detection_count > 0 {
        brand_detections.iter().map(|d| d.score).sum::<f64>() / detection_count as f64
    } else {
        0.0
    };
    let positions = brand_detections.iter().map(|d| d.bbox).collect();

    generate_heatmap(brand_detections, video, options, ramp).map(|heatmap_data| BrandDistributionEntry {
        detection_count,
        heatmap_data,
        average_confidence,
        positions,
    })
}

/// Collects per-brand outcomes into the final result, carrying their
/// diagnostics over.
pub fn assemble(
    entries: impl IntoIterator<Item = (String, Outcome<BrandDistributionEntry>)>,
    total_detections: usize,
    video: Dimensions,
) -> Outcome<BrandDistributionResult> {
    let mut brand_data = BTreeMap::new();
    let mut diagnostics: Vec<AnalyticsError> = Vec::new();
    for (brand, outcome) in entries {
        diagnostics.extend(outcome.diagnostics);
        brand_data.insert(brand, outcome.value);
    }
    Outcome {
        value: BrandDistributionResult {
            total_brands: brand_data.len(),
            brand_data,
            total_detections,
            video_dimensions: video,
        },
        diagnostics,
    }
}

/// Builds the per-brand heatmaps sequentially.
pub fn compose_distribution(
    detections: &[Detection],
    video: Dimensions,
    grid_size: u32,
    ramp: &ColorRamp,
) -> Outcome<BrandDistributionResult> {
    if detections.is_empty() {
        return Outcome::clean(BrandDistributionResult::empty());
    }
    if let Err(err) = check_scores(detections) {
        log::error!("error generating brand distribution heatmap: {err}");
        return Outcome::degraded(BrandDistributionResult::empty(), err);
    }

    let options = brand_heatmap_options(grid_size);
    let entries = group_by_brand(detections).into_iter().map(|(brand, group)| {
        let entry = compose_entry(&group, video, &options, ramp);
        (brand, entry)
    });
    assemble(entries, detections.len(), video)
}
