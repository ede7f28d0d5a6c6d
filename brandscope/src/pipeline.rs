// THEORY:
// The `pipeline` module is the top-level API for the analytics engine. It wraps
// the component modules behind a single configured `AnalyticsPipeline` whose
// methods are the entry points an orchestration layer calls.
//
// Every entry point is non-fatal. Component faults are logged here and turned
// into a default payload of the expected shape, with the fault kept in the
// returned `Outcome`. The pipeline holds only immutable configuration, so one
// instance can serve any number of independent calls.

use crate::config::AnalyticsConfig;
use crate::core_modules::brand_distribution::compose_distribution;
use crate::core_modules::brand_statistics::{calculate_brand_statistics, compose_prediction_record};
use crate::core_modules::color_ramp::color_ramp::ColorRamp;
use crate::core_modules::image_helper::image_helper;
use crate::core_modules::spatial_heatmap::generate_heatmap;
use crate::core_modules::temporal_binner::{MAX_TIME_BINS, bin_detections};
use crate::core_modules::video_summary::summarize_video;
use crate::error::{AnalyticsError, Outcome, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

// Re-export key data structures for the public API.
pub use crate::core_modules::brand_distribution::{BrandDistributionEntry, BrandDistributionResult};
pub use crate::core_modules::brand_statistics::{BrandStatistics, BrandStatisticsMap, PredictionRecord};
pub use crate::core_modules::detection::{Detection, Dimensions, VideoMeta};
pub use crate::core_modules::heatmap_renderer::{Background, RenderOptions, overlay_onto};
pub use crate::core_modules::spatial_heatmap::{HeatmapOptions, HeatmapResult};
pub use crate::core_modules::temporal_binner::{TemporalBin, TemporalResult};
pub use crate::core_modules::video_summary::VideoSummary;

/// Everything the engine derives from one video, in one serializable package.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub file_id: i64,
    pub video: VideoMeta,
    pub statistics: BrandStatisticsMap,
    /// Prediction records keyed by brand name.
    pub predictions: BTreeMap<String, PredictionRecord>,
    pub heatmap: HeatmapResult,
    pub temporal: TemporalResult,
    pub brand_distribution: BrandDistributionResult,
    pub summary: VideoSummary,
    /// Human-readable faults that forced a default somewhere in the report.
    pub diagnostics: Vec<String>,
}

/// The main, top-level struct of the analytics engine.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsPipeline {
    config: AnalyticsConfig,
    ramp: ColorRamp,
}

fn degrade<T>(what: &str, default: T, err: AnalyticsError) -> Outcome<T> {
    log::error!("error {what}: {err}");
    Outcome::degraded(default, err)
}

impl AnalyticsPipeline {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            ramp: ColorRamp::default(),
        }
    }

    pub fn with_ramp(mut self, ramp: ColorRamp) -> Self {
        self.ramp = ramp;
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn ramp(&self) -> &ColorRamp {
        &self.ramp
    }

    /// Per-brand occupancy statistics. Degrades to an empty map.
    pub fn compute_brand_statistics(
        &self,
        detections: &[Detection],
        duration_seconds: f64,
        fps: f64,
    ) -> Outcome<BrandStatisticsMap> {
        match calculate_brand_statistics(detections, duration_seconds, fps) {
            Ok(stats) => Outcome::clean(stats),
            Err(err) => degrade("calculating statistics", BrandStatisticsMap::new(), err),
        }
    }

    /// Flattens one brand's loose statistics into a persistence record.
    /// Degrades to `None`.
    pub fn build_prediction_record(
        &self,
        stats: &serde_json::Value,
        brand_id: i64,
        file_id: i64,
    ) -> Outcome<Option<PredictionRecord>> {
        match compose_prediction_record(stats, brand_id, file_id) {
            Ok(record) => Outcome::clean(Some(record)),
            Err(err) => degrade("preparing prediction data", None, err),
        }
    }

    /// Spatial heatmap using the configured grid, background and smoothing.
    pub fn render_heatmap(
        &self,
        detections: &[Detection],
        video: &VideoMeta,
        brand_filter: Option<&str>,
    ) -> Outcome<HeatmapResult> {
        let options = self.config.heatmap_options(brand_filter.map(str::to_string));
        self.render_heatmap_with(detections, video, &options)
    }

    /// Spatial heatmap with per-call options.
    pub fn render_heatmap_with(
        &self,
        detections: &[Detection],
        video: &VideoMeta,
        options: &HeatmapOptions,
    ) -> Outcome<HeatmapResult> {
        generate_heatmap(detections, video.dimensions(), options, &self.ramp)
    }

    /// Detection counts over the configured number of time windows.
    pub fn render_temporal_bins(&self, detections: &[Detection], video: &VideoMeta) -> Outcome<TemporalResult> {
        self.render_temporal_bins_with(detections, video, self.config.time_bins)
    }

    /// Detection counts over `time_bins` windows. Degrades to empty windows.
    pub fn render_temporal_bins_with(
        &self,
        detections: &[Detection],
        video: &VideoMeta,
        time_bins: usize,
    ) -> Outcome<TemporalResult> {
        match bin_detections(detections, video.duration_seconds, time_bins) {
            Ok(result) => Outcome::clean(result),
            Err(err) => {
                // An out-of-range count falls back to no windows at all.
                let bins = if time_bins <= MAX_TIME_BINS { time_bins } else { 0 };
                degrade(
                    "generating temporal heatmap",
                    TemporalResult::empty(video.duration_seconds, bins),
                    err,
                )
            }
        }
    }

    /// One heatmap per brand, rendered sequentially.
    pub fn render_brand_distribution(
        &self,
        detections: &[Detection],
        video: &VideoMeta,
    ) -> Outcome<BrandDistributionResult> {
        compose_distribution(
            detections,
            video.dimensions(),
            self.config.distribution_grid_size,
            &self.ramp,
        )
    }

    /// Whole-video headline figures. Degrades to a zeroed summary.
    pub fn summarize_video(
        &self,
        detections: &[Detection],
        records: &BTreeMap<String, PredictionRecord>,
        duration_seconds: f64,
    ) -> Outcome<VideoSummary> {
        match summarize_video(detections, records, duration_seconds, self.config.summary_intervals) {
            Ok(summary) => Outcome::clean(summary),
            Err(err) => degrade("summarizing video", VideoSummary::empty(duration_seconds), err),
        }
    }

    /// Writes a rendered heatmap to `path` as PNG.
    pub fn save_heatmap(&self, heatmap: &HeatmapResult, path: &Path) -> Result<()> {
        if heatmap.image.width() == 0 || heatmap.image.height() == 0 {
            return Err(AnalyticsError::Encoding("heatmap has no image to save".to_string()));
        }
        image_helper::save(path, &heatmap.image)
    }

    /// Prediction records for every brand. Brand ids are assigned by `brand_id`.
    pub fn prediction_records(
        &self,
        statistics: &BrandStatisticsMap,
        file_id: i64,
        mut brand_id: impl FnMut(&str) -> i64,
    ) -> BTreeMap<String, PredictionRecord> {
        statistics
            .iter()
            .map(|(brand, stats)| (brand.clone(), stats.prediction_record(brand_id(brand), file_id)))
            .collect()
    }

    /// Runs every analysis over one video.
    pub fn generate_report(
        &self,
        detections: &[Detection],
        video: &VideoMeta,
        file_id: i64,
        brand_filter: Option<&str>,
    ) -> AnalysisReport {
        let distribution = self.render_brand_distribution(detections, video);
        self.assemble_report(detections, video, file_id, brand_filter, distribution)
    }

    /// Builds a report around an already-computed brand distribution.
    pub(crate) fn assemble_report(
        &self,
        detections: &[Detection],
        video: &VideoMeta,
        file_id: i64,
        brand_filter: Option<&str>,
        distribution: Outcome<BrandDistributionResult>,
    ) -> AnalysisReport {
        let mut diagnostics = Vec::new();
        let mut collect = |faults: Vec<AnalyticsError>| diagnostics.extend(faults.iter().map(ToString::to_string));

        let statistics = self.compute_brand_statistics(detections, video.duration_seconds, video.fps);
        collect(statistics.diagnostics);
        let statistics = statistics.value;

        let brand_ids: BTreeMap<&str, i64> = statistics
            .keys()
            .enumerate()
            .map(|(i, brand)| (brand.as_str(), i as i64 + 1))
            .collect();
        let predictions = self.prediction_records(&statistics, file_id, |brand| brand_ids.get(brand).copied().unwrap_or_default());

        let heatmap = self.render_heatmap(detections, video, brand_filter);
        collect(heatmap.diagnostics);
        let temporal = self.render_temporal_bins(detections, video);
        collect(temporal.diagnostics);
        collect(distribution.diagnostics);
        let summary = self.summarize_video(detections, &predictions, video.duration_seconds);
        collect(summary.diagnostics);

        AnalysisReport {
            file_id,
            video: *video,
            statistics,
            predictions,
            heatmap: heatmap.value,
            temporal: temporal.value,
            brand_distribution: distribution.value,
            summary: summary.value,
            diagnostics,
        }
    }
}
