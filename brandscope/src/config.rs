// THEORY:
// Configuration is layered: built-in defaults, then an optional TOML file named by
// `BRANDSCOPE_CONFIG`, then individual `BRANDSCOPE_*` environment overrides. The
// merged result is validated once, so every component can trust its tunables.
// Validation also bounds the values that size allocations (window counts), so a
// bad setting surfaces as an error at load time rather than during a render.
//
// The variable lookup is injectable, which keeps the layering testable without
// touching the process environment.

use crate::core_modules::brand_distribution::DISTRIBUTION_GRID_SIZE;
use crate::core_modules::heatmap_renderer::{Background, DEFAULT_MAX_IMAGE_PIXELS, RenderOptions};
use crate::core_modules::spatial_heatmap::{DEFAULT_GRID_SIZE, HeatmapOptions};
use crate::core_modules::temporal_binner::{DEFAULT_TIME_BINS, MAX_TIME_BINS};
use crate::core_modules::video_summary::DEFAULT_SUMMARY_INTERVALS;
use crate::error::{AnalyticsError, Result};
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_PATH_ENV: &str = "BRANDSCOPE_CONFIG";
pub const GRID_SIZE_ENV: &str = "BRANDSCOPE_GRID_SIZE";
pub const BACKGROUND_ENV: &str = "BRANDSCOPE_BACKGROUND";
pub const SMOOTH_FACTOR_ENV: &str = "BRANDSCOPE_SMOOTH_FACTOR";
pub const TIME_BINS_ENV: &str = "BRANDSCOPE_TIME_BINS";

const DEFAULT_SMOOTH_FACTOR: f64 = 1.0;

#[derive(Debug, Deserialize, Default)]
struct AnalyticsConfigFile {
    heatmap: Option<HeatmapConfigFile>,
    temporal: Option<TemporalConfigFile>,
    distribution: Option<DistributionConfigFile>,
    summary: Option<SummaryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct HeatmapConfigFile {
    grid_size: Option<u32>,
    background: Option<Background>,
    smooth_factor: Option<f64>,
    max_image_pixels: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TemporalConfigFile {
    time_bins: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DistributionConfigFile {
    grid_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SummaryConfigFile {
    time_intervals: Option<usize>,
}

/// Tunables for every component of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    pub heatmap: HeatmapSettings,
    pub time_bins: usize,
    /// Grid size used for the per-brand distribution heatmaps.
    pub distribution_grid_size: u32,
    /// Number of labelled windows in the video summary.
    pub summary_intervals: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapSettings {
    pub grid_size: u32,
    pub background: Background,
    pub smooth_factor: f64,
    pub max_image_pixels: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self::from_file(AnalyticsConfigFile::default())
    }
}

impl AnalyticsConfig {
    /// Loads the file named by `BRANDSCOPE_CONFIG` (if set), then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// `load` with an explicit variable lookup.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file_cfg = match lookup(CONFIG_PATH_ENV) {
            Some(path) => read_config_file(Path::new(&path))?,
            None => AnalyticsConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads a TOML file with no environment overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: AnalyticsConfigFile =
            toml::from_str(raw).map_err(|e| AnalyticsError::Config(format!("invalid config: {e}")))?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnalyticsConfigFile) -> Self {
        let heatmap = file.heatmap.unwrap_or_default();
        Self {
            heatmap: HeatmapSettings {
                grid_size: heatmap.grid_size.unwrap_or(DEFAULT_GRID_SIZE),
                background: heatmap.background.unwrap_or_default(),
                smooth_factor: heatmap.smooth_factor.unwrap_or(DEFAULT_SMOOTH_FACTOR),
                max_image_pixels: heatmap.max_image_pixels.unwrap_or(DEFAULT_MAX_IMAGE_PIXELS),
            },
            time_bins: file
                .temporal
                .and_then(|temporal| temporal.time_bins)
                .unwrap_or(DEFAULT_TIME_BINS),
            distribution_grid_size: file
                .distribution
                .and_then(|distribution| distribution.grid_size)
                .unwrap_or(DISTRIBUTION_GRID_SIZE),
            summary_intervals: file
                .summary
                .and_then(|summary| summary.time_intervals)
                .unwrap_or(DEFAULT_SUMMARY_INTERVALS),
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(GRID_SIZE_ENV) {
            self.heatmap.grid_size = parse_env(GRID_SIZE_ENV, &value)?;
        }
        if let Some(value) = lookup(BACKGROUND_ENV) {
            self.heatmap.background = Background::parse_lossy(&value);
        }
        if let Some(value) = lookup(SMOOTH_FACTOR_ENV) {
            self.heatmap.smooth_factor = parse_env(SMOOTH_FACTOR_ENV, &value)?;
        }
        if let Some(value) = lookup(TIME_BINS_ENV) {
            self.time_bins = parse_env(TIME_BINS_ENV, &value)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.heatmap.grid_size == 0 {
            return Err(AnalyticsError::Config("heatmap.grid_size must be > 0".to_string()));
        }
        if self.distribution_grid_size == 0 {
            return Err(AnalyticsError::Config("distribution.grid_size must be > 0".to_string()));
        }
        if !self.heatmap.smooth_factor.is_finite() {
            return Err(AnalyticsError::Config("heatmap.smooth_factor must be finite".to_string()));
        }
        if self.time_bins == 0 || self.time_bins > MAX_TIME_BINS {
            return Err(AnalyticsError::Config(format!(
                "temporal.time_bins must be in 1..={MAX_TIME_BINS}, got {}",
                self.time_bins
            )));
        }
        if self.summary_intervals == 0 || self.summary_intervals > MAX_TIME_BINS {
            return Err(AnalyticsError::Config(format!(
                "summary.time_intervals must be in 1..={MAX_TIME_BINS}, got {}",
                self.summary_intervals
            )));
        }
        Ok(())
    }

    /// Heatmap options for one request, optionally narrowed to a brand.
    pub fn heatmap_options(&self, brand_filter: Option<String>) -> HeatmapOptions {
        HeatmapOptions {
            grid_size: self.heatmap.grid_size,
            brand_filter,
            render: RenderOptions {
                background: self.heatmap.background,
                smooth_factor: self.heatmap.smooth_factor,
                max_image_pixels: self.heatmap.max_image_pixels,
            },
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AnalyticsError::Config(format!("invalid {key}={value}: {e}")))
}

fn read_config_file(path: &Path) -> Result<AnalyticsConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AnalyticsError::Config(format!("read config {}: {e}", path.display())))?;
    toml::from_str(&raw).map_err(|e| AnalyticsError::Config(format!("invalid config {}: {e}", path.display())))
}
