// THEORY:
// The temporal binner answers "when" rather than "where". It slices the video's
// running time into equal windows and drops each detection into the window
// containing its start time.
//
// Windows are half-open, `[start, end)`, including the last one, so a detection
// starting exactly at the end of the video belongs to no window. Such
// detections are counted in `unbinned_detections` so callers can see them.
// When the duration is zero or negative, the windows fall back to a width of
// one second.

use crate::core_modules::detection::Detection;
use crate::error::{AnalyticsError, Result};
use serde::Serialize;

pub const DEFAULT_TIME_BINS: usize = 20;
/// Upper bound on the number of windows in one request.
pub const MAX_TIME_BINS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalBin {
    pub time_start: f64,
    pub time_end: f64,
    pub detection_count: usize,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TemporalStatistics {
    /// Detections that landed in some window.
    pub total_detections: usize,
    pub max_detections_per_bin: usize,
    pub average_detections_per_bin: f64,
    /// Detections whose start time is outside every window.
    pub unbinned_detections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalResult {
    pub temporal_data: Vec<TemporalBin>,
    pub time_bins: usize,
    /// Width of each window in seconds.
    pub time_interval: f64,
    pub video_duration: f64,
    pub statistics: TemporalStatistics,
}

impl TemporalResult {
    /// `time_bins` empty windows over the duration.
    pub fn empty(video_duration: f64, time_bins: usize) -> Self {
        let time_interval = window_width(video_duration, time_bins);
        Self {
            temporal_data: window_bounds(time_interval, time_bins)
                .map(|(time_start, time_end)| TemporalBin {
                    time_start,
                    time_end,
                    detection_count: 0,
                    detections: Vec::new(),
                })
                .collect(),
            time_bins,
            time_interval,
            video_duration,
            statistics: TemporalStatistics::default(),
        }
    }
}

/// Rejects window counts above `MAX_TIME_BINS`.
pub(crate) fn check_window_count(count: usize, what: &str) -> Result<()> {
    if count > MAX_TIME_BINS {
        return Err(AnalyticsError::Config(format!(
            "{what} must be at most {MAX_TIME_BINS}, got {count}"
        )));
    }
    Ok(())
}

/// `duration / count`, or 1 s when either is not positive.
pub(crate) fn window_width(video_duration: f64, count: usize) -> f64 {
    if video_duration > 0.0 && count > 0 {
        video_duration / count as f64
    } else {
        1.0
    }
}

/// `(start, end)` of each of `count` consecutive windows.
pub(crate) fn window_bounds(width: f64, count: usize) -> impl Iterator<Item = (f64, f64)> {
    (0..count).map(move |i| (i as f64 * width, (i + 1) as f64 * width))
}

/// Partitions detections into `time_bins` fixed-width windows by `t_start`.
pub fn bin_detections(detections: &[Detection], video_duration: f64, time_bins: usize) -> Result<TemporalResult> {
    if !video_duration.is_finite() {
        return Err(AnalyticsError::Config(format!(
            "video duration must be finite, got {video_duration}"
        )));
    }
    check_window_count(time_bins, "time_bins")?;

    let mut result = TemporalResult::empty(video_duration, time_bins);
    if detections.is_empty() || video_duration <= 0.0 || time_bins == 0 {
        result.statistics.unbinned_detections = detections.len();
        if !detections.is_empty() {
            log::warn!(
                "{} detections not binned: duration {video_duration}s, {time_bins} bins",
                detections.len()
            );
        }
        return Ok(result);
    }

    for bin in &mut result.temporal_data {
        let (start, end) = (bin.time_start, bin.time_end);
        bin.detections = detections
            .iter()
            .filter(|d| start <= d.t_start && d.t_start < end)
            .cloned()
            .collect();
        bin.detection_count = bin.detections.len();
    }

    let total: usize = result.temporal_data.iter().map(|b| b.detection_count).sum();
    let max = result.temporal_data.iter().map(|b| b.detection_count).max().unwrap_or(0);
    result.statistics = TemporalStatistics {
        total_detections: total,
        max_detections_per_bin: max,
        average_detections_per_bin: total as f64 / time_bins as f64,
        unbinned_detections: detections.len() - total,
    };
    if result.statistics.unbinned_detections > 0 {
        log::warn!(
            "{} detections start outside [0, {video_duration}) and were not binned",
            result.statistics.unbinned_detections
        );
    }
    Ok(result)
}
