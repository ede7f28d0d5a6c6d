// THEORY:
// The video summary is the dashboard headline: one record describing the whole
// video rather than one brand. It combines the raw detections (volume, distinct
// brands, mean confidence, when they occur) with the per-brand prediction records
// (occupied time), and expresses both as rates over the video's duration.

use crate::core_modules::brand_statistics::{PredictionRecord, round_to};
use crate::core_modules::detection::Detection;
use crate::core_modules::temporal_binner::{check_window_count, window_bounds, window_width};
use crate::error::{AnalyticsError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_SUMMARY_INTERVALS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStatistics {
    pub total_duration_seconds: f64,
    pub total_detections: usize,
    pub unique_brands: usize,
    pub average_confidence: f64,
    /// Sum of every brand's occupied seconds. Brands can overlap, so this may
    /// exceed the duration.
    pub total_detection_time: f64,
    /// Detections per second of video.
    pub detection_density: f64,
    /// `total_detection_time` as a percentage of the duration.
    pub detection_coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrandShare {
    pub detections: u64,
    pub total_time: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalCount {
    /// `"{start:.1}-{end:.1}s"`
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoSummary {
    pub video_statistics: VideoStatistics,
    pub brand_distribution: BTreeMap<String, BrandShare>,
    pub temporal_distribution: Vec<IntervalCount>,
}

impl VideoSummary {
    /// A zeroed summary with no windows.
    pub fn empty(video_duration: f64) -> Self {
        Self {
            video_statistics: VideoStatistics {
                total_duration_seconds: video_duration,
                total_detections: 0,
                unique_brands: 0,
                average_confidence: 0.0,
                total_detection_time: 0.0,
                detection_density: 0.0,
                detection_coverage: 0.0,
            },
            brand_distribution: BTreeMap::new(),
            temporal_distribution: Vec::new(),
        }
    }
}

/// Summarizes a whole video from its detections and the per-brand records.
pub fn summarize_video(
    detections: &[Detection],
    records: &BTreeMap<String, PredictionRecord>,
    video_duration: f64,
    intervals: usize,
) -> Result<VideoSummary> {
    if !video_duration.is_finite() {
        return Err(AnalyticsError::Config(format!(
            "video duration must be finite, got {video_duration}"
        )));
    }
    check_window_count(intervals, "summary intervals")?;
    for (index, detection) in detections.iter().enumerate() {
        detection.check_score(index)?;
    }

    let total_detections = detections.len();
    let unique_brands = detections.iter().map(Detection::brand_key).collect::<BTreeSet<_>>().len();
    let average_confidence = if total_detections > 0 {
        detections.iter().map(|d| d.score).sum::<f64>() / total_detections as f64
    } else {
        0.0
    };
    let total_detection_time: f64 = records.values().map(|r| r.duration_seconds).sum();
    let (detection_density, detection_coverage) = if video_duration > 0.0 {
        (
            total_detections as f64 / video_duration,
            total_detection_time / video_duration * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    let brand_distribution = records
        .iter()
        .map(|(brand, record)| {
            let share = BrandShare {
                detections: record.total_detections,
                total_time: record.duration_seconds,
                avg_confidence: record.avg_score,
            };
            (brand.clone(), share)
        })
        .collect();

    let width = window_width(video_duration, intervals);
    let temporal_distribution = window_bounds(width, intervals)
        .map(|(start, end)| IntervalCount {
            label: format!("{start:.1}-{end:.1}s"),
            count: detections.iter().filter(|d| d.t_start >= start && d.t_start < end).count(),
        })
        .collect();

    Ok(VideoSummary {
        video_statistics: VideoStatistics {
            total_duration_seconds: video_duration,
            total_detections,
            unique_brands,
            average_confidence: round_to(average_confidence, 3),
            total_detection_time: round_to(total_detection_time, 2),
            detection_density: round_to(detection_density, 2),
            detection_coverage: round_to(detection_coverage, 2),
        },
        brand_distribution,
        temporal_distribution,
    })
}
