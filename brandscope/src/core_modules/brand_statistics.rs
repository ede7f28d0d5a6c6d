// THEORY:
// The `brand_statistics` module is the occupancy layer of the engine. It reduces a
// flat list of detections into one summary per brand: how often the brand was
// seen, in how many distinct frames, how confident the detector was, and what
// share of the video's running time the brand occupied.
//
// Key principles:
// 1.  **Keyed accumulation**: brands are discovered while scanning; there is no
//     closed set of labels. Each brand gets its own accumulator the first time
//     it is seen.
// 2.  **Frame-deduplicated coverage**: several detections of one brand in the same
//     frame count once toward coverage. Coverage time is the number of distinct
//     frames multiplied by the frame duration (`1 / fps`, or 1 s when fps is
//     unknown).
// 3.  **Stable output names**: each summary carries both the current field names
//     (`avg_score`, `max_score`, `min_score`) and the legacy names
//     (`average_confidence`, `max_confidence`, `min_confidence`) with identical
//     values, because downstream consumers read either.
// 4.  **Persistence shaping**: a summary can be flattened into a
//     `PredictionRecord`, tolerating loosely-typed input where fields are
//     missing or null.

use crate::core_modules::detection::Detection;
use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-brand summaries keyed by brand name.
pub type BrandStatisticsMap = BTreeMap<String, BrandStatistics>;

/// Running totals for one brand while scanning the detection list.
#[derive(Debug, Clone)]
struct BrandAccumulator {
    total_detections: usize,
    frames_with_detection: BTreeSet<u64>,
    total_confidence: f64,
    max_confidence: f64,
    min_confidence: f64,
}

impl Default for BrandAccumulator {
    fn default() -> Self {
        // Scores live in [0, 1], so these seeds are always overtaken.
        Self {
            total_detections: 0,
            frames_with_detection: BTreeSet::new(),
            total_confidence: 0.0,
            max_confidence: 0.0,
            min_confidence: 1.0,
        }
    }
}

impl BrandAccumulator {
    fn add(&mut self, detection: &Detection) {
        self.total_detections += 1;
        self.frames_with_detection.insert(detection.frame_number);
        self.total_confidence += detection.score;
        self.max_confidence = self.max_confidence.max(detection.score);
        self.min_confidence = self.min_confidence.min(detection.score);
    }

    fn finish(&self, frame_duration: f64, video_duration: f64) -> BrandStatistics {
        let frames_count = self.frames_with_detection.len();
        let total_seconds = (frames_count as f64 * frame_duration).max(0.0);
        let percentage = if video_duration > 0.0 {
            total_seconds / video_duration * 100.0
        } else {
            0.0
        };
        let average = if self.total_detections > 0 {
            round_to(self.total_confidence / self.total_detections as f64, 3)
        } else {
            0.0
        };
        let max = round_to(self.max_confidence, 3);
        let min = round_to(self.min_confidence, 3);

        BrandStatistics {
            total_detections: self.total_detections,
            frames_with_detection: frames_count,
            total_seconds: round_to(total_seconds, 2),
            percentage: round_to(percentage, 2),
            avg_score: average,
            max_score: max,
            min_score: min,
            average_confidence: average,
            max_confidence: max,
            min_confidence: min,
        }
    }
}

/// Occupancy summary for a single brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandStatistics {
    pub total_detections: usize,
    /// Number of distinct frames containing the brand.
    pub frames_with_detection: usize,
    /// Coverage time in seconds, 2 decimals.
    pub total_seconds: f64,
    /// Coverage as a share of the video duration, 2 decimals. Not clamped to 100.
    pub percentage: f64,
    pub avg_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub average_confidence: f64,
    pub max_confidence: f64,
    pub min_confidence: f64,
}

impl BrandStatistics {
    /// Flattens this summary into a persistence record.
    pub fn prediction_record(&self, brand_id: i64, file_id: i64) -> PredictionRecord {
        PredictionRecord::compose(&StatisticsFields::from(self), brand_id, file_id)
    }
}

/// Rounds to `decimals` places using the exact binary value, with exact ties
/// going to the even digit (`0.125` becomes `0.12`, `0.375` becomes `0.38`).
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let places = decimals.max(0) as usize;
    format!("{value:.places$}").parse().unwrap_or(value)
}

/// Builds the per-brand summaries for one video.
///
/// An fps of zero or less is treated as one frame per second.
pub fn calculate_brand_statistics(
    detections: &[Detection],
    video_duration: f64,
    video_fps: f64,
) -> Result<BrandStatisticsMap> {
    let mut accumulators: BTreeMap<String, BrandAccumulator> = BTreeMap::new();

    for (index, detection) in detections.iter().enumerate() {
        detection.check_score(index)?;
        accumulators
            .entry(detection.brand_key().to_string())
            .or_default()
            .add(detection);
    }

    let frame_duration = if video_fps > 0.0 { 1.0 / video_fps } else { 1.0 };

    let stats: BrandStatisticsMap = accumulators
        .into_iter()
        .map(|(brand, acc)| (brand, acc.finish(frame_duration, video_duration)))
        .collect();

    for (brand, s) in &stats {
        if s.percentage > 100.0 {
            log::warn!(
                "coverage for {brand} is {}% of a {video_duration}s video; duration and fps disagree",
                s.percentage
            );
        }
    }

    Ok(stats)
}

/// Loosely-typed view of a brand summary, as external callers may send it.
/// Every field may be absent or null.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatisticsFields {
    pub total_detections: Option<u64>,
    pub avg_score: Option<f64>,
    pub max_score: Option<f64>,
    pub min_score: Option<f64>,
    pub total_seconds: Option<f64>,
    pub percentage: Option<f64>,
}

impl From<&BrandStatistics> for StatisticsFields {
    fn from(stats: &BrandStatistics) -> Self {
        Self {
            total_detections: Some(stats.total_detections as u64),
            avg_score: Some(stats.avg_score),
            max_score: Some(stats.max_score),
            min_score: Some(stats.min_score),
            total_seconds: Some(stats.total_seconds),
            percentage: Some(stats.percentage),
        }
    }
}

impl StatisticsFields {
    /// Parses a JSON object. Anything other than an object, or a field of the
    /// wrong type, is malformed.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(AnalyticsError::MalformedStats(format!(
                "expected an object, got {value}"
            )));
        }
        Self::deserialize(value).map_err(|e| AnalyticsError::MalformedStats(e.to_string()))
    }
}

/// A flat record ready for storage by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub video_id: i64,
    pub brand_id: i64,
    pub total_detections: u64,
    pub avg_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub duration_seconds: f64,
    pub percentage: f64,
    /// Always 0; first-appearance time is not tracked.
    pub first_detection_time: f64,
    /// Mirrors `duration_seconds`.
    pub last_detection_time: f64,
}

impl PredictionRecord {
    pub fn compose(fields: &StatisticsFields, brand_id: i64, file_id: i64) -> Self {
        let duration_seconds = fields.total_seconds.unwrap_or(0.0);
        Self {
            video_id: file_id,
            brand_id,
            total_detections: fields.total_detections.unwrap_or(0),
            avg_score: fields.avg_score.unwrap_or(0.0),
            max_score: fields.max_score.unwrap_or(0.0),
            min_score: fields.min_score.unwrap_or(0.0),
            duration_seconds,
            percentage: fields.percentage.unwrap_or(0.0),
            first_detection_time: 0.0,
            last_detection_time: duration_seconds,
        }
    }
}

/// Parses loose statistics and flattens them into a record.
pub fn compose_prediction_record(
    stats: &serde_json::Value,
    brand_id: i64,
    file_id: i64,
) -> Result<PredictionRecord> {
    let fields = StatisticsFields::from_value(stats)?;
    let record = PredictionRecord::compose(&fields, brand_id, file_id);
    log::debug!("prepared prediction record: {record:?}");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn det(brand: &str, score: f64, frame: u64) -> Detection {
        Detection::new([0.0, 0.0, 10.0, 10.0], score, brand, frame)
    }

    #[test]
    fn exact_ties_round_to_even() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(0.0625, 3), 0.062);
        assert_eq!(round_to(2.5, 0), 2.0);
        // 2.675 is stored just below the tie
        assert_eq!(round_to(2.675, 2), 2.67);
        assert_eq!(round_to(0.8, 3), 0.8);
        assert_eq!(round_to(-0.125, 2), -0.12);
    }

    #[test]
    fn eighth_second_frames_round_ties_to_even() {
        let stats = calculate_brand_statistics(&[det("Nike", 0.0625, 0)], 10.0, 8.0).unwrap();
        let nike = &stats["Nike"];
        assert_eq!(nike.total_seconds, 0.12);
        assert_eq!(nike.percentage, 1.25);
        assert_eq!(nike.avg_score, 0.062);
        assert_eq!(nike.max_score, 0.062);
        assert_eq!(nike.min_score, 0.062);
        assert_eq!(nike.average_confidence, nike.avg_score);
    }

    #[test]
    fn duplicate_frames_count_once_toward_coverage() {
        let detections = vec![det("Nike", 0.9, 0), det("Nike", 0.8, 0), det("Nike", 0.7, 1)];
        let stats = calculate_brand_statistics(&detections, 10.0, 1.0).unwrap();
        let nike = &stats["Nike"];
        assert_eq!(nike.total_detections, 3);
        assert_eq!(nike.frames_with_detection, 2);
        assert_eq!(nike.total_seconds, 2.0);
        assert_eq!(nike.percentage, 20.0);
        assert_eq!(nike.avg_score, 0.8);
        assert_eq!(nike.max_score, 0.9);
        assert_eq!(nike.min_score, 0.7);
    }

    #[test]
    fn legacy_aliases_mirror_current_names() {
        let detections = vec![det("Puma", 0.6666, 2), det("Puma", 0.3333, 5)];
        let stats = calculate_brand_statistics(&detections, 30.0, 25.0).unwrap();
        let puma = &stats["Puma"];
        assert_eq!(puma.average_confidence, puma.avg_score);
        assert_eq!(puma.max_confidence, puma.max_score);
        assert_eq!(puma.min_confidence, puma.min_score);
        assert_eq!(puma.max_score, 0.667);
        assert_eq!(puma.min_score, 0.333);
    }

    #[test]
    fn counts_sum_to_input_length() {
        let detections = vec![
            det("Nike", 0.9, 0),
            det("Adidas", 0.5, 0),
            det("Nike", 0.4, 3),
            det("Pepsi", 0.7, 9),
            det("", 0.2, 9),
        ];
        let stats = calculate_brand_statistics(&detections, 12.0, 2.0).unwrap();
        let total: usize = stats.values().map(|s| s.total_detections).sum();
        assert_eq!(total, detections.len());
        assert!(stats.contains_key("Unknown"));
    }

    #[test]
    fn unknown_fps_uses_one_second_frames() {
        let detections = vec![det("Nike", 0.9, 0), det("Nike", 0.9, 4)];
        let stats = calculate_brand_statistics(&detections, 8.0, 0.0).unwrap();
        assert_eq!(stats["Nike"].total_seconds, 2.0);
        assert_eq!(stats["Nike"].percentage, 25.0);
    }

    #[test]
    fn zero_duration_reports_zero_percentage() {
        let stats = calculate_brand_statistics(&[det("Nike", 0.9, 0)], 0.0, 30.0).unwrap();
        assert_eq!(stats["Nike"].percentage, 0.0);
        assert_eq!(stats["Nike"].total_seconds, 0.03);
    }

    #[test]
    fn percentage_is_not_clamped() {
        let detections: Vec<_> = (0..5).map(|f| det("Nike", 0.9, f)).collect();
        let stats = calculate_brand_statistics(&detections, 2.0, 1.0).unwrap();
        assert_eq!(stats["Nike"].percentage, 250.0);
    }

    #[test]
    fn empty_input_is_empty_map() {
        let stats = calculate_brand_statistics(&[], 10.0, 30.0).unwrap();
        assert!(stats.is_empty());
    }

    #[test]
    fn non_finite_score_is_a_fault() {
        let detections = vec![det("Nike", 0.9, 0), det("Nike", f64::NAN, 1)];
        let err = calculate_brand_statistics(&detections, 10.0, 1.0).unwrap_err();
        assert_eq!(err, AnalyticsError::NonFiniteValue { index: 1, field: "score" });
    }

    #[test]
    fn record_defaults_missing_and_null_fields() {
        let record = compose_prediction_record(
            &json!({"total_detections": 4, "avg_score": 0.5, "total_seconds": null}),
            7,
            42,
        )
        .unwrap();
        assert_eq!(record.video_id, 42);
        assert_eq!(record.brand_id, 7);
        assert_eq!(record.total_detections, 4);
        assert_eq!(record.duration_seconds, 0.0);
        assert_eq!(record.percentage, 0.0);
        assert_eq!(record.first_detection_time, 0.0);
        assert_eq!(record.last_detection_time, 0.0);
        assert_eq!(record.max_score, 0.0);
    }

    #[test]
    fn record_last_time_mirrors_duration() {
        let detections = vec![det("Nike", 0.9, 0), det("Nike", 0.8, 1)];
        let stats = calculate_brand_statistics(&detections, 10.0, 1.0).unwrap();
        let record = stats["Nike"].prediction_record(1, 2);
        assert_eq!(record.duration_seconds, 2.0);
        assert_eq!(record.last_detection_time, 2.0);
        assert_eq!(record.percentage, 20.0);
    }

    #[test]
    fn malformed_stats_are_rejected() {
        assert!(compose_prediction_record(&json!([1, 2, 3]), 1, 1).is_err());
        assert!(compose_prediction_record(&json!({"total_detections": "many"}), 1, 1).is_err());
    }
}
