// THEORY:
// The `detection` module holds the "dumb" data containers that flow into the
// analytics engine from upstream collaborators: the detector supplies one
// `Detection` per bounding box per frame, and the video decoder supplies a single
// `VideoMeta` per processing run. Neither type knows how to aggregate itself;
// that is the job of the higher-level modules. They are immutable inputs and are
// only ever borrowed.

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};

/// Brand name used when a detection carries no label.
pub const UNKNOWN_BRAND: &str = "Unknown";

/// A single bounding-box observation of a brand in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in source pixel coordinates.
    pub bbox: [f64; 4],
    /// Detector confidence in `[0, 1]`.
    #[serde(alias = "confidence")]
    pub score: f64,
    /// Brand label. The detector calls this `class_name`.
    #[serde(default, alias = "class_name")]
    pub brand_name: String,
    #[serde(default, alias = "frame")]
    pub frame_number: u64,
    /// Presentation time of the frame, in seconds.
    #[serde(default)]
    pub t_start: f64,
    #[serde(default)]
    pub t_end: f64,
}

impl Detection {
    pub fn new(bbox: [f64; 4], score: f64, brand_name: impl Into<String>, frame_number: u64) -> Self {
        Self {
            bbox,
            score,
            brand_name: brand_name.into(),
            frame_number,
            t_start: 0.0,
            t_end: 0.0,
        }
    }

    /// Sets the frame's time span.
    pub fn at(mut self, t_start: f64, t_end: f64) -> Self {
        self.t_start = t_start;
        self.t_end = t_end;
        self
    }

    /// Center of the bounding box.
    pub fn center(&self) -> (f64, f64) {
        let [x1, y1, x2, y2] = self.bbox;
        ((x1 + x2) / 2.0, (y1 + y2) / 2.0)
    }

    /// The label used for grouping, with blank names folded into `Unknown`.
    pub fn brand_key(&self) -> &str {
        if self.brand_name.trim().is_empty() {
            UNKNOWN_BRAND
        } else {
            &self.brand_name
        }
    }

    /// Case-insensitive exact match on the brand name.
    pub fn matches_brand(&self, brand: &str) -> bool {
        self.brand_name.to_lowercase() == brand.to_lowercase()
    }

    /// Rejects NaN and infinite coordinates. `index` is the detection's position
    /// in its list, reported back in the error.
    pub fn check_bbox(&self, index: usize) -> Result<()> {
        if self.bbox.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(AnalyticsError::NonFiniteValue { index, field: "bbox" })
        }
    }

    pub fn check_score(&self, index: usize) -> Result<()> {
        if self.score.is_finite() {
            Ok(())
        } else {
            Err(AnalyticsError::NonFiniteValue { index, field: "score" })
        }
    }
}

/// Properties of the analysed video, supplied once per run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
    pub fps: f64,
}

impl VideoMeta {
    pub fn new(width: u32, height: u32, duration_seconds: f64, fps: f64) -> Self {
        Self {
            width,
            height,
            duration_seconds,
            fps,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }
}

/// A width/height pair, in pixels or in grid cells depending on context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}
