// THEORY:
// Every public entry point of the analytics engine is "non-fatal": a fault on a
// given input degrades to a well-formed default payload of the shape the caller
// expects. Internally, components still speak `Result` and propagate with `?`;
// the conversion into a default happens exactly once, at the entry point, where
// the fault is logged and recorded inside an `Outcome`. This keeps the failure
// path assertable in tests without scraping logs.

use thiserror::Error;

/// Faults raised by the analytics components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    #[error("grid size must be positive, got {0}")]
    InvalidGridSize(u32),

    #[error("heatmap cells of {0}px are too small to paint a falloff")]
    DegenerateCell(u32),

    #[error("detection {index} has a non-finite {field}")]
    NonFiniteValue { index: usize, field: &'static str },

    #[error("heatmap image of {width}x{height} exceeds the {limit} pixel limit")]
    ImageTooLarge { width: u64, height: u64, limit: u64 },

    #[error("image encoding failed: {0}")]
    Encoding(String),

    #[error("malformed brand statistics: {0}")]
    MalformedStats(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AnalyticsError {
    fn from(err: std::io::Error) -> Self {
        AnalyticsError::Io(err.to_string())
    }
}

impl From<image::ImageError> for AnalyticsError {
    fn from(err: image::ImageError) -> Self {
        AnalyticsError::Encoding(err.to_string())
    }
}

/// Result type alias for analytics operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// The payload of an entry point together with any faults that forced it to
/// fall back to a default.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub diagnostics: Vec<AnalyticsError>,
}

impl<T> Outcome<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            diagnostics: Vec::new(),
        }
    }

    pub fn degraded(value: T, fault: AnalyticsError) -> Self {
        Self {
            value,
            diagnostics: vec![fault],
        }
    }

    /// Records an additional fault without replacing the payload.
    pub fn push(&mut self, fault: AnalyticsError) {
        self.diagnostics.push(fault);
    }

    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            diagnostics: self.diagnostics,
        }
    }
}
