//! Error types for the neural BTF pipeline.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::sync::FenceToken;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Tracing,
    Packing,
    Inference,
    Compositing,
    Registry,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Tracing => "tracing",
            Stage::Packing => "packing",
            Stage::Inference => "inference",
            Stage::Compositing => "compositing",
            Stage::Registry => "registry",
        };
        f.write_str(name)
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Extent or buffer size mismatch. Fatal, surfaced immediately.
    Configuration,
    /// Missing or malformed model asset / catalog entry. Fatal at load time.
    Asset,
    /// Failure while executing a frame. The frame is abandoned.
    Runtime,
    /// Ordering violation between execution domains.
    Sync,
    /// Plain I/O outside of asset loading.
    Io,
}

/// Main error type for the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Declared image extents disagree
    #[error("Extent mismatch for '{resource}': expected {expected:?}, got {actual:?}")]
    ExtentMismatch {
        resource: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Buffer element count differs from the pixel count
    #[error("Buffer '{buffer}' has {actual} elements, expected {expected}")]
    BufferSize {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Weights or height-field asset does not exist
    #[error("Model asset not found: {0}")]
    AssetNotFound(PathBuf),

    /// Asset exists but cannot be decoded
    #[error("Malformed model asset {path}: {reason}")]
    MalformedAsset { path: PathBuf, reason: String },

    /// Catalog entry with the wrong number of quantization scales
    #[error("Catalog entry '{model}' has {actual} quantization scales, expected 8")]
    ScaleCount { model: String, actual: usize },

    /// Catalog could not be interpreted
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// Model name not present in the catalog
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// A stage failed while executing
    #[error("{stage} stage failed: {reason}")]
    StageFailed { stage: Stage, reason: String },

    /// Frame was abandoned; the display keeps its fallback image
    #[error("Frame {frame} abandoned in {stage} stage: {source}")]
    FrameAbandoned {
        frame: u64,
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    /// Shared buffer read before the fence certifying its write was reached
    #[error("Read of '{buffer}' before {token} was reached")]
    Uncertified {
        buffer: &'static str,
        token: FenceToken,
    },

    /// A new frame was requested while one is still in flight
    #[error("Frame {0} is still in flight")]
    FrameInFlight(u64),

    /// No frame has been submitted since the last one finished
    #[error("No frame in flight")]
    NoFrameInFlight,

    /// Pipeline phase advanced out of order
    #[error("Invalid phase transition {from} -> {to}")]
    InvalidPhase { from: &'static str, to: &'static str },

    /// Image binding names a resource the pipeline does not declare
    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    /// Submission to a stopped execution queue
    #[error("Execution queue '{0}' is closed")]
    QueueClosed(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (settings, catalog) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a malformed-asset error.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedAsset {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a stage failure.
    pub fn stage(stage: Stage, reason: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            reason: reason.into(),
        }
    }

    /// Map this error onto the pipeline's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ExtentMismatch { .. } | Error::BufferSize { .. } | Error::UnknownResource(_) => {
                ErrorKind::Configuration
            }
            Error::AssetNotFound(_)
            | Error::MalformedAsset { .. }
            | Error::ScaleCount { .. }
            | Error::InvalidCatalog(_)
            | Error::UnknownModel(_)
            | Error::Image(_)
            | Error::Json(_) => ErrorKind::Asset,
            Error::StageFailed { .. } | Error::FrameAbandoned { .. } => ErrorKind::Runtime,
            Error::Uncertified { .. }
            | Error::FrameInFlight(_)
            | Error::NoFrameInFlight
            | Error::InvalidPhase { .. }
            | Error::QueueClosed(_) => ErrorKind::Sync,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Stage this error is attributed to, if any.
    pub fn stage_of(&self) -> Option<Stage> {
        match self {
            Error::StageFailed { stage, .. } | Error::FrameAbandoned { stage, .. } => Some(*stage),
            Error::AssetNotFound(_)
            | Error::MalformedAsset { .. }
            | Error::ScaleCount { .. }
            | Error::UnknownModel(_) => Some(Stage::Registry),
            _ => None,
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::BufferSize { buffer: "output", expected: 16, actual: 8 };
        let s = e.to_string();
        assert!(s.contains("output"));
        assert!(s.contains("16"));
        assert!(s.contains("8"));

        let e = Error::stage(Stage::Inference, "device lost");
        assert_eq!(e.to_string(), "inference stage failed: device lost");
    }

    #[test]
    fn test_error_kinds() {
        let e = Error::ExtentMismatch {
            resource: "color".into(),
            expected: (4, 4),
            actual: (8, 8),
        };
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert_eq!(Error::AssetNotFound("x.nbtf".into()).kind(), ErrorKind::Asset);
        assert_eq!(Error::ScaleCount { model: "m".into(), actual: 7 }.kind(), ErrorKind::Asset);

        let abandoned = Error::FrameAbandoned {
            frame: 3,
            stage: Stage::Inference,
            source: Box::new(Error::stage(Stage::Inference, "boom")),
        };
        assert_eq!(abandoned.kind(), ErrorKind::Runtime);
        assert_eq!(abandoned.stage_of(), Some(Stage::Inference));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
