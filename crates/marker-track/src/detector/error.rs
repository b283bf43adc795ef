use marker_track_codes::DecodeError;

use crate::MarkerId;

/// Caller mistakes rejected by [`MarkerDetector`](crate::MarkerDetector).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("frame buffer has {actual} bytes, expected {expected}")]
    InvalidFrameLength { expected: usize, actual: usize },
    #[error("frame size must be non-zero (got {width}x{height})")]
    InvalidFrameSize { width: u32, height: u32 },
    #[error("unsupported channel count {channels} (expected 1, 3 or 4)")]
    UnsupportedChannels { channels: usize },
    #[error("image is {actual_width}x{actual_height}, detector expects {width}x{height}")]
    FrameSizeMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("marker {0} is already registered")]
    DuplicateMarker(MarkerId),
    #[error("timestamp {timestamp} precedes the previous frame at {previous}")]
    DecreasingTimestamp { timestamp: f64, previous: f64 },
}

/// Why a marker could not be updated on this frame.
///
/// None of these abort a frame; they are logged and the marker is simply not
/// reported.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackFailure {
    #[error("corner is incompatible with its previous state")]
    CornerIncompatible,
    #[error("no convex quadrilateral could be reconstructed")]
    PredictionUnrecoverable,
    #[error(transparent)]
    DecodeAmbiguous(#[from] DecodeError),
    #[error("search region lies outside the image")]
    GeometryOutOfBounds,
    #[error("code correctness {correctness:.2} below {min:.2}")]
    LowCorrectness { correctness: f32, min: f32 },
    #[error("last seen {age:.3}s ago")]
    Stale { age: f64 },
    #[error("marker has no previous position")]
    NotTracked,
}
