//! Real-time tracking of square and QR-style fiducial markers.
//!
//! Register [`Marker`]s with a [`MarkerDetector`] and feed it timestamped
//! frames. Each frame the detector scans the image pyramid for marker
//! outlines and decodes them; markers it cannot see that way are followed
//! from their last corners, and occluded corners are reconstructed from the
//! visible ones.
//!
//! ```no_run
//! use marker_track::{DetectorParams, Marker, MarkerDetector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut detector = MarkerDetector::new(640, 480, 3, DetectorParams::default())?;
//! detector.add_marker(Marker::square(5)?)?;
//!
//! let frame = vec![0u8; 640 * 480 * 3];
//! for m in detector.find_markers(&frame, 0.0, true)? {
//!     println!("{} at {:?} ({} predicted)", m.id, m.corners, m.predicted);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//! - [`corner`]: a tracked corner, its motion model and local search.
//! - [`predictor`]: reconstruction of missing corners.
//! - [`marker`]: marker identity and per-frame updates.
//! - [`detector`]: the frame pipeline, its parameters and errors.
//! - [`io`]: JSON configs and reports.

pub mod corner;
pub mod detector;
pub mod io;
pub mod marker;
pub mod predictor;

pub use marker_track_codes as codes;
pub use marker_track_core as core;

pub use corner::{Corner, FrameView, INCOMPATIBLE};
pub use detector::{
    CornerParams, DetectionContext, DetectorError, DetectorParams, MarkerDetector, PredictorParams,
    ScanParams, TrackFailure, TrackingParams,
};
pub use io::{ConfigError, FrameReport, IoError, MarkerSpec, TrackerConfig, TrackingReport};
pub use marker::{Classification, Hint, Marker, MarkerId, MarkerKind, TrackedMarker};
pub use predictor::{CornerPredictor, CornerSlots};
