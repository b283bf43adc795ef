//! Frame-by-frame marker detection and tracking.
//!
//! Every frame first runs a global contour scan over the image pyramid for
//! all registered markers. Markers the scan misses are then followed from
//! their previous corners, reconstructing occluded corners where needed.

mod context;
mod error;
mod params;
mod pipeline;
mod scan;

pub use context::DetectionContext;
pub use error::{DetectorError, TrackFailure};
pub use params::{CornerParams, DetectorParams, PredictorParams, ScanParams, TrackingParams};
pub use pipeline::MarkerDetector;
pub use scan::{candidate_quad, scan_level, ScanMatch};
