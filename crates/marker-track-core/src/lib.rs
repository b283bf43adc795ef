//! Geometry and image primitives for fiducial marker tracking.
//!
//! Everything here is frame-local and stateless: planar vector helpers,
//! pixel rectangles, gray image sampling, 4-point homographies, sub-pixel
//! corner refinement, Otsu thresholds and contour extraction. The tracking
//! state lives in the `marker-track` crate.

pub mod contours;
pub mod geometry;
mod homography;
mod image;
mod logger;
mod rect;
mod subpix;
mod threshold;

pub use contours::{
    approx_polygon, binary_mask, closed_length, external_polygons, CannyThresholds, ContourNode,
    ContourTree, Polarity,
};
pub use homography::{homography_from_4pt, Homography};
pub use crate::image::{
    downsample_2x_into, get_gray, sample_bilinear, sample_mean_3x3,
    sample_rgb_mean_3x3, GrayImageView,
};
pub use rect::{PixelRect, RectF, MIN_RECT_SIDE};
pub use subpix::{refine_corner, SubPixParams};
pub use threshold::{binarize_samples, otsu_threshold_from_samples};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
