use std::f32::consts::PI;

use marker_track_codes::{QrParams, SquareParams};
use marker_track_core::{CannyThresholds, SubPixParams};
use serde::{Deserialize, Serialize};

/// Configuration for [`MarkerDetector`](crate::MarkerDetector).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Number of 2× downsampled pyramid levels above full resolution.
    pub max_scale: usize,
    /// Read square codes as seen through a mirror.
    pub flip_horizontal: bool,
    /// Global contour scan.
    pub scan: ScanParams,
    /// Per-corner motion model and candidate search.
    pub corner: CornerParams,
    /// Missing-corner reconstruction.
    pub predictor: PredictorParams,
    /// Square code decoding.
    pub square: SquareParams,
    /// QR-style rotation decoding.
    pub qr: QrParams,
    /// Marker state bookkeeping.
    pub tracking: TrackingParams,
    /// Sub-pixel corner refinement.
    pub subpix: SubPixParams,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            max_scale: 1,
            flip_horizontal: false,
            scan: ScanParams::default(),
            corner: CornerParams::default(),
            predictor: PredictorParams::default(),
            square: SquareParams::default(),
            qr: QrParams::default(),
            tracking: TrackingParams::default(),
            subpix: SubPixParams::default(),
        }
    }
}

/// Global scan over the contour tree of every pyramid level.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    pub canny: CannyThresholds,
    /// Polygon approximation tolerance as a fraction of the contour length.
    pub polygon_epsilon_rel: f64,
    /// Smallest accepted quad area in full-resolution px².
    pub min_area: f32,
    /// Sub-pixel half window at full resolution.
    pub refine_half_window: u32,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            canny: CannyThresholds::new(100.0, 300.0),
            polygon_epsilon_rel: 0.05,
            min_area: 50.0,
            refine_half_window: 3,
        }
    }
}

impl ScanParams {
    /// Refinement half window for corners found on pyramid level `scale`.
    pub fn half_window_for(&self, scale: usize) -> u32 {
        if scale == 0 {
            self.refine_half_window
        } else {
            2 * (1u32 << scale) + 3
        }
    }
}

/// Motion model and local search of a single tracked corner.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerParams {
    /// Shortest arm a valid corner may have (px).
    pub min_arm_length: f32,
    /// Displacements shorter than this count as no motion (px).
    pub move_margin: f32,
    /// Fastest plausible corner motion (px/s).
    pub max_speed: f32,
    /// Fastest plausible change of angle or orientation (rad/s).
    pub max_angular_speed: f32,
    /// Weight of the angular terms in the similarity score.
    pub angular_weight: f32,
    /// Observations closer in time than this are treated as the same frame (s).
    pub min_frame_interval: f64,
    /// Corners wider than this are not searched (rad).
    pub max_corner_angle: f32,
    /// Motion extrapolation cap as a fraction of the image width.
    pub max_search_fraction: f32,
    /// Minimum search window as a fraction of the image size.
    pub min_rect_fraction: f32,
    pub canny: CannyThresholds,
    /// Douglas–Peucker tolerance for candidate polygons (px).
    pub polygon_epsilon: f64,
    /// Offset of the color probes along the diagonal.
    pub color_probe: f32,
    /// Largest per-channel difference to a recorded color.
    pub max_color_difference: u8,
    /// Smallest gray contrast across the corner.
    pub min_contrast: u8,
}

impl Default for CornerParams {
    fn default() -> Self {
        Self {
            min_arm_length: 2.0,
            move_margin: 2.0,
            max_speed: 640.0,
            max_angular_speed: 2.0 * PI,
            angular_weight: 60.0,
            min_frame_interval: 1.0 / 50.0,
            max_corner_angle: 150f32.to_radians(),
            max_search_fraction: 1.0 / 8.0,
            min_rect_fraction: 1.0 / 12.0,
            canny: CannyThresholds::new(300.0, 500.0),
            polygon_epsilon: 2.0,
            color_probe: 0.1,
            max_color_difference: 50,
            min_contrast: 30,
        }
    }
}

/// Arm search, cross-validation and acceptance of reconstructed corners.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorParams {
    /// Arm search reach relative to the previous side length.
    pub arm_reach: f32,
    /// Half opening of the first arm search cone (rad).
    pub wide_cone: f32,
    /// Half opening of the retry cone (rad).
    pub narrow_cone: f32,
    /// Vertices closer than this to the corner belong to it (px).
    pub capture_radius: f32,
    /// Margin around the arm search window (px).
    pub window_margin: f32,
    /// Sub-pixel half window for observed corners.
    pub refine_half_window: u32,
    /// Arm end perturbation used for angle tolerances (px).
    pub angle_tolerance_px: f32,
    /// Floor of the similarity bound for reconstructed corners.
    pub min_similarity_tolerance: f32,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            arm_reach: 1.2,
            wide_cone: 20f32.to_radians(),
            narrow_cone: 5f32.to_radians(),
            capture_radius: 5.0,
            window_margin: 3.0,
            refine_half_window: 5,
            angle_tolerance_px: 1.0,
            min_similarity_tolerance: 60.0,
        }
    }
}

/// When a marker counts as found and when tracking gives up on it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    /// Tracked updates stop this long after the last sighting (s).
    pub max_seen: f64,
    /// A marker is reported while its last update is younger than this (s).
    pub found_window: f64,
    /// Most predicted corners a reported marker may carry.
    pub max_predicted: usize,
    /// Border agreement a tracked update must exceed.
    pub min_code_correctness: f32,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            max_seen: 1.0,
            found_window: 0.05,
            max_predicted: 3,
            min_code_correctness: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let p: DetectorParams =
            serde_json::from_str(r#"{ "max_scale": 2, "corner": { "max_speed": 320.0 } }"#)
                .expect("parse");
        assert_eq!(p.max_scale, 2);
        assert_eq!(p.corner.max_speed, 320.0);
        assert_eq!(p.corner.move_margin, 2.0);
        assert_eq!(p.tracking.max_predicted, 3);
        assert!((p.corner.max_corner_angle - 2.618).abs() < 1e-3);
    }

    #[test]
    fn coarse_levels_widen_the_refinement_window() {
        let s = ScanParams::default();
        assert_eq!(s.half_window_for(0), 3);
        assert_eq!(s.half_window_for(1), 7);
        assert_eq!(s.half_window_for(2), 11);
    }
}
