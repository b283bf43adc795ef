//! A single tracked vertex of a marker outline and its motion model.
//!
//! A [`Corner`] is the V formed by `prev -> p -> next`. Corners of a marker
//! are stored clockwise (on screen) so the interior lies to the right of the
//! `prev -> p` arm. Each frame a new corner is measured and compared with the
//! one from the previous frame; the comparison yields velocities and a
//! similarity score that ranks candidates (lower is better).

use image::imageops::crop_imm;
use image::{GrayImage, RgbImage};
use marker_track_core::geometry::{
    angle_between, angle_range, cross, det, normalize, rotate, signed_area, wrap_angle,
};
use marker_track_core::{
    binary_mask, external_polygons, sample_mean_3x3, sample_rgb_mean_3x3, GrayImageView, PixelRect,
    Polarity, RectF,
};
use nalgebra::{Point2, Vector2};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detector::CornerParams;

/// Similarity of a corner that cannot follow its previous state.
pub const INCOMPATIBLE: f32 = 1e6;

/// One frame as seen by the corner searches.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    pub gray: &'a GrayImage,
    pub rgb: &'a RgbImage,
    /// Capture time in seconds.
    pub time: f64,
}

impl<'a> FrameView<'a> {
    #[inline]
    pub fn width(&self) -> usize {
        self.gray.width() as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.gray.height() as usize
    }

    #[inline]
    pub fn gray_view(&self) -> GrayImageView<'a> {
        GrayImageView::from(self.gray)
    }

    /// Grayscale pixels inside `rect`, copied out.
    pub fn crop(&self, rect: &PixelRect) -> GrayImage {
        crop_imm(
            self.gray,
            rect.x as u32,
            rect.y as u32,
            rect.width as u32,
            rect.height as u32,
        )
        .to_image()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Corner {
    pub p: Point2<f32>,
    pub prev: Point2<f32>,
    pub next: Point2<f32>,
    /// `prev - p`.
    pub vp: Vector2<f32>,
    /// `next - p`.
    pub vn: Vector2<f32>,
    /// Interior angle between the arms, in `[0, π]`.
    pub angle: f32,
    /// Direction of the bisector, `atan2` convention.
    pub rotation: f32,
    /// Displacement since the previous observation, zeroed below the move margin.
    pub displacement: Vector2<f32>,
    /// px/s
    pub velocity: Vector2<f32>,
    /// rad/s
    pub angular_velocity: f32,
    /// rad/s
    pub rotational_velocity: f32,
    /// Signed turn of the motion direction since the previous observation.
    pub heading_change: f32,
    /// rad/s
    pub heading_velocity: f32,
    /// Vector to the opposite corner of the marker; zero when unknown.
    pub diag: Vector2<f32>,
    /// Lower is more consistent with the previous state; [`INCOMPATIBLE`] rejects.
    pub similarity: f32,
    pub is_predicted: bool,
    pub color_black: Option<[u8; 3]>,
    pub color_white: Option<[u8; 3]>,
    pub time: f64,
    pub polarity: Polarity,
}

impl Corner {
    pub fn new(
        prev: Point2<f32>,
        p: Point2<f32>,
        next: Point2<f32>,
        time: f64,
        polarity: Polarity,
    ) -> Self {
        let mut c = Self {
            p,
            prev,
            next,
            vp: Vector2::zeros(),
            vn: Vector2::zeros(),
            angle: 0.0,
            rotation: 0.0,
            displacement: Vector2::zeros(),
            velocity: Vector2::zeros(),
            angular_velocity: 0.0,
            rotational_velocity: 0.0,
            heading_change: 0.0,
            heading_velocity: 0.0,
            diag: Vector2::zeros(),
            similarity: INCOMPATIBLE,
            is_predicted: false,
            color_black: None,
            color_white: None,
            time,
            polarity,
        };
        c.measure();
        c
    }

    /// Four corners of the clockwise quad `points`, each linked to its ring
    /// neighbours.
    pub fn ring(points: &[Point2<f32>; 4], time: f64, polarity: Polarity) -> [Corner; 4] {
        std::array::from_fn(|i| {
            Corner::new(points[(i + 3) % 4], points[i], points[(i + 1) % 4], time, polarity)
        })
    }

    /// Recompute arms, angle and bisector orientation from the three points.
    pub fn measure(&mut self) {
        self.vp = self.prev - self.p;
        self.vn = self.next - self.p;
        self.angle = angle_between(self.vp, self.vn);
        let bisector = normalize((normalize(self.vp) + normalize(self.vn)) * 0.5);
        self.rotation = bisector.y.atan2(bisector.x);
    }

    #[inline]
    pub fn is_compatible(&self) -> bool {
        self.similarity < INCOMPATIBLE
    }

    /// Derive motion from `old` and score the result.
    ///
    /// Observations closer than `min_frame_interval` leave the corner
    /// untouched, so a duplicated frame keeps the incompatible score.
    pub fn compute_change(&mut self, old: &Corner, params: &CornerParams) {
        let elapsed = self.time - old.time;
        if elapsed < params.min_frame_interval {
            return;
        }
        let dt = elapsed as f32;

        let d = self.p - old.p;
        self.displacement = if d.norm() < params.move_margin {
            Vector2::zeros()
        } else {
            d
        };
        self.velocity = self.displacement / dt;
        self.angular_velocity = (self.angle - old.angle) / dt;

        let turn = wrap_angle(self.rotation - old.rotation);
        self.rotational_velocity = turn / dt;
        self.diag = rotate(old.diag, turn);

        if old.displacement != Vector2::zeros() && self.displacement != Vector2::zeros() {
            let mut h = angle_between(old.displacement, self.displacement);
            if cross(old.displacement, self.displacement) < 0.0 {
                h = -h;
            }
            self.heading_change = h;
            self.heading_velocity = h / dt;
        } else {
            self.heading_change = 0.0;
            self.heading_velocity = 0.0;
        }

        self.similarity = self.how_different(params);
        self.color_black = old.color_black;
        self.color_white = old.color_white;
    }

    /// Score of the last [`compute_change`](Self::compute_change).
    pub fn how_different(&self, params: &CornerParams) -> f32 {
        if self.vn.norm() < params.min_arm_length
            || self.vp.norm() < params.min_arm_length
            || self.angular_velocity.abs() > params.max_angular_speed
            || self.rotational_velocity.abs() > params.max_angular_speed
            || self.velocity.norm() > params.max_speed
        {
            return INCOMPATIBLE;
        }
        (self.angular_velocity.abs() + self.rotational_velocity.abs()) * params.angular_weight
            + self.velocity.norm()
    }

    /// Points probed on the inside-tone side and the outside-tone side.
    fn color_probes(&self, params: &CornerParams) -> (Point2<f32>, Point2<f32>) {
        let offset = self.diag * (params.color_probe * self.polarity.sign());
        (self.p + offset, self.p - offset)
    }

    /// Record the dark and light colors around the corner.
    pub fn sample_colors(&mut self, rgb: &RgbImage, params: &CornerParams) {
        let (black, white) = self.color_probes(params);
        self.color_black = sample_rgb_mean_3x3(rgb, black.x, black.y);
        self.color_white = sample_rgb_mean_3x3(rgb, white.x, white.y);
    }

    /// Reject the corner when its surroundings no longer look like the
    /// recorded colors or have no contrast left.
    pub fn check_color(&mut self, frame: &FrameView<'_>, params: &CornerParams) {
        if self.diag == Vector2::zeros() {
            return;
        }
        let (black, white) = self.color_probes(params);
        let differs = |recorded: Option<[u8; 3]>, at: Point2<f32>| match (
            recorded,
            sample_rgb_mean_3x3(frame.rgb, at.x, at.y),
        ) {
            (Some(r), Some(s)) => r
                .iter()
                .zip(s.iter())
                .any(|(&a, &b)| a.abs_diff(b) > params.max_color_difference),
            _ => false,
        };
        let mismatched =
            differs(self.color_black, black) as u8 + differs(self.color_white, white) as u8;
        if mismatched == 2 {
            self.similarity = INCOMPATIBLE;
            return;
        }

        let view = frame.gray_view();
        if let (Some(b), Some(w)) = (
            sample_mean_3x3(&view, black.x, black.y),
            sample_mean_3x3(&view, white.x, white.y),
        ) {
            if b.abs_diff(w) < params.min_contrast {
                self.similarity = INCOMPATIBLE;
            }
        }
    }

    /// Extrapolated position at `now` followed by the points bracketing the
    /// plausible motion range.
    pub fn bounding_points(
        &self,
        now: f64,
        image_width: usize,
        params: &CornerParams,
    ) -> [Point2<f32>; 8] {
        let dt = (now - self.time) as f32;
        let mut v = self.velocity * dt;
        let cap = image_width as f32 * params.max_search_fraction;
        if v.norm() > cap {
            v *= cap / v.norm();
        }
        let a = self.heading_velocity * dt;
        let p = self.p;
        [
            p + rotate(v, a),
            p + rotate(v, a) * 2.0,
            p + rotate(v, 1.5 * a) * 2.0,
            p - rotate(v, 1.5 * a) * 0.5,
            p + rotate(v, -0.3 * a) * 2.0,
            p - rotate(v, -0.3 * a) * 0.5,
            p + v * 2.0,
            p - v * 0.5,
        ]
    }

    /// Where this corner is expected to be at `now`.
    pub fn predicted_position(
        &self,
        now: f64,
        image_width: usize,
        params: &CornerParams,
    ) -> Point2<f32> {
        self.bounding_points(now, image_width, params)[0]
    }

    /// Image region searched for this corner at `now`.
    pub fn search_region(&self, frame: &FrameView<'_>, params: &CornerParams) -> Option<PixelRect> {
        let (w, h) = (frame.width(), frame.height());
        RectF::bounding(&self.bounding_points(frame.time, w, params))?
            .padded(params.min_arm_length)
            .at_least(
                w as f32 * params.min_rect_fraction,
                h as f32 * params.min_rect_fraction,
            )
            .clamp_to_image(w, h)
    }

    /// Convex polygon vertices near the extrapolated position that can
    /// continue this corner, scored against it.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(x = self.p.x, y = self.p.y))
    )]
    pub fn get_candidates(&self, frame: &FrameView<'_>, params: &CornerParams) -> Vec<Corner> {
        if self.angle > params.max_corner_angle {
            return Vec::new();
        }
        let Some(rect) = self.search_region(frame, params) else {
            log::trace!("search region for ({:.1}, {:.1}) is off the image", self.p.x, self.p.y);
            return Vec::new();
        };

        let roi = frame.crop(&rect);
        let mask = binary_mask(&roi, self.polarity, params.canny);
        let mut out = Vec::new();
        for mut poly in external_polygons(&mask, rect.origin(), params.polygon_epsilon) {
            if signed_area(&poly) < 0.0 {
                poly.reverse();
            }
            let n = poly.len();
            for i in 0..n {
                let (prev, p, next) = (poly[(i + n - 1) % n], poly[i], poly[(i + 1) % n]);
                if det(prev, p, next) <= 0.0 || rect.is_near_edge(p) {
                    continue;
                }
                let mut cand = Corner::new(prev, p, next, frame.time, self.polarity);
                cand.compute_change(self, params);
                cand.check_color(frame, params);
                if cand.is_compatible() {
                    out.push(cand);
                }
            }
        }
        out
    }

    /// Most similar candidate, if any.
    pub fn best_candidate(&self, frame: &FrameView<'_>, params: &CornerParams) -> Option<Corner> {
        self.get_candidates(frame, params)
            .into_iter()
            .min_by(|a, b| a.similarity.total_cmp(&b.similarity))
    }

    /// Arm pointing from this corner to its previous (`toward_previous`) or
    /// next neighbour, with the length that arm had in `old`.
    ///
    /// When the other arm rotated by the old interior angle falls within the
    /// tolerance of the current angle, the rotated arm is used instead.
    pub fn prediction_vector(&self, toward_previous: bool, old: &Corner) -> Vector2<f32> {
        let (lo, hi) = if toward_previous {
            angle_range(self.vn, self.vp, 0.5)
        } else {
            angle_range(self.vp, self.vn, 0.5)
        };
        let consistent = lo < old.angle && old.angle < hi;
        let (v, len) = if toward_previous {
            let v = if consistent { rotate(self.vn, old.angle) } else { self.vp };
            (v, old.vp.norm())
        } else {
            let v = if consistent { rotate(self.vp, -old.angle) } else { self.vn };
            (v, old.vn.norm())
        };
        let n = v.norm();
        if n > 0.0 {
            v * (len / n)
        } else {
            v
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{Luma, Rgb};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    fn params() -> CornerParams {
        CornerParams::default()
    }

    fn top_left(x: f32, y: f32, time: f64) -> Corner {
        // clockwise quad: prev is below, next is to the right
        Corner::new(
            Point2::new(x, y + 40.0),
            Point2::new(x, y),
            Point2::new(x + 40.0, y),
            time,
            Polarity::DarkInside,
        )
    }

    fn scene(x: i32, y: i32) -> (GrayImage, RgbImage) {
        let mut gray = GrayImage::from_pixel(480, 360, Luma([235]));
        draw_filled_rect_mut(&mut gray, Rect::at(x, y).of_size(100, 100), Luma([20]));
        let rgb = RgbImage::from_fn(480, 360, |px, py| {
            let v = gray.get_pixel(px, py).0[0];
            Rgb([v, v, v])
        });
        (gray, rgb)
    }

    #[test]
    fn measure_reads_angle_and_bisector() {
        let c = top_left(10.0, 10.0, 0.0);
        assert_relative_eq!(c.angle, FRAC_PI_2, epsilon = 1e-6);
        assert_relative_eq!(c.rotation, FRAC_PI_4, epsilon = 1e-6);
        assert_eq!(c.similarity, INCOMPATIBLE);

        let degenerate = Corner::new(
            Point2::new(5.0, 5.0),
            Point2::new(5.0, 5.0),
            Point2::new(9.0, 5.0),
            0.0,
            Polarity::DarkInside,
        );
        assert!(degenerate.rotation.is_finite());
    }

    #[test]
    fn duplicate_frames_keep_the_incompatible_score() {
        let old = top_left(10.0, 10.0, 1.0);
        let mut same = top_left(13.0, 10.0, 1.01);
        same.compute_change(&old, &params());
        assert_eq!(same.similarity, INCOMPATIBLE);
        assert_eq!(same.velocity, Vector2::zeros());
    }

    #[test]
    fn similarity_grows_with_speed_until_the_limit() {
        let old = top_left(10.0, 10.0, 0.0);
        let dt = 0.1;
        let mut last = -1.0;
        for step in [3.0, 10.0, 30.0, 60.0] {
            let mut c = top_left(10.0 + step, 10.0, dt);
            c.compute_change(&old, &params());
            assert!(c.is_compatible());
            assert!(c.similarity > last);
            last = c.similarity;
        }
        let mut fast = top_left(10.0 + 70.0, 10.0, dt);
        fast.compute_change(&old, &params());
        assert_eq!(fast.similarity, INCOMPATIBLE);
    }

    #[test]
    fn small_jitter_counts_as_standing_still() {
        let old = top_left(10.0, 10.0, 0.0);
        let mut c = top_left(11.0, 10.5, 0.1);
        c.compute_change(&old, &params());
        assert_eq!(c.velocity, Vector2::zeros());
        assert_relative_eq!(c.similarity, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn rotation_turns_the_diagonal() {
        let mut old = top_left(10.0, 10.0, 0.0);
        old.diag = Vector2::new(30.0, 30.0);
        let rotated: [Point2<f32>; 3] = [
            Point2::new(10.0, 50.0),
            Point2::new(10.0, 10.0),
            Point2::new(50.0, 10.0),
        ]
        .map(|q| {
            let d = rotate(q - Point2::new(10.0, 10.0), 0.1);
            Point2::new(10.0 + d.x, 10.0 + d.y)
        });
        let mut c = Corner::new(rotated[0], rotated[1], rotated[2], 1.0, Polarity::DarkInside);
        c.compute_change(&old, &params());
        assert_relative_eq!(c.rotational_velocity, 0.1, epsilon = 1e-4);
        let expected = rotate(old.diag, 0.1);
        assert_relative_eq!(c.diag.x, expected.x, epsilon = 1e-3);
        assert_relative_eq!(c.diag.y, expected.y, epsilon = 1e-3);
    }

    #[test]
    fn search_follows_a_moving_corner() {
        let (_, rgb0) = scene(100, 80);
        let mut old = top_left(99.5, 79.5, 0.0);
        old.diag = Vector2::new(49.0, 49.0);
        old.velocity = Vector2::new(90.0, 0.0);
        old.sample_colors(&rgb0, &params());
        assert_eq!(old.color_black, Some([20, 20, 20]));
        assert_eq!(old.color_white, Some([235, 235, 235]));

        let (gray, rgb) = scene(103, 80);
        let frame = FrameView {
            gray: &gray,
            rgb: &rgb,
            time: 1.0 / 30.0,
        };
        let best = old.best_candidate(&frame, &params()).expect("candidate");
        assert!((best.p - Point2::new(102.5, 79.5)).norm() < 2.0, "{:?}", best.p);
        assert!(best.is_compatible());
        assert_eq!(best.color_black, old.color_black);
    }

    #[test]
    fn color_change_rejects_candidates() {
        let (_, rgb0) = scene(100, 80);
        let mut old = top_left(99.5, 79.5, 0.0);
        old.diag = Vector2::new(49.0, 49.0);
        old.sample_colors(&rgb0, &params());

        // same geometry, inverted tones
        let (gray, _) = scene(101, 80);
        let inverted = RgbImage::from_fn(480, 360, |x, y| {
            let v = 255 - gray.get_pixel(x, y).0[0];
            Rgb([v, v, v])
        });
        let mut c = top_left(100.5, 79.5, 0.1);
        c.compute_change(&old, &params());
        assert!(c.is_compatible());
        let frame = FrameView {
            gray: &gray,
            rgb: &inverted,
            time: 0.1,
        };
        c.check_color(&frame, &params());
        assert!(!c.is_compatible());
    }

    #[test]
    fn flat_surroundings_have_no_contrast() {
        let gray = GrayImage::from_pixel(80, 80, Luma([128]));
        let rgb = RgbImage::from_pixel(80, 80, Rgb([128, 128, 128]));
        let mut c = top_left(20.0, 20.0, 0.1);
        c.diag = Vector2::new(40.0, 40.0);
        c.similarity = 10.0;
        let frame = FrameView {
            gray: &gray,
            rgb: &rgb,
            time: 0.1,
        };
        c.check_color(&frame, &params());
        assert!(!c.is_compatible());
    }

    #[test]
    fn wide_corners_are_not_searched() {
        let (gray, rgb) = scene(30, 25);
        let flat = Corner::new(
            Point2::new(0.0, 30.0),
            Point2::new(30.0, 30.0),
            Point2::new(60.0, 31.0),
            0.0,
            Polarity::DarkInside,
        );
        let frame = FrameView {
            gray: &gray,
            rgb: &rgb,
            time: 0.1,
        };
        assert!(flat.get_candidates(&frame, &params()).is_empty());
    }

    #[test]
    fn prediction_vector_uses_the_old_arm_length() {
        let mut old = top_left(10.0, 10.0, 0.0);
        old.prev = Point2::new(10.0, 110.0);
        old.measure();
        // the current prev arm is short, the next arm is long and reliable
        let c = Corner::new(
            Point2::new(10.0, 22.0),
            Point2::new(10.0, 10.0),
            Point2::new(110.0, 10.0),
            0.1,
            Polarity::DarkInside,
        );
        let v = c.prediction_vector(true, &old);
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-3);
        assert_relative_eq!(v.y, 100.0, epsilon = 1e-3);
        let n = c.prediction_vector(false, &old);
        assert_relative_eq!(n.x, 40.0, epsilon = 1e-3);
        assert_relative_eq!(n.y, 0.0, epsilon = 1e-3);
    }
}
