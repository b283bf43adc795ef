//! Iterative sub-pixel corner refinement.
//!
//! For a corner `q`, every neighbourhood point `p` on an edge has an image
//! gradient orthogonal to `p - q`. Minimising `Σ w·(∇I(p)·(q - p))²` over the
//! window yields a 2×2 normal equation per iteration.

use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::image::{sample_bilinear, GrayImageView};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    pub max_iterations: usize,
    /// Stop once a step moves the estimate by less than this many pixels.
    pub epsilon: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            epsilon: 0.01,
        }
    }
}

/// Refine `p` inside a `(2·half_window + 1)²` window.
///
/// Returns the original point when the system is singular (flat patch) or the
/// estimate wanders further than `half_window` along either axis.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    p: Point2<f32>,
    half_window: u32,
    params: &SubPixParams,
) -> Point2<f32> {
    if half_window == 0 || img.width < 3 || img.height < 3 {
        return p;
    }
    let win = half_window as i32;
    let sigma2 = (half_window * half_window) as f32;

    let mut q = p;
    for _ in 0..params.max_iterations {
        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();

        for dy in -win..=win {
            for dx in -win..=win {
                let w = (-((dx * dx + dy * dy) as f32) / sigma2).exp() as f64;
                let sx = q.x + dx as f32;
                let sy = q.y + dy as f32;
                let gx =
                    0.5 * (sample_bilinear(img, sx + 1.0, sy) - sample_bilinear(img, sx - 1.0, sy));
                let gy =
                    0.5 * (sample_bilinear(img, sx, sy + 1.0) - sample_bilinear(img, sx, sy - 1.0));
                let (gx, gy) = (gx as f64, gy as f64);

                let gxx = gx * gx * w;
                let gxy = gx * gy * w;
                let gyy = gy * gy * w;
                a[(0, 0)] += gxx;
                a[(0, 1)] += gxy;
                a[(1, 0)] += gxy;
                a[(1, 1)] += gyy;
                b[0] += gxx * sx as f64 + gxy * sy as f64;
                b[1] += gxy * sx as f64 + gyy * sy as f64;
            }
        }

        let scale = a[(0, 0)] + a[(1, 1)];
        if scale <= f64::EPSILON || a.determinant().abs() <= 1e-9 * scale * scale {
            break;
        }
        let Some(x) = a.lu().solve(&b) else {
            break;
        };
        let next = Point2::new(x[0] as f32, x[1] as f32);
        let step = (next - q).norm();
        q = next;
        if step < params.epsilon {
            break;
        }
    }

    let limit = half_window as f32;
    if !q.x.is_finite()
        || !q.y.is_finite()
        || (q.x - p.x).abs() > limit
        || (q.y - p.y).abs() > limit
    {
        return p;
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    /// Dark quadrant `x < cx, y < cy` on white, with area-weighted edges.
    fn quadrant_image(cx: f32, cy: f32) -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            let cover = |center: f32, edge: f32| (edge - (center - 0.5)).clamp(0.0, 1.0);
            let fx = cover(x as f32, cx);
            let fy = cover(y as f32, cy);
            let dark = fx * fy;
            Luma([(255.0 * (1.0 - dark) + 20.0 * dark).round() as u8])
        })
    }

    #[test]
    fn converges_to_the_true_corner() {
        let img = quadrant_image(20.3, 19.6);
        let view = GrayImageView::from(&img);
        let refined = refine_corner(&view, Point2::new(21.5, 18.5), 5, &SubPixParams::default());
        assert!((refined.x - 20.3).abs() < 0.4, "x {}", refined.x);
        assert!((refined.y - 19.6).abs() < 0.4, "y {}", refined.y);
    }

    #[test]
    fn flat_patch_keeps_the_estimate() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        let view = GrayImageView::from(&img);
        let p = Point2::new(10.2, 9.7);
        assert_eq!(refine_corner(&view, p, 3, &SubPixParams::default()), p);
    }
}
