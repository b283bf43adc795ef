//! Grid and line sampling over an image quadrilateral.

use marker_track_core::{sample_mean_3x3, GrayImageView, Homography};
use nalgebra::Point2;

use crate::DecodeError;

/// Centers of an `n × n` grid spread over `quad`, row-major.
///
/// Rows run along `quad[0] -> quad[3]`, columns along `quad[0] -> quad[1]`.
pub fn grid_cell_centers(
    quad: &[Point2<f32>; 4],
    n: usize,
) -> Result<Vec<Point2<f32>>, DecodeError> {
    let h = Homography::from_unit_square(quad).ok_or(DecodeError::DegenerateQuad)?;
    let step = 1.0 / n as f32;
    let mut out = Vec::with_capacity(n * n);
    for r in 0..n {
        for c in 0..n {
            let u = (c as f32 + 0.5) * step;
            let v = (r as f32 + 0.5) * step;
            out.push(h.apply(Point2::new(u, v)));
        }
    }
    Ok(out)
}

/// 3×3-mean gray samples at every grid cell center.
pub fn sample_grid(
    img: &GrayImageView<'_>,
    quad: &[Point2<f32>; 4],
    n: usize,
) -> Result<Vec<u8>, DecodeError> {
    grid_cell_centers(quad, n)?
        .into_iter()
        .map(|p| sample_mean_3x3(img, p.x, p.y).ok_or(DecodeError::SampleOutsideImage))
        .collect()
}

/// Border cells `(row, col)` of an `n × n` grid, clockwise from the top-left.
///
/// Side `k` holds the `n - 1` cells starting at corner `k`, so
/// `border_cells(n)[k * (n - 1)]` is grid corner `k`.
pub fn border_cells(n: usize) -> Vec<(usize, usize)> {
    if n < 2 {
        return vec![(0, 0); n];
    }
    let last = n - 1;
    let mut out = Vec::with_capacity(4 * last);
    out.extend((0..last).map(|c| (0, c)));
    out.extend((0..last).map(|r| (r, last)));
    out.extend((0..last).map(|c| (last, last - c)));
    out.extend((0..last).map(|r| (last - r, 0)));
    out
}

/// 8-connected pixel walk from `p1` to `p2`, both ends included.
///
/// Yields `max(|dx|, |dy|) + 1` pixels.
pub fn line_points(p1: Point2<f32>, p2: Point2<f32>) -> Vec<(i32, i32)> {
    let d = p2 - p1;
    let steps = d.x.abs().max(d.y.abs()).round() as usize;
    if steps == 0 {
        return vec![(p1.x.round() as i32, p1.y.round() as i32)];
    }
    (0..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            let p = p1 + d * t;
            (p.x.round() as i32, p.y.round() as i32)
        })
        .collect()
}
