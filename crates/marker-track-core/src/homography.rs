use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

/// Planar projective map `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let v = self.h * Vector3::new(p.x as f64, p.y as f64, 1.0);
        let w = v[2];
        Point2::new((v[0] / w) as f32, (v[1] / w) as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Map from the unit square `(0,0) (1,0) (1,1) (0,1)` onto `quad`.
    ///
    /// `quad` is ordered like the unit square corners, so u runs along
    /// `quad[0] -> quad[1]` and v along `quad[0] -> quad[3]`.
    pub fn from_unit_square(quad: &[Point2<f32>; 4]) -> Option<Self> {
        homography_from_4pt(&UNIT_SQUARE, quad)
    }
}

const UNIT_SQUARE: [Point2<f32>; 4] = [
    Point2::new(0.0, 0.0),
    Point2::new(1.0, 0.0),
    Point2::new(1.0, 1.0),
    Point2::new(0.0, 1.0),
];

/// Translate to the centroid and scale so the mean distance becomes √2.
fn normalize_points4(pts: &[Point2<f32>; 4]) -> ([Point2<f64>; 4], Matrix3<f64>) {
    let (cx, cy) = pts.iter().fold((0.0f64, 0.0f64), |(x, y), p| {
        (x + p.x as f64 / 4.0, y + p.y as f64 / 4.0)
    });
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x as f64 - cx).powi(2) + (p.y as f64 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-12 {
        2.0_f64.sqrt() / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);

    let out = pts.map(|p| {
        let v = t * Vector3::new(p.x as f64, p.y as f64, 1.0);
        Point2::new(v[0], v[1])
    });
    (out, t)
}

/// Compute H such that `dst ~ H * src` from four correspondences.
///
/// Corner order must be consistent between `src` and `dst`. Returns `None`
/// for degenerate configurations (three collinear points, repeated points).
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
    let (src_n, t_src) = normalize_points4(src);
    let (dst_n, t_dst) = normalize_points4(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let (x, y) = (src_n[k].x, src_n[k].y);
        let (u, v) = (dst_n[k].x, dst_n[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = r0 + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);

    let h = t_dst.try_inverse()? * hn * t_src;
    let s = h[(2, 2)];
    if s.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Homography::new(h / s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f32>, b: Point2<f32>, tol: f32) {
        let dx = (a.x - b.x).abs();
        let dy = (a.y - b.y).abs();
        assert!(
            dx < tol && dy < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    #[test]
    fn four_points_recover_a_projective_map() {
        let ground_truth = Homography::new(Matrix3::new(
            0.8, 0.05, 120.0, //
            -0.02, 1.1, 80.0, //
            0.0009, -0.0004, 1.0,
        ));
        let src = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(180.0, 0.0),
            Point2::new(180.0, 130.0),
            Point2::new(0.0, 130.0),
        ];
        let dst = src.map(|p| ground_truth.apply(p));

        let recovered = homography_from_4pt(&src, &dst).expect("recoverable");
        for p in [
            Point2::new(0.0_f32, 0.0),
            Point2::new(60.0, 40.0),
            Point2::new(150.0, 120.0),
        ] {
            assert_close(recovered.apply(p), ground_truth.apply(p), 1e-3);
        }
        let inv = recovered.inverse().expect("invertible");
        assert_close(inv.apply(dst[2]), src[2], 1e-2);
    }

    #[test]
    fn unit_square_maps_onto_quad_corners() {
        let quad = [
            Point2::new(10.0_f32, 12.0),
            Point2::new(90.0, 20.0),
            Point2::new(85.0, 95.0),
            Point2::new(5.0, 88.0),
        ];
        let h = Homography::from_unit_square(&quad).expect("valid quad");
        for (u, q) in UNIT_SQUARE.iter().zip(quad) {
            assert_close(h.apply(*u), q, 1e-3);
        }
    }

    #[test]
    fn collapsed_quad_is_rejected() {
        let quad = [Point2::new(3.0_f32, 3.0); 4];
        assert!(Homography::from_unit_square(&quad).is_none());
    }
}
