//! Planar vector helpers used by corner tracking.
//!
//! All functions work in image coordinates (x to the right, y down). In this
//! frame a positive [`det`] means that the turn `a -> b -> c` is clockwise as
//! seen on screen, and [`rotate`] with a positive angle turns a vector
//! clockwise on screen.

use nalgebra::{Matrix2, Point2, Vector2};
use std::f32::consts::PI;

/// Vector pointing from `a` to `b`.
#[inline]
pub fn vector(a: Point2<f32>, b: Point2<f32>) -> Vector2<f32> {
    b - a
}

/// Unit vector along `v`, or the zero vector when `v` has no length.
#[inline]
pub fn normalize(v: Vector2<f32>) -> Vector2<f32> {
    let n = v.norm();
    if n > 0.0 {
        v / n
    } else {
        Vector2::zeros()
    }
}

/// Unsigned angle between two vectors in `[0, π]`.
///
/// The cosine is clamped so rounding never produces NaN. A zero vector is
/// treated as perpendicular to everything.
#[inline]
pub fn angle_between(a: Vector2<f32>, b: Vector2<f32>) -> f32 {
    let cos = normalize(a).dot(&normalize(b)).clamp(-1.0, 1.0);
    cos.acos()
}

/// Rotate `v` by `angle` radians.
#[inline]
pub fn rotate(v: Vector2<f32>, angle: f32) -> Vector2<f32> {
    let (s, c) = angle.sin_cos();
    Vector2::new(v.x * c - v.y * s, v.x * s + v.y * c)
}

/// 2D cross product `a × b`.
#[inline]
pub fn cross(a: Vector2<f32>, b: Vector2<f32>) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Orientation determinant of the triangle `a, b, c`.
#[inline]
pub fn det(a: Point2<f32>, b: Point2<f32>, c: Point2<f32>) -> f32 {
    cross(b - a, c - a)
}

/// Solve `p1 + s·v1 = p2 + t·v2` for `(s, t)`.
///
/// Returns `None` for (near) parallel rays.
pub fn solve_linear(
    p1: Point2<f32>,
    v1: Vector2<f32>,
    p2: Point2<f32>,
    v2: Vector2<f32>,
) -> Option<(f32, f32)> {
    let a = Matrix2::new(v1.x as f64, -v2.x as f64, v1.y as f64, -v2.y as f64);
    let b = nalgebra::Vector2::new((p2.x - p1.x) as f64, (p2.y - p1.y) as f64);
    let scale = (v1.norm() * v2.norm()) as f64;
    if scale <= f64::EPSILON || (a.determinant() / scale).abs() < 1e-6 {
        return None;
    }
    let x = a.lu().solve(&b)?;
    Some((x[0] as f32, x[1] as f32))
}

/// Range of angles between `base` and `arm` when the end of `arm` is moved
/// by up to `pixels` along both axes.
///
/// Arms shorter than `pixels` carry no direction information and yield the
/// full `(0, π)` range.
pub fn angle_range(base: Vector2<f32>, arm: Vector2<f32>, pixels: f32) -> (f32, f32) {
    if arm.norm() < pixels {
        return (0.0, PI);
    }
    let mut lo = f32::MAX;
    let mut hi = f32::MIN;
    for (dx, dy) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
        let a = angle_between(base, arm + Vector2::new(dx * pixels, dy * pixels));
        lo = lo.min(a);
        hi = hi.max(a);
    }
    (lo, hi)
}

/// Wrap an angle difference into `[-π, π]`.
#[inline]
pub fn wrap_angle(a: f32) -> f32 {
    let mut a = a % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Re-root a closed polygon at its lexicographically smallest `(x, y)` vertex
/// and make it clockwise on screen.
pub fn standardize_contour(points: &[Point2<f32>]) -> Vec<Point2<f32>> {
    let Some(start) = points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.x.partial_cmp(&b.x)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|(i, _)| i)
    else {
        return Vec::new();
    };

    let mut out: Vec<Point2<f32>> = points[start..]
        .iter()
        .chain(points[..start].iter())
        .copied()
        .collect();
    let n = out.len();
    if n >= 3 && det(out[n - 1], out[0], out[1]) < 0.0 {
        out[1..].reverse();
    }
    out
}

/// True when every consecutive vertex triple turns clockwise.
pub fn is_convex(points: &[Point2<f32>]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    (0..n).all(|i| det(points[(i + n - 1) % n], points[i], points[(i + 1) % n]) > 0.0)
}

/// Signed polygon area; positive for clockwise-on-screen polygons.
pub fn signed_area(points: &[Point2<f32>]) -> f32 {
    let n = points.len();
    let mut acc = 0.0f32;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

/// Axis-aligned bounds `(min, max)` of a point set.
pub fn bounds(points: &[Point2<f32>]) -> Option<(Point2<f32>, Point2<f32>)> {
    let first = points.first()?;
    let mut lo = *first;
    let mut hi = *first;
    for p in &points[1..] {
        lo.x = lo.x.min(p.x);
        lo.y = lo.y.min(p.y);
        hi.x = hi.x.max(p.x);
        hi.y = hi.y.max(p.y);
    }
    Some((lo, hi))
}

/// Squared distance between two points.
#[inline]
pub fn dist_sq(a: Point2<f32>, b: Point2<f32>) -> f32 {
    (b - a).norm_squared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    fn square() -> Vec<Point2<f32>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ]
    }

    #[test]
    fn clockwise_square_has_positive_orientation() {
        let s = square();
        assert!(det(s[3], s[0], s[1]) > 0.0);
        assert!(is_convex(&s));
        assert_relative_eq!(signed_area(&s), 100.0);
    }

    #[test]
    fn rotation_matches_orientation_sign() {
        let right = Vector2::new(1.0, 0.0);
        let down = rotate(right, FRAC_PI_2);
        assert_relative_eq!(down.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(down.y, 1.0, epsilon = 1e-6);
        assert!(cross(right, down) > 0.0);
    }

    #[test]
    fn angle_is_clamped_and_unsigned() {
        let a = Vector2::new(1.0, 0.0);
        assert_relative_eq!(angle_between(a, a * 3.0), 0.0);
        assert_relative_eq!(angle_between(a, -a), PI, epsilon = 1e-6);
        assert_relative_eq!(angle_between(a, Vector2::new(0.0, -2.0)), FRAC_PI_2);
        assert_eq!(normalize(Vector2::zeros()), Vector2::zeros());
    }

    #[test]
    fn rays_intersect_at_the_shared_corner() {
        let p1 = Point2::new(10.0, 0.0);
        let v1 = Vector2::new(-10.0, 0.0);
        let p2 = Point2::new(0.0, 10.0);
        let v2 = Vector2::new(0.0, -10.0);
        let (s, t) = solve_linear(p1, v1, p2, v2).expect("solvable");
        assert_relative_eq!(s, 1.0, epsilon = 1e-5);
        assert_relative_eq!(t, 1.0, epsilon = 1e-5);
        assert!(solve_linear(p1, v1, p2, v1 * 2.0).is_none());
    }

    #[test]
    fn angle_range_brackets_the_exact_angle() {
        let base = Vector2::new(0.0, 50.0);
        let arm = Vector2::new(-50.0, 0.0);
        let (lo, hi) = angle_range(base, arm, 0.5);
        let exact = angle_between(base, arm);
        assert!(lo < exact && exact < hi);
        assert_eq!(angle_range(base, Vector2::new(0.2, 0.0), 0.5), (0.0, PI));
    }

    #[test]
    fn standardize_reroots_and_orients() {
        let ccw = vec![
            Point2::new(10.0, 10.0),
            Point2::new(10.0, 0.0),
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 10.0),
        ];
        let std = standardize_contour(&ccw);
        assert_eq!(std, square());
    }

    #[test]
    fn wrap_angle_keeps_small_differences() {
        assert_relative_eq!(wrap_angle(2.0 * PI - 0.1), -0.1, epsilon = 1e-5);
        assert_relative_eq!(wrap_angle(-2.0 * PI + 0.1), 0.1, epsilon = 1e-5);
        assert_relative_eq!(wrap_angle(0.3), 0.3);
    }
}
