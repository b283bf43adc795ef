//! Binary masks, contour trees and polygon simplification.
//!
//! Thin layer over `imageproc`: masks are built from an Otsu threshold of the
//! region (the marker's inside tone becomes foreground) united with Canny
//! edges, and contours are traced with border following.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::edges::canny;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Which tone fills the inside of a marker border.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Dark border on a light background (square code markers).
    #[default]
    DarkInside,
    /// Light border on a dark background (QR-style markers).
    LightInside,
}

impl Polarity {
    /// `+1` for dark-inside, `-1` for light-inside.
    pub fn sign(self) -> f32 {
        match self {
            Polarity::DarkInside => 1.0,
            Polarity::LightInside => -1.0,
        }
    }

    fn threshold_type(self) -> ThresholdType {
        match self {
            Polarity::DarkInside => ThresholdType::BinaryInverted,
            Polarity::LightInside => ThresholdType::Binary,
        }
    }
}

/// Canny hysteresis thresholds on the Sobel gradient magnitude.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CannyThresholds {
    pub low: f32,
    pub high: f32,
}

impl CannyThresholds {
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }
}

/// Foreground mask (255) of `gray` for contour extraction.
///
/// Otsu-thresholded pixels of the inside tone, united with Canny edges.
pub fn binary_mask(gray: &GrayImage, polarity: Polarity, edges: CannyThresholds) -> GrayImage {
    let level = otsu_level(gray);
    let mut mask = threshold(gray, level, polarity.threshold_type());
    if gray.width() >= 3 && gray.height() >= 3 {
        let edge_map = canny(gray, edges.low, edges.high);
        for (m, e) in mask.pixels_mut().zip(edge_map.pixels()) {
            m.0[0] |= e.0[0];
        }
    }
    mask
}

/// One traced border with its place in the nesting hierarchy.
#[derive(Clone, Debug)]
pub struct ContourNode {
    pub points: Vec<Point<i32>>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// 0 for outermost borders, +1 per nesting level.
    pub depth: usize,
    pub is_hole: bool,
}

/// All borders of a binary mask arranged as a forest.
#[derive(Clone, Debug, Default)]
pub struct ContourTree {
    pub nodes: Vec<ContourNode>,
}

impl ContourTree {
    pub fn from_mask(mask: &GrayImage) -> Self {
        let raw = find_contours::<i32>(mask);
        let mut nodes: Vec<ContourNode> = raw
            .into_iter()
            .map(|c| ContourNode {
                points: c.points,
                parent: c.parent,
                children: Vec::new(),
                depth: 0,
                is_hole: c.border_type == BorderType::Hole,
            })
            .collect();

        for i in 0..nodes.len() {
            if let Some(p) = nodes[i].parent {
                nodes[p].children.push(i);
            }
            let mut depth = 0;
            let mut cur = nodes[i].parent;
            while let Some(p) = cur {
                depth += 1;
                if depth > nodes.len() {
                    break;
                }
                cur = nodes[p].parent;
            }
            nodes[i].depth = depth;
        }
        Self { nodes }
    }

    /// Indices of the outermost borders.
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| i)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Outermost borders of `mask`, shifted by `offset` into absolute
/// coordinates and simplified with Douglas–Peucker `epsilon`.
pub fn external_polygons(
    mask: &GrayImage,
    offset: Point2<f32>,
    epsilon: f64,
) -> Vec<Vec<Point2<f32>>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.parent.is_none())
        .map(|c| {
            approx_polygon(&c.points, epsilon)
                .into_iter()
                .map(|p| Point2::new(p.x + offset.x, p.y + offset.y))
                .collect::<Vec<_>>()
        })
        .filter(|poly| poly.len() >= 3)
        .collect()
}

/// Perimeter of a closed contour.
pub fn closed_length(points: &[Point<i32>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    arc_length(points, true)
}

/// Douglas–Peucker simplification of a closed contour.
///
/// The contour is re-rooted at the vertex furthest from its first point and
/// split at the vertex furthest from that root, so both simplification passes
/// start on real corners. Vertices closer than `epsilon` to the line through
/// their neighbours are pruned afterwards.
pub fn approx_polygon(points: &[Point<i32>], epsilon: f64) -> Vec<Point2<f32>> {
    let n = points.len();
    if n < 3 || epsilon <= 0.0 {
        return points.iter().map(to_point2).collect();
    }

    let far_from = |from: Point<i32>| {
        points
            .iter()
            .enumerate()
            .max_by_key(|(_, p)| {
                let dx = (p.x - from.x) as i64;
                let dy = (p.y - from.y) as i64;
                dx * dx + dy * dy
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let a = far_from(points[0]);
    let b = far_from(points[a]);
    if a == b {
        return vec![to_point2(&points[a])];
    }

    let ring: Vec<Point<i32>> = points[a..].iter().chain(points[..a].iter()).copied().collect();
    let split = (b + n - a) % n;

    let first = approximate_polygon_dp(&ring[..=split], epsilon, false);
    let mut second_arc: Vec<Point<i32>> = ring[split..].to_vec();
    second_arc.push(ring[0]);
    let second = approximate_polygon_dp(&second_arc, epsilon, false);

    let mut poly: Vec<Point2<f32>> = first.iter().map(to_point2).collect();
    if second.len() > 2 {
        poly.extend(second[1..second.len() - 1].iter().map(to_point2));
    }
    prune_collinear(&mut poly, epsilon as f32);
    poly
}

fn to_point2(p: &Point<i32>) -> Point2<f32> {
    Point2::new(p.x as f32, p.y as f32)
}

fn prune_collinear(poly: &mut Vec<Point2<f32>>, epsilon: f32) {
    let mut changed = true;
    while changed && poly.len() > 3 {
        changed = false;
        let n = poly.len();
        for i in 0..n {
            let prev = poly[(i + n - 1) % n];
            let next = poly[(i + 1) % n];
            let base = next - prev;
            let len = base.norm();
            let dist = if len > 0.0 {
                crate::geometry::cross(base, poly[i] - prev).abs() / len
            } else {
                0.0
            };
            if dist < epsilon {
                poly.remove(i);
                changed = true;
                break;
            }
        }
    }
}
