//! Global search: classify the quads of a contour tree against the markers
//! still missing on this frame.
//!
//! The walk is pure. It returns the matches and leaves applying them to the
//! caller.

use std::collections::{BTreeMap, BTreeSet};

use marker_track_core::geometry::{is_convex, signed_area, standardize_contour};
use marker_track_core::{approx_polygon, closed_length, ContourNode, ContourTree, GrayImageView};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detector::{DetectorParams, ScanParams};
use crate::marker::{Classification, Hint, Marker, MarkerId, MarkerKind};

/// A marker placed on a scanned quad.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanMatch {
    pub id: MarkerId,
    /// Full-resolution corners, clockwise from the marker's top-left.
    pub quad: [Point2<f32>; 4],
    pub conflicts: Option<u32>,
}

/// Full-resolution clockwise quad of a contour found on a level downsampled
/// by `factor`, if the contour is a large enough convex quadrilateral.
pub fn candidate_quad(
    node: &ContourNode,
    factor: f32,
    params: &ScanParams,
) -> Option<[Point2<f32>; 4]> {
    let eps = params.polygon_epsilon_rel * closed_length(&node.points);
    let poly = approx_polygon(&node.points, eps);
    if poly.len() != 4 {
        return None;
    }
    let scaled: Vec<Point2<f32>> = poly
        .iter()
        .map(|p| Point2::new((p.x + 0.5) * factor - 0.5, (p.y + 0.5) * factor - 0.5))
        .collect();
    let quad = standardize_contour(&scaled);
    if !is_convex(&quad) || signed_area(&quad).abs() < params.min_area {
        return None;
    }
    Some([quad[0], quad[1], quad[2], quad[3]])
}

/// Walk `tree` and match quads against the `pending` markers.
///
/// Borders at even depth that enclose a hole are tested, innermost first;
/// a border whose inside already produced a match is skipped. Each marker is
/// matched at most once.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(contours = tree.len(), pending = pending.len()))
)]
pub fn scan_level(
    tree: &ContourTree,
    factor: f32,
    img: &GrayImageView<'_>,
    markers: &BTreeMap<MarkerId, Marker>,
    pending: &[MarkerId],
    now: f64,
    params: &DetectorParams,
) -> Vec<ScanMatch> {
    let mut walk = Walk {
        tree,
        factor,
        img,
        markers,
        pending,
        now,
        params,
        claimed: BTreeSet::new(),
        matches: Vec::new(),
    };
    for root in tree.roots() {
        if walk.done() {
            break;
        }
        walk.visit(root);
    }
    walk.matches
}

struct Walk<'a, 'v> {
    tree: &'a ContourTree,
    factor: f32,
    img: &'a GrayImageView<'v>,
    markers: &'a BTreeMap<MarkerId, Marker>,
    pending: &'a [MarkerId],
    now: f64,
    params: &'a DetectorParams,
    claimed: BTreeSet<MarkerId>,
    matches: Vec<ScanMatch>,
}

impl Walk<'_, '_> {
    fn done(&self) -> bool {
        self.claimed.len() >= self.pending.len()
    }

    fn visit(&mut self, i: usize) -> bool {
        let tree = self.tree;
        let node = &tree.nodes[i];
        let mut inside = false;
        for &c in &node.children {
            if self.done() {
                break;
            }
            inside |= self.visit(c);
        }
        if inside {
            return true;
        }
        if node.depth % 2 == 0 && !node.children.is_empty() && !self.done() {
            return self.test(node);
        }
        false
    }

    fn unclaimed(&self) -> impl Iterator<Item = (&MarkerId, &Marker)> + '_ {
        self.pending
            .iter()
            .filter(|id| !self.claimed.contains(*id))
            .filter_map(|id| self.markers.get(id).map(|m| (id, m)))
    }

    fn claim(&mut self, id: MarkerId, quad: [Point2<f32>; 4], conflicts: Option<u32>) {
        log::debug!("{id} matched at scale factor {}", self.factor);
        self.claimed.insert(id.clone());
        self.matches.push(ScanMatch { id, quad, conflicts });
    }

    /// Find the pending marker that takes `hint`, if any.
    fn hint_taker(&self, hint: &Hint) -> Option<MarkerId> {
        self.unclaimed()
            .find(|(_, m)| m.accepts_hint(hint, self.now))
            .map(|(id, _)| id.clone())
    }

    fn test(&mut self, node: &ContourNode) -> bool {
        let Some(quad) = candidate_quad(node, self.factor, &self.params.scan) else {
            return false;
        };

        let markers = self.markers;
        let mut hint: Option<Hint> = None;
        let candidates: Vec<MarkerId> = self.unclaimed().map(|(id, _)| id.clone()).collect();
        for id in candidates {
            let Some(marker) = markers.get(&id) else {
                continue;
            };
            // a decoded square code answers for every square marker
            if let (Some(_), MarkerKind::Square) = (&hint, marker.kind()) {
                continue;
            }
            match marker.classify(self.img, &quad, self.now, self.params) {
                Classification::Matched { quad, conflicts } => {
                    self.claim(id, quad, conflicts);
                    return true;
                }
                Classification::Hint(h) => {
                    if let Some(taker) = self.hint_taker(&h) {
                        self.claim(taker, h.quad, None);
                        return true;
                    }
                    log::trace!("{} decoded but not pending", h.id);
                    hint = Some(h);
                }
                Classification::Rejected(e) => {
                    log::trace!("{id} rejected quad at {:?}: {e}", quad[0]);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{imageops, GrayImage, Luma};
    use marker_track_codes::render_square;
    use marker_track_core::{binary_mask, Polarity};

    fn two_markers() -> GrayImage {
        let mut img = GrayImage::from_pixel(320, 160, Luma([255]));
        imageops::overlay(&mut img, &render_square(5, 16).expect("render"), 10, 20);
        imageops::overlay(&mut img, &render_square(12, 16).expect("render"), 170, 20);
        img
    }

    fn registry(ids: &[u32]) -> BTreeMap<MarkerId, Marker> {
        ids.iter()
            .map(|&i| (MarkerId::Square(i), Marker::square(i).expect("valid")))
            .collect()
    }

    fn run(img: &GrayImage, markers: &BTreeMap<MarkerId, Marker>, scale: usize) -> Vec<ScanMatch> {
        let params = DetectorParams::default();
        let level = if scale == 0 {
            img.clone()
        } else {
            let mut half = GrayImage::new(img.width() / 2, img.height() / 2);
            marker_track_core::downsample_2x_into(img, &mut half);
            half
        };
        let mask = binary_mask(&level, Polarity::DarkInside, params.scan.canny);
        let tree = ContourTree::from_mask(&mask);
        let pending: Vec<MarkerId> = markers.keys().cloned().collect();
        scan_level(
            &tree,
            (1u32 << scale) as f32,
            &GrayImageView::from(img),
            markers,
            &pending,
            0.0,
            &params,
        )
    }

    #[test]
    fn both_markers_are_found_once() {
        let img = two_markers();
        let markers = registry(&[5, 12]);
        let mut found = run(&img, &markers, 0);
        found.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, MarkerId::Square(5));
        assert_eq!(found[1].id, MarkerId::Square(12));
        // ring of marker 5 spans [26, 106) in x and [36, 116) in y
        let tl = found[0].quad[0];
        assert!((tl - Point2::new(25.5, 35.5)).norm() < 2.0, "{tl:?}");
    }

    #[test]
    fn coarse_levels_report_full_resolution_corners() {
        let img = two_markers();
        let markers = registry(&[12]);
        let found = run(&img, &markers, 1);
        assert_eq!(found.len(), 1);
        let tl = found[0].quad[0];
        assert!((tl - Point2::new(185.5, 35.5)).norm() < 3.0, "{tl:?}");
    }

    #[test]
    fn unregistered_codes_match_nothing() {
        let img = two_markers();
        let markers = registry(&[7]);
        assert!(run(&img, &markers, 0).is_empty());
    }

    #[test]
    fn small_contours_are_skipped() {
        let params = ScanParams::default();
        let mut mask = GrayImage::new(40, 40);
        for y in 10..14 {
            for x in 10..14 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let tree = ContourTree::from_mask(&mask);
        let node = &tree.nodes[0];
        assert!(candidate_quad(node, 1.0, &params).is_none());
        assert!(candidate_quad(node, 4.0, &params).is_some());
    }
}
