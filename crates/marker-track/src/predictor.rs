//! Rebuilding a full quadrilateral from partially observed corners.
//!
//! Input is the previous frame's ring and the best candidate found for each
//! corner this frame (`None` where nothing matched). Observed corners get
//! their arms extended along the image edges and are cross-checked against
//! each other; missing corners are then reconstructed from the arms of their
//! neighbours. If the result is not a convex quad, the least similar
//! observed corner is dropped and reconstruction is retried.

use marker_track_core::geometry::{angle_between, angle_range, is_convex, rotate, solve_linear};
use marker_track_core::{
    binary_mask, external_polygons, refine_corner, PixelRect, RectF, SubPixParams,
};
use nalgebra::{Point2, Vector2};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::corner::{Corner, FrameView};
use crate::detector::{CornerParams, PredictorParams, TrackFailure};

/// Corner ring in which some slots may be unknown.
pub type CornerSlots = [Option<Corner>; 4];

#[inline]
fn next_of(i: usize) -> usize {
    (i + 1) % 4
}

#[inline]
fn prev_of(i: usize) -> usize {
    (i + 3) % 4
}

pub struct CornerPredictor<'a> {
    old: &'a [Corner; 4],
    frame: &'a FrameView<'a>,
    corner_params: &'a CornerParams,
    params: &'a PredictorParams,
    subpix: &'a SubPixParams,
    /// Largest similarity a reconstructed corner may have.
    similarity_limit: f32,
}

impl<'a> CornerPredictor<'a> {
    pub fn new(
        old: &'a [Corner; 4],
        frame: &'a FrameView<'a>,
        corner_params: &'a CornerParams,
        params: &'a PredictorParams,
        subpix: &'a SubPixParams,
    ) -> Self {
        Self {
            old,
            frame,
            corner_params,
            params,
            subpix,
            similarity_limit: params.min_similarity_tolerance,
        }
    }

    /// Produce a convex, ring-linked quad from the candidates.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn predict(&mut self, candidates: CornerSlots) -> Result<[Corner; 4], TrackFailure> {
        let mut slots = self.improve_corners(candidates);
        self.validate(&mut slots);

        let mut known: Vec<usize> = (0..4).filter(|&i| slots[i].is_some()).collect();
        known.sort_by(|&a, &b| similarity(&slots[a]).total_cmp(&similarity(&slots[b])));

        while !known.is_empty() {
            let avg =
                known.iter().map(|&i| similarity(&slots[i])).sum::<f32>() / known.len() as f32;
            self.similarity_limit = (2.0 * avg).max(self.params.min_similarity_tolerance);

            let mut attempt = slots.clone();
            self.predict_missing(&mut attempt);
            if let [Some(a), Some(b), Some(c), Some(d)] = attempt {
                let mut ring = [a, b, c, d];
                let points = ring.each_ref().map(|c| c.p);
                if is_convex(&points) {
                    for i in 0..4 {
                        ring[i].prev = points[prev_of(i)];
                        ring[i].next = points[next_of(i)];
                        ring[i].measure();
                    }
                    return Ok(ring);
                }
                log::trace!("reconstructed quad is not convex");
            }

            if let Some(worst) = known.pop() {
                log::trace!(
                    "dropping corner {worst} (similarity {:.1})",
                    similarity(&slots[worst])
                );
                slots[worst] = None;
            }
        }
        Err(TrackFailure::PredictionUnrecoverable)
    }

    /// Extend the arms of every observed corner and refine its position.
    ///
    /// A corner whose arm search fails is dropped; its previous neighbour,
    /// which may have used it as an arm end, is improved again.
    pub fn improve_corners(&self, candidates: CornerSlots) -> CornerSlots {
        let mut known = candidates;
        let mut out: CornerSlots = Default::default();
        for i in 0..4 {
            if known[i].is_none() {
                continue;
            }
            match self.improve_corner(&known, i) {
                Ok(c) => out[i] = Some(c),
                Err(e) => {
                    log::trace!("corner {i} dropped: {e}");
                    known[i] = None;
                    let p = prev_of(i);
                    if i > 0 && known[p].is_some() {
                        out[p] = self.improve_corner(&known, p).ok();
                    }
                }
            }
        }
        out
    }

    fn improve_corner(&self, known: &CornerSlots, i: usize) -> Result<Corner, TrackFailure> {
        let mut cor = known[i].clone().ok_or(TrackFailure::NotTracked)?;
        let (pi, ni) = (prev_of(i), next_of(i));

        let prev = match &known[pi] {
            Some(c) => c.p,
            None => {
                let side = (self.old[i].p - self.old[pi].p).norm();
                self.find_better_point(cor.p, cor.vp, side, self.params.wide_cone)?
            }
        };
        let next = match &known[ni] {
            Some(c) => c.p,
            None => {
                let side = (self.old[i].p - self.old[ni].p).norm();
                self.find_better_point(cor.p, cor.vn, side, self.params.wide_cone)?
            }
        };

        cor.prev = prev;
        cor.next = next;
        if !cor.is_predicted {
            cor.p = refine_corner(
                &self.frame.gray_view(),
                cor.p,
                self.params.refine_half_window,
                self.subpix,
            );
        }
        cor.measure();
        cor.compute_change(&self.old[i], self.corner_params);
        if !cor.is_compatible() {
            return Err(TrackFailure::CornerIncompatible);
        }
        Ok(cor)
    }

    /// Follow the image edge leaving `from` along `dir` up to
    /// `arm_reach × side` and return the vertex where it ends.
    pub fn find_better_point(
        &self,
        from: Point2<f32>,
        dir: Vector2<f32>,
        side: f32,
        cone: f32,
    ) -> Result<Point2<f32>, TrackFailure> {
        let dir_len = dir.norm();
        if dir_len <= 0.0 || side <= 0.0 {
            return Err(TrackFailure::CornerIncompatible);
        }
        let reach = dir * (self.params.arm_reach * side / dir_len);
        let r = self.params.capture_radius;
        let (w, h) = (self.frame.width(), self.frame.height());
        let window = RectF::bounding(&[
            from + rotate(reach, cone),
            from + rotate(reach, -cone),
            Point2::new(from.x - r, from.y - r),
            Point2::new(from.x + r, from.y + r),
        ])
        .ok_or(TrackFailure::GeometryOutOfBounds)?
        .padded(self.params.window_margin)
        .clamp_to_image(w, h)
        .ok_or(TrackFailure::GeometryOutOfBounds)?;

        let roi = self.frame.crop(&window);
        let mask = binary_mask(&roi, self.old[0].polarity, self.corner_params.canny);
        let mut arms: Vec<Vector2<f32>> = Vec::new();
        for poly in external_polygons(&mask, window.origin(), self.corner_params.polygon_epsilon) {
            let n = poly.len();
            for (k, &q) in poly.iter().enumerate() {
                if (q - from).norm() < r {
                    arms.push(poly[(k + n - 1) % n] - from);
                    arms.push(poly[(k + 1) % n] - from);
                }
            }
        }

        if arms.is_empty() {
            return Err(TrackFailure::CornerIncompatible);
        }
        if arms.len() == 2 && arms[0] == arms[1] {
            return Ok(from + dir);
        }
        let Some(best) = arms
            .into_iter()
            .min_by(|a, b| angle_between(reach, *a).total_cmp(&angle_between(reach, *b)))
        else {
            return Err(TrackFailure::CornerIncompatible);
        };
        if best.norm() + 1.0 < dir_len {
            return Ok(from + dir);
        }

        let end = from + best;
        if window.is_near_edge(end) && !PixelRect::image(w, h).is_near_edge(end) {
            // the edge runs past the window, so the hit is not a vertex
            if cone < self.params.wide_cone {
                return Err(TrackFailure::CornerIncompatible);
            }
            return self.find_better_point(from, best, 2.0 * side, self.params.narrow_cone);
        }
        Ok(end)
    }

    /// Null the less similar corner of every neighbouring pair whose arms do
    /// not point at each other.
    pub fn validate(&self, slots: &mut CornerSlots) {
        let tol = self.params.angle_tolerance_px;
        let mut invalid = [false; 4];
        for i in 0..4 {
            let j = next_of(i);
            let (Some(c1), Some(c2)) = (&slots[i], &slots[j]) else {
                continue;
            };
            let a12 = angle_between(c1.vp, c2.p - c1.p);
            let (lo1, hi1) = angle_range(c1.vp, c1.vn, tol);
            let a21 = angle_between(c2.vn, c1.p - c2.p);
            let (lo2, hi2) = angle_range(c2.vn, c2.vp, tol);
            let agree = lo1 < a12 && a12 < hi1 && lo2 < a21 && a21 < hi2;
            if !agree {
                let worse = if c1.similarity < c2.similarity { j } else { i };
                log::trace!("corners {i} and {j} disagree, dropping {worse}");
                invalid[worse] = true;
            }
        }
        for (slot, bad) in slots.iter_mut().zip(invalid) {
            if bad {
                *slot = None;
            }
        }
    }

    fn predict_missing(&self, slots: &mut CornerSlots) {
        let missing: Vec<usize> = (0..4).filter(|&i| slots[i].is_none()).collect();
        match missing.as_slice() {
            [] => {}
            [i] => self.predict_one(*i, slots),
            [a, b] if b - a == 2 => {
                self.predict_one(*a, slots);
                self.predict_one(*b, slots);
            }
            [a, b] => self.predict_neighbours(*a, *b, slots),
            [_, _, _] => {
                if let Some(a) = (0..4).find(|&i| slots[i].is_some()) {
                    self.predict_from_one(a, slots);
                }
            }
            _ => {}
        }
    }

    /// Intersect the arms of both neighbours of corner `i`.
    fn predict_one(&self, i: usize, slots: &mut CornerSlots) {
        let (bi, di) = (next_of(i), prev_of(i));
        let (Some(b), Some(d)) = (&slots[bi], &slots[di]) else {
            return;
        };
        let v1 = b.prediction_vector(true, &self.old[bi]);
        let v2 = d.prediction_vector(false, &self.old[di]);
        let Some((s, _)) = solve_linear(b.p, v1, d.p, v2) else {
            return;
        };
        let cor = self.reconstructed(d.p, b.p + v1 * s, b.p, b.time, i);
        if cor.is_compatible() && cor.similarity <= self.similarity_limit {
            slots[i] = Some(cor);
        } else {
            log::trace!("reconstructed corner {i} rejected (similarity {:.1})", cor.similarity);
        }
    }

    /// Reconstruct the adjacent corners `a` and `b` from the arms of their
    /// outer neighbours.
    fn predict_neighbours(&self, a: usize, b: usize, slots: &mut CornerSlots) {
        let (a, b) = if a == next_of(b) { (b, a) } else { (a, b) };
        let (nai, nbi) = (prev_of(a), next_of(b));
        let (Some(na), Some(nb)) = (&slots[nai], &slots[nbi]) else {
            return;
        };
        let ap = na.p + na.prediction_vector(false, &self.old[nai]);
        let bp = nb.p + nb.prediction_vector(true, &self.old[nbi]);
        let cor_a = self.reconstructed(na.p, ap, bp, na.time, a);
        let cor_b = self.reconstructed(ap, bp, nb.p, na.time, b);

        match (cor_a.is_compatible(), cor_b.is_compatible()) {
            (false, false) => {}
            (false, true) => {
                slots[b] = Some(cor_b);
                self.predict_one(a, slots);
            }
            (true, false) => {
                slots[a] = Some(cor_a);
                self.predict_one(b, slots);
            }
            (true, true) => {
                slots[a] = Some(cor_a);
                slots[b] = Some(cor_b);
            }
        }
    }

    /// Reconstruct both neighbours of the only known corner `a`, then the
    /// opposite one.
    fn predict_from_one(&self, a: usize, slots: &mut CornerSlots) {
        let Some(known) = &slots[a] else {
            return;
        };
        let (pa, na, da) = (prev_of(a), next_of(a), (a + 2) % 4);
        let old = self.old;

        let v1 = known.prediction_vector(true, &old[a]);
        let p1 = known.p + v1;
        let far_p = p1 + rotate(-v1, old[pa].angle);
        let cor_p = self.reconstructed(far_p, p1, known.p, known.time, pa);

        let v2 = known.prediction_vector(false, &old[a]);
        let p2 = known.p + v2;
        let far_n = p2 + rotate(-v2, -old[na].angle);
        let cor_n = self.reconstructed(known.p, p2, far_n, known.time, na);

        match (cor_p.is_compatible(), cor_n.is_compatible()) {
            (false, false) => {}
            (false, true) => {
                slots[na] = Some(cor_n);
                self.predict_neighbours(pa, da, slots);
            }
            (true, false) => {
                slots[pa] = Some(cor_p);
                self.predict_neighbours(na, da, slots);
            }
            (true, true) => {
                slots[pa] = Some(cor_p);
                slots[na] = Some(cor_n);
                self.predict_one(da, slots);
            }
        }
    }

    /// Predicted corner `i` at `p`, scored against its previous state.
    fn reconstructed(
        &self,
        prev: Point2<f32>,
        p: Point2<f32>,
        next: Point2<f32>,
        time: f64,
        i: usize,
    ) -> Corner {
        let mut c = Corner::new(prev, p, next, time, self.old[i].polarity);
        c.is_predicted = true;
        c.compute_change(&self.old[i], self.corner_params);
        c
    }
}

fn similarity(slot: &Option<Corner>) -> f32 {
    slot.as_ref().map_or(f32::INFINITY, |c| c.similarity)
}
