//! Orientation of QR-style targets from finder-pattern run lengths.
//!
//! A target is a light square (quiet zone plus symbol) on a dark
//! background. Three of its corners hold finder patterns, so a scan line
//! entering the symbol through such a corner crosses the runs
//! `light, dark 1, light 1, dark 3, light 1, dark 1` (in modules). Six lines
//! are sampled (both diagonals and four edge-parallel lines at a quarter of
//! the side), each read from both ends, and every end that starts with a
//! finder pattern votes for its corner. The corner without a finder is the
//! bottom-right one.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use marker_track_core::geometry::dist_sq;
use marker_track_core::{binarize_samples, get_gray, refine_corner, GrayImageView, SubPixParams};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::sampling::line_points;
use crate::{CodeError, DecodeError};

/// Modules of light quiet zone around the symbol.
const QUIET_MODULES: u32 = 5;
/// Modules per side of the symbol (version 3).
const SYMBOL_MODULES: u32 = 29;
/// Dark background modules around the quiet zone in rendered targets.
const BACKGROUND_MODULES: u32 = 4;
const FINDER_MODULES: u32 = 7;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QrParams {
    /// Sum of squared corner displacements up to which the previous pose
    /// yields an assumed rotation.
    pub max_assumed_distance: f32,
    /// Tolerated fraction of wrong-tone samples on the border lines.
    pub border_accuracy: f32,
    /// Consecutive disagreeing frames during which the assumed rotation
    /// still wins over the calculated one.
    pub conflict_threshold: u32,
    /// Minimum number of pixels on each scan line.
    pub min_line_length: usize,
    /// Offset of the border lines from the quad edges, as a fraction of the
    /// diagonals.
    pub border_offset: f32,
    /// Position of the edge-parallel scan lines, as a fraction of the side.
    pub edge_line_offset: f32,
    /// Half window of the sub-pixel refinement applied before sampling.
    pub refine_half_window: u32,
}

impl Default for QrParams {
    fn default() -> Self {
        Self {
            max_assumed_distance: 32.0 * 32.0 * 4.0,
            border_accuracy: 0.25,
            conflict_threshold: 3,
            min_line_length: 48,
            border_offset: 2.0 / 32.0,
            edge_line_offset: 0.25,
            refine_half_window: 2,
        }
    }
}

/// Raw evidence read from one quadrilateral.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QrReading {
    /// Finder-pattern votes per corner of the refined quad.
    pub votes: [u8; 4],
    /// Rotation implied by the votes, `None` when they are ambiguous.
    pub rotation: Option<usize>,
    /// Input quad after sub-pixel refinement.
    pub quad: [Point2<f32>; 4],
}

/// One light/dark run along a scan line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    pub light: bool,
    pub len: usize,
}

/// Collapse binarized samples into runs.
pub fn compress_runs(line: &[bool]) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for &light in line {
        match runs.last_mut() {
            Some(run) if run.light == light => run.len += 1,
            _ => runs.push(Run { light, len: 1 }),
        }
    }
    runs
}

/// True when a line of `total` pixels enters the symbol through a finder
/// pattern.
pub fn starts_with_finder(runs: &[Run], total: usize) -> bool {
    if runs.len() < 8 {
        return false;
    }
    let mut runs = runs;
    if !runs[0].light && runs[0].len < 3 {
        runs = &runs[1..];
    }
    let first = runs[0];
    if !first.light || first.len < 4 * total / 32 || first.len > total / 5 {
        return false;
    }
    let head: usize = runs[..6].iter().map(|r| r.len).sum();
    if head > 5 * total / 11 {
        return false;
    }
    let center = runs[3].len;
    [1, 2, 4, 5].iter().all(|&i| runs[i].len <= center)
}

/// Rotation implied by per-corner votes.
///
/// Three consecutive corners (cyclically) must score above the minimum; the
/// corner after them is the bottom-right one, so the corner after that is
/// the top-left.
pub fn rotation_from_votes(votes: &[u8; 4]) -> Option<usize> {
    let min = *votes.iter().min()?;
    let mut count = 0;
    for i in 0..7 {
        count = if votes[i % 4] > min { count + 1 } else { 0 };
        if count == 3 {
            return Some((i + 3) % 4);
        }
    }
    None
}

/// Rotation of `quad` that best matches the previous corner positions.
///
/// `None` when even the best re-rooting moves the corners by more than
/// `max_distance` (sum of squared displacements).
pub fn assumed_rotation(
    quad: &[Point2<f32>; 4],
    previous: &[Point2<f32>; 4],
    max_distance: f32,
) -> Option<usize> {
    (0..4)
        .map(|r| {
            let d: f32 = (0..4).map(|j| dist_sq(quad[(j + r) % 4], previous[j])).sum();
            (r, d)
        })
        .filter(|&(_, d)| d < max_distance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(r, _)| r)
}

/// Counts consecutive frames in which the calculated rotation disagreed with
/// the rotation assumed from the previous pose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RotationHysteresis {
    pub conflicts: u32,
}

impl RotationHysteresis {
    /// Pick a rotation and the conflict count to commit if it is used.
    ///
    /// Without an assumption the calculated rotation is taken as is, and
    /// vice versa. On disagreement the assumed rotation wins until more
    /// than `threshold` conflicts have accumulated; agreement resets the
    /// count.
    pub fn resolve(
        &self,
        calculated: Option<usize>,
        assumed: Option<usize>,
        threshold: u32,
    ) -> Option<(usize, u32)> {
        match (calculated, assumed) {
            (None, None) => None,
            (None, Some(a)) => Some((a, self.conflicts)),
            (Some(c), None) => Some((c, self.conflicts)),
            (Some(c), Some(a)) if c == a => Some((c, 0)),
            (Some(c), Some(a)) => {
                let conflicts = self.conflicts + 1;
                if conflicts <= threshold {
                    Some((a, conflicts))
                } else {
                    Some((c, conflicts))
                }
            }
        }
    }

    pub fn commit(&mut self, conflicts: u32) {
        self.conflicts = conflicts;
    }
}

/// Refine `quad`, sample the scan and border lines, and vote on the
/// rotation.
pub fn read_rotation(
    img: &GrayImageView<'_>,
    quad: &[Point2<f32>; 4],
    params: &QrParams,
) -> Result<QrReading, DecodeError> {
    let subpix = SubPixParams {
        max_iterations: 10,
        epsilon: 0.01,
    };
    let r: [Point2<f32>; 4] =
        std::array::from_fn(|i| refine_corner(img, quad[i], params.refine_half_window, &subpix));

    // (start, end, corner voted from start, corner voted from end)
    let along = |a: usize, b: usize, f: f32| r[a] + (r[b] - r[a]) * f;
    let f = params.edge_line_offset;
    let lines = [
        (r[0], r[2], 0, 2),
        (r[1], r[3], 1, 3),
        (along(0, 1, f), along(3, 2, f), 0, 3),
        (along(1, 0, f), along(2, 3, f), 1, 2),
        (along(0, 3, f), along(1, 2, f), 0, 1),
        (along(3, 0, f), along(2, 1, f), 3, 2),
    ];

    let mut values: Vec<u8> = Vec::new();
    let mut lengths = Vec::with_capacity(lines.len());
    for &(p1, p2, _, _) in &lines {
        let pts = line_points(p1, p2);
        if pts.len() < params.min_line_length {
            return Err(DecodeError::LineTooShort {
                len: pts.len(),
                min: params.min_line_length,
            });
        }
        values.extend(pts.iter().map(|&(x, y)| get_gray(img, x, y)));
        lengths.push(pts.len());
    }

    let outer = border_samples(img, &r, params.border_offset);
    let inner = border_samples(img, &r, -params.border_offset);
    let n_lines = values.len();
    let n_outer = outer.len();
    values.extend(outer);
    values.extend(inner);
    let bits = binarize_samples(&values);

    let outer_bits = &bits[n_lines..n_lines + n_outer];
    let inner_bits = &bits[n_lines + n_outer..];
    let outer_light = outer_bits.iter().filter(|&&b| b).count();
    if outer_light as f32 > params.border_accuracy * outer_bits.len() as f32 {
        return Err(DecodeError::MissingOuterBorder);
    }
    let inner_light = inner_bits.iter().filter(|&&b| b).count();
    if (inner_light as f32) < (1.0 - params.border_accuracy) * inner_bits.len() as f32 {
        return Err(DecodeError::MissingQuietZone);
    }

    let mut votes = [0u8; 4];
    let mut offset = 0;
    for (&(_, _, from_start, from_end), &len) in lines.iter().zip(&lengths) {
        let line = &bits[offset..offset + len];
        offset += len;
        let mut runs = compress_runs(line);
        if starts_with_finder(&runs, len) {
            votes[from_start] += 1;
        }
        runs.reverse();
        if starts_with_finder(&runs, len) {
            votes[from_end] += 1;
        }
    }
    log::trace!("qr votes {votes:?}");

    Ok(QrReading {
        votes,
        rotation: rotation_from_votes(&votes),
        quad: r,
    })
}

/// Gray samples along the four quad edges pushed outward (`offset > 0`) or
/// inward (`offset < 0`) along the diagonals. Pixels outside the image are
/// skipped.
fn border_samples(img: &GrayImageView<'_>, r: &[Point2<f32>; 4], offset: f32) -> Vec<u8> {
    let d02 = r[2] - r[0];
    let d13 = r[3] - r[1];
    // Each corner moves away from the opposite one.
    let moved = [
        r[0] - d02 * offset,
        r[1] - d13 * offset,
        r[2] + d02 * offset,
        r[3] + d13 * offset,
    ];
    let mut out = Vec::new();
    for k in 0..4 {
        for (x, y) in line_points(moved[k], moved[(k + 1) % 4]) {
            if x >= 0 && y >= 0 && (x as usize) < img.width && (y as usize) < img.height {
                out.push(get_gray(img, x, y));
            }
        }
    }
    out
}

/// Printable target: dark background, light quiet zone and a symbol with
/// finder patterns in three corners and a dark center module.
///
/// The light square starts `4 * module_px` pixels from the image edge and
/// is `39 * module_px` pixels wide.
pub fn render_qr_target(module_px: u32) -> Result<GrayImage, CodeError> {
    if module_px == 0 {
        return Err(CodeError::ZeroCellSize);
    }
    let m = module_px;
    let light_side = SYMBOL_MODULES + 2 * QUIET_MODULES;
    let side = (light_side + 2 * BACKGROUND_MODULES) * m;
    let mut img = GrayImage::from_pixel(side, side, Luma([0]));

    let at = |modules: u32| (modules * m) as i32;
    draw_filled_rect_mut(
        &mut img,
        Rect::at(at(BACKGROUND_MODULES), at(BACKGROUND_MODULES))
            .of_size(light_side * m, light_side * m),
        Luma([255]),
    );

    let origin = BACKGROUND_MODULES + QUIET_MODULES;
    let far = origin + SYMBOL_MODULES - FINDER_MODULES;
    for (fx, fy) in [(origin, origin), (far, origin), (origin, far)] {
        draw_filled_rect_mut(&mut img, Rect::at(at(fx), at(fy)).of_size(7 * m, 7 * m), Luma([0]));
        draw_filled_rect_mut(
            &mut img,
            Rect::at(at(fx + 1), at(fy + 1)).of_size(5 * m, 5 * m),
            Luma([255]),
        );
        draw_filled_rect_mut(
            &mut img,
            Rect::at(at(fx + 2), at(fy + 2)).of_size(3 * m, 3 * m),
            Luma([0]),
        );
    }
    let center = origin + SYMBOL_MODULES / 2;
    draw_filled_rect_mut(&mut img, Rect::at(at(center), at(center)).of_size(m, m), Luma([0]));
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: u32 = 4;

    fn target_quad() -> [Point2<f32>; 4] {
        let lo = (BACKGROUND_MODULES * MODULE) as f32;
        let hi = lo + ((SYMBOL_MODULES + 2 * QUIET_MODULES) * MODULE) as f32 - 1.0;
        [
            Point2::new(lo, lo),
            Point2::new(hi, lo),
            Point2::new(hi, hi),
            Point2::new(lo, hi),
        ]
    }

    #[test]
    fn rendered_target_votes_for_three_finder_corners() {
        let img = render_qr_target(MODULE).expect("render");
        let reading =
            read_rotation(&GrayImageView::from(&img), &target_quad(), &QrParams::default())
                .expect("reads");
        assert_eq!(reading.votes, [3, 3, 0, 3]);
        assert_eq!(reading.rotation, Some(0));
    }

    #[test]
    fn rotated_target_reports_rotation() {
        let img = image::imageops::rotate90(&render_qr_target(MODULE).expect("render"));
        let reading =
            read_rotation(&GrayImageView::from(&img), &target_quad(), &QrParams::default())
                .expect("reads");
        assert_eq!(reading.rotation, Some(1));
    }

    #[test]
    fn uniform_patch_has_no_quiet_zone() {
        let img = GrayImage::from_pixel(200, 200, Luma([0]));
        let res = read_rotation(&GrayImageView::from(&img), &target_quad(), &QrParams::default());
        assert_eq!(res, Err(DecodeError::MissingQuietZone));
    }

    #[test]
    fn finder_runs_are_recognised() {
        let l = 160;
        let mut line = vec![true; 20];
        for (light, n) in [(false, 4), (true, 4), (false, 12), (true, 4), (false, 4)] {
            line.extend(std::iter::repeat_n(light, n));
        }
        line.extend(std::iter::repeat_n(true, 30));
        line.extend(std::iter::repeat_n(false, 10));
        line.resize(l, true);
        let runs = compress_runs(&line);
        assert!(starts_with_finder(&runs, l));

        let mut reversed = runs.clone();
        reversed.reverse();
        assert!(!starts_with_finder(&reversed, l));
        assert!(!starts_with_finder(&runs[..6], l));
    }

    #[test]
    fn votes_pick_the_corner_after_the_gap() {
        assert_eq!(rotation_from_votes(&[3, 3, 0, 3]), Some(0));
        assert_eq!(rotation_from_votes(&[3, 0, 3, 3]), Some(3));
        assert_eq!(rotation_from_votes(&[0, 3, 3, 3]), Some(2));
        assert_eq!(rotation_from_votes(&[2, 2, 2, 2]), None);
        assert_eq!(rotation_from_votes(&[3, 0, 3, 0]), None);
    }

    #[test]
    fn assumed_rotation_follows_the_previous_pose() {
        let prev = target_quad();
        let shifted = prev.map(|p| p + nalgebra::Vector2::new(3.0, -2.0));
        let rerooted = [shifted[3], shifted[0], shifted[1], shifted[2]];
        assert_eq!(assumed_rotation(&rerooted, &prev, 4096.0), Some(1));
        let far = prev.map(|p| p + nalgebra::Vector2::new(100.0, 0.0));
        assert_eq!(assumed_rotation(&far, &prev, 4096.0), None);
    }

    #[test]
    fn a_single_conflict_keeps_the_assumed_rotation() {
        let mut h = RotationHysteresis::default();
        for frame in 1..=3 {
            let (rot, conflicts) = h.resolve(Some(2), Some(0), 3).expect("rotation");
            assert_eq!(rot, 0, "frame {frame}");
            h.commit(conflicts);
        }
        let (rot, conflicts) = h.resolve(Some(2), Some(0), 3).expect("rotation");
        assert_eq!((rot, conflicts), (2, 4));
        h.commit(conflicts);

        let (rot, conflicts) = h.resolve(Some(2), Some(2), 3).expect("rotation");
        assert_eq!((rot, conflicts), (2, 0));
        assert_eq!(h.resolve(None, None, 3), None);
        assert_eq!(h.resolve(None, Some(1), 3), Some((1, 4)));
    }
}
