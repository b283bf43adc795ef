//! Registered markers: identity, last known corners and per-frame updates.

use std::fmt;

use image::RgbImage;
use marker_track_codes::sampling::{border_cells, grid_cell_centers};
use marker_track_codes::square::GRID_SIZE;
use marker_track_codes::{
    assumed_rotation, decode_square, read_rotation, CodeError, DecodeError, RotationHysteresis,
    MAX_SQUARE_ID,
};
use marker_track_core::{refine_corner, sample_rgb_mean_3x3, GrayImageView, Polarity};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::corner::{Corner, FrameView};
use crate::detector::{DetectorParams, TrackFailure, TrackingParams};
use crate::predictor::{CornerPredictor, CornerSlots};

/// Stable identity of a registered marker.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerId {
    Square(u32),
    Qr(String),
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerId::Square(id) => write!(f, "sq{id}"),
            MarkerId::Qr(name) => write!(f, "QR {name}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MarkerKind {
    /// Dark ring with a 5×5 grid code.
    Square,
    /// Light square with finder patterns on a dark background.
    Qr { hysteresis: RotationHysteresis },
}

/// A decoded quad that belongs to a different marker.
#[derive(Clone, Debug, PartialEq)]
pub struct Hint {
    pub id: MarkerId,
    /// Re-rooted at that marker's top-left corner.
    pub quad: [Point2<f32>; 4],
}

/// Verdict of a marker on one scanned quad.
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// The quad is this marker, re-rooted at its top-left corner.
    Matched {
        quad: [Point2<f32>; 4],
        /// QR rotation conflict count to commit when the match is applied.
        conflicts: Option<u32>,
    },
    /// The quad decodes to another identifier.
    Hint(Hint),
    Rejected(TrackFailure),
}

/// Reported state of a found marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedMarker {
    pub id: String,
    /// Clockwise from the marker's top-left corner.
    pub corners: [[f32; 2]; 4],
    /// How many of the corners were reconstructed rather than observed.
    pub predicted: usize,
    pub last_seen: f64,
}

#[derive(Clone, Debug)]
pub struct Marker {
    id: MarkerId,
    kind: MarkerKind,
    polarity: Polarity,
    corners: Option<[Corner; 4]>,
    last_seen: f64,
    predicted_total: u64,
}

impl Marker {
    /// Square code marker carrying `id`.
    pub fn square(id: u32) -> Result<Self, CodeError> {
        if id > MAX_SQUARE_ID {
            return Err(CodeError::IdOutOfRange {
                id,
                max: MAX_SQUARE_ID,
            });
        }
        Ok(Self::with_kind(MarkerId::Square(id), MarkerKind::Square, Polarity::DarkInside))
    }

    /// QR-style marker known under `name`.
    pub fn qr(name: impl Into<String>) -> Self {
        Self::with_kind(
            MarkerId::Qr(name.into()),
            MarkerKind::Qr {
                hysteresis: RotationHysteresis::default(),
            },
            Polarity::LightInside,
        )
    }

    fn with_kind(id: MarkerId, kind: MarkerKind, polarity: Polarity) -> Self {
        Self {
            id,
            kind,
            polarity,
            corners: None,
            last_seen: f64::NEG_INFINITY,
            predicted_total: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> &MarkerId {
        &self.id
    }

    #[inline]
    pub fn kind(&self) -> &MarkerKind {
        &self.kind
    }

    #[inline]
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    #[inline]
    pub fn corners(&self) -> Option<&[Corner; 4]> {
        self.corners.as_ref()
    }

    #[inline]
    pub fn last_seen(&self) -> f64 {
        self.last_seen
    }

    /// Reconstructed corners accepted over the marker's lifetime.
    #[inline]
    pub fn predicted_total(&self) -> u64 {
        self.predicted_total
    }

    /// Corner positions, clockwise from the top-left.
    pub fn points(&self) -> Option<[Point2<f32>; 4]> {
        self.corners.as_ref().map(|c| c.each_ref().map(|c| c.p))
    }

    /// Reconstructed corners in the current position.
    pub fn predicted_count(&self) -> usize {
        self.corners
            .as_ref()
            .map_or(0, |c| c.iter().filter(|c| c.is_predicted).count())
    }

    /// Updated within the found window and not mostly reconstructed.
    pub fn is_found(&self, now: f64, params: &TrackingParams) -> bool {
        self.corners.is_some()
            && self.last_seen + params.found_window > now
            && self.predicted_count() <= params.max_predicted
    }

    pub fn tracked(&self) -> Option<TrackedMarker> {
        let points = self.points()?;
        Some(TrackedMarker {
            id: self.id.to_string(),
            corners: points.map(|p| [p.x, p.y]),
            predicted: self.predicted_count(),
            last_seen: self.last_seen,
        })
    }

    /// Decide whether the clockwise `quad` (full-resolution coordinates)
    /// shows this marker.
    pub fn classify(
        &self,
        img: &GrayImageView<'_>,
        quad: &[Point2<f32>; 4],
        now: f64,
        params: &DetectorParams,
    ) -> Classification {
        match &self.kind {
            MarkerKind::Square => {
                match decode_square(img, quad, params.flip_horizontal, &params.square) {
                    Ok(d) if MarkerId::Square(d.id) == self.id => Classification::Matched {
                        quad: d.quad,
                        conflicts: None,
                    },
                    Ok(d) => Classification::Hint(Hint {
                        id: MarkerId::Square(d.id),
                        quad: d.quad,
                    }),
                    Err(e) => Classification::Rejected(e.into()),
                }
            }
            MarkerKind::Qr { hysteresis } => {
                let reading = match read_rotation(img, quad, &params.qr) {
                    Ok(r) => r,
                    Err(e) => return Classification::Rejected(e.into()),
                };
                let assumed = self
                    .points()
                    .filter(|_| self.is_found(now, &params.tracking))
                    .and_then(|prev| {
                        assumed_rotation(&reading.quad, &prev, params.qr.max_assumed_distance)
                    });
                match hysteresis.resolve(reading.rotation, assumed, params.qr.conflict_threshold) {
                    Some((rotation, conflicts)) => Classification::Matched {
                        quad: std::array::from_fn(|i| reading.quad[(i + rotation) % 4]),
                        conflicts: Some(conflicts),
                    },
                    None => Classification::Rejected(DecodeError::RotationAmbiguous.into()),
                }
            }
        }
    }

    /// A hint can be taken by the marker it names, unless that marker was
    /// already placed on this frame.
    pub fn accepts_hint(&self, hint: &Hint, now: f64) -> bool {
        hint.id == self.id && self.last_seen != now
    }

    /// Place the marker on a scanned quad found on pyramid level `scale`.
    pub fn set_position_from_points(
        &mut self,
        quad: &[Point2<f32>; 4],
        scale: usize,
        frame: &FrameView<'_>,
        params: &DetectorParams,
    ) {
        let view = frame.gray_view();
        let half_window = params.scan.half_window_for(scale);
        let refined = quad.map(|p| refine_corner(&view, p, half_window, &params.subpix));
        let mut ring = Corner::ring(&refined, frame.time, self.polarity);
        for (i, c) in ring.iter_mut().enumerate() {
            if let Some(old) = &self.corners {
                c.compute_change(&old[i], &params.corner);
            }
            c.diag = refined[(i + 2) % 4] - refined[i];
            c.sample_colors(frame.rgb, &params.corner);
        }
        self.corners = Some(ring);
        self.last_seen = frame.time;
    }

    /// Apply a scan match produced by [`classify`](Self::classify).
    pub fn apply_match(
        &mut self,
        quad: &[Point2<f32>; 4],
        conflicts: Option<u32>,
        scale: usize,
        frame: &FrameView<'_>,
        params: &DetectorParams,
    ) {
        self.set_position_from_points(quad, scale, frame, params);
        if let (MarkerKind::Qr { hysteresis }, Some(n)) = (&mut self.kind, conflicts) {
            hysteresis.commit(n);
        }
    }

    /// Take a ring produced by the tracked update.
    pub fn set_position_from_corners(&mut self, ring: [Corner; 4], now: f64) {
        self.predicted_total += ring.iter().filter(|c| c.is_predicted).count() as u64;
        self.corners = Some(ring);
        self.last_seen = now;
    }

    /// Follow the marker from its previous corners without a global
    /// detection.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(id = %self.id)))]
    pub fn find_corners(
        &mut self,
        frame: &FrameView<'_>,
        params: &DetectorParams,
    ) -> Result<(), TrackFailure> {
        let old = self.corners.as_ref().ok_or(TrackFailure::NotTracked)?;
        let age = frame.time - self.last_seen;
        if age >= params.tracking.max_seen {
            return Err(TrackFailure::Stale { age });
        }

        let candidates: CornerSlots =
            std::array::from_fn(|i| old[i].best_candidate(frame, &params.corner));
        log::trace!(
            "{}: candidates for {} corners",
            self.id,
            candidates.iter().filter(|c| c.is_some()).count()
        );
        let ring = CornerPredictor::new(
            old,
            frame,
            &params.corner,
            &params.predictor,
            &params.subpix,
        )
        .predict(candidates)?;

        let correctness = self.code_correctness(frame.rgb, &ring, params);
        if correctness <= params.tracking.min_code_correctness {
            return Err(TrackFailure::LowCorrectness {
                correctness,
                min: params.tracking.min_code_correctness,
            });
        }
        self.set_position_from_corners(ring, frame.time);
        Ok(())
    }

    /// Share of border cells whose color still matches the recorded dark
    /// color interpolated between the corners.
    ///
    /// Cells outside the image are not counted. QR markers carry no border
    /// cells and always pass.
    pub fn code_correctness(
        &self,
        rgb: &RgbImage,
        ring: &[Corner; 4],
        params: &DetectorParams,
    ) -> f32 {
        if !matches!(self.kind, MarkerKind::Square) {
            return 1.0;
        }
        let known: Vec<[u8; 3]> = ring.iter().filter_map(|c| c.color_black).collect();
        if known.is_empty() {
            return 1.0;
        }
        let mut sum = [0u32; 3];
        for c in &known {
            for (s, v) in sum.iter_mut().zip(c) {
                *s += *v as u32;
            }
        }
        let fallback = sum.map(|s| (s / known.len() as u32) as u8);
        let colors = ring.each_ref().map(|c| c.color_black.unwrap_or(fallback));

        let quad = ring.each_ref().map(|c| c.p);
        let Ok(centers) = grid_cell_centers(&quad, GRID_SIZE) else {
            return 0.0;
        };
        let per_side = GRID_SIZE - 1;
        let (mut good, mut total) = (0usize, 0usize);
        for (k, (r, c)) in border_cells(GRID_SIZE).into_iter().enumerate() {
            let side = k / per_side;
            let t = (k % per_side) as f32 / per_side as f32;
            let (a, b) = (colors[side], colors[(side + 1) % 4]);
            let p = centers[r * GRID_SIZE + c];
            let Some(sample) = sample_rgb_mean_3x3(rgb, p.x, p.y) else {
                continue;
            };
            total += 1;
            let matches = (0..3).all(|ch| {
                let expected = a[ch] as f32 + (b[ch] as f32 - a[ch] as f32) * t;
                (sample[ch] as f32 - expected).abs() <= params.corner.max_color_difference as f32
            });
            if matches {
                good += 1;
            }
        }
        if total == 0 {
            1.0
        } else {
            good as f32 / total as f32
        }
    }
}
