use std::collections::BTreeMap;

use image::DynamicImage;
use marker_track_core::{binary_mask, ContourTree, Polarity};

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::scan::scan_level;
use super::{DetectionContext, DetectorError, DetectorParams};
use crate::marker::{Marker, MarkerId, TrackedMarker};

/// Tracks a registry of markers across a stream of frames of fixed size.
pub struct MarkerDetector {
    params: DetectorParams,
    context: DetectionContext,
    markers: BTreeMap<MarkerId, Marker>,
    last_time: Option<f64>,
}

impl MarkerDetector {
    /// Detector for `width × height` frames with 1 (gray), 3 (RGB) or 4
    /// (RGBA) interleaved 8-bit channels.
    pub fn new(
        width: u32,
        height: u32,
        channels: usize,
        params: DetectorParams,
    ) -> Result<Self, DetectorError> {
        let context = DetectionContext::new(width, height, channels, params.max_scale)?;
        Ok(Self {
            params,
            context,
            markers: BTreeMap::new(),
            last_time: None,
        })
    }

    #[inline]
    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    #[inline]
    pub fn context(&self) -> &DetectionContext {
        &self.context
    }

    pub fn add_marker(&mut self, marker: Marker) -> Result<(), DetectorError> {
        let id = marker.id().clone();
        if self.markers.contains_key(&id) {
            return Err(DetectorError::DuplicateMarker(id));
        }
        log::debug!("registered {id}");
        self.markers.insert(id, marker);
        Ok(())
    }

    pub fn remove_marker(&mut self, id: &MarkerId) -> Option<Marker> {
        self.markers.remove(id)
    }

    #[inline]
    pub fn marker(&self, id: &MarkerId) -> Option<&Marker> {
        self.markers.get(id)
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Process one frame captured at `timestamp` seconds and report the
    /// markers found on it.
    ///
    /// With `search_undetected` markers missed by the global scan are
    /// followed from their previous corners.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, frame), fields(markers = self.markers.len()))
    )]
    pub fn find_markers(
        &mut self,
        frame: &[u8],
        timestamp: f64,
        search_undetected: bool,
    ) -> Result<Vec<TrackedMarker>, DetectorError> {
        if let Some(previous) = self.last_time {
            if timestamp < previous {
                return Err(DetectorError::DecreasingTimestamp { timestamp, previous });
            }
        }
        self.context.preprocess(frame, timestamp)?;
        self.last_time = Some(timestamp);

        let mut pending: Vec<MarkerId> = self.markers.keys().cloned().collect();
        self.find_new_markers(&mut pending);
        if search_undetected {
            self.find_old_markers(&pending);
        }

        Ok(self
            .markers
            .values()
            .filter(|m| m.is_found(timestamp, &self.params.tracking))
            .filter_map(Marker::tracked)
            .collect())
    }

    /// [`find_markers`](Self::find_markers) on a decoded image, converted to
    /// the detector's channel layout.
    pub fn find_markers_in_image(
        &mut self,
        img: &DynamicImage,
        timestamp: f64,
        search_undetected: bool,
    ) -> Result<Vec<TrackedMarker>, DetectorError> {
        let (w, h) = (self.context.width(), self.context.height());
        if img.width() != w || img.height() != h {
            return Err(DetectorError::FrameSizeMismatch {
                width: w,
                height: h,
                actual_width: img.width(),
                actual_height: img.height(),
            });
        }
        let raw = match self.context.channels() {
            1 => img.to_luma8().into_raw(),
            3 => img.to_rgb8().into_raw(),
            _ => img.to_rgba8().into_raw(),
        };
        self.find_markers(&raw, timestamp, search_undetected)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    fn find_new_markers(&mut self, pending: &mut Vec<MarkerId>) {
        let frame = self.context.frame();
        let view = frame.gray_view();
        for scale in (0..=self.context.max_scale()).rev() {
            if pending.is_empty() {
                break;
            }
            let Some(level) = self.context.level(scale) else {
                continue;
            };
            let factor = (1u32 << scale) as f32;
            for polarity in [Polarity::DarkInside, Polarity::LightInside] {
                let ids: Vec<MarkerId> = pending
                    .iter()
                    .filter(|id| self.markers.get(*id).is_some_and(|m| m.polarity() == polarity))
                    .cloned()
                    .collect();
                if ids.is_empty() {
                    continue;
                }
                let mask = binary_mask(level, polarity, self.params.scan.canny);
                let tree = ContourTree::from_mask(&mask);
                let matches = scan_level(
                    &tree,
                    factor,
                    &view,
                    &self.markers,
                    &ids,
                    frame.time,
                    &self.params,
                );
                for m in matches {
                    if let Some(marker) = self.markers.get_mut(&m.id) {
                        marker.apply_match(&m.quad, m.conflicts, scale, &frame, &self.params);
                    }
                    pending.retain(|id| *id != m.id);
                }
            }
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    fn find_old_markers(&mut self, pending: &[MarkerId]) {
        let frame = self.context.frame();
        for id in pending {
            let Some(marker) = self.markers.get_mut(id) else {
                continue;
            };
            match marker.find_corners(&frame, &self.params) {
                Ok(()) => log::debug!(
                    "{id} tracked, {} corners predicted",
                    marker.predicted_count()
                ),
                Err(e) => log::debug!("{id} not tracked: {e}"),
            }
        }
    }
}
