use image::{GrayImage, RgbImage};
use marker_track_core::downsample_2x_into;

use crate::corner::FrameView;
use crate::detector::DetectorError;

/// Per-frame working buffers, reused across frames.
///
/// Holds the color frame, its grayscale version and the 2× pyramid built on
/// top of it.
#[derive(Clone, Debug)]
pub struct DetectionContext {
    width: u32,
    height: u32,
    channels: usize,
    rgb: RgbImage,
    gray: GrayImage,
    /// Levels `1..=max_scale`.
    pyramid: Vec<GrayImage>,
    time: f64,
}

impl DetectionContext {
    pub fn new(
        width: u32,
        height: u32,
        channels: usize,
        max_scale: usize,
    ) -> Result<Self, DetectorError> {
        if width == 0 || height == 0 {
            return Err(DetectorError::InvalidFrameSize { width, height });
        }
        if !matches!(channels, 1 | 3 | 4) {
            return Err(DetectorError::UnsupportedChannels { channels });
        }
        let mut pyramid = Vec::with_capacity(max_scale);
        let (mut w, mut h) = (width, height);
        for _ in 0..max_scale {
            w /= 2;
            h /= 2;
            if w < 4 || h < 4 {
                break;
            }
            pyramid.push(GrayImage::new(w, h));
        }
        Ok(Self {
            width,
            height,
            channels,
            rgb: RgbImage::new(width, height),
            gray: GrayImage::new(width, height),
            pyramid,
            time: 0.0,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Expected length of a raw frame buffer.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels
    }

    /// Coarsest pyramid level available.
    #[inline]
    pub fn max_scale(&self) -> usize {
        self.pyramid.len()
    }

    /// Grayscale image of pyramid level `scale` (0 is full resolution).
    pub fn level(&self, scale: usize) -> Option<&GrayImage> {
        match scale {
            0 => Some(&self.gray),
            s => self.pyramid.get(s - 1),
        }
    }

    /// Copy a packed 8-bit frame (gray, RGB or RGBA) into the buffers and
    /// rebuild the pyramid.
    pub fn preprocess(&mut self, frame: &[u8], time: f64) -> Result<(), DetectorError> {
        let expected = self.frame_len();
        if frame.len() != expected {
            return Err(DetectorError::InvalidFrameLength {
                expected,
                actual: frame.len(),
            });
        }
        let ch = self.channels;
        for ((src, rgb), gray) in frame
            .chunks_exact(ch)
            .zip(self.rgb.pixels_mut())
            .zip(self.gray.pixels_mut())
        {
            let [r, g, b] = if ch == 1 {
                [src[0]; 3]
            } else {
                [src[0], src[1], src[2]]
            };
            rgb.0 = [r, g, b];
            gray.0[0] = luma(r, g, b);
        }

        let mut prev = &self.gray;
        for level in self.pyramid.iter_mut() {
            downsample_2x_into(prev, level);
            prev = level;
        }
        self.time = time;
        Ok(())
    }

    /// Full-resolution view of the last preprocessed frame.
    pub fn frame(&self) -> FrameView<'_> {
        FrameView {
            gray: &self.gray,
            rgb: &self.rgb,
            time: self.time,
        }
    }
}

/// ITU-R BT.601 luma in fixed point.
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}
