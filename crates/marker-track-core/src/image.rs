//! Borrowed gray image views and sampling helpers.

use image::{GrayImage, RgbImage};

/// Row-major 8-bit grayscale view.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl<'a> From<&'a GrayImage> for GrayImageView<'a> {
    fn from(img: &'a GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw(),
        }
    }
}

impl GrayImageView<'_> {
    #[inline]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.width.saturating_sub(1) as f32
            && y <= self.height.saturating_sub(1) as f32
    }
}

#[inline]
pub fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

/// Gray value with coordinates clamped to the image border.
#[inline]
fn get_gray_clamped(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    let x = x.clamp(0, src.width as i32 - 1);
    let y = y.clamp(0, src.height as i32 - 1);
    src.data[y as usize * src.width + x as usize]
}

/// Bilinear sample; pixel centers sit at integer coordinates.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray_clamped(src, x0, y0) as f32;
    let p10 = get_gray_clamped(src, x0 + 1, y0) as f32;
    let p01 = get_gray_clamped(src, x0, y0 + 1) as f32;
    let p11 = get_gray_clamped(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Mean of the 3×3 neighbourhood around the pixel containing `(x, y)`.
///
/// `None` when the neighbourhood leaves the image.
pub fn sample_mean_3x3(img: &GrayImageView<'_>, x: f32, y: f32) -> Option<u8> {
    let ix = x.round() as i32;
    let iy = y.round() as i32;
    if ix - 1 < 0 || iy - 1 < 0 || ix + 1 >= img.width as i32 || iy + 1 >= img.height as i32 {
        return None;
    }

    let mut sum = 0u32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            sum += get_gray(img, ix + dx, iy + dy) as u32;
        }
    }
    Some((sum / 9) as u8)
}

/// Per-channel 3×3 mean of an RGB image around `(x, y)`.
pub fn sample_rgb_mean_3x3(img: &RgbImage, x: f32, y: f32) -> Option<[u8; 3]> {
    let ix = x.round() as i64;
    let iy = y.round() as i64;
    let (w, h) = (img.width() as i64, img.height() as i64);
    if ix - 1 < 0 || iy - 1 < 0 || ix + 1 >= w || iy + 1 >= h {
        return None;
    }

    let mut sum = [0u32; 3];
    for dy in -1..=1 {
        for dx in -1..=1 {
            let px = img.get_pixel((ix + dx) as u32, (iy + dy) as u32);
            for (acc, v) in sum.iter_mut().zip(px.0) {
                *acc += v as u32;
            }
        }
    }
    Some(sum.map(|s| (s / 9) as u8))
}

/// Halve an image with a 2×2 box filter into `dst`, reusing its buffer.
///
/// Odd trailing rows/columns are dropped.
pub fn downsample_2x_into(src: &GrayImage, dst: &mut GrayImage) {
    let (w, h) = (src.width() / 2, src.height() / 2);
    if dst.dimensions() != (w, h) {
        *dst = GrayImage::new(w, h);
    }
    let sw = src.width() as usize;
    let s = src.as_raw();
    for (i, px) in dst.pixels_mut().enumerate() {
        let x = 2 * (i % w as usize);
        let y = 2 * (i / w as usize);
        let sum = s[y * sw + x] as u16
            + s[y * sw + x + 1] as u16
            + s[(y + 1) * sw + x] as u16
            + s[(y + 1) * sw + x + 1] as u16;
        px.0[0] = ((sum + 2) / 4) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn bilinear_interpolates_between_centers() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([(x * 80) as u8]));
        let view = GrayImageView::from(&img);
        assert_eq!(sample_bilinear(&view, 1.0, 0.0), 80.0);
        assert_eq!(sample_bilinear(&view, 1.5, 0.0), 120.0);
        assert_eq!(sample_bilinear(&view, 10.0, 0.0), 240.0);
    }

    #[test]
    fn patch_means_respect_bounds() {
        let img = GrayImage::from_pixel(5, 5, Luma([90]));
        let view = GrayImageView::from(&img);
        assert_eq!(sample_mean_3x3(&view, 2.0, 2.0), Some(90));
        assert_eq!(sample_mean_3x3(&view, 0.2, 2.0), None);

        let rgb = RgbImage::from_pixel(5, 5, Rgb([10, 20, 30]));
        assert_eq!(sample_rgb_mean_3x3(&rgb, 2.4, 1.6), Some([10, 20, 30]));
        assert_eq!(sample_rgb_mean_3x3(&rgb, 4.0, 1.0), None);
    }

    #[test]
    fn box_downsampling_averages_quads() {
        let img = GrayImage::from_fn(5, 4, |x, y| Luma([(x * 10 + y * 40) as u8]));
        let mut half = GrayImage::new(1, 1);
        downsample_2x_into(&img, &mut half);
        assert_eq!(half.dimensions(), (2, 2));
        assert_eq!(half.get_pixel(0, 0).0[0], 25);
        assert_eq!(half.get_pixel(1, 1).0[0], 125);
    }
}
