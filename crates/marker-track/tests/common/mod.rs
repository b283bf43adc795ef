//! Synthetic scenes for the integration tests.
#![allow(dead_code)]

use image::{GrayImage, Luma, RgbImage};
use marker_track::codes::encode_square;
use marker_track::core::geometry::rotate;
use nalgebra::{Point2, Vector2};

const SUPERSAMPLE: u32 = 4;

/// Placement of a square marker's ring in the image.
#[derive(Clone, Copy, Debug)]
pub struct Pose {
    pub center: Point2<f32>,
    /// Outer side of the ring in pixels.
    pub side: f32,
    /// Clockwise on screen, radians.
    pub angle: f32,
}

impl Pose {
    /// Ring corners clockwise from the marker's top-left.
    pub fn corners(&self) -> [Point2<f32>; 4] {
        let h = self.side / 2.0;
        [(-h, -h), (h, -h), (h, h), (-h, h)]
            .map(|(x, y)| self.center + rotate(Vector2::new(x, y), self.angle))
    }
}

/// White `width × height` scene with square code `id` drawn at `pose`,
/// anti-aliased by averaging 4×4 samples per pixel.
pub fn square_scene(width: u32, height: u32, id: u32, pose: &Pose) -> GrayImage {
    let grid = encode_square(id).expect("valid id");
    let cell = pose.side / grid.len() as f32;
    let light_at = |p: Point2<f32>| -> bool {
        let half = Vector2::new(pose.side / 2.0, pose.side / 2.0);
        let local = rotate(p - pose.center, -pose.angle) + half;
        let (c, r) = ((local.x / cell).floor(), (local.y / cell).floor());
        if c < 0.0 || r < 0.0 || c >= grid.len() as f32 || r >= grid.len() as f32 {
            return true;
        }
        grid[r as usize][c as usize]
    };

    let n = SUPERSAMPLE * SUPERSAMPLE;
    GrayImage::from_fn(width, height, |x, y| {
        let mut light = 0;
        for i in 0..SUPERSAMPLE {
            for j in 0..SUPERSAMPLE {
                let p = Point2::new(
                    x as f32 - 0.5 + (i as f32 + 0.5) / SUPERSAMPLE as f32,
                    y as f32 - 0.5 + (j as f32 + 0.5) / SUPERSAMPLE as f32,
                );
                if light_at(p) {
                    light += 1;
                }
            }
        }
        Luma([(255 * light / n) as u8])
    })
}

/// Paint `[x0, x1) × [y0, y1)` black.
pub fn occlude(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) {
    for y in y0..y1.min(img.height()) {
        for x in x0..x1.min(img.width()) {
            img.put_pixel(x, y, Luma([0]));
        }
    }
}

/// Interleaved RGB bytes of a gray image.
pub fn rgb_bytes(gray: &GrayImage) -> Vec<u8> {
    image::DynamicImage::ImageLuma8(gray.clone()).to_rgb8().into_raw()
}

pub fn to_rgb(gray: &GrayImage) -> RgbImage {
    image::DynamicImage::ImageLuma8(gray.clone()).to_rgb8()
}

/// Largest distance between matching corners.
pub fn max_corner_error(found: &[[f32; 2]; 4], expected: &[Point2<f32>; 4]) -> f32 {
    found
        .iter()
        .zip(expected)
        .map(|(f, e)| (Point2::new(f[0], f[1]) - e).norm())
        .fold(0.0, f32::max)
}
