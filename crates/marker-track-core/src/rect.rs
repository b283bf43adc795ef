//! Integer pixel rectangles and clamping to image bounds.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Smallest side a search rectangle may have after clamping.
pub const MIN_RECT_SIDE: i32 = 3;

/// Axis-aligned pixel rectangle `[x, x + width) × [y, y + height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole `width × height` image.
    pub fn image(width: usize, height: usize) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    #[inline]
    pub fn origin(&self) -> Point2<f32> {
        Point2::new(self.x as f32, self.y as f32)
    }

    /// True when `p` lies within 2 px of the left/top border or within 3 px
    /// of the right/bottom border of the rectangle.
    pub fn is_near_edge(&self, p: Point2<f32>) -> bool {
        p.x < (self.x + 2) as f32
            || p.y < (self.y + 2) as f32
            || p.x + 3.0 > (self.x + self.width) as f32
            || p.y + 3.0 > (self.y + self.height) as f32
    }
}

/// Floating point rectangle used before clamping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    /// Bounding box of a point set; `None` for an empty set.
    pub fn bounding(points: &[Point2<f32>]) -> Option<Self> {
        let (lo, hi) = crate::geometry::bounds(points)?;
        Some(Self {
            x: lo.x,
            y: lo.y,
            width: hi.x - lo.x,
            height: hi.y - lo.y,
        })
    }

    /// Grow by `pad` on every side.
    pub fn padded(self, pad: f32) -> Self {
        Self {
            x: self.x - pad,
            y: self.y - pad,
            width: self.width + 2.0 * pad,
            height: self.height + 2.0 * pad,
        }
    }

    /// Grow symmetrically so each side is at least the given size.
    pub fn at_least(mut self, min_width: f32, min_height: f32) -> Self {
        if self.width < min_width {
            self.x -= 0.5 * (min_width - self.width);
            self.width = min_width;
        }
        if self.height < min_height {
            self.y -= 0.5 * (min_height - self.height);
            self.height = min_height;
        }
        self
    }

    /// Round and clamp into a `img_w × img_h` image.
    ///
    /// Parts left of / above the image are cut, sides are raised to
    /// [`MIN_RECT_SIDE`], then cut at the right/bottom border. Fails when the
    /// rectangle starts beyond the image or is still too thin afterwards.
    pub fn clamp_to_image(self, img_w: usize, img_h: usize) -> Option<PixelRect> {
        let (w, h) = (img_w as i32, img_h as i32);
        let mut x = self.x.round() as i32;
        let mut y = self.y.round() as i32;
        let mut wx = self.width.round() as i32;
        let mut wy = self.height.round() as i32;
        if x >= w || y >= h {
            return None;
        }
        if x < 0 {
            wx += x;
            x = 0;
        }
        if y < 0 {
            wy += y;
            y = 0;
        }
        wx = wx.max(MIN_RECT_SIDE);
        wy = wy.max(MIN_RECT_SIDE);
        if x + wx > w {
            wx = w - x;
        }
        if y + wy > h {
            wy = h - y;
        }
        if wx < MIN_RECT_SIDE || wy < MIN_RECT_SIDE {
            return None;
        }
        Some(PixelRect::new(x, y, wx, wy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_partially_outside_rectangles() {
        let r = RectF {
            x: -4.2,
            y: 10.0,
            width: 20.0,
            height: 500.0,
        };
        let c = r.clamp_to_image(100, 80).expect("valid");
        assert_eq!(c, PixelRect::new(0, 10, 16, 70));
    }

    #[test]
    fn rejects_rectangles_outside_the_image() {
        let r = RectF {
            x: 120.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(r.clamp_to_image(100, 80).is_none());

        let sliver = RectF {
            x: 98.6,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(sliver.clamp_to_image(100, 80).is_none());
    }

    #[test]
    fn tiny_rectangles_are_raised_to_min_side() {
        let r = RectF {
            x: 5.0,
            y: 5.0,
            width: 0.0,
            height: 1.0,
        };
        let c = r.clamp_to_image(100, 80).expect("valid");
        assert_eq!((c.width, c.height), (MIN_RECT_SIDE, MIN_RECT_SIDE));
    }

    #[test]
    fn growth_is_symmetric() {
        let r = RectF {
            x: 10.0,
            y: 10.0,
            width: 4.0,
            height: 30.0,
        }
        .at_least(10.0, 10.0);
        assert_eq!((r.x, r.width, r.y, r.height), (7.0, 10.0, 10.0, 30.0));
    }

    #[test]
    fn edge_margins_are_asymmetric() {
        let r = PixelRect::new(10, 10, 20, 20);
        assert!(r.is_near_edge(Point2::new(11.0, 20.0)));
        assert!(!r.is_near_edge(Point2::new(12.0, 20.0)));
        assert!(r.is_near_edge(Point2::new(27.5, 20.0)));
        assert!(!r.is_near_edge(Point2::new(26.5, 20.0)));
    }
}
