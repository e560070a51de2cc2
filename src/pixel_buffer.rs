use kornia_image::{Image, ImageSize};
use serde::Serialize;

use crate::detector::DetectorError;

/// Number of bytes per RGB pixel.
pub const RGB_CHANNELS: usize = 3;

/// Integer rectangle with half-open containment.
///
/// A point `(x, y)` is inside when `xmin <= x < xmax` and `ymin <= y < ymax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rect {
    /// Minimum x coordinate.
    pub xmin: i32,
    /// Minimum y coordinate.
    pub ymin: i32,
    /// Maximum x coordinate.
    pub xmax: i32,
    /// Maximum y coordinate.
    pub ymax: i32,
}

impl Rect {
    /// Create a rectangle from two corners, swapping coordinates so that min <= max.
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            xmin: x0.min(x1),
            ymin: y0.min(y1),
            xmax: x0.max(x1),
            ymax: y0.max(y1),
        }
    }

    /// Rectangle at the origin with the given size.
    pub fn from_size(width: usize, height: usize) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Width of the rectangle.
    pub fn width(&self) -> usize {
        (self.xmax - self.xmin) as usize
    }

    /// Height of the rectangle.
    pub fn height(&self) -> usize {
        (self.ymax - self.ymin) as usize
    }

    /// Whether the rectangle has no area.
    pub fn is_empty(&self) -> bool {
        self.xmin >= self.xmax || self.ymin >= self.ymax
    }

    /// Whether the point lies inside the rectangle.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.xmin <= x && x < self.xmax && self.ymin <= y && y < self.ymax
    }

    /// Intersection of two rectangles, empty if they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
        };
        if r.is_empty() { Rect::default() } else { r }
    }
}

/// Packed RGB8 pixel store with an explicit row stride and bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pixels: Vec<u8>,
    stride: usize,
    bounds: Rect,
}

impl PixelBuffer {
    /// Allocate a black buffer covering `bounds`.
    pub fn new(bounds: Rect) -> Self {
        let stride = RGB_CHANNELS * bounds.width();
        Self {
            pixels: vec![0; stride * bounds.height()],
            stride,
            bounds,
        }
    }

    /// Allocate a black buffer of the given size anchored at the origin.
    pub fn from_size(width: usize, height: usize) -> Self {
        Self::new(Rect::from_size(width, height))
    }

    /// Wrap packed RGB8 pixels of the given size.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, DetectorError> {
        let expected = RGB_CHANNELS * width * height;
        if pixels.len() != expected {
            return Err(DetectorError::InvalidShape(format!(
                "expected {expected} bytes for a {width}x{height} rgb buffer, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            stride: RGB_CHANNELS * width,
            bounds: Rect::from_size(width, height),
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.bounds.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.bounds.height()
    }

    /// Bytes between vertically adjacent pixels.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bounds of the buffer.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Raw pixel bytes in R, G, B order.
    pub fn as_slice(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable raw pixel bytes in R, G, B order.
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Consume the buffer and return its pixel bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.pixels
    }

    /// Index of the first byte of the pixel at `(x, y)`.
    ///
    /// The point must lie inside the bounds.
    pub fn pix_offset(&self, x: i32, y: i32) -> usize {
        (y - self.bounds.ymin) as usize * self.stride
            + (x - self.bounds.xmin) as usize * RGB_CHANNELS
    }

    /// Color of the pixel at `(x, y)`, black outside the bounds.
    pub fn get(&self, x: i32, y: i32) -> [u8; 3] {
        if !self.bounds.contains(x, y) {
            return [0; 3];
        }
        let i = self.pix_offset(x, y);
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    /// Set the pixel at `(x, y)`. Points outside the bounds are ignored.
    pub fn set(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if !self.bounds.contains(x, y) {
            return;
        }
        let i = self.pix_offset(x, y);
        self.pixels[i..i + RGB_CHANNELS].copy_from_slice(&color);
    }

    /// Copy the pixels inside `rect` into a new buffer with the same bounds as `rect`.
    ///
    /// Parts of `rect` outside this buffer stay black.
    pub fn crop(&self, rect: Rect) -> PixelBuffer {
        let mut dst = PixelBuffer::new(rect);
        dst.copy_from(self, (rect.xmin, rect.ymin), rect);
        dst
    }

    /// Copy the `src_rect` area of `src` so that its top-left corner lands on `dst_origin`.
    ///
    /// The copied area is clipped against both buffers.
    pub fn copy_from(&mut self, src: &PixelBuffer, dst_origin: (i32, i32), src_rect: Rect) {
        let dx = dst_origin.0 - src_rect.xmin;
        let dy = dst_origin.1 - src_rect.ymin;
        let src_rect = src_rect.intersect(&src.bounds);
        let dst_rect = Rect {
            xmin: src_rect.xmin + dx,
            ymin: src_rect.ymin + dy,
            xmax: src_rect.xmax + dx,
            ymax: src_rect.ymax + dy,
        }
        .intersect(&self.bounds);
        if dst_rect.is_empty() {
            return;
        }

        let row_len = dst_rect.width() * RGB_CHANNELS;
        for y in dst_rect.ymin..dst_rect.ymax {
            let d = self.pix_offset(dst_rect.xmin, y);
            let s = src.pix_offset(dst_rect.xmin - dx, y - dy);
            self.pixels[d..d + row_len].copy_from_slice(&src.pixels[s..s + row_len]);
        }
    }

    /// Draw a horizontal line from `x1` to `x2` inclusive.
    pub fn hline(&mut self, x1: i32, y: i32, x2: i32, color: [u8; 3]) {
        let (x1, x2) = (x1.max(self.bounds.xmin), x2.min(self.bounds.xmax - 1));
        for x in x1..=x2 {
            self.set(x, y, color);
        }
    }

    /// Draw a vertical line from `y1` to `y2` inclusive.
    pub fn vline(&mut self, x: i32, y1: i32, y2: i32, color: [u8; 3]) {
        let (y1, y2) = (y1.max(self.bounds.ymin), y2.min(self.bounds.ymax - 1));
        for y in y1..=y2 {
            self.set(x, y, color);
        }
    }

    /// Draw the unfilled outline of `rect`, including its max edges.
    pub fn draw_rect(&mut self, rect: Rect, color: [u8; 3]) {
        self.hline(rect.xmin, rect.ymin, rect.xmax, color);
        self.hline(rect.xmin, rect.ymax, rect.xmax, color);
        self.vline(rect.xmin, rect.ymin, rect.ymax, color);
        self.vline(rect.xmax, rect.ymin, rect.ymax, color);
    }

    /// Convert to a kornia rgb8 image anchored at the origin.
    pub fn to_image(&self) -> Result<Image<u8, 3>, DetectorError> {
        let size = ImageSize {
            width: self.width(),
            height: self.height(),
        };
        Ok(Image::new(size, self.pixels.clone())?)
    }
}

impl TryFrom<&Image<u8, 3>> for PixelBuffer {
    type Error = DetectorError;

    fn try_from(image: &Image<u8, 3>) -> Result<Self, Self::Error> {
        PixelBuffer::from_pixels(image.width(), image.height(), image.as_slice().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: usize, height: usize) -> PixelBuffer {
        let mut buf = PixelBuffer::from_size(width, height);
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                buf.set(x, y, [x as u8, y as u8, (x + y) as u8]);
            }
        }
        buf
    }

    #[test]
    fn test_rect_canonical() {
        let r = Rect::new(10, 20, 2, 4);
        assert_eq!(r, Rect { xmin: 2, ymin: 4, xmax: 10, ymax: 20 });
        assert_eq!(r.width(), 8);
        assert_eq!(r.height(), 16);
        assert!(r.contains(2, 4));
        assert!(!r.contains(10, 4));
    }

    #[test]
    fn test_from_pixels_size_mismatch() {
        let res = PixelBuffer::from_pixels(2, 2, vec![0; 11]);
        assert!(matches!(res, Err(DetectorError::InvalidShape(_))));
    }

    #[test]
    fn test_get_set() {
        let mut buf = PixelBuffer::from_size(4, 3);
        assert_eq!(buf.stride(), 12);
        assert_eq!(buf.as_slice().len(), 36);

        buf.set(3, 2, [1, 2, 3]);
        assert_eq!(buf.get(3, 2), [1, 2, 3]);
        assert_eq!(buf.pix_offset(3, 2), 2 * 12 + 3 * 3);

        // out of bounds reads are black and writes are dropped
        buf.set(4, 0, [9, 9, 9]);
        buf.set(-1, 0, [9, 9, 9]);
        assert_eq!(buf.get(4, 0), [0, 0, 0]);
        assert!(buf.as_slice().iter().filter(|&&v| v == 9).count() == 0);
    }

    #[test]
    fn test_offset_bounds() {
        let mut buf = PixelBuffer::new(Rect::new(10, 10, 12, 12));
        buf.set(11, 11, [5, 6, 7]);
        assert_eq!(buf.pix_offset(11, 11), 6 + 3);
        assert_eq!(buf.get(11, 11), [5, 6, 7]);
        assert_eq!(buf.get(0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_crop() {
        let buf = gradient(5, 4);
        let crop = buf.crop(Rect::new(1, 1, 3, 4));
        assert_eq!(crop.width(), 2);
        assert_eq!(crop.height(), 3);
        assert_eq!(crop.get(1, 1), [1, 1, 2]);
        assert_eq!(crop.get(2, 3), [2, 3, 5]);

        // partially outside the source
        let crop = buf.crop(Rect::new(4, 3, 6, 5));
        assert_eq!(crop.get(4, 3), [4, 3, 7]);
        assert_eq!(crop.get(5, 4), [0, 0, 0]);
    }

    #[test]
    fn test_draw_rect_clips() {
        let mut buf = PixelBuffer::from_size(4, 4);
        let green = [0, 255, 0];
        buf.draw_rect(Rect::new(1, 1, 10, 10), green);

        assert_eq!(buf.get(1, 1), green);
        assert_eq!(buf.get(3, 1), green);
        assert_eq!(buf.get(1, 3), green);
        assert_eq!(buf.get(2, 2), [0, 0, 0]);
        assert_eq!(buf.get(0, 0), [0, 0, 0]);

        let mut buf = PixelBuffer::from_size(4, 4);
        buf.draw_rect(Rect::new(-20, -20, -10, -10), green);
        assert!(buf.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_kornia_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let buf = gradient(3, 2);
        let image = buf.to_image()?;
        assert_eq!(image.width(), 3);
        assert_eq!(image.height(), 2);
        let back = PixelBuffer::try_from(&image)?;
        assert_eq!(back, buf);
        Ok(())
    }
}
