use crate::{
    detector::DetectorError,
    pixel_buffer::{PixelBuffer, RGB_CHANNELS, Rect},
};

/// Square canvas produced by [`PixelBuffer::letterbox`].
#[derive(Debug, Clone)]
pub struct Letterbox {
    /// The padded square image.
    pub image: PixelBuffer,
    /// Black columns added on the right.
    pub extra_x: usize,
    /// Black rows added at the bottom.
    pub extra_y: usize,
}

impl PixelBuffer {
    /// Pad the buffer with black on the right or bottom to a square of edge `max(width, height)`.
    ///
    /// No scaling happens; the source keeps its top-left placement.
    pub fn letterbox(&self) -> Letterbox {
        let (w, h) = (self.width(), self.height());
        let edge = w.max(h);
        let mut image = PixelBuffer::from_size(edge, edge);

        if w >= h {
            // rows keep their length, so the whole stream is one block at the top
            let n = self.as_slice().len();
            image.as_slice_mut()[..n].copy_from_slice(self.as_slice());
        } else {
            image.copy_from(self, (0, 0), self.bounds());
        }

        tracing::debug!(w, h, edge, "letterbox");

        Letterbox {
            image,
            extra_x: edge - w,
            extra_y: edge - h,
        }
    }

    /// Downscale a square buffer to `target` x `target` with nearest-neighbour sampling.
    ///
    /// Returns the resized buffer and the ratio `source / target` needed to map
    /// coordinates back. A buffer already at `target` or with no pixels is
    /// returned as a copy with ratio `1.0`.
    pub fn resize_nearest(&self, target: usize) -> Result<(PixelBuffer, f32), DetectorError> {
        let (w, h) = (self.width(), self.height());

        if target == w && target == h {
            return Ok((self.clone(), 1.0));
        }

        if w == 0 || h == 0 {
            return Ok((self.clone(), 1.0));
        }

        if w != h {
            return Err(DetectorError::InvalidShape(format!(
                "cannot resize a non-square {w}x{h} buffer"
            )));
        }

        if target > w {
            return Err(DetectorError::UnsupportedUpscale { size: w, target });
        }

        if target == 0 {
            return Err(DetectorError::InvalidShape(
                "resize target must be positive".to_string(),
            ));
        }

        let mut dst = PixelBuffer::new(Rect::from_size(target, target));
        let ratio = w as f32 / target as f32;

        let src_bounds = self.bounds();
        let src = self.as_slice();
        let src_stride = self.stride();
        let dst_stride = dst.stride();
        let size2 = 2 * target as u64;
        let edge = w as u64;

        for dy in 0..target {
            let sy = ((2 * dy as u64 + 1) * edge / size2) as usize;
            let mut d = dy * dst_stride;
            for dx in 0..target {
                let sx = ((2 * dx as u64 + 1) * edge / size2) as usize;
                debug_assert!(src_bounds.contains(
                    src_bounds.xmin + sx as i32,
                    src_bounds.ymin + sy as i32
                ));
                let s = sy * src_stride + sx * RGB_CHANNELS;
                let out = &mut dst.as_slice_mut()[d..d + RGB_CHANNELS];
                for (o, &v) in out.iter_mut().zip(&src[s..s + RGB_CHANNELS]) {
                    *o = ((v as u32 * 0x101) >> 8) as u8;
                }
                d += RGB_CHANNELS;
            }
        }

        tracing::debug!(source = w, target, ratio, "resize nearest");

        Ok((dst, ratio))
    }
}
