use candle_core::{DType, Device, Tensor};
use candle_nn::Module;

use crate::pixel_buffer::{PixelBuffer, RGB_CHANNELS};

/// Inference engine producing raw YOLOv5 predictions.
///
/// The engine receives the square, letterboxed and resized model input and
/// returns the flat prediction records of every image in the batch, back to back.
pub trait InferenceEngine {
    /// Engine specific error.
    type Error: std::fmt::Display;

    /// Run the model on `input`.
    fn infer(&self, input: &PixelBuffer) -> Result<Vec<f32>, Self::Error>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for &E {
    type Error = E::Error;

    fn infer(&self, input: &PixelBuffer) -> Result<Vec<f32>, Self::Error> {
        (**self).infer(input)
    }
}

/// Inference engine backed by a candle module.
///
/// The module receives a `(1, 3, H, W)` tensor scaled to `[0, 1]` and must
/// return the `(B, N, 5 + C)` prediction tensor.
pub struct CandleEngine<M: Module> {
    module: M,
    device: Device,
    dtype: DType,
}

impl<M: Module> CandleEngine<M> {
    /// Create an engine running `module` in f32 on `device`.
    pub fn new(module: M, device: Device) -> Self {
        Self {
            module,
            device,
            dtype: DType::F32,
        }
    }

    /// Run the module in another float precision, e.g. `DType::F16`.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Device the module runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    fn to_tensor(&self, input: &PixelBuffer) -> candle_core::Result<Tensor> {
        let (width, height) = (input.width(), input.height());
        Tensor::from_vec(
            input.as_slice().to_vec(),
            (1, height, width, RGB_CHANNELS),
            &self.device,
        )?
        .permute((0, 3, 1, 2))?
        .contiguous()?
        .to_dtype(DType::F32)?
        .affine(1. / 255., 0.)?
        .to_dtype(self.dtype)
    }
}

impl<M: Module> InferenceEngine for CandleEngine<M> {
    type Error = candle_core::Error;

    fn infer(&self, input: &PixelBuffer) -> Result<Vec<f32>, Self::Error> {
        let image_t = self.to_tensor(input)?;
        let pred = self.module.forward(&image_t)?;
        tracing::debug!(shape = ?pred.dims(), "candle forward");
        pred.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()
    }
}
