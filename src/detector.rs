use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    bounding_box::{ConfidenceOrder, non_maximum_suppression},
    decode::{PredictionLayout, decode_batch},
    detection::{Detection, annotate, rescale_detections},
    engine::InferenceEngine,
    pixel_buffer::PixelBuffer,
};

/// Detector error enum.
#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    /// Buffer with a shape the operation cannot handle.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Resize target larger than the source.
    #[error("Cannot upscale a {size}x{size} buffer to {target}x{target}")]
    UnsupportedUpscale {
        /// Edge of the source buffer.
        size: usize,
        /// Requested edge.
        target: usize,
    },

    /// Error reported by the inference engine.
    #[error("Inference engine failure: {0}")]
    EngineFailure(String),

    /// Kornia image error.
    #[error(transparent)]
    KorniaImageError(#[from] kornia_image::ImageError),
}

/// Detector configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Edge of the square model input
    pub input_size: usize,
    /// The confidence threshold for the model
    pub confidence_threshold: f32,
    /// The non-maximum suppression threshold for the model
    pub nms_threshold: f32,
    /// Shape of the raw model output
    pub layout: PredictionLayout,
    /// Confidence order used by the non-maximum suppression
    pub nms_order: ConfidenceOrder,
    /// Outline color of annotated detections
    pub annotation_color: [u8; 3],
}

/// Default configuration for a 640 YOLOv5 model.
impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            layout: PredictionLayout::default(),
            nms_order: ConfidenceOrder::Ascending,
            annotation_color: [0, 255, 0],
        }
    }
}

/// Model input produced from an image.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Letterboxed and resized square buffer.
    pub input: PixelBuffer,
    /// Black columns added on the right before resizing.
    pub extra_x: usize,
    /// Black rows added at the bottom before resizing.
    pub extra_y: usize,
    /// Letterboxed edge divided by the model input edge.
    pub scale_ratio: f32,
}

/// Letterbox `image` and resize it to the model input size.
pub fn preprocess(image: &PixelBuffer, input_size: usize) -> Result<Preprocessed, DetectorError> {
    let letterbox = image.letterbox();
    let (input, scale_ratio) = letterbox.image.resize_nearest(input_size)?;
    Ok(Preprocessed {
        input,
        extra_x: letterbox.extra_x,
        extra_y: letterbox.extra_y,
        scale_ratio,
    })
}

/// Run the full detection pipeline with a caller owned engine.
///
/// Returns one list of detections per image in the engine's batch. When
/// `annotate_image` is given and the batch holds a single image, the
/// detections are drawn onto it.
pub fn detect<E: InferenceEngine + ?Sized>(
    engine: &E,
    config: &DetectorConfig,
    image: &PixelBuffer,
    annotate_image: Option<&mut PixelBuffer>,
) -> Result<Vec<Vec<Detection>>, DetectorError> {
    // preprocess the image
    let pre = preprocess(image, config.input_size)?;

    // forward the image
    let raw = engine
        .infer(&pre.input)
        .map_err(|e| DetectorError::EngineFailure(e.to_string()))?;

    // postprocess the predictions
    Ok(postprocess_predictions(
        config,
        &raw,
        pre.scale_ratio,
        annotate_image,
    ))
}

/// Decode, suppress and rescale raw engine output.
///
/// # Panics
///
/// Panics if `raw` is not a whole number of images of `config.layout`.
pub fn postprocess_predictions(
    config: &DetectorConfig,
    raw: &[f32],
    scale_ratio: f32,
    annotate_image: Option<&mut PixelBuffer>,
) -> Vec<Vec<Detection>> {
    let batch = decode_batch(raw, config.layout, config.confidence_threshold);
    let batch_size = batch.len();
    debug!(batch_size, "postprocess predictions");

    let mut annotate_image = annotate_image.filter(|_| batch_size == 1);
    let mut output = Vec::with_capacity(batch_size);
    for mut bboxes in batch {
        // non-maximum suppression
        non_maximum_suppression(&mut bboxes, config.nms_threshold, config.nms_order);
        for (class, kept) in bboxes.iter().enumerate().filter(|(_, b)| !b.is_empty()) {
            trace!(class, kept = kept.len(), "nms survivors");
        }

        let detections = rescale_detections(&bboxes, scale_ratio);
        if let Some(image) = annotate_image.as_deref_mut() {
            annotate(image, &detections, config.annotation_color);
        }
        output.push(detections);
    }

    output
}

/// Detector high level interface.
pub struct Detector<E> {
    config: DetectorConfig,
    engine: E,
}

impl<E: InferenceEngine> Detector<E> {
    /// Create a new detector around an inference engine
    pub fn new(config: DetectorConfig, engine: E) -> Self {
        Self { config, engine }
    }

    /// Configuration of the detector
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Perform inference on an rgb8 image
    pub fn inference(&self, image: &PixelBuffer) -> Result<Vec<Vec<Detection>>, DetectorError> {
        detect(&self.engine, &self.config, image, None)
    }

    /// Perform inference and draw the detections onto `output`
    pub fn inference_annotated(
        &self,
        image: &PixelBuffer,
        output: &mut PixelBuffer,
    ) -> Result<Vec<Vec<Detection>>, DetectorError> {
        detect(&self.engine, &self.config, image, Some(output))
    }

    /// Letterbox and resize an image to the model input
    pub fn preprocess(&self, image: &PixelBuffer) -> Result<Preprocessed, DetectorError> {
        preprocess(image, self.config.input_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decode::CLASSES_OFFSET,
        labels::COCO_PERSON,
        pixel_buffer::Rect,
    };

    /// Engine replaying a fixed street scene: a cluster of three overlapping
    /// people, a lone person, a car and two records that must be filtered out.
    struct PeopleScene {
        layout: PredictionLayout,
    }

    impl PeopleScene {
        fn record(&self, raw: &mut [f32], index: usize, bbox: [f32; 4], obj: f32, class: usize, score: f32) {
            let start = index * self.layout.record_len();
            let r = &mut raw[start..start + self.layout.record_len()];
            r[..4].copy_from_slice(&bbox);
            r[4] = obj;
            r[CLASSES_OFFSET + class] = score;
        }
    }

    impl InferenceEngine for PeopleScene {
        type Error = String;

        fn infer(&self, input: &PixelBuffer) -> Result<Vec<f32>, Self::Error> {
            if input.width() != 640 || input.height() != 640 {
                return Err(format!("unexpected input {}x{}", input.width(), input.height()));
            }
            let mut raw = vec![0.0; self.layout.image_len()];
            self.record(&mut raw, 10, [100., 100., 60., 120.], 0.9, 0, 0.9);
            self.record(&mut raw, 11, [102., 101., 60., 120.], 0.8, 0, 0.8);
            self.record(&mut raw, 12, [98., 99., 60., 120.], 0.7, 0, 0.95);
            self.record(&mut raw, 500, [400., 300., 40., 80.], 0.85, 0, 0.9);
            // objectness equal to the threshold
            self.record(&mut raw, 900, [500., 500., 40., 80.], 0.5, 0, 0.9);
            // no positive class score
            self.record(&mut raw, 901, [300., 500., 40., 80.], 0.95, 0, 0.0);
            self.record(&mut raw, 20000, [200., 400., 80., 40.], 0.9, 2, 0.7);
            Ok(raw)
        }
    }

    struct FailingEngine;

    impl InferenceEngine for FailingEngine {
        type Error = String;

        fn infer(&self, _input: &PixelBuffer) -> Result<Vec<f32>, Self::Error> {
            Err("device lost".to_string())
        }
    }

    /// Two tiny images per call.
    struct BatchEngine;

    impl InferenceEngine for BatchEngine {
        type Error = String;

        fn infer(&self, _input: &PixelBuffer) -> Result<Vec<f32>, Self::Error> {
            Ok(vec![
                10., 10., 4., 4., 0.9, 0.8, 0.1, //
                0., 0., 0., 0., 0.0, 0.0, 0.0, //
                10., 10., 4., 4., 0.9, 0.1, 0.8, //
                30., 30., 4., 4., 0.9, 0.1, 0.8,
            ])
        }
    }

    fn people_config() -> DetectorConfig {
        DetectorConfig {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            ..Default::default()
        }
    }

    #[test]
    fn test_people_scene_regression() -> Result<(), DetectorError> {
        let engine = PeopleScene {
            layout: PredictionLayout::default(),
        };
        let image = PixelBuffer::from_size(800, 600);
        let mut annotated = image.clone();

        let detections = detect(&engine, &people_config(), &image, Some(&mut annotated))?;

        assert_eq!(detections.len(), 1);
        let detections = &detections[0];
        let people = detections.iter().filter(|d| d.class == COCO_PERSON).count();
        assert_eq!(people, 2);
        assert_eq!(detections.len(), 3);

        // lowest confidence of the cluster survives
        assert_eq!(detections[0].confidence, 0.7);
        assert_eq!(detections[0].rect, Rect::new(85, 48, 160, 198));
        assert_eq!(detections[1].rect, Rect::new(475, 325, 525, 425));
        assert_eq!(detections[2].label(), Some("car"));

        let green = [0, 255, 0];
        assert_eq!(annotated.get(475, 325), green);
        assert_eq!(annotated.get(525, 400), green);
        assert_eq!(annotated.get(500, 400), [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_preprocess() -> Result<(), DetectorError> {
        let detector = Detector::new(people_config(), FailingEngine);
        let pre = detector.preprocess(&PixelBuffer::from_size(800, 600))?;
        assert_eq!(pre.input.width(), 640);
        assert_eq!(pre.input.height(), 640);
        assert_eq!(pre.extra_x, 0);
        assert_eq!(pre.extra_y, 200);
        assert_eq!(pre.scale_ratio, 1.25);
        Ok(())
    }

    #[test]
    fn test_small_image_is_rejected() {
        let detector = Detector::new(people_config(), FailingEngine);
        let res = detector.inference(&PixelBuffer::from_size(320, 200));
        assert!(matches!(
            res,
            Err(DetectorError::UnsupportedUpscale { size: 320, target: 640 })
        ));
    }

    #[test]
    fn test_engine_failure() {
        let detector = Detector::new(people_config(), FailingEngine);
        let res = detector.inference(&PixelBuffer::from_size(640, 640));
        match res {
            Err(DetectorError::EngineFailure(msg)) => assert_eq!(msg, "device lost"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_batch_skips_annotation() -> Result<(), DetectorError> {
        let config = DetectorConfig {
            input_size: 64,
            confidence_threshold: 0.5,
            layout: PredictionLayout {
                num_classes: 2,
                num_predictions: 2,
            },
            ..Default::default()
        };
        let detector = Detector::new(config, BatchEngine);
        let image = PixelBuffer::from_size(64, 64);
        let mut annotated = image.clone();

        let detections = detector.inference_annotated(&image, &mut annotated)?;

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].len(), 1);
        assert_eq!(detections[0][0].class, 0);
        assert_eq!(detections[1].len(), 2);
        assert!(detections[1].iter().all(|d| d.class == 1));
        assert_eq!(annotated, image);
        Ok(())
    }

    #[test]
    fn test_config_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let config: DetectorConfig =
            serde_json::from_str(r#"{"confidence_threshold": 0.5, "nms_order": "descending"}"#)?;
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.nms_order, ConfidenceOrder::Descending);
        assert_eq!(config.input_size, 640);
        assert_eq!(config.layout, PredictionLayout::default());
        Ok(())
    }
}
