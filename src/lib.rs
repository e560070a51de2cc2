#![deny(missing_docs)]

//! YOLOv5 detection post-processing in Rust
//!
//! This crate turns images into model inputs and raw YOLOv5 predictions into
//! detections: letterboxing, nearest-neighbour resizing, prediction decoding,
//! per-class non-maximum suppression and rescaling. Running the network is
//! left to an [`InferenceEngine`], e.g. a [`CandleEngine`] around a candle module.
//!
//! # Examples
//!
//! ```no_run
//! use kornia_yolov5::{Detector, DetectorConfig, InferenceEngine, PixelBuffer};
//!
//! struct MyEngine;
//!
//! impl InferenceEngine for MyEngine {
//!     type Error = String;
//!
//!     fn infer(&self, _input: &PixelBuffer) -> Result<Vec<f32>, Self::Error> {
//!         Err("no model loaded".to_string())
//!     }
//! }
//!
//! let detector = Detector::new(DetectorConfig::default(), MyEngine);
//!
//! let image = PixelBuffer::from_size(1280, 720);
//! let mut annotated = image.clone();
//!
//! let detections = detector
//!     .inference_annotated(&image, &mut annotated)
//!     .expect("Failed to run inference");
//! for detection in &detections[0] {
//!     println!("Detection: {:?} {:?}", detection.label(), detection.rect);
//! }
//! ```

/// Bounding box module with non-maximum suppression
mod bounding_box;

/// Raw prediction decoding
mod decode;

/// Rescaled detections and annotation
mod detection;

/// Detection pipeline high level interface
mod detector;

/// Inference engine seam
mod engine;

/// COCO class names
mod labels;

/// RGB8 pixel buffer
mod pixel_buffer;

/// Letterbox and resize transforms
mod transform;

pub use bounding_box::{BoundingBox, ConfidenceOrder, iou, non_maximum_suppression};
pub use decode::{
    CLASSES_OFFSET, NUM_CLASSES, NUM_PREDICTIONS, PREDICTION_SIZE, PredictionLayout,
    decode_batch, decode_predictions,
};
pub use detection::{Detection, annotate, rescale_detections};
pub use detector::{
    Detector, DetectorConfig, DetectorError, Preprocessed, detect, postprocess_predictions,
    preprocess,
};
pub use engine::{CandleEngine, InferenceEngine};
pub use labels::{COCO_CLASSES, COCO_PERSON, coco_label};
pub use pixel_buffer::{PixelBuffer, RGB_CHANNELS, Rect};
pub use transform::Letterbox;
