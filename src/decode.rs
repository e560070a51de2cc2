use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bounding_box::BoundingBox;

/// Offset of the first class score inside a prediction record.
pub const CLASSES_OFFSET: usize = 5;
/// Number of floats in a YOLOv5 prediction record: `[cx, cy, w, h, obj_conf, scores..]`.
pub const PREDICTION_SIZE: usize = 85;
/// Number of COCO class scores in a record.
pub const NUM_CLASSES: usize = PREDICTION_SIZE - CLASSES_OFFSET;
/// Number of anchors a 640x640 YOLOv5 model predicts per image.
pub const NUM_PREDICTIONS: usize = 25200;

/// Shape of the raw prediction tensor produced for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionLayout {
    /// Class scores per record.
    pub num_classes: usize,
    /// Records per image.
    pub num_predictions: usize,
}

impl Default for PredictionLayout {
    fn default() -> Self {
        Self {
            num_classes: NUM_CLASSES,
            num_predictions: NUM_PREDICTIONS,
        }
    }
}

impl PredictionLayout {
    /// Floats per record.
    pub fn record_len(&self) -> usize {
        CLASSES_OFFSET + self.num_classes
    }

    /// Floats per image.
    pub fn image_len(&self) -> usize {
        self.num_predictions * self.record_len()
    }
}

/// Decode the raw predictions of one image into per-class bounding boxes.
///
/// A record is kept when its objectness is strictly above `confidence_threshold`
/// and the score of its best class is positive. Ties between class scores go to
/// the lowest class index. Boxes keep the record order within each class.
///
/// # Panics
///
/// Panics if `raw` does not hold exactly `layout.image_len()` floats.
pub fn decode_predictions(
    raw: &[f32],
    layout: PredictionLayout,
    confidence_threshold: f32,
) -> Vec<Vec<BoundingBox>> {
    assert_eq!(
        raw.len(),
        layout.image_len(),
        "raw predictions do not match the {} x {} layout",
        layout.num_predictions,
        layout.record_len()
    );

    let nclasses = layout.num_classes;
    let mut bboxes: Vec<Vec<BoundingBox>> = (0..nclasses).map(|_| Vec::new()).collect();
    for pred in raw.chunks_exact(layout.record_len()) {
        let confidence = pred[4];
        if confidence > confidence_threshold {
            let mut class_index = 0;
            for i in 0..nclasses {
                if pred[CLASSES_OFFSET + i] > pred[CLASSES_OFFSET + class_index] {
                    class_index = i;
                }
            }
            let class_confidence = pred[CLASSES_OFFSET + class_index];
            if class_confidence > 0. {
                let bbox = BoundingBox {
                    xmin: pred[0] - pred[2] / 2.0,
                    ymin: pred[1] - pred[3] / 2.0,
                    xmax: pred[0] + pred[2] / 2.0,
                    ymax: pred[1] + pred[3] / 2.0,
                    confidence,
                    class: class_index as u32,
                    class_confidence,
                };
                bboxes[class_index].push(bbox);
            }
        }
    }

    tracing::debug!(
        candidates = bboxes.iter().map(Vec::len).sum::<usize>(),
        "decoded predictions"
    );

    bboxes
}

/// Decode a batch of images laid out back to back.
///
/// # Panics
///
/// Panics if `raw` is not a whole number of images.
pub fn decode_batch(
    raw: &[f32],
    layout: PredictionLayout,
    confidence_threshold: f32,
) -> Vec<Vec<Vec<BoundingBox>>> {
    let image_len = layout.image_len();
    assert!(
        image_len > 0 && raw.len() % image_len == 0,
        "raw predictions of length {} are not a multiple of {image_len}",
        raw.len()
    );

    raw.par_chunks_exact(image_len)
        .map(|image| decode_predictions(image, layout, confidence_threshold))
        .collect()
}
