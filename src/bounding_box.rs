use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Bounding box struct for decoded predictions, in model-input pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    /// Minimum x coordinate of the bounding box.
    pub xmin: f32,
    /// Minimum y coordinate of the bounding box.
    pub ymin: f32,
    /// Maximum x coordinate of the bounding box.
    pub xmax: f32,
    /// Maximum y coordinate of the bounding box.
    pub ymax: f32,
    /// Objectness confidence of the bounding box.
    pub confidence: f32,
    /// Class index of the bounding box.
    pub class: u32,
    /// Score of the selected class.
    pub class_confidence: f32,
}

/// Order in which boxes are visited by [`non_maximum_suppression`].
///
/// Boxes visited first win over later overlapping boxes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceOrder {
    /// Lowest confidence first.
    #[default]
    Ascending,
    /// Highest confidence first.
    Descending,
}

/// Intersection over union of two bounding boxes.
///
/// Coordinates are treated as inclusive pixel indices.
pub fn iou(b1: &BoundingBox, b2: &BoundingBox) -> f32 {
    let b1_area = (b1.xmax - b1.xmin + 1.) * (b1.ymax - b1.ymin + 1.);
    let b2_area = (b2.xmax - b2.xmin + 1.) * (b2.ymax - b2.ymin + 1.);
    let i_xmin = b1.xmin.max(b2.xmin);
    let i_xmax = b1.xmax.min(b2.xmax);
    let i_ymin = b1.ymin.max(b2.ymin);
    let i_ymax = b1.ymax.min(b2.ymax);
    let i_area = (i_xmax - i_xmin + 1.).max(0.) * (i_ymax - i_ymin + 1.).max(0.);
    i_area / (b1_area + b2_area - i_area)
}

/// Non-maximum suppression for bounding boxes.
///
/// Each class bucket is sorted by confidence in `order` and then scanned once:
/// a box is kept unless its IoU with an already kept box exceeds `threshold`.
/// Kept boxes stay in scan order. Buckets are independent and processed in parallel.
///
/// # Arguments
///
/// * `bboxes` - Bounding boxes grouped by class.
/// * `threshold` - The IoU threshold for suppression.
/// * `order` - The confidence order of the scan.
pub fn non_maximum_suppression(
    bboxes: &mut [Vec<BoundingBox>],
    threshold: f32,
    order: ConfidenceOrder,
) {
    bboxes
        .par_iter_mut()
        .for_each(|bboxes_for_class| suppress_class(bboxes_for_class, threshold, order));
}

fn suppress_class(bboxes_for_class: &mut Vec<BoundingBox>, threshold: f32, order: ConfidenceOrder) {
    match order {
        ConfidenceOrder::Ascending => {
            bboxes_for_class.sort_by(|b1, b2| b1.confidence.total_cmp(&b2.confidence))
        }
        ConfidenceOrder::Descending => {
            bboxes_for_class.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence))
        }
    }

    let mut current_index = 0;
    for index in 0..bboxes_for_class.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = iou(&bboxes_for_class[prev_index], &bboxes_for_class[index]);
            if iou > threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            bboxes_for_class.swap(current_index, index);
            current_index += 1;
        }
    }
    bboxes_for_class.truncate(current_index);
}
