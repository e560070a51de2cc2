use serde::Serialize;

use crate::{
    bounding_box::BoundingBox,
    labels::coco_label,
    pixel_buffer::{PixelBuffer, Rect},
};

/// Final detection with an integer rectangle in letterboxed-image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    /// Bounding rectangle, scaled back from the model input.
    pub rect: Rect,
    /// Objectness confidence.
    pub confidence: f32,
    /// Class index.
    pub class: u32,
    /// Score of the selected class.
    pub class_confidence: f32,
}

impl Detection {
    /// Scale a model-space box by `ratio`, truncating toward zero.
    pub fn from_bbox(bbox: &BoundingBox, ratio: f32) -> Self {
        Self {
            rect: Rect::new(
                (bbox.xmin * ratio) as i32,
                (bbox.ymin * ratio) as i32,
                (bbox.xmax * ratio) as i32,
                (bbox.ymax * ratio) as i32,
            ),
            confidence: bbox.confidence,
            class: bbox.class,
            class_confidence: bbox.class_confidence,
        }
    }

    /// COCO name of the detected class.
    pub fn label(&self) -> Option<&'static str> {
        coco_label(self.class)
    }
}

/// Rescale surviving boxes, class by class, into detections.
///
/// The letterbox padding is not subtracted; it sits on the right and bottom
/// so the origin of the source image is unchanged.
pub fn rescale_detections(bboxes: &[Vec<BoundingBox>], ratio: f32) -> Vec<Detection> {
    bboxes
        .iter()
        .flatten()
        .map(|bbox| Detection::from_bbox(bbox, ratio))
        .collect()
}

/// Draw the outline of every detection onto `image`, clipping at its bounds.
pub fn annotate(image: &mut PixelBuffer, detections: &[Detection], color: [u8; 3]) {
    for detection in detections {
        image.draw_rect(detection.rect, color);
    }
}
