//! Raw detector output to public predictions

use crate::models::{ClassNames, RawDetection};
use serde::Serialize;

/// Public detection record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub bbox: [i64; 4], // x1, y1, x2, y2
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
}

/// Name for `class_id`, synthesizing `class_{id}` when the table has none.
pub fn class_name_for(class_id: usize, class_names: &ClassNames) -> String {
    class_names
        .get(&class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// Truncate toward zero. NaN becomes 0, infinities saturate.
fn truncate(coord: f32) -> i64 {
    coord as i64
}

/// Map raw detections to predictions, keeping the detector's order.
pub fn map_detections(raw: &[RawDetection], class_names: &ClassNames) -> Vec<Prediction> {
    raw.iter()
        .map(|det| {
            let (x1, y1, x2, y2) = det.bbox;
            Prediction {
                bbox: [truncate(x1), truncate(y1), truncate(x2), truncate(y2)],
                confidence: det.confidence,
                class_id: det.class_id,
                class_name: class_name_for(det.class_id, class_names),
            }
        })
        .collect()
}
