use anyhow::{anyhow, Result};

use super::decode::BoundingBox;

/// Intersection over union of two boxes.
///
/// Non-overlapping axes contribute zero intersection. Two zero-area boxes have
/// an empty union and are defined to have an IoU of 0.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = (a.x_max.min(b.x_max) - a.x_min.max(b.x_min)).max(0.0);
    let h = (a.y_max.min(b.y_max) - a.y_min.max(b.y_min)).max(0.0);
    let intersection = w * h;
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Greedy non-maximum suppression over one class's candidates.
///
/// Returns indices into `boxes`/`scores` of the kept candidates, highest score
/// first. Equal scores keep their input order, so the result is deterministic.
/// A candidate is discarded when its IoU with an already kept box exceeds
/// `iou_threshold`.
pub fn suppress(boxes: &[BoundingBox], scores: &[f32], iou_threshold: f32) -> Result<Vec<usize>> {
    if boxes.len() != scores.len() {
        return Err(anyhow!(
            "nms input mismatch: {} boxes, {} scores",
            boxes.len(),
            scores.len()
        ));
    }

    let mut order: Vec<usize> = (0..boxes.len()).collect();
    // sort_by is stable: ties stay in ascending index order.
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut keep = Vec::new();
    while !order.is_empty() {
        let best = order[0];
        keep.push(best);
        order = order[1..]
            .iter()
            .copied()
            .filter(|&idx| iou(&boxes[best], &boxes[idx]) <= iou_threshold)
            .collect();
    }
    Ok(keep)
}
