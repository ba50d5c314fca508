use serde::Serialize;

use super::output::{RawOutput, BOX_COLUMNS};

/// Axis-aligned box in the model's preprocessed coordinate space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Area with inverted extents clamped to zero.
    pub fn area(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0) * (self.y_max - self.y_min).max(0.0)
    }
}

/// One candidate that survived the confidence threshold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// `class_prob * objectness`.
    pub confidence: f32,
    pub class_id: usize,
}

/// Decode raw model output into detections.
///
/// A candidate is dropped when its objectness, or its best class probability
/// scaled by objectness, is below `confidence_threshold`. A score exactly equal
/// to the threshold is kept. Candidates carrying non-finite scores are dropped.
pub fn decode(output: &RawOutput, confidence_threshold: f32) -> Vec<Detection> {
    output
        .candidates()
        .filter_map(|row| decode_candidate(row, confidence_threshold))
        .collect()
}

fn decode_candidate(row: &[f32], confidence_threshold: f32) -> Option<Detection> {
    let objectness = row[4];
    if !objectness.is_finite() || objectness < confidence_threshold {
        return None;
    }

    let (class_id, class_prob) = first_argmax(&row[BOX_COLUMNS..])?;
    let confidence = class_prob * objectness;
    if !confidence.is_finite() || confidence < confidence_threshold {
        return None;
    }

    Some(Detection {
        bbox: BoundingBox::new(row[0], row[1], row[2], row[3]),
        confidence,
        class_id,
    })
}

/// Index and value of the maximum; ties resolve to the lowest index.
fn first_argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((idx, value)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn decodes_single_confident_candidate() -> Result<()> {
        let output = RawOutput::from_candidates(&[vec![10.0, 10.0, 50.0, 50.0, 0.9, 0.8, 0.1]])?;
        let detections = decode(&output, 0.25);
        assert_eq!(detections.len(), 1);
        let det = detections[0];
        assert_eq!(det.class_id, 0);
        assert!((det.confidence - 0.72).abs() < 1e-6);
        assert_eq!(det.bbox, BoundingBox::new(10.0, 10.0, 50.0, 50.0));
        Ok(())
    }

    #[test]
    fn rejects_low_objectness_before_class_scoring() -> Result<()> {
        let output = RawOutput::from_candidates(&[vec![0.0, 0.0, 1.0, 1.0, 0.2, 1.0, 0.0]])?;
        assert!(decode(&output, 0.25).is_empty());
        Ok(())
    }

    #[test]
    fn rejects_low_class_confidence() -> Result<()> {
        // 0.5 * 0.4 = 0.2 < 0.25
        let output = RawOutput::from_candidates(&[vec![0.0, 0.0, 1.0, 1.0, 0.5, 0.4, 0.3]])?;
        assert!(decode(&output, 0.25).is_empty());
        Ok(())
    }

    #[test]
    fn keeps_confidence_exactly_at_threshold() -> Result<()> {
        let output = RawOutput::from_candidates(&[vec![0.0, 0.0, 1.0, 1.0, 0.5, 0.5, 0.25]])?;
        let detections = decode(&output, 0.25);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 0.25);
        Ok(())
    }

    #[test]
    fn argmax_ties_pick_lowest_class() -> Result<()> {
        let output = RawOutput::from_candidates(&[vec![0.0, 0.0, 1.0, 1.0, 1.0, 0.1, 0.6, 0.6]])?;
        let detections = decode(&output, 0.25);
        assert_eq!(detections[0].class_id, 1);
        Ok(())
    }

    #[test]
    fn no_detection_below_any_threshold_survives() -> Result<()> {
        let output = RawOutput::from_candidates(&[
            vec![0.0, 0.0, 1.0, 1.0, 0.95, 0.9, 0.1],
            vec![0.0, 0.0, 1.0, 1.0, 0.7, 0.5, 0.5],
            vec![0.0, 0.0, 1.0, 1.0, 0.4, 0.1, 0.9],
            vec![0.0, 0.0, 1.0, 1.0, 0.3, 0.8, 0.2],
        ])?;
        for threshold in [0.0, 0.1, 0.24, 0.35, 0.5, 0.855, 0.9, 1.0] {
            for det in decode(&output, threshold) {
                assert!(det.confidence >= threshold);
            }
        }
        Ok(())
    }

    #[test]
    fn drops_nan_scores() -> Result<()> {
        let output = RawOutput::from_candidates(&[vec![0.0, 0.0, 1.0, 1.0, f32::NAN, 0.9, 0.1]])?;
        assert!(decode(&output, 0.25).is_empty());
        Ok(())
    }
}
