use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::decode::{decode, BoundingBox};
use super::labels::ClassLabels;
use super::nms::suppress;
use super::output::RawOutput;
use crate::observation::normalize_label;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionThresholds {
    pub confidence: f32,
    pub iou: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            iou: DEFAULT_IOU_THRESHOLD,
        }
    }
}

impl DetectionThresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("confidence", self.confidence), ("iou", self.iou)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!(
                    "{} threshold must be within [0, 1] (got {})",
                    name,
                    value
                ));
            }
        }
        Ok(())
    }
}

/// Turns raw model output into the set of species present in the image.
#[derive(Clone, Debug)]
pub struct SpeciesDetector {
    labels: ClassLabels,
    thresholds: DetectionThresholds,
}

impl SpeciesDetector {
    pub fn new(labels: ClassLabels, thresholds: DetectionThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self { labels, thresholds })
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        self.thresholds
    }

    /// Class ids with at least one box left after per-class NMS, ascending.
    pub fn confirmed_classes(&self, output: &RawOutput) -> Result<Vec<usize>> {
        let mut by_class: BTreeMap<usize, (Vec<BoundingBox>, Vec<f32>)> = BTreeMap::new();
        for det in decode(output, self.thresholds.confidence) {
            let (boxes, scores) = by_class.entry(det.class_id).or_default();
            boxes.push(det.bbox);
            scores.push(det.confidence);
        }

        let mut confirmed = Vec::with_capacity(by_class.len());
        for (class_id, (boxes, scores)) in by_class {
            let kept = suppress(&boxes, &scores, self.thresholds.iou)?;
            if !kept.is_empty() {
                confirmed.push(class_id);
            }
        }
        Ok(confirmed)
    }

    /// Species labels present in `output`, ordered by class id.
    ///
    /// Labels that normalize to the same species name are reported once. A
    /// class id beyond the label list fails with [`super::LabelDriftError`].
    pub fn detect_species(&self, output: &RawOutput) -> Result<Vec<String>> {
        let mut species: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for class_id in self.confirmed_classes(output)? {
            let label = self.labels.label(class_id)?;
            let Some(key) = normalize_label(label) else {
                continue;
            };
            if !seen.contains(&key) {
                seen.push(key);
                species.push(label.to_string());
            }
        }
        Ok(species)
    }
}
