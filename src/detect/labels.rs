use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// A class id the model produced that the label list cannot name.
///
/// This means the model and its label file have drifted apart. It is never
/// skipped silently; the poll loop stops on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelDriftError {
    pub class_id: usize,
    pub label_count: usize,
}

impl fmt::Display for LabelDriftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "class id {} has no label (label list has {} entries)",
            self.class_id, self.label_count
        )
    }
}

impl std::error::Error for LabelDriftError {}

/// Ordered species names; the index is the model's class id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("class label list is empty"));
        }
        Ok(Self { labels })
    }

    /// One label per line. Surrounding whitespace is trimmed and blank lines skipped.
    pub fn parse(text: &str) -> Result<Self> {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read class labels from {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid class labels in {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, class_id: usize) -> std::result::Result<&str, LabelDriftError> {
        self.labels
            .get(class_id)
            .map(String::as_str)
            .ok_or(LabelDriftError {
                class_id,
                label_count: self.labels.len(),
            })
    }

    /// Startup check that the model's class dimension matches this list.
    pub fn ensure_class_count(&self, class_count: usize) -> Result<()> {
        if class_count != self.labels.len() {
            return Err(anyhow!(
                "model reports {} classes but the label list has {} entries",
                class_count,
                self.labels.len()
            ));
        }
        Ok(())
    }
}
