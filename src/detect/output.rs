use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Leading columns of every candidate row: x_min, y_min, x_max, y_max, objectness.
pub const BOX_COLUMNS: usize = 5;

/// Raw model output: a row-major matrix of candidate predictions.
///
/// Each row is `[x_min, y_min, x_max, y_max, objectness, p_0, .., p_{K-1}]`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawOutputRepr")]
pub struct RawOutput {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOutputRepr {
    Flat {
        rows: usize,
        cols: usize,
        data: Vec<f32>,
    },
    Candidates(Vec<Vec<f32>>),
}

impl TryFrom<RawOutputRepr> for RawOutput {
    type Error = anyhow::Error;

    fn try_from(repr: RawOutputRepr) -> Result<Self> {
        match repr {
            RawOutputRepr::Flat { rows, cols, data } => Self::new(rows, cols, data),
            RawOutputRepr::Candidates(rows) => Self::from_candidates(&rows),
        }
    }
}

impl RawOutput {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if cols <= BOX_COLUMNS {
            return Err(anyhow!(
                "candidate rows need more than {} columns (got {})",
                BOX_COLUMNS,
                cols
            ));
        }
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| anyhow!("raw output dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "raw output length mismatch: expected {}x{}={}, got {}",
                rows,
                cols,
                expected,
                data.len()
            ));
        }
        Ok(Self { rows, cols, data })
    }

    /// An output with no candidates for a model with `class_count` classes.
    pub fn empty(class_count: usize) -> Result<Self> {
        Self::new(0, BOX_COLUMNS + class_count, Vec::new())
    }

    /// Build from a list of candidate rows, which must all share one width.
    pub fn from_candidates(candidates: &[Vec<f32>]) -> Result<Self> {
        let first = candidates
            .first()
            .ok_or_else(|| anyhow!("empty candidate list carries no class dimension"))?;
        let cols = first.len();
        let mut data = Vec::with_capacity(candidates.len() * cols);
        for (idx, row) in candidates.iter().enumerate() {
            if row.len() != cols {
                return Err(anyhow!(
                    "candidate {} has {} columns, expected {}",
                    idx,
                    row.len(),
                    cols
                ));
            }
            data.extend_from_slice(row);
        }
        Self::new(candidates.len(), cols, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Size of the class-probability block (K).
    pub fn class_count(&self) -> usize {
        self.cols - BOX_COLUMNS
    }

    pub fn candidates(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_rows_without_class_columns() {
        assert!(RawOutput::new(1, 5, vec![0.0; 5]).is_err());
        assert!(RawOutput::new(2, 7, vec![0.0; 7]).is_err());
    }

    #[test]
    fn parses_flat_and_nested_json() -> Result<()> {
        let flat: RawOutput =
            serde_json::from_str(r#"{"rows":1,"cols":7,"data":[10,10,50,50,0.9,0.8,0.1]}"#)?;
        let nested: RawOutput = serde_json::from_str("[[10,10,50,50,0.9,0.8,0.1]]")?;
        assert_eq!(flat, nested);
        assert_eq!(nested.class_count(), 2);
        assert_eq!(nested.candidates().count(), 1);
        Ok(())
    }

    #[test]
    fn nested_json_with_ragged_rows_is_rejected() {
        let parsed: std::result::Result<RawOutput, _> =
            serde_json::from_str("[[0,0,1,1,0.9,0.5,0.5],[0,0,1,1,0.9,0.5]]");
        assert!(parsed.is_err());
    }
}
