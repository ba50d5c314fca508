#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::{RawOutput, BOX_COLUMNS};
use crate::frame::InputTensor;

/// Tract-based backend for ONNX inference.
///
/// Loads a local detection model whose first output is a candidate matrix
/// shaped `[1, N, 5 + K]` or `[N, 5 + K]`.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    class_count: Option<usize>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(anyhow!("model file {} not found", model_path.display()));
        }
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let class_count = model
            .model()
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.to_vec()))
            .and_then(|dims| dims.last().copied())
            .and_then(|cols| cols.checked_sub(BOX_COLUMNS))
            .filter(|classes| *classes > 0);

        Ok(Self {
            model,
            width,
            height,
            class_count,
        })
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        if (input.width(), input.height()) != (self.width, self.height) {
            return Err(anyhow!(
                "input tensor {}x{} does not match model input {}x{}",
                input.width(),
                input.height(),
                self.width,
                self.height
            ));
        }
        let shape = input.shape();
        let array = tract_ndarray::Array4::from_shape_vec(
            (shape[0], shape[1], shape[2], shape[3]),
            input.data().to_vec(),
        )
        .context("input tensor shape mismatch")?;
        Ok(array.into_tensor())
    }

    fn extract_output(&self, outputs: TVec<TValue>) -> Result<RawOutput> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let (rows, cols) = match view.shape() {
            [1, rows, cols] | [rows, cols] => (*rows, *cols),
            other => return Err(anyhow!("unexpected model output shape {:?}", other)),
        };
        RawOutput::new(rows, cols, view.iter().copied().collect())
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn class_count(&self) -> Option<usize> {
        self.class_count
    }

    /// Run one inference on a blank frame. When the output shape was symbolic
    /// at load time, the class count is taken from this result.
    fn warm_up(&mut self) -> Result<()> {
        let output = self
            .infer(&InputTensor::zeros(self.width, self.height))
            .context("warm-up inference failed")?;
        if self.class_count.is_none() {
            self.class_count = Some(output.class_count());
        }
        Ok(())
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        self.extract_output(outputs)
    }
}
