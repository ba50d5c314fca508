use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::RawOutput;
use crate::frame::InputTensor;

/// Backend handle shared between the poll loop and admin tooling.
pub type SharedBackend = Arc<Mutex<dyn InferenceBackend>>;

/// Inference runtime boundary.
///
/// A backend maps one `[1, 3, H, W]` input tensor to the raw candidate matrix
/// described by [`RawOutput`]. It is treated as an opaque synchronous call.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Model input size as `(width, height)`.
    fn input_size(&self) -> (u32, u32);

    /// Size of the model's class dimension, when the backend can tell before
    /// running inference.
    fn class_count(&self) -> Option<usize>;

    /// Run the model on one preprocessed tensor.
    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
