use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceBackend;
use crate::detect::RawOutput;
use crate::frame::InputTensor;

enum Scripted {
    Output(RawOutput),
    Failure(String),
}

/// Stub backend for testing and for running without a model.
///
/// Returns queued outputs (or failures) in order, then falls back to a fixed
/// output, which is empty unless set with [`StubBackend::with_output`].
pub struct StubBackend {
    width: u32,
    height: u32,
    fallback: RawOutput,
    queue: VecDeque<Scripted>,
    calls: u64,
}

impl StubBackend {
    pub fn new(width: u32, height: u32, class_count: usize) -> Result<Self> {
        Ok(Self {
            width,
            height,
            fallback: RawOutput::empty(class_count)?,
            queue: VecDeque::new(),
            calls: 0,
        })
    }

    /// Output returned whenever the queue is empty.
    pub fn with_output(mut self, output: RawOutput) -> Self {
        self.fallback = output;
        self
    }

    pub fn push_output(&mut self, output: RawOutput) {
        self.queue.push_back(Scripted::Output(output));
    }

    pub fn push_failure(&mut self, reason: &str) {
        self.queue.push_back(Scripted::Failure(reason.to_string()));
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn class_count(&self) -> Option<usize> {
        Some(self.fallback.class_count())
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput> {
        self.calls += 1;
        if (input.width(), input.height()) != (self.width, self.height) {
            return Err(anyhow!(
                "input tensor {}x{} does not match model input {}x{}",
                input.width(),
                input.height(),
                self.width,
                self.height
            ));
        }
        match self.queue.pop_front() {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Failure(reason)) => Err(anyhow!("stub inference failure: {}", reason)),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn stub_replays_queue_then_fallback() -> Result<()> {
        let canned = RawOutput::from_candidates(&[vec![0.0, 0.0, 4.0, 4.0, 0.9, 0.8, 0.1]])?;
        let mut backend = StubBackend::new(4, 4, 2)?;
        backend.push_output(canned.clone());
        backend.push_failure("camera fogged");

        let input = Frame::from_rgb(vec![128; 4 * 4 * 3], 4, 4)?.to_input_tensor(4, 4)?;
        assert_eq!(backend.infer(&input)?, canned);
        assert!(backend.infer(&input).is_err());
        assert_eq!(backend.infer(&input)?.rows(), 0);
        assert_eq!(backend.calls(), 3);
        Ok(())
    }

    #[test]
    fn stub_rejects_wrong_input_size() -> Result<()> {
        let mut backend = StubBackend::new(8, 8, 2)?;
        let input = Frame::from_rgb(vec![0; 4 * 4 * 3], 4, 4)?.to_input_tensor(4, 4)?;
        assert!(backend.infer(&input).is_err());
        Ok(())
    }
}
