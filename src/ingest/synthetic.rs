use anyhow::Result;

use super::FrameSource;
use crate::frame::Frame;

/// Synthetic source (`stub://`) for tests and model-less runs.
///
/// Produces a gradient pattern that shifts every frame.
pub struct SyntheticSource {
    location: String,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(location: &str, width: u32, height: u32) -> Self {
        Self {
            location: location.to_string(),
            width,
            height,
            frame_count: 0,
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * 3;
        (0..pixel_count)
            .map(|i| ((i as u64 + self.frame_count) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        self.location.clone()
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.location);
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        Frame::from_rgb(self.generate_pixels(), self.width, self.height)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
