//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing stills from local V4L2
//! devices (USB cameras on a feeder-side board).
//!
//! Polls are seconds apart, so the device is opened for each capture, a few
//! frames are pulled to let exposure settle, the last one is kept and the
//! device is released again. Nothing holds the camera between cycles.

use anyhow::{anyhow, Result};

use super::{CaptureError, FrameSource};
use crate::frame::Frame;

/// Frames read and discarded after opening the device.
const WARM_UP_FRAMES: usize = 3;

pub struct V4l2Source {
    device: String,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl V4l2Source {
    pub fn new(device: &str, width: u32, height: u32) -> Self {
        Self {
            device: device.to_string(),
            width,
            height,
            frame_count: 0,
        }
    }

    fn grab(&self) -> Result<Frame> {
        use v4l::buffer::Type;
        use v4l::io::traits::CaptureStream;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.device)
            .map_err(|err| CaptureError::unavailable(&self.device, err))?;
        let mut format = device
            .format()
            .map_err(|err| CaptureError::read(&self.device, err))?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device,
                    err
                );
                device
                    .format()
                    .map_err(|err| CaptureError::read(&self.device, err))?
            }
        };

        let mut stream = v4l::prelude::MmapStream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|err| CaptureError::read(&self.device, err))?;
        let mut last = Vec::new();
        for _ in 0..WARM_UP_FRAMES {
            let (buf, _meta) = stream
                .next()
                .map_err(|err| CaptureError::read(&self.device, err))?;
            last.clear();
            last.extend_from_slice(buf);
        }

        let pixels = match &format.fourcc.repr {
            b"RGB3" => {
                let expected = format.width as usize * format.height as usize * 3;
                if last.len() < expected {
                    return Err(CaptureError::read(
                        &self.device,
                        anyhow!("short RGB buffer: {} < {}", last.len(), expected),
                    ));
                }
                last.truncate(expected);
                last
            }
            b"MJPG" => {
                return Frame::decode(&last).map_err(|err| CaptureError::read(&self.device, err));
            }
            other => {
                return Err(CaptureError::read(
                    &self.device,
                    format!("unsupported pixel format {}", String::from_utf8_lossy(other)),
                ))
            }
        };
        Frame::from_rgb(pixels, format.width, format.height)
            .map_err(|err| CaptureError::read(&self.device, err))
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        self.device.clone()
    }

    fn capture(&mut self) -> Result<Frame> {
        let frame = self.grab()?;
        self.frame_count += 1;
        log::debug!(
            "V4l2Source: captured {}x{} from {}",
            frame.width(),
            frame.height(),
            self.device
        );
        Ok(frame)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
