//! Still image file source.
//!
//! Re-reads and decodes one local image on every capture. Useful for bench
//! testing a model against a known photo, and for cameras that drop their
//! latest snapshot into a file.

use std::path::{Path, PathBuf};

use anyhow::Result;

use super::{CaptureError, FrameSource};
use crate::frame::Frame;

pub struct ImageFileSource {
    path: PathBuf,
    frame_count: u64,
}

impl ImageFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            frame_count: 0,
        }
    }
}

impl FrameSource for ImageFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn connect(&mut self) -> Result<()> {
        if !self.path.is_file() {
            return Err(CaptureError::unavailable(
                &self.describe(),
                "image file does not exist",
            ));
        }
        log::info!("ImageFileSource: reading stills from {}", self.path.display());
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        let bytes = std::fs::read(&self.path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CaptureError::unavailable(&self.describe(), err)
            } else {
                CaptureError::read(&self.describe(), err)
            }
        })?;
        let frame = Frame::decode(&bytes).map_err(|err| CaptureError::read(&self.describe(), err))?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn reads_png_still() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cardinal.png");
        RgbImage::from_pixel(12, 8, Rgb([200, 30, 30])).save_with_format(&path, ImageFormat::Png)?;

        let mut source = ImageFileSource::new(&path);
        source.connect()?;
        let frame = source.capture()?;
        assert_eq!((frame.width(), frame.height()), (12, 8));
        assert_eq!(source.frames_captured(), 1);
        Ok(())
    }

    #[test]
    fn missing_file_is_a_capture_error() -> Result<()> {
        let dir = tempdir()?;
        let mut source = ImageFileSource::new(dir.path().join("absent.jpg"));
        let err = source.capture().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CaptureError>(),
            Some(CaptureError::Unavailable { .. })
        ));
        Ok(())
    }

    #[test]
    fn garbage_file_is_a_read_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image")?;
        let mut source = ImageFileSource::new(&path);
        let err = source.capture().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CaptureError>(),
            Some(CaptureError::Read { .. })
        ));
        Ok(())
    }
}
