//! Image sources.
//!
//! This module provides the sources a poll cycle captures from:
//! - Synthetic frames (`stub://...`, testing)
//! - Still image files (a fixed photo, re-read on every capture)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - HTTP snapshot endpoints, e.g. ESP32 camera boards (feature: ingest-http)
//!
//! Every source produces one RGB `Frame` per `capture()` call. A source that
//! cannot deliver an image fails with a [`CaptureError`]; it never substitutes
//! a blank frame.

use std::fmt;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub mod file;
#[cfg(feature = "ingest-http")]
pub mod http;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use file::ImageFileSource;
#[cfg(feature = "ingest-http")]
pub use http::HttpSnapshotSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Why a source could not deliver a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureError {
    /// The device, file or endpoint is not there.
    Unavailable { source: String, reason: String },
    /// The source exists but reading or decoding the image failed.
    Read { source: String, reason: String },
}

impl CaptureError {
    pub fn unavailable(source: &str, reason: impl fmt::Display) -> anyhow::Error {
        anyhow::Error::new(Self::Unavailable {
            source: source.to_string(),
            reason: reason.to_string(),
        })
    }

    pub fn read(source: &str, reason: impl fmt::Display) -> anyhow::Error {
        anyhow::Error::new(Self::Read {
            source: source.to_string(),
            reason: reason.to_string(),
        })
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { source, reason } => {
                write!(f, "capture source {} unavailable: {}", source, reason)
            }
            Self::Read { source, reason } => {
                write!(f, "capture from {} failed: {}", source, reason)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

/// A producer of one image per poll cycle.
pub trait FrameSource: Send {
    /// Human-readable source location for logs.
    fn describe(&self) -> String;

    /// Optional setup before the first capture.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Capture one frame.
    fn capture(&mut self) -> Result<Frame>;

    /// Frames captured so far.
    fn frames_captured(&self) -> u64;
}

/// Open a source from its configured location.
///
/// - `stub://<name>`: synthetic frames of `width`x`height`
/// - `file://<path>` or a bare path: still image file
/// - `v4l2://<device>` or `/dev/video*`: V4L2 device (feature: ingest-v4l2)
/// - `http://` / `https://`: snapshot endpoint (feature: ingest-http)
pub fn open_source(location: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    let location = location.trim();
    if location.is_empty() {
        return Err(anyhow!("capture source must not be empty"));
    }
    if location.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(location, width, height)));
    }
    if location.starts_with("http://") || location.starts_with("https://") {
        #[cfg(feature = "ingest-http")]
        {
            return Ok(Box::new(HttpSnapshotSource::new(location)?));
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            return Err(anyhow!(
                "http capture sources require the ingest-http feature"
            ));
        }
    }
    if let Some(device) = location.strip_prefix("v4l2://").or_else(|| {
        location
            .starts_with("/dev/video")
            .then_some(location)
    }) {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(device, width, height)));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            let _ = device;
            return Err(anyhow!(
                "v4l2 capture sources require the ingest-v4l2 feature"
            ));
        }
    }
    let path = location.strip_prefix("file://").unwrap_or(location);
    if path.contains("://") {
        return Err(anyhow!("unsupported capture source '{}'", location));
    }
    Ok(Box::new(ImageFileSource::new(path)))
}
