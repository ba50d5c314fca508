//! HTTP snapshot source.
//!
//! Fetches one JPEG/PNG per capture from a camera's snapshot endpoint
//! (ESP32-CAM boards serve one at `/capture`).

use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{CaptureError, FrameSource};
use crate::frame::Frame;

const MAX_SNAPSHOT_BYTES: u64 = 5 * 1024 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpSnapshotSource {
    url: Url,
    agent: ureq::Agent,
    frame_count: u64,
}

impl HttpSnapshotSource {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).context("parse snapshot url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported snapshot scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(FETCH_TIMEOUT).build();
        Ok(Self {
            url,
            agent,
            frame_count: 0,
        })
    }

    fn fetch(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(self.url.as_str())
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => {
                    CaptureError::read(self.url.as_str(), format!("http status {}", code))
                }
                ureq::Error::Transport(transport) => {
                    CaptureError::unavailable(self.url.as_str(), transport)
                }
            })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|err| CaptureError::read(self.url.as_str(), err))?;
        if bytes.is_empty() {
            return Err(CaptureError::read(self.url.as_str(), "empty snapshot"));
        }
        if bytes.len() as u64 > MAX_SNAPSHOT_BYTES {
            return Err(CaptureError::read(self.url.as_str(), "snapshot too large"));
        }
        Ok(bytes)
    }
}

impl FrameSource for HttpSnapshotSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    fn capture(&mut self) -> Result<Frame> {
        let bytes = self.fetch()?;
        let frame =
            Frame::decode(&bytes).map_err(|err| CaptureError::read(self.url.as_str(), err))?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
