//! Network camera capture: one JPEG still per HTTP GET.

use crate::frame::{Frame, FrameError};
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

/// Default upper bound on a single still.
pub const MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("camera returned HTTP {0}")]
    Status(u16),
    #[error("failed to decode image: {0}")]
    Decode(#[from] FrameError),
}

impl CameraError {
    /// The bytes arrived but were not an image.
    pub fn is_decode(&self) -> bool {
        matches!(self, CameraError::Decode(_))
    }
}

/// Anything that hands out decoded frames one at a time.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Camera that serves a still image per request (e.g. ESP32-CAM `/cam-hi.jpg`).
pub struct HttpCamera {
    url: String,
    agent: ureq::Agent,
    sequence: u64,
    max_bytes: u64,
}

impl HttpCamera {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: url.to_string(),
            agent,
            sequence: 0,
            max_bytes: MAX_FRAME_BYTES,
        }
    }

    /// Reject bodies larger than `max_bytes` instead of decoding them.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw body of one GET against the capture endpoint.
    pub fn fetch_bytes(&self) -> Result<Vec<u8>, CameraError> {
        let response = self.agent.get(&self.url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => CameraError::Status(code),
            ureq::Error::Transport(t) => CameraError::Fetch(t.to_string()),
        })?;

        // One byte past the cap tells an oversized body from one that fits exactly.
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| CameraError::Fetch(format!("reading body: {e}")))?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(CameraError::Fetch(format!("body exceeds {} bytes", self.max_bytes)));
        }

        tracing::trace!(url = %self.url, bytes = bytes.len(), "fetched still");
        Ok(bytes)
    }
}

impl FrameSource for HttpCamera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let bytes = self.fetch_bytes()?;
        self.sequence += 1;
        Ok(Frame::decode(&bytes, self.sequence)?)
    }
}
