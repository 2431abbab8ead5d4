//! Frame type and image operations: JPEG decode, mirroring, downscaling.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// A decoded camera frame in RGB channel order.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    /// Monotonic per-source frame counter.
    pub sequence: u64,
}

impl Frame {
    /// Decode an encoded still (JPEG from the camera, any format `image` knows).
    pub fn decode(bytes: &[u8], sequence: u64) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let image = image::load_from_memory(bytes)?.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(FrameError::Empty);
        }
        Ok(Self {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Flip left-right in place, so the preview behaves like a mirror.
    pub fn mirror(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.image);
    }

    /// A copy shrunk by an integer `factor` (bilinear), at least 1×1.
    pub fn downscaled(&self, factor: u32) -> RgbImage {
        if factor <= 1 {
            return self.image.clone();
        }
        let w = ((self.width() as f32 / factor as f32).round() as u32).max(1);
        let h = ((self.height() as f32 / factor as f32).round() as u32).max(1);
        imageops::resize(&self.image, w, h, FilterType::Triangle)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty image")]
    Empty,
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
}
