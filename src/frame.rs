//! Raster frames.
//!
//! - `Frame`: RGB24 raster owned by one iteration of the processing loop.
//! - Working resolution: the fixed size frames are normalised to before
//!   inference and overlay rendering.
//!
//! Frames are built from raw bytes at the codec boundary. A byte buffer whose
//! length does not match the declared dimensions is a malformed frame and is
//! rejected here, before it reaches inference.

use anyhow::{anyhow, Result};
use image::{imageops, imageops::FilterType, RgbImage};

/// Working width in pixels.
pub const WORKING_WIDTH: u32 = 720;

/// Working height in pixels: `720 * 9 / 16`, truncated.
pub const WORKING_HEIGHT: u32 = WORKING_WIDTH * 9 / 16;

// ----------------------------------------------------------------------------
// Frame: RGB raster
// ----------------------------------------------------------------------------

/// One RGB24 frame, row-major, 3 bytes per pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero, got {width}x{height}"));
        }
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer rejected for {width}x{height} frame"))?;
        Ok(Self { image })
    }

    /// Solid-colour frame, mostly useful for synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(rgb_len(width, height)?)
            .collect();
        Self::from_rgb(width, height, pixels)
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Packed RGB24 bytes.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Copy of this frame scaled to `width`x`height`. Returns a plain clone
    /// when the frame already has that size.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Self {
            image: imageops::resize(&self.image, width, height, FilterType::Triangle),
        }
    }

    /// Copy of this frame at the working resolution.
    pub fn to_working_resolution(&self) -> Self {
        self.resized(WORKING_WIDTH, WORKING_HEIGHT)
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_resolution_is_720_by_405() {
        assert_eq!(WORKING_WIDTH, 720);
        assert_eq!(WORKING_HEIGHT, 405);
    }

    #[test]
    fn resize_normalises_any_source_resolution() -> Result<()> {
        for (w, h) in [(1920, 1080), (640, 480), (17, 3), (720, 405), (405, 720)] {
            let frame = Frame::filled(w, h, [10, 20, 30])?;
            let working = frame.to_working_resolution();
            assert_eq!(working.dimensions(), (WORKING_WIDTH, WORKING_HEIGHT));
            assert_eq!(working.pixels().len(), 720 * 405 * 3);
        }
        Ok(())
    }

    #[test]
    fn malformed_buffer_is_rejected() {
        assert!(Frame::from_rgb(2, 2, vec![0u8; 11]).is_err());
        assert!(Frame::from_rgb(0, 2, Vec::new()).is_err());
    }

    #[test]
    fn filled_frame_repeats_colour() -> Result<()> {
        let frame = Frame::filled(2, 1, [1, 2, 3])?;
        assert_eq!(frame.pixels(), &[1, 2, 3, 1, 2, 3]);
        Ok(())
    }
}
