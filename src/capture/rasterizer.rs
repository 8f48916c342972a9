//! Full-tab raster capture seam.
//!
//! The coordinator only sees the [`Rasterizer`] trait; the production
//! implementation talks to the OS through the `xcap` crate. Capture happens
//! exactly once per user action and there is no retry — a failure here is
//! terminal for the action.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use xcap::Monitor;

/// One full visible-tab bitmap, PNG-encoded at full quality, plus its
/// intrinsic pixel dimensions. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct RasterCapture {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Produces the single raster capture for a user action.
///
/// Implementations may block; the coordinator calls this from a blocking
/// task.
pub trait Rasterizer: Send + Sync + 'static {
    fn capture(&self) -> Result<RasterCapture, RasterizeError>;
}

/// Captures the primary monitor's screen through `xcap`.
pub struct ScreenRasterizer;

impl Rasterizer for ScreenRasterizer {
    fn capture(&self) -> Result<RasterCapture, RasterizeError> {
        let monitors =
            Monitor::all().map_err(|e| RasterizeError::MonitorEnumeration(e.to_string()))?;

        let primary = monitors
            .into_iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| {
                // Fallback: if no monitor reports as primary, use the first one
                let all = Monitor::all().ok()?;
                all.into_iter().next()
            })
            .ok_or(RasterizeError::NoPrimaryMonitor)?;

        let image = primary
            .capture_image()
            .map_err(|e| RasterizeError::CaptureFailed(e.to_string()))?;

        encode_capture(DynamicImage::ImageRgba8(image))
    }
}

/// PNG-encode a captured bitmap into a [`RasterCapture`].
pub fn encode_capture(image: DynamicImage) -> Result<RasterCapture, RasterizeError> {
    let (width, height) = (image.width(), image.height());

    let mut png: Vec<u8> = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| RasterizeError::EncodingFailed(e.to_string()))?;

    Ok(RasterCapture { png, width, height })
}

#[derive(Debug, thiserror::Error)]
pub enum RasterizeError {
    #[error("Failed to enumerate monitors: {0}")]
    MonitorEnumeration(String),

    #[error("No primary monitor found")]
    NoPrimaryMonitor,

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),
}
