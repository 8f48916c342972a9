//! Cropper — pixel-accurate, bounds-safe cropping of a raster capture.
//!
//! Two layers:
//!
//! - Pure math (`validate_shape`, `device_region`, `crop_image`): CSS-pixel
//!   selection × device pixel ratio → clamped device-pixel source region →
//!   CSS-pixel-sized output surface. Zero infrastructure dependencies.
//! - The worker (`CropperHandle`): a dedicated task with no access to the
//!   coordinator's state. It receives `(CropRequest, reply)` messages and
//!   answers every one with a tagged result — it never leaves a request
//!   unanswered, even on failure.

use std::io::Cursor;
use std::time::{Duration, Instant};

use image::{imageops::FilterType, DynamicImage, ImageFormat};
use tokio::sync::{mpsc, oneshot};

use super::rasterizer::RasterCapture;
use crate::selection::SelectionRect;

/// Bound on decoding the incoming raster image. A stalled decode produces
/// `DecodeTimeout`; a decode finishing after that is discarded.
pub const DECODE_TIMEOUT: Duration = Duration::from_secs(5);

/// The unit of work sent to the cropper. Exactly one is outstanding
/// system-wide at a time; the coordinator enforces that.
#[derive(Debug)]
pub struct CropRequest {
    pub raster: RasterCapture,
    pub selection: SelectionRect,
    pub dpr: f64,
}

/// Terminal result of one crop request: PNG bytes of the cropped region,
/// or a tagged reason.
pub type CropResult = Result<Vec<u8>, CropError>;

#[derive(Debug, thiserror::Error)]
pub enum CropError {
    #[error("Invalid selection shape: {0}")]
    InvalidSelectionShape(String),

    #[error("Source image has zero width or height")]
    EmptySourceImage,

    #[error("Failed to decode raster capture: {0}")]
    DecodeFailed(String),

    #[error("Raster decode did not finish within {}s", DECODE_TIMEOUT.as_secs())]
    DecodeTimeout,

    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),
}

// ── Pure core ───────────────────────────────────────────────────────

/// Device-pixel source rectangle, clamped to image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Reject selections that cannot describe a crop region.
pub fn validate_shape(selection: &SelectionRect, dpr: f64) -> Result<(), CropError> {
    let fields = [selection.x, selection.y, selection.width, selection.height];
    if fields.iter().any(|v| !v.is_finite()) {
        return Err(CropError::InvalidSelectionShape(
            "selection fields must be finite numbers".to_string(),
        ));
    }
    if selection.width <= 0.0 || selection.height <= 0.0 {
        return Err(CropError::InvalidSelectionShape(format!(
            "width and height must be positive, got {}x{}",
            selection.width, selection.height
        )));
    }
    if !(dpr.is_finite() && dpr > 0.0) {
        return Err(CropError::InvalidSelectionShape(format!(
            "device pixel ratio must be a positive number, got {dpr}"
        )));
    }
    Ok(())
}

/// Translate a CSS-pixel selection into a device-pixel source region
/// clamped to an image of `image_width` × `image_height`. A zero-sized
/// image can contain no region and yields `EmptySourceImage`.
///
/// Each field is DPR-scaled and rounded independently, not derived from a
/// single rounded rectangle, so opposite edges can drift ±1 px. Downstream
/// consumers depend on this rounding order.
///
/// Clamping is ordered: x/y first, then width/height against the remaining
/// span, then a 1-px floor so the region is never degenerate. This
/// guarantees `x + width <= image_width` and `y + height <= image_height`.
pub fn device_region(
    selection: &SelectionRect,
    dpr: f64,
    image_width: u32,
    image_height: u32,
) -> Result<SourceRegion, CropError> {
    if image_width == 0 || image_height == 0 {
        return Err(CropError::EmptySourceImage);
    }

    let scaled_x = (selection.x * dpr).round() as i64;
    let scaled_y = (selection.y * dpr).round() as i64;
    let scaled_width = (selection.width * dpr).round() as i64;
    let scaled_height = (selection.height * dpr).round() as i64;

    let safe_x = scaled_x.clamp(0, i64::from(image_width) - 1);
    let safe_y = scaled_y.clamp(0, i64::from(image_height) - 1);
    let safe_width = scaled_width.min(i64::from(image_width) - safe_x).max(1);
    let safe_height = scaled_height.min(i64::from(image_height) - safe_y).max(1);

    Ok(SourceRegion {
        x: safe_x as u32,
        y: safe_y as u32,
        width: safe_width as u32,
        height: safe_height as u32,
    })
}

/// Crop a decoded raster to the selection and encode the result as PNG.
///
/// The output surface is sized to the *original* CSS-pixel width/height
/// (floored at 1 each), not the device-pixel size: the clamped device-pixel
/// region is drawn scaled into it, so the delivered image matches what the
/// user visually selected regardless of DPR.
pub fn crop_image(
    image: &DynamicImage,
    selection: &SelectionRect,
    dpr: f64,
) -> Result<Vec<u8>, CropError> {
    validate_shape(selection, dpr)?;

    let src = device_region(selection, dpr, image.width(), image.height())?;
    let out_width = selection.width.round().max(1.0) as u32;
    let out_height = selection.height.round().max(1.0) as u32;

    let cropped = image.crop_imm(src.x, src.y, src.width, src.height);
    let output = if (cropped.width(), cropped.height()) == (out_width, out_height) {
        cropped
    } else {
        cropped.resize_exact(out_width, out_height, FilterType::Triangle)
    };

    let mut png: Vec<u8> = Vec::new();
    output
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| CropError::EncodingFailed(e.to_string()))?;

    Ok(png)
}

// ── Worker ──────────────────────────────────────────────────────────

pub(crate) struct Job {
    pub(crate) request: CropRequest,
    pub(crate) reply: oneshot::Sender<CropResult>,
}

/// Handle to the single cropper worker task.
///
/// The worker owns nothing shared: requests and results travel as owned
/// message payloads. Dropping every handle shuts the worker down.
#[derive(Clone)]
pub struct CropperHandle {
    tx: mpsc::Sender<Job>,
}

/// How the worker turns raster bytes into pixels. A seam so the decode
/// bound can be exercised with a decoder that never finishes in time.
pub(crate) type DecodeFn = fn(&[u8]) -> image::ImageResult<DynamicImage>;

fn decode_png(bytes: &[u8]) -> image::ImageResult<DynamicImage> {
    image::load_from_memory(bytes)
}

impl CropperHandle {
    /// Start a cropper worker task and return its handle.
    pub fn spawn() -> Self {
        Self::spawn_with(decode_png, DECODE_TIMEOUT)
    }

    /// Worker with an explicit decoder and decode bound.
    pub(crate) fn spawn_with(decode: DecodeFn, decode_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(4);
        let _worker = tokio::spawn(async move {
            log::debug!("Cropper worker started");
            while let Some(job) = rx.recv().await {
                let result = handle_request(job.request, decode, decode_timeout).await;
                // Single-slot completion: if the coordinator timed out and
                // dropped its receiver, this late write is a no-op.
                let _ = job.reply.send(result);
            }
            log::debug!("Cropper worker stopped");
        });
        Self { tx }
    }

    /// Submit one crop request, returning the completion token for its
    /// result. If the worker is gone, the returned receiver resolves to a
    /// receive error, which the coordinator treats as cropper-unavailable.
    pub async fn submit(&self, request: CropRequest) -> oneshot::Receiver<CropResult> {
        let (reply, receiver) = oneshot::channel();
        if let Err(e) = self.tx.send(Job { request, reply }).await {
            log::error!("Cropper worker unavailable: {e}");
        }
        receiver
    }

    /// Whether two handles point at the same worker.
    pub fn same_worker(&self, other: &CropperHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Handle over a raw job channel, for driving the coordinator against
    /// a scripted worker in tests.
    #[cfg(test)]
    pub(crate) fn stub() -> (CropperHandle, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(4);
        (CropperHandle { tx }, rx)
    }
}

async fn handle_request(
    request: CropRequest,
    decode: DecodeFn,
    decode_timeout: Duration,
) -> CropResult {
    let start = Instant::now();
    let CropRequest { raster, selection, dpr } = request;

    validate_shape(&selection, dpr)?;

    let decoding = tokio::task::spawn_blocking(move || decode(&raster.png));
    let image = match tokio::time::timeout(decode_timeout, decoding).await {
        // Dropping the join handle discards whatever the decode produces
        // after the deadline.
        Err(_) => return Err(CropError::DecodeTimeout),
        Ok(Err(join)) => return Err(CropError::DecodeFailed(join.to_string())),
        Ok(Ok(Err(e))) => return Err(CropError::DecodeFailed(e.to_string())),
        Ok(Ok(Ok(image))) => image,
    };

    let png = crop_image(&image, &selection, dpr)?;

    log::info!(
        "Cropped {}x{} selection at dpr {} in {}ms — {} bytes",
        selection.width,
        selection.height,
        dpr,
        start.elapsed().as_millis(),
        png.len()
    );
    Ok(png)
}
