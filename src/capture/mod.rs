//! Capture domain — public API.
//!
//! Everything between a finalized selection and a delivered artifact: the
//! raster-capture seam, the isolated cropper worker, and the coordinator
//! that arbitrates between the cropping path and the uncropped fallback.

mod coordinator;
mod cropper;
mod rasterizer;

pub use coordinator::{ActionError, CaptureRequest, Coordinator, CoordinatorHandle, CROP_WAIT};
pub use cropper::{
    crop_image, device_region, validate_shape, CropError, CropRequest, CropResult, CropperHandle,
    SourceRegion, DECODE_TIMEOUT,
};
pub use rasterizer::{encode_capture, RasterCapture, Rasterizer, RasterizeError, ScreenRasterizer};
