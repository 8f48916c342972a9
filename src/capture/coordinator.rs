//! Capture coordinator — raster capture, cropper lifecycle, fallback policy.
//!
//! One actor drives each capture action through
//! `Idle → Capturing → Cropping → Delivering → Idle`, branching through
//! `CroppingFailed → FallbackDelivering` when anything in the crop stage
//! fails or times out. Cropping is a best-effort enhancement: every failure
//! below this level degrades to delivering the uncropped capture with an
//! audit note, and only rasterization or delivery failures surface to the
//! submitter.
//!
//! Exclusivity is by construction: the actor consumes its inbox one
//! submission at a time, so at most one raster capture and one crop request
//! exist system-wide; later user actions queue in the channel.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};

use super::cropper::{CropError, CropRequest, CropperHandle, DECODE_TIMEOUT};
use super::rasterizer::{RasterCapture, Rasterizer, RasterizeError};
use crate::delivery::{
    png_data_url, DeliveryError, DeliveryReceipt, DeliverySink, FeedbackRecord,
    SaveFeedbackRequest,
};
use crate::selection::SelectionRect;
use crate::store::{FeedbackStore, HistoryEntry};

/// Bound on waiting for a crop result. On expiry the completion token is
/// dropped, so a late result is discarded rather than double-processed.
pub const CROP_WAIT: Duration = Duration::from_secs(10);

/// One user action, as emitted by the selector.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Final selection in CSS pixels, post scroll correction.
    pub selection: SelectionRect,
    /// Device pixel ratio read at selection time.
    pub dpr: f64,
    pub feedback: String,
    pub page_url: String,
}

/// Action-level failure surfaced to the submitter. Cropping-stage failures
/// never appear here; they degrade to the fallback path.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Screenshot capture failed: {0}")]
    Rasterization(#[from] RasterizeError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Capture pipeline is shut down")]
    PipelineClosed,
}

/// Why the crop stage fell back to the uncropped capture. The rendered
/// reason ends up inside the audit note appended to the feedback text.
#[derive(Debug, thiserror::Error)]
enum CropFallback {
    #[error("cropper unavailable")]
    CropperUnavailable,

    #[error("no crop result within {}s", CROP_WAIT.as_secs())]
    Timeout,

    #[error("{0}")]
    Failed(#[from] CropError),
}

struct Submission {
    request: CaptureRequest,
    done: oneshot::Sender<Result<DeliveryReceipt, ActionError>>,
}

/// Cloneable handle for submitting capture requests to the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Submission>,
}

impl CoordinatorHandle {
    /// Submit one capture request and wait for its action-level result.
    /// Requests queue behind any in-flight action.
    pub async fn submit(&self, request: CaptureRequest) -> Result<DeliveryReceipt, ActionError> {
        let (done, result) = oneshot::channel();
        self.tx
            .send(Submission { request, done })
            .await
            .map_err(|_| ActionError::PipelineClosed)?;
        result.await.map_err(|_| ActionError::PipelineClosed)?
    }
}

/// The coordinator actor. Owns the rasterizer seam, the single cropper
/// worker, and the delivery sink.
pub struct Coordinator<R: Rasterizer, S: DeliverySink> {
    rasterizer: Arc<R>,
    sink: S,
    store: Arc<FeedbackStore>,
    cropper: Option<CropperHandle>,
    crop_wait: Duration,
    last_id_ms: u64,
}

impl<R: Rasterizer, S: DeliverySink> Coordinator<R, S> {
    pub fn new(rasterizer: R, sink: S, store: Arc<FeedbackStore>) -> Self {
        Self {
            rasterizer: Arc::new(rasterizer),
            sink,
            store,
            cropper: None,
            crop_wait: CROP_WAIT,
            last_id_ms: 0,
        }
    }

    /// Start the actor and return its submission handle.
    pub fn spawn(mut self) -> CoordinatorHandle {
        let (tx, mut rx) = mpsc::channel::<Submission>(8);
        let _actor = tokio::spawn(async move {
            while let Some(submission) = rx.recv().await {
                let result = self.handle(submission.request).await;
                // Submitter may have gone away; the action still completed.
                let _ = submission.done.send(result);
            }
            log::debug!("Coordinator stopped");
        });
        CoordinatorHandle { tx }
    }

    /// Drive one capture request through the state machine.
    async fn handle(&mut self, request: CaptureRequest) -> Result<DeliveryReceipt, ActionError> {
        let start = Instant::now();
        log::debug!("Capturing for {}", request.page_url);

        // Capturing: exactly one rasterization, no retry.
        let raster = self.rasterize().await?;
        log::info!(
            "Raster capture {}x{} ({} bytes) in {}ms",
            raster.width,
            raster.height,
            raster.png.len(),
            start.elapsed().as_millis()
        );

        // Cropping, or the fallback branch. The cropper runs in its own
        // context with no shared memory, so it gets its own copy of the
        // raster; the coordinator keeps the original for fallback.
        let (image_png, feedback_text) = match self.crop_stage(&raster, &request).await {
            Ok(cropped) => (cropped, request.feedback.clone()),
            Err(reason) => {
                log::warn!("Cropping failed ({reason}) — delivering uncropped capture");
                (
                    raster.png.clone(),
                    append_fallback_note(&request.feedback, &request.selection, &reason),
                )
            }
        };
        drop(raster);

        // Delivering.
        let receipt = self.deliver(&request, feedback_text, image_png).await?;
        log::info!(
            "Feedback #{} delivered in {}ms — saved to {}",
            receipt.request_id,
            start.elapsed().as_millis(),
            receipt.screenshot_path
        );
        Ok(receipt)
    }

    async fn rasterize(&self) -> Result<RasterCapture, ActionError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        match tokio::task::spawn_blocking(move || rasterizer.capture()).await {
            Ok(Ok(raster)) => Ok(raster),
            Ok(Err(e)) => {
                log::error!("Rasterization failed: {e}");
                Err(ActionError::Rasterization(e))
            }
            Err(join) => {
                log::error!("Rasterization task failed: {join}");
                Err(ActionError::Rasterization(RasterizeError::CaptureFailed(
                    join.to_string(),
                )))
            }
        }
    }

    /// Get the live cropper worker, creating it on first use. Creation is
    /// idempotent: an existing worker is reused, never duplicated.
    fn ensure_cropper(&mut self) -> &CropperHandle {
        self.cropper.get_or_insert_with(|| {
            log::info!("Starting cropper worker");
            CropperHandle::spawn()
        })
    }

    async fn crop_stage(
        &mut self,
        raster: &RasterCapture,
        request: &CaptureRequest,
    ) -> Result<Vec<u8>, CropFallback> {
        let wait = self.crop_wait;
        let token = self
            .ensure_cropper()
            .submit(CropRequest {
                raster: raster.clone(),
                selection: request.selection,
                dpr: request.dpr,
            })
            .await;

        match tokio::time::timeout(wait, token).await {
            // Dropping the token here is what discards a late crop result.
            Err(_) => Err(CropFallback::Timeout),
            Ok(Err(_)) => Err(CropFallback::CropperUnavailable),
            Ok(Ok(Err(e))) => Err(CropFallback::Failed(e)),
            Ok(Ok(Ok(png))) => Ok(png),
        }
    }

    async fn deliver(
        &mut self,
        request: &CaptureRequest,
        feedback_text: String,
        image_png: Vec<u8>,
    ) -> Result<DeliveryReceipt, ActionError> {
        let root_folder = self.store.root_folder();
        if root_folder.is_empty() {
            log::error!("Root folder path not set — cannot deliver");
            return Err(DeliveryError::MissingRootFolder.into());
        }

        let (id, timestamp_ms) = self.next_request_id();
        let record = FeedbackRecord {
            id,
            feedback_text,
            page_url: request.page_url.clone(),
            timestamp_ms,
            image_data_url: png_data_url(&image_png),
        };

        let receipt = self
            .sink
            .deliver(SaveFeedbackRequest {
                root_folder,
                feedback_text: record.feedback_text.clone(),
                image_data_url: record.image_data_url.clone(),
                request_id: record.id.clone(),
            })
            .await
            .map_err(|e| {
                log::error!("Delivery failed: {e}");
                ActionError::Delivery(e)
            })?;

        // History is bookkeeping; a persistence hiccup must not fail an
        // already-delivered action.
        let entry = HistoryEntry {
            id: record.id,
            feedback: record.feedback_text,
            page_url: record.page_url,
            timestamp_ms: record.timestamp_ms,
            prompt: receipt.prompt.clone(),
            screenshot_path: receipt.screenshot_path.clone(),
        };
        if let Err(e) = self.store.record(entry) {
            log::warn!("Failed to persist history entry: {e}");
        }

        Ok(receipt)
    }

    /// Millisecond-clock request id, bumped past the previous one so ids
    /// stay unique even for captures in the same millisecond.
    fn next_request_id(&mut self) -> (String, u64) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let id_ms = now_ms.max(self.last_id_ms + 1);
        self.last_id_ms = id_ms;
        (id_ms.to_string(), now_ms)
    }
}

/// Append the audit note for an uncropped delivery: the originally
/// requested rectangle must remain readable downstream.
fn append_fallback_note(
    feedback: &str,
    selection: &SelectionRect,
    reason: &CropFallback,
) -> String {
    format!(
        "{feedback}\n\n[Screenshot delivered uncropped ({reason}); requested region was \
         x={}, y={}, width={}, height={}]",
        selection.x, selection.y, selection.width, selection.height
    )
}

// Decode timeout belongs to the cropper, but the coordinator's wait must
// outlast it or every stalled decode would be misreported as a crop timeout.
const _: () = assert!(CROP_WAIT.as_millis() > DECODE_TIMEOUT.as_millis());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::rasterizer::encode_capture;
    use crate::delivery::strip_png_data_url;
    use image::{DynamicImage, RgbaImage};
    use std::sync::Mutex;

    struct FakeRasterizer {
        raster: Result<RasterCapture, String>,
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl FakeRasterizer {
        fn ok(width: u32, height: u32) -> Self {
            let raster =
                encode_capture(DynamicImage::ImageRgba8(RgbaImage::new(width, height))).unwrap();
            Self { raster: Ok(raster), calls: Arc::default() }
        }

        fn failing() -> Self {
            Self { raster: Err("permission denied".to_string()), calls: Arc::default() }
        }

        fn calls(&self) -> Arc<std::sync::atomic::AtomicUsize> {
            Arc::clone(&self.calls)
        }
    }

    impl Rasterizer for FakeRasterizer {
        fn capture(&self) -> Result<RasterCapture, RasterizeError> {
            let _ = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.raster
                .clone()
                .map_err(RasterizeError::CaptureFailed)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        submissions: Arc<Mutex<Vec<SaveFeedbackRequest>>>,
        reject: bool,
    }

    impl RecordingSink {
        fn submissions(&self) -> Vec<SaveFeedbackRequest> {
            self.submissions.lock().unwrap().clone()
        }
    }

    impl DeliverySink for RecordingSink {
        async fn deliver(
            &self,
            request: SaveFeedbackRequest,
        ) -> Result<DeliveryReceipt, DeliveryError> {
            self.submissions.lock().unwrap().push(request.clone());
            if self.reject {
                return Err(DeliveryError::Rejected {
                    status: 500,
                    message: "disk full".to_string(),
                });
            }
            Ok(DeliveryReceipt {
                request_id: request.request_id.clone(),
                screenshot_path: format!("/tmp/out/screenshot-{}.png", request.request_id),
                prompt: "Implement this UI/UX feedback".to_string(),
            })
        }
    }

    fn store() -> Arc<FeedbackStore> {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::load(dir.path().join("store.json")).unwrap();
        store.set_root_folder("/tmp/out").unwrap();
        // Leak the tempdir so the path outlives the test body.
        std::mem::forget(dir);
        Arc::new(store)
    }

    fn request() -> CaptureRequest {
        CaptureRequest {
            selection: SelectionRect { x: 100.0, y: 100.0, width: 200.0, height: 150.0 },
            dpr: 2.0,
            feedback: "make the header sticky".to_string(),
            page_url: "https://example.test/app".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_action_delivers_the_cropped_image() {
        let sink = RecordingSink::default();
        let rasterizer = FakeRasterizer::ok(800, 600);
        let calls = rasterizer.calls();
        let handle = Coordinator::new(rasterizer, sink.clone(), store()).spawn();

        let receipt = handle.submit(request()).await.unwrap();
        assert!(receipt.screenshot_path.contains(&receipt.request_id));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let submissions = sink.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].feedback_text, "make the header sticky");

        let png = strip_png_data_url(&submissions[0].image_data_url).unwrap();
        let out = image::load_from_memory(&png).unwrap();
        // CSS-pixel output size, independent of the dpr-2 source region.
        assert_eq!((out.width(), out.height()), (200, 150));
    }

    #[tokio::test]
    async fn invalid_selection_falls_back_to_uncropped_with_note() {
        let sink = RecordingSink::default();
        let handle =
            Coordinator::new(FakeRasterizer::ok(800, 600), sink.clone(), store()).spawn();

        let mut req = request();
        req.selection = SelectionRect { x: 5.0, y: 5.0, width: 0.0, height: 40.0 };
        handle.submit(req).await.unwrap();

        let submissions = sink.submissions();
        assert_eq!(submissions.len(), 1);
        // Delivered image is the unmodified full capture.
        let png = strip_png_data_url(&submissions[0].image_data_url).unwrap();
        let out = image::load_from_memory(&png).unwrap();
        assert_eq!((out.width(), out.height()), (800, 600));
        // Audit note carries the literal requested rectangle.
        let text = &submissions[0].feedback_text;
        assert!(text.starts_with("make the header sticky"));
        assert!(text.contains("x=5, y=5, width=0, height=40"), "note missing in {text:?}");
    }

    fn stalled_decode(_bytes: &[u8]) -> image::ImageResult<DynamicImage> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(DynamicImage::ImageRgba8(RgbaImage::new(1, 1)))
    }

    #[tokio::test]
    async fn stalled_decode_falls_back_to_uncropped_with_note() {
        let sink = RecordingSink::default();
        let mut coordinator =
            Coordinator::new(FakeRasterizer::ok(800, 600), sink.clone(), store());
        // Real worker, with a decoder that outlives a shortened decode bound.
        coordinator.cropper =
            Some(CropperHandle::spawn_with(stalled_decode, Duration::from_millis(20)));
        let handle = coordinator.spawn();

        handle.submit(request()).await.unwrap();

        let submissions = sink.submissions();
        assert_eq!(submissions.len(), 1);
        let png = strip_png_data_url(&submissions[0].image_data_url).unwrap();
        let out = image::load_from_memory(&png).unwrap();
        assert_eq!((out.width(), out.height()), (800, 600));
        let text = &submissions[0].feedback_text;
        assert!(text.starts_with("make the header sticky"));
        assert!(
            text.ends_with("x=100, y=100, width=200, height=150]"),
            "note missing in {text:?}"
        );
    }

    #[tokio::test]
    async fn rasterization_failure_is_terminal_and_nothing_is_delivered() {
        let sink = RecordingSink::default();
        let handle = Coordinator::new(FakeRasterizer::failing(), sink.clone(), store()).spawn();

        let err = handle.submit(request()).await.unwrap_err();
        assert!(matches!(err, ActionError::Rasterization(_)));
        assert!(sink.submissions().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_surfaces_without_retry() {
        let sink = RecordingSink { reject: true, ..Default::default() };
        let handle =
            Coordinator::new(FakeRasterizer::ok(100, 100), sink.clone(), store()).spawn();

        let err = handle.submit(request()).await.unwrap_err();
        assert!(matches!(err, ActionError::Delivery(DeliveryError::Rejected { .. })));
        assert_eq!(sink.submissions().len(), 1);
    }

    #[tokio::test]
    async fn unset_root_folder_fails_delivery_before_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let empty_store =
            Arc::new(FeedbackStore::load(dir.path().join("store.json")).unwrap());
        let sink = RecordingSink::default();
        let handle =
            Coordinator::new(FakeRasterizer::ok(100, 100), sink.clone(), empty_store).spawn();

        let err = handle.submit(request()).await.unwrap_err();
        assert!(matches!(
            err,
            ActionError::Delivery(DeliveryError::MissingRootFolder)
        ));
        assert!(sink.submissions().is_empty());
    }

    #[tokio::test]
    async fn successful_action_is_recorded_in_history() {
        let store = store();
        let sink = RecordingSink::default();
        let handle =
            Coordinator::new(FakeRasterizer::ok(400, 300), sink, Arc::clone(&store)).spawn();

        let receipt = handle.submit(request()).await.unwrap();
        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, receipt.request_id);
        assert_eq!(entries[0].prompt, receipt.prompt);
        assert_eq!(entries[0].feedback, "make the header sticky");
    }

    #[tokio::test]
    async fn cropper_creation_is_idempotent() {
        let mut coordinator =
            Coordinator::new(FakeRasterizer::ok(10, 10), RecordingSink::default(), store());
        assert!(coordinator.cropper.is_none());

        let first = coordinator.ensure_cropper().clone();
        let second = coordinator.ensure_cropper().clone();
        assert!(first.same_worker(&second), "second ensure spawned a new worker");
        assert!(!first.same_worker(&CropperHandle::spawn()));
    }

    #[tokio::test(start_paused = true)]
    async fn crop_timeout_falls_back_and_discards_the_late_result() {
        let sink = RecordingSink::default();
        let mut coordinator =
            Coordinator::new(FakeRasterizer::ok(800, 600), sink.clone(), store());

        // Scripted cropper: hold the reply past the coordinator's wait,
        // then answer late.
        let (stub, mut jobs) = CropperHandle::stub();
        coordinator.cropper = Some(stub);
        let late_send = tokio::spawn(async move {
            let job = jobs.recv().await.expect("coordinator sent no crop request");
            tokio::time::sleep(CROP_WAIT + Duration::from_secs(5)).await;
            job.reply.send(Ok(vec![1, 2, 3]))
        });

        let handle = coordinator.spawn();
        let receipt = handle.submit(request()).await.unwrap();
        assert!(!receipt.request_id.is_empty());

        // Fallback already delivered the full capture with the audit note.
        let submissions = sink.submissions();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].feedback_text.contains("x=100, y=100, width=200, height=150"));
        let png = strip_png_data_url(&submissions[0].image_data_url).unwrap();
        let out = image::load_from_memory(&png).unwrap();
        assert_eq!((out.width(), out.height()), (800, 600));

        // The late crop result hits a dropped completion token: discarded,
        // and the delivered record is untouched.
        assert!(late_send.await.unwrap().is_err());
        assert_eq!(sink.submissions(), submissions);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_queues_until_the_first_resolves() {
        let sink = RecordingSink::default();
        let store = store();
        let mut coordinator = Coordinator::new(
            FakeRasterizer::ok(100, 100),
            sink.clone(),
            Arc::clone(&store),
        );
        let (stub, mut jobs) = CropperHandle::stub();
        coordinator.cropper = Some(stub);
        let handle = coordinator.spawn();

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(request()).await })
        };
        let second = {
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut req = request();
                req.feedback = "second action".to_string();
                handle.submit(req).await
            })
        };

        // Only the first action's crop request may be in flight; the second
        // must not interleave while the first is pending.
        let job = jobs.recv().await.unwrap();
        tokio::task::yield_now().await;
        assert!(jobs.try_recv().is_err(), "second crop request interleaved");

        job.reply.send(Ok(tiny_png())).unwrap();
        first.await.unwrap().unwrap();

        // Now, and only now, the queued action proceeds.
        let job = jobs.recv().await.unwrap();
        job.reply.send(Ok(tiny_png())).unwrap();
        second.await.unwrap().unwrap();

        let feedbacks: Vec<_> =
            sink.submissions().into_iter().map(|s| s.feedback_text).collect();
        assert_eq!(feedbacks, ["make the header sticky", "second action"]);
    }

    fn tiny_png() -> Vec<u8> {
        encode_capture(DynamicImage::ImageRgba8(RgbaImage::new(1, 1)))
            .unwrap()
            .png
    }
}
