//! Selector — turns a pointer drag into a capture request.
//!
//! Runs in the page context. It owns nothing beyond the in-progress
//! rectangle: pointer events arrive on a channel, the page is reached only
//! through the [`Viewport`] seam, and the finished request leaves on the
//! coordinator's channel. Cancellation discards local state and sends
//! nothing downstream.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use super::rect::{ScrollDelta, SelectionRect};
use crate::capture::CaptureRequest;

/// Fixed wait for a corrective scroll to settle before the offset is
/// re-measured.
pub const SCROLL_SETTLE: Duration = Duration::from_millis(300);

/// A pointer event forwarded from the page overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Up { x: f64, y: f64 },
    /// Explicit cancel (escape key). Discards the in-progress selection.
    Cancel,
}

/// Read and scroll access to the page viewport.
///
/// The real implementation lives with the embedding overlay; tests use
/// fakes that clamp scrolling at the document edges the way browsers do.
pub trait Viewport {
    /// Viewport size in CSS pixels.
    fn size(&self) -> (f64, f64);
    /// Current scroll offset in CSS pixels.
    fn scroll_offset(&self) -> (f64, f64);
    /// Request an absolute scroll. The browser may clamp at document edges,
    /// which is why the achieved offset must be re-measured afterwards.
    fn scroll_to(&mut self, x: f64, y: f64);
    /// Device pixel ratio at selection time.
    fn device_pixel_ratio(&self) -> f64;
    /// URL of the page being annotated.
    fn page_url(&self) -> String;
}

/// Collects free-text feedback from the user for a finalized selection.
///
/// Returning `None` cancels the action.
pub trait FeedbackPrompt {
    fn request_feedback(
        &self,
        rect: &SelectionRect,
    ) -> impl Future<Output = Option<String>> + Send;
}

/// How a selection attempt ended. `TooSmall` and `Cancelled` emit nothing
/// downstream; the embedder can use them to notify the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// A capture request was handed to the coordinator.
    Submitted,
    /// Finalized selection was under the minimum size and was discarded.
    TooSmall,
    /// Cancelled by the user (escape, empty feedback) or by channel teardown.
    Cancelled,
}

/// Tracks one pointer drag at a time against a viewport.
pub struct Selector<V: Viewport> {
    viewport: V,
}

impl<V: Viewport> Selector<V> {
    pub fn new(viewport: V) -> Self {
        Self { viewport }
    }

    /// Run one full selection: drag, validate, corrective scroll, feedback
    /// prompt, emit. Returns once the drag ends or is cancelled.
    pub async fn begin_selection<P: FeedbackPrompt>(
        &mut self,
        events: &mut mpsc::Receiver<PointerEvent>,
        prompt: &P,
        requests: &mpsc::Sender<CaptureRequest>,
    ) -> SelectionOutcome {
        let Some(mut rect) = track_drag(events).await else {
            log::debug!("Selection cancelled before pointer-up");
            return SelectionOutcome::Cancelled;
        };

        if !rect.is_large_enough() {
            log::warn!(
                "Selection {}x{} under minimum size — discarded",
                rect.width, rect.height
            );
            return SelectionOutcome::TooSmall;
        }

        self.correct_viewport(&mut rect).await;

        let Some(feedback) = prompt.request_feedback(&rect).await else {
            log::debug!("Feedback prompt cancelled");
            return SelectionOutcome::Cancelled;
        };
        let feedback = feedback.trim().to_string();
        if feedback.is_empty() {
            log::debug!("Empty feedback — selection discarded");
            return SelectionOutcome::Cancelled;
        }

        let request = CaptureRequest {
            selection: rect,
            dpr: self.viewport.device_pixel_ratio(),
            feedback,
            page_url: self.viewport.page_url(),
        };

        if requests.send(request).await.is_err() {
            log::error!("Capture pipeline is gone — dropping selection");
            return SelectionOutcome::Cancelled;
        }
        SelectionOutcome::Submitted
    }

    /// If the rectangle escapes the viewport, scroll to center it, wait for
    /// the scroll to settle, and re-anchor by the *measured* delta.
    ///
    /// The requested target may be unreachable (document shorter than the
    /// viewport, selection near an edge); using the requested delta instead
    /// of the measured one silently breaks near-edge selections.
    async fn correct_viewport(&mut self, rect: &mut SelectionRect) {
        let viewport = self.viewport.size();
        if !rect.escapes_viewport(viewport.0, viewport.1) {
            return;
        }

        let before = self.viewport.scroll_offset();
        let (tx, ty) = rect.centering_scroll_target(before, viewport);
        log::debug!(
            "Selection escapes viewport — scrolling to ({:.0}, {:.0})",
            tx, ty
        );
        self.viewport.scroll_to(tx, ty);
        tokio::time::sleep(SCROLL_SETTLE).await;

        let after = self.viewport.scroll_offset();
        let delta = ScrollDelta::measured(before, after);
        rect.reanchor(delta);
        log::info!(
            "Re-anchored selection by measured scroll delta ({:.0}, {:.0})",
            delta.dx, delta.dy
        );
    }
}

/// Consume pointer events until the drag finalizes or is cancelled.
///
/// Moves before the first pointer-down are ignored. A closed channel
/// mid-drag behaves like a cancel.
async fn track_drag(events: &mut mpsc::Receiver<PointerEvent>) -> Option<SelectionRect> {
    let mut anchor: Option<(f64, f64)> = None;

    while let Some(event) = events.recv().await {
        match event {
            PointerEvent::Down { x, y } => anchor = Some((x, y)),
            PointerEvent::Move { .. } => {}
            PointerEvent::Up { x, y } => {
                return anchor.map(|a| SelectionRect::from_drag(a, (x, y)));
            }
            PointerEvent::Cancel => return None,
        }
    }
    None
}
