//! snip-relay — select a region of a live page, attach feedback, and relay
//! a cropped screenshot to a local agent process.
//!
//! Four cooperating pieces, wired as message-passing actors:
//! - Selection (`selection/`): pointer drag → validated `SelectionRect`,
//!   with corrective scrolling for off-viewport selections.
//! - Capture (`capture/`): coordinator actor owning the raster capture,
//!   the isolated cropper worker, and the uncropped fallback path.
//! - Delivery (`delivery/`): packages the final image + feedback and hands
//!   it to the local agent's file-writing endpoint.
//! - Store (`store`): process-wide root folder path and feedback history.

pub mod capture;
pub mod delivery;
pub mod selection;
pub mod store;

use std::sync::Arc;

use capture::{Coordinator, CoordinatorHandle, ScreenRasterizer};
use delivery::LocalAgentClient;
use store::FeedbackStore;

/// Initialize logging for an embedding process. Levels come from
/// `RUST_LOG`; safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Wire and start the production pipeline: screen rasterizer, local agent
/// delivery, and the given store. Must be called inside a tokio runtime.
///
/// The returned handle is the single submission point for capture
/// requests; the embedding's selector (or keyboard trigger) feeds it.
pub fn spawn_pipeline(store: Arc<FeedbackStore>) -> CoordinatorHandle {
    Coordinator::new(ScreenRasterizer, LocalAgentClient::new(), store).spawn()
}
