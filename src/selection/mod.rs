//! Selection domain — public API.
//!
//! Everything about turning a pointer drag into a capturable rectangle:
//! pure rectangle math in `rect`, the drag/scroll/prompt flow in `selector`.

mod rect;
mod selector;

pub use rect::{ScrollDelta, SelectionRect, MIN_SELECTION_PX};
pub use selector::{
    FeedbackPrompt, PointerEvent, SelectionOutcome, Selector, Viewport, SCROLL_SETTLE,
};
