//! Pure selection geometry — functional core.
//!
//! This module has zero infrastructure dependencies. It knows nothing about
//! pointer events, scrolling, or screenshots; it only does rectangle math
//! in viewport CSS pixels.

use serde::{Deserialize, Serialize};

/// Minimum selection edge length in CSS pixels. Anything smaller is treated
/// as an accidental click and discarded before the pipeline starts.
pub const MIN_SELECTION_PX: f64 = 10.0;

/// A user-selected rectangle in viewport CSS pixels.
///
/// Created from a pointer drag, adjusted at most once if a corrective
/// scroll re-anchors it, then consumed when the capture request is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SelectionRect {
    /// Build a rectangle from a drag anchor and the current pointer position.
    ///
    /// Dragging up or left produces a negative extent; the origin is flipped
    /// so width and height are always non-negative.
    pub fn from_drag(anchor: (f64, f64), current: (f64, f64)) -> Self {
        let (ax, ay) = anchor;
        let (cx, cy) = current;
        Self {
            x: ax.min(cx),
            y: ay.min(cy),
            width: (cx - ax).abs(),
            height: (cy - ay).abs(),
        }
    }

    /// Whether the rectangle meets the minimum capturable size.
    pub fn is_large_enough(&self) -> bool {
        self.width >= MIN_SELECTION_PX && self.height >= MIN_SELECTION_PX
    }

    /// Whether any edge falls outside a viewport of the given size.
    pub fn escapes_viewport(&self, viewport_width: f64, viewport_height: f64) -> bool {
        self.x < 0.0
            || self.y < 0.0
            || self.x + self.width > viewport_width
            || self.y + self.height > viewport_height
    }

    /// Absolute scroll offset that would center this rectangle in the
    /// viewport, given the current scroll offset.
    ///
    /// The result may be unreachable (negative, or past the document edge);
    /// the browser clamps, which is why callers must re-anchor using the
    /// *measured* delta rather than the requested one.
    pub fn centering_scroll_target(
        &self,
        scroll_offset: (f64, f64),
        viewport: (f64, f64),
    ) -> (f64, f64) {
        let (sx, sy) = scroll_offset;
        let (vw, vh) = viewport;
        (
            sx + self.x + self.width / 2.0 - vw / 2.0,
            sy + self.y + self.height / 2.0 - vh / 2.0,
        )
    }

    /// Re-anchor the rectangle after the viewport scrolled by `delta`.
    ///
    /// Content that was at viewport x is at x − dx after scrolling right
    /// by dx, so the rectangle moves against the scroll direction.
    pub fn reanchor(&mut self, delta: ScrollDelta) {
        self.x -= delta.dx;
        self.y -= delta.dy;
    }
}

/// Scroll movement actually achieved by a corrective scroll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollDelta {
    pub dx: f64,
    pub dy: f64,
}

impl ScrollDelta {
    /// Delta between the scroll offset before the corrective scroll and the
    /// offset measured after it settled.
    pub fn measured(before: (f64, f64), after: (f64, f64)) -> Self {
        Self {
            dx: after.0 - before.0,
            dy: after.1 - before.1,
        }
    }

    /// True when the scroll did not move at all.
    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}
