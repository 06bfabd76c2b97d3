//! Drag-to-select region logic, functional core.
//!
//! This module has zero infrastructure dependencies.
//! Pointer events go in, a viewport rectangle (or nothing) comes out.
//! Rendering the overlay is the caller's job; `overlay()` tells it what to draw.

use serde::{Deserialize, Serialize};

/// Releases whose box is smaller than this on either axis are ignored.
pub const MIN_DRAG_PX: f64 = 5.0;

/// Axis-aligned rectangle in viewport (CSS pixel) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewportRect {
    /// Bounding box of two corner points, in any order.
    pub fn from_corners(a: (f64, f64), b: (f64, f64)) -> Self {
        Self {
            left: a.0.min(b.0),
            top: a.1.min(b.1),
            width: (a.0 - b.0).abs(),
            height: (a.1 - b.1).abs(),
        }
    }
}

/// Pointer and keyboard input relevant to selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Press { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Release { x: f64, y: f64 },
    /// Escape key.
    Cancel,
}

/// What a single event did to the selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionOutcome {
    /// Selection still in progress (or the event was irrelevant).
    Pending,
    /// Released with a usable rectangle. The overlay is gone.
    Selected(ViewportRect),
    /// Released below the minimum drag. The overlay is gone.
    TooSmall,
    /// Cancelled before release. The overlay is gone.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SelectorState {
    Idle,
    /// Overlay shown, waiting for the press.
    Armed,
    Dragging {
        anchor: (f64, f64),
        current: ViewportRect,
    },
}

/// Region selection state machine driven by pointer events.
#[derive(Debug)]
pub struct RegionSelector {
    state: SelectorState,
    min_drag: f64,
}

impl Default for RegionSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionSelector {
    pub fn new() -> Self {
        Self {
            state: SelectorState::Idle,
            min_drag: MIN_DRAG_PX,
        }
    }

    /// Show the overlay and wait for a press.
    pub fn arm(&mut self) {
        self.state = SelectorState::Armed;
    }

    /// True while the page overlay should be visible.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, SelectorState::Idle)
    }

    /// The live rectangle to render, if a drag is in progress.
    pub fn overlay(&self) -> Option<ViewportRect> {
        match self.state {
            SelectorState::Dragging { current, .. } => Some(current),
            _ => None,
        }
    }

    pub fn handle(&mut self, event: PointerEvent) -> SelectionOutcome {
        match (self.state, event) {
            (SelectorState::Idle, _) => SelectionOutcome::Pending,

            (_, PointerEvent::Cancel) => {
                self.state = SelectorState::Idle;
                log::info!("[CAPTURE] Selection cancelled");
                SelectionOutcome::Cancelled
            }

            (_, PointerEvent::Press { x, y }) => {
                self.state = SelectorState::Dragging {
                    anchor: (x, y),
                    current: ViewportRect::from_corners((x, y), (x, y)),
                };
                SelectionOutcome::Pending
            }

            (SelectorState::Dragging { anchor, .. }, PointerEvent::Move { x, y }) => {
                self.state = SelectorState::Dragging {
                    anchor,
                    current: ViewportRect::from_corners(anchor, (x, y)),
                };
                SelectionOutcome::Pending
            }

            (SelectorState::Dragging { anchor, .. }, PointerEvent::Release { x, y }) => {
                self.state = SelectorState::Idle;
                let rect = ViewportRect::from_corners(anchor, (x, y));
                if rect.width < self.min_drag || rect.height < self.min_drag {
                    log::info!(
                        "[CAPTURE] Ignoring {:.0}x{:.0} selection (below {}px)",
                        rect.width,
                        rect.height,
                        self.min_drag
                    );
                    SelectionOutcome::TooSmall
                } else {
                    SelectionOutcome::Selected(rect)
                }
            }

            // Move or release without a press.
            (SelectorState::Armed, _) => SelectionOutcome::Pending,
        }
    }
}
