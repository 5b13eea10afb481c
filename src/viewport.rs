//! Choosing which rows of a span tree to show in a fixed height preview.
//!
//! When a preview is opened for a narrow time range (e.g. the duration of an error inside a
//! larger trace) the whole tree usually doesn't fit vertically. The selected window keeps the
//! deepest spans of that range visible, and spends any leftover rows on the spans above them.

use std::rc::Rc;

use tracing::debug;

use crate::span_tree::{SpanNode, SpanTree};
use crate::types::TimePoint;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Rect {
        Rect {
            x,
            y,
            width,
            height,
        }
    }
}

/// Which edge of the window the renderer should keep in place when the view is resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportMode {
    AnchorTop,
    AnchorBottom,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSelection {
    /// `x`/`width` are the requested time range, `y`/`height` are measured in rows (depth levels).
    pub window: Rect,
    pub mode: ViewportMode,
}

/// Pick the rows to display for the time range `[range_start, range_end]`.
/// `full_view.height` is the number of rows that fit in the view.
pub fn select_window(
    tree: &SpanTree,
    full_view: Rect,
    range_start: TimePoint,
    range_end: TimePoint,
) -> ViewportSelection {
    let rows = full_view.height.max(0.0).floor() as usize;
    let tree_rows = tree.max_depth() + 1;

    let make_selection = |y: usize, mode: ViewportMode| ViewportSelection {
        window: Rect::new(
            range_start,
            y as f64,
            range_end - range_start,
            rows.min(tree_rows.saturating_sub(y)) as f64,
        ),
        mode,
    };

    let Some(deepest) = deepest_overlapping_node(tree, range_start, range_end) else {
        debug!("Nothing overlaps [{}, {}]", range_start, range_end);
        return make_selection(0, ViewportMode::AnchorTop);
    };
    let max_depth_in_window = deepest.depth();

    if max_depth_in_window < rows {
        // Everything down to the deepest span in the range fits.
        return make_selection(0, ViewportMode::AnchorTop);
    }

    let context = deepest
        .ancestors()
        .into_iter()
        .find(|ancestor| ancestor.encloses(range_start, range_end));

    let selection = match context {
        Some(ancestor) if max_depth_in_window - ancestor.depth() + 1 < rows => {
            // The rows from the enclosing span down fit with room to spare, use the spare rows
            // to show what's above it.
            let spare_rows = rows - (max_depth_in_window - ancestor.depth() + 1);
            make_selection(
                ancestor.depth().saturating_sub(spare_rows),
                ViewportMode::AnchorTop,
            )
        }
        _ => make_selection(
            (max_depth_in_window + 1).saturating_sub(rows),
            ViewportMode::AnchorBottom,
        ),
    };

    debug!(
        "Selected rows {}..{} ({:?}) for [{}, {}], deepest span at depth {}",
        selection.window.y,
        selection.window.y + selection.window.height,
        selection.mode,
        range_start,
        range_end,
        max_depth_in_window
    );
    selection
}

/// Deepest node overlapping the range. On ties the one that comes first in a depth-first walk
/// (the earliest one) wins.
pub fn deepest_overlapping_node(
    tree: &SpanTree,
    range_start: TimePoint,
    range_end: TimePoint,
) -> Option<Rc<SpanNode>> {
    let mut deepest: Option<Rc<SpanNode>> = None;
    for node in tree.iter() {
        if !node.overlaps(range_start, range_end) {
            continue;
        }
        let is_deeper = match &deepest {
            Some(current) => node.depth() > current.depth(),
            None => true,
        };
        if is_deeper {
            deepest = Some(node);
        }
    }
    deepest
}

/// Maximum depth of any node overlapping the range, 0 if nothing overlaps.
pub fn max_depth_in_range(tree: &SpanTree, range_start: TimePoint, range_end: TimePoint) -> usize {
    deepest_overlapping_node(tree, range_start, range_end)
        .map(|node| node.depth())
        .unwrap_or(0)
}
