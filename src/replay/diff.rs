//! Extraction of per-frame DOM diffs from a recording.
//!
//! A recording stores one visual change as a remove-then-add pair. Removed nodes only exist in the
//! document as it was before the frame, added nodes only after it, so each mutation frame is
//! resolved against both states: removes (and attribute "before" snapshots) before applying the
//! frame, adds (and attribute "after" snapshots) after. Both halves go into one `DiffRecord`.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::frame::{FrameKind, ReplayFrame};
use super::mirror::{DomMirror, ReplayPlayer};
use super::selector::{is_covered_by, node_selector};
use crate::task_timer::TaskTimer;

/// HTML of a node before and after a frame was applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSnapshot {
    pub html_before: Option<String>,
    pub html_after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDiff {
    /// Names of the changed attributes.
    pub changed: Vec<String>,
    pub snapshot: NodeSnapshot,
}

/// Everything one mutation frame changed, keyed by node selector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffRecord {
    pub adds: BTreeMap<String, NodeSnapshot>,
    pub removes: BTreeMap<String, NodeSnapshot>,
    pub attributes: BTreeMap<String, AttributeDiff>,
    /// Milliseconds from the start of the replay.
    pub offset: f64,
}

impl DiffRecord {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty() && self.attributes.is_empty()
    }
}

/// Time range of interest, inclusive on both ends, in the same unit as frame timestamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRange {
    pub start: f64,
    pub end: f64,
}

impl FrameRange {
    pub fn contains(&self, timestamp: f64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Diff every mutation frame inside `range`. The result is keyed by the index of the frame in
/// `frames`. `player` must be positioned before the first frame.
pub fn extract_diff_mutations<P: ReplayPlayer>(
    frames: &[ReplayFrame],
    range: FrameRange,
    replay_start_timestamp: f64,
    player: &mut P,
) -> BTreeMap<usize, DiffRecord> {
    extract_diff_mutations_until(frames, range, replay_start_timestamp, player, |_, _| true)
}

/// Like `extract_diff_mutations`, but stops as soon as `should_visit` returns false for a frame
/// inside the range. Lets the caller abandon a long extraction.
pub fn extract_diff_mutations_until<P, F>(
    frames: &[ReplayFrame],
    range: FrameRange,
    replay_start_timestamp: f64,
    player: &mut P,
    mut should_visit: F,
) -> BTreeMap<usize, DiffRecord>
where
    P: ReplayPlayer,
    F: FnMut(usize, &ReplayFrame) -> bool,
{
    let t = TaskTimer::new("Extracting replay diffs");

    let mut order: Vec<usize> = (0..frames.len()).collect();
    order.sort_by(|&a, &b| frames[a].timestamp.total_cmp(&frames[b].timestamp));

    let mut result = BTreeMap::new();
    for index in order {
        let frame = &frames[index];
        if frame.timestamp > range.end {
            break;
        }
        if !range.contains(frame.timestamp) {
            player.apply(frame);
            continue;
        }
        if !should_visit(index, frame) {
            debug!("Diff extraction stopped at frame {}", index);
            break;
        }

        let record = diff_frame(frame, replay_start_timestamp, player);
        if let Some(record) = record.filter(|record| !record.is_empty()) {
            result.insert(index, record);
        }
    }

    debug!("Extracted {} diff records", result.len());
    t.stop();
    result
}

/// Apply `frame` to `player`, recording what changed if it is a mutation.
fn diff_frame<P: ReplayPlayer>(
    frame: &ReplayFrame,
    replay_start_timestamp: f64,
    player: &mut P,
) -> Option<DiffRecord> {
    let FrameKind::Mutation(mutation) = &frame.kind else {
        player.apply(frame);
        return None;
    };

    let mut record = DiffRecord {
        offset: frame.timestamp - replay_start_timestamp,
        ..Default::default()
    };

    let mirror = player.mirror();
    for remove in &mutation.removes {
        let Some(selector) = node_selector(mirror, remove.id) else {
            trace!("Removed node {} is not in the document", remove.id);
            continue;
        };
        if is_already_captured(&selector, record.removes.keys()) {
            continue;
        }
        record.removes.insert(
            selector,
            NodeSnapshot {
                html_before: mirror.outer_html(remove.id),
                html_after: None,
            },
        );
    }

    // Attribute changes are keyed by node id until the frame is applied, the selector itself may
    // depend on the changed attributes.
    let attributes_before: Vec<_> = mutation
        .attributes
        .iter()
        .map(|change| mirror.outer_html(change.id))
        .collect();

    player.apply(frame);
    let mirror = player.mirror();

    for add in &mutation.adds {
        // Adds the player refused, or that a later add moved elsewhere.
        if mirror.node(add.node.id).and_then(|node| node.parent) != Some(add.parent_id) {
            trace!("Added node {} is not under {}", add.node.id, add.parent_id);
            continue;
        }
        let Some(selector) = node_selector(mirror, add.node.id) else {
            trace!("Added node {} is not in the document", add.node.id);
            continue;
        };
        if is_already_captured(&selector, record.adds.keys()) {
            continue;
        }
        record.adds.insert(
            selector,
            NodeSnapshot {
                html_before: None,
                html_after: mirror.outer_html(add.node.id),
            },
        );
    }

    for (change, html_before) in mutation.attributes.iter().zip(attributes_before) {
        let Some(selector) = node_selector(mirror, change.id) else {
            trace!("Node {} with changed attributes is not in the document", change.id);
            continue;
        };
        if is_already_captured(&selector, record.adds.keys())
            || is_already_captured(&selector, record.attributes.keys())
        {
            continue;
        }
        record.attributes.insert(
            selector,
            AttributeDiff {
                changed: change.attributes.keys().cloned().collect(),
                snapshot: NodeSnapshot {
                    html_before,
                    html_after: mirror.outer_html(change.id),
                },
            },
        );
    }

    Some(record)
}

fn is_already_captured<'a>(selector: &str, mut recorded: impl Iterator<Item = &'a String>) -> bool {
    recorded.any(|ancestor| is_covered_by(selector, ancestor))
}
