//! Reconstruction of the span hierarchy from a flat list of spans.
//!
//! Spans are sorted by start time and inserted one by one. Each span descends from the root into
//! the first child that fully contains it, and is attached to the node where the descent stops,
//! but only if that node is the span's declared parent. Spans that can't be placed this way end
//! up in the orphan list. Gaps between consecutive siblings are filled with "missing
//! instrumentation" placeholder nodes.

use std::cell::{Ref, RefCell};
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use sha2::Digest;
use tracing::debug;
use uuid::Uuid;

use crate::config::{TieBreak, TreeConfig};
use crate::task_timer::TaskTimer;
use crate::types::{Interval, TimePoint};

pub const MISSING_INSTRUMENTATION_OP: &str = "missing span instrumentation";

pub fn make_uuid_from_seed(seed: &str) -> Uuid {
    let digest_bytes: [u8; 32] = sha2::Sha256::digest(seed).into();
    let mut uuid_bytes = [0u8; 16];
    uuid_bytes.copy_from_slice(&digest_bytes[0..16]);
    Uuid::from_bytes(uuid_bytes)
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Synthetic root, either unbounded or covering a transaction.
    Root {
        span_id: Option<String>,
        start_time: TimePoint,
        end_time: TimePoint,
    },
    Span(Interval),
    /// Untraced time between two sibling spans.
    MissingInstrumentation {
        span_id: String,
        start_time: TimePoint,
        end_time: TimePoint,
    },
}

/// Describes the synthetic root that a tree is built under.
#[derive(Debug, Clone, PartialEq)]
pub struct RootSpan {
    pub span_id: Option<String>,
    pub start_time: TimePoint,
    pub end_time: TimePoint,
}

impl RootSpan {
    /// Root that contains everything, `[0, +inf)`.
    pub fn unbounded() -> RootSpan {
        RootSpan {
            span_id: None,
            start_time: 0.0,
            end_time: TimePoint::INFINITY,
        }
    }

    /// Root that stands in for the transaction the spans belong to.
    /// Spans whose parent is the transaction are attached directly under the root.
    pub fn from_transaction(transaction: &Interval) -> RootSpan {
        RootSpan {
            span_id: Some(transaction.span_id.clone()),
            start_time: transaction.start_time,
            end_time: transaction.end_time,
        }
    }
}

#[derive(Debug)]
pub struct SpanNode {
    kind: NodeKind,
    depth: usize,
    parent: Weak<SpanNode>,
    children: RefCell<Vec<Rc<SpanNode>>>,
}

impl SpanNode {
    fn new_root(root: RootSpan) -> Rc<SpanNode> {
        Rc::new(SpanNode {
            kind: NodeKind::Root {
                span_id: root.span_id,
                start_time: root.start_time,
                end_time: root.end_time,
            },
            depth: 0,
            parent: Weak::new(),
            children: RefCell::new(Vec::new()),
        })
    }

    fn new_child(parent: &Rc<SpanNode>, kind: NodeKind) -> Rc<SpanNode> {
        Rc::new(SpanNode {
            kind,
            depth: parent.depth + 1,
            parent: Rc::downgrade(parent),
            children: RefCell::new(Vec::new()),
        })
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn span_id(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Root { span_id, .. } => span_id.as_deref(),
            NodeKind::Span(interval) => Some(&interval.span_id),
            NodeKind::MissingInstrumentation { span_id, .. } => Some(span_id),
        }
    }

    pub fn start_time(&self) -> TimePoint {
        match &self.kind {
            NodeKind::Root { start_time, .. } => *start_time,
            NodeKind::Span(interval) => interval.start_time,
            NodeKind::MissingInstrumentation { start_time, .. } => *start_time,
        }
    }

    pub fn end_time(&self) -> TimePoint {
        match &self.kind {
            NodeKind::Root { end_time, .. } => *end_time,
            NodeKind::Span(interval) => interval.end_time,
            NodeKind::MissingInstrumentation { end_time, .. } => *end_time,
        }
    }

    /// The wrapped span, `None` for the root and for placeholders.
    pub fn interval(&self) -> Option<&Interval> {
        match &self.kind {
            NodeKind::Span(interval) => Some(interval),
            _ => None,
        }
    }

    /// Distance from the root, the root itself is at depth 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn parent(&self) -> Option<Rc<SpanNode>> {
        self.parent.upgrade()
    }

    pub fn children(&self) -> Ref<'_, [Rc<SpanNode>]> {
        Ref::map(self.children.borrow(), |children| children.as_slice())
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Root { .. })
    }

    pub fn is_missing_instrumentation(&self) -> bool {
        matches!(self.kind, NodeKind::MissingInstrumentation { .. })
    }

    pub fn contains(&self, interval: &Interval) -> bool {
        self.start_time() <= interval.start_time && self.end_time() >= interval.end_time
    }

    pub fn overlaps(&self, start: TimePoint, end: TimePoint) -> bool {
        self.start_time() <= end && self.end_time() >= start
    }

    pub fn encloses(&self, start: TimePoint, end: TimePoint) -> bool {
        self.start_time() <= start && self.end_time() >= end
    }

    /// All ancestors, closest first. Ends with the root.
    pub fn ancestors(&self) -> Vec<Rc<SpanNode>> {
        let mut result = Vec::new();
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            result.push(node);
        }
        result
    }

    pub fn label(&self) -> String {
        match &self.kind {
            NodeKind::Root { span_id, .. } => match span_id {
                Some(span_id) => format!("root ({})", span_id),
                None => "root".to_string(),
            },
            NodeKind::Span(interval) => interval.label(),
            NodeKind::MissingInstrumentation { .. } => MISSING_INSTRUMENTATION_OP.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SpanTree {
    root: Rc<SpanNode>,
    orphans: Vec<Interval>,
}

impl SpanTree {
    pub fn empty() -> SpanTree {
        SpanTree {
            root: SpanNode::new_root(RootSpan::unbounded()),
            orphans: Vec::new(),
        }
    }

    /// Build a tree under an unbounded root, using the default settings.
    pub fn build(intervals: &[Interval]) -> SpanTree {
        Self::build_with_config(RootSpan::unbounded(), intervals, &TreeConfig::default())
    }

    /// Build a tree of the spans of a single transaction.
    pub fn build_for_transaction(transaction: &Interval, intervals: &[Interval]) -> SpanTree {
        Self::build_with_config(
            RootSpan::from_transaction(transaction),
            intervals,
            &TreeConfig::default(),
        )
    }

    /// Intervals must be well formed (`end_time >= start_time`), this isn't checked here.
    pub fn build_with_config(
        root: RootSpan,
        intervals: &[Interval],
        config: &TreeConfig,
    ) -> SpanTree {
        let t = TaskTimer::new("Building span tree");

        let root = SpanNode::new_root(root);
        let mut orphans = Vec::new();

        for interval in sort_intervals(intervals, config.tie_break) {
            let parent = find_deepest_container(&root, interval);

            if parent.span_id() != interval.parent_span_id.as_deref() {
                debug!(
                    "Span {} reached {:?} instead of its parent {:?}, marking as orphan",
                    interval.span_id,
                    parent.span_id(),
                    interval.parent_span_id
                );
                orphans.push(interval.clone());
                continue;
            }

            let overlaps_sibling = parent
                .children
                .borrow()
                .iter()
                .rev()
                .any(|sibling| sibling.end_time() > interval.start_time);
            if overlaps_sibling {
                debug!(
                    "Span {} overlaps with one of its siblings, marking as orphan",
                    interval.span_id
                );
                orphans.push(interval.clone());
                continue;
            }

            let previous_sibling_end = parent
                .children
                .borrow()
                .iter()
                .rev()
                .find(|sibling| !sibling.is_missing_instrumentation())
                .map(|sibling| sibling.end_time());
            if let Some(gap_start) = previous_sibling_end {
                if interval.start_time - gap_start > config.missing_instrumentation_threshold {
                    let placeholder =
                        missing_instrumentation_node(&parent, gap_start, interval.start_time);
                    parent.children.borrow_mut().push(placeholder);
                }
            }

            let node = SpanNode::new_child(&parent, NodeKind::Span(interval.clone()));
            parent.children.borrow_mut().push(node);
        }

        debug!(
            "Built span tree from {} spans, {} orphans",
            intervals.len(),
            orphans.len()
        );
        t.stop();
        SpanTree { root, orphans }
    }

    pub fn root(&self) -> &Rc<SpanNode> {
        &self.root
    }

    /// Spans that couldn't be placed in the tree.
    pub fn orphans(&self) -> &[Interval] {
        &self.orphans
    }

    /// Pre-order, depth-first walk over all nodes, starting with the root.
    pub fn iter(&self) -> SpanTreeIter {
        SpanTreeIter {
            stack: vec![self.root.clone()],
        }
    }

    /// Depth of the deepest node. A tree without spans has depth 0.
    pub fn max_depth(&self) -> usize {
        self.iter().map(|node| node.depth()).max().unwrap_or(0)
    }

    /// Number of nodes, including the root and placeholders.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    pub fn find(&self, span_id: &str) -> Option<Rc<SpanNode>> {
        self.iter()
            .find(|node| !node.is_root() && node.span_id() == Some(span_id))
    }

    pub fn missing_instrumentation(&self) -> Vec<Rc<SpanNode>> {
        self.iter()
            .filter(|node| node.is_missing_instrumentation())
            .collect()
    }

    /// Indented text dump of the tree, one node per line. Times are relative to the first span.
    pub fn render_text(&self) -> String {
        let origin = self
            .root
            .children()
            .first()
            .map(|node| node.start_time())
            .unwrap_or(0.0);

        let mut s = String::new();
        for node in self.iter() {
            let indent = "  ".repeat(node.depth());
            if node.is_root() {
                s.push_str(&format!("{}{}\n", indent, node.label()));
                continue;
            }
            s.push_str(&format!(
                "{}{} [{:.1}ms +{:.1}ms]\n",
                indent,
                node.label(),
                (node.start_time() - origin) * 1000.0,
                (node.end_time() - node.start_time()) * 1000.0,
            ));
        }
        s
    }
}

pub struct SpanTreeIter {
    stack: Vec<Rc<SpanNode>>,
}

impl Iterator for SpanTreeIter {
    type Item = Rc<SpanNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev().cloned());
        Some(node)
    }
}

fn sort_intervals(intervals: &[Interval], tie_break: TieBreak) -> Vec<&Interval> {
    let mut sorted: Vec<&Interval> = intervals.iter().collect();
    // sort_by is stable, `InputOrder` relies on that.
    sorted.sort_by(|a, b| {
        let start_ordering = a.start_time.total_cmp(&b.start_time);
        if start_ordering != Ordering::Equal {
            return start_ordering;
        }
        match tie_break {
            TieBreak::LongerFirst => b
                .duration()
                .total_cmp(&a.duration())
                .then_with(|| a.span_id.cmp(&b.span_id)),
            TieBreak::InputOrder => Ordering::Equal,
        }
    });
    sorted
}

/// Descend from `root` into the first child that contains `interval`, as long as there is one.
/// Placeholders are never descended into.
fn find_deepest_container(root: &Rc<SpanNode>, interval: &Interval) -> Rc<SpanNode> {
    let mut current = root.clone();
    loop {
        let next = current
            .children()
            .iter()
            .find(|child| !child.is_missing_instrumentation() && child.contains(interval))
            .cloned();
        match next {
            Some(child) => current = child,
            None => return current,
        }
    }
}

fn missing_instrumentation_node(
    parent: &Rc<SpanNode>,
    start_time: TimePoint,
    end_time: TimePoint,
) -> Rc<SpanNode> {
    let seed = format!(
        "missing-instrumentation:{}:{}:{}",
        parent.span_id().unwrap_or("root"),
        start_time.to_bits(),
        end_time.to_bits()
    );
    SpanNode::new_child(
        parent,
        NodeKind::MissingInstrumentation {
            span_id: make_uuid_from_seed(&seed).to_string(),
            start_time,
            end_time,
        },
    )
}
