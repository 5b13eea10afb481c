use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace, warn};

use super::frame::{
    attribute_text, AddedNode, FrameKind, MutationData, NodeId, ReplayFrame, SerializedNode,
    NODE_TYPE_CDATA, NODE_TYPE_COMMENT, NODE_TYPE_DOCUMENT, NODE_TYPE_DOCUMENT_TYPE,
    NODE_TYPE_ELEMENT, NODE_TYPE_TEXT,
};

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq)]
pub enum DomNodeKind {
    Document,
    DocumentType(String),
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomNode {
    pub id: NodeId,
    pub kind: DomNodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl DomNode {
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            DomNodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        match &self.kind {
            DomNodeKind::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }
}

/// Resolves node ids of a recording to the nodes of the replayed document.
pub trait DomMirror {
    fn node(&self, id: NodeId) -> Option<&DomNode>;

    /// Serialized HTML of the node and everything below it.
    fn outer_html(&self, id: NodeId) -> Option<String>;
}

/// Something that can be stepped through a recording and exposes the resulting document.
pub trait ReplayPlayer {
    type Mirror: DomMirror;

    fn apply(&mut self, frame: &ReplayFrame);

    fn mirror(&self) -> &Self::Mirror;
}

/// In-memory copy of the replayed document.
#[derive(Debug, Clone, Default)]
pub struct VirtualDom {
    nodes: HashMap<NodeId, DomNode>,
    root: Option<NodeId>,
}

impl VirtualDom {
    pub fn new() -> VirtualDom {
        VirtualDom::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn load_snapshot(&mut self, snapshot: &SerializedNode) {
        self.nodes.clear();
        self.root = None;
        if subtree_ids(snapshot).is_none() {
            warn!("Snapshot contains duplicate node ids, ignoring it");
            return;
        }
        self.root = Some(snapshot.id);
        self.insert_subtree(snapshot, None);
        debug!("Loaded snapshot with {} nodes", self.nodes.len());
    }

    pub fn apply_mutation(&mut self, mutation: &MutationData) {
        for remove in &mutation.removes {
            if let Some(parent) = self.nodes.get_mut(&remove.parent_id) {
                parent.children.retain(|&child| child != remove.id);
            }
            self.remove_subtree(remove.id);
        }

        for add in &mutation.adds {
            self.apply_add(add);
        }

        for text in &mutation.texts {
            match self.nodes.get_mut(&text.id).map(|node| &mut node.kind) {
                Some(DomNodeKind::Text(content)) | Some(DomNodeKind::Comment(content)) => {
                    *content = text.value.clone().unwrap_or_default();
                }
                _ => trace!("Text mutation for unknown node {}", text.id),
            }
        }

        for change in &mutation.attributes {
            let Some(DomNodeKind::Element { attributes, .. }) =
                self.nodes.get_mut(&change.id).map(|node| &mut node.kind)
            else {
                trace!("Attribute mutation for unknown node {}", change.id);
                continue;
            };
            for (name, value) in &change.attributes {
                match attribute_text(value) {
                    Some(text) => {
                        attributes.insert(name.clone(), text);
                    }
                    None => {
                        attributes.remove(name);
                    }
                }
            }
        }
    }

    fn apply_add(&mut self, add: &AddedNode) {
        if !self.nodes.contains_key(&add.parent_id) {
            trace!(
                "Parent {} of added node {} is unknown",
                add.parent_id,
                add.node.id
            );
            return;
        }
        let Some(added_ids) = subtree_ids(&add.node) else {
            trace!("Added node {} contains duplicate node ids", add.node.id);
            return;
        };
        // The new parent can't be the added node or anything below it. Only nodes that are
        // already in the document can be above the parent.
        if added_ids.iter().any(|id| self.nodes.contains_key(id))
            && self
                .ancestors_or_self(add.parent_id)
                .any(|id| added_ids.contains(&id))
        {
            trace!(
                "Adding node {} under {} would create a cycle",
                add.node.id,
                add.parent_id
            );
            return;
        }
        // A node can be re-added somewhere else without being removed first.
        if let Some(old_parent) = self.nodes.get(&add.node.id).and_then(|node| node.parent) {
            if let Some(old_parent) = self.nodes.get_mut(&old_parent) {
                old_parent.children.retain(|&child| child != add.node.id);
            }
            self.remove_subtree(add.node.id);
        }

        self.insert_subtree(&add.node, Some(add.parent_id));
        if let Some(parent) = self.nodes.get_mut(&add.parent_id) {
            let position = add
                .next_id
                .and_then(|next_id| parent.children.iter().position(|&child| child == next_id))
                .unwrap_or(parent.children.len());
            parent.children.insert(position, add.node.id);
        }
    }

    /// `id` followed by its ancestors. Stops on a parent cycle.
    fn ancestors_or_self(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut visited = HashSet::new();
        std::iter::successors(Some(id), |&current| {
            self.nodes.get(&current).and_then(|node| node.parent)
        })
        .take_while(move |&current| visited.insert(current))
    }

    fn insert_subtree(&mut self, serialized: &SerializedNode, parent: Option<NodeId>) {
        let mut stack = vec![(serialized, parent)];
        while let Some((serialized, parent)) = stack.pop() {
            self.nodes.insert(
                serialized.id,
                DomNode {
                    id: serialized.id,
                    kind: node_kind(serialized),
                    parent,
                    children: serialized.child_nodes.iter().map(|child| child.id).collect(),
                },
            );
            stack.extend(
                serialized
                    .child_nodes
                    .iter()
                    .map(|child| (child, Some(serialized.id))),
            );
        }
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.remove(&id) else {
                continue;
            };
            stack.extend(node.children);
            if self.root == Some(id) {
                self.root = None;
            }
        }
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        enum Step<'a> {
            Open(NodeId),
            Close(&'a str),
        }

        let mut visited = HashSet::new();
        let mut stack = vec![Step::Open(id)];
        while let Some(step) = stack.pop() {
            let id = match step {
                Step::Open(id) => id,
                Step::Close(tag) => {
                    out.push_str(&format!("</{}>", tag));
                    continue;
                }
            };
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            match &node.kind {
                DomNodeKind::Document => {}
                DomNodeKind::DocumentType(name) => out.push_str(&format!("<!DOCTYPE {}>", name)),
                DomNodeKind::Text(text) => out.push_str(&escape_html(text)),
                DomNodeKind::Comment(text) => out.push_str(&format!("<!--{}-->", text)),
                DomNodeKind::Element { tag, attributes } => {
                    out.push('<');
                    out.push_str(tag);
                    for (name, value) in attributes {
                        out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
                    }
                    out.push('>');
                    if VOID_ELEMENTS.contains(&tag.as_str()) {
                        continue;
                    }
                    stack.push(Step::Close(tag));
                }
            }
            stack.extend(node.children.iter().rev().map(|&child| Step::Open(child)));
        }
    }
}

fn node_kind(serialized: &SerializedNode) -> DomNodeKind {
    match serialized.node_type {
        NODE_TYPE_DOCUMENT => DomNodeKind::Document,
        NODE_TYPE_DOCUMENT_TYPE => {
            DomNodeKind::DocumentType(serialized.name.clone().unwrap_or_default())
        }
        NODE_TYPE_ELEMENT => DomNodeKind::Element {
            tag: serialized
                .tag_name
                .clone()
                .unwrap_or_default()
                .to_lowercase(),
            attributes: serialized
                .attributes
                .iter()
                .filter_map(|(name, value)| attribute_text(value).map(|v| (name.clone(), v)))
                .collect(),
        },
        NODE_TYPE_COMMENT => {
            DomNodeKind::Comment(serialized.text_content.clone().unwrap_or_default())
        }
        NODE_TYPE_TEXT | NODE_TYPE_CDATA => {
            DomNodeKind::Text(serialized.text_content.clone().unwrap_or_default())
        }
        other => {
            trace!("Unknown node type {} for node {}", other, serialized.id);
            DomNodeKind::Text(String::new())
        }
    }
}

/// Ids of all nodes in a serialized subtree, `None` if an id appears twice.
fn subtree_ids(serialized: &SerializedNode) -> Option<HashSet<NodeId>> {
    let mut ids = HashSet::new();
    let mut stack = vec![serialized];
    while let Some(node) = stack.pop() {
        if !ids.insert(node.id) {
            return None;
        }
        stack.extend(&node.child_nodes);
    }
    Some(ids)
}

impl DomMirror for VirtualDom {
    fn node(&self, id: NodeId) -> Option<&DomNode> {
        self.nodes.get(&id)
    }

    fn outer_html(&self, id: NodeId) -> Option<String> {
        if !self.nodes.contains_key(&id) {
            return None;
        }
        let mut out = String::new();
        self.write_html(id, &mut out);
        Some(out)
    }
}

impl ReplayPlayer for VirtualDom {
    type Mirror = VirtualDom;

    fn apply(&mut self, frame: &ReplayFrame) {
        match &frame.kind {
            FrameKind::FullSnapshot(snapshot) => self.load_snapshot(snapshot),
            FrameKind::Mutation(mutation) => self.apply_mutation(mutation),
            FrameKind::Other { .. } => {}
        }
    }

    fn mirror(&self) -> &VirtualDom {
        self
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}
