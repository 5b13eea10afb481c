//! CSS-selector-like keys for replayed DOM nodes.
//! A key looks like `div#app > ul.list > li.item[data-test-id="row"]`: one part per element,
//! starting at the closest ancestor that has an `id` or a component marker.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::frame::NodeId;
use super::mirror::{DomMirror, DomNode, DomNodeKind};

/// Attribute set by the SDK on the root element of each component.
pub const COMPONENT_MARKER_ATTRIBUTE: &str = "data-sentry-component";

/// Attributes included in a selector part, in this order.
pub const SELECTOR_ATTRIBUTES: &[&str] = &[
    COMPONENT_MARKER_ATTRIBUTE,
    "data-test-id",
    "data-testid",
    "role",
    "aria-label",
    "alt",
    "title",
];

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Classes generated by CSS-in-JS libraries change between builds, they make bad keys.
static GENERATED_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(css|sc|emotion)-[0-9a-zA-Z]+$").unwrap());

/// Selector part for a single element, `None` for anything that isn't an element.
pub fn element_selector(node: &DomNode) -> Option<String> {
    let DomNodeKind::Element { tag, attributes } = &node.kind else {
        return None;
    };

    let mut part = tag.clone();
    if let Some(id) = attributes.get("id").filter(|id| !id.is_empty()) {
        part.push('#');
        part.push_str(id);
    }
    if let Some(classes) = attributes.get("class") {
        for class in WHITESPACE
            .split(classes.trim())
            .filter(|class| !class.is_empty() && !GENERATED_CLASS.is_match(class))
        {
            part.push('.');
            part.push_str(class);
        }
    }
    for &name in SELECTOR_ATTRIBUTES {
        if let Some(value) = attributes.get(name) {
            part.push_str(&format!("[{}=\"{}\"]", name, value.replace('"', "\\\"")));
        }
    }
    Some(part)
}

fn is_anchor(node: &DomNode) -> bool {
    node.attribute("id").is_some_and(|id| !id.is_empty())
        || node.attribute(COMPONENT_MARKER_ATTRIBUTE).is_some()
}

/// Selector for the node with the given id. Non-element nodes (text, comments) use the selector of
/// the element that contains them. `None` when the node can't be resolved.
/// A parent cycle ends the walk where it closes.
pub fn node_selector<M: DomMirror + ?Sized>(mirror: &M, id: NodeId) -> Option<String> {
    let mut visited = HashSet::new();
    let mut current = mirror.node(id)?;
    while current.tag().is_none() {
        if !visited.insert(current.id) {
            return None;
        }
        current = mirror.node(current.parent?)?;
    }

    let mut parts = Vec::new();
    loop {
        if !visited.insert(current.id) {
            break;
        }
        if let Some(part) = element_selector(current) {
            parts.push(part);
        }
        if is_anchor(current) {
            break;
        }
        match current.parent.and_then(|parent| mirror.node(parent)) {
            Some(parent) if parent.tag().is_some() => current = parent,
            _ => break,
        }
    }
    parts.reverse();
    Some(parts.join(" > "))
}

/// True if `selector` is `ancestor` itself or points to something inside it.
pub fn is_covered_by(selector: &str, ancestor: &str) -> bool {
    selector == ancestor
        || selector
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with(" > "))
}
