//! Session replay recording frames.
//! Only the parts of the recording format that the diff extractor needs are decoded, everything
//! else is kept as `FrameKind::Other`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

pub type NodeId = u64;

pub const EVENT_TYPE_FULL_SNAPSHOT: u8 = 2;
pub const EVENT_TYPE_INCREMENTAL_SNAPSHOT: u8 = 3;
pub const INCREMENTAL_SOURCE_MUTATION: u8 = 0;

pub const NODE_TYPE_DOCUMENT: u8 = 0;
pub const NODE_TYPE_DOCUMENT_TYPE: u8 = 1;
pub const NODE_TYPE_ELEMENT: u8 = 2;
pub const NODE_TYPE_TEXT: u8 = 3;
pub const NODE_TYPE_CDATA: u8 = 4;
pub const NODE_TYPE_COMMENT: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFrame {
    /// Milliseconds since epoch.
    pub timestamp: f64,
    pub kind: FrameKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// The whole document, replaces whatever was there before.
    FullSnapshot(SerializedNode),
    Mutation(MutationData),
    Other { event_type: u8 },
}

impl ReplayFrame {
    pub fn is_mutation(&self) -> bool {
        matches!(self.kind, FrameKind::Mutation(_))
    }
}

/// A node as it appears in a snapshot or in the `adds` of a mutation.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: u8,
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub child_nodes: Vec<SerializedNode>,
    #[serde(default)]
    pub text_content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationData {
    #[serde(default)]
    pub adds: Vec<AddedNode>,
    #[serde(default)]
    pub removes: Vec<RemovedNode>,
    #[serde(default)]
    pub attributes: Vec<AttributeMutation>,
    #[serde(default)]
    pub texts: Vec<TextMutation>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedNode {
    pub parent_id: NodeId,
    #[serde(default)]
    pub next_id: Option<NodeId>,
    pub node: SerializedNode,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedNode {
    pub parent_id: NodeId,
    pub id: NodeId,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct AttributeMutation {
    pub id: NodeId,
    /// `null` means the attribute was removed.
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct TextMutation {
    pub id: NodeId,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: u8,
    #[serde(default)]
    data: serde_json::Value,
    timestamp: f64,
}

fn frame_from_event(event: RawEvent) -> Result<ReplayFrame> {
    let kind = match event.event_type {
        EVENT_TYPE_FULL_SNAPSHOT => {
            let node = event
                .data
                .get("node")
                .cloned()
                .context("Full snapshot without a node")?;
            FrameKind::FullSnapshot(serde_json::from_value(node)?)
        }
        EVENT_TYPE_INCREMENTAL_SNAPSHOT
            if event.data.get("source").and_then(|s| s.as_u64())
                == Some(INCREMENTAL_SOURCE_MUTATION as u64) =>
        {
            FrameKind::Mutation(serde_json::from_value(event.data)?)
        }
        event_type => FrameKind::Other { event_type },
    };
    Ok(ReplayFrame {
        timestamp: event.timestamp,
        kind,
    })
}

/// Decode a recording, given as a JSON array of recording events.
pub fn parse_recording(json: &str) -> Result<Vec<ReplayFrame>> {
    let events: Vec<RawEvent> =
        serde_json::from_str(json).context("Recording is not a JSON array of events")?;
    events
        .into_iter()
        .enumerate()
        .map(|(i, event)| {
            frame_from_event(event).with_context(|| format!("Invalid recording event #{}", i))
        })
        .collect()
}

/// Text form of an attribute value. `None` when the attribute is absent or was removed.
pub fn attribute_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(false) => None,
        serde_json::Value::Bool(true) => Some(String::new()),
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
