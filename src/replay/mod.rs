//! Session replay support: decoding recordings, mirroring the replayed document and extracting
//! per-frame DOM diffs.

pub mod diff;
pub mod frame;
pub mod mirror;
pub mod selector;

pub use diff::{
    extract_diff_mutations, extract_diff_mutations_until, AttributeDiff, DiffRecord, FrameRange,
    NodeSnapshot,
};
pub use frame::{
    parse_recording, AddedNode, FrameKind, MutationData, NodeId, RemovedNode, ReplayFrame,
    SerializedNode,
};
pub use mirror::{DomMirror, DomNode, DomNodeKind, ReplayPlayer, VirtualDom};
