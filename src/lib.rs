pub mod config;
pub mod ingest;
pub mod replay;
pub mod span_tree;
pub mod task_timer;
pub mod types;
pub mod viewport;

pub use config::{TieBreak, TreeConfig, ViewerConfig};
pub use span_tree::{NodeKind, RootSpan, SpanNode, SpanTree};
pub use types::{Interval, SpanPayload, TimePoint};
pub use viewport::{select_window, Rect, ViewportMode, ViewportSelection};
