pub mod annotate;
pub mod node;
pub mod tree;

pub use annotate::{DEFAULT_CLIP_FALLBACK_SECS, DEFAULT_TRANSITION_SECS, MAX_ANNOTATE_PASSES};
pub use node::{ClipKind, Node, NodeId, NodeKind, Timing};
pub use tree::Timeline;
