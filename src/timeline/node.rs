use crate::config::value::Conf;
use crate::foundation::core::{TIME_EPS, TimeRange};

/// Index of a node slot inside a [`Timeline`](crate::timeline::Timeline)
/// arena.
///
/// Slots are never reused, so a `NodeId` held across a removal resolves to
/// `None` instead of aliasing a new node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Leaf media/content kinds; drawing delegates to the material collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipKind {
    Video,
    Audio,
    Image,
    Text,
    Shape,
}

/// Node class, fixed by the document's `type` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Root aggregator owning fps/size; exactly one per timeline.
    Canvas,
    /// Generic z-ordered composite.
    Group,
    /// Bounded sub-timeline inferring its duration from descendants.
    Scene,
    /// Sequential auto-layout via the sibling chain.
    Track,
    /// The single mandatory root track.
    Spine,
    /// Repeating sub-timeline, fixed count or fill.
    Loop,
    /// Cross-fade between two siblings, compositing frozen snapshots.
    Transition,
    /// Timed leaf content.
    Clip(ClipKind),
}

impl NodeKind {
    /// True for Track and Spine (sibling-chain semantics apply).
    pub fn is_track(self) -> bool {
        matches!(self, Self::Track | Self::Spine)
    }

    /// True for media leaves with decode state worth pre-rolling.
    pub fn is_media(self) -> bool {
        matches!(self, Self::Clip(ClipKind::Video | ClipKind::Audio))
    }

    /// Virtual nodes never contribute to duration inference.
    pub fn is_virtual(self) -> bool {
        matches!(self, Self::Transition)
    }

    /// Document `type` tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Canvas => "canvas",
            Self::Group => "group",
            Self::Scene => "scene",
            Self::Track => "track",
            Self::Spine => "spine",
            Self::Loop => "loop",
            Self::Transition => "transition",
            Self::Clip(ClipKind::Video) => "video",
            Self::Clip(ClipKind::Audio) => "audio",
            Self::Clip(ClipKind::Image) => "image",
            Self::Clip(ClipKind::Text) => "text",
            Self::Clip(ClipKind::Shape) => "shape",
        }
    }
}

/// Cached absolute times of a node, recomputed by every annotate pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Timing {
    /// Absolute start, seconds.
    pub start: f64,
    /// Absolute end, seconds; `end >= start` always.
    pub end: f64,
    /// Draw-window start (may precede `start` next to a transition).
    pub draw_start: f64,
    /// Draw-window end (may exceed `end` next to a transition).
    pub draw_end: f64,
    /// Excluded from ancestor duration inference when set.
    pub flexible: bool,
    /// One iteration's length, for Loop nodes.
    pub single_duration: Option<f64>,
    /// Set once this pass has computed the fields above.
    pub resolved: bool,
}

impl Timing {
    /// Nominal interval `[start, end)`.
    pub fn window(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Draw interval `[draw_start, draw_end)`, a superset of the nominal
    /// window when adjacent transitions borrow time.
    pub fn draw_window(&self) -> TimeRange {
        TimeRange {
            start: self.draw_start,
            end: self.draw_end,
        }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// A timed entity in the document tree.
///
/// Parent/sibling links are non-owning slots; they are reset to `None`
/// whenever either endpoint leaves the tree, and sibling discovery goes
/// through the timeline's id registry rather than trusting them blindly.
#[derive(Clone, Debug)]
pub struct Node {
    /// Document id, unique within the timeline.
    pub id: String,
    /// Node class.
    pub kind: NodeKind,
    /// Declarative config.
    pub conf: Conf,
    /// Parent slot.
    pub parent: Option<NodeId>,
    /// Children in document order (which is also ascending z order).
    pub children: Vec<NodeId>,
    /// Previous sibling slot, Track-maintained.
    pub prev: Option<NodeId>,
    /// Next sibling slot, Track-maintained.
    pub next: Option<NodeId>,
    /// Derived layering index, strictly increasing in document order.
    pub z_index: i32,
    /// Cached times from the last annotate pass.
    pub timing: Timing,
    /// Inactive nodes never draw but keep their place in the tree.
    pub active: bool,
}

impl Node {
    pub(crate) fn new(id: String, kind: NodeKind, conf: Conf) -> Self {
        let active = conf.bool("active").unwrap_or(true);
        Self {
            id,
            kind,
            conf,
            parent: None,
            children: Vec::new(),
            prev: None,
            next: None,
            z_index: 0,
            timing: Timing::default(),
            active,
        }
    }

    /// Draw predicate: inside the draw window and active.
    pub fn on_draw(&self, t: f64) -> bool {
        self.active
            && self.timing.resolved
            && self.timing.draw_start - TIME_EPS <= t
            && t < self.timing.draw_end - TIME_EPS
    }

    /// True when this node is excluded from duration inference.
    pub fn is_virtual(&self) -> bool {
        self.kind.is_virtual() || self.conf.bool("virtual").unwrap_or(false)
    }
}
