//! Spool is a declarative timeline engine.
//!
//! A document describes a tree of timed audiovisual nodes — containers,
//! bounded scenes, sequential tracks, loops, cross-fade transitions — and
//! spool turns it into a deterministic, frame-accurate sequence of draw
//! operations with correct layering and transition compositing:
//!
//! - Load a [`doc::DocumentDef`] and build an annotated [`Timeline`]
//! - Wrap it in a [`Player`] with your renderer/material collaborators
//! - Drive [`Player::tick`] (or [`SharedPlayer::try_tick`]) from the host
//!   clock
//!
//! Pixels, decoding, and unit tables stay on the host side behind the traits
//! in [`collab`].
#![forbid(unsafe_code)]

pub mod collab;
pub mod config;
pub mod doc;
pub mod foundation;
pub mod player;
pub mod timeline;

pub use crate::foundation::core::{CanvasSize, Fps, TimeRange};
pub use crate::foundation::error::{SpoolError, SpoolResult};

pub use crate::collab::{
    Material, NullMaterial, PixelUnitResolver, Renderer, TimelineMeta, TimelineObserver,
    UnitResolver, ViewAttrs, ViewHandle, ViewType,
};
pub use crate::config::ease::Ease;
pub use crate::config::timeexpr::TimeExpr;
pub use crate::config::value::{Conf, ConfValue, Curve, Keyframe};
pub use crate::player::{Player, SharedPlayer, TickOutcome};
pub use crate::timeline::{ClipKind, Node, NodeId, NodeKind, Timeline, Timing};
