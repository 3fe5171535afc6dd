//! Declarative document model and loader.
//!
//! A document is JSON: canvas fps/size plus a node tree where each node
//! carries a `type` tag, an optional `id`, children, and free-form config
//! entries. The loader maps tags through a fixed node-class table, builds the
//! tree, enforces the Spine structure (synthesizing one when absent), and
//! runs the first full annotate pass so the tree is drawable immediately.

use serde::{Deserialize, Serialize};

use crate::collab::{Material, NullMaterial};
use crate::config::value::Conf;
use crate::foundation::core::{CanvasSize, Fps};
use crate::foundation::error::{SpoolError, SpoolResult};
use crate::timeline::{ClipKind, NodeId, NodeKind, Timeline};

/// Serialized document root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentDef {
    /// Global frame rate.
    #[serde(default = "default_fps")]
    pub fps: Fps,
    /// Canvas pixel size.
    #[serde(default = "default_size")]
    pub size: CanvasSize,
    /// Top-level nodes under the canvas.
    #[serde(default)]
    pub children: Vec<NodeDef>,
}

fn default_fps() -> Fps {
    Fps { num: 30, den: 1 }
}

fn default_size() -> CanvasSize {
    CanvasSize {
        width: 1920,
        height: 1080,
    }
}

/// Serialized node: type tag, optional id, children, and everything else as
/// config entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDef {
    /// Node-class tag, resolved through [`kind_for_tag`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Document id; generated when omitted.
    #[serde(default)]
    pub id: Option<String>,
    /// Child nodes in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDef>,
    /// Declarative config (start/end/duration/times/effect/...).
    #[serde(flatten)]
    pub conf: Conf,
}

impl DocumentDef {
    /// Parse a document from JSON.
    pub fn from_json(json: &str) -> SpoolResult<Self> {
        serde_json::from_str(json).map_err(|e| SpoolError::serde(e.to_string()))
    }
}

/// The fixed node-class table.
pub fn kind_for_tag(tag: &str) -> SpoolResult<NodeKind> {
    Ok(match tag {
        "group" | "container" => NodeKind::Group,
        "scene" => NodeKind::Scene,
        "track" => NodeKind::Track,
        "spine" => NodeKind::Spine,
        "loop" => NodeKind::Loop,
        "transition" => NodeKind::Transition,
        "video" => NodeKind::Clip(ClipKind::Video),
        "audio" => NodeKind::Clip(ClipKind::Audio),
        "image" => NodeKind::Clip(ClipKind::Image),
        "text" => NodeKind::Clip(ClipKind::Text),
        "shape" => NodeKind::Clip(ClipKind::Shape),
        other => {
            return Err(SpoolError::validation(format!(
                "unknown node type '{other}'"
            )));
        }
    })
}

/// Build and annotate a timeline from a document, without media info.
pub fn load(def: &DocumentDef) -> SpoolResult<Timeline> {
    load_with(def, &NullMaterial)
}

/// Build and annotate a timeline from a document.
///
/// The material collaborator feeds natural source lengths into clip defaults
/// and `time("contain")` during the mandatory first annotate.
pub fn load_with(def: &DocumentDef, material: &dyn Material) -> SpoolResult<Timeline> {
    let mut tl = Timeline::new(Fps::new(def.fps.num, def.fps.den)?, def.size);
    let root = tl.root();
    for child in &def.children {
        let id = build_node(&mut tl, child)?;
        tl.add_child(root, id, None)?;
    }
    ensure_spine(&mut tl)?;
    validate_tracks(&tl)?;
    tl.annotate(material)?;
    Ok(tl)
}

fn build_node(tl: &mut Timeline, def: &NodeDef) -> SpoolResult<NodeId> {
    let kind = kind_for_tag(&def.kind)?;
    let id = tl.create_node(def.id.clone(), kind, def.conf.clone())?;
    for child in &def.children {
        let c = build_node(tl, child)?;
        tl.add_child(id, c, None)?;
    }
    Ok(id)
}

/// Enforce the single-Spine invariant.
///
/// No Spine: synthesize one and migrate the canvas children that participate
/// in auto-start sequencing (those without an explicit `start`). More than
/// one Spine: malformed document, fatal.
fn ensure_spine(tl: &mut Timeline) -> SpoolResult<()> {
    let root = tl.root();
    let spines: Vec<NodeId> = tl
        .children(root)
        .into_iter()
        .filter(|&c| tl.get(c).is_some_and(|n| n.kind == NodeKind::Spine))
        .collect();
    match spines.len() {
        1 => Ok(()),
        0 => {
            tracing::debug!("document has no spine, synthesizing one");
            let eligible: Vec<NodeId> = tl
                .children(root)
                .into_iter()
                .filter(|&c| {
                    tl.get(c).is_some_and(|n| {
                        !n.conf.contains("start") && n.kind != NodeKind::Canvas
                    })
                })
                .collect();
            let spine = tl.create_node(None, NodeKind::Spine, Conf::new())?;
            tl.add_child(root, spine, Some(0))?;
            for id in eligible {
                tl.detach(id)?;
                tl.add_child(spine, id, None)?;
            }
            Ok(())
        }
        n => Err(SpoolError::validation(format!(
            "document has {n} spines; exactly one is required"
        ))),
    }
}

/// Every Track must live under the Spine lineage; a stray Track signals a
/// malformed document.
fn validate_tracks(tl: &Timeline) -> SpoolResult<()> {
    let root = tl.root();
    for id in tl.descendants(root) {
        let Some(node) = tl.get(id) else { continue };
        if node.kind != NodeKind::Track {
            continue;
        }
        let mut cursor = node.parent;
        let mut under_spine = false;
        while let Some(p) = cursor {
            let Some(pn) = tl.get(p) else { break };
            if pn.kind == NodeKind::Spine {
                under_spine = true;
                break;
            }
            cursor = pn.parent;
        }
        if !under_spine {
            return Err(SpoolError::validation(format!(
                "track '{}' is not under the spine",
                node.id
            )));
        }
    }
    Ok(())
}
