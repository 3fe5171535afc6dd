use std::collections::HashMap;

use crate::collab::{TimelineMeta, TimelineObserver};
use crate::config::value::{Conf, ConfValue};
use crate::foundation::core::{CanvasSize, Fps};
use crate::foundation::error::{SpoolError, SpoolResult};
use crate::timeline::node::{Node, NodeId, NodeKind};

/// The timeline tree: an arena of nodes rooted at a single Canvas node.
///
/// All structure mutation and annotation happen on one control thread; draw
/// scheduling reads the tree through a [`Player`](crate::player::Player).
/// Node slots are never reused and every id lookup goes through a per-instance
/// registry, so independent timelines cannot cross-talk and stale references
/// resolve to nothing instead of the wrong node.
pub struct Timeline {
    fps: Fps,
    size: CanvasSize,
    nodes: Vec<Option<Node>>,
    registry: HashMap<String, NodeId>,
    root: NodeId,
    pub(crate) duration: f64,
    observers: Vec<Box<dyn TimelineObserver>>,
    session_active: bool,
    generated_ids: u64,
}

impl Timeline {
    /// Create an empty timeline with a Canvas root.
    pub fn new(fps: Fps, size: CanvasSize) -> Self {
        let root = NodeId(0);
        let canvas = Node::new("canvas".to_owned(), NodeKind::Canvas, Conf::new());
        let mut registry = HashMap::new();
        registry.insert(canvas.id.clone(), root);
        Self {
            fps,
            size,
            nodes: vec![Some(canvas)],
            registry,
            root,
            duration: 0.0,
            observers: Vec::new(),
            session_active: false,
            generated_ids: 0,
        }
    }

    /// Canvas root id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Global frame rate.
    pub fn fps(&self) -> Fps {
        self.fps
    }

    /// Canvas pixel size.
    pub fn size(&self) -> CanvasSize {
        self.size
    }

    /// Total duration in seconds, as of the last annotate pass.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Metadata snapshot for observers and hosts.
    pub fn meta(&self) -> TimelineMeta {
        TimelineMeta {
            duration: self.duration,
            fps: self.fps,
            size: self.size,
        }
    }

    /// Resolve a node slot. Stale ids return `None`.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Arena slot count, dead slots included.
    pub(crate) fn raw_slot_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look a node up by document id.
    pub fn lookup(&self, id: &str) -> Option<NodeId> {
        self.registry.get(id).copied()
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// True when only the Canvas root exists.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Create a detached node. `id = None` generates a unique one.
    pub fn create_node(
        &mut self,
        id: Option<String>,
        kind: NodeKind,
        conf: Conf,
    ) -> SpoolResult<NodeId> {
        if kind == NodeKind::Canvas {
            return Err(SpoolError::validation("canvas node is created implicitly"));
        }
        let id = match id {
            Some(id) => {
                if self.registry.contains_key(&id) {
                    return Err(SpoolError::validation(format!("duplicate node id '{id}'")));
                }
                id
            }
            None => {
                self.generated_ids += 1;
                format!("{}-{}", kind.tag(), self.generated_ids)
            }
        };
        let slot = NodeId(u32::try_from(self.nodes.len()).map_err(|_| {
            SpoolError::validation("timeline node capacity exceeded")
        })?);
        self.registry.insert(id.clone(), slot);
        self.nodes.push(Some(Node::new(id, kind, conf)));
        Ok(slot)
    }

    /// Attach a detached node under `parent`, at `index` or appended.
    ///
    /// Track parents rebuild their sibling chain from document order.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        index: Option<usize>,
    ) -> SpoolResult<()> {
        if self.get(child).is_none() {
            return Err(SpoolError::validation("add_child: stale child id"));
        }
        if self.get(child).is_some_and(|n| n.parent.is_some()) {
            return Err(SpoolError::validation(
                "add_child: node is already attached; remove it first",
            ));
        }
        if child == self.root {
            return Err(SpoolError::validation("add_child: cannot attach the root"));
        }
        {
            let p = self
                .get_mut(parent)
                .ok_or_else(|| SpoolError::validation("add_child: stale parent id"))?;
            let at = index.unwrap_or(p.children.len()).min(p.children.len());
            p.children.insert(at, child);
        }
        if let Some(c) = self.get_mut(child) {
            c.parent = Some(parent);
        }
        self.relink_chain(parent);
        Ok(())
    }

    /// Detach `id` from its parent without destroying it, for relocation.
    ///
    /// Parent and sibling slots are invalidated on the way out; the old
    /// parent's chain is rebuilt from its remaining children.
    pub fn detach(&mut self, id: NodeId) -> SpoolResult<()> {
        if id == self.root {
            return Err(SpoolError::validation("cannot detach the canvas root"));
        }
        let parent = self
            .get(id)
            .ok_or_else(|| SpoolError::validation("detach: stale node id"))?
            .parent;
        let Some(parent) = parent else { return Ok(()) };
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|&c| c != id);
        }
        if let Some(n) = self.get_mut(id) {
            n.parent = None;
            n.prev = None;
            n.next = None;
        }
        self.relink_chain(parent);
        Ok(())
    }

    /// Detach and destroy the subtree rooted at `id`.
    ///
    /// Returns every removed node id so the host can release cached views and
    /// in-flight draw state. Sibling slots of the former neighbors are
    /// invalidated and rebuilt from document order.
    pub fn remove(&mut self, id: NodeId) -> SpoolResult<Vec<NodeId>> {
        if id == self.root {
            return Err(SpoolError::validation("cannot remove the canvas root"));
        }
        let parent = self
            .get(id)
            .ok_or_else(|| SpoolError::validation("remove: stale node id"))?
            .parent;

        if let Some(p) = parent {
            if let Some(pn) = self.get_mut(p) {
                pn.children.retain(|&c| c != id);
            }
        }

        let mut removed = Vec::new();
        self.collect_subtree(id, &mut removed);
        for &rid in &removed {
            if let Some(node) = self.nodes.get_mut(rid.index()).and_then(Option::take) {
                self.registry.remove(&node.id);
            }
        }
        if let Some(p) = parent {
            self.relink_chain(p);
        }
        Ok(removed)
    }

    fn collect_subtree(&self, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        if let Some(node) = self.get(id) {
            for &c in &node.children {
                self.collect_subtree(c, out);
            }
        }
    }

    /// Children of `id` in document order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    /// Descendants of `id`, preorder, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(node) = self.get(id) {
            for &c in &node.children {
                self.collect_subtree(c, &mut out);
            }
        }
        out
    }

    /// Set a config entry. The caller re-annotates afterwards; duration
    /// affecting keys make cached times stale until then.
    pub fn set_conf(&mut self, id: NodeId, key: &str, value: ConfValue) -> SpoolResult<()> {
        let node = self
            .get_mut(id)
            .ok_or_else(|| SpoolError::validation("set_conf: stale node id"))?;
        if key == "active" {
            node.active = value.as_bool().unwrap_or(true);
        }
        node.conf.set(key, value);
        Ok(())
    }

    /// Toggle a node's draw participation.
    pub fn set_active(&mut self, id: NodeId, active: bool) -> SpoolResult<()> {
        let node = self
            .get_mut(id)
            .ok_or_else(|| SpoolError::validation("set_active: stale node id"))?;
        node.active = active;
        Ok(())
    }

    /// The single mandatory Spine directly under the Canvas.
    ///
    /// Zero or multiple Spines is a malformed document.
    pub fn spine(&self) -> SpoolResult<NodeId> {
        let mut found = None;
        for &c in &self.get(self.root).expect("root slot is never removed").children {
            if self.get(c).is_some_and(|n| n.kind == NodeKind::Spine) {
                if found.is_some() {
                    return Err(SpoolError::validation(
                        "document has more than one spine under the canvas",
                    ));
                }
                found = Some(c);
            }
        }
        found.ok_or_else(|| SpoolError::validation("document has no spine under the canvas"))
    }

    /// Rebuild the prev/next sibling chain of `parent`'s children.
    ///
    /// Track parents mirror document order; all other parents clear the slots
    /// so nothing dangles after a relocation.
    pub(crate) fn relink_chain(&mut self, parent: NodeId) {
        let Some(p) = self.get(parent) else { return };
        let is_track = p.kind.is_track();
        let children = p.children.clone();
        let mut prev: Option<NodeId> = None;
        for (i, &c) in children.iter().enumerate() {
            let next = if is_track {
                children.get(i + 1).copied()
            } else {
                None
            };
            if let Some(node) = self.get_mut(c) {
                node.prev = if is_track { prev } else { None };
                node.next = next;
            }
            prev = Some(c);
        }
    }

    /// Assign z indices by a depth-first walk: each track contributes a local
    /// base and every node takes the running counter, so z strictly increases
    /// in document order within any subtree. Transition z is overwritten by
    /// the annotate pass to `min` of its neighbors.
    pub(crate) fn assign_z_indices(&mut self) {
        let mut counter = 0i32;
        self.assign_z_rec(self.root, &mut counter);
    }

    fn assign_z_rec(&mut self, id: NodeId, counter: &mut i32) {
        let children = {
            let Some(node) = self.get_mut(id) else { return };
            node.z_index = *counter;
            *counter += 1;
            node.children.clone()
        };
        for c in children {
            self.assign_z_rec(c, counter);
        }
    }

    /// Register a metadata observer.
    pub fn add_observer(&mut self, observer: Box<dyn TimelineObserver>) {
        self.observers.push(observer);
    }

    /// Mark a playback/export session active; metadata changes notify
    /// observers only while a session runs.
    pub fn set_session_active(&mut self, active: bool) {
        self.session_active = active;
    }

    pub(crate) fn notify_metadata_changed(&self) {
        if !self.session_active {
            return;
        }
        let meta = self.meta();
        for obs in &self.observers {
            obs.metadata_changed(&meta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::node::ClipKind;

    fn tl() -> Timeline {
        Timeline::new(
            Fps::new(30, 1).unwrap(),
            CanvasSize {
                width: 1920,
                height: 1080,
            },
        )
    }

    #[test]
    fn create_and_lookup_by_id() {
        let mut t = tl();
        let a = t
            .create_node(Some("a".into()), NodeKind::Scene, Conf::new())
            .unwrap();
        assert_eq!(t.lookup("a"), Some(a));
        assert!(t.create_node(Some("a".into()), NodeKind::Scene, Conf::new()).is_err());
        let generated = t.create_node(None, NodeKind::Group, Conf::new()).unwrap();
        assert!(t.get(generated).unwrap().id.starts_with("group-"));
    }

    #[test]
    fn track_chain_follows_document_order() {
        let mut t = tl();
        let track = t
            .create_node(Some("tr".into()), NodeKind::Track, Conf::new())
            .unwrap();
        t.add_child(t.root(), track, None).unwrap();
        let a = t
            .create_node(Some("a".into()), NodeKind::Clip(ClipKind::Video), Conf::new())
            .unwrap();
        let b = t
            .create_node(Some("b".into()), NodeKind::Clip(ClipKind::Video), Conf::new())
            .unwrap();
        t.add_child(track, a, None).unwrap();
        t.add_child(track, b, None).unwrap();

        assert_eq!(t.get(a).unwrap().next, Some(b));
        assert_eq!(t.get(b).unwrap().prev, Some(a));

        // Insert at the front: chain rebuilt from the new document order.
        let c = t
            .create_node(Some("c".into()), NodeKind::Clip(ClipKind::Video), Conf::new())
            .unwrap();
        t.add_child(track, c, Some(0)).unwrap();
        assert_eq!(t.get(c).unwrap().next, Some(a));
        assert_eq!(t.get(a).unwrap().prev, Some(c));
    }

    #[test]
    fn remove_invalidates_slots_and_registry() {
        let mut t = tl();
        let track = t
            .create_node(Some("tr".into()), NodeKind::Track, Conf::new())
            .unwrap();
        t.add_child(t.root(), track, None).unwrap();
        let a = t
            .create_node(Some("a".into()), NodeKind::Clip(ClipKind::Video), Conf::new())
            .unwrap();
        let b = t
            .create_node(Some("b".into()), NodeKind::Clip(ClipKind::Video), Conf::new())
            .unwrap();
        t.add_child(track, a, None).unwrap();
        t.add_child(track, b, None).unwrap();

        let removed = t.remove(a).unwrap();
        assert_eq!(removed, vec![a]);
        assert!(t.get(a).is_none());
        assert_eq!(t.lookup("a"), None);
        // Neighbor slots no longer dangle on the removed node.
        assert_eq!(t.get(b).unwrap().prev, None);
    }

    #[test]
    fn remove_returns_whole_subtree() {
        let mut t = tl();
        let scene = t
            .create_node(Some("s".into()), NodeKind::Scene, Conf::new())
            .unwrap();
        t.add_child(t.root(), scene, None).unwrap();
        let a = t
            .create_node(Some("a".into()), NodeKind::Clip(ClipKind::Image), Conf::new())
            .unwrap();
        t.add_child(scene, a, None).unwrap();

        let removed = t.remove(scene).unwrap();
        assert_eq!(removed, vec![scene, a]);
        assert!(t.is_empty());
    }

    #[test]
    fn spine_constraints() {
        let mut t = tl();
        assert!(t.spine().is_err());
        let s1 = t
            .create_node(Some("s1".into()), NodeKind::Spine, Conf::new())
            .unwrap();
        t.add_child(t.root(), s1, None).unwrap();
        assert_eq!(t.spine().unwrap(), s1);
        let s2 = t
            .create_node(Some("s2".into()), NodeKind::Spine, Conf::new())
            .unwrap();
        t.add_child(t.root(), s2, None).unwrap();
        assert!(t.spine().is_err());
    }

    #[test]
    fn z_indices_increase_in_document_order() {
        let mut t = tl();
        let spine = t
            .create_node(Some("sp".into()), NodeKind::Spine, Conf::new())
            .unwrap();
        t.add_child(t.root(), spine, None).unwrap();
        let scene = t
            .create_node(Some("sc".into()), NodeKind::Scene, Conf::new())
            .unwrap();
        t.add_child(spine, scene, None).unwrap();
        let a = t
            .create_node(Some("a".into()), NodeKind::Clip(ClipKind::Video), Conf::new())
            .unwrap();
        let b = t
            .create_node(Some("b".into()), NodeKind::Clip(ClipKind::Video), Conf::new())
            .unwrap();
        t.add_child(scene, a, None).unwrap();
        t.add_child(scene, b, None).unwrap();

        t.assign_z_indices();
        let z = |id: NodeId| t.get(id).unwrap().z_index;
        assert!(z(spine) < z(scene));
        assert!(z(scene) < z(a));
        assert!(z(a) < z(b));
    }
}
