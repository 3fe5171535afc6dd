//! The annotate pass: resolves every node's absolute time interval and draw
//! window from config and tree position.
//!
//! Resolution is root-down with two wrinkles. Bounded containers (Scene,
//! Loop, Track) infer their own duration from descendants, so their children
//! run twice: once to establish the non-flexible extent, and again so
//! percentage-based and flexible children can resolve against the now-known
//! duration. The Canvas runs the whole tree to a fixpoint because its own
//! duration feeds `100%` defaults anywhere in the document.

use crate::collab::Material;
use crate::config::timeexpr::TimeExpr;
use crate::foundation::core::time_eq;
use crate::foundation::error::SpoolResult;
use crate::timeline::node::{NodeId, NodeKind, Timing};
use crate::timeline::tree::Timeline;

/// Hard cap on Canvas fixpoint iterations.
///
/// Documents where only the Canvas duration is cross-dependent converge in
/// two; the cap bounds pathological chains of Scene/Loop/Transition defaults.
pub const MAX_ANNOTATE_PASSES: usize = 4;

/// Clip duration when the material reports no natural length and no
/// `fallback_duration` is configured.
pub const DEFAULT_CLIP_FALLBACK_SECS: f64 = 2.0;

/// Transition duration when none is configured.
pub const DEFAULT_TRANSITION_SECS: f64 = 1.0;

impl Timeline {
    /// Run the full annotate pass over the tree.
    ///
    /// Must run once the tree is complete and again after any structural or
    /// duration-affecting config change, before the next draw.
    #[tracing::instrument(skip_all)]
    pub fn annotate(&mut self, material: &dyn Material) -> SpoolResult<()> {
        let spine = self.spine()?;
        let root = self.root();
        let prev_duration = self.duration;
        self.assign_z_indices();

        let mut converged = false;
        for pass in 0..MAX_ANNOTATE_PASSES {
            self.reset_timing();
            self.annotate_node(spine, material)?;
            for c in self.children(root) {
                if c != spine {
                    self.annotate_node(c, material)?;
                }
            }

            let spine_duration = self
                .get(spine)
                .map(|n| n.timing.duration())
                .unwrap_or(0.0);
            let new_duration = spine_duration.max(self.max_nonflexible_end());
            if time_eq(new_duration, self.duration) {
                converged = true;
                break;
            }
            tracing::debug!(
                pass,
                old = self.duration,
                new = new_duration,
                "canvas duration changed, re-annotating"
            );
            self.duration = new_duration;
        }
        if !converged {
            tracing::warn!(
                cap = MAX_ANNOTATE_PASSES,
                "annotate fixpoint did not converge within the pass cap"
            );
        }

        let duration = self.duration;
        if let Some(canvas) = self.get_mut(root) {
            canvas.timing.end = duration;
            canvas.timing.draw_end = duration;
        }

        if !time_eq(self.duration, prev_duration) {
            self.notify_metadata_changed();
        }
        Ok(())
    }

    fn reset_timing(&mut self) {
        let duration = self.duration;
        let root = self.root();
        for slot in 0..self.raw_slot_count() {
            if let Some(node) = self.get_mut(NodeId(slot as u32)) {
                node.timing = Timing::default();
            }
        }
        if let Some(canvas) = self.get_mut(root) {
            // Canvas timing seeds percentage resolution for its children.
            canvas.timing = Timing {
                start: 0.0,
                end: duration,
                draw_start: 0.0,
                draw_end: duration,
                flexible: true,
                single_duration: None,
                resolved: true,
            };
        }
    }

    fn annotate_node(&mut self, id: NodeId, material: &dyn Material) -> SpoolResult<()> {
        let Some(kind) = self.get(id).map(|n| n.kind) else {
            return Ok(());
        };
        match kind {
            NodeKind::Transition => self.annotate_transition(id),
            NodeKind::Track | NodeKind::Spine => self.annotate_track(id, material),
            NodeKind::Scene | NodeKind::Loop => self.annotate_bounded(id, material),
            _ => self.annotate_plain(id, material),
        }
    }

    /// Groups and clips: window fully determined by conf, defaults, and the
    /// parent; children recurse.
    fn annotate_plain(&mut self, id: NodeId, material: &dyn Material) -> SpoolResult<()> {
        let start = self.resolve_start(id, material);
        let flexible = self.flexibility(id, material);
        let end = self.resolve_end(id, start, material).max(start);
        self.set_timing(id, start, end, flexible, None);
        for c in self.children(id) {
            self.annotate_node(c, material)?;
        }
        Ok(())
    }

    /// Tracks sequence children through the sibling chain and take their
    /// duration from the tail in O(1).
    fn annotate_track(&mut self, id: NodeId, material: &dyn Material) -> SpoolResult<()> {
        let start = self.resolve_start(id, material);
        // Provisional window so children can resolve against the track start.
        self.set_timing(id, start, start, false, None);

        let children = self.children(id);
        for &c in &children {
            self.annotate_node(c, material)?;
        }

        let end = match self.explicit_end(id, start, material) {
            Some(end) => end,
            None => match children.last().and_then(|&tail| self.get(tail)) {
                // A flexible tail cannot define the extent it is 100% of;
                // it contributes its start instead.
                Some(tail) if tail.timing.flexible => tail.timing.start,
                Some(tail) => tail.timing.end,
                None => start,
            },
        }
        .max(start);
        self.set_timing(id, start, end, false, None);

        self.reannotate_dependent_children(&children, material)?;
        self.widen_for_transitions(&children);
        Ok(())
    }

    /// Scenes and loops: infer their own duration from descendants, then let
    /// duration-dependent children resolve against it.
    fn annotate_bounded(&mut self, id: NodeId, material: &dyn Material) -> SpoolResult<()> {
        let Some(kind) = self.get(id).map(|n| n.kind) else {
            return Ok(());
        };
        let start = self.resolve_start(id, material);
        let flexible = self.flexibility(id, material);
        let explicit = self.explicit_end(id, start, material);

        // Provisional window; children of an inferring container resolve
        // percentages best-effort against a zero duration on this phase.
        self.set_timing(id, start, explicit.unwrap_or(start), flexible, None);
        let children = self.children(id);
        for &c in &children {
            self.annotate_node(c, material)?;
        }

        let inferred_end = self.infer_descendant_end(id).unwrap_or(start);
        let single = (inferred_end - start).max(0.0);

        let end = match kind {
            NodeKind::Scene => explicit.unwrap_or(inferred_end),
            NodeKind::Loop => {
                if let Some(end) = explicit {
                    end
                } else if let Some(times) = self.conf_num(id, "times") {
                    start + single * times.max(0.0)
                } else {
                    // Fill the parent-allotted window.
                    self.parent_end(id).unwrap_or(start)
                }
            }
            _ => explicit.unwrap_or(inferred_end),
        }
        .max(start);

        let single_duration = match kind {
            NodeKind::Loop => Some(if single > 0.0 { single } else { (end - start).max(0.0) }),
            _ => None,
        };
        self.set_timing(id, start, end, flexible, single_duration);

        self.reannotate_dependent_children(&children, material)?;
        Ok(())
    }

    /// Transitions sit between two siblings, borrow half their duration from
    /// each, and never occlude content layered above either neighbor.
    fn annotate_transition(&mut self, id: NodeId) -> SpoolResult<()> {
        let duration = self
            .conf_time(id, "duration")
            .unwrap_or(DEFAULT_TRANSITION_SECS)
            .max(0.0);
        let (prev, next) = self.transition_neighbors(id);

        let parent_start = self.parent_start(id);
        let (start, end, draw_end) = match prev.and_then(|p| self.get(p)) {
            Some(p) if p.timing.resolved => {
                let start = (p.timing.end - duration / 2.0).max(0.0);
                (start, p.timing.end, start + duration)
            }
            // Stale or missing neighbor: empty window, draws nothing.
            _ => (parent_start, parent_start, parent_start),
        };

        let z = match (
            prev.and_then(|p| self.get(p)).map(|n| n.z_index),
            next.and_then(|n| self.get(n)).map(|n| n.z_index),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };

        if let Some(node) = self.get_mut(id) {
            node.timing = Timing {
                start,
                end: end.max(start),
                draw_start: start,
                draw_end: draw_end.max(start),
                flexible: false,
                single_duration: None,
                resolved: true,
            };
            if let Some(z) = z {
                node.z_index = z;
            }
        }
        Ok(())
    }

    /// Resolve a transition's neighbors: pinned ids through the registry
    /// first, then the track chain.
    pub(crate) fn transition_neighbors(&self, id: NodeId) -> (Option<NodeId>, Option<NodeId>) {
        let Some(node) = self.get(id) else {
            return (None, None);
        };
        let by_conf = |key: &str| {
            node.conf
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| self.lookup(s))
        };
        let prev = by_conf("prev_id").or(node.prev);
        let next = by_conf("next_id").or(node.next);
        (prev, next)
    }

    /// Re-annotate children whose timing depends on the parent's duration,
    /// now that it is known.
    fn reannotate_dependent_children(
        &mut self,
        children: &[NodeId],
        material: &dyn Material,
    ) -> SpoolResult<()> {
        for &c in children {
            let dependent = self.get(c).is_some_and(|n| {
                n.timing.flexible
                    || Self::conf_is_percent(n, "start")
                    || Self::conf_is_percent(n, "end")
                    || Self::conf_is_percent(n, "duration")
            });
            if dependent {
                self.annotate_node(c, material)?;
            }
        }
        Ok(())
    }

    fn conf_is_percent(node: &crate::timeline::node::Node, key: &str) -> bool {
        node.conf
            .get(key)
            .and_then(TimeExpr::parse)
            .is_some_and(|e| e.is_percent())
    }

    /// Widen neighbors of every transition child so both stay drawable for
    /// the whole compositing window.
    fn widen_for_transitions(&mut self, children: &[NodeId]) {
        for &c in children {
            if self.get(c).map(|n| n.kind) != Some(NodeKind::Transition) {
                continue;
            }
            let Some(t) = self.get(c).map(|n| n.timing) else {
                continue;
            };
            let (prev, next) = self.transition_neighbors(c);
            if let Some(p) = prev.and_then(|p| self.get_mut(p)) {
                p.timing.draw_end = p.timing.draw_end.max(t.draw_end);
            }
            if let Some(n) = next.and_then(|n| self.get_mut(n)) {
                n.timing.draw_start = n.timing.draw_start.min(t.draw_start);
            }
        }
    }

    // ---- shared resolution helpers ----

    fn set_timing(
        &mut self,
        id: NodeId,
        start: f64,
        end: f64,
        flexible: bool,
        single_duration: Option<f64>,
    ) {
        if let Some(node) = self.get_mut(id) {
            node.timing = Timing {
                start,
                end,
                draw_start: start,
                draw_end: end,
                flexible,
                single_duration,
                resolved: true,
            };
        }
    }

    fn parent_start(&self, id: NodeId) -> f64 {
        self.get(id)
            .and_then(|n| n.parent)
            .and_then(|p| self.get(p))
            .map(|p| p.timing.start)
            .unwrap_or(0.0)
    }

    fn parent_end(&self, id: NodeId) -> Option<f64> {
        self.get(id)
            .and_then(|n| n.parent)
            .and_then(|p| self.get(p))
            .filter(|p| p.timing.resolved)
            .map(|p| p.timing.end)
    }

    fn parent_duration(&self, id: NodeId) -> Option<f64> {
        self.get(id)
            .and_then(|n| n.parent)
            .and_then(|p| self.get(p))
            .filter(|p| p.timing.resolved)
            .map(|p| p.timing.duration())
    }

    fn conf_num(&self, id: NodeId, key: &str) -> Option<f64> {
        self.get(id).and_then(|n| n.conf.get(key)).and_then(|v| v.as_num())
    }

    /// A conf time expression resolved to seconds relative to the parent.
    fn conf_time(&self, id: NodeId, key: &str) -> Option<f64> {
        let expr = self
            .get(id)
            .and_then(|n| n.conf.get(key))
            .and_then(TimeExpr::parse)?;
        expr.resolve(self.parent_duration(id), None)
    }

    /// Absolute start: explicit conf, auto-start after the previous sibling
    /// in a track (a preceding transition shifts the start to its own start),
    /// else the parent's start.
    fn resolve_start(&self, id: NodeId, material: &dyn Material) -> f64 {
        let Some(node) = self.get(id) else { return 0.0 };
        let parent_start = self.parent_start(id);

        if let Some(value) = node.conf.get("start") {
            if let Some(expr) = TimeExpr::parse(value) {
                let natural = material.natural_duration(&node.id);
                if let Some(rel) = expr.resolve(self.parent_duration(id), natural) {
                    return parent_start + rel;
                }
            }
            tracing::trace!(node = %node.id, "unresolvable start expression, proceeding best-effort");
        }

        let parent_is_track = node
            .parent
            .and_then(|p| self.get(p))
            .is_some_and(|p| p.kind.is_track());
        if parent_is_track {
            if let Some(prev) = node.prev.and_then(|p| self.get(p)) {
                if prev.timing.resolved {
                    return if prev.kind == NodeKind::Transition {
                        prev.timing.start
                    } else {
                        prev.timing.end
                    };
                }
            }
        }
        parent_start
    }

    /// Explicit absolute end from `end` or `duration` conf, if present and
    /// resolvable.
    fn explicit_end(&self, id: NodeId, start: f64, material: &dyn Material) -> Option<f64> {
        let node = self.get(id)?;
        let natural = material.natural_duration(&node.id);
        let parent_duration = self.parent_duration(id);
        if let Some(value) = node.conf.get("end") {
            if let Some(rel) = TimeExpr::parse(value).and_then(|e| e.resolve(parent_duration, natural))
            {
                return Some(self.parent_start(id) + rel);
            }
        }
        if let Some(value) = node.conf.get("duration") {
            if let Some(d) = TimeExpr::parse(value).and_then(|e| e.resolve(parent_duration, natural))
            {
                return Some(start + d.max(0.0));
            }
        }
        None
    }

    /// Absolute end for plain nodes: explicit, else the type default (clip
    /// natural length with fallback; everything else fills the parent).
    fn resolve_end(&self, id: NodeId, start: f64, material: &dyn Material) -> f64 {
        if let Some(end) = self.explicit_end(id, start, material) {
            return end;
        }
        let Some(node) = self.get(id) else { return start };
        match node.kind {
            NodeKind::Clip(_) => {
                let fallback = node
                    .conf
                    .sample("fallback_duration", 0.0)
                    .unwrap_or(DEFAULT_CLIP_FALLBACK_SECS);
                let natural = material.natural_duration(&node.id);
                start + natural.unwrap_or(fallback).max(0.0)
            }
            // 100% of the parent window.
            _ => self.parent_end(id).unwrap_or(start),
        }
    }

    /// Whether end/duration is unset or percentage-based for this node, which
    /// excludes it from ancestor duration inference.
    fn flexibility(&self, id: NodeId, material: &dyn Material) -> bool {
        let Some(node) = self.get(id) else { return true };
        for key in ["end", "duration"] {
            if let Some(value) = node.conf.get(key) {
                return match TimeExpr::parse(value) {
                    Some(expr) => expr.is_percent(),
                    // Unparseable: length unknowable, keep it out of inference.
                    None => true,
                };
            }
        }
        match node.kind {
            NodeKind::Clip(_) => {
                // A clip's default length is always knowable (natural length
                // or the fixed fallback).
                let _ = material;
                false
            }
            NodeKind::Scene | NodeKind::Track | NodeKind::Spine | NodeKind::Transition => false,
            NodeKind::Loop => !node.conf.contains("times"),
            NodeKind::Group | NodeKind::Canvas => true,
        }
    }

    /// Max absolute end over non-virtual, non-flexible descendants, retrying
    /// over the unfiltered set when the eligible set is empty.
    fn infer_descendant_end(&self, id: NodeId) -> Option<f64> {
        let descendants = self.descendants(id);
        let max_over = |filtered: bool| {
            descendants
                .iter()
                .filter_map(|&d| self.get(d))
                .filter(|n| n.timing.resolved)
                .filter(|n| !filtered || (!n.is_virtual() && !n.timing.flexible))
                .map(|n| n.timing.end)
                .fold(None, |acc: Option<f64>, e| {
                    Some(acc.map_or(e, |a| a.max(e)))
                })
        };
        max_over(true).or_else(|| max_over(false))
    }

    /// Max absolute end over all non-virtual, non-flexible nodes; feeds the
    /// Canvas duration.
    fn max_nonflexible_end(&self) -> f64 {
        let root = self.root();
        self.descendants(root)
            .iter()
            .filter_map(|&d| self.get(d))
            .filter(|n| n.timing.resolved && !n.is_virtual() && !n.timing.flexible)
            .map(|n| n.timing.end)
            .fold(0.0, f64::max)
    }

    /// Map wall-clock time into a loop's repeating window.
    pub fn loop_relative_time(&self, id: NodeId, t: f64) -> f64 {
        let Some(node) = self.get(id) else { return t };
        let Some(single) = node.timing.single_duration.filter(|s| *s > 0.0) else {
            return t;
        };
        let start = node.timing.start;
        if t <= start {
            return t;
        }
        start + (t - start) % single
    }
}
