//! Per-frame draw scheduling.
//!
//! The host tick driver calls [`Player::tick`] once per frame; the player
//! walks the annotated tree, fans draws out to the collaborator seams, and
//! memoizes per (node, time, view-type) so a node reachable through more than
//! one path (a transition neighbor, a mask or proxy reference) is rendered at
//! most once per tick. Collaborator failures are caught at the originating
//! node: a broken node contributes nothing, the rest of the composition keeps
//! drawing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use kurbo::Rect;
use smallvec::SmallVec;

use crate::collab::{Material, Renderer, UnitResolver, ViewAttrs, ViewHandle, ViewType};
use crate::foundation::error::{SpoolError, SpoolResult};
use crate::timeline::{NodeId, NodeKind, Timeline};

/// Seconds before a loop wrap at which media pre-roll is requested.
pub const PREFETCH_WINDOW_SECS: f64 = 0.5;

type MemoKey = (NodeId, u64, ViewType);

/// Outcome of a backpressured tick attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick ran; the root view, if anything drew.
    Drawn(Option<ViewHandle>),
    /// The previous tick had not resolved; this one was dropped entirely.
    Skipped,
}

/// The draw scheduler over one timeline.
///
/// Owns the collaborator boundary: renderer, material, unit resolver, view
/// caches. Tree edits go through [`Player::timeline_mut`] followed by
/// [`Player::annotate`].
pub struct Player {
    timeline: Timeline,
    renderer: Box<dyn Renderer>,
    material: Box<dyn Material>,
    units: Box<dyn UnitResolver>,
    views: HashMap<(NodeId, ViewType), ViewHandle>,
    offscreens: HashMap<(NodeId, ViewType), (ViewHandle, ViewHandle)>,
    memo: HashMap<MemoKey, Option<ViewHandle>>,
    current_tick: Option<(u64, ViewType)>,
    generation: Arc<AtomicU64>,
    playing: bool,
    prefetch_window: f64,
}

impl Player {
    /// Build a player over an annotated timeline.
    pub fn new(
        timeline: Timeline,
        renderer: Box<dyn Renderer>,
        material: Box<dyn Material>,
        units: Box<dyn UnitResolver>,
    ) -> Self {
        Self {
            timeline,
            renderer,
            material,
            units,
            views: HashMap::new(),
            offscreens: HashMap::new(),
            memo: HashMap::new(),
            current_tick: None,
            generation: Arc::new(AtomicU64::new(0)),
            playing: false,
            prefetch_window: PREFETCH_WINDOW_SECS,
        }
    }

    /// Read access to the timeline.
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Mutable access for structural edits; re-annotate before drawing.
    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    /// Re-run the annotate pass with this player's material collaborator.
    pub fn annotate(&mut self) -> SpoolResult<()> {
        self.timeline.annotate(self.material.as_ref())
    }

    /// Mark playback active; loop pre-roll only runs while playing, and the
    /// annotator notifies observers of metadata changes during a session.
    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
        self.timeline.set_session_active(playing);
    }

    /// Monotonically increasing render-generation marker.
    ///
    /// Collaborators may hold the shared handle and discard results tagged
    /// with a stale generation; the core itself never cancels in-flight work.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Shared handle to the generation marker for collaborators.
    pub fn generation_marker(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generation)
    }

    /// Run one scheduler tick: start a fresh memo scope and draw the tree.
    #[tracing::instrument(skip(self))]
    pub fn tick(&mut self, t: f64, view_type: ViewType) -> Option<ViewHandle> {
        self.memo.clear();
        self.current_tick = Some((t.to_bits(), view_type));
        self.generation.fetch_add(1, Ordering::Relaxed);
        let root = self.timeline.root();
        self.draw_node(root, t, view_type, None)
    }

    /// Idempotent-per-tick draw entry point.
    ///
    /// Within the current tick, repeated calls for the same `(t, view_type)`
    /// resolve to the memoized result without re-issuing collaborator work; a
    /// different time or view type starts a new tick.
    pub fn draw(&mut self, t: f64, view_type: ViewType) -> Option<ViewHandle> {
        if self.current_tick != Some((t.to_bits(), view_type)) {
            return self.tick(t, view_type);
        }
        let root = self.timeline.root();
        self.draw_node(root, t, view_type, None)
    }

    /// Release cached views for removed nodes.
    ///
    /// Call with the ids returned by [`Timeline::remove`].
    pub fn release(&mut self, removed: &[NodeId]) {
        for &id in removed {
            for vt in [ViewType::Preview, ViewType::Capture] {
                if let Some(view) = self.views.remove(&(id, vt)) {
                    self.renderer.release_view(view);
                }
                if let Some((a, b)) = self.offscreens.remove(&(id, vt)) {
                    self.renderer.release_view(a);
                    self.renderer.release_view(b);
                }
            }
        }
        self.memo.clear();
    }

    /// Mix one audio frame over all active audio-bearing clips at `t`.
    pub fn audio_frame(&mut self, t: f64, frame_size: usize) -> Vec<f32> {
        let mut mix = vec![0.0f32; frame_size];
        let mut sources = Vec::new();
        self.collect_audio_sources(self.timeline.root(), t, &mut sources);
        for (id, local) in sources {
            match self.material.audio_frame(&id, local, frame_size) {
                Ok(buf) => {
                    for (out, s) in mix.iter_mut().zip(buf.iter()) {
                        *out += *s;
                    }
                }
                Err(e) => tracing::warn!(node = %id, error = %e, "audio frame failed"),
            }
        }
        for s in &mut mix {
            *s = s.clamp(-1.0, 1.0);
        }
        mix
    }

    /// Gather audible clips and their local times, remapping time through
    /// enclosing loops the same way the draw path does.
    fn collect_audio_sources(&self, id: NodeId, t: f64, out: &mut Vec<(String, f64)>) {
        let Some(node) = self.timeline.get(id) else { return };
        if !node.active || !node.timing.resolved {
            return;
        }
        match node.kind {
            NodeKind::Loop => {
                if !node.timing.window().contains(t) {
                    return;
                }
                let rel = self.timeline.loop_relative_time(id, t);
                for c in self.timeline.children(id) {
                    self.collect_audio_sources(c, rel, out);
                }
            }
            kind if kind.is_media() => {
                if node.timing.window().contains(t) {
                    out.push((node.id.clone(), t - node.timing.start));
                }
            }
            _ => {
                for c in self.timeline.children(id) {
                    self.collect_audio_sources(c, t, out);
                }
            }
        }
    }

    fn draw_node(
        &mut self,
        id: NodeId,
        t: f64,
        vt: ViewType,
        parent_view: Option<ViewHandle>,
    ) -> Option<ViewHandle> {
        let key = (id, t.to_bits(), vt);
        if let Some(cached) = self.memo.get(&key) {
            return *cached;
        }

        let Some(node) = self.timeline.get(id) else {
            self.memo.insert(key, None);
            return None;
        };
        let kind = node.kind;
        if !node.on_draw(t) {
            self.detach_view(id, vt);
            self.memo.insert(key, None);
            return None;
        }

        // In-flight marker: a re-entrant lookup during this draw (a neighbor
        // pin cycling back through this node) observes nothing instead of
        // recursing.
        self.memo.insert(key, None);
        let result = match kind {
            NodeKind::Canvas
            | NodeKind::Group
            | NodeKind::Scene
            | NodeKind::Track
            | NodeKind::Spine => self.draw_container(id, t, vt, parent_view),
            NodeKind::Loop => self.draw_loop(id, t, vt, parent_view),
            NodeKind::Transition => self.draw_transition(id, t, vt, parent_view),
            NodeKind::Clip(_) => self.draw_clip(id, t, vt, parent_view),
        };
        self.memo.insert(key, result);
        result
    }

    /// Containers draw active children in ascending z; `cover` children are
    /// the overlay set, recomputed each draw and painted above the rest.
    fn draw_container(
        &mut self,
        id: NodeId,
        t: f64,
        vt: ViewType,
        parent_view: Option<ViewHandle>,
    ) -> Option<ViewHandle> {
        let view = self.get_or_create_view(id, vt, parent_view)?;

        let mut order: Vec<(bool, i32, usize, NodeId)> = self
            .timeline
            .children(id)
            .into_iter()
            .enumerate()
            .filter_map(|(i, c)| {
                let n = self.timeline.get(c)?;
                let cover = n.conf.bool("cover").unwrap_or(false);
                Some((cover, n.z_index, i, c))
            })
            .collect();
        order.sort_by_key(|&(cover, z, i, _)| (cover, z, i));

        let mut child_views: SmallVec<[ViewHandle; 8]> = SmallVec::new();
        for (_, _, _, c) in order {
            if let Some(v) = self.draw_node(c, t, vt, Some(view)) {
                child_views.push(v);
            }
        }
        tracing::trace!(?id, children = child_views.len(), "container drew");

        self.push_attrs(id, t, view);
        Some(view)
    }

    /// Loops remap time into the repeating window and pre-roll media decode
    /// state shortly before each wrap.
    fn draw_loop(
        &mut self,
        id: NodeId,
        t: f64,
        vt: ViewType,
        parent_view: Option<ViewHandle>,
    ) -> Option<ViewHandle> {
        let rel = self.timeline.loop_relative_time(id, t);
        let view = self.get_or_create_view(id, vt, parent_view)?;

        let children = self.timeline.children(id);
        for c in children {
            self.draw_node(c, rel, vt, Some(view));
        }

        if self.playing {
            self.prefetch_next_iteration(id, rel, vt);
        }
        self.push_attrs(id, t, view);
        Some(view)
    }

    /// Best-effort decode pre-roll for the next loop iteration. Never blocks
    /// the draw: `Material::prepare` is a hint by contract.
    fn prefetch_next_iteration(&mut self, id: NodeId, rel: f64, vt: ViewType) {
        let Some(node) = self.timeline.get(id) else { return };
        let Some(single) = node.timing.single_duration.filter(|s| *s > 0.0) else {
            return;
        };
        let into = rel - node.timing.start;
        if single - into > self.prefetch_window {
            return;
        }
        let media: Vec<String> = self
            .timeline
            .descendants(id)
            .into_iter()
            .filter_map(|d| self.timeline.get(d))
            .filter(|n| n.kind.is_media())
            .map(|n| n.id.clone())
            .collect();
        for mid in media {
            self.material.prepare(&mid, 0.0, vt);
        }
    }

    /// Transitions await both neighbors, snapshot them off-screen, then
    /// composite with normalized progress. A stale neighbor degrades to
    /// drawing nothing.
    fn draw_transition(
        &mut self,
        id: NodeId,
        t: f64,
        vt: ViewType,
        parent_view: Option<ViewHandle>,
    ) -> Option<ViewHandle> {
        let (prev, next) = self.timeline.transition_neighbors(id);
        let (Some(prev), Some(next)) = (prev, next) else {
            tracing::debug!(?id, "transition neighbor missing, drawing nothing");
            return None;
        };

        // Both participants must fully complete before compositing.
        let prev_view = self.draw_node(prev, t, vt, parent_view)?;
        let next_view = self.draw_node(next, t, vt, parent_view)?;

        let own = self.get_or_create_view(id, vt, parent_view)?;
        let (target_a, target_b) = match self.get_or_create_offscreens(id, vt) {
            Some(pair) => pair,
            None => return None,
        };

        let (timing, effect, id_str) = {
            let node = self.timeline.get(id)?;
            let effect = node
                .conf
                .get("effect")
                .and_then(|v| v.as_str())
                .unwrap_or("crossfade")
                .to_owned();
            (node.timing, effect, node.id.clone())
        };
        let span = (timing.draw_end - timing.draw_start).max(f64::EPSILON);
        let progress = ((t - timing.draw_start) / span).clamp(0.0, 1.0);

        let composited = (|| -> SpoolResult<()> {
            self.renderer.render_to_texture(prev_view, target_a)?;
            self.renderer.render_to_texture(next_view, target_b)?;
            self.renderer
                .composite(&effect, target_a, target_b, progress, own)
        })();
        if let Err(e) = composited {
            tracing::warn!(node = %id_str, error = %e, "transition composite failed");
            return None;
        }

        // Cover the union of both neighbors' bounding boxes, when available.
        if let (Some(a), Some(b)) = (
            self.renderer.extract_bounds(prev_view),
            self.renderer.extract_bounds(next_view),
        ) {
            let frame = a.union(b);
            let attrs = ViewAttrs {
                frame: Some(frame),
                z_index: self.timeline.get(id).map(|n| n.z_index),
                ..Default::default()
            };
            if let Err(e) = self.renderer.set_attributes(own, &attrs) {
                tracing::warn!(node = %id_str, error = %e, "transition frame update failed");
            }
        }
        Some(own)
    }

    /// Clips delegate content to the material collaborator.
    fn draw_clip(
        &mut self,
        id: NodeId,
        t: f64,
        vt: ViewType,
        parent_view: Option<ViewHandle>,
    ) -> Option<ViewHandle> {
        let view = self.get_or_create_view(id, vt, parent_view)?;
        let (id_str, local) = {
            let node = self.timeline.get(id)?;
            (node.id.clone(), t - node.timing.start)
        };
        if let Err(e) = self.material.render(&id_str, local, vt, view) {
            tracing::warn!(node = %id_str, error = %e, "material render failed, node contributes nothing");
            return None;
        }
        self.push_attrs(id, t, view);
        Some(view)
    }

    fn get_or_create_view(
        &mut self,
        id: NodeId,
        vt: ViewType,
        parent_view: Option<ViewHandle>,
    ) -> Option<ViewHandle> {
        if let Some(v) = self.views.get(&(id, vt)) {
            return Some(*v);
        }
        let id_str = self.timeline.get(id)?.id.clone();
        match self.renderer.create_view(&id_str, parent_view, vt) {
            Ok(v) => {
                self.views.insert((id, vt), v);
                Some(v)
            }
            Err(e) => {
                tracing::warn!(node = %id_str, error = %e, "view creation failed");
                None
            }
        }
    }

    fn get_or_create_offscreens(
        &mut self,
        id: NodeId,
        vt: ViewType,
    ) -> Option<(ViewHandle, ViewHandle)> {
        if let Some(pair) = self.offscreens.get(&(id, vt)) {
            return Some(*pair);
        }
        let pair = match (
            self.renderer.create_offscreen(vt),
            self.renderer.create_offscreen(vt),
        ) {
            (Ok(a), Ok(b)) => (a, b),
            (a, b) => {
                for v in [a, b].into_iter().flatten() {
                    self.renderer.release_view(v);
                }
                let err = SpoolError::draw("offscreen snapshot target unavailable");
                tracing::warn!(?id, error = %err, "transition compositing disabled this tick");
                return None;
            }
        };
        self.offscreens.insert((id, vt), pair);
        Some(pair)
    }

    fn detach_view(&mut self, id: NodeId, vt: ViewType) {
        if let Some(view) = self.views.remove(&(id, vt)) {
            self.renderer.release_view(view);
        }
    }

    /// Resolve geometry/opacity conf (curves at node-local time, unit strings
    /// through the resolver) and push it to the view.
    fn push_attrs(&mut self, id: NodeId, t: f64, view: ViewHandle) {
        let Some(node) = self.timeline.get(id) else { return };
        let local = t - node.timing.start;

        let dim = |key: &str| -> Option<f64> {
            let v = node.conf.get(key)?;
            if let Some(n) = v.sample(local) {
                return Some(n);
            }
            // Unit-bearing string; unresolvable values are kept raw by the
            // resolver contract, so we skip them here.
            v.as_str().and_then(|s| self.units.resolve_to_pixels(s))
        };

        let attrs = ViewAttrs {
            frame: match (dim("width"), dim("height")) {
                (Some(w), Some(h)) => {
                    let x = dim("x").unwrap_or(0.0);
                    let y = dim("y").unwrap_or(0.0);
                    Some(Rect::new(x, y, x + w, y + h))
                }
                _ => None,
            },
            z_index: Some(node.z_index),
            opacity: node.conf.sample("opacity", local),
            rotation_deg: node.conf.sample("rotation", local),
        };
        if attrs.is_empty() {
            return;
        }
        let id_str = node.id.clone();
        if let Err(e) = self.renderer.set_attributes(view, &attrs) {
            tracing::warn!(node = %id_str, error = %e, "set_attributes failed");
        }
    }
}

/// Thread-shared player handle with drop-frame backpressure.
///
/// If the previous tick's draw has not resolved when the host timer fires
/// again, the new tick is skipped entirely rather than queued; tree and view
/// state are untouched by a skipped tick.
#[derive(Clone)]
pub struct SharedPlayer {
    inner: Arc<Mutex<Player>>,
}

impl SharedPlayer {
    /// Wrap a player for a multi-threaded host driver.
    pub fn new(player: Player) -> Self {
        Self {
            inner: Arc::new(Mutex::new(player)),
        }
    }

    /// Attempt one tick; drops the frame when the previous tick is still
    /// in flight.
    pub fn try_tick(&self, t: f64, view_type: ViewType) -> TickOutcome {
        match self.inner.try_lock() {
            Ok(mut player) => TickOutcome::Drawn(player.tick(t, view_type)),
            // A panic mid-access poisons the lock; every tick rebuilds its
            // memo scope from scratch, so the player state is still coherent.
            Err(TryLockError::Poisoned(p)) => {
                TickOutcome::Drawn(p.into_inner().tick(t, view_type))
            }
            Err(TryLockError::WouldBlock) => {
                tracing::trace!(time = t, "previous tick unresolved, dropping frame");
                TickOutcome::Skipped
            }
        }
    }

    /// Blocking access for control-thread work (edits, annotate).
    pub fn with<R>(&self, f: impl FnOnce(&mut Player) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
