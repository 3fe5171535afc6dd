//! Collaborator seams.
//!
//! The core never touches pixels, decoders, or unit tables; it talks to them
//! through these traits. Hosts plug real backends in at `Player` construction;
//! tests plug counters and stubs.

use kurbo::Rect;

use crate::foundation::core::{CanvasSize, Fps};
use crate::foundation::error::SpoolResult;

/// Opaque handle to a host-side view object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewHandle(pub u64);

/// Which surface a draw targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewType {
    /// Interactive playback surface.
    Preview,
    /// Off-screen capture/export surface.
    Capture,
}

/// Attributes the scheduler pushes to a view each draw.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewAttrs {
    /// Frame rectangle in canvas pixels.
    pub frame: Option<Rect>,
    /// Layering index.
    pub z_index: Option<i32>,
    /// Opacity in `[0, 1]`.
    pub opacity: Option<f64>,
    /// Rotation in degrees.
    pub rotation_deg: Option<f64>,
}

impl ViewAttrs {
    /// True when no attribute is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Rendering backend collaborator.
pub trait Renderer {
    /// Create a view for `node_id`, optionally parented into an existing view
    /// hierarchy.
    fn create_view(
        &mut self,
        node_id: &str,
        parent: Option<ViewHandle>,
        view_type: ViewType,
    ) -> SpoolResult<ViewHandle>;

    /// Create an off-screen snapshot target (transition compositing).
    fn create_offscreen(&mut self, view_type: ViewType) -> SpoolResult<ViewHandle>;

    /// Push attributes to a view.
    fn set_attributes(&mut self, view: ViewHandle, attrs: &ViewAttrs) -> SpoolResult<()>;

    /// Render `view` into an off-screen `target`.
    fn render_to_texture(&mut self, view: ViewHandle, target: ViewHandle) -> SpoolResult<()>;

    /// Current bounding box of a view, if the backend can report one.
    fn extract_bounds(&mut self, view: ViewHandle) -> Option<Rect>;

    /// Composite two frozen snapshots into `out` with normalized `progress`.
    fn composite(
        &mut self,
        effect: &str,
        from: ViewHandle,
        to: ViewHandle,
        progress: f64,
        out: ViewHandle,
    ) -> SpoolResult<()>;

    /// Release a view and its resources.
    fn release_view(&mut self, view: ViewHandle);
}

/// Media decode/cache collaborator, one per node kind on the host side.
pub trait Material {
    /// Render the node's content for `local_time` into `view`.
    fn render(
        &mut self,
        node_id: &str,
        local_time: f64,
        view_type: ViewType,
        view: ViewHandle,
    ) -> SpoolResult<()>;

    /// Pull one audio frame of `frame_size` samples at `local_time`.
    ///
    /// Nodes without audio return an empty buffer.
    fn audio_frame(
        &mut self,
        node_id: &str,
        local_time: f64,
        frame_size: usize,
    ) -> SpoolResult<Vec<f32>> {
        let _ = (node_id, local_time, frame_size);
        Ok(Vec::new())
    }

    /// Best-effort decode pre-roll hint; must not block.
    fn prepare(&mut self, node_id: &str, local_time: f64, view_type: ViewType) {
        let _ = (node_id, local_time, view_type);
    }

    /// Natural source length in seconds, feeding `time("contain")` and clip
    /// default durations. `None` when the source length is unknown.
    fn natural_duration(&self, node_id: &str) -> Option<f64>;
}

/// Material stub for hosts without media (loader default, CLI, tests).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMaterial;

impl Material for NullMaterial {
    fn render(
        &mut self,
        _node_id: &str,
        _local_time: f64,
        _view_type: ViewType,
        _view: ViewHandle,
    ) -> SpoolResult<()> {
        Ok(())
    }

    fn natural_duration(&self, _node_id: &str) -> Option<f64> {
        None
    }
}

/// Unit/config resolver collaborator.
pub trait UnitResolver {
    /// Resolve a unit-bearing string (`"50%"`, `"12rem"`, `"300px"`) to
    /// canvas pixels. `None` means unresolvable; callers keep the raw value.
    fn resolve_to_pixels(&self, value: &str) -> Option<f64>;

    /// Format pixels back into the given unit.
    fn to_unit_string(&self, pixels: f64, unit: &str) -> String;
}

/// Resolver that only understands raw pixel numbers.
#[derive(Clone, Copy, Debug, Default)]
pub struct PixelUnitResolver;

impl UnitResolver for PixelUnitResolver {
    fn resolve_to_pixels(&self, value: &str) -> Option<f64> {
        let v = value.trim();
        let v = v.strip_suffix("px").unwrap_or(v);
        v.trim().parse().ok()
    }

    fn to_unit_string(&self, pixels: f64, _unit: &str) -> String {
        format!("{pixels}px")
    }
}

/// Timeline metadata snapshot handed to observers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimelineMeta {
    /// Total timeline duration in seconds.
    pub duration: f64,
    /// Global frame rate.
    pub fps: Fps,
    /// Canvas size in pixels.
    pub size: CanvasSize,
}

/// Typed lifecycle hook invoked by the annotator when timeline metadata
/// changes during an active session.
pub trait TimelineObserver {
    /// Called after an annotate pass changed the timeline duration.
    fn metadata_changed(&self, meta: &TimelineMeta);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_resolver_parses_px_suffix() {
        let r = PixelUnitResolver;
        assert_eq!(r.resolve_to_pixels("120"), Some(120.0));
        assert_eq!(r.resolve_to_pixels("120px"), Some(120.0));
        assert_eq!(r.resolve_to_pixels("50%"), None);
        assert_eq!(r.to_unit_string(40.0, "px"), "40px");
    }

    #[test]
    fn view_attrs_default_is_empty() {
        assert!(ViewAttrs::default().is_empty());
        let attrs = ViewAttrs {
            opacity: Some(0.5),
            ..Default::default()
        };
        assert!(!attrs.is_empty());
    }
}
