use crate::canvas::{Canvas, DrawState, Quality};
use crate::clip::{self, ClipLayer, ClipPiece};
use crate::debug::{DebugLogger, json_escape};
use crate::dom::{Axis, Element, NodeId, RenderingHint};
use crate::error::RenderError;
use crate::font::{FontConfig, TextShaper};
use crate::marker;
use crate::paint::{Brush, PaintTarget, element_opacity, resolve_brush, resolve_pen};
use crate::path::{FillRule, Path};
use crate::raster;
use crate::shapes::build_path;
use crate::text::{self, TextMode};
use crate::types::{Color, Matrix, Rect, SpreadMethod};
use crate::values::{AspectRatio, Length, view_box_transform};
use std::cell::RefCell;
use std::ops::Range;
use std::sync::Arc;

/// Renderer settings shared by every walk.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub scale: f32,
    pub background: Option<(Color, f32)>,
    pub default_size: (f32, f32),
    pub fonts: FontConfig,
    pub text_anchor_bias: bool,
    pub max_tile_size: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            background: None,
            default_size: (300.0, 150.0),
            fonts: FontConfig::default(),
            text_anchor_bias: true,
            max_tile_size: 4096,
        }
    }
}

/// Graphics state threaded down the walk. Every derivation returns a new value, so
/// nothing has to be restored on the way back up.
#[derive(Debug, Clone, Default)]
pub struct RenderState {
    pub transform: Matrix,
    pub clip: Arc<Vec<ClipLayer>>,
    pub quality: Quality,
    // Paint servers, markers, masks and use targets currently being instantiated.
    active: Vec<NodeId>,
    pub surface: (u32, u32),
}

impl RenderState {
    pub fn new(transform: Matrix, surface: (u32, u32)) -> Self {
        Self {
            transform,
            surface,
            ..Self::default()
        }
    }

    pub fn is_active(&self, id: NodeId) -> bool {
        self.active.contains(&id)
    }

    pub fn enter(&self, id: NodeId) -> Self {
        let mut next = self.clone();
        next.active.push(id);
        next
    }

    pub fn concat(&self, m: Matrix) -> Self {
        Self {
            transform: self.transform.mul(m),
            ..self.clone()
        }
    }

    pub fn with_transform(&self, m: Matrix) -> Self {
        Self {
            transform: m,
            ..self.clone()
        }
    }

    pub fn with_clip(&self, layer: ClipLayer) -> Self {
        self.with_clips(vec![layer])
    }

    pub fn with_clips(&self, layers: Vec<ClipLayer>) -> Self {
        if layers.is_empty() {
            return self.clone();
        }
        let mut clip = (*self.clip).clone();
        clip.extend(layers);
        Self {
            clip: Arc::new(clip),
            ..self.clone()
        }
    }

    pub fn with_quality(&self, quality: Quality) -> Self {
        Self {
            quality,
            ..self.clone()
        }
    }

    /// Fresh device space for an offscreen target. Recursion guards carry over.
    pub fn offscreen(&self, width: u32, height: u32) -> Self {
        Self {
            transform: Matrix::identity(),
            clip: Arc::new(Vec::new()),
            quality: self.quality,
            active: self.active.clone(),
            surface: (width, height),
        }
    }

    pub fn draw_state(&self) -> DrawState {
        DrawState {
            transform: self.transform,
            clip: self.clip.clone(),
            quality: self.quality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Renderable {
    Shape,
    Text,
    Image,
    Viewport,
    Use,
    Group,
    Switch,
    Skip,
}

impl Renderable {
    fn classify(el: &Element<'_>) -> Renderable {
        match el.hint() {
            RenderingHint::Shape => Renderable::Shape,
            RenderingHint::Text => Renderable::Text,
            RenderingHint::Image => Renderable::Image,
            RenderingHint::Clipping | RenderingHint::Masking => Renderable::Skip,
            RenderingHint::Containment => match el.tag() {
                "svg" => Renderable::Viewport,
                "use" => Renderable::Use,
                "g" | "a" => Renderable::Group,
                "switch" => Renderable::Switch,
                // symbol, marker, pattern and defs only render when referenced
                _ => Renderable::Skip,
            },
            RenderingHint::None => match el.tag() {
                "linearGradient" | "radialGradient" | "stop" | "style" | "script" | "title"
                | "desc" | "metadata" | "tspan" | "tref" | "textPath" | "filter"
                | "foreignObject" | "font-face" => Renderable::Skip,
                _ => Renderable::Group,
            },
        }
    }
}

fn resolve_quality(el: &Element<'_>, kind: Renderable, base: Quality) -> Quality {
    let speed = |name: &str| {
        matches!(
            el.property(name),
            Some("optimizeSpeed") | Some("crispEdges") | Some("pixelated") | Some("crisp-edges")
        )
    };
    let anti_alias = match kind {
        Renderable::Text => !speed("text-rendering"),
        _ => !speed("shape-rendering"),
    };
    let smooth_images = match kind {
        Renderable::Image => !(speed("image-rendering") || speed("color-rendering")),
        _ => base.smooth_images && !speed("color-rendering"),
    };
    Quality {
        anti_alias,
        smooth_images,
    }
}

/// `clip: rect(top, right, bottom, left)`; offsets are from the viewport's
/// top-left corner and `auto` keeps the viewport edge.
pub(crate) fn parse_clip_rect(value: &str, viewport: Rect) -> Option<Rect> {
    let inner = value.trim().strip_prefix("rect(")?.strip_suffix(')')?;
    let parts: Vec<&str> = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    let [top, right, bottom, left] = parts.as_slice() else {
        return None;
    };
    let edge = |v: &str, auto: f32| -> Option<f32> {
        if v == "auto" {
            Some(auto)
        } else {
            Length::parse(v).map(|l| l.to_user(0.0, 0.0))
        }
    };
    Some(Rect::from_ltrb(
        viewport.x + edge(left, 0.0)?,
        viewport.y + edge(top, 0.0)?,
        viewport.x + edge(right, viewport.width)?,
        viewport.y + edge(bottom, viewport.height)?,
    ))
}

fn clips_overflow(el: &Element<'_>) -> bool {
    !matches!(el.own_property("overflow"), Some("visible") | Some("auto"))
}

fn is_marker_host(el: &Element<'_>) -> bool {
    matches!(el.tag(), "path" | "line" | "polyline" | "polygon")
}

/// Recursive visitor that turns styled elements into canvas commands.
pub(crate) struct Walker<'r> {
    config: &'r RenderConfig,
    shaper: &'r dyn TextShaper,
    debug: Option<&'r DebugLogger>,
    track: Option<NodeId>,
    spans: RefCell<Vec<Range<usize>>>,
}

impl<'r> Walker<'r> {
    pub fn new(
        config: &'r RenderConfig,
        shaper: &'r dyn TextShaper,
        debug: Option<&'r DebugLogger>,
    ) -> Self {
        Self {
            config,
            shaper,
            debug,
            track: None,
            spans: RefCell::new(Vec::new()),
        }
    }

    /// Records the command ranges produced by every instance of `node`.
    pub fn tracking(mut self, node: NodeId) -> Self {
        self.track = Some(node);
        self
    }

    pub fn tracked_spans(&self) -> Vec<Range<usize>> {
        self.spans.borrow().clone()
    }

    pub fn config(&self) -> &RenderConfig {
        self.config
    }

    pub fn shaper(&self) -> &dyn TextShaper {
        self.shaper
    }

    /// Counts a notable event in the debug log.
    pub fn note(&self, event: &str, detail: &str) {
        tracing::debug!(event, detail, "render event");
        if let Some(debug) = self.debug {
            debug.increment(event, 1);
            debug.log_json(&format!(
                "{{\"type\":\"{}\",\"detail\":\"{}\"}}",
                json_escape(event),
                json_escape(detail)
            ));
        }
    }

    pub fn render_node(
        &self,
        el: &Element<'_>,
        state: &RenderState,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        if !el.is_displayed() {
            return Ok(());
        }
        let kind = Renderable::classify(el);
        if kind == Renderable::Skip {
            return Ok(());
        }
        let start = canvas.len();
        let result = match self.render_element(el, kind, state, canvas) {
            Err(err) if err.is_recoverable() => {
                tracing::warn!(element = ?el, %err, "skipping element");
                self.note("image.error", &err.to_string());
                Ok(())
            }
            other => other,
        };
        if self.track == Some(el.node_id()) {
            self.spans.borrow_mut().push(start..canvas.len());
        }
        result
    }

    fn render_element(
        &self,
        el: &Element<'_>,
        kind: Renderable,
        state: &RenderState,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        let state = state
            .with_quality(resolve_quality(el, kind, state.quality))
            .concat(el.transform());

        let clip_value = el.own_property("clip-path").filter(|v| *v != "none");
        let mask_value = el.own_property("mask").filter(|v| *v != "none");
        let bounds = if clip_value.is_some() || mask_value.is_some() {
            self.object_bounds(el)
        } else {
            None
        };
        let mut state = state;
        if let Some(value) = clip_value {
            match el.reference(value) {
                Some(clip_path) if clip_path.tag() == "clipPath" => {
                    let layers = clip::resolve_clip_path(self, &state, &clip_path, bounds)?;
                    state = state.with_clips(layers);
                }
                _ => {
                    tracing::warn!(value, "unresolved clip-path reference");
                    self.note("render.skip", value);
                }
            }
        }
        if let Some(value) = mask_value {
            match el.reference(value) {
                Some(mask) if mask.tag() == "mask" => {
                    let layer = clip::resolve_mask(self, &state, &mask, bounds)?;
                    state = state.with_clip(layer);
                }
                _ => {
                    tracing::warn!(value, "unresolved mask reference");
                    self.note("render.skip", value);
                }
            }
        }

        match kind {
            Renderable::Shape => self.render_shape(el, &state, canvas),
            // Visibility is decided per run; a visible tspan can sit inside hidden text.
            Renderable::Text => {
                text::render_text(self, &state, el, TextMode::Rendering, canvas)?;
                Ok(())
            }
            Renderable::Image => self.render_image(el, &state, canvas),
            Renderable::Viewport if el.parent().is_none() => self.render_children(el, &state, canvas),
            Renderable::Viewport => self.render_viewport(el, &state, None, canvas),
            Renderable::Use => self.render_use(el, &state, canvas),
            Renderable::Group => self.render_children(el, &state, canvas),
            Renderable::Switch => match el.children().into_iter().find(|c| c.is_displayed()) {
                Some(child) => self.render_node(&child, &state, canvas),
                None => Ok(()),
            },
            Renderable::Skip => Ok(()),
        }
    }

    fn render_children(
        &self,
        el: &Element<'_>,
        state: &RenderState,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        for child in el.children() {
            self.render_node(&child, state, canvas)?;
        }
        Ok(())
    }

    fn render_shape(
        &self,
        el: &Element<'_>,
        state: &RenderState,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        let Some(path) = build_path(el) else {
            tracing::debug!(element = ?el, "degenerate shape");
            return Ok(());
        };
        if el.is_visible() {
            if let Some(bounds) = path.bounds() {
                self.paint_geometry(state, el, &path, bounds, canvas)?;
            }
        }
        if is_marker_host(el) {
            marker::render_markers(self, state, el, &path, canvas)?;
        }
        Ok(())
    }

    /// Fills then strokes `path` with the paint of `el`.
    pub(crate) fn paint_geometry(
        &self,
        state: &RenderState,
        el: &Element<'_>,
        path: &Path,
        bounds: Rect,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        let draw = state.draw_state();
        let fill = if el.tag() == "line" {
            None
        } else {
            resolve_brush(self, state, el, PaintTarget::Fill, bounds)?
        };
        if let Some(brush) = fill {
            if let Brush::RadialGradient(radial) = &brush {
                self.radial_surround(state, radial, path, canvas);
            }
            canvas.fill_path(path.clone(), brush, draw.clone());
        }

        if let Some(brush) = resolve_brush(self, state, el, PaintTarget::Stroke, bounds)? {
            if let Some(pen) = resolve_pen(el)? {
                canvas.stroke_path(path.clone(), brush, pen, draw);
            }
        }
        Ok(())
    }

    // Solid pass of the surround color outside the gradient's outer circle.
    fn radial_surround(
        &self,
        state: &RenderState,
        radial: &crate::gradient::RadialGradientBrush,
        path: &Path,
        canvas: &mut Canvas,
    ) {
        if radial.spread != SpreadMethod::Pad {
            return;
        }
        let Some(stop) = radial.surround().filter(|s| s.alpha == 255) else {
            return;
        };
        let outside = state.with_clip(ClipLayer::Exclude {
            piece: ClipPiece {
                path: radial.region(),
                rule: FillRule::NonZero,
            },
            transform: state.transform,
        });
        canvas.fill_path(
            path.clone(),
            Brush::Solid {
                color: stop.color,
                alpha: stop.alpha,
            },
            outside.draw_state(),
        );
    }

    fn render_image(
        &self,
        el: &Element<'_>,
        state: &RenderState,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        if !el.is_visible() {
            return Ok(());
        }
        let image = Arc::new(raster::load_element_image(el)?);
        let (iw, ih) = (image.width() as f32, image.height() as f32);
        let x = el.length("x", Axis::X, 0.0);
        let y = el.length("y", Axis::Y, 0.0);
        let width = el.length("width", Axis::X, iw);
        let height = el.length("height", Axis::Y, ih);
        if width <= 0.0 || height <= 0.0 {
            return Ok(());
        }
        let viewport = Rect::new(x, y, width, height);
        let fit = view_box_transform(
            Rect::new(0.0, 0.0, iw, ih),
            AspectRatio::parse(el.attr("preserveAspectRatio")),
            viewport,
        );
        let state = state
            .with_clip(ClipLayer::rect(viewport, state.transform))
            .concat(fit);
        canvas.draw_image(
            image,
            Rect::new(0.0, 0.0, iw, ih),
            element_opacity(el),
            state.draw_state(),
        );
        Ok(())
    }

    // Nested svg or instantiated symbol. `size` overrides width/height from `<use>`.
    fn render_viewport(
        &self,
        el: &Element<'_>,
        state: &RenderState,
        size: Option<(Option<f32>, Option<f32>)>,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        let (over_w, over_h) = size.unwrap_or((None, None));
        let full = Length::percent(100.0);
        let x = el.length("x", Axis::X, 0.0);
        let y = el.length("y", Axis::Y, 0.0);
        let width = over_w.unwrap_or_else(|| {
            el.resolve_length(el.length_attr("width").unwrap_or(full), Axis::X)
        });
        let height = over_h.unwrap_or_else(|| {
            el.resolve_length(el.length_attr("height").unwrap_or(full), Axis::Y)
        });
        if width <= 0.0 || height <= 0.0 {
            return Ok(());
        }
        let viewport = Rect::new(x, y, width, height);

        let mut inner = state.clone();
        if clips_overflow(el) {
            let clip_rect = el
                .own_property("clip")
                .and_then(|v| parse_clip_rect(v, viewport))
                .unwrap_or(viewport);
            inner = inner.with_clip(ClipLayer::rect(clip_rect, state.transform));
        }
        let content = match el.view_box() {
            Some(vb) if vb.is_empty() => return Ok(()),
            Some(vb) => view_box_transform(
                vb,
                AspectRatio::parse(el.attr("preserveAspectRatio")),
                viewport,
            ),
            None => Matrix::translate(x, y),
        };
        self.render_children(el, &inner.concat(content), canvas)
    }

    fn render_use(
        &self,
        el: &Element<'_>,
        state: &RenderState,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        let Some(target) = el.href_element() else {
            tracing::warn!(href = el.href(), "unresolved use reference");
            self.note("render.skip", el.href().unwrap_or("use"));
            return Ok(());
        };
        if state.is_active(target.node_id()) || target.is_ancestor_of(el.node_id()) {
            tracing::debug!(?target, "recursive use");
            self.note("render.skip", "recursive use");
            return Ok(());
        }
        let state = state
            .concat(Matrix::translate(
                el.length("x", Axis::X, 0.0),
                el.length("y", Axis::Y, 0.0),
            ))
            .enter(target.node_id());
        let target = target.adopt(el);
        let size = || {
            (
                el.length_attr("width").map(|l| el.resolve_length(l, Axis::X)),
                el.length_attr("height").map(|l| el.resolve_length(l, Axis::Y)),
            )
        };
        match target.tag() {
            "symbol" if target.is_displayed() => {
                self.render_viewport(&target, &state, Some(size()), canvas)
            }
            "svg" if target.is_displayed() => {
                let state = state.concat(target.transform());
                self.render_viewport(&target, &state, Some(size()), canvas)
            }
            _ => self.render_node(&target, &state, canvas),
        }
    }

    /// Object bounding box of `el` in its own user space.
    pub fn object_bounds(&self, el: &Element<'_>) -> Option<Rect> {
        match Renderable::classify(el) {
            Renderable::Shape => build_path(el)?.bounds(),
            Renderable::Text => text::text_bounds(self, el),
            Renderable::Image => {
                let rect = Rect::new(
                    el.length("x", Axis::X, 0.0),
                    el.length("y", Axis::Y, 0.0),
                    el.length("width", Axis::X, 0.0),
                    el.length("height", Axis::Y, 0.0),
                );
                (!rect.is_empty()).then_some(rect)
            }
            Renderable::Use => {
                let target = el.href_element()?;
                if target.is_ancestor_of(el.node_id()) {
                    return None;
                }
                let target = target.adopt(el);
                let offset = Matrix::translate(
                    el.length("x", Axis::X, 0.0),
                    el.length("y", Axis::Y, 0.0),
                );
                let inner = match target.tag() {
                    "symbol" | "svg" => self.children_bounds(&target)?,
                    _ => self.object_bounds(&target)?.transform(target.transform()),
                };
                Some(inner.transform(offset))
            }
            Renderable::Group | Renderable::Viewport | Renderable::Switch => {
                self.children_bounds(el)
            }
            Renderable::Skip => None,
        }
    }

    fn children_bounds(&self, el: &Element<'_>) -> Option<Rect> {
        el.children()
            .iter()
            .filter(|c| c.is_displayed())
            .filter_map(|c| Some(self.object_bounds(c)?.transform(c.transform())))
            .reduce(|acc, b| acc.union(&b))
    }
}
