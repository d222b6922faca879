mod canvas;
mod clip;
mod debug;
mod dom;
mod error;
mod font;
mod gradient;
mod marker;
mod paint;
mod path;
mod pattern;
mod raster;
mod render;
mod shapes;
mod text;
mod types;
mod values;

pub use canvas::{Canvas, Command, DrawState, Quality};
pub use clip::{ClipLayer, ClipPiece, LuminanceMask};
use debug::DebugLogger;
pub use dom::{Document, Element, NodeId, RenderingHint};
pub use error::RenderError;
pub use font::{
    FontConfig, FontGate, FontRegistry, FontSpec, FontStyle, GenericFamily, RunLayout, ShapedText,
    TextShaper,
};
pub use gradient::{GradientStop, LinearGradientBrush, LinearMode, RadialGradientBrush};
pub use marker::{MarkerInstance, MarkerPosition};
pub use paint::{Brush, LineCap, LineJoin, Paint, Pen};
pub use path::{FillRule, Path, PathSeg};
pub use pattern::PatternBrush;
pub use raster::{MAX_RASTER_DIMENSION, RasterImage};
pub use render::{RenderConfig, RenderState};
use render::Walker;
use std::path::PathBuf;
use std::sync::Arc;
pub use types::{Color, Matrix, Point, Rect, SpreadMethod, Units};
use values::{AspectRatio, view_box_transform};

/// SVG rasterizer. Cheap to share; every render call owns its own walk state.
pub struct Renderer {
    config: RenderConfig,
    shaper: Arc<dyn TextShaper>,
    debug: Option<DebugLogger>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .field("debug", &self.debug.is_some())
            .finish()
    }
}

pub struct RendererBuilder {
    config: RenderConfig,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    font_bytes: Vec<(Vec<u8>, Option<String>)>,
    system_fonts: bool,
    shaper: Option<Arc<dyn TextShaper>>,
    debug_path: Option<PathBuf>,
}

impl Default for RendererBuilder {
    fn default() -> Self {
        Self {
            config: RenderConfig::default(),
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            system_fonts: true,
            shaper: None,
            debug_path: None,
        }
    }
}

impl RendererBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device pixels per user unit.
    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale;
        self
    }

    pub fn background(mut self, color: Color, alpha: f32) -> Self {
        self.config.background = Some((color, alpha.clamp(0.0, 1.0)));
        self
    }

    /// Size used when the root has neither width/height nor a viewBox.
    pub fn default_size(mut self, width: f32, height: f32) -> Self {
        self.config.default_size = (width, height);
        self
    }

    pub fn generic_family(mut self, family: GenericFamily, name: impl Into<String>) -> Self {
        self.config.fonts.set_generic(family, name.into());
        self
    }

    pub fn default_family(mut self, name: impl Into<String>) -> Self {
        self.config.fonts.default_family = name.into();
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, data: Vec<u8>, name: Option<&str>) -> Self {
        self.font_bytes.push((data, name.map(str::to_string)));
        self
    }

    /// Scan platform font directories and `SVGRASTER_FONT_DIR` at build time.
    pub fn system_fonts(mut self, enabled: bool) -> Self {
        self.system_fonts = enabled;
        self
    }

    /// Replaces the font backend; registered fonts are then ignored.
    pub fn text_shaper(mut self, shaper: Arc<dyn TextShaper>) -> Self {
        self.shaper = Some(shaper);
        self
    }

    pub fn text_anchor_bias(mut self, enabled: bool) -> Self {
        self.config.text_anchor_bias = enabled;
        self
    }

    pub fn max_tile_size(mut self, size: u32) -> Self {
        self.config.max_tile_size = size;
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Renderer, RenderError> {
        if !self.config.scale.is_finite() || self.config.scale <= 0.0 {
            return Err(RenderError::InvalidConfiguration(format!(
                "scale must be finite and > 0 (got {})",
                self.config.scale
            )));
        }
        if self.config.max_tile_size == 0 {
            return Err(RenderError::InvalidConfiguration(
                "max_tile_size must be > 0".to_string(),
            ));
        }
        let (dw, dh) = self.config.default_size;
        if !(dw.is_finite() && dh.is_finite() && dw > 0.0 && dh > 0.0) {
            return Err(RenderError::InvalidConfiguration(format!(
                "default_size must be positive (got {}x{})",
                dw, dh
            )));
        }
        let shaper: Arc<dyn TextShaper> = match self.shaper {
            Some(shaper) => shaper,
            None => {
                let mut registry = FontRegistry::new();
                if self.system_fonts {
                    registry.register_system_fonts();
                }
                for dir in &self.font_dirs {
                    registry.register_dir(dir);
                }
                for file in &self.font_files {
                    registry.register_file(file);
                }
                for (data, name) in self.font_bytes {
                    registry.register_bytes(data, name.as_deref())?;
                }
                tracing::debug!(fonts = registry.len(), "font registry ready");
                Arc::new(registry)
            }
        };
        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        Ok(Renderer {
            config: self.config,
            shaper,
            debug,
        })
    }
}

impl Renderer {
    pub fn builder() -> RendererBuilder {
        RendererBuilder::new()
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub(crate) fn walker(&self) -> Walker<'_> {
        Walker::new(&self.config, self.shaper.as_ref(), self.debug.as_ref())
    }

    /// Renders `doc` into a raster sized to its intrinsic dimensions times the scale.
    pub fn render(&self, doc: &Document) -> Result<RasterImage, RenderError> {
        let (width, height) = self.pixel_size(doc)?;
        let canvas = self.walk(doc, &self.walker(), (width, height))?;
        let image = raster::rasterize(canvas.commands(), width, height, self.config.background);
        if let Some(debug) = &self.debug {
            debug.emit_summary("render");
            debug.flush();
        }
        image
    }

    /// The display list a render would replay, without rasterizing it.
    pub fn render_commands(&self, doc: &Document) -> Result<Vec<Command>, RenderError> {
        let surface = self.pixel_size(doc)?;
        Ok(self.walk(doc, &self.walker(), surface)?.into_commands())
    }

    /// Device-space box covering everything drawn for `node` (every `<use>` instance
    /// included), grown by `margin` pixels. `None` when nothing is drawn.
    pub fn rendered_bounds(
        &self,
        doc: &Document,
        node: NodeId,
        margin: f32,
    ) -> Result<Option<Rect>, RenderError> {
        let surface = self.pixel_size(doc)?;
        let walker = self.walker().tracking(node);
        let canvas = self.walk(doc, &walker, surface)?;
        let commands = canvas.commands();
        Ok(walker
            .tracked_spans()
            .into_iter()
            .filter_map(|span| commands.get(span))
            .flat_map(|cmds| cmds.iter().filter_map(Command::bounds))
            .reduce(|acc, b| acc.union(&b))
            .map(|b| b.inflate(margin)))
    }

    fn walk(
        &self,
        doc: &Document,
        walker: &Walker<'_>,
        surface: (u32, u32),
    ) -> Result<Canvas, RenderError> {
        let root = doc.root();
        let state = RenderState::new(self.root_transform(&root), surface);
        let mut canvas = Canvas::new();
        walker.render_node(&root, &state, &mut canvas)?;
        tracing::debug!(commands = canvas.len(), "render walk finished");
        Ok(canvas)
    }

    // User-space size of the root viewport.
    fn root_size(&self, root: &Element<'_>) -> (f32, f32) {
        let view_box = root.view_box().filter(|vb| !vb.is_empty());
        let absolute = |name: &str| {
            root.length_attr(name)
                .filter(|len| !len.is_percent())
                .map(|len| len.to_user(root.font_size(), 0.0))
                .filter(|v| *v > 0.0)
        };
        let (dw, dh) = self.config.default_size;
        match (absolute("width"), absolute("height"), view_box) {
            (Some(w), Some(h), _) => (w, h),
            (Some(w), None, Some(vb)) => (w, w * vb.height / vb.width),
            (None, Some(h), Some(vb)) => (h * vb.width / vb.height, h),
            (None, None, Some(vb)) => (vb.width, vb.height),
            (w, h, None) => (w.unwrap_or(dw), h.unwrap_or(dh)),
        }
    }

    fn root_transform(&self, root: &Element<'_>) -> Matrix {
        let scale = Matrix::scale(self.config.scale, self.config.scale);
        match root.view_box().filter(|vb| !vb.is_empty()) {
            Some(vb) => {
                let (w, h) = self.root_size(root);
                scale.mul(view_box_transform(
                    vb,
                    AspectRatio::parse(root.attr("preserveAspectRatio")),
                    Rect::new(0.0, 0.0, w, h),
                ))
            }
            None => scale,
        }
    }

    fn pixel_size(&self, doc: &Document) -> Result<(u32, u32), RenderError> {
        let (w, h) = self.root_size(&doc.root());
        let pw = libm::ceilf(w * self.config.scale);
        let ph = libm::ceilf(h * self.config.scale);
        if !(pw >= 1.0 && ph >= 1.0) {
            return Err(RenderError::InvalidConfiguration(format!(
                "raster size is empty ({}x{})",
                pw, ph
            )));
        }
        let limit = MAX_RASTER_DIMENSION as f32;
        if pw > limit || ph > limit {
            return Err(RenderError::InvalidConfiguration(format!(
                "raster size {}x{} exceeds {}",
                pw, ph, MAX_RASTER_DIMENSION
            )));
        }
        Ok((pw as u32, ph as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> Renderer {
        Renderer::builder()
            .system_fonts(false)
            .build()
            .expect("renderer")
    }

    fn svg(attrs: &str, body: &str) -> Document {
        Document::parse(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" {attrs}>{body}</svg>"#
        ))
        .expect("parse")
    }

    #[test]
    fn red_rect_fills_its_pixels() {
        let doc = svg(
            r#"width="200" height="100""#,
            r##"<rect x="0" y="0" width="100" height="50" fill="#ff0000"/>"##,
        );
        let image = renderer().render(&doc).expect("render");
        assert_eq!((image.width(), image.height()), (200, 100));
        assert_eq!(image.pixel(10, 10), [255, 0, 0, 255]);
        assert_eq!(image.pixel(150, 10), [0, 0, 0, 0]);
        assert_eq!(image.pixel(10, 75), [0, 0, 0, 0]);
    }

    #[test]
    fn scale_multiplies_raster_size() {
        let doc = svg(r#"width="10" height="20""#, r#"<rect width="5" height="5"/>"#);
        let image = Renderer::builder()
            .system_fonts(false)
            .scale(2.0)
            .build()
            .expect("renderer")
            .render(&doc)
            .expect("render");
        assert_eq!((image.width(), image.height()), (20, 40));
        assert_eq!(image.pixel(9, 9)[3], 255);
        assert_eq!(image.pixel(11, 11)[3], 0);
    }

    #[test]
    fn view_box_alone_sizes_the_raster() {
        let doc = svg(
            r#"viewBox="0 0 40 30""#,
            r#"<rect x="20" width="20" height="30" fill="blue"/>"#,
        );
        let image = renderer().render(&doc).expect("render");
        assert_eq!((image.width(), image.height()), (40, 30));
        assert_eq!(image.pixel(30, 15), [0, 0, 255, 255]);
    }

    #[test]
    fn view_box_is_fitted_into_width_and_height() {
        let doc = svg(
            r#"width="100" height="100" viewBox="0 0 10 10""#,
            r#"<rect x="5" y="5" width="5" height="5" fill="lime"/>"#,
        );
        let image = renderer().render(&doc).expect("render");
        assert_eq!(image.pixel(75, 75), [0, 255, 0, 255]);
        assert_eq!(image.pixel(25, 25)[3], 0);
    }

    #[test]
    fn missing_size_falls_back_to_default() {
        let doc = svg("", "");
        let image = renderer().render(&doc).expect("render");
        assert_eq!((image.width(), image.height()), (300, 150));
        let image = Renderer::builder()
            .system_fonts(false)
            .default_size(16.0, 8.0)
            .build()
            .expect("renderer")
            .render(&doc)
            .expect("render");
        assert_eq!((image.width(), image.height()), (16, 8));
    }

    #[test]
    fn background_fills_the_raster() {
        let doc = svg(r#"width="4" height="4""#, "");
        let image = Renderer::builder()
            .system_fonts(false)
            .background(Color::WHITE, 1.0)
            .build()
            .expect("renderer")
            .render(&doc)
            .expect("render");
        assert_eq!(image.pixel(2, 2), [255, 255, 255, 255]);
    }

    #[test]
    fn builder_rejects_bad_settings() {
        let bad_scale = Renderer::builder().system_fonts(false).scale(0.0).build();
        assert!(matches!(bad_scale, Err(RenderError::InvalidConfiguration(_))));
        let bad_nan = Renderer::builder().system_fonts(false).scale(f32::NAN).build();
        assert!(matches!(bad_nan, Err(RenderError::InvalidConfiguration(_))));
        let bad_tile = Renderer::builder().system_fonts(false).max_tile_size(0).build();
        assert!(matches!(bad_tile, Err(RenderError::InvalidConfiguration(_))));
        let bad_size = Renderer::builder()
            .system_fonts(false)
            .default_size(0.0, 10.0)
            .build();
        assert!(matches!(bad_size, Err(RenderError::InvalidConfiguration(_))));
        let bad_font = Renderer::builder()
            .system_fonts(false)
            .register_font_bytes(vec![1, 2, 3], Some("junk"))
            .build();
        assert!(matches!(bad_font, Err(RenderError::InvalidConfiguration(_))));
    }

    #[test]
    fn oversized_raster_is_rejected() {
        let doc = svg(r#"width="20000" height="10""#, "");
        assert!(matches!(
            renderer().render(&doc),
            Err(RenderError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rendered_bounds_cover_every_use_instance() {
        let doc = svg(
            r#"width="100" height="100""#,
            r##"<rect id="r" x="0" y="0" width="10" height="10"/>
            <use xlink:href="#r" x="50" y="20"/>"##,
        );
        let node = doc.node_by_id("r").expect("id");
        let bounds = renderer()
            .rendered_bounds(&doc, node, 2.0)
            .expect("render")
            .expect("bounds");
        assert_eq!(bounds, Rect::from_ltrb(-2.0, -2.0, 62.0, 32.0));
    }

    #[test]
    fn rendered_bounds_of_hidden_node_is_none() {
        let doc = svg(
            r#"width="100" height="100""#,
            r#"<rect id="r" width="10" height="10" display="none"/>"#,
        );
        let node = doc.node_by_id("r").expect("id");
        assert_eq!(renderer().rendered_bounds(&doc, node, 0.0).expect("render"), None);
    }

    #[test]
    fn debug_log_records_summary() {
        let path = std::env::temp_dir().join(format!("svgraster-debug-{}.jsonl", std::process::id()));
        let renderer = Renderer::builder()
            .system_fonts(false)
            .debug_log(&path)
            .build()
            .expect("renderer");
        let doc = svg(
            r#"width="10" height="10""#,
            r#"<rect width="5" height="5" fill="url(#missing)"/>"#,
        );
        renderer.render(&doc).expect("render");
        let log = std::fs::read_to_string(&path).expect("log");
        let _ = std::fs::remove_file(&path);
        assert!(log.lines().any(|l| l.contains("\"context\":\"render\"")));
    }
}
