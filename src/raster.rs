use crate::canvas::{Command, DrawState, Quality};
use crate::clip::ClipLayer;
use crate::dom::Element;
use crate::error::RenderError;
use crate::gradient::{GradientStop, reverse_stops};
use crate::paint::{Brush, LineCap, LineJoin, Pen};
use crate::path::{FillRule, Path, PathSeg};
use crate::types::{Color, Matrix, SpreadMethod};
use base64::Engine;
use std::sync::Arc;
use tiny_skia::{
    FilterQuality, LinearGradient, Mask, Paint, PathBuilder, Pixmap, PixmapPaint, RadialGradient,
    Shader, SpreadMode, Stroke, StrokeDash,
};

/// Largest width or height accepted for a raster target.
pub const MAX_RASTER_DIMENSION: u32 = 16_384;

/// Premultiplied RGBA raster produced by a render.
#[derive(Clone, PartialEq)]
pub struct RasterImage {
    pixmap: Pixmap,
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RasterImage({}x{})", self.width(), self.height())
    }
}

impl RasterImage {
    pub fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        if width > MAX_RASTER_DIMENSION || height > MAX_RASTER_DIMENSION {
            return Err(RenderError::RasterAllocation { width, height });
        }
        Pixmap::new(width, height)
            .map(|pixmap| Self { pixmap })
            .ok_or(RenderError::RasterAllocation { width, height })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Straight (non-premultiplied) RGBA at `(x, y)`; transparent outside.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        match self.pixmap.pixel(x, y) {
            Some(px) => {
                let c = px.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            }
            None => [0; 4],
        }
    }

    pub fn premultiplied(&self) -> &[u8] {
        self.pixmap.data()
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        self.pixmap
            .encode_png()
            .map_err(|e| RenderError::Image(format!("png encode failed: {e}")))
    }
}

/// Replays `commands` onto a fresh `width`×`height` raster.
pub fn rasterize(
    commands: &[Command],
    width: u32,
    height: u32,
    background: Option<(Color, f32)>,
) -> Result<RasterImage, RenderError> {
    let mut target = RasterImage::new(width, height)?;
    if let Some((color, alpha)) = background {
        target.pixmap.fill(to_sk_color(color, alpha));
    }
    let mut masks = MaskCache::default();
    for command in commands {
        let state = command.state();
        let mask = masks.get(state, width, height)?;
        draw_command(&mut target.pixmap, command, mask);
    }
    Ok(target)
}

// Consecutive commands usually share one clip stack.
#[derive(Default)]
struct MaskCache {
    key: Option<Arc<Vec<ClipLayer>>>,
    mask: Option<Mask>,
}

impl MaskCache {
    fn get(&mut self, state: &DrawState, width: u32, height: u32) -> Result<Option<&Mask>, RenderError> {
        let fresh = match &self.key {
            Some(key) => !Arc::ptr_eq(key, &state.clip),
            None => true,
        };
        if fresh {
            self.mask = build_mask(&state.clip, width, height)?;
            self.key = Some(state.clip.clone());
        }
        Ok(self.mask.as_ref())
    }
}

fn draw_command(pixmap: &mut Pixmap, command: &Command, mask: Option<&Mask>) {
    match command {
        Command::FillPath { path, brush, state } => {
            let Some(sk_path) = to_sk_path(path) else {
                return;
            };
            let Some(paint) = brush_paint(brush, state.quality) else {
                return;
            };
            pixmap.fill_path(
                &sk_path,
                &paint,
                to_sk_rule(path.fill_rule),
                state.transform.to_skia(),
                mask,
            );
        }
        Command::StrokePath {
            path,
            brush,
            pen,
            state,
        } => {
            let Some(sk_path) = to_sk_path(path) else {
                return;
            };
            let Some(paint) = brush_paint(brush, state.quality) else {
                return;
            };
            pixmap.stroke_path(
                &sk_path,
                &paint,
                &build_stroke(pen),
                state.transform.to_skia(),
                mask,
            );
        }
        Command::DrawImage {
            image,
            rect,
            opacity,
            state,
        } => {
            let (iw, ih) = (image.width() as f32, image.height() as f32);
            if iw <= 0.0 || ih <= 0.0 {
                return;
            }
            let paint = PixmapPaint {
                opacity: opacity.clamp(0.0, 1.0),
                quality: filter_quality(state.quality),
                ..PixmapPaint::default()
            };
            let placement = state
                .transform
                .mul(Matrix::translate(rect.x, rect.y))
                .mul(Matrix::scale(rect.width / iw, rect.height / ih));
            pixmap.draw_pixmap(0, 0, image.pixmap.as_ref(), &paint, placement.to_skia(), mask);
        }
    }
}

pub(crate) fn to_sk_path(path: &Path) -> Option<tiny_skia::Path> {
    let mut pb = PathBuilder::new();
    for seg in path.flattened_arcs().segs {
        match seg {
            PathSeg::MoveTo(p) => pb.move_to(p.x, p.y),
            PathSeg::LineTo(p) => pb.line_to(p.x, p.y),
            PathSeg::CubicTo(c1, c2, p) => pb.cubic_to(c1.x, c1.y, c2.x, c2.y, p.x, p.y),
            PathSeg::Close => pb.close(),
            PathSeg::Arc(_) => {}
        }
    }
    pb.finish()
}

fn to_sk_rule(rule: FillRule) -> tiny_skia::FillRule {
    match rule {
        FillRule::NonZero => tiny_skia::FillRule::Winding,
        FillRule::EvenOdd => tiny_skia::FillRule::EvenOdd,
    }
}

fn to_spread_mode(spread: SpreadMethod) -> SpreadMode {
    match spread {
        SpreadMethod::Pad => SpreadMode::Pad,
        SpreadMethod::Reflect => SpreadMode::Reflect,
        SpreadMethod::Repeat => SpreadMode::Repeat,
    }
}

fn filter_quality(quality: Quality) -> FilterQuality {
    if quality.smooth_images {
        FilterQuality::Bicubic
    } else {
        FilterQuality::Nearest
    }
}

fn sk_stops(stops: &[GradientStop]) -> Vec<tiny_skia::GradientStop> {
    stops
        .iter()
        .map(|s| {
            tiny_skia::GradientStop::new(
                s.offset.clamp(0.0, 1.0),
                tiny_skia::Color::from_rgba8(s.color.r, s.color.g, s.color.b, s.alpha),
            )
        })
        .collect()
}

fn brush_paint(brush: &Brush, quality: Quality) -> Option<Paint<'_>> {
    let shader = match brush {
        Brush::Solid { color, alpha } => {
            Shader::SolidColor(tiny_skia::Color::from_rgba8(color.r, color.g, color.b, *alpha))
        }
        Brush::LinearGradient(linear) => LinearGradient::new(
            tiny_skia::Point::from_xy(linear.start.x, linear.start.y),
            tiny_skia::Point::from_xy(linear.end.x, linear.end.y),
            sk_stops(&linear.stops),
            to_spread_mode(linear.spread),
            linear.transform.to_skia(),
        )?,
        // Brush stops read inward from the surround; the conical shader runs outward
        // from the focus, so they are flipped back here.
        Brush::RadialGradient(radial) => RadialGradient::new(
            tiny_skia::Point::from_xy(radial.focus.x, radial.focus.y),
            tiny_skia::Point::from_xy(radial.center.x, radial.center.y),
            radial.radius,
            sk_stops(&reverse_stops(&radial.stops)),
            to_spread_mode(radial.spread),
            radial.transform.to_skia(),
        )?,
        Brush::Pattern(pattern) => {
            let tile = &pattern.tile;
            let to_pattern = Matrix::scale(
                pattern.tile_rect.width / tile.width() as f32,
                pattern.tile_rect.height / tile.height() as f32,
            );
            tiny_skia::Pattern::new(
                tile.pixmap.as_ref(),
                SpreadMode::Repeat,
                filter_quality(quality),
                pattern.opacity,
                pattern
                    .transform
                    .mul(Matrix::translate(pattern.tile_rect.x, pattern.tile_rect.y))
                    .mul(to_pattern)
                    .to_skia(),
            )
        }
    };
    Some(Paint {
        shader,
        anti_alias: quality.anti_alias,
        ..Paint::default()
    })
}

fn build_stroke(pen: &Pen) -> Stroke {
    let mut stroke = Stroke {
        width: pen.width.max(0.0),
        miter_limit: pen.miter_limit.max(1.0),
        ..Stroke::default()
    };
    stroke.line_cap = match pen.cap {
        LineCap::Butt => tiny_skia::LineCap::Butt,
        LineCap::Round => tiny_skia::LineCap::Round,
        LineCap::Square => tiny_skia::LineCap::Square,
    };
    stroke.line_join = match pen.join {
        LineJoin::Miter => tiny_skia::LineJoin::Miter,
        LineJoin::Round => tiny_skia::LineJoin::Round,
        LineJoin::Bevel => tiny_skia::LineJoin::Bevel,
    };
    if let Some((pattern, offset)) = pen.dash_in_user_units() {
        stroke.dash = StrokeDash::new(pattern, offset);
    }
    stroke
}

fn to_sk_color(color: Color, opacity: f32) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(
        color.r,
        color.g,
        color.b,
        (opacity.clamp(0.0, 1.0) * 255.0).round() as u8,
    )
}

fn mul_coverage(dst: &mut [u8], src: impl Iterator<Item = u8>) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = ((*d as u16 * s as u16 + 127) / 255) as u8;
    }
}

// Intersects every layer into one coverage mask.
fn build_mask(layers: &[ClipLayer], width: u32, height: u32) -> Result<Option<Mask>, RenderError> {
    if layers.is_empty() {
        return Ok(None);
    }
    let alloc = || Mask::new(width, height).ok_or(RenderError::RasterAllocation { width, height });
    let mut out = alloc()?;
    out.data_mut().fill(255);
    for layer in layers {
        match layer {
            ClipLayer::Region { pieces, transform } => {
                let mut region = alloc()?;
                for piece in pieces {
                    if let Some(path) = to_sk_path(&piece.path) {
                        region.fill_path(&path, to_sk_rule(piece.rule), true, transform.to_skia());
                    }
                }
                mul_coverage(out.data_mut(), region.data().iter().copied());
            }
            ClipLayer::Exclude { piece, transform } => {
                let mut inside = alloc()?;
                if let Some(path) = to_sk_path(&piece.path) {
                    inside.fill_path(&path, to_sk_rule(piece.rule), true, transform.to_skia());
                }
                mul_coverage(out.data_mut(), inside.data().iter().map(|v| 255 - v));
            }
            ClipLayer::Luminance(mask) => {
                if mask.width != width || mask.height != height {
                    tracing::debug!(
                        mask_width = mask.width,
                        mask_height = mask.height,
                        width,
                        height,
                        "mask size does not match target"
                    );
                    continue;
                }
                mul_coverage(out.data_mut(), mask.coverage.iter().copied());
            }
        }
    }
    Ok(Some(out))
}

/// Loads the raster referenced by an `<image>` or a pattern's image child.
pub(crate) fn load_element_image(el: &Element<'_>) -> Result<RasterImage, RenderError> {
    let href = el
        .href()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RenderError::Image("image has no href".to_string()))?;
    if href.starts_with("data:") {
        let (mime, data) = parse_data_uri(href)
            .ok_or_else(|| RenderError::Image("malformed data uri".to_string()))?;
        return decode_image(&data, Some(&mime));
    }
    let resolved = el.resolve_uri(href);
    let path = resolved.strip_prefix("file://").unwrap_or(&resolved);
    let bytes = std::fs::read(path)
        .map_err(|e| RenderError::Image(format!("cannot read {path}: {e}")))?;
    decode_image(&bytes, None)
}

pub(crate) fn decode_image(data: &[u8], mime: Option<&str>) -> Result<RasterImage, RenderError> {
    let guessed_format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        Some(mime) if mime.contains("svg") => {
            return Err(RenderError::Image(format!("unsupported image type {mime}")));
        }
        _ => image::guess_format(data).ok(),
    };
    let decoded = match guessed_format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt),
        None => image::load_from_memory(data),
    }
    .map_err(|e| RenderError::Image(e.to_string()))?;

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut target = RasterImage::new(width, height)?;
    let dst = target.pixmap.data_mut();
    for (src_px, dst_px) in rgba.as_raw().chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Ok(target)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let (header, payload) = uri.strip_prefix("data:")?.split_once(',')?;
    let mime = header
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("text/plain")
        .to_string();
    let data = if header.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .ok()?
    } else {
        percent_decode(payload)
    };
    Some((mime, data))
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipPiece;
    use crate::gradient::{LinearGradientBrush, LinearMode, RadialGradientBrush};
    use crate::pattern::PatternBrush;
    use crate::types::{Point, Rect};
    use image::RgbaImage;

    fn solid(r: u8, g: u8, b: u8) -> Brush {
        Brush::Solid {
            color: Color::rgb(r, g, b),
            alpha: 255,
        }
    }

    fn fill(rect: Rect, brush: Brush, state: DrawState) -> Command {
        Command::FillPath {
            path: Path::rect(rect),
            brush,
            state,
        }
    }

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode");
        bytes
    }

    #[test]
    fn parse_data_uri_base64_decodes_payload() {
        let (mime, data) = parse_data_uri("data:text/plain;base64,SGVs bG8=").expect("uri");
        assert_eq!(mime, "text/plain");
        assert_eq!(data, b"Hello");
    }

    #[test]
    fn parse_data_uri_percent_decodes_payload() {
        let (mime, data) = parse_data_uri("data:,a%20b%2").expect("uri");
        assert_eq!(mime, "text/plain");
        assert_eq!(data, b"a b%2");
    }

    #[test]
    fn decoded_images_are_premultiplied() {
        let mut src = RgbaImage::new(1, 1);
        src.put_pixel(0, 0, image::Rgba([255, 0, 0, 128]));
        let image = decode_image(&png_bytes(&src), Some("image/png")).expect("decode");
        assert_eq!((image.width(), image.height()), (1, 1));
        assert_eq!(image.premultiplied()[0], 128);
        assert_eq!(image.pixel(0, 0)[3], 128);
    }

    #[test]
    fn garbage_image_is_a_recoverable_error() {
        let err = decode_image(b"not an image", None).expect_err("should fail");
        assert!(err.is_recoverable());
    }

    #[test]
    fn zero_sized_target_fails_allocation() {
        assert!(matches!(
            rasterize(&[], 0, 10, None),
            Err(RenderError::RasterAllocation { .. })
        ));
    }

    #[test]
    fn fills_and_background() {
        let commands = [fill(
            Rect::new(0.0, 0.0, 5.0, 10.0),
            solid(255, 0, 0),
            DrawState::default(),
        )];
        let image = rasterize(&commands, 10, 10, Some((Color::WHITE, 1.0))).expect("raster");
        assert_eq!(image.pixel(2, 2), [255, 0, 0, 255]);
        assert_eq!(image.pixel(8, 2), [255, 255, 255, 255]);
    }

    #[test]
    fn clip_regions_and_exclusions() {
        let region = ClipLayer::rect(Rect::new(0.0, 0.0, 4.0, 10.0), Matrix::identity());
        let exclude = ClipLayer::Exclude {
            piece: ClipPiece {
                path: Path::rect(Rect::new(0.0, 0.0, 4.0, 2.0)),
                rule: FillRule::NonZero,
            },
            transform: Matrix::identity(),
        };
        let state = DrawState {
            clip: Arc::new(vec![region, exclude]),
            ..DrawState::default()
        };
        let commands = [fill(Rect::new(0.0, 0.0, 10.0, 10.0), solid(0, 0, 255), state)];
        let image = rasterize(&commands, 10, 10, None).expect("raster");
        assert_eq!(image.pixel(1, 5), [0, 0, 255, 255]);
        assert_eq!(image.pixel(6, 5)[3], 0);
        assert_eq!(image.pixel(1, 0)[3], 0);
    }

    #[test]
    fn empty_region_clips_everything() {
        let state = DrawState {
            clip: Arc::new(vec![ClipLayer::nothing()]),
            ..DrawState::default()
        };
        let commands = [fill(Rect::new(0.0, 0.0, 10.0, 10.0), solid(0, 0, 0), state)];
        let image = rasterize(&commands, 10, 10, None).expect("raster");
        assert!(image.premultiplied().iter().all(|v| *v == 0));
    }

    #[test]
    fn linear_gradient_runs_along_its_axis() {
        let brush = Brush::LinearGradient(LinearGradientBrush {
            start: Point::new(0.0, 0.0),
            end: Point::new(100.0, 0.0),
            stops: vec![
                GradientStop::new(0.0, Color::BLACK, 255),
                GradientStop::new(1.0, Color::WHITE, 255),
            ],
            mode: LinearMode::Horizontal,
            spread: SpreadMethod::Pad,
            transform: Matrix::identity(),
        });
        let commands = [fill(Rect::new(0.0, 0.0, 100.0, 4.0), brush, DrawState::default())];
        let image = rasterize(&commands, 100, 4, None).expect("raster");
        assert!(image.pixel(1, 1)[0] < 16);
        assert!(image.pixel(98, 1)[0] > 240);
    }

    #[test]
    fn radial_stops_are_flipped_back_for_the_shader() {
        // Surround-first: blue at the edge, red at the focus.
        let brush = Brush::RadialGradient(RadialGradientBrush {
            center: Point::new(50.0, 50.0),
            focus: Point::new(50.0, 50.0),
            radius: 50.0,
            stops: vec![
                GradientStop::new(0.0, Color::rgb(0, 0, 255), 255),
                GradientStop::new(1.0, Color::rgb(255, 0, 0), 255),
            ],
            spread: SpreadMethod::Pad,
            transform: Matrix::identity(),
        });
        let commands = [fill(Rect::new(0.0, 0.0, 100.0, 100.0), brush, DrawState::default())];
        let image = rasterize(&commands, 100, 100, None).expect("raster");
        let center = image.pixel(50, 50);
        assert!(center[0] > 240 && center[2] < 16, "{center:?}");
        let corner = image.pixel(0, 0);
        assert!(corner[2] > 240 && corner[0] < 16, "{corner:?}");
    }

    #[test]
    fn pattern_tiles_repeat() {
        let red = [fill(
            Rect::new(0.0, 0.0, 1.0, 2.0),
            solid(255, 0, 0),
            DrawState::default(),
        )];
        let tile = rasterize(&red, 2, 2, None).expect("tile");
        let brush = Brush::Pattern(PatternBrush {
            tile: Arc::new(tile),
            tile_rect: Rect::new(0.0, 0.0, 4.0, 4.0),
            transform: Matrix::identity(),
            opacity: 1.0,
        });
        let state = DrawState {
            quality: Quality {
                anti_alias: false,
                smooth_images: false,
            },
            ..DrawState::default()
        };
        let commands = [fill(Rect::new(0.0, 0.0, 8.0, 8.0), brush, state)];
        let image = rasterize(&commands, 8, 8, None).expect("raster");
        assert_eq!(image.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(image.pixel(2, 0)[3], 0);
        assert_eq!(image.pixel(5, 5), [255, 0, 0, 255]);
    }

    #[test]
    fn dashed_strokes_leave_gaps() {
        let mut path = Path::new();
        path.move_to(0.0, 5.0);
        path.line_to(20.0, 5.0);
        let pen = Pen {
            width: 2.0,
            dash: Some(vec![2.0, 2.0]),
            dash_offset: 0.0,
            cap: LineCap::Butt,
            join: LineJoin::Miter,
            miter_limit: 4.0,
        };
        let commands = [Command::StrokePath {
            path,
            brush: solid(0, 0, 0),
            pen,
            state: DrawState::default(),
        }];
        let image = rasterize(&commands, 20, 10, None).expect("raster");
        assert_eq!(image.pixel(1, 5)[3], 255);
        assert_eq!(image.pixel(3, 5)[3], 0);
        assert_eq!(image.pixel(9, 5)[3], 255);
    }

    #[test]
    fn images_are_stretched_into_their_rect() {
        let mut src = RgbaImage::new(1, 1);
        src.put_pixel(0, 0, image::Rgba([0, 255, 0, 255]));
        let image = decode_image(&png_bytes(&src), None).expect("decode");
        let commands = [Command::DrawImage {
            image: Arc::new(image),
            rect: Rect::new(2.0, 2.0, 4.0, 4.0),
            opacity: 1.0,
            state: DrawState {
                quality: Quality {
                    anti_alias: true,
                    smooth_images: false,
                },
                ..DrawState::default()
            },
        }];
        let out = rasterize(&commands, 8, 8, None).expect("raster");
        assert_eq!(out.pixel(4, 4), [0, 255, 0, 255]);
        assert_eq!(out.pixel(0, 0)[3], 0);
    }

    #[test]
    fn png_output_decodes() {
        let image = rasterize(&[], 3, 2, Some((Color::BLACK, 1.0))).expect("raster");
        let png = image.encode_png().expect("png");
        let decoded = image::load_from_memory(&png).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }
}
