use crate::dom::{Axis, Element};
use crate::error::RenderError;
use crate::gradient::{self, LinearGradientBrush, RadialGradientBrush};
use crate::pattern::{self, PatternBrush};
use crate::render::{RenderState, Walker};
use crate::types::{Color, Rect};
use crate::values::{css_color_to_color, parse_color, parse_length_list, parse_url_ref};
use lightningcss::properties::svg::{SVGPaint, SVGPaintFallback};
use lightningcss::traits::Parse;
use lightningcss::values::color::CssColor;

/// Parsed fill/stroke value.
#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    None,
    CurrentColor,
    Color(Color, f32),
    Url {
        reference: String,
        fallback: Option<Box<Paint>>,
    },
}

impl Paint {
    pub fn parse(input: &str) -> Option<Paint> {
        let v = input.trim();
        if let Ok(paint) = SVGPaint::parse_string(v) {
            if let Some(mapped) = paint_from_css(&paint) {
                return Some(mapped);
            }
        }
        parse_paint_legacy(v)
    }
}

fn paint_from_css(paint: &SVGPaint<'_>) -> Option<Paint> {
    match paint {
        SVGPaint::None => Some(Paint::None),
        SVGPaint::Color(color) => color_paint(color),
        SVGPaint::Url { url, fallback } => {
            let reference = url.url.as_ref().trim().to_string();
            if reference.is_empty() {
                return None;
            }
            let fallback = match fallback {
                Some(SVGPaintFallback::None) => Some(Box::new(Paint::None)),
                Some(SVGPaintFallback::Color(color)) => color_paint(color).map(Box::new),
                None => None,
            };
            Some(Paint::Url {
                reference,
                fallback,
            })
        }
        SVGPaint::ContextFill | SVGPaint::ContextStroke => None,
    }
}

fn color_paint(color: &CssColor) -> Option<Paint> {
    if matches!(color, CssColor::CurrentColor) {
        return Some(Paint::CurrentColor);
    }
    css_color_to_color(color).map(|(c, a)| Paint::Color(c, a))
}

fn parse_paint_legacy(v: &str) -> Option<Paint> {
    if v.eq_ignore_ascii_case("none") {
        return Some(Paint::None);
    }
    if v.eq_ignore_ascii_case("currentColor") {
        return Some(Paint::CurrentColor);
    }
    if let Some((reference, rest)) = parse_url_ref(v) {
        let fallback = if rest.is_empty() {
            None
        } else {
            parse_paint_legacy(rest)
                .filter(|p| !matches!(p, Paint::Url { .. }))
                .map(Box::new)
        };
        return Some(Paint::Url {
            reference,
            fallback,
        });
    }
    parse_color(v).map(|(c, a)| Paint::Color(c, a))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Brush {
    Solid { color: Color, alpha: u8 },
    LinearGradient(LinearGradientBrush),
    RadialGradient(RadialGradientBrush),
    Pattern(PatternBrush),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintTarget {
    Fill,
    Stroke,
}

impl PaintTarget {
    fn property(self) -> &'static str {
        match self {
            PaintTarget::Fill => "fill",
            PaintTarget::Stroke => "stroke",
        }
    }

    fn opacity_property(self) -> &'static str {
        match self {
            PaintTarget::Fill => "fill-opacity",
            PaintTarget::Stroke => "stroke-opacity",
        }
    }

    fn default_value(self) -> &'static str {
        match self {
            PaintTarget::Fill => "black",
            PaintTarget::Stroke => "none",
        }
    }
}

// Resource content renders in its own scope, detached from where the resource sits.
const OPACITY_SCOPES: &[&str] = &["pattern", "marker", "mask", "clipPath"];

/// Group opacity approximated as a product: `opacity` does not inherit, so the
/// values of every render ancestor up to the nearest resource element are
/// multiplied into the element's own paint alpha. Overlapping siblings in a
/// translucent group therefore blend with each other instead of being
/// composited as one layer.
pub(crate) fn element_opacity(el: &Element<'_>) -> f32 {
    let mut product = 1.0f32;
    let mut cur = Some(el.clone());
    while let Some(node) = cur {
        if OPACITY_SCOPES.contains(&node.tag()) {
            break;
        }
        if let Some(v) = node
            .own_property("opacity")
            .filter(|v| *v != "inherit")
            .and_then(parse_opacity)
        {
            product *= v;
        }
        cur = node.parent();
    }
    product.clamp(0.0, 1.0)
}

fn parse_opacity(v: &str) -> Option<f32> {
    let v = v.trim();
    let n = match v.strip_suffix('%') {
        Some(p) => p.trim().parse::<f32>().ok()? / 100.0,
        None => v.parse::<f32>().ok()?,
    };
    Some(n.clamp(0.0, 1.0))
}

pub(crate) fn paint_opacity(el: &Element<'_>, target: PaintTarget) -> f32 {
    let own = el
        .property(target.opacity_property())
        .and_then(parse_opacity)
        .unwrap_or(1.0);
    (own * element_opacity(el)).clamp(0.0, 1.0)
}

// `color` may itself be currentColor or inherit; both defer to the render parent.
pub(crate) fn current_color(el: &Element<'_>) -> (Color, f32) {
    let mut cur = Some(el.clone());
    while let Some(node) = cur {
        match node.property("color") {
            Some(v) if v.eq_ignore_ascii_case("currentColor") => cur = node.parent(),
            Some(v) => return parse_color(v).unwrap_or((Color::BLACK, 1.0)),
            None => return (Color::BLACK, 1.0),
        }
    }
    (Color::BLACK, 1.0)
}

fn solid(color: Color, alpha: f32, opacity: f32) -> Brush {
    Brush::Solid {
        color,
        alpha: (alpha * opacity * 255.0).round().clamp(0.0, 255.0) as u8,
    }
}

/// Resolves the fill or stroke of `el` into a brush. `bounds` is the object bounding
/// box used for bounding-box paint servers.
pub(crate) fn resolve_brush(
    walker: &Walker<'_>,
    state: &RenderState,
    el: &Element<'_>,
    target: PaintTarget,
    bounds: Rect,
) -> Result<Option<Brush>, RenderError> {
    let value = el.property_or(target.property(), target.default_value());
    let Some(paint) = Paint::parse(value) else {
        tracing::debug!(value, "unparseable paint");
        return Ok(None);
    };
    let opacity = paint_opacity(el, target);
    resolve_paint(walker, state, el, &paint, bounds, opacity)
}

fn resolve_paint(
    walker: &Walker<'_>,
    state: &RenderState,
    el: &Element<'_>,
    paint: &Paint,
    bounds: Rect,
    opacity: f32,
) -> Result<Option<Brush>, RenderError> {
    match paint {
        Paint::None => Ok(None),
        Paint::CurrentColor => {
            let (color, alpha) = current_color(el);
            Ok(Some(solid(color, alpha, opacity)))
        }
        Paint::Color(color, alpha) => Ok(Some(solid(*color, *alpha, opacity))),
        Paint::Url {
            reference,
            fallback,
        } => {
            let server = el.reference(reference);
            match server.as_ref().map(|s| (s, s.tag())) {
                Some((server, "linearGradient")) => {
                    Ok(gradient::build_linear(server, bounds, opacity))
                }
                Some((server, "radialGradient")) => {
                    Ok(gradient::build_radial(server, bounds, opacity))
                }
                Some((server, "pattern")) => {
                    pattern::build_pattern(walker, state, server, bounds, opacity)
                }
                _ => {
                    tracing::warn!(reference = reference.as_str(), "unresolved paint server");
                    walker.note("paint.fallback", reference);
                    match fallback {
                        Some(fb) => resolve_paint(walker, state, el, fb, bounds, opacity),
                        None => Ok(None),
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCap {
    Butt,
    Round,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineJoin {
    Miter,
    Round,
    Bevel,
}

/// Stroke geometry. Dash lengths and offset are in stroke-width units.
#[derive(Debug, Clone, PartialEq)]
pub struct Pen {
    pub width: f32,
    pub dash: Option<Vec<f32>>,
    pub dash_offset: f32,
    pub cap: LineCap,
    pub join: LineJoin,
    pub miter_limit: f32,
}

impl Pen {
    pub fn dash_in_user_units(&self) -> Option<(Vec<f32>, f32)> {
        let dash = self.dash.as_ref()?;
        Some((
            dash.iter().map(|d| d * self.width).collect(),
            self.dash_offset * self.width,
        ))
    }
}

/// Stroke pen for `el`, or `None` when nothing should be stroked.
pub fn resolve_pen(el: &Element<'_>) -> Result<Option<Pen>, RenderError> {
    let width = el.property_length("stroke-width", Axis::Other).unwrap_or(1.0);
    if width <= 0.0 {
        return Ok(None);
    }
    let miter_limit = el.number_property("stroke-miterlimit").unwrap_or(4.0);
    if miter_limit < 1.0 {
        return Err(RenderError::InvalidMiterLimit(miter_limit));
    }

    let dash = match el.property("stroke-dasharray") {
        None | Some("none") => None,
        Some(list) => {
            let mut dash: Vec<f32> = parse_length_list(list)
                .into_iter()
                .map(|len| el.resolve_length(len, Axis::Other) / width)
                .collect();
            if dash.iter().any(|d| *d == 0.0) {
                return Ok(None);
            }
            if dash.len() % 2 == 1 {
                dash.extend_from_within(..);
            }
            (!dash.is_empty() && dash.iter().all(|d| *d > 0.0)).then_some(dash)
        }
    };
    let dash_offset = el
        .property_length("stroke-dashoffset", Axis::Other)
        .unwrap_or(0.0)
        / width;

    let cap = match el.property("stroke-linecap") {
        Some("round") => LineCap::Round,
        Some("square") => LineCap::Square,
        _ => LineCap::Butt,
    };
    let join = match el.property("stroke-linejoin") {
        Some("round") => LineJoin::Round,
        Some("bevel") => LineJoin::Bevel,
        _ => LineJoin::Miter,
    };
    Ok(Some(Pen {
        width,
        dash,
        dash_offset,
        cap,
        join,
        miter_limit,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Renderer;
    use crate::dom::Document;

    fn element<'a>(doc: &'a Document, id: &str) -> Element<'a> {
        doc.element(doc.node_by_id(id).expect("id")).expect("element")
    }

    fn doc(body: &str) -> Document {
        Document::parse(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg">{body}</svg>"#
        ))
        .expect("parse")
    }

    fn brush(doc: &Document, id: &str, target: PaintTarget) -> Option<Brush> {
        let renderer = Renderer::builder()
            .system_fonts(false)
            .build()
            .expect("renderer");
        let walker = renderer.walker();
        let el = element(doc, id);
        resolve_brush(
            &walker,
            &RenderState::default(),
            &el,
            target,
            Rect::new(0.0, 0.0, 10.0, 10.0),
        )
        .expect("resolve")
    }

    #[test]
    fn paint_values_parse() {
        assert_eq!(Paint::parse("none"), Some(Paint::None));
        assert_eq!(Paint::parse("currentColor"), Some(Paint::CurrentColor));
        assert_eq!(
            Paint::parse("#ff0000"),
            Some(Paint::Color(Color::rgb(255, 0, 0), 1.0))
        );
        let Some(Paint::Url {
            reference,
            fallback,
        }) = Paint::parse("url(#g) blue")
        else {
            panic!("expected url paint");
        };
        assert_eq!(reference, "#g");
        assert_eq!(
            fallback.as_deref(),
            Some(&Paint::Color(Color::rgb(0, 0, 255), 1.0))
        );
    }

    #[test]
    fn fill_defaults_to_black_and_stroke_to_none() {
        let d = doc(r#"<rect id="r" width="1" height="1"/>"#);
        assert_eq!(
            brush(&d, "r", PaintTarget::Fill),
            Some(Brush::Solid {
                color: Color::BLACK,
                alpha: 255
            })
        );
        assert_eq!(brush(&d, "r", PaintTarget::Stroke), None);
    }

    #[test]
    fn opacity_multiplies_into_solid_alpha() {
        let d = doc(r#"<g opacity="0.5"><rect id="r" fill="red" fill-opacity="0.5"/></g>"#);
        assert_eq!(
            brush(&d, "r", PaintTarget::Fill),
            Some(Brush::Solid {
                color: Color::rgb(255, 0, 0),
                alpha: 64
            })
        );
    }

    #[test]
    fn resource_ancestors_do_not_dim_their_content() {
        let d = doc(
            r#"<g opacity="0.5"><pattern id="p" opacity="0.5"><g opacity="0.5"><rect id="r" fill="red"/></g></pattern></g>"#,
        );
        assert_eq!(element_opacity(&element(&d, "r")), 0.5);
        assert_eq!(paint_opacity(&element(&d, "r"), PaintTarget::Fill), 0.5);
    }

    #[test]
    fn current_color_resolves_through_ancestors() {
        let d = doc(
            r#"<g color="lime"><g color="currentColor"><rect id="r" fill="currentColor"/></g></g>"#,
        );
        assert_eq!(
            brush(&d, "r", PaintTarget::Fill),
            Some(Brush::Solid {
                color: Color::rgb(0, 255, 0),
                alpha: 255
            })
        );
    }

    #[test]
    fn dangling_url_uses_fallback_or_nothing() {
        let d = doc(
            r#"<rect id="a" fill="url(#missing) blue"/><rect id="b" fill="url(#missing)"/><rect id="c" fill="url(#c)"/>"#,
        );
        assert_eq!(
            brush(&d, "a", PaintTarget::Fill),
            Some(Brush::Solid {
                color: Color::rgb(0, 0, 255),
                alpha: 255
            })
        );
        assert_eq!(brush(&d, "b", PaintTarget::Fill), None);
        assert_eq!(brush(&d, "c", PaintTarget::Fill), None);
    }

    #[test]
    fn gradient_opacity_scales_every_stop() {
        let d = doc(
            r#"<linearGradient id="g"><stop offset="0" stop-color="red"/><stop offset="1" stop-color="blue" stop-opacity="0.5"/></linearGradient>
            <rect id="r" fill="url(#g)" fill-opacity="0.5"/>"#,
        );
        let Some(Brush::LinearGradient(lg)) = brush(&d, "r", PaintTarget::Fill) else {
            panic!("expected linear gradient");
        };
        let alphas: Vec<u8> = lg.stops.iter().map(|s| s.alpha).collect();
        assert_eq!(alphas, vec![128, 64]);
    }

    #[test]
    fn odd_dash_arrays_are_duplicated() {
        let d = doc(r#"<line id="l" stroke="black" stroke-dasharray="5,3,2"/>"#);
        let pen = resolve_pen(&element(&d, "l")).expect("pen").expect("some pen");
        assert_eq!(pen.dash, Some(vec![5.0, 3.0, 2.0, 5.0, 3.0, 2.0]));
    }

    #[test]
    fn dashes_are_relative_to_stroke_width() {
        let d = doc(
            r#"<line id="l" stroke="black" stroke-width="2" stroke-dasharray="4 2" stroke-dashoffset="1"/>"#,
        );
        let pen = resolve_pen(&element(&d, "l")).expect("pen").expect("some pen");
        assert_eq!(pen.dash, Some(vec![2.0, 1.0]));
        assert_eq!(pen.dash_offset, 0.5);
        assert_eq!(pen.dash_in_user_units(), Some((vec![4.0, 2.0], 1.0)));
    }

    #[test]
    fn zero_dash_entry_suppresses_stroke() {
        let d = doc(r#"<line id="l" stroke="black" stroke-dasharray="5 0 2"/>"#);
        assert_eq!(resolve_pen(&element(&d, "l")).expect("pen"), None);
    }

    #[test]
    fn zero_stroke_width_yields_no_pen() {
        let d = doc(
            r#"<line id="l" stroke="black" stroke-width="0" stroke-miterlimit="0.5" stroke-dasharray="1 2"/>"#,
        );
        assert_eq!(resolve_pen(&element(&d, "l")).expect("pen"), None);
    }

    #[test]
    fn miter_limit_below_one_is_rejected() {
        let d = doc(r#"<line id="l" stroke="black" stroke-miterlimit="0.5"/>"#);
        assert!(matches!(
            resolve_pen(&element(&d, "l")),
            Err(RenderError::InvalidMiterLimit(v)) if v == 0.5
        ));
        let d = doc(r#"<line id="l" stroke="black" stroke-linecap="round" stroke-linejoin="bevel"/>"#);
        let pen = resolve_pen(&element(&d, "l")).expect("pen").expect("some pen");
        assert_eq!(pen.cap, LineCap::Round);
        assert_eq!(pen.join, LineJoin::Bevel);
        assert_eq!(pen.miter_limit, 4.0);
    }
}
