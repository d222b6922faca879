use crate::dom::{Axis, Element};
use crate::paint::Brush;
use crate::path::Path;
use crate::types::{Color, Matrix, Point, Rect, SpreadMethod, Units};
use crate::values::{Length, parse_color};

const MAX_HREF_DEPTH: usize = 16;
const AXIS_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Color,
    pub alpha: u8,
}

impl GradientStop {
    pub const fn new(offset: f32, color: Color, alpha: u8) -> Self {
        Self {
            offset,
            color,
            alpha,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearMode {
    Horizontal,
    Vertical,
    ForwardDiagonal,
    BackwardDiagonal,
}

impl LinearMode {
    pub fn classify(x1: f32, y1: f32, x2: f32, y2: f32) -> LinearMode {
        if y1 == y2 {
            LinearMode::Horizontal
        } else if x1 == x2 {
            LinearMode::Vertical
        } else if x1 < x2 {
            LinearMode::ForwardDiagonal
        } else {
            LinearMode::BackwardDiagonal
        }
    }
}

/// Axis and stops live in gradient space; `transform` maps gradient space to user space.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearGradientBrush {
    pub start: Point,
    pub end: Point,
    pub stops: Vec<GradientStop>,
    pub mode: LinearMode,
    pub spread: SpreadMethod,
    pub transform: Matrix,
}

/// Stops are stored surround-first: offset 0 is the outer circle and offset 1 the
/// focus, so the list reads inward from the edge.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialGradientBrush {
    pub center: Point,
    pub focus: Point,
    pub radius: f32,
    pub stops: Vec<GradientStop>,
    pub spread: SpreadMethod,
    pub transform: Matrix,
}

// Walks the xlink:href chain, including `el` itself.
pub(crate) fn href_chain<'a>(el: &Element<'a>) -> Vec<Element<'a>> {
    let mut chain = vec![el.clone()];
    while chain.len() < MAX_HREF_DEPTH {
        let Some(next) = chain.last().and_then(Element::href_element) else {
            break;
        };
        if chain.iter().any(|seen| seen.node_id() == next.node_id()) {
            break;
        }
        if !matches!(
            next.tag(),
            "linearGradient" | "radialGradient" | "pattern"
        ) {
            break;
        }
        chain.push(next);
    }
    chain
}

pub(crate) fn inherited_attr<'a>(chain: &[Element<'a>], name: &str) -> Option<(Element<'a>, &'a str)> {
    chain
        .iter()
        .find_map(|el| el.attr(name).map(|v| (el.clone(), v)))
}

/// Ordered stop list with offsets clamped into [0, 1] and never decreasing.
pub fn resolve_stops(gradient: &Element<'_>) -> Vec<GradientStop> {
    let chain = href_chain(gradient);
    let stops: Vec<Element<'_>> = chain
        .iter()
        .filter(|el| matches!(el.tag(), "linearGradient" | "radialGradient"))
        .map(|el| {
            el.children()
                .into_iter()
                .filter(|c| c.tag() == "stop")
                .collect::<Vec<_>>()
        })
        .find(|stops| !stops.is_empty())
        .unwrap_or_default();

    if stops.is_empty() {
        return vec![
            GradientStop::new(0.0, Color::BLACK, 255),
            GradientStop::new(1.0, Color::BLACK, 255),
        ];
    }

    let mut out: Vec<GradientStop> = Vec::with_capacity(stops.len());
    for stop in &stops {
        let mut offset = parse_stop_offset(stop.attr("offset")).unwrap_or(0.0);
        if let Some(prev) = out.last() {
            offset = offset.max(prev.offset);
        }
        let (color, color_alpha) = stop_color(stop);
        let opacity = stop
            .number_property("stop-opacity")
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        out.push(GradientStop::new(
            offset,
            color,
            (color_alpha * opacity * 255.0).round().clamp(0.0, 255.0) as u8,
        ));
    }
    out
}

fn parse_stop_offset(input: Option<&str>) -> Option<f32> {
    let s = input?.trim();
    if let Some(p) = s.strip_suffix('%') {
        let v = p.trim().parse::<f32>().ok()?;
        return Some((v / 100.0).clamp(0.0, 1.0));
    }
    let v = s.parse::<f32>().ok()?;
    Some(v.clamp(0.0, 1.0))
}

fn stop_color(stop: &Element<'_>) -> (Color, f32) {
    match stop.property("stop-color") {
        Some(v) if v.eq_ignore_ascii_case("currentColor") => stop
            .property("color")
            .and_then(parse_color)
            .unwrap_or((Color::BLACK, 1.0)),
        Some(v) => parse_color(v).unwrap_or((Color::BLACK, 1.0)),
        None => (Color::BLACK, 1.0),
    }
}

fn scale_alpha(stops: &mut [GradientStop], opacity: f32) {
    for stop in stops {
        stop.alpha = (stop.alpha as f32 * opacity).round().clamp(0.0, 255.0) as u8;
    }
}

fn solid_last_stop(stops: &[GradientStop], opacity: f32) -> Option<Brush> {
    let last = stops.last()?;
    Some(Brush::Solid {
        color: last.color,
        alpha: (last.alpha as f32 * opacity).round().clamp(0.0, 255.0) as u8,
    })
}

// Bounding-box units only hold while every coordinate stays within the unit square;
// anything larger is read as user space instead.
struct Coords<'a> {
    chain: Vec<Element<'a>>,
    units: Units,
}

impl<'a> Coords<'a> {
    fn new(gradient: &Element<'a>, names: &[&str]) -> Self {
        let chain = href_chain(gradient);
        let mut units = Units::parse(
            inherited_attr(&chain, "gradientUnits").map(|(_, v)| v),
            Units::ObjectBoundingBox,
        );
        if units == Units::ObjectBoundingBox {
            let exceeds = names.iter().any(|name| {
                inherited_attr(&chain, name)
                    .and_then(|(_, v)| Length::parse(v))
                    .is_some_and(|len| unit_fraction(len) > 1.0)
            });
            if exceeds {
                units = Units::UserSpaceOnUse;
            }
        }
        Self { chain, units }
    }

    fn get(&self, name: &str, axis: Axis, default: Length) -> f32 {
        let found = inherited_attr(&self.chain, name)
            .and_then(|(el, v)| Length::parse(v).map(|len| (el, len)));
        match self.units {
            Units::ObjectBoundingBox => unit_fraction(found.map_or(default, |(_, len)| len)),
            Units::UserSpaceOnUse => match found {
                Some((el, len)) => el.resolve_length(len, axis),
                None => self.chain[0].resolve_length(default, axis),
            },
        }
    }

    fn spread(&self) -> SpreadMethod {
        SpreadMethod::parse(inherited_attr(&self.chain, "spreadMethod").map(|(_, v)| v))
    }

    // Gradient space -> user space.
    fn transform(&self, bounds: Rect) -> Option<Matrix> {
        let own = inherited_attr(&self.chain, "gradientTransform")
            .map_or(Matrix::identity(), |(el, _)| el.matrix_attr("gradientTransform"));
        match self.units {
            Units::UserSpaceOnUse => Some(own),
            Units::ObjectBoundingBox => {
                if bounds.is_empty() {
                    return None;
                }
                Some(bbox_matrix(bounds).mul(own))
            }
        }
    }
}

fn unit_fraction(len: Length) -> f32 {
    if len.is_percent() {
        len.value / 100.0
    } else {
        len.value
    }
}

pub(crate) fn bbox_matrix(bounds: Rect) -> Matrix {
    Matrix::translate(bounds.x, bounds.y).mul(Matrix::scale(bounds.width, bounds.height))
}

/// Linear gradient brush for `gradient` painted over `bounds`.
pub fn build_linear(gradient: &Element<'_>, bounds: Rect, opacity: f32) -> Option<Brush> {
    let coords = Coords::new(gradient, &["x1", "y1", "x2", "y2"]);
    let x1 = coords.get("x1", Axis::X, Length::percent(0.0));
    let y1 = coords.get("y1", Axis::Y, Length::percent(0.0));
    let x2 = coords.get("x2", Axis::X, Length::percent(100.0));
    let y2 = coords.get("y2", Axis::Y, Length::percent(0.0));
    let mut stops = resolve_stops(gradient);
    let transform = coords.transform(bounds)?;
    if (x1 == x2 && y1 == y2) || stops.len() == 1 {
        return solid_last_stop(&stops, opacity);
    }

    let mut start = Point::new(x1, y1);
    let mut end = Point::new(x2, y2);
    let spread = coords.spread();
    if spread == SpreadMethod::Pad {
        (start, end) = pad_axis(start, end, &mut stops, bounds, transform);
    }
    scale_alpha(&mut stops, opacity);
    Some(Brush::LinearGradient(LinearGradientBrush {
        start,
        end,
        stops,
        mode: LinearMode::classify(x1, y1, x2, y2),
        spread,
        transform,
    }))
}

// Extends the axis so it spans the painted bounds, remaps offsets onto the longer
// axis, and pins stops at both ends.
fn pad_axis(
    start: Point,
    end: Point,
    stops: &mut Vec<GradientStop>,
    bounds: Rect,
    transform: Matrix,
) -> (Point, Point) {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let len2 = dx * dx + dy * dy;
    let (mut t_min, mut t_max) = (0.0f32, 1.0f32);
    if let Some(inv) = transform.invert() {
        let corners = [
            (bounds.x, bounds.y),
            (bounds.right(), bounds.y),
            (bounds.right(), bounds.bottom()),
            (bounds.x, bounds.bottom()),
        ];
        for (x, y) in corners {
            let (gx, gy) = inv.apply(x, y);
            let t = ((gx - start.x) * dx + (gy - start.y) * dy) / len2;
            if t.is_finite() {
                t_min = t_min.min(t);
                t_max = t_max.max(t);
            }
        }
    }
    // Corners sitting on the axis ends should not re-map offsets through rounding.
    if t_min > -AXIS_EPSILON {
        t_min = 0.0;
    }
    if t_max < 1.0 + AXIS_EPSILON {
        t_max = 1.0;
    }
    let span = t_max - t_min;
    if span > 1.0 {
        for stop in stops.iter_mut() {
            stop.offset = (stop.offset - t_min) / span;
        }
    }
    if let Some(first) = stops.first().copied() {
        if first.offset > 0.0 {
            stops.insert(0, GradientStop { offset: 0.0, ..first });
        }
    }
    if let Some(last) = stops.last().copied() {
        if last.offset < 1.0 {
            stops.push(GradientStop { offset: 1.0, ..last });
        }
    }
    (
        Point::new(start.x + dx * t_min, start.y + dy * t_min),
        Point::new(start.x + dx * t_max, start.y + dy * t_max),
    )
}

/// Radial gradient brush for `gradient` painted over `bounds`.
pub fn build_radial(gradient: &Element<'_>, bounds: Rect, opacity: f32) -> Option<Brush> {
    let coords = Coords::new(gradient, &["cx", "cy", "fx", "fy", "r"]);
    let cx = coords.get("cx", Axis::X, Length::percent(50.0));
    let cy = coords.get("cy", Axis::Y, Length::percent(50.0));
    let r = coords.get("r", Axis::Other, Length::percent(50.0));
    let fx = match inherited_attr(&coords.chain, "fx") {
        Some(_) => coords.get("fx", Axis::X, Length::ZERO),
        None => cx,
    };
    let fy = match inherited_attr(&coords.chain, "fy") {
        Some(_) => coords.get("fy", Axis::Y, Length::ZERO),
        None => cy,
    };
    let stops = resolve_stops(gradient);
    let transform = coords.transform(bounds)?;
    if r <= 0.0 || stops.len() == 1 {
        return solid_last_stop(&stops, opacity);
    }

    let mut stops = reverse_stops(&stops);
    scale_alpha(&mut stops, opacity);
    Some(Brush::RadialGradient(RadialGradientBrush {
        center: Point::new(cx, cy),
        focus: Point::new(fx, fy),
        radius: r,
        stops,
        spread: coords.spread(),
        transform,
    }))
}

// Surround-first ordering: reverse the list and invert each offset.
pub(crate) fn reverse_stops(stops: &[GradientStop]) -> Vec<GradientStop> {
    stops
        .iter()
        .rev()
        .map(|s| GradientStop {
            offset: 1.0 - s.offset,
            ..*s
        })
        .collect()
}

/// The elliptical area covered by the gradient's outer circle, in user space.
pub fn radial_region(gradient: &Element<'_>, bounds: Rect) -> Option<Path> {
    match build_radial(gradient, bounds, 1.0)? {
        Brush::RadialGradient(brush) => Some(brush.region()),
        _ => None,
    }
}

impl RadialGradientBrush {
    pub fn region(&self) -> Path {
        Path::ellipse(self.center.x, self.center.y, self.radius, self.radius)
            .transform(self.transform)
    }

    /// Color painted outside the outer circle.
    pub fn surround(&self) -> Option<GradientStop> {
        self.stops.first().copied()
    }
}
