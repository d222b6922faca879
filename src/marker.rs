use crate::canvas::Canvas;
use crate::clip::ClipLayer;
use crate::dom::{Axis, Element};
use crate::error::RenderError;
use crate::path::{ArcSegment, Path, PathSeg, angle_between, normalize_angle_deg};
use crate::render::{RenderState, Walker};
use crate::types::{Matrix, Point, Rect};
use crate::values::{AspectRatio, view_box_transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerPosition {
    Start,
    Mid,
    End,
}

impl MarkerPosition {
    fn property(self) -> &'static str {
        match self {
            MarkerPosition::Start => "marker-start",
            MarkerPosition::Mid => "marker-mid",
            MarkerPosition::End => "marker-end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerInstance {
    pub position: Point,
    /// Degrees.
    pub angle: f32,
    /// Marker content space to host user space.
    pub transform: Matrix,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Orient {
    Angle(f32),
    Auto,
    AutoStartReverse,
}

impl Orient {
    fn parse(value: Option<&str>) -> Orient {
        match value.map(str::trim) {
            Some("auto") => Orient::Auto,
            Some("auto-start-reverse") => Orient::AutoStartReverse,
            Some(v) => Orient::Angle(parse_angle(v).unwrap_or(0.0)),
            None => Orient::Angle(0.0),
        }
    }
}

fn parse_angle(value: &str) -> Option<f32> {
    let v = value.trim();
    if let Some(n) = v.strip_suffix("deg") {
        return n.trim().parse().ok();
    }
    if let Some(n) = v.strip_suffix("grad") {
        return n.trim().parse::<f32>().ok().map(|g| g * 0.9);
    }
    if let Some(n) = v.strip_suffix("rad") {
        return n.trim().parse::<f32>().ok().map(f32::to_degrees);
    }
    if let Some(n) = v.strip_suffix("turn") {
        return n.trim().parse::<f32>().ok().map(|t| t * 360.0);
    }
    v.parse().ok()
}

/// A vertex of the host path with the tangent directions (degrees) of the
/// segments arriving at and leaving it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Vertex {
    point: Point,
    incoming: Option<f32>,
    outgoing: Option<f32>,
}

fn direction(from: Point, to: Point) -> Option<f32> {
    (from != to).then(|| angle_between(from, to))
}

// Arc tangent at parameter `t`, oriented along the sweep.
fn arc_direction(arc: &ArcSegment, t: f32) -> Option<f32> {
    let (sin_phi, cos_phi) = (libm::sinf(arc.rotation), libm::cosf(arc.rotation));
    let sign = if arc.sweep_angle < 0.0 { -1.0 } else { 1.0 };
    let dx = -arc.rx * libm::sinf(t) * sign;
    let dy = arc.ry * libm::cosf(t) * sign;
    let tangent = Point::new(cos_phi * dx - sin_phi * dy, sin_phi * dx + cos_phi * dy);
    direction(Point::default(), tangent)
}

// One vertex per segment end point. Tangent directions follow control points
// on curves and the ellipse derivative on arcs, so they differ from the
// vertex-to-vertex chords when the host may have curves.
fn host_vertices(path: &Path) -> Vec<Vertex> {
    let mut out: Vec<Vertex> = Vec::new();
    let mut current = Point::default();
    let mut start = Point::default();
    let push = |out: &mut Vec<Vertex>, leave: Option<f32>, arrive: Option<f32>, p: Point| {
        if let Some(last) = out.last_mut() {
            last.outgoing = last.outgoing.or(leave);
        }
        out.push(Vertex {
            point: p,
            incoming: arrive,
            outgoing: None,
        });
    };
    for seg in &path.segs {
        match *seg {
            PathSeg::MoveTo(p) => {
                out.push(Vertex {
                    point: p,
                    incoming: None,
                    outgoing: None,
                });
                current = p;
                start = p;
            }
            PathSeg::LineTo(p) => {
                let dir = direction(current, p);
                push(&mut out, dir, dir, p);
                current = p;
            }
            PathSeg::CubicTo(c1, c2, p) => {
                let leave = direction(current, c1)
                    .or_else(|| direction(current, c2))
                    .or_else(|| direction(current, p));
                let arrive = direction(c2, p)
                    .or_else(|| direction(c1, p))
                    .or_else(|| direction(current, p));
                push(&mut out, leave, arrive, p);
                current = p;
            }
            PathSeg::Arc(ref arc) => {
                let end = arc.end_point();
                let leave = arc_direction(arc, arc.start_angle);
                let arrive = arc_direction(arc, arc.start_angle + arc.sweep_angle);
                push(&mut out, leave, arrive, end);
                current = end;
            }
            PathSeg::Close => {
                let dir = direction(current, start);
                push(&mut out, dir, dir, start);
                current = start;
            }
        }
    }
    out
}

fn bisect(incoming: Option<f32>, outgoing: Option<f32>) -> f32 {
    match (incoming, outgoing) {
        (Some(a), Some(b)) => normalize_angle_deg(a + normalize_angle_deg(b - a) / 2.0),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => 0.0,
    }
}

// Marker viewBox fitted into markerWidth x markerHeight, then shifted so the
// reference point lands on the origin. The rect is the clip viewport in the
// shifted, unit-scaled space.
fn content_transform(marker: &Element<'_>, stroke_width: f32) -> (Matrix, Rect) {
    let width = marker.length("markerWidth", Axis::X, 3.0);
    let height = marker.length("markerHeight", Axis::Y, 3.0);
    let fit = match marker.view_box() {
        Some(vb) => view_box_transform(
            vb,
            AspectRatio::parse(marker.attr("preserveAspectRatio")),
            Rect::new(0.0, 0.0, width, height),
        ),
        None => Matrix::identity(),
    };
    let (rx, ry) = fit.apply(
        marker.length("refX", Axis::X, 0.0),
        marker.length("refY", Axis::Y, 0.0),
    );
    let units = marker_scale(marker, stroke_width);
    (
        Matrix::scale(units, units)
            .mul(Matrix::translate(-rx, -ry))
            .mul(fit),
        Rect::new(-rx, -ry, width, height),
    )
}

fn marker_scale(marker: &Element<'_>, stroke_width: f32) -> f32 {
    match marker.attr("markerUnits").map(str::trim) {
        Some("userSpaceOnUse") => 1.0,
        _ => stroke_width,
    }
}

/// Marker instances for one position along the host path.
pub fn marker_instances(
    host: &Element<'_>,
    marker: &Element<'_>,
    path: &Path,
    position: MarkerPosition,
) -> Vec<MarkerInstance> {
    let vertices = host_vertices(path);
    let n = vertices.len();
    if n == 0 {
        return Vec::new();
    }
    let orient = Orient::parse(marker.attr("orient"));
    let stroke_width = host
        .property_length("stroke-width", Axis::Other)
        .unwrap_or(1.0);
    let (content, _) = content_transform(marker, stroke_width);

    let chord = |a: usize, b: usize| -> f32 {
        match (vertices.get(a), vertices.get(b)) {
            (Some(p), Some(q)) => direction(p.point, q.point).unwrap_or(0.0),
            _ => 0.0,
        }
    };
    let selected: Vec<(usize, f32)> = match position {
        MarkerPosition::Start => {
            let angle = if n > 1 {
                chord(0, 1)
            } else {
                vertices[0].outgoing.unwrap_or(0.0)
            };
            vec![(0, angle)]
        }
        MarkerPosition::End => {
            let angle = if n > 1 {
                chord(n - 2, n - 1)
            } else {
                vertices[0].incoming.unwrap_or(0.0)
            };
            vec![(n - 1, angle)]
        }
        MarkerPosition::Mid => (1..n.saturating_sub(1))
            .map(|i| (i, bisect(vertices[i].incoming, vertices[i].outgoing)))
            .collect(),
    };

    selected
        .into_iter()
        .map(|(i, tangent)| {
            let angle = match orient {
                Orient::Angle(a) => a,
                Orient::Auto => tangent,
                Orient::AutoStartReverse if position == MarkerPosition::Start => {
                    normalize_angle_deg(tangent + 180.0)
                }
                Orient::AutoStartReverse => tangent,
            };
            let point = vertices[i].point;
            MarkerInstance {
                position: point,
                angle,
                transform: Matrix::translate(point.x, point.y)
                    .mul(Matrix::rotate(angle))
                    .mul(content),
            }
        })
        .collect()
}

// The `marker` shorthand is ignored when any longhand is given as a
// presentation attribute on the host or an enclosing g/use.
fn shorthand_applies(host: &Element<'_>) -> bool {
    let longhands = ["marker-start", "marker-mid", "marker-end"];
    let mut cur = Some(host.clone());
    let mut first = true;
    while let Some(el) = cur {
        if !first && !matches!(el.tag(), "g" | "use") {
            break;
        }
        if longhands.iter().any(|name| el.has_presentation_attr(name)) {
            return false;
        }
        first = false;
        cur = el.parent();
    }
    true
}

pub(crate) fn marker_reference<'a>(
    host: &Element<'a>,
    position: MarkerPosition,
) -> Option<Element<'a>> {
    let value = match host.property(position.property()) {
        Some(v) => v,
        None if shorthand_applies(host) => host.property("marker")?,
        None => return None,
    };
    if value == "none" {
        return None;
    }
    let marker = host.reference(value);
    match marker {
        Some(m) if m.tag() == "marker" => Some(m),
        _ => {
            tracing::warn!(value, "unresolved marker reference");
            None
        }
    }
}

fn clips_to_viewport(marker: &Element<'_>) -> bool {
    !matches!(
        marker.property("overflow").map(str::trim),
        Some("visible") | Some("auto")
    )
}

/// Stamps start, mid and end markers of `host` onto `canvas`.
pub(crate) fn render_markers(
    walker: &Walker<'_>,
    state: &RenderState,
    host: &Element<'_>,
    path: &Path,
    canvas: &mut Canvas,
) -> Result<(), RenderError> {
    for position in [MarkerPosition::Start, MarkerPosition::Mid, MarkerPosition::End] {
        let Some(marker) = marker_reference(host, position) else {
            continue;
        };
        if state.is_active(marker.node_id()) {
            walker.note("render.skip", "recursive marker");
            continue;
        }
        let stroke_width = host
            .property_length("stroke-width", Axis::Other)
            .unwrap_or(1.0);
        let (_, viewport) = content_transform(&marker, stroke_width);
        let children = marker.children();
        for instance in marker_instances(host, &marker, path, position) {
            let base = state.concat(
                Matrix::translate(instance.position.x, instance.position.y)
                    .mul(Matrix::rotate(instance.angle)),
            );
            let base = if clips_to_viewport(&marker) {
                let units = marker_scale(&marker, stroke_width);
                let clip_state = base.concat(Matrix::scale(units, units));
                base.with_clip(ClipLayer::rect(viewport, clip_state.transform))
            } else {
                base
            };
            let inner = base
                .with_transform(state.transform.mul(instance.transform))
                .enter(marker.node_id());
            for child in &children {
                walker.render_node(child, &inner, canvas)?;
            }
        }
    }
    Ok(())
}
