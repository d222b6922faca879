use crate::dom::{Axis, Element};
use crate::path::{ArcSegment, FillRule, Path};
use crate::types::Point;
use crate::values::parse_points;
use std::f32::consts::{FRAC_PI_2, PI};

/// Builds the geometry of a shape element, or `None` when the shape is degenerate.
pub fn build_path(el: &Element<'_>) -> Option<Path> {
    let mut path = match el.tag() {
        "rect" => rect_path(el)?,
        "circle" => {
            let r = el.length("r", Axis::Other, 0.0);
            if r <= 0.0 {
                return None;
            }
            Path::ellipse(
                el.length("cx", Axis::X, 0.0),
                el.length("cy", Axis::Y, 0.0),
                r,
                r,
            )
        }
        "ellipse" => {
            let rx = el.length("rx", Axis::X, 0.0);
            let ry = el.length("ry", Axis::Y, 0.0);
            if rx <= 0.0 || ry <= 0.0 {
                return None;
            }
            Path::ellipse(
                el.length("cx", Axis::X, 0.0),
                el.length("cy", Axis::Y, 0.0),
                rx,
                ry,
            )
        }
        "line" => {
            let mut p = Path::new();
            p.move_to(el.length("x1", Axis::X, 0.0), el.length("y1", Axis::Y, 0.0));
            p.line_to(el.length("x2", Axis::X, 0.0), el.length("y2", Axis::Y, 0.0));
            p
        }
        "polyline" => poly_path(el, false)?,
        "polygon" => poly_path(el, true)?,
        "path" => {
            let p = parse_path_data(el.attr("d")?);
            if p.segs.is_empty() {
                return None;
            }
            p
        }
        _ => return None,
    };
    path.fill_rule = FillRule::parse(el.property("fill-rule"));
    Some(path)
}

fn rect_path(el: &Element<'_>) -> Option<Path> {
    let x = el.length("x", Axis::X, 0.0);
    let y = el.length("y", Axis::Y, 0.0);
    let w = el.length("width", Axis::X, 0.0);
    let h = el.length("height", Axis::Y, 0.0);
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let (rx, ry) = corner_radii(
        el.length("rx", Axis::X, 0.0),
        el.length("ry", Axis::Y, 0.0),
        w,
        h,
    );
    Some(rounded_rect(x, y, w, h, rx, ry))
}

// A radius given on one axis only is mirrored to the other; both clamp to half the side.
pub(crate) fn corner_radii(rx: f32, ry: f32, w: f32, h: f32) -> (f32, f32) {
    let (rx, ry) = match (rx > 0.0, ry > 0.0) {
        (true, false) => (rx, rx),
        (false, true) => (ry, ry),
        (true, true) => (rx, ry),
        (false, false) => (0.0, 0.0),
    };
    (rx.min(w / 2.0), ry.min(h / 2.0))
}

// Clockwise from the top-left corner: four edges and, when rounded, four 90deg arcs.
pub(crate) fn rounded_rect(x: f32, y: f32, w: f32, h: f32, rx: f32, ry: f32) -> Path {
    let mut p = Path::new();
    if rx <= 0.0 || ry <= 0.0 {
        p.move_to(x, y);
        p.line_to(x + w, y);
        p.line_to(x + w, y + h);
        p.line_to(x, y + h);
        p.close();
        return p;
    }
    let corner = |cx: f32, cy: f32, start: f32| ArcSegment {
        center: Point::new(cx, cy),
        rx,
        ry,
        rotation: 0.0,
        start_angle: start,
        sweep_angle: FRAC_PI_2,
    };
    p.move_to(x + rx, y);
    p.line_to(x + w - rx, y);
    p.arc(corner(x + w - rx, y + ry, -FRAC_PI_2));
    p.line_to(x + w, y + h - ry);
    p.arc(corner(x + w - rx, y + h - ry, 0.0));
    p.line_to(x + rx, y + h);
    p.arc(corner(x + rx, y + h - ry, FRAC_PI_2));
    p.line_to(x, y + ry);
    p.arc(corner(x + rx, y + ry, PI));
    p.close();
    p
}

fn poly_path(el: &Element<'_>, close: bool) -> Option<Path> {
    let points = parse_points(el.attr("points")?);
    let (first, rest) = points.split_first()?;
    let mut p = Path::new();
    p.move_to(first.x, first.y);
    for pt in rest {
        p.line_to(pt.x, pt.y);
    }
    if close {
        p.close();
    }
    Some(p)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ArcOutcome {
    Skip,
    Line(Point),
    Arc(ArcSegment),
}

// SVG endpoint arc -> center parameterization (SVG 1.1 implementation notes F.6.5).
#[allow(clippy::too_many_arguments)]
pub(crate) fn endpoint_to_center(
    from: Point,
    rx_in: f32,
    ry_in: f32,
    x_axis_rotation_deg: f32,
    large_arc: bool,
    sweep: bool,
    to: Point,
) -> ArcOutcome {
    if from == to {
        return ArcOutcome::Skip;
    }
    let mut rx = rx_in.abs();
    let mut ry = ry_in.abs();
    if rx == 0.0 || ry == 0.0 {
        return ArcOutcome::Line(to);
    }

    let phi = x_axis_rotation_deg.to_radians();
    let sin_phi = libm::sinf(phi);
    let cos_phi = libm::cosf(phi);

    let dx2 = (from.x - to.x) / 2.0;
    let dy2 = (from.y - to.y) / 2.0;
    let x1p = cos_phi * dx2 + sin_phi * dy2;
    let y1p = -sin_phi * dx2 + cos_phi * dy2;

    // Scale radii up when they cannot span the endpoints.
    let x1p2 = x1p * x1p;
    let y1p2 = y1p * y1p;
    let lambda = x1p2 / (rx * rx) + y1p2 / (ry * ry);
    if lambda > 1.0 {
        let s = libm::sqrtf(lambda);
        rx *= s;
        ry *= s;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let num = rx2 * ry2 - rx2 * y1p2 - ry2 * x1p2;
    let den = rx2 * y1p2 + ry2 * x1p2;
    let mut coef = 0.0;
    if den != 0.0 {
        let sign = if large_arc == sweep { -1.0 } else { 1.0 };
        coef = sign * libm::sqrtf((num / den).max(0.0));
    }
    let cxp = coef * (rx * y1p / ry);
    let cyp = coef * (-ry * x1p / rx);

    let cx = cos_phi * cxp - sin_phi * cyp + (from.x + to.x) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (from.y + to.y) / 2.0;

    fn angle(ux: f32, uy: f32, vx: f32, vy: f32) -> f32 {
        let dot = ux * vx + uy * vy;
        let det = ux * vy - uy * vx;
        libm::atan2f(det, dot)
    }

    let ux = (x1p - cxp) / rx;
    let uy = (y1p - cyp) / ry;
    let vx = (-x1p - cxp) / rx;
    let vy = (-y1p - cyp) / ry;

    let theta1 = angle(1.0, 0.0, ux, uy);
    let mut dtheta = angle(ux, uy, vx, vy);
    if !sweep && dtheta > 0.0 {
        dtheta -= 2.0 * PI;
    } else if sweep && dtheta < 0.0 {
        dtheta += 2.0 * PI;
    }

    ArcOutcome::Arc(ArcSegment {
        center: Point::new(cx, cy),
        rx,
        ry,
        rotation: phi,
        start_angle: theta1,
        sweep_angle: dtheta,
    })
}

fn quad_to_cubic(p0: Point, q: Point, p2: Point) -> (Point, Point) {
    (
        Point::new(p0.x + (2.0 / 3.0) * (q.x - p0.x), p0.y + (2.0 / 3.0) * (q.y - p0.y)),
        Point::new(p2.x + (2.0 / 3.0) * (q.x - p2.x), p2.y + (2.0 / 3.0) * (q.y - p2.y)),
    )
}

/// Parses SVG path data. Quadratics become cubics, arcs stay native. Parsing stops
/// at the first malformed token and keeps what was read so far.
pub fn parse_path_data(d: &str) -> Path {
    let mut path = Path::new();
    let mut p = PathParser::new(d);
    let mut cmd = ' ';
    let mut cur = Point::default();
    let mut start = Point::default();
    let mut last_cubic_ctrl2: Option<Point> = None;
    let mut last_quad_ctrl: Option<Point> = None;

    loop {
        let before = p.i;
        let Some(c) = p.next_command(&mut cmd) else {
            break;
        };
        let rel = c.is_ascii_lowercase();
        let abs = |x: f32, y: f32, cur: Point| {
            if rel {
                Point::new(cur.x + x, cur.y + y)
            } else {
                Point::new(x, y)
            }
        };
        match c.to_ascii_uppercase() {
            'M' => {
                if let Some((x, y)) = p.next_pair() {
                    let pt = abs(x, y, cur);
                    path.move_to(pt.x, pt.y);
                    cur = pt;
                    start = pt;
                    // Implicit subsequent pairs are treated as LineTo.
                    while let Some((x, y)) = p.next_pair() {
                        let pt = abs(x, y, cur);
                        path.line_to(pt.x, pt.y);
                        cur = pt;
                    }
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'L' => {
                while let Some((x, y)) = p.next_pair() {
                    let pt = abs(x, y, cur);
                    path.line_to(pt.x, pt.y);
                    cur = pt;
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'H' => {
                while let Some(x) = p.next_number() {
                    let x = if rel { cur.x + x } else { x };
                    path.line_to(x, cur.y);
                    cur.x = x;
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'V' => {
                while let Some(y) = p.next_number() {
                    let y = if rel { cur.y + y } else { y };
                    path.line_to(cur.x, y);
                    cur.y = y;
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'C' => {
                while let (Some((x1, y1)), Some((x2, y2)), Some((x, y))) =
                    (p.next_pair(), p.next_pair(), p.next_pair())
                {
                    let c1 = abs(x1, y1, cur);
                    let c2 = abs(x2, y2, cur);
                    let end = abs(x, y, cur);
                    path.cubic_to(c1, c2, end);
                    cur = end;
                    last_cubic_ctrl2 = Some(c2);
                }
                last_quad_ctrl = None;
            }
            'S' => {
                while let (Some((x2, y2)), Some((x, y))) = (p.next_pair(), p.next_pair()) {
                    let c2 = abs(x2, y2, cur);
                    let end = abs(x, y, cur);
                    let c1 = match last_cubic_ctrl2 {
                        Some(prev) => Point::new(2.0 * cur.x - prev.x, 2.0 * cur.y - prev.y),
                        None => cur,
                    };
                    path.cubic_to(c1, c2, end);
                    cur = end;
                    last_cubic_ctrl2 = Some(c2);
                }
                last_quad_ctrl = None;
            }
            'Q' => {
                while let (Some((x1, y1)), Some((x, y))) = (p.next_pair(), p.next_pair()) {
                    let q = abs(x1, y1, cur);
                    let end = abs(x, y, cur);
                    let (c1, c2) = quad_to_cubic(cur, q, end);
                    path.cubic_to(c1, c2, end);
                    cur = end;
                    last_quad_ctrl = Some(q);
                }
                last_cubic_ctrl2 = None;
            }
            'T' => {
                while let Some((x, y)) = p.next_pair() {
                    let end = abs(x, y, cur);
                    let q = match last_quad_ctrl {
                        Some(prev) => Point::new(2.0 * cur.x - prev.x, 2.0 * cur.y - prev.y),
                        None => cur,
                    };
                    let (c1, c2) = quad_to_cubic(cur, q, end);
                    path.cubic_to(c1, c2, end);
                    cur = end;
                    last_quad_ctrl = Some(q);
                }
                last_cubic_ctrl2 = None;
            }
            'A' => {
                while let (
                    Some(rx),
                    Some(ry),
                    Some(rot),
                    Some(large),
                    Some(sweep),
                    Some((x, y)),
                ) = (
                    p.next_number(),
                    p.next_number(),
                    p.next_number(),
                    p.next_arc_flag(),
                    p.next_arc_flag(),
                    p.next_pair(),
                ) {
                    let end = abs(x, y, cur);
                    match endpoint_to_center(cur, rx, ry, rot, large, sweep, end) {
                        ArcOutcome::Skip => {}
                        ArcOutcome::Line(to) => path.line_to(to.x, to.y),
                        ArcOutcome::Arc(arc) => path.arc(arc),
                    }
                    cur = end;
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'Z' => {
                path.close();
                cur = start;
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            _ => break,
        }
        if p.i == before {
            break;
        }
    }

    path
}

struct PathParser<'a> {
    bytes: &'a [u8],
    i: usize,
}

impl<'a> PathParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            i: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.i < self.bytes.len() {
            match self.bytes[self.i] {
                b' ' | b'\n' | b'\r' | b'\t' | b',' => self.i += 1,
                _ => break,
            }
        }
    }

    // A letter switches the command; a number repeats the previous one.
    fn next_command(&mut self, current: &mut char) -> Option<char> {
        self.skip_ws();
        let b = *self.bytes.get(self.i)?;
        if b.is_ascii_alphabetic() {
            *current = b as char;
            self.i += 1;
            return Some(*current);
        }
        if *current == ' ' || matches!(*current, 'Z' | 'z') {
            return None;
        }
        Some(*current)
    }

    fn next_number(&mut self) -> Option<f32> {
        self.skip_ws();
        let start = self.i;
        let mut has = false;

        if matches!(self.bytes.get(self.i), Some(b'+' | b'-')) {
            self.i += 1;
        }
        while self.bytes.get(self.i).is_some_and(u8::is_ascii_digit) {
            self.i += 1;
            has = true;
        }
        if self.bytes.get(self.i) == Some(&b'.') {
            self.i += 1;
            while self.bytes.get(self.i).is_some_and(u8::is_ascii_digit) {
                self.i += 1;
                has = true;
            }
        }
        if has && matches!(self.bytes.get(self.i), Some(b'e' | b'E')) {
            let mark = self.i;
            self.i += 1;
            if matches!(self.bytes.get(self.i), Some(b'+' | b'-')) {
                self.i += 1;
            }
            let exp_start = self.i;
            while self.bytes.get(self.i).is_some_and(u8::is_ascii_digit) {
                self.i += 1;
            }
            if self.i == exp_start {
                self.i = mark;
            }
        }

        if !has {
            self.i = start;
            return None;
        }

        let s = std::str::from_utf8(&self.bytes[start..self.i]).ok()?;
        s.parse::<f32>().ok()
    }

    fn next_arc_flag(&mut self) -> Option<bool> {
        self.skip_ws();
        match self.bytes.get(self.i)? {
            b'0' => {
                self.i += 1;
                Some(false)
            }
            b'1' => {
                self.i += 1;
                Some(true)
            }
            _ => None,
        }
    }

    fn next_pair(&mut self) -> Option<(f32, f32)> {
        let start = self.i;
        let x = self.next_number();
        let y = self.next_number();
        match (x, y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => {
                self.i = start;
                None
            }
        }
    }
}
