use crate::types::{Matrix, Point, Rect};
use std::f32::consts::{FRAC_PI_2, PI};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

impl FillRule {
    pub fn parse(value: Option<&str>) -> FillRule {
        match value.map(str::trim) {
            Some("evenodd") => FillRule::EvenOdd,
            _ => FillRule::NonZero,
        }
    }
}

/// Elliptical arc in center parameterization. Angles are in radians, measured in the
/// ellipse's own (unrotated) frame; a positive sweep runs clockwise on a y-down canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcSegment {
    pub center: Point,
    pub rx: f32,
    pub ry: f32,
    pub rotation: f32,
    pub start_angle: f32,
    pub sweep_angle: f32,
}

impl ArcSegment {
    pub fn point_at(&self, t: f32) -> Point {
        let (sin_phi, cos_phi) = (libm::sinf(self.rotation), libm::cosf(self.rotation));
        let x = self.rx * libm::cosf(t);
        let y = self.ry * libm::sinf(t);
        Point::new(
            self.center.x + cos_phi * x - sin_phi * y,
            self.center.y + sin_phi * x + cos_phi * y,
        )
    }

    pub fn start_point(&self) -> Point {
        self.point_at(self.start_angle)
    }

    pub fn end_point(&self) -> Point {
        self.point_at(self.start_angle + self.sweep_angle)
    }

    // Split into <= 90deg pieces, each approximated by one cubic.
    pub fn to_cubics(&self) -> Vec<[Point; 3]> {
        let count = libm::ceilf(self.sweep_angle.abs() / FRAC_PI_2).max(1.0) as usize;
        let delta = self.sweep_angle / count as f32;
        let (sin_phi, cos_phi) = (libm::sinf(self.rotation), libm::cosf(self.rotation));
        let map = |x: f32, y: f32| {
            let x = self.rx * x;
            let y = self.ry * y;
            Point::new(
                self.center.x + cos_phi * x - sin_phi * y,
                self.center.y + sin_phi * x + cos_phi * y,
            )
        };

        let mut out = Vec::with_capacity(count);
        let mut t1 = self.start_angle;
        for _ in 0..count {
            let t2 = t1 + delta;
            let k = (4.0 / 3.0) * libm::tanf((t2 - t1) / 4.0);
            let (s1, c1) = (libm::sinf(t1), libm::cosf(t1));
            let (s2, c2) = (libm::sinf(t2), libm::cosf(t2));
            out.push([
                map(c1 - k * s1, s1 + k * c1),
                map(c2 + k * s2, s2 - k * c2),
                map(c2, s2),
            ]);
            t1 = t2;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSeg {
    MoveTo(Point),
    LineTo(Point),
    CubicTo(Point, Point, Point),
    Arc(ArcSegment),
    Close,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    pub segs: Vec<PathSeg>,
    pub fill_rule: FillRule,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self
            .segs
            .iter()
            .any(|s| !matches!(s, PathSeg::MoveTo(_) | PathSeg::Close))
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.segs.push(PathSeg::MoveTo(Point::new(x, y)));
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        self.segs.push(PathSeg::LineTo(Point::new(x, y)));
    }

    pub fn cubic_to(&mut self, c1: Point, c2: Point, end: Point) {
        self.segs.push(PathSeg::CubicTo(c1, c2, end));
    }

    pub fn arc(&mut self, arc: ArcSegment) {
        self.segs.push(PathSeg::Arc(arc));
    }

    pub fn close(&mut self) {
        self.segs.push(PathSeg::Close);
    }

    pub fn extend(&mut self, other: &Path) {
        self.segs.extend_from_slice(&other.segs);
    }

    pub fn may_have_curves(&self) -> bool {
        self.segs
            .iter()
            .any(|s| matches!(s, PathSeg::CubicTo(..) | PathSeg::Arc(_)))
    }

    pub fn rect(rect: Rect) -> Path {
        let mut p = Path::new();
        p.move_to(rect.x, rect.y);
        p.line_to(rect.right(), rect.y);
        p.line_to(rect.right(), rect.bottom());
        p.line_to(rect.x, rect.bottom());
        p.close();
        p
    }

    pub fn ellipse(cx: f32, cy: f32, rx: f32, ry: f32) -> Path {
        let k = 0.5522847498f32;
        let ox = rx * k;
        let oy = ry * k;
        let mut p = Path::new();
        p.move_to(cx + rx, cy);
        p.cubic_to(
            Point::new(cx + rx, cy + oy),
            Point::new(cx + ox, cy + ry),
            Point::new(cx, cy + ry),
        );
        p.cubic_to(
            Point::new(cx - ox, cy + ry),
            Point::new(cx - rx, cy + oy),
            Point::new(cx - rx, cy),
        );
        p.cubic_to(
            Point::new(cx - rx, cy - oy),
            Point::new(cx - ox, cy - ry),
            Point::new(cx, cy - ry),
        );
        p.cubic_to(
            Point::new(cx + ox, cy - ry),
            Point::new(cx + rx, cy - oy),
            Point::new(cx + rx, cy),
        );
        p.close();
        p
    }

    /// Copy with every arc replaced by cubic approximations.
    pub fn flattened_arcs(&self) -> Path {
        let mut out = Vec::with_capacity(self.segs.len());
        for seg in &self.segs {
            match seg {
                PathSeg::Arc(arc) => {
                    for [c1, c2, end] in arc.to_cubics() {
                        out.push(PathSeg::CubicTo(c1, c2, end));
                    }
                }
                other => out.push(*other),
            }
        }
        Path {
            segs: out,
            fill_rule: self.fill_rule,
        }
    }

    pub fn transform(&self, m: Matrix) -> Path {
        if m.is_identity() {
            return self.clone();
        }
        let segs = self
            .flattened_arcs()
            .segs
            .into_iter()
            .map(|seg| match seg {
                PathSeg::MoveTo(p) => PathSeg::MoveTo(m.apply_point(p)),
                PathSeg::LineTo(p) => PathSeg::LineTo(m.apply_point(p)),
                PathSeg::CubicTo(c1, c2, p) => {
                    PathSeg::CubicTo(m.apply_point(c1), m.apply_point(c2), m.apply_point(p))
                }
                other => other,
            })
            .collect();
        Path {
            segs,
            fill_rule: self.fill_rule,
        }
    }

    // Tight bounds: cubic extrema are solved rather than taken from control points.
    pub fn bounds(&self) -> Option<Rect> {
        let mut acc = BoundsAcc::default();
        let mut cur = Point::default();
        let mut start = Point::default();
        for seg in &self.flattened_arcs().segs {
            match *seg {
                PathSeg::MoveTo(p) => {
                    acc.add(p);
                    cur = p;
                    start = p;
                }
                PathSeg::LineTo(p) => {
                    acc.add(cur);
                    acc.add(p);
                    cur = p;
                }
                PathSeg::CubicTo(c1, c2, p) => {
                    acc.add(cur);
                    acc.add(p);
                    for t in cubic_extrema(cur.x, c1.x, c2.x, p.x)
                        .into_iter()
                        .chain(cubic_extrema(cur.y, c1.y, c2.y, p.y))
                        .flatten()
                    {
                        acc.add(cubic_point(cur, c1, c2, p, t));
                    }
                    cur = p;
                }
                PathSeg::Arc(_) => {}
                PathSeg::Close => cur = start,
            }
        }
        acc.finish()
    }

    /// Marker vertex positions: the end point of every segment, with `Close`
    /// contributing the subpath start.
    pub fn vertices(&self) -> Vec<Point> {
        let mut out = Vec::new();
        let mut start = Point::default();
        for seg in &self.segs {
            match seg {
                PathSeg::MoveTo(p) => {
                    start = *p;
                    out.push(*p);
                }
                PathSeg::LineTo(p) | PathSeg::CubicTo(_, _, p) => out.push(*p),
                PathSeg::Arc(arc) => out.push(arc.end_point()),
                PathSeg::Close => out.push(start),
            }
        }
        out
    }
}

#[derive(Default)]
struct BoundsAcc {
    rect: Option<(f32, f32, f32, f32)>,
}

impl BoundsAcc {
    fn add(&mut self, p: Point) {
        if !p.x.is_finite() || !p.y.is_finite() {
            return;
        }
        self.rect = Some(match self.rect {
            None => (p.x, p.y, p.x, p.y),
            Some((l, t, r, b)) => (l.min(p.x), t.min(p.y), r.max(p.x), b.max(p.y)),
        });
    }

    fn finish(self) -> Option<Rect> {
        self.rect.map(|(l, t, r, b)| Rect::from_ltrb(l, t, r, b))
    }
}

fn cubic_point(p0: Point, p1: Point, p2: Point, p3: Point, t: f32) -> Point {
    let mt = 1.0 - t;
    let a = mt * mt * mt;
    let b = 3.0 * mt * mt * t;
    let c = 3.0 * mt * t * t;
    let d = t * t * t;
    Point::new(
        a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    )
}

// Roots in (0, 1) of the derivative of a 1-D cubic Bezier.
fn cubic_extrema(p0: f32, p1: f32, p2: f32, p3: f32) -> [Option<f32>; 2] {
    let a = -p0 + 3.0 * p1 - 3.0 * p2 + p3;
    let b = 2.0 * (p0 - 2.0 * p1 + p2);
    let c = p1 - p0;
    let inside = |t: f32| (t > 0.0 && t < 1.0).then_some(t);
    if a.abs() < 1e-6 {
        if b.abs() < 1e-6 {
            return [None, None];
        }
        return [inside(-c / b), None];
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return [None, None];
    }
    let sq = libm::sqrtf(disc);
    [inside((-b + sq) / (2.0 * a)), inside((-b - sq) / (2.0 * a))]
}

pub(crate) fn normalize_angle_deg(mut deg: f32) -> f32 {
    while deg > 180.0 {
        deg -= 360.0;
    }
    while deg <= -180.0 {
        deg += 360.0;
    }
    deg
}

pub(crate) fn angle_between(from: Point, to: Point) -> f32 {
    libm::atan2f(to.y - from.y, to.x - from.x) * 180.0 / PI
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn ellipse_bounds_are_tight() {
        let b = Path::ellipse(50.0, 40.0, 20.0, 10.0).bounds().expect("bounds");
        assert!(close(b.x, 30.0) && close(b.y, 30.0));
        assert!(close(b.width, 40.0) && close(b.height, 20.0));
    }

    #[test]
    fn arc_cubics_end_where_the_arc_ends() {
        let arc = ArcSegment {
            center: Point::new(0.0, 0.0),
            rx: 10.0,
            ry: 10.0,
            rotation: 0.0,
            start_angle: 0.0,
            sweep_angle: PI,
        };
        let cubics = arc.to_cubics();
        assert_eq!(cubics.len(), 2);
        let end = cubics[1][2];
        assert!(close(end.x, -10.0) && close(end.y, 0.0));
        let mid = arc.point_at(FRAC_PI_2);
        assert!(close(mid.x, 0.0) && close(mid.y, 10.0));
    }

    #[test]
    fn vertices_include_close_point() {
        let mut p = Path::new();
        p.move_to(0.0, 0.0);
        p.line_to(10.0, 0.0);
        p.line_to(10.0, 10.0);
        p.close();
        let v = p.vertices();
        assert_eq!(v.len(), 4);
        assert_eq!(v[3], Point::new(0.0, 0.0));
        assert!(!p.may_have_curves());
    }

    #[test]
    fn transform_flattens_arcs_and_maps_points() {
        let mut p = Path::new();
        p.move_to(10.0, 0.0);
        p.arc(ArcSegment {
            center: Point::new(0.0, 0.0),
            rx: 10.0,
            ry: 10.0,
            rotation: 0.0,
            start_angle: 0.0,
            sweep_angle: FRAC_PI_2,
        });
        let t = p.transform(Matrix::translate(5.0, 5.0));
        assert!(matches!(t.segs[1], PathSeg::CubicTo(..)));
        let b = t.bounds().expect("bounds");
        assert!(close(b.x, 5.0) && close(b.bottom(), 15.0) && close(b.right(), 15.0));
    }

    #[test]
    fn angle_normalization_wraps_into_half_open_range() {
        assert!(close(normalize_angle_deg(270.0), -90.0));
        assert!(close(normalize_angle_deg(-180.0), 180.0));
        assert!(close(angle_between(Point::new(0.0, 0.0), Point::new(0.0, 5.0)), 90.0));
    }
}
