#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        libm::hypotf(other.x - self.x, other.y - self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_ltrb(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn inflate(&self, margin: f32) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + margin * 2.0,
            self.height + margin * 2.0,
        )
    }

    // Axis-aligned bounds of the rect's four corners after `m`.
    pub fn transform(&self, m: Matrix) -> Rect {
        let corners = [
            m.apply(self.x, self.y),
            m.apply(self.right(), self.y),
            m.apply(self.right(), self.bottom()),
            m.apply(self.x, self.bottom()),
        ];
        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Rect::from_ltrb(min_x, min_y, max_x, max_y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_unit(r: f32, g: f32, b: f32) -> Self {
        Self {
            r: unit_to_u8(r),
            g: unit_to_u8(g),
            b: unit_to_u8(b),
        }
    }

    // Rec.601 luma, used when a mask layer samples this color.
    pub fn luminance(&self) -> f32 {
        (0.299 * self.r as f32 + 0.587 * self.g as f32 + 0.114 * self.b as f32) / 255.0
    }
}

pub(crate) fn unit_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Coordinate system for gradient, pattern, clip and mask geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    UserSpaceOnUse,
    ObjectBoundingBox,
}

impl Units {
    pub fn parse(value: Option<&str>, default: Units) -> Units {
        match value.map(str::trim) {
            Some("userSpaceOnUse") => Units::UserSpaceOnUse,
            Some("objectBoundingBox") => Units::ObjectBoundingBox,
            _ => default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadMethod {
    Pad,
    Reflect,
    Repeat,
}

impl SpreadMethod {
    pub fn parse(value: Option<&str>) -> SpreadMethod {
        match value.map(str::trim) {
            Some("reflect") => SpreadMethod::Reflect,
            Some("repeat") => SpreadMethod::Repeat,
            _ => SpreadMethod::Pad,
        }
    }
}

/// Affine transform in SVG `matrix(a b c d e f)` layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::identity()
    }
}

impl Matrix {
    pub const fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub const fn translate(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn rotate(deg: f32) -> Self {
        let rad = deg.to_radians();
        let s = libm::sinf(rad);
        let c = libm::cosf(rad);
        Self::new(c, s, -s, c, 0.0, 0.0)
    }

    pub fn rotate_around(deg: f32, cx: f32, cy: f32) -> Self {
        Matrix::translate(cx, cy)
            .mul(Matrix::rotate(deg))
            .mul(Matrix::translate(-cx, -cy))
    }

    pub fn skew_x(deg: f32) -> Self {
        Self::new(1.0, 0.0, libm::tanf(deg.to_radians()), 1.0, 0.0, 0.0)
    }

    pub fn skew_y(deg: f32) -> Self {
        Self::new(1.0, libm::tanf(deg.to_radians()), 0.0, 1.0, 0.0, 0.0)
    }

    pub fn mul(self, other: Self) -> Self {
        // [self] * [other]
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn apply(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn apply_point(self, p: Point) -> Point {
        let (x, y) = self.apply(p.x, p.y);
        Point::new(x, y)
    }

    pub fn determinant(self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    pub fn invert(self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Self {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }

    pub fn is_identity(self) -> bool {
        self == Matrix::identity()
    }

    // Approx: area scale -> sqrt(|det|).
    pub fn scale_factor(self) -> f32 {
        libm::sqrtf(self.determinant().abs()).max(0.0)
    }

    pub fn to_skia(self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_row(self.a, self.b, self.c, self.d, self.e, self.f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn mul_applies_right_operand_first() {
        let m = Matrix::translate(10.0, 0.0).mul(Matrix::scale(2.0, 2.0));
        let (x, y) = m.apply(1.0, 1.0);
        assert!(close(x, 12.0) && close(y, 2.0));
    }

    #[test]
    fn invert_round_trips_points() {
        let m = Matrix::rotate_around(30.0, 5.0, 5.0).mul(Matrix::scale(2.0, 3.0));
        let inv = m.invert().expect("invertible");
        let (x, y) = m.apply(7.0, -2.0);
        let (x, y) = inv.apply(x, y);
        assert!(close(x, 7.0) && close(y, -2.0));
        assert!(Matrix::scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn rect_transform_returns_axis_aligned_bounds() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0).transform(Matrix::rotate(90.0));
        assert!(close(r.x, -10.0) && close(r.y, 0.0));
        assert!(close(r.width, 10.0) && close(r.height, 10.0));
    }

    #[test]
    fn units_and_spread_fall_back_to_defaults() {
        assert_eq!(
            Units::parse(Some("bogus"), Units::ObjectBoundingBox),
            Units::ObjectBoundingBox
        );
        assert_eq!(
            Units::parse(Some("userSpaceOnUse"), Units::ObjectBoundingBox),
            Units::UserSpaceOnUse
        );
        assert_eq!(SpreadMethod::parse(Some("reflect")), SpreadMethod::Reflect);
        assert_eq!(SpreadMethod::parse(None), SpreadMethod::Pad);
    }
}
