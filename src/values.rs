use crate::types::{Color, Matrix, Point, Rect};
use lightningcss::traits::Parse;
use lightningcss::values::color::{CssColor, SRGB};

pub(crate) const DPI: f32 = 96.0;

pub(crate) fn parse_number(input: &str) -> Option<f32> {
    let v = input.trim().parse::<f32>().ok()?;
    v.is_finite().then_some(v)
}

pub(crate) fn parse_number_list(input: &str) -> Vec<f32> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(parse_number)
        .collect()
}

pub(crate) fn parse_points(input: &str) -> Vec<Point> {
    let nums = parse_number_list(input);
    let mut out = Vec::with_capacity(nums.len() / 2);
    let mut it = nums.into_iter();
    // A trailing odd coordinate is dropped.
    while let (Some(x), Some(y)) = (it.next(), it.next()) {
        out.push(Point::new(x, y));
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    None,
    Px,
    Pt,
    Pc,
    Mm,
    Cm,
    In,
    Em,
    Ex,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    pub value: f32,
    pub unit: LengthUnit,
}

impl Length {
    pub const ZERO: Length = Length {
        value: 0.0,
        unit: LengthUnit::None,
    };

    pub const fn user(value: f32) -> Self {
        Self {
            value,
            unit: LengthUnit::None,
        }
    }

    pub const fn percent(value: f32) -> Self {
        Self {
            value,
            unit: LengthUnit::Percent,
        }
    }

    pub fn parse(input: &str) -> Option<Length> {
        let s = input.trim();
        let split = s
            .char_indices()
            .rfind(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(idx, c)| idx + c.len_utf8())?;
        let (num, suffix) = s.split_at(split);
        let unit = match suffix.trim().to_ascii_lowercase().as_str() {
            "" => LengthUnit::None,
            "px" => LengthUnit::Px,
            "pt" => LengthUnit::Pt,
            "pc" => LengthUnit::Pc,
            "mm" => LengthUnit::Mm,
            "cm" => LengthUnit::Cm,
            "in" => LengthUnit::In,
            "em" => LengthUnit::Em,
            "ex" => LengthUnit::Ex,
            "%" => LengthUnit::Percent,
            _ => return None,
        };
        Some(Length {
            value: parse_number(num)?,
            unit,
        })
    }

    pub fn is_percent(&self) -> bool {
        self.unit == LengthUnit::Percent
    }

    // `percent_base` is the viewport dimension percentages refer to.
    pub fn to_user(&self, font_size: f32, percent_base: f32) -> f32 {
        let v = self.value;
        match self.unit {
            LengthUnit::None | LengthUnit::Px => v,
            LengthUnit::Pt => v * DPI / 72.0,
            LengthUnit::Pc => v * DPI / 6.0,
            LengthUnit::Mm => v * DPI / 25.4,
            LengthUnit::Cm => v * DPI / 2.54,
            LengthUnit::In => v * DPI,
            LengthUnit::Em => v * font_size,
            LengthUnit::Ex => v * font_size / 2.0,
            LengthUnit::Percent => v * percent_base / 100.0,
        }
    }
}

pub(crate) fn parse_length_list(input: &str) -> Vec<Length> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(Length::parse)
        .collect()
}

pub(crate) fn parse_transform(input: &str) -> Matrix {
    let mut out = Matrix::identity();
    let mut s = input.trim();

    while !s.is_empty() {
        let Some(open) = s.find('(') else { break };
        let name = s[..open].trim().trim_start_matches(',').trim();
        let Some(close) = s[open + 1..].find(')') else {
            break;
        };
        let args = parse_number_list(&s[open + 1..open + 1 + close]);

        let m = match name {
            "translate" => {
                let tx = args.first().copied().unwrap_or(0.0);
                let ty = args.get(1).copied().unwrap_or(0.0);
                Matrix::translate(tx, ty)
            }
            "scale" => {
                let sx = args.first().copied().unwrap_or(1.0);
                let sy = args.get(1).copied().unwrap_or(sx);
                Matrix::scale(sx, sy)
            }
            "rotate" => {
                let a = args.first().copied().unwrap_or(0.0);
                if args.len() >= 3 {
                    Matrix::rotate_around(a, args[1], args[2])
                } else {
                    Matrix::rotate(a)
                }
            }
            "skewX" => Matrix::skew_x(args.first().copied().unwrap_or(0.0)),
            "skewY" => Matrix::skew_y(args.first().copied().unwrap_or(0.0)),
            "matrix" if args.len() >= 6 => {
                Matrix::new(args[0], args[1], args[2], args[3], args[4], args[5])
            }
            _ => Matrix::identity(),
        };

        out = out.mul(m);
        s = s[open + 1 + close + 1..].trim_start();
    }

    out
}

pub(crate) fn parse_viewbox(input: Option<&str>) -> Option<Rect> {
    let nums = parse_number_list(input?);
    if nums.len() != 4 || nums[2] <= 0.0 || nums[3] <= 0.0 {
        return None;
    }
    Some(Rect::new(nums[0], nums[1], nums[2], nums[3]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    None,
    Min,
    Mid,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub x: Align,
    pub y: Align,
    pub slice: bool,
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self {
            x: Align::Mid,
            y: Align::Mid,
            slice: false,
        }
    }
}

impl AspectRatio {
    pub fn parse(input: Option<&str>) -> AspectRatio {
        let Some(input) = input else {
            return AspectRatio::default();
        };
        let mut parts = input.split_whitespace();
        let mut align = parts.next().unwrap_or("xMidYMid");
        if align == "defer" {
            align = parts.next().unwrap_or("xMidYMid");
        }
        let slice = parts.next() == Some("slice");
        if align == "none" {
            return AspectRatio {
                x: Align::None,
                y: Align::None,
                slice,
            };
        }
        let axis = |token: &str| match token {
            "Min" => Some(Align::Min),
            "Mid" => Some(Align::Mid),
            "Max" => Some(Align::Max),
            _ => None,
        };
        let parsed = align
            .strip_prefix('x')
            .and_then(|rest| rest.get(..3).zip(rest.get(3..)))
            .and_then(|(xa, tail)| Some((axis(xa)?, axis(tail.strip_prefix('Y')?)?)));
        match parsed {
            Some((x, y)) => AspectRatio { x, y, slice },
            None => AspectRatio {
                slice,
                ..AspectRatio::default()
            },
        }
    }
}

// Maps `view_box` onto the viewport `(x, y, width, height)` following the
// preserveAspectRatio fit rules.
pub(crate) fn view_box_transform(view_box: Rect, aspect: AspectRatio, viewport: Rect) -> Matrix {
    let sx = viewport.width / view_box.width;
    let sy = viewport.height / view_box.height;
    if aspect.x == Align::None {
        return Matrix::translate(viewport.x, viewport.y)
            .mul(Matrix::scale(sx, sy))
            .mul(Matrix::translate(-view_box.x, -view_box.y));
    }
    let s = if aspect.slice { sx.max(sy) } else { sx.min(sy) };
    let offset = |align: Align, free: f32| match align {
        Align::Min | Align::None => 0.0,
        Align::Mid => free * 0.5,
        Align::Max => free,
    };
    let tx = viewport.x + offset(aspect.x, viewport.width - view_box.width * s);
    let ty = viewport.y + offset(aspect.y, viewport.height - view_box.height * s);
    Matrix::translate(tx, ty)
        .mul(Matrix::scale(s, s))
        .mul(Matrix::translate(-view_box.x, -view_box.y))
}

// Returns the color plus its own alpha (from rgba()/hsla()/#rrggbbaa).
pub(crate) fn parse_color(input: &str) -> Option<(Color, f32)> {
    let v = input.trim();
    if let Ok(color) = CssColor::parse_string(v) {
        if let Some(mapped) = css_color_to_color(&color) {
            return Some(mapped);
        }
    }
    parse_color_legacy(v).map(|c| (c, 1.0))
}

pub(crate) fn css_color_to_color(color: &CssColor) -> Option<(Color, f32)> {
    if let CssColor::RGBA(rgba) = color {
        let alpha = (rgba.alpha as f32 / 255.0).clamp(0.0, 1.0);
        return Some((Color::rgb(rgba.red, rgba.green, rgba.blue), alpha));
    }
    if let Ok(srgb) = SRGB::try_from(color) {
        let alpha = if srgb.alpha.is_finite() {
            srgb.alpha.clamp(0.0, 1.0)
        } else {
            1.0
        };
        return Some((Color::from_unit(srgb.r, srgb.g, srgb.b), alpha));
    }
    None
}

fn parse_color_legacy(v: &str) -> Option<Color> {
    let hex = v.strip_prefix('#')?;
    let digit = |i: usize| u8::from_str_radix(hex.get(i..i + 1)?, 16).ok();
    match hex.len() {
        3 => Some(Color::rgb(digit(0)? * 17, digit(1)? * 17, digit(2)? * 17)),
        6 => Some(Color::rgb(
            u8::from_str_radix(&hex[0..2], 16).ok()?,
            u8::from_str_radix(&hex[2..4], 16).ok()?,
            u8::from_str_radix(&hex[4..6], 16).ok()?,
        )),
        _ => None,
    }
}

// `url(#id)` or `url("#id")`, returning the inner reference and whatever follows
// the closing parenthesis.
pub(crate) fn parse_url_ref(input: &str) -> Option<(String, &str)> {
    let s = input.trim();
    if !s.get(..4)?.eq_ignore_ascii_case("url(") {
        return None;
    }
    let close = s.find(')')?;
    let inner = s[4..close].trim().trim_matches('"').trim_matches('\'').trim();
    if inner.is_empty() {
        return None;
    }
    Some((inner.to_string(), s[close + 1..].trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn lengths_convert_to_user_units() {
        let inch = Length::parse("1in").expect("inch");
        assert!(close(inch.to_user(16.0, 0.0), 96.0));
        let pt = Length::parse("72pt").expect("pt");
        assert!(close(pt.to_user(16.0, 0.0), 96.0));
        let em = Length::parse("2em").expect("em");
        assert!(close(em.to_user(10.0, 0.0), 20.0));
        let pct = Length::parse("50%").expect("percent");
        assert!(pct.is_percent());
        assert!(close(pct.to_user(10.0, 300.0), 150.0));
        assert_eq!(Length::parse("1e2").map(|l| l.value), Some(100.0));
        assert!(Length::parse("12furlongs").is_none());
    }

    #[test]
    fn transform_list_composes_left_to_right() {
        let m = parse_transform("translate(10,20) scale(2)");
        let (x, y) = m.apply(1.0, 1.0);
        assert!(close(x, 12.0) && close(y, 22.0));
        let m = parse_transform("rotate(90 10 10)");
        let (x, y) = m.apply(20.0, 10.0);
        assert!(close(x, 10.0) && close(y, 20.0));
        let m = parse_transform("skewX(45)");
        let (x, _) = m.apply(0.0, 10.0);
        assert!(close(x, 10.0));
    }

    #[test]
    fn aspect_ratio_meet_and_slice() {
        let vb = Rect::new(0.0, 0.0, 10.0, 20.0);
        let port = Rect::new(0.0, 0.0, 100.0, 100.0);
        let meet = view_box_transform(vb, AspectRatio::default(), port);
        let (x, y) = meet.apply(0.0, 0.0);
        assert!(close(x, 25.0) && close(y, 0.0));
        let slice = view_box_transform(vb, AspectRatio::parse(Some("xMinYMin slice")), port);
        let (x, y) = slice.apply(10.0, 20.0);
        assert!(close(x, 100.0) && close(y, 200.0));
        let none = view_box_transform(vb, AspectRatio::parse(Some("none")), port);
        let (x, y) = none.apply(10.0, 20.0);
        assert!(close(x, 100.0) && close(y, 100.0));
    }

    #[test]
    fn colors_parse_through_css_and_legacy_paths() {
        assert_eq!(parse_color("red").map(|c| c.0), Some(Color::rgb(255, 0, 0)));
        assert_eq!(parse_color("#0f0").map(|c| c.0), Some(Color::rgb(0, 255, 0)));
        let (c, a) = parse_color("rgba(0, 0, 255, 0.5)").expect("rgba");
        assert_eq!(c, Color::rgb(0, 0, 255));
        assert!((a - 0.5).abs() < 0.01);
        assert!(parse_color("not-a-color").is_none());
    }

    #[test]
    fn url_references_keep_fallback_tail() {
        let (id, rest) = parse_url_ref("url(#grad) red").expect("url");
        assert_eq!(id, "#grad");
        assert_eq!(rest, "red");
        assert!(parse_url_ref("none").is_none());
    }
}
