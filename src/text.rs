use crate::canvas::Canvas;
use crate::dom::{Axis, Content, Element};
use crate::error::RenderError;
use crate::font::{FontSpec, FontStyle, RunLayout, resolve_family};
use crate::path::Path;
use crate::render::{RenderState, Walker};
use crate::types::{Matrix, Point, Rect};
use crate::values::{Length, parse_length_list};

const SUB_SUPER_SHIFT: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMode {
    /// Paint each run with its owner's fill and stroke.
    Rendering,
    /// Only collect geometry (clip-path children).
    Outlining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    Middle,
    End,
}

impl Anchor {
    fn resolve(el: &Element<'_>) -> Anchor {
        let anchor = match el.property("text-anchor") {
            Some("middle") => Anchor::Middle,
            Some("end") => Anchor::End,
            _ => Anchor::Start,
        };
        match (el.property("direction"), anchor) {
            (Some("rtl"), Anchor::Start) => Anchor::End,
            (Some("rtl"), Anchor::End) => Anchor::Start,
            _ => anchor,
        }
    }
}

/// One shaped run placed in the text element's user space.
#[derive(Debug, Clone)]
pub struct TextRun<'a> {
    pub owner: Element<'a>,
    pub text: String,
    pub font: FontSpec,
    pub origin: Point,
    pub advance: f32,
    pub path: Path,
}

/// Collapses whitespace according to `xml:space`.
pub fn normalize_whitespace(raw: &str, xml_space: Option<&str>) -> String {
    let spaced: String = raw
        .chars()
        .map(|c| match c {
            '\t' | '\n' | '\r' | '\x0C' => ' ',
            other => other,
        })
        .collect();
    match xml_space {
        Some("preserve") => spaced,
        Some(_) => {
            let mut out = String::with_capacity(spaced.len());
            let mut last_space = false;
            for c in spaced.chars() {
                if c == ' ' {
                    if !last_space {
                        out.push(c);
                    }
                    last_space = true;
                } else {
                    out.push(c);
                    last_space = false;
                }
            }
            out
        }
        None => spaced.trim().to_string(),
    }
}

/// Computed font weight on the 100..950 scale.
pub fn font_weight(el: &Element<'_>) -> u16 {
    let parent = || el.parent().map_or(400, |p| font_weight(&p));
    match el.own_property("font-weight") {
        None | Some("inherit") => parent(),
        Some("normal") => 400,
        Some("bold") => 700,
        Some("bolder") => bolder(parent()),
        Some("lighter") => lighter(parent()),
        Some(v) => v
            .parse::<u16>()
            .ok()
            .filter(|w| (1..=1000).contains(w))
            .map(|w| w.min(950))
            .unwrap_or_else(parent),
    }
}

fn bolder(weight: u16) -> u16 {
    match weight {
        0..350 => 400,
        350..550 => 700,
        _ => 900,
    }
}

fn lighter(weight: u16) -> u16 {
    match weight {
        0..100 => weight,
        100..550 => 100,
        550..750 => 400,
        _ => 700,
    }
}

fn font_style(el: &Element<'_>) -> FontStyle {
    match el.property("font-style") {
        Some("italic") => FontStyle::Italic,
        Some(v) if v.starts_with("oblique") => FontStyle::Oblique,
        _ => FontStyle::Normal,
    }
}

fn font_stretch(el: &Element<'_>) -> u16 {
    let Some(value) = el.property("font-stretch") else {
        return 5;
    };
    match value {
        "ultra-condensed" => 1,
        "extra-condensed" => 2,
        "condensed" => 3,
        "semi-condensed" => 4,
        "semi-expanded" => 6,
        "expanded" => 7,
        "extra-expanded" => 8,
        "ultra-expanded" => 9,
        v => match v.strip_suffix('%').and_then(|p| p.trim().parse::<f32>().ok()) {
            Some(pct) if pct <= 56.25 => 1,
            Some(pct) if pct <= 68.75 => 2,
            Some(pct) if pct <= 81.25 => 3,
            Some(pct) if pct <= 93.75 => 4,
            Some(pct) if pct <= 106.25 => 5,
            Some(pct) if pct <= 118.75 => 6,
            Some(pct) if pct <= 137.5 => 7,
            Some(pct) if pct <= 175.0 => 8,
            Some(_) => 9,
            None => 5,
        },
    }
}

/// Upward shift of the run owned by `el`, in user units.
pub fn baseline_shift(el: &Element<'_>) -> f32 {
    let size = el.font_size();
    match el.own_property("baseline-shift") {
        None | Some("baseline") => 0.0,
        Some("sub") => -SUB_SUPER_SHIFT * size,
        Some("super") => SUB_SUPER_SHIFT * size,
        Some(v) => match Length::parse(v) {
            Some(len) if len.is_percent() => len.value / 100.0 * size,
            Some(len) => el.resolve_length(len, Axis::Y),
            None => 0.0,
        },
    }
}

fn first_length(el: &Element<'_>, name: &str, axis: Axis) -> Option<f32> {
    let first = *parse_length_list(el.attr(name)?).first()?;
    Some(el.resolve_length(first, axis))
}

fn is_vertical(el: &Element<'_>) -> bool {
    matches!(
        el.property("writing-mode"),
        Some("tb") | Some("tb-rl") | Some("vertical-rl") | Some("vertical-lr")
    )
}

struct Layout<'w, 'r, 'a> {
    walker: &'w Walker<'r>,
    ctp: Point,
    runs: Vec<TextRun<'a>>,
}

impl<'a> Layout<'_, '_, 'a> {
    fn position(&mut self, el: &Element<'a>) {
        if let Some(x) = first_length(el, "x", Axis::X) {
            self.ctp.x = x;
        }
        if let Some(y) = first_length(el, "y", Axis::Y) {
            self.ctp.y = y;
        }
        if let Some(dx) = first_length(el, "dx", Axis::X) {
            self.ctp.x += dx;
        }
        if let Some(dy) = first_length(el, "dy", Axis::Y) {
            self.ctp.y += dy;
        }
    }

    fn walk(&mut self, el: &Element<'a>) {
        self.position(el);
        for content in el.content() {
            match content {
                Content::Text(text) => self.add_run(el, text),
                Content::Element(child) if !child.is_displayed() => {}
                Content::Element(child) => match child.tag() {
                    "tspan" => self.walk(&child),
                    "tref" => {
                        self.position(&child);
                        if let Some(target) = child.href_element() {
                            self.add_run(&child, &target.text_content());
                        }
                    }
                    _ => {}
                },
            }
        }
    }

    fn add_run(&mut self, owner: &Element<'a>, raw: &str) {
        let text = normalize_whitespace(raw, owner.property("xml:space"));
        if text.is_empty() {
            return;
        }
        let config = self.walker.config();
        let family_value = owner.property_or("font-family", &config.fonts.default_family);
        let family = resolve_family(family_value, self.walker.shaper(), &config.fonts);
        if family.fallback {
            tracing::warn!(family = family_value, fallback = family.name.as_str(), "font not found");
            self.walker.note("font.fallback", family_value);
        }
        let font = FontSpec {
            family: family.name,
            size: owner.font_size(),
            weight: font_weight(owner),
            style: font_style(owner),
            stretch: font_stretch(owner),
        };
        let vertical = is_vertical(owner);
        let layout = RunLayout {
            vertical,
            rtl: owner.property("direction") == Some("rtl"),
        };
        let Some(shaped) = self.walker.shaper().shape(&font, &text, layout) else {
            tracing::warn!(family = font.family.as_str(), "text run could not be shaped");
            self.walker.note("font.fallback", &font.family);
            return;
        };

        let anchor = Anchor::resolve(owner);
        let size = font.size;
        let bias = if config.text_anchor_bias {
            match anchor {
                Anchor::Start => -size / 6.0,
                Anchor::Middle => 0.0,
                Anchor::End => size / 6.0,
            }
        } else {
            0.0
        };
        let along = match anchor {
            Anchor::Start => 0.0,
            Anchor::Middle => -shaped.advance / 2.0,
            Anchor::End => -shaped.advance,
        };

        let shift = baseline_shift(owner);
        self.ctp.y -= shift;
        let origin = if vertical {
            Point::new(self.ctp.x, self.ctp.y + along)
        } else {
            Point::new(self.ctp.x + along + bias, self.ctp.y)
        };
        // Shaped outlines are emitted around the baseline origin, so the cell
        // ascent is already folded in.
        let path = shaped.path.transform(Matrix::translate(origin.x, origin.y));
        self.ctp.y += shift;

        let consumed = match anchor {
            Anchor::Start => shaped.advance,
            Anchor::Middle => shaped.advance / 2.0,
            Anchor::End => 0.0,
        } + size / 4.0;
        if vertical {
            self.ctp.y += consumed;
        } else {
            self.ctp.x += consumed;
        }

        self.runs.push(TextRun {
            owner: owner.clone(),
            text,
            font,
            origin,
            advance: shaped.advance,
            path,
        });
    }
}

/// Lays out every run of a `<text>` element in its user space.
pub(crate) fn layout_text<'a>(walker: &Walker<'_>, text: &Element<'a>) -> Vec<TextRun<'a>> {
    text.document().font_gate().wait();
    let mut layout = Layout {
        walker,
        ctp: Point::default(),
        runs: Vec::new(),
    };
    layout.walk(text);
    layout.runs
}

fn runs_bounds(runs: &[TextRun<'_>]) -> Option<Rect> {
    runs.iter()
        .filter_map(|run| run.path.bounds())
        .reduce(|acc, b| acc.union(&b))
}

/// Combined outline of a text element, used for clipping and bounds.
pub(crate) fn outline_text(walker: &Walker<'_>, text: &Element<'_>) -> Path {
    let mut out = Path::new();
    for run in layout_text(walker, text) {
        out.extend(&run.path);
    }
    out
}

pub(crate) fn text_bounds(walker: &Walker<'_>, text: &Element<'_>) -> Option<Rect> {
    runs_bounds(&layout_text(walker, text))
}

/// Lays out `text` and paints each run, or returns the combined outline in
/// outlining mode.
pub(crate) fn render_text(
    walker: &Walker<'_>,
    state: &RenderState,
    text: &Element<'_>,
    mode: TextMode,
    canvas: &mut Canvas,
) -> Result<Option<Path>, RenderError> {
    let runs = layout_text(walker, text);
    if mode == TextMode::Outlining {
        let mut out = Path::new();
        for run in &runs {
            out.extend(&run.path);
        }
        return Ok(Some(out));
    }

    let Some(bounds) = runs_bounds(&runs) else {
        return Ok(None);
    };
    for run in &runs {
        if !run.owner.is_visible() {
            continue;
        }
        walker.paint_geometry(state, &run.owner, &run.path, bounds, canvas)?;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Renderer;
    use crate::canvas::Command;
    use crate::dom::Document;
    use crate::font::BoxShaper;
    use std::sync::Arc;

    fn doc(body: &str) -> Document {
        Document::parse(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">{body}</svg>"#
        ))
        .expect("parse")
    }

    fn element<'a>(doc: &'a Document, id: &str) -> Element<'a> {
        doc.element(doc.node_by_id(id).expect("id")).expect("element")
    }

    fn renderer(bias: bool) -> Renderer {
        Renderer::builder()
            .system_fonts(false)
            .text_shaper(Arc::new(BoxShaper::with_families(&["Arial", "Times New Roman"])))
            .text_anchor_bias(bias)
            .build()
            .expect("renderer")
    }

    fn runs<'a>(r: &Renderer, d: &'a Document, id: &str) -> Vec<TextRun<'a>> {
        let walker = r.walker();
        layout_text(&walker, &element(d, id))
    }

    #[test]
    fn whitespace_modes() {
        assert_eq!(normalize_whitespace("\n  a\tb  c \n", None), "a b  c");
        assert_eq!(
            normalize_whitespace("\n  a\tb  c \n", Some("default")),
            " a b c "
        );
        assert_eq!(
            normalize_whitespace("a\n  b", Some("preserve")),
            "a   b"
        );
    }

    #[test]
    fn only_first_position_value_is_used() {
        let r = renderer(false);
        let d = doc(r#"<text id="t" x="10 20 30" y="40 50" dx="2 9" font-size="10">ab</text>"#);
        let runs = runs(&r, &d, "t");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].origin, Point::new(12.0, 40.0));
        assert_eq!(runs[0].advance, 10.0);
        let b = runs[0].path.bounds().expect("bounds");
        assert_eq!(b, Rect::new(12.0, 32.0, 10.0, 8.0));
    }

    #[test]
    fn runs_advance_with_inter_run_spacing() {
        let r = renderer(false);
        let d = doc(r#"<text id="t" y="10" font-size="10">ab<tspan fill="red">cd</tspan></text>"#);
        let runs = runs(&r, &d, "t");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].origin.x, 12.5);
        assert_eq!(runs[1].owner.tag(), "tspan");
        assert_eq!(runs[1].text, "cd");
    }

    #[test]
    fn anchors_and_rtl_swap() {
        let r = renderer(false);
        let d = doc(
            r#"<text id="m" x="50" font-size="10" text-anchor="middle">abcd</text>
            <text id="e" x="50" font-size="10" text-anchor="end">abcd</text>
            <text id="rtl" x="50" font-size="10" direction="rtl">abcd</text>"#,
        );
        assert_eq!(runs(&r, &d, "m")[0].origin.x, 40.0);
        assert_eq!(runs(&r, &d, "e")[0].origin.x, 30.0);
        assert_eq!(runs(&r, &d, "rtl")[0].origin.x, 30.0);
    }

    #[test]
    fn anchor_bias_shifts_by_a_sixth_of_the_size() {
        let r = renderer(true);
        let d = doc(r#"<text id="t" x="60" font-size="12">ab</text>"#);
        assert_eq!(runs(&r, &d, "t")[0].origin.x, 58.0);
    }

    #[test]
    fn baseline_shift_does_not_accumulate() {
        let r = renderer(false);
        let d = doc(
            r#"<text id="t" y="20" font-size="10">a<tspan baseline-shift="super">b</tspan><tspan>c</tspan></text>"#,
        );
        let runs = runs(&r, &d, "t");
        let ys: Vec<f32> = runs.iter().map(|r| r.origin.y).collect();
        assert_eq!(ys, vec![20.0, 14.0, 20.0]);
    }

    #[test]
    fn baseline_shift_values() {
        let d = doc(
            r#"<text font-size="20"><tspan id="sub" baseline-shift="sub"/><tspan id="pct" baseline-shift="25%"/><tspan id="len" baseline-shift="3"/></text>"#,
        );
        assert_eq!(baseline_shift(&element(&d, "sub")), -12.0);
        assert_eq!(baseline_shift(&element(&d, "pct")), 5.0);
        assert_eq!(baseline_shift(&element(&d, "len")), 3.0);
    }

    #[test]
    fn relative_weights_follow_the_parent() {
        let d = doc(
            r#"<g font-weight="normal"><text><tspan id="b" font-weight="bolder"><tspan id="l" font-weight="lighter"/></tspan></text></g>
            <text id="n" font-weight="600"/>"#,
        );
        assert_eq!(font_weight(&element(&d, "b")), 700);
        assert_eq!(font_weight(&element(&d, "l")), 100);
        assert_eq!(font_weight(&element(&d, "n")), 600);
    }

    #[test]
    fn tref_pulls_referenced_text() {
        let r = renderer(false);
        let d = doc(
            r##"<defs><text id="src">xyz</text></defs><text id="t" font-size="10"><tref xlink:href="#src"/></text>"##,
        );
        let runs = runs(&r, &d, "t");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "xyz");
    }

    #[test]
    fn unknown_family_falls_back_to_default() {
        let r = renderer(false);
        let d = doc(r#"<text id="t" font-family="NoSuchFace, serif">a</text><text id="u" font-family="NoSuchFace">a</text>"#);
        assert_eq!(runs(&r, &d, "t")[0].font.family, "Times New Roman");
        assert_eq!(runs(&r, &d, "u")[0].font.family, "Arial");
    }

    #[test]
    fn vertical_runs_advance_downwards() {
        let r = renderer(false);
        let d = doc(r#"<text id="t" x="10" y="0" font-size="10" writing-mode="tb">ab<tspan>c</tspan></text>"#);
        let runs = runs(&r, &d, "t");
        assert_eq!(runs[1].origin, Point::new(10.0, 22.5));
    }

    #[test]
    fn rendering_paints_each_run_with_its_owner() {
        let r = renderer(false);
        let d = doc(r#"<text id="t" y="10" font-size="10">ab<tspan fill="red">cd</tspan></text>"#);
        let walker = r.walker();
        let mut canvas = Canvas::new();
        render_text(
            &walker,
            &RenderState::default(),
            &element(&d, "t"),
            TextMode::Rendering,
            &mut canvas,
        )
        .expect("render");
        let fills = canvas
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::FillPath { .. }))
            .count();
        assert_eq!(fills, 2);
    }

    #[test]
    fn visible_tspan_inside_hidden_text_still_paints() {
        let r = renderer(false);
        let d = doc(
            r#"<text y="10" font-size="10" visibility="hidden">ab<tspan visibility="visible">cd</tspan></text>"#,
        );
        let cmds = r.render_commands(&d).expect("render");
        assert_eq!(cmds.len(), 1);
        let Command::FillPath { path, .. } = &cmds[0] else {
            panic!("expected fill");
        };
        assert_eq!(path.bounds().map(|b| b.x), Some(12.5));
    }

    #[test]
    fn registered_face_renders_when_default_family_is_missing() {
        let Some(face) = crate::font::installed_sans_face() else {
            eprintln!("no sans face installed; skipping");
            return;
        };
        let r = Renderer::builder()
            .system_fonts(false)
            .register_font_file(face)
            .build()
            .expect("renderer");
        let d = doc(r#"<text x="5" y="30" font-size="20">Hello</text>"#);
        let cmds = r.render_commands(&d).expect("render");
        assert_eq!(cmds.len(), 1);
        let b = cmds[0].bounds().expect("bounds");
        assert!(b.bottom() <= 30.0 + 20.0 * 0.3);
        assert!(b.y < 30.0);
    }
}
