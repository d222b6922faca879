use crate::canvas::Canvas;
use crate::dom::{Axis, Element, NodeId};
use crate::error::RenderError;
use crate::gradient::bbox_matrix;
use crate::path::{FillRule, Path};
use crate::raster::{self, RasterImage};
use crate::render::{RenderState, Walker};
use crate::shapes::build_path;
use crate::text;
use crate::types::{Matrix, Rect, Units};
use crate::values::Length;
use std::sync::Arc;

/// One clip geometry with the fill rule picked from its `clip-rule`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPiece {
    pub path: Path,
    pub rule: FillRule,
}

/// A layer of the clip stack. Layers intersect; pieces inside a region union.
#[derive(Debug, Clone)]
pub enum ClipLayer {
    /// Union of `pieces`, mapped to device space by `transform`. No pieces
    /// clips everything away.
    Region {
        pieces: Vec<ClipPiece>,
        transform: Matrix,
    },
    /// Everything except `piece`.
    Exclude { piece: ClipPiece, transform: Matrix },
    /// Device-space coverage from a rendered `<mask>`.
    Luminance(Arc<LuminanceMask>),
}

impl ClipLayer {
    pub fn rect(rect: Rect, transform: Matrix) -> ClipLayer {
        ClipLayer::Region {
            pieces: vec![ClipPiece {
                path: Path::rect(rect),
                rule: FillRule::NonZero,
            }],
            transform,
        }
    }

    pub fn nothing() -> ClipLayer {
        ClipLayer::Region {
            pieces: Vec::new(),
            transform: Matrix::identity(),
        }
    }
}

/// Per-pixel coverage derived from mask content luminance.
#[derive(Debug, Clone, PartialEq)]
pub struct LuminanceMask {
    pub width: u32,
    pub height: u32,
    pub coverage: Vec<u8>,
}

impl LuminanceMask {
    // Premultiplied channels already carry alpha, so luminance is coverage.
    pub fn from_image(image: &RasterImage) -> LuminanceMask {
        let coverage = image
            .premultiplied()
            .chunks_exact(4)
            .map(|px| {
                let lum = 0.2125 * px[0] as f32 + 0.7154 * px[1] as f32 + 0.0721 * px[2] as f32;
                lum.round().clamp(0.0, 255.0) as u8
            })
            .collect();
        LuminanceMask {
            width: image.width(),
            height: image.height(),
            coverage,
        }
    }
}

fn clip_rule(el: &Element<'_>) -> FillRule {
    FillRule::parse(el.property("clip-rule"))
}

fn child_piece(
    walker: &Walker<'_>,
    child: &Element<'_>,
    transform: Matrix,
) -> Option<ClipPiece> {
    if !child.is_displayed() || !child.is_visible() {
        return None;
    }
    let path = match child.tag() {
        "text" => text::outline_text(walker, child),
        _ => build_path(child)?,
    };
    if path.is_empty() {
        return None;
    }
    Some(ClipPiece {
        path: path.transform(transform.mul(child.transform())),
        rule: clip_rule(child),
    })
}

/// Collects the clip geometry of `clip_path` in its content coordinates.
pub fn clip_pieces(walker: &Walker<'_>, clip_path: &Element<'_>) -> Vec<ClipPiece> {
    let mut pieces = Vec::new();
    let mut following = Vec::new();
    for child in clip_path.children() {
        collect_piece(walker, &child, Matrix::identity(), &mut following, &mut pieces);
    }
    pieces
}

// `<use>` chains are followed to their final target; `following` holds the use
// elements on the current chain.
fn collect_piece(
    walker: &Walker<'_>,
    el: &Element<'_>,
    transform: Matrix,
    following: &mut Vec<NodeId>,
    pieces: &mut Vec<ClipPiece>,
) {
    if el.tag() != "use" {
        if let Some(piece) = child_piece(walker, el, transform) {
            pieces.push(piece);
        }
        return;
    }
    if !el.is_displayed() {
        return;
    }
    if following.contains(&el.node_id()) {
        walker.note("render.skip", "recursive clip-path use");
        return;
    }
    let Some(target) = el.href_element() else {
        tracing::warn!(?el, "clip-path use has no target");
        return;
    };
    if target.is_ancestor_of(el.node_id()) {
        walker.note("render.skip", "recursive clip-path use");
        return;
    }
    let offset = Matrix::translate(el.length("x", Axis::X, 0.0), el.length("y", Axis::Y, 0.0));
    let target = target.adopt(el);
    following.push(el.node_id());
    collect_piece(
        walker,
        &target,
        transform.mul(el.transform()).mul(offset),
        following,
        pieces,
    );
    following.pop();
}

/// Builds the clip layers for `clip_path` applied to an element whose user
/// space is `state.transform` and whose bounding box is `bounds`.
pub(crate) fn resolve_clip_path(
    walker: &Walker<'_>,
    state: &RenderState,
    clip_path: &Element<'_>,
    bounds: Option<Rect>,
) -> Result<Vec<ClipLayer>, RenderError> {
    if state.is_active(clip_path.node_id()) {
        walker.note("render.skip", "recursive clip-path");
        return Ok(Vec::new());
    }
    let units = Units::parse(clip_path.attr("clipPathUnits"), Units::UserSpaceOnUse);
    let units_transform = match (units, bounds) {
        (Units::UserSpaceOnUse, _) => Matrix::identity(),
        (Units::ObjectBoundingBox, Some(b)) if !b.is_empty() => bbox_matrix(b),
        (Units::ObjectBoundingBox, _) => return Ok(vec![ClipLayer::nothing()]),
    };
    let transform = state
        .transform
        .mul(clip_path.transform())
        .mul(units_transform);
    let mut layers = vec![ClipLayer::Region {
        pieces: clip_pieces(walker, clip_path),
        transform,
    }];

    // clip-path on the clipPath itself intersects further.
    if let Some(value) = clip_path.own_property("clip-path").filter(|v| *v != "none") {
        match clip_path.reference(value) {
            Some(nested) if nested.tag() == "clipPath" => {
                let inner = state.enter(clip_path.node_id());
                layers.extend(resolve_clip_path(walker, &inner, &nested, bounds)?);
            }
            _ => walker.note("render.skip", value),
        }
    }
    Ok(layers)
}

fn mask_fraction(el: &Element<'_>, name: &str, default: f32) -> f32 {
    match el.length_attr(name) {
        Some(len) if len.is_percent() => len.value / 100.0,
        Some(len) => len.value,
        None => default,
    }
}

/// Mask region in the masked element's user space.
pub fn mask_region(mask: &Element<'_>, bounds: Option<Rect>) -> Option<Rect> {
    match Units::parse(mask.attr("maskUnits"), Units::ObjectBoundingBox) {
        Units::ObjectBoundingBox => {
            let b = bounds.filter(|b| !b.is_empty())?;
            let x = mask_fraction(mask, "x", -0.1);
            let y = mask_fraction(mask, "y", -0.1);
            let w = mask_fraction(mask, "width", 1.2);
            let h = mask_fraction(mask, "height", 1.2);
            Some(Rect::new(
                b.x + x * b.width,
                b.y + y * b.height,
                w * b.width,
                h * b.height,
            ))
        }
        Units::UserSpaceOnUse => {
            let len = |name: &str, axis: Axis, default: &str| {
                let value = mask
                    .length_attr(name)
                    .or_else(|| Length::parse(default))
                    .unwrap_or(Length::ZERO);
                mask.resolve_length(value, axis)
            };
            Some(Rect::new(
                len("x", Axis::X, "-10%"),
                len("y", Axis::Y, "-10%"),
                len("width", Axis::X, "120%"),
                len("height", Axis::Y, "120%"),
            ))
        }
    }
}

/// Renders `mask` offscreen at the current surface size and turns it into a
/// luminance layer.
pub(crate) fn resolve_mask(
    walker: &Walker<'_>,
    state: &RenderState,
    mask: &Element<'_>,
    bounds: Option<Rect>,
) -> Result<ClipLayer, RenderError> {
    if state.is_active(mask.node_id()) {
        walker.note("render.skip", "recursive mask");
        return Ok(ClipLayer::nothing());
    }
    let Some(region) = mask_region(mask, bounds).filter(|r| !r.is_empty()) else {
        return Ok(ClipLayer::nothing());
    };
    let content = match Units::parse(mask.attr("maskContentUnits"), Units::UserSpaceOnUse) {
        Units::UserSpaceOnUse => Matrix::identity(),
        Units::ObjectBoundingBox => match bounds.filter(|b| !b.is_empty()) {
            Some(b) => bbox_matrix(b),
            None => return Ok(ClipLayer::nothing()),
        },
    };

    let (width, height) = state.surface;
    let child_state = state
        .offscreen(width, height)
        .with_clip(ClipLayer::rect(region, state.transform))
        .with_transform(state.transform.mul(content))
        .enter(mask.node_id());
    let mut canvas = Canvas::new();
    for child in mask.children() {
        walker.render_node(&child, &child_state, &mut canvas)?;
    }
    let image = raster::rasterize(canvas.commands(), width, height, None)?;
    Ok(ClipLayer::Luminance(Arc::new(LuminanceMask::from_image(&image))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Renderer;
    use crate::dom::Document;

    fn doc(body: &str) -> Document {
        Document::parse(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="40" height="40">{body}</svg>"#
        ))
        .expect("parse")
    }

    fn element<'a>(doc: &'a Document, id: &str) -> Element<'a> {
        doc.element(doc.node_by_id(id).expect("id")).expect("element")
    }

    fn renderer() -> Renderer {
        Renderer::builder()
            .system_fonts(false)
            .build()
            .expect("renderer")
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn bounding_box_clip_scales_unit_circle() {
        let d = doc(
            r#"<clipPath id="c" clipPathUnits="objectBoundingBox"><circle cx="0.5" cy="0.5" r="0.5"/></clipPath>"#,
        );
        let r = renderer();
        let walker = r.walker();
        let layers = resolve_clip_path(
            &walker,
            &RenderState::default(),
            &element(&d, "c"),
            Some(Rect::new(10.0, 20.0, 200.0, 100.0)),
        )
        .expect("clip");
        assert_eq!(layers.len(), 1);
        let ClipLayer::Region { pieces, transform } = &layers[0] else {
            panic!("expected region");
        };
        assert_eq!(*transform, bbox_matrix(Rect::new(10.0, 20.0, 200.0, 100.0)));
        assert_eq!(pieces.len(), 1);
        let b = pieces[0].path.transform(*transform).bounds().expect("bounds");
        assert!(close(b.x, 10.0) && close(b.y, 20.0), "{b:?}");
        assert!(close(b.width, 200.0) && close(b.height, 100.0), "{b:?}");
    }

    #[test]
    fn user_space_clip_keeps_child_transform_and_rule() {
        let d = doc(
            r#"<clipPath id="c"><rect width="5" height="5" transform="translate(3,4)" clip-rule="evenodd"/></clipPath>"#,
        );
        let r = renderer();
        let walker = r.walker();
        let pieces = clip_pieces(&walker, &element(&d, "c"));
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].rule, FillRule::EvenOdd);
        assert_eq!(
            pieces[0].path.bounds(),
            Some(Rect::new(3.0, 4.0, 5.0, 5.0))
        );
    }

    #[test]
    fn use_children_are_resolved_through_their_target() {
        let d = doc(
            r##"<defs><rect id="r" width="2" height="3"/></defs>
            <clipPath id="c" clip-rule="evenodd"><use xlink:href="#r" x="10" y="1"/></clipPath>"##,
        );
        let r = renderer();
        let walker = r.walker();
        let pieces = clip_pieces(&walker, &element(&d, "c"));
        assert_eq!(pieces.len(), 1);
        assert_eq!(
            pieces[0].path.bounds(),
            Some(Rect::new(10.0, 1.0, 2.0, 3.0))
        );
        assert_eq!(pieces[0].rule, FillRule::EvenOdd);
    }

    #[test]
    fn use_chains_are_followed_to_the_shape() {
        let d = doc(
            r##"<defs><rect id="r" width="2" height="3"/><use id="u1" xlink:href="#r" x="5"/><use id="u2" xlink:href="#u1" y="7"/></defs>
            <clipPath id="c"><use xlink:href="#u2" x="1"/></clipPath>"##,
        );
        let r = renderer();
        let walker = r.walker();
        let pieces = clip_pieces(&walker, &element(&d, "c"));
        assert_eq!(pieces.len(), 1);
        assert_eq!(
            pieces[0].path.bounds(),
            Some(Rect::new(6.0, 7.0, 2.0, 3.0))
        );
    }

    #[test]
    fn cyclic_use_chain_yields_nothing() {
        let d = doc(
            r##"<defs><use id="a" xlink:href="#b"/><use id="b" xlink:href="#a"/></defs>
            <clipPath id="c"><use xlink:href="#a"/></clipPath>"##,
        );
        let r = renderer();
        let walker = r.walker();
        assert!(clip_pieces(&walker, &element(&d, "c")).is_empty());
    }

    #[test]
    fn empty_clip_path_clips_everything() {
        let d = doc(r#"<clipPath id="c"/>"#);
        let r = renderer();
        let walker = r.walker();
        let layers =
            resolve_clip_path(&walker, &RenderState::default(), &element(&d, "c"), None)
                .expect("clip");
        assert!(matches!(&layers[0], ClipLayer::Region { pieces, .. } if pieces.is_empty()));
    }

    #[test]
    fn default_mask_region_pads_the_bounding_box() {
        let d = doc(r#"<mask id="m"/>"#);
        let region = mask_region(&element(&d, "m"), Some(Rect::new(0.0, 0.0, 100.0, 50.0)))
            .expect("region");
        assert!(close(region.x, -10.0) && close(region.y, -5.0));
        assert!(close(region.width, 120.0) && close(region.height, 60.0));
    }

    #[test]
    fn white_mask_content_gives_full_coverage() {
        let d = doc(
            r#"<mask id="m" maskUnits="userSpaceOnUse" x="0" y="0" width="20" height="40"><rect width="40" height="40" fill="white"/></mask>"#,
        );
        let r = renderer();
        let walker = r.walker();
        let state = RenderState::default().offscreen(40, 40);
        let layer = resolve_mask(&walker, &state, &element(&d, "m"), None).expect("mask");
        let ClipLayer::Luminance(mask) = layer else {
            panic!("expected luminance layer");
        };
        assert_eq!((mask.width, mask.height), (40, 40));
        assert_eq!(mask.coverage[5], 255);
        assert_eq!(mask.coverage[30], 0);
    }
}
