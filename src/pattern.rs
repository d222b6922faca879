use crate::canvas::Canvas;
use crate::dom::{Axis, Element};
use crate::error::RenderError;
use crate::gradient::{href_chain, inherited_attr};
use crate::paint::Brush;
use crate::raster::{self, RasterImage};
use crate::render::{RenderState, Walker};
use crate::types::{Matrix, Rect, Units};
use crate::values::{AspectRatio, Length, parse_viewbox, view_box_transform};
use std::sync::Arc;

/// A rendered pattern tile. `tile_rect` is the tile in pattern space and
/// `transform` maps pattern space to user space.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternBrush {
    pub tile: Arc<RasterImage>,
    pub tile_rect: Rect,
    pub transform: Matrix,
    pub opacity: f32,
}

/// Resolves one of the pattern's x/y/width/height attributes. Bounding-box units
/// scale by the target bounds; percentages there are fractions of the box.
fn calc_pattern_unit(
    chain: &[Element<'_>],
    name: &str,
    axis: Axis,
    units: Units,
    bounds: Rect,
) -> Option<f32> {
    let (el, value) = inherited_attr(chain, name)?;
    let len = Length::parse(value)?;
    Some(match units {
        Units::UserSpaceOnUse => el.resolve_length(len, axis),
        Units::ObjectBoundingBox => {
            let fraction = if len.is_percent() {
                len.value / 100.0
            } else {
                len.value
            };
            match axis {
                Axis::X => bounds.x + fraction * bounds.width,
                Axis::Y => bounds.y + fraction * bounds.height,
                Axis::Other => fraction,
            }
        }
    })
}

fn calc_pattern_size(
    chain: &[Element<'_>],
    name: &str,
    axis: Axis,
    units: Units,
    bounds: Rect,
) -> Option<f32> {
    let (el, value) = inherited_attr(chain, name)?;
    let len = Length::parse(value)?;
    Some(match units {
        Units::UserSpaceOnUse => el.resolve_length(len, axis),
        Units::ObjectBoundingBox => {
            let fraction = if len.is_percent() {
                len.value / 100.0
            } else {
                len.value
            };
            match axis {
                Axis::Y => fraction * bounds.height,
                _ => fraction * bounds.width,
            }
        }
    })
}

/// Geometry of a pattern tile resolved against the painted bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternTile {
    pub rect: Rect,
    pub transform: Matrix,
    pub content: Matrix,
}

pub fn pattern_tile(pattern: &Element<'_>, bounds: Rect) -> Option<PatternTile> {
    let chain = href_chain(pattern);
    let units = Units::parse(
        inherited_attr(&chain, "patternUnits").map(|(_, v)| v),
        Units::UserSpaceOnUse,
    );
    let content_units = Units::parse(
        inherited_attr(&chain, "patternContentUnits").map(|(_, v)| v),
        Units::UserSpaceOnUse,
    );
    if units == Units::ObjectBoundingBox && bounds.is_empty() {
        return None;
    }

    let x = calc_pattern_unit(&chain, "x", Axis::X, units, bounds).unwrap_or(0.0);
    let y = calc_pattern_unit(&chain, "y", Axis::Y, units, bounds).unwrap_or(0.0);
    let width = calc_pattern_size(&chain, "width", Axis::X, units, bounds).unwrap_or(bounds.width);
    let height =
        calc_pattern_size(&chain, "height", Axis::Y, units, bounds).unwrap_or(bounds.height);
    if !(width > 0.0 && height > 0.0) {
        return None;
    }

    let own = inherited_attr(&chain, "patternTransform")
        .map_or(Matrix::identity(), |(el, _)| el.matrix_attr("patternTransform"));
    let view_box = inherited_attr(&chain, "viewBox").and_then(|(_, v)| parse_viewbox(Some(v)));
    let content = match view_box {
        Some(vb) => {
            let aspect = AspectRatio::parse(
                inherited_attr(&chain, "preserveAspectRatio").map(|(_, v)| v),
            );
            view_box_transform(vb, aspect, Rect::new(0.0, 0.0, width, height))
        }
        None if content_units == Units::ObjectBoundingBox => {
            if bounds.is_empty() {
                return None;
            }
            Matrix::scale(bounds.width, bounds.height)
        }
        None => Matrix::identity(),
    };
    Some(PatternTile {
        rect: Rect::new(0.0, 0.0, width, height),
        transform: own.mul(Matrix::translate(x, y)),
        content,
    })
}

// Children come from the first element in the href chain that has any.
fn pattern_children<'a>(pattern: &Element<'a>) -> Vec<Element<'a>> {
    href_chain(pattern)
        .iter()
        .filter(|el| el.tag() == "pattern")
        .map(Element::children)
        .find(|children| !children.is_empty())
        .unwrap_or_default()
}

/// Renders `pattern` into an offscreen tile and wraps it as a tiling brush.
pub(crate) fn build_pattern(
    walker: &Walker<'_>,
    state: &RenderState,
    pattern: &Element<'_>,
    bounds: Rect,
    opacity: f32,
) -> Result<Option<Brush>, RenderError> {
    if state.is_active(pattern.node_id()) {
        tracing::debug!(?pattern, "recursive pattern reference");
        walker.note("render.skip", "recursive pattern");
        return Ok(None);
    }
    let Some(tile) = pattern_tile(pattern, bounds) else {
        return Ok(None);
    };
    let children = pattern_children(pattern);
    if children.is_empty() {
        return Ok(None);
    }

    let device = state.transform.mul(tile.transform).scale_factor().max(f32::EPSILON);
    let max = walker.config().max_tile_size.max(1);
    let px_w = ((tile.rect.width * device).ceil() as u32).clamp(1, max);
    let px_h = ((tile.rect.height * device).ceil() as u32).clamp(1, max);

    let image = match children.as_slice() {
        [only] if only.tag() == "image" => raster::load_element_image(only)?,
        _ => {
            let to_tile = Matrix::scale(
                px_w as f32 / tile.rect.width,
                px_h as f32 / tile.rect.height,
            );
            let child_state = state
                .offscreen(px_w, px_h)
                .with_transform(to_tile.mul(tile.content))
                .enter(pattern.node_id());
            let mut canvas = Canvas::new();
            for child in &children {
                walker.render_node(child, &child_state, &mut canvas)?;
            }
            raster::rasterize(canvas.commands(), px_w, px_h, None)?
        }
    };

    Ok(Some(Brush::Pattern(PatternBrush {
        tile: Arc::new(image),
        tile_rect: tile.rect,
        transform: tile.transform,
        opacity: opacity.clamp(0.0, 1.0),
    })))
}
