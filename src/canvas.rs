use crate::clip::ClipLayer;
use crate::paint::{Brush, Pen};
use crate::path::Path;
use crate::raster::RasterImage;
use crate::types::{Matrix, Rect};
use std::sync::Arc;

/// Rendering quality hints taken from the `*-rendering` properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality {
    pub anti_alias: bool,
    pub smooth_images: bool,
}

impl Default for Quality {
    fn default() -> Self {
        Self {
            anti_alias: true,
            smooth_images: true,
        }
    }
}

/// Device state captured with every draw command.
#[derive(Debug, Clone, Default)]
pub struct DrawState {
    pub transform: Matrix,
    pub clip: Arc<Vec<ClipLayer>>,
    pub quality: Quality,
}

#[derive(Debug, Clone)]
pub enum Command {
    FillPath {
        path: Path,
        brush: Brush,
        state: DrawState,
    },
    StrokePath {
        path: Path,
        brush: Brush,
        pen: Pen,
        state: DrawState,
    },
    // `rect` is in user space; the image is stretched to fill it.
    DrawImage {
        image: Arc<RasterImage>,
        rect: Rect,
        opacity: f32,
        state: DrawState,
    },
}

impl Command {
    pub fn state(&self) -> &DrawState {
        match self {
            Command::FillPath { state, .. }
            | Command::StrokePath { state, .. }
            | Command::DrawImage { state, .. } => state,
        }
    }

    /// Device-space bounds of what this command may touch, ignoring clips.
    pub fn bounds(&self) -> Option<Rect> {
        match self {
            Command::FillPath { path, state, .. } => {
                Some(path.bounds()?.transform(state.transform))
            }
            Command::StrokePath {
                path, pen, state, ..
            } => {
                let half = pen.width / 2.0 * pen.miter_limit.max(1.0);
                Some(path.bounds()?.inflate(half).transform(state.transform))
            }
            Command::DrawImage { rect, state, .. } => Some(rect.transform(state.transform)),
        }
    }
}

/// Ordered display list produced by the render walk.
#[derive(Debug, Default)]
pub struct Canvas {
    commands: Vec<Command>,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill_path(&mut self, path: Path, brush: Brush, state: DrawState) {
        if path.is_empty() {
            return;
        }
        self.commands.push(Command::FillPath { path, brush, state });
    }

    pub fn stroke_path(&mut self, path: Path, brush: Brush, pen: Pen, state: DrawState) {
        if path.is_empty() {
            return;
        }
        self.commands.push(Command::StrokePath {
            path,
            brush,
            pen,
            state,
        });
    }

    pub fn draw_image(&mut self, image: Arc<RasterImage>, rect: Rect, opacity: f32, state: DrawState) {
        if rect.is_empty() || opacity <= 0.0 {
            return;
        }
        self.commands.push(Command::DrawImage {
            image,
            rect,
            opacity,
            state,
        });
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Union of device-space bounds over all commands.
    pub fn bounds(&self) -> Option<Rect> {
        self.commands
            .iter()
            .filter_map(Command::bounds)
            .reduce(|acc, b| acc.union(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    fn black() -> Brush {
        Brush::Solid {
            color: Color::BLACK,
            alpha: 255,
        }
    }

    #[test]
    fn empty_geometry_is_not_recorded() {
        let mut canvas = Canvas::new();
        canvas.fill_path(Path::new(), black(), DrawState::default());
        assert!(canvas.is_empty());
        canvas.fill_path(
            Path::rect(Rect::new(0.0, 0.0, 2.0, 2.0)),
            black(),
            DrawState::default(),
        );
        assert_eq!(canvas.len(), 1);
    }

    #[test]
    fn bounds_are_in_device_space() {
        let mut canvas = Canvas::new();
        let state = DrawState {
            transform: Matrix::translate(10.0, 5.0).mul(Matrix::scale(2.0, 2.0)),
            ..DrawState::default()
        };
        canvas.fill_path(Path::rect(Rect::new(1.0, 1.0, 4.0, 3.0)), black(), state.clone());
        canvas.fill_path(Path::rect(Rect::new(0.0, 0.0, 1.0, 1.0)), black(), state);
        assert_eq!(canvas.bounds(), Some(Rect::new(10.0, 5.0, 10.0, 8.0)));
    }
}
