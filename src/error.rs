use std::fmt;

#[derive(Debug)]
pub enum RenderError {
    Parse(String),
    InvalidMiterLimit(f32),
    InvalidConfiguration(String),
    RasterAllocation { width: u32, height: u32 },
    Image(String),
    Io(std::io::Error),
}

impl RenderError {
    // Recoverable failures are logged and the offending element is skipped; everything
    // else aborts the render call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::Image(_))
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Parse(message) => write!(f, "svg parse error: {}", message),
            RenderError::InvalidMiterLimit(value) => {
                write!(f, "stroke-miterlimit must be >= 1 (got {})", value)
            }
            RenderError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            RenderError::RasterAllocation { width, height } => {
                write!(f, "cannot allocate {}x{} raster", width, height)
            }
            RenderError::Image(message) => write!(f, "image error: {}", message),
            RenderError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(value: std::io::Error) -> Self {
        RenderError::Io(value)
    }
}

impl From<roxmltree::Error> for RenderError {
    fn from(value: roxmltree::Error) -> Self {
        RenderError::Parse(value.to_string())
    }
}
