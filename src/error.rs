/// Error type for the canvas engine.
///
/// "No mask here" is not an error: extraction and lookup return `Option`.
/// These variants cover I/O, codecs and malformed inputs.
#[derive(Debug)]
pub enum CanvasError {
    Io(std::io::Error),
    Image(image::ImageError),
    PngEncode(png::EncodingError),
    PngDecode(png::DecodingError),
    Cache(String),
    InvalidBitmap(String),
    InvalidFormat(String),
}

impl std::fmt::Display for CanvasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanvasError::Io(e) => write!(f, "I/O error: {}", e),
            CanvasError::Image(e) => write!(f, "Image error: {}", e),
            CanvasError::PngEncode(e) => write!(f, "PNG encode error: {}", e),
            CanvasError::PngDecode(e) => write!(f, "PNG decode error: {}", e),
            CanvasError::Cache(e) => write!(f, "Mask cache error: {}", e),
            CanvasError::InvalidBitmap(e) => write!(f, "Invalid bitmap: {}", e),
            CanvasError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for CanvasError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CanvasError::Io(e) => Some(e),
            CanvasError::Image(e) => Some(e),
            CanvasError::PngEncode(e) => Some(e),
            CanvasError::PngDecode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CanvasError {
    fn from(e: std::io::Error) -> Self {
        CanvasError::Io(e)
    }
}

impl From<image::ImageError> for CanvasError {
    fn from(e: image::ImageError) -> Self {
        CanvasError::Image(e)
    }
}

impl From<png::EncodingError> for CanvasError {
    fn from(e: png::EncodingError) -> Self {
        CanvasError::PngEncode(e)
    }
}

impl From<png::DecodingError> for CanvasError {
    fn from(e: png::DecodingError) -> Self {
        CanvasError::PngDecode(e)
    }
}

impl From<Box<bincode::ErrorKind>> for CanvasError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CanvasError::Cache(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CanvasError>;
