pub mod spatial;
pub mod store;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, Result};
use crate::geometry::PixelRect;
use crate::io;

/// Coverage value of a pixel that belongs to the region.
pub const COVERED: u8 = 255;

/// One horizontal run of covered pixels, `x0..=x1` on row `y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub y: u32,
    pub x0: u32,
    pub x1: u32,
}

/// A flood-filled region: single-channel coverage cropped to its bounding box.
#[derive(Clone, Debug)]
pub struct Mask {
    rect: PixelRect,
    coverage: GrayImage,
}

impl Mask {
    /// `coverage` must be exactly `rect.width × rect.height`.
    pub fn new(rect: PixelRect, coverage: GrayImage) -> Result<Self> {
        if coverage.dimensions() != (rect.width, rect.height) {
            return Err(CanvasError::InvalidFormat(format!(
                "coverage {}×{} does not match rect {}×{}",
                coverage.width(),
                coverage.height(),
                rect.width,
                rect.height
            )));
        }
        Ok(Self { rect, coverage })
    }

    /// Build a tight mask from the spans of a fill. `None` for no spans.
    pub fn from_spans(spans: &[Span]) -> Option<Self> {
        let first = spans.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x0, first.y, first.x1, first.y);
        for s in &spans[1..] {
            min_x = min_x.min(s.x0);
            max_x = max_x.max(s.x1);
            min_y = min_y.min(s.y);
            max_y = max_y.max(s.y);
        }
        let rect = PixelRect::from_inclusive(min_x, min_y, max_x, max_y);
        let mut coverage = GrayImage::new(rect.width, rect.height);
        let row = rect.width as usize;
        let raw: &mut [u8] = &mut coverage;
        for s in spans {
            let start = (s.y - rect.y) as usize * row + (s.x0 - rect.x) as usize;
            let len = (s.x1 - s.x0 + 1) as usize;
            raw[start..start + len].fill(COVERED);
        }
        Some(Self { rect, coverage })
    }

    /// Crop a full-canvas coverage buffer (`width` bytes per row) to `rect`.
    pub fn crop_from_full(full: &[u8], width: u32, rect: PixelRect) -> Self {
        let mut coverage = GrayImage::new(rect.width, rect.height);
        let row = rect.width as usize;
        let raw: &mut [u8] = &mut coverage;
        for ly in 0..rect.height as usize {
            let src = (rect.y as usize + ly) * width as usize + rect.x as usize;
            raw[ly * row..(ly + 1) * row].copy_from_slice(&full[src..src + row]);
        }
        Self { rect, coverage }
    }

    pub fn rect(&self) -> PixelRect {
        self.rect
    }

    pub fn coverage(&self) -> &GrayImage {
        &self.coverage
    }

    /// Coverage test in canvas pixel coordinates.
    #[inline]
    pub fn covers(&self, x: u32, y: u32) -> bool {
        self.rect.contains(x, y)
            && self.coverage.get_pixel(x - self.rect.x, y - self.rect.y)[0] == COVERED
    }

    pub fn covered_pixels(&self) -> usize {
        self.coverage.as_raw().iter().filter(|&&v| v == COVERED).count()
    }

    /// Raw (uncompressed) coverage size in bytes.
    pub fn raw_bytes(&self) -> usize {
        self.rect.area()
    }

    /// Lossless PNG compression of the coverage.
    pub fn compress(&self) -> Result<CompressedMask> {
        let png = io::encode_gray_png(&self.coverage)?;
        Ok(CompressedMask {
            rect: self.rect,
            png,
        })
    }
}

/// A mask whose coverage is stored as PNG bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressedMask {
    rect: PixelRect,
    png: Vec<u8>,
}

impl CompressedMask {
    pub fn rect(&self) -> PixelRect {
        self.rect
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.rect.contains(x, y)
    }

    pub fn squared_distance_from_origin(&self, x: u32, y: u32) -> f32 {
        self.rect.squared_distance_from_origin(x, y)
    }

    pub fn byte_len(&self) -> usize {
        self.png.len()
    }

    pub fn decompress(&self) -> Result<Mask> {
        let coverage = io::decode_gray_png(&self.png)?;
        Mask::new(self.rect, coverage)
    }
}
