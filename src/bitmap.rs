use image::{Rgba, RgbaImage};

use crate::error::{CanvasError, Result};

/// Bytes per RGBA pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Alpha value marking a line-art (boundary) pixel.
pub const BOUNDARY_ALPHA: u8 = 255;

/// Largest image accepted, in pixels. Stroke surfaces share the limit.
pub const MAX_PIXELS: u64 = 256_000_000;

/// Luminance below which a source pixel counts as ink when preparing line art.
pub const DEFAULT_INK_THRESHOLD: u8 = 128;

/// Read-only RGBA line-art pixels with an explicit row stride.
///
/// A pixel is a *boundary* pixel when its alpha is fully opaque. Flood fills
/// never cross boundary pixels.
#[derive(Clone, Debug)]
pub struct Bitmap {
    width: u32,
    height: u32,
    stride: usize,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// Wrap decoded pixels. `stride` is the real byte length of one row and
    /// may include padding.
    pub fn from_raw(width: u32, height: u32, stride: usize, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CanvasError::InvalidBitmap(format!(
                "empty bitmap {}×{}",
                width, height
            )));
        }
        if width as u64 * height as u64 > MAX_PIXELS {
            return Err(CanvasError::InvalidBitmap(format!(
                "{}×{} exceeds the {} pixel limit",
                width, height, MAX_PIXELS
            )));
        }
        let min_stride = width as usize * BYTES_PER_PIXEL;
        if stride < min_stride {
            return Err(CanvasError::InvalidBitmap(format!(
                "stride {} smaller than {} bytes for width {}",
                stride, min_stride, width
            )));
        }
        // Last row only needs its pixel bytes, not the trailing padding
        let needed = stride * (height as usize - 1) + min_stride;
        if pixels.len() < needed {
            return Err(CanvasError::InvalidBitmap(format!(
                "{} bytes supplied, {} needed",
                pixels.len(),
                needed
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            pixels,
        })
    }

    /// Use an already prepared RGBA image as-is (opaque = line).
    pub fn from_rgba_image(image: &RgbaImage) -> Result<Self> {
        let (w, h) = image.dimensions();
        Self::from_raw(w, h, w as usize * BYTES_PER_PIXEL, image.as_raw().clone())
    }

    /// Turn an arbitrary drawing into colourable line art: dark, visible pixels
    /// become opaque black lines, everything else transparent white.
    pub fn from_line_art(image: &RgbaImage, ink_threshold: u8) -> Result<Self> {
        let (w, h) = image.dimensions();
        let mut out = RgbaImage::new(w, h);
        for (src, dst) in image.pixels().zip(out.pixels_mut()) {
            *dst = if is_ink(*src, ink_threshold) {
                Rgba([0, 0, 0, BOUNDARY_ALPHA])
            } else {
                Rgba([255, 255, 255, 0])
            };
        }
        let raw = out.into_raw();
        Self::from_raw(w, h, w as usize * BYTES_PER_PIXEL, raw)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    #[inline(always)]
    fn offset(&self, x: u32, y: u32) -> usize {
        self.stride * y as usize + BYTES_PER_PIXEL * x as usize
    }

    #[inline(always)]
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.pixels[self.offset(x, y) + 3]
    }

    /// `true` for line-art pixels. Callers must stay in bounds.
    #[inline(always)]
    pub fn is_boundary(&self, x: u32, y: u32) -> bool {
        self.alpha(x, y) == BOUNDARY_ALPHA
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        let o = self.offset(x, y);
        Rgba([
            self.pixels[o],
            self.pixels[o + 1],
            self.pixels[o + 2],
            self.pixels[o + 3],
        ])
    }

    /// Tightly packed copy (stride == width * 4) for display.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let row = self.width as usize * BYTES_PER_PIXEL;
        let mut raw = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * self.stride;
            raw.extend_from_slice(&self.pixels[start..start + row]);
        }
        RgbaImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    /// Private mutable alpha plane used while enumerating regions.
    pub fn working_copy(&self) -> WorkingBitmap {
        let mut alpha = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                alpha.push(self.alpha(x, y));
            }
        }
        WorkingBitmap {
            width: self.width,
            height: self.height,
            alpha,
        }
    }
}

#[inline]
fn is_ink(p: Rgba<u8>, threshold: u8) -> bool {
    if p[3] == 0 {
        return false;
    }
    let [r, g, b, _] = p.0;
    // Rec. 601 luma, integer form
    let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
    luma < threshold as u32
}

/// Mutable alpha plane that precomputation burns discovered regions into.
///
/// Owned exclusively by the mask store while it scans; never exposed.
pub struct WorkingBitmap {
    width: u32,
    height: u32,
    alpha: Vec<u8>,
}

impl WorkingBitmap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline(always)]
    pub fn is_boundary(&self, x: u32, y: u32) -> bool {
        self.alpha[y as usize * self.width as usize + x as usize] == BOUNDARY_ALPHA
    }

    /// Mark a pixel as boundary so later scans skip it.
    #[inline(always)]
    pub fn burn(&mut self, x: u32, y: u32) {
        self.alpha[y as usize * self.width as usize + x as usize] = BOUNDARY_ALPHA;
    }
}
