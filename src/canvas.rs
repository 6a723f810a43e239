use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::bitmap::MAX_PIXELS;
use crate::geometry::PixelRect;
use crate::log_warn;

// ============================================================================
// TILED IMAGE: sparse 64×64 chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Sparse tiled stroke surface backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
///
/// Chunks are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, and mutations via `put_pixel` use `Arc::make_mut`
/// to COW-clone only the touched chunk. A snapshot taken at pointer-down
/// therefore costs one pointer per chunk.
#[derive(Clone)]
pub struct TiledImage {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl TiledImage {
    // ---- construction -------------------------------------------------------

    /// Create an empty (fully transparent) tiled image.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = {
            let total = (width as u64) * (height as u64);
            if total > MAX_PIXELS || width == 0 || height == 0 {
                log_warn!(
                    "TiledImage::new: dimensions {}×{} out of range, clamped to 1×1",
                    width,
                    height
                );
                (1, 1)
            } else {
                (width, height)
            }
        };
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        let total = (chunks_per_row * chunks_per_col) as usize;
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; total],
        }
    }

    /// Import from a flat `RgbaImage`.  Only non-transparent chunks are stored.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let width = src.width();
        let height = src.height();
        let mut img = Self::new(width, height);
        if img.width != width || img.height != height {
            return img;
        }

        let chunks_x = img.chunks_per_row as usize;
        let total_chunks = img.chunks.len();
        let src_raw = src.as_raw();

        let chunk_results: Vec<(usize, Option<Arc<RgbaImage>>)> = (0..total_chunks)
            .into_par_iter()
            .map(|flat| {
                let base_x = (flat % chunks_x) as u32 * CHUNK_SIZE;
                let base_y = (flat / chunks_x) as u32 * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(width - base_x) as usize;
                let ch = CHUNK_SIZE.min(height - base_y);
                let chunk_stride = CHUNK_SIZE as usize * 4;

                let mut chunk = RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE);
                let mut has_content = false;
                {
                    let dst: &mut [u8] = &mut chunk;
                    for ly in 0..ch {
                        let src_start = ((base_y + ly) * width + base_x) as usize * 4;
                        let dst_start = ly as usize * chunk_stride;
                        let row = &src_raw[src_start..src_start + cw * 4];
                        has_content |= row.chunks_exact(4).any(|px| px[3] != 0);
                        dst[dst_start..dst_start + cw * 4].copy_from_slice(row);
                    }
                }
                (flat, has_content.then(|| Arc::new(chunk)))
            })
            .collect();

        for (idx, chunk) in chunk_results {
            img.chunks[idx] = chunk;
        }
        img
    }

    /// Flatten back to a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let out_stride = self.width as usize * 4;
        let out_raw: &mut [u8] = &mut out;
        for (idx, slot) in self.chunks.iter().enumerate() {
            let Some(chunk) = slot else { continue };
            let (cx, cy) = (idx as u32 % self.chunks_per_row, idx as u32 / self.chunks_per_row);
            let base_x = cx * CHUNK_SIZE;
            let base_y = cy * CHUNK_SIZE;
            let cw = CHUNK_SIZE.min(self.width - base_x) as usize;
            let ch = CHUNK_SIZE.min(self.height - base_y) as usize;
            let chunk_raw = chunk.as_raw();
            let chunk_stride = CHUNK_SIZE as usize * 4;
            for ly in 0..ch {
                let src_start = ly * chunk_stride;
                let dst_start = (base_y as usize + ly) * out_stride + base_x as usize * 4;
                out_raw[dst_start..dst_start + cw * 4]
                    .copy_from_slice(&chunk_raw[src_start..src_start + cw * 4]);
            }
        }
        out
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, x: u32, y: u32) -> usize {
        ((y / CHUNK_SIZE) * self.chunks_per_row + x / CHUNK_SIZE) as usize
    }

    #[inline(always)]
    fn local(x: u32, y: u32) -> (u32, u32) {
        (x % CHUNK_SIZE, y % CHUNK_SIZE)
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (returns `&TRANSPARENT_PIXEL` for missing chunks).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        let (lx, ly) = Self::local(x, y);
        self.chunks[self.flat_index(x, y)]
            .as_ref()
            .map(|c| c.get_pixel(lx, ly))
            .unwrap_or(&TRANSPARENT_PIXEL)
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(x, y);
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(lx, ly, pixel);
    }

    // ---- bulk operations ----------------------------------------------------

    /// Drop all chunks (make the image fully transparent).
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Pixel-for-pixel equality, treating missing chunks as transparent.
    pub fn same_pixels(&self, other: &TiledImage) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        self.chunks.iter().zip(&other.chunks).all(|(a, b)| match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.as_raw() == b.as_raw(),
            (Some(c), None) | (None, Some(c)) => c.as_raw().iter().skip(3).step_by(4).all(|&a| a == 0),
        })
    }
}

// ============================================================================
// COMPOSITING
// ============================================================================

/// Source-over blend of straight-alpha `top` onto `base`.
pub fn blend_over(base: Rgba<u8>, top: Rgba<u8>) -> Rgba<u8> {
    if top[3] == 0 {
        return base;
    }
    if top[3] == 255 {
        return top;
    }

    let top_a = top[3] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |i: usize| {
        let t = top[i] as f32 / 255.0;
        let b = base[i] as f32 / 255.0;
        let c = (t * top_a + b * base_a * (1.0 - top_a)) / out_a;
        (c * 255.0).round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
