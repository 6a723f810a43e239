//! Region extraction: the maximal 4-connected run of non-boundary pixels
//! reachable from a seed.
//!
//! Three interchangeable strategies produce bit-identical coverage:
//!
//! * [`FillStrategy::Scanline`]: span filling with an explicit stack. Each
//!   popped seed is extended left and right along its row, the whole span is
//!   marked in one pass, and at most one new seed is pushed per contiguous
//!   fillable run above and below. This is the runtime default.
//! * [`FillStrategy::Queue`]: breadth-first over single pixels. Safe, but
//!   pixels are enqueued repeatedly and only rejected when dequeued.
//! * [`FillStrategy::Recursive`]: depth-first recursion. Stack depth grows
//!   with region size and WILL overflow the thread stack on large regions.
//!   Reference/testing only; never select it for real images.
//!
//! [`burn_region`] is the precomputation variant: it fills against a private
//! working copy and burns every visited pixel to the boundary alpha, so a
//! row-major scan over that copy never rediscovers a region.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::bitmap::{Bitmap, WorkingBitmap};
use crate::geometry::PixelRect;
use crate::masks::{COVERED, Mask, Span};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillStrategy {
    /// Span/stack scanline fill (fast).
    #[default]
    Scanline,
    /// Breadth-first queue fill (safe, slow).
    Queue,
    /// Depth-first recursive fill (unsafe on large regions).
    Recursive,
}

impl FillStrategy {
    pub fn all() -> &'static [FillStrategy] {
        &[FillStrategy::Scanline, FillStrategy::Queue, FillStrategy::Recursive]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FillStrategy::Scanline => "scanline",
            FillStrategy::Queue => "queue",
            FillStrategy::Recursive => "recursive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "scanline" | "span" => Some(FillStrategy::Scanline),
            "queue" | "bfs" => Some(FillStrategy::Queue),
            "recursive" | "dfs" => Some(FillStrategy::Recursive),
            _ => None,
        }
    }
}

/// Running bounding box of marked pixels.
#[derive(Default)]
struct Bounds {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    any: bool,
}

impl Bounds {
    #[inline(always)]
    fn include_span(&mut self, y: u32, x0: u32, x1: u32) {
        if !self.any {
            *self = Bounds { min_x: x0, min_y: y, max_x: x1, max_y: y, any: true };
            return;
        }
        self.min_x = self.min_x.min(x0);
        self.max_x = self.max_x.max(x1);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
    }

    #[inline(always)]
    fn include(&mut self, x: u32, y: u32) {
        self.include_span(y, x, x);
    }

    fn rect(&self) -> Option<PixelRect> {
        self.any
            .then(|| PixelRect::from_inclusive(self.min_x, self.min_y, self.max_x, self.max_y))
    }
}

/// Extract the region containing `(x, y)` without modifying `bitmap`.
///
/// Returns `None` when the seed is out of bounds or on a boundary pixel.
pub fn extract(bitmap: &Bitmap, x: i64, y: i64, strategy: FillStrategy) -> Option<Mask> {
    if !bitmap.in_bounds(x, y) || bitmap.is_boundary(x as u32, y as u32) {
        return None;
    }
    let width = bitmap.width();
    let mut visited = vec![0u8; width as usize * bitmap.height() as usize];
    let mut bounds = Bounds::default();

    match strategy {
        FillStrategy::Scanline => fill_scanline(bitmap, x as u32, y as u32, &mut visited, &mut bounds),
        FillStrategy::Queue => fill_queue(bitmap, x, y, &mut visited, &mut bounds),
        FillStrategy::Recursive => fill_recursive(bitmap, x, y, &mut visited, &mut bounds),
    }

    let rect = bounds.rect()?;
    Some(Mask::crop_from_full(&visited, width, rect))
}

fn fill_recursive(bmp: &Bitmap, x: i64, y: i64, mask: &mut [u8], bounds: &mut Bounds) {
    if !bmp.in_bounds(x, y) {
        return;
    }
    let (xu, yu) = (x as u32, y as u32);
    if bmp.is_boundary(xu, yu) {
        return;
    }
    let idx = yu as usize * bmp.width() as usize + xu as usize;
    if mask[idx] == COVERED {
        return;
    }
    mask[idx] = COVERED;
    bounds.include(xu, yu);

    fill_recursive(bmp, x - 1, y, mask, bounds);
    fill_recursive(bmp, x + 1, y, mask, bounds);
    fill_recursive(bmp, x, y - 1, mask, bounds);
    fill_recursive(bmp, x, y + 1, mask, bounds);
}

fn fill_queue(bmp: &Bitmap, x: i64, y: i64, mask: &mut [u8], bounds: &mut Bounds) {
    let w = bmp.width() as usize;
    let mut queue: VecDeque<(i64, i64)> = VecDeque::new();
    queue.push_back((x, y));

    while let Some((px, py)) = queue.pop_front() {
        if !bmp.in_bounds(px, py) {
            continue;
        }
        let (xu, yu) = (px as u32, py as u32);
        if bmp.is_boundary(xu, yu) {
            continue;
        }
        let idx = yu as usize * w + xu as usize;
        if mask[idx] == COVERED {
            continue;
        }
        mask[idx] = COVERED;
        bounds.include(xu, yu);

        queue.push_back((px - 1, py));
        queue.push_back((px + 1, py));
        queue.push_back((px, py - 1));
        queue.push_back((px, py + 1));
    }
}

fn fill_scanline(bmp: &Bitmap, x: u32, y: u32, mask: &mut [u8], bounds: &mut Bounds) {
    let w = bmp.width();
    let h = bmp.height();
    let wu = w as usize;
    let fillable = |mask: &[u8], x: u32, y: u32| -> bool {
        !bmp.is_boundary(x, y) && mask[y as usize * wu + x as usize] != COVERED
    };

    let mut stack: Vec<(u32, u32)> = Vec::with_capacity(256);
    stack.push((x, y));

    while let Some((sx, sy)) = stack.pop() {
        let mut x1 = sx as i64;
        while x1 >= 0 && fillable(mask, x1 as u32, sy) {
            x1 -= 1;
        }
        x1 += 1;
        let start = x1 as u32;
        let mut cx = start;

        let mut span_above = false;
        let mut span_below = false;

        while cx < w && fillable(mask, cx, sy) {
            mask[sy as usize * wu + cx as usize] = COVERED;

            if sy > 0 {
                let free = fillable(mask, cx, sy - 1);
                if !span_above && free {
                    stack.push((cx, sy - 1));
                    span_above = true;
                } else if span_above && !free {
                    span_above = false;
                }
            }
            if sy + 1 < h {
                let free = fillable(mask, cx, sy + 1);
                if !span_below && free {
                    stack.push((cx, sy + 1));
                    span_below = true;
                } else if span_below && !free {
                    span_below = false;
                }
            }
            cx += 1;
        }

        if cx > start {
            bounds.include_span(sy, start, cx - 1);
        }
    }
}

/// Scanline fill against the working copy, burning every filled pixel.
///
/// Returns the region's tight mask, or `None` if the seed is out of bounds or
/// already burned/boundary.
pub fn burn_region(work: &mut WorkingBitmap, x: u32, y: u32) -> Option<Mask> {
    let w = work.width();
    let h = work.height();
    if x >= w || y >= h || work.is_boundary(x, y) {
        return None;
    }

    let mut spans: Vec<Span> = Vec::new();
    let mut stack: Vec<(u32, u32)> = Vec::with_capacity(256);
    stack.push((x, y));

    while let Some((sx, sy)) = stack.pop() {
        let mut x1 = sx as i64;
        while x1 >= 0 && !work.is_boundary(x1 as u32, sy) {
            x1 -= 1;
        }
        x1 += 1;
        let start = x1 as u32;
        let mut cx = start;

        let mut span_above = false;
        let mut span_below = false;

        while cx < w && !work.is_boundary(cx, sy) {
            work.burn(cx, sy);

            if sy > 0 {
                let free = !work.is_boundary(cx, sy - 1);
                if !span_above && free {
                    stack.push((cx, sy - 1));
                    span_above = true;
                } else if span_above && !free {
                    span_above = false;
                }
            }
            if sy + 1 < h {
                let free = !work.is_boundary(cx, sy + 1);
                if !span_below && free {
                    stack.push((cx, sy + 1));
                    span_below = true;
                } else if span_below && !free {
                    span_below = false;
                }
            }
            cx += 1;
        }

        if cx > start {
            spans.push(Span { y: sy, x0: start, x1: cx - 1 });
        }
    }

    Mask::from_spans(&spans)
}
