use serde::{Deserialize, Serialize};

/// A point in canvas space.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Integer pixel containing this point (floor).
    pub fn to_pixel(self) -> (i64, i64) {
        (self.x.floor() as i64, self.y.floor() as i64)
    }
}

/// Floating point rectangle used for invalidation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectF {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl RectF {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Square of half-extent `half` centred on `p`.
    pub fn around(p: Point, half: f32) -> Self {
        Self::new(p.x - half, p.y - half, p.x + half, p.y + half)
    }

    pub fn union(self, other: RectF) -> RectF {
        RectF {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    /// Smallest pixel rect covering this rect, clamped to `width × height`.
    /// `None` when nothing of it lies on the surface.
    pub fn to_pixel_rect(&self, width: u32, height: u32) -> Option<PixelRect> {
        let x0 = self.min_x.floor().max(0.0) as i64;
        let y0 = self.min_y.floor().max(0.0) as i64;
        let x1 = (self.max_x.ceil() as i64).min(width as i64);
        let y1 = (self.max_y.ceil() as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Integer rectangle in device pixels. Containment is half-open:
/// `x <= px < x + width`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rect spanning the inclusive pixel bounds `(min_x, min_y)..=(max_x, max_y)`.
    pub fn from_inclusive(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            None
        } else {
            Some(PixelRect::new(x0, y0, x1 - x0, y1 - y0))
        }
    }

    pub fn union(&self, other: &PixelRect) -> PixelRect {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Squared distance from the rect origin to `(x, y)`.
    pub fn squared_distance_from_origin(&self, x: u32, y: u32) -> f32 {
        let dx = x as f32 - self.x as f32;
        let dy = y as f32 - self.y as f32;
        dx * dx + dy * dy
    }
}
