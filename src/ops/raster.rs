//! Hard-edged pen rasterizer for the stroke surface.
//!
//! A pixel belongs to a segment when its center lies within `radius` of the
//! segment, so caps and joins are round. Painted pixels are replaced by the
//! pen colour rather than blended: repainting a pixel is idempotent, which
//! keeps a live incremental draw and a full replay pixel-identical.

use image::Rgba;

use crate::canvas::TiledImage;
use crate::geometry::{PixelRect, Point};
use crate::masks::Mask;

/// Side length of a debug dot in pixels.
pub const DEBUG_DOT_SIZE: u32 = 2;

pub const DEBUG_DOT_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Smallest radius that still paints the pixel under a point.
const MIN_RADIUS: f32 = 0.5;

/// Pen radius for a stroke width.
#[inline]
pub fn pen_radius(width: f32) -> f32 {
    (width * 0.5).max(MIN_RADIUS)
}

#[inline]
fn distance_sq_to_segment(px: f32, py: f32, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((px - a.x) * dx + (py - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    (px - cx) * (px - cx) + (py - cy) * (py - cy)
}

/// Pixel bounding box of a segment's capsule, clipped to the surface and mask.
fn segment_box(
    surface: &TiledImage,
    a: Point,
    b: Point,
    radius: f32,
    clip: Option<&Mask>,
) -> Option<PixelRect> {
    let min_x = (a.x.min(b.x) - radius).floor().max(0.0);
    let min_y = (a.y.min(b.y) - radius).floor().max(0.0);
    let max_x = (a.x.max(b.x) + radius).ceil();
    let max_y = (a.y.max(b.y) + radius).ceil();
    if max_x <= min_x || max_y <= min_y || max_x <= 0.0 || max_y <= 0.0 {
        return None;
    }
    let rect = PixelRect::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x) as u32,
        (max_y - min_y) as u32,
    );
    let rect = rect.intersection(&surface.bounds())?;
    match clip {
        Some(mask) => rect.intersection(&mask.rect()),
        None => Some(rect),
    }
}

/// Paint one segment. `a == b` paints a round dot. Returns the touched box.
pub fn draw_segment(
    surface: &mut TiledImage,
    a: Point,
    b: Point,
    width: f32,
    color: Rgba<u8>,
    clip: Option<&Mask>,
) -> Option<PixelRect> {
    let radius = pen_radius(width);
    let rect = segment_box(surface, a, b, radius, clip)?;
    let r_sq = radius * radius;

    let mut touched: Option<PixelRect> = None;
    for y in rect.y..rect.bottom() {
        let cy = y as f32 + 0.5;
        for x in rect.x..rect.right() {
            if distance_sq_to_segment(x as f32 + 0.5, cy, a, b) > r_sq {
                continue;
            }
            if clip.is_some_and(|m| !m.covers(x, y)) {
                continue;
            }
            surface.put_pixel(x, y, color);
            let px = PixelRect::new(x, y, 1, 1);
            touched = Some(touched.map_or(px, |t| t.union(&px)));
        }
    }
    touched
}

/// Paint `points[from..]` as a connected polyline, continuing from
/// `points[from - 1]` when `from > 0`.
pub fn draw_polyline(
    surface: &mut TiledImage,
    points: &[Point],
    from: usize,
    width: f32,
    color: Rgba<u8>,
    clip: Option<&Mask>,
) -> Option<PixelRect> {
    let mut touched: Option<PixelRect> = None;
    for i in from..points.len() {
        let a = if i == 0 { points[0] } else { points[i - 1] };
        if let Some(r) = draw_segment(surface, a, points[i], width, color, clip) {
            touched = Some(touched.map_or(r, |t| t.union(&r)));
        }
    }
    touched
}

/// Debug rendering: a small square dot per point instead of a line.
pub fn draw_debug_dots(
    surface: &mut TiledImage,
    points: &[Point],
    clip: Option<&Mask>,
) -> Option<PixelRect> {
    let mut touched: Option<PixelRect> = None;
    for p in points {
        let (px, py) = p.to_pixel();
        for dy in 0..DEBUG_DOT_SIZE as i64 {
            for dx in 0..DEBUG_DOT_SIZE as i64 {
                let (x, y) = (px + dx, py + dy);
                if x < 0 || y < 0 || x >= surface.width() as i64 || y >= surface.height() as i64 {
                    continue;
                }
                let (x, y) = (x as u32, y as u32);
                if clip.is_some_and(|m| !m.covers(x, y)) {
                    continue;
                }
                surface.put_pixel(x, y, DEBUG_DOT_COLOR);
                let r = PixelRect::new(x, y, 1, 1);
                touched = Some(touched.map_or(r, |t| t.union(&r)));
            }
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::Span;

    const INK: Rgba<u8> = Rgba([0, 128, 255, 255]);

    fn painted(surface: &TiledImage) -> usize {
        let img = surface.to_rgba_image();
        img.pixels().filter(|p| p[3] != 0).count()
    }

    #[test]
    fn dot_is_round_and_centered() {
        let mut s = TiledImage::new(20, 20);
        let p = Point::new(10.0, 10.0);
        let r = draw_segment(&mut s, p, p, 4.0, INK, None).unwrap();
        assert_eq!(r, PixelRect::new(8, 8, 4, 4));
        // corners of the 4×4 box are more than 2px from (10, 10)
        assert_eq!(*s.get_pixel(8, 8), Rgba([0, 0, 0, 0]));
        assert_eq!(*s.get_pixel(9, 9), INK);
        assert_eq!(painted(&s), 12);
    }

    #[test]
    fn thin_pen_still_paints_the_pixel_under_the_point() {
        let mut s = TiledImage::new(5, 5);
        let p = Point::new(2.5, 2.5);
        draw_segment(&mut s, p, p, 0.1, INK, None);
        assert_eq!(painted(&s), 1);
        assert_eq!(*s.get_pixel(2, 2), INK);
    }

    #[test]
    fn mask_clips_coverage() {
        let mut s = TiledImage::new(20, 20);
        let spans: Vec<Span> = (0..20).map(|y| Span { y, x0: 0, x1: 9 }).collect();
        let mask = Mask::from_spans(&spans).unwrap();
        draw_segment(&mut s, Point::new(2.0, 10.0), Point::new(18.0, 10.0), 3.0, INK, Some(&mask));
        let img = s.to_rgba_image();
        assert!(img.enumerate_pixels().all(|(x, _, p)| x < 10 || p[3] == 0));
        assert_eq!(*s.get_pixel(9, 10), INK);
    }

    #[test]
    fn incremental_polyline_matches_full_replay() {
        let pts = [
            Point::new(3.0, 3.0),
            Point::new(12.0, 5.0),
            Point::new(14.0, 16.0),
            Point::new(4.0, 17.5),
        ];
        let mut full = TiledImage::new(24, 24);
        draw_polyline(&mut full, &pts, 0, 3.0, INK, None);

        let mut live = TiledImage::new(24, 24);
        draw_polyline(&mut live, &pts[..1], 0, 3.0, INK, None);
        draw_polyline(&mut live, &pts[..3], 1, 3.0, INK, None);
        draw_polyline(&mut live, &pts, 3, 3.0, INK, None);
        assert!(full.same_pixels(&live));
    }

    #[test]
    fn offscreen_segment_touches_nothing() {
        let mut s = TiledImage::new(10, 10);
        let r = draw_segment(&mut s, Point::new(-20.0, -20.0), Point::new(-15.0, -15.0), 2.0, INK, None);
        assert!(r.is_none());
        assert_eq!(s.chunk_count(), 0);
    }

    #[test]
    fn debug_dots_are_two_by_two() {
        let mut s = TiledImage::new(10, 10);
        let r = draw_debug_dots(&mut s, &[Point::new(4.2, 4.9), Point::new(9.5, 9.5)], None).unwrap();
        assert_eq!(r, PixelRect::new(4, 4, 6, 6));
        assert_eq!(painted(&s), 5);
        assert_eq!(*s.get_pixel(5, 5), DEBUG_DOT_COLOR);
    }
}
