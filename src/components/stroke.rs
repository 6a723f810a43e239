use image::Rgba;

use crate::canvas::TiledImage;
use crate::geometry::{PixelRect, Point, RectF};
use crate::masks::Mask;
use crate::ops::raster;

/// Points closer than this to the previous accepted point are dropped.
pub const MIN_POINT_DISTANCE: f32 = 1.0;

/// Extra padding around each point in the running update rect.
pub const BOUNDS_MARGIN: f32 = 4.0;

/// Identity of a stroke within one session, issued in increasing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StrokeId(pub u64);

/// Monotonic stroke id source owned by the session.
#[derive(Debug, Default)]
pub struct StrokeIds {
    next: u64,
}

impl StrokeIds {
    pub fn next_id(&mut self) -> StrokeId {
        self.next += 1;
        StrokeId(self.next)
    }
}

/// How strokes are rasterized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Pen,
    /// One small red square per point, for inspecting sampling density.
    DebugDots,
}

// ============================================================================
// STROKE
// ============================================================================

/// An ordered polyline with style. Drawn incrementally while live, replayed
/// in full on history redraws.
#[derive(Clone, Debug)]
pub struct Stroke {
    id: StrokeId,
    color: Rgba<u8>,
    width: f32,
    points: Vec<Point>,
    /// Count of points already composited.
    last_drawn: usize,
    bounds: RectF,
}

impl Stroke {
    pub fn new(id: StrokeId, color: Rgba<u8>, width: f32, first: Point) -> Self {
        let width = width.max(0.0);
        Self {
            id,
            color,
            width,
            points: vec![first],
            last_drawn: 0,
            bounds: RectF::around(first, width * 0.5 + BOUNDS_MARGIN),
        }
    }

    pub fn id(&self) -> StrokeId {
        self.id
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// The pointer-down position; clip masks are resolved here.
    pub fn seed(&self) -> Point {
        self.points[0]
    }

    pub fn bounds(&self) -> RectF {
        self.bounds
    }

    pub fn has_undrawn_points(&self) -> bool {
        self.last_drawn < self.points.len()
    }

    /// Append `p` unless it is within [`MIN_POINT_DISTANCE`] of the last point.
    pub fn add_point(&mut self, p: Point) -> bool {
        let last = self.points[self.points.len() - 1];
        if last.distance_to(p) < MIN_POINT_DISTANCE {
            return false;
        }
        self.points.push(p);
        self.bounds = self.bounds.union(self.padded(p));
        true
    }

    fn padded(&self, p: Point) -> RectF {
        RectF::around(p, self.width * 0.5 + BOUNDS_MARGIN)
    }

    /// Composite the points added since the last call.
    ///
    /// Returns the rect to invalidate, or `None` when nothing new was drawn.
    pub fn draw_incremental(
        &mut self,
        surface: &mut TiledImage,
        clip: Option<&Mask>,
        mode: RenderMode,
    ) -> Option<RectF> {
        if !self.has_undrawn_points() {
            return None;
        }
        let from = self.last_drawn;
        self.paint(surface, from, clip, mode);
        self.last_drawn = self.points.len();

        let start = from.saturating_sub(1);
        self.points[start..]
            .iter()
            .map(|&p| self.padded(p))
            .reduce(RectF::union)
    }

    /// Composite every point, ignoring what was drawn before.
    pub fn draw_full(
        &self,
        surface: &mut TiledImage,
        clip: Option<&Mask>,
        mode: RenderMode,
    ) -> Option<PixelRect> {
        self.paint(surface, 0, clip, mode)
    }

    fn paint(
        &self,
        surface: &mut TiledImage,
        from: usize,
        clip: Option<&Mask>,
        mode: RenderMode,
    ) -> Option<PixelRect> {
        match mode {
            RenderMode::Pen => {
                raster::draw_polyline(surface, &self.points, from, self.width, self.color, clip)
            }
            RenderMode::DebugDots => raster::draw_debug_dots(surface, &self.points[from..], clip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([200, 10, 10, 255]);

    fn stroke(width: f32) -> Stroke {
        Stroke::new(StrokeId(1), RED, width, Point::new(10.0, 10.0))
    }

    #[test]
    fn jitter_below_one_unit_is_dropped() {
        let mut s = stroke(2.0);
        assert!(!s.add_point(Point::new(10.5, 10.5)));
        assert!(s.add_point(Point::new(11.0, 10.0)));
        assert!(!s.add_point(Point::new(11.0, 10.99)));
        assert_eq!(s.points().len(), 2);
    }

    #[test]
    fn bounds_grow_by_half_width_plus_margin() {
        let mut s = stroke(6.0);
        assert_eq!(s.bounds(), RectF::new(3.0, 3.0, 17.0, 17.0));
        s.add_point(Point::new(30.0, 10.0));
        assert_eq!(s.bounds(), RectF::new(3.0, 3.0, 37.0, 17.0));
    }

    #[test]
    fn incremental_draw_is_idempotent() {
        let mut surface = TiledImage::new(64, 64);
        let mut s = stroke(3.0);
        assert!(s.draw_incremental(&mut surface, None, RenderMode::Pen).is_some());
        assert!(s.draw_incremental(&mut surface, None, RenderMode::Pen).is_none());

        s.add_point(Point::new(20.0, 12.0));
        let update = s.draw_incremental(&mut surface, None, RenderMode::Pen).unwrap();
        // covers the new segment from its previous endpoint
        assert!(update.min_x <= 10.0 - 1.5 && update.max_x >= 20.0 + 1.5);
        assert!(!s.has_undrawn_points());
    }

    #[test]
    fn incremental_and_full_draws_agree() {
        let mut s = stroke(4.0);
        let mut live = TiledImage::new(64, 64);
        s.draw_incremental(&mut live, None, RenderMode::Pen);
        for p in [(18.0, 14.0), (25.0, 30.0), (40.0, 33.0)] {
            s.add_point(Point::new(p.0, p.1));
            s.draw_incremental(&mut live, None, RenderMode::Pen);
        }
        let mut replay = TiledImage::new(64, 64);
        s.draw_full(&mut replay, None, RenderMode::Pen);
        assert!(live.same_pixels(&replay));
    }

    #[test]
    fn debug_mode_draws_dots_only() {
        let mut s = stroke(8.0);
        s.add_point(Point::new(30.0, 10.0));
        let mut surface = TiledImage::new(64, 64);
        s.draw_full(&mut surface, None, RenderMode::DebugDots);
        let painted = surface.to_rgba_image().pixels().filter(|p| p[3] != 0).count();
        assert_eq!(painted, 8);
        assert_eq!(*surface.get_pixel(20, 10), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn ids_increase() {
        let mut ids = StrokeIds::default();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(b > a);
    }
}
