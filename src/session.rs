use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use uuid::Uuid;

use crate::bitmap::Bitmap;
use crate::canvas::{TiledImage, blend_over};
use crate::components::history::StrokeHistory;
use crate::components::resolver::{MaskResolution, MaskResolver};
use crate::components::stroke::{Stroke, StrokeIds};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::geometry::{PixelRect, Point};
use crate::io;
use crate::masks::Mask;
use crate::masks::store::MaskStore;
use crate::{log_err, log_info};

/// Background colour under the strokes in [`ColoringSession::composite`].
pub const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);

pub const DEFAULT_STROKE_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const DEFAULT_STROKE_WIDTH: f32 = 10.0;

enum Clip {
    Resolving,
    Ready(Mask),
}

/// The stroke between pointer-down and pointer-up.
struct ActiveStroke {
    stroke: Stroke,
    /// Surface as it was at pointer-down; restored on cancel.
    snapshot: TiledImage,
    /// Redo strokes cleared by this stroke; restored on cancel.
    parked_redo: Vec<Stroke>,
    clip: Clip,
    /// Points received before they may be drawn.
    pending: Vec<Point>,
    /// Nothing is drawn before this instant.
    hold_until: Instant,
}

// ============================================================================
// COLORING SESSION
// ============================================================================

/// One line-art image being coloured: pointer events in, pixels out.
///
/// All methods run on the foreground thread. The only background work is
/// mask resolution, which returns data and never touches the surface.
pub struct ColoringSession {
    id: Uuid,
    config: SessionConfig,
    store: Arc<MaskStore>,
    surface: TiledImage,
    history: StrokeHistory,
    resolver: MaskResolver,
    ids: StrokeIds,
    active: Option<ActiveStroke>,
    color: Rgba<u8>,
    width: f32,
    layer_visible: bool,
    dirty: Option<PixelRect>,
}

impl ColoringSession {
    pub fn new(store: Arc<MaskStore>, config: SessionConfig) -> Self {
        let id = Uuid::new_v4();
        let surface = TiledImage::new(store.width(), store.height());
        let history = StrokeHistory::new(config.compaction.policy(), config.render_mode());
        log_info!(
            "Session {} started: {}×{}, {} masks ({}), compaction {}",
            id,
            store.width(),
            store.height(),
            store.len(),
            store.mode().name(),
            config.compaction.to_setting()
        );
        Self {
            id,
            resolver: MaskResolver::new(Arc::clone(&store)),
            store,
            surface,
            history,
            config,
            ids: StrokeIds::default(),
            active: None,
            color: DEFAULT_STROKE_COLOR,
            width: DEFAULT_STROKE_WIDTH,
            layer_visible: true,
            dirty: None,
        }
    }

    /// Build the mask store synchronously and start a session over it.
    pub fn open(bitmap: Bitmap, config: SessionConfig) -> Self {
        let store = MaskStore::new(Arc::new(bitmap), config.mask_mode, config.store_options());
        Self::new(Arc::new(store), config)
    }

    // ---- accessors -------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MaskStore> {
        &self.store
    }

    pub fn surface(&self) -> &TiledImage {
        &self.surface
    }

    pub fn history(&self) -> &StrokeHistory {
        &self.history
    }

    pub fn is_drawing(&self) -> bool {
        self.active.is_some()
    }

    /// True while the active stroke still waits for its clip mask.
    pub fn is_resolving(&self) -> bool {
        matches!(self.active.as_ref().map(|a| &a.clip), Some(Clip::Resolving))
    }

    // ---- style -------------------------------------------------------------------

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    /// Applies to strokes started after this call.
    pub fn set_color(&mut self, color: Rgba<u8>) {
        self.color = color;
    }

    pub fn stroke_width(&self) -> f32 {
        self.width
    }

    pub fn set_stroke_width(&mut self, width: f32) {
        self.width = width.max(0.0);
    }

    pub fn layer_visible(&self) -> bool {
        self.layer_visible
    }

    /// Show or hide the line art in [`composite`](Self::composite).
    pub fn set_layer_visible(&mut self, visible: bool) {
        if self.layer_visible != visible {
            self.layer_visible = visible;
            self.mark_all_dirty();
        }
    }

    // ---- pointer events --------------------------------------------------------

    pub fn pointer_down(&mut self, point: Point, is_stylus: bool, now: Instant) {
        if self.active.is_some() {
            self.finish_stroke(now);
        }

        let parked_redo = self.history.begin_stroke();
        let id = self.ids.next_id();
        self.resolver.request(id, point);
        self.active = Some(ActiveStroke {
            stroke: Stroke::new(id, self.color, self.width, point),
            snapshot: self.surface.clone(),
            parked_redo,
            clip: Clip::Resolving,
            pending: Vec::new(),
            hold_until: now + self.config.cancel_delay(is_stylus),
        });
    }

    /// `points` may hold coalesced sub-samples, oldest first.
    pub fn pointer_move(&mut self, points: &[Point], now: Instant) {
        let Some(active) = self.active.as_mut() else { return };
        active.pending.extend_from_slice(points);
        self.poll(now);
    }

    pub fn pointer_up(&mut self, now: Instant) {
        if self.active.is_none() {
            return;
        }
        self.apply_pending_resolution();
        self.finish_stroke(now);
    }

    /// Discard the active stroke as if it had never started.
    pub fn pointer_cancel(&mut self) {
        let Some(active) = self.active.take() else { return };
        self.resolver.cancel();
        self.surface = active.snapshot;
        self.history.restore_redo(active.parked_redo);
        if let Some(r) = active
            .stroke
            .bounds()
            .to_pixel_rect(self.surface.width(), self.surface.height())
        {
            self.mark_dirty(r);
        }
    }

    /// Pick up a finished mask resolution and draw whatever may be drawn.
    /// Call once per frame while a stroke is active.
    pub fn poll(&mut self, now: Instant) {
        self.apply_pending_resolution();
        self.flush(now, false);
    }

    /// Block up to `timeout` for the active stroke's clip mask, then poll.
    /// Returns `false` if the mask is still outstanding.
    pub fn wait_for_resolution(&mut self, timeout: Duration, now: Instant) -> bool {
        if self.is_resolving()
            && let Some(resolution) = self.resolver.wait(timeout)
        {
            self.apply(resolution);
        }
        self.flush(now, false);
        !self.is_resolving()
    }

    fn apply_pending_resolution(&mut self) {
        if !self.is_resolving() {
            return;
        }
        if let Some(resolution) = self.resolver.poll() {
            self.apply(resolution);
        }
    }

    fn apply(&mut self, resolution: MaskResolution) {
        let Some(active) = self.active.as_mut() else { return };
        if resolution.stroke != active.stroke.id() {
            log_info!("Ignoring mask for stroke {:?}", resolution.stroke);
            return;
        }
        match resolution.mask {
            Some(mask) => active.clip = Clip::Ready(mask),
            None => self.abandon(),
        }
    }

    /// Drop the active stroke without committing it.
    fn abandon(&mut self) {
        let Some(active) = self.active.take() else { return };
        log_info!(
            "Session {}: no region under {:?}, stroke {:?} abandoned",
            self.id,
            active.stroke.seed(),
            active.stroke.id()
        );
        self.resolver.cancel();
        self.surface = active.snapshot;
    }

    /// Move buffered points into the stroke and composite them. Without
    /// `force`, waits for the clip mask and the cancellation delay.
    fn flush(&mut self, now: Instant, force: bool) {
        let mode = self.history.render_mode();
        let update = match self.active.as_mut() {
            Some(active) => match &active.clip {
                Clip::Ready(mask) if force || now >= active.hold_until => {
                    for p in active.pending.drain(..) {
                        active.stroke.add_point(p);
                    }
                    active.stroke.draw_incremental(&mut self.surface, Some(mask), mode)
                }
                _ => None,
            },
            None => None,
        };
        if let Some(r) = update.and_then(|u| u.to_pixel_rect(self.surface.width(), self.surface.height())) {
            self.mark_dirty(r);
        }
    }

    /// Resolve, draw and commit the active stroke.
    fn finish_stroke(&mut self, now: Instant) {
        if self.is_resolving() {
            // Still waiting: resolve here so the surface matches history
            self.resolver.cancel();
            let Some(seed) = self.active.as_ref().map(|a| a.stroke.seed()) else { return };
            match self.resolver.resolve_now(seed) {
                Some(mask) => {
                    if let Some(active) = self.active.as_mut() {
                        active.clip = Clip::Ready(mask);
                    }
                }
                None => {
                    self.abandon();
                    return;
                }
            }
        }

        self.flush(now, true);
        let Some(active) = self.active.take() else { return };
        self.history.commit(active.stroke);
        if let Err(e) = self.history.compact(&self.surface, &self.store) {
            log_err!("Session {}: compaction failed, history kept: {}", self.id, e);
        }
    }

    // ---- control surface -------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        self.pointer_cancel();
        if !self.history.undo() {
            return false;
        }
        self.redraw();
        true
    }

    pub fn redo(&mut self) -> bool {
        self.pointer_cancel();
        if !self.history.redo() {
            return false;
        }
        self.redraw();
        true
    }

    pub fn clear(&mut self) {
        self.pointer_cancel();
        self.history.clear();
        self.surface.clear();
        self.mark_all_dirty();
    }

    fn redraw(&mut self) {
        if let Err(e) = self.history.redraw(&mut self.surface, &self.store) {
            log_err!("Session {}: redraw failed: {}", self.id, e);
        }
        self.mark_all_dirty();
    }

    // ---- output ------------------------------------------------------------------

    fn mark_dirty(&mut self, rect: PixelRect) {
        self.dirty = Some(match self.dirty {
            Some(d) => d.union(&rect),
            None => rect,
        });
    }

    fn mark_all_dirty(&mut self) {
        self.dirty = Some(self.surface.bounds());
    }

    /// Area changed since the last call.
    pub fn take_dirty(&mut self) -> Option<PixelRect> {
        self.dirty.take()
    }

    /// Paper, then strokes, then line art when the layer is visible.
    pub fn composite(&self) -> RgbaImage {
        let bitmap = self.store.bitmap();
        let mut out = RgbaImage::from_pixel(self.surface.width(), self.surface.height(), PAPER);
        for (x, y, px) in out.enumerate_pixels_mut() {
            let mut c = blend_over(*px, *self.surface.get_pixel(x, y));
            if self.layer_visible {
                c = blend_over(c, bitmap.pixel(x, y));
            }
            *px = c;
        }
        out
    }

    /// The stroke layer as PNG bytes.
    pub fn export_png(&self) -> Result<Vec<u8>> {
        io::encode_rgba_png(&self.surface.to_rgba_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::store::MaskMode;

    /// 40×20, split by a vertical line at x = 20.
    fn two_rooms() -> Bitmap {
        let mut img = RgbaImage::new(40, 20);
        for y in 0..20 {
            img.put_pixel(20, y, Rgba([0, 0, 0, 255]));
        }
        Bitmap::from_rgba_image(&img).unwrap()
    }

    fn session() -> ColoringSession {
        let mut s = ColoringSession::open(two_rooms(), SessionConfig::default());
        s.set_stroke_width(4.0);
        s.set_color(Rgba([0, 0, 255, 255]));
        s
    }

    #[test]
    fn stroke_is_clipped_to_its_region() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(10.0, 10.0), false, t0);
        assert!(s.wait_for_resolution(Duration::from_secs(5), t0));
        s.pointer_move(&[Point::new(30.0, 10.0)], t0 + Duration::from_millis(200));
        s.pointer_up(t0 + Duration::from_millis(250));

        assert_eq!(s.history().committed().len(), 1);
        assert_eq!(s.surface().get_pixel(19, 10)[3], 255);
        assert_eq!(s.surface().get_pixel(20, 10)[3], 0);
        assert_eq!(s.surface().get_pixel(25, 10)[3], 0);
    }

    #[test]
    fn nothing_is_drawn_during_cancellation_delay() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(5.0, 5.0), false, t0);
        s.wait_for_resolution(Duration::from_secs(5), t0);
        s.pointer_move(&[Point::new(8.0, 5.0)], t0 + Duration::from_millis(10));
        assert_eq!(s.surface().chunk_count(), 0);
        s.poll(t0 + Duration::from_millis(150));
        assert!(s.surface().chunk_count() > 0);
        assert!(s.take_dirty().is_some());
    }

    #[test]
    fn cancel_restores_surface_and_redo() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(5.0, 5.0), true, t0);
        s.pointer_up(t0);
        s.undo();
        assert!(s.can_redo());
        let before = s.surface().clone();

        s.pointer_down(Point::new(6.0, 6.0), true, t0);
        s.wait_for_resolution(Duration::from_secs(5), t0);
        s.pointer_move(&[Point::new(15.0, 6.0)], t0 + Duration::from_millis(100));
        assert!(!s.surface().same_pixels(&before));
        s.pointer_cancel();

        assert!(s.surface().same_pixels(&before));
        assert!(s.can_redo());
        assert!(!s.can_undo());
    }

    #[test]
    fn tap_on_line_art_is_abandoned() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(20.5, 3.0), false, t0);
        s.wait_for_resolution(Duration::from_secs(5), t0);
        assert!(!s.is_drawing());
        s.pointer_up(t0);
        assert!(!s.can_undo());
    }

    #[test]
    fn pointer_up_before_resolution_still_commits() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(30.0, 10.0), false, t0);
        s.pointer_move(&[Point::new(35.0, 12.0)], t0);
        s.pointer_up(t0);
        assert_eq!(s.history().committed()[0].points().len(), 2);
        assert_eq!(s.surface().get_pixel(35, 12)[3], 255);
    }

    #[test]
    fn pointer_down_during_a_stroke_commits_it() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(5.0, 5.0), false, t0);
        s.wait_for_resolution(Duration::from_secs(5), t0);
        s.pointer_move(&[Point::new(12.0, 5.0)], t0 + Duration::from_millis(20));

        s.pointer_down(Point::new(30.0, 10.0), false, t0 + Duration::from_millis(30));
        assert!(s.is_drawing());
        assert_eq!(s.history().committed().len(), 1);
        assert_eq!(s.history().committed()[0].points().len(), 2);
        // buffered points of the first stroke were drawn on commit
        assert_eq!(s.surface().get_pixel(12, 5)[3], 255);

        s.pointer_up(t0 + Duration::from_millis(40));
        assert_eq!(s.history().committed().len(), 2);
        assert_eq!(s.surface().get_pixel(30, 10)[3], 255);
    }

    #[test]
    fn undo_redo_and_clear_cancel_the_active_stroke() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(5.0, 5.0), false, t0);
        s.pointer_up(t0);
        let first = s.history().committed()[0].id();

        // undo drops the half-drawn stroke, then undoes the committed one
        s.pointer_down(Point::new(30.0, 10.0), false, t0);
        s.wait_for_resolution(Duration::from_secs(5), t0);
        s.pointer_move(&[Point::new(35.0, 10.0)], t0 + Duration::from_millis(200));
        assert_eq!(s.surface().get_pixel(35, 10)[3], 255);
        assert!(s.undo());
        assert!(!s.is_drawing());
        assert!(s.history().committed().is_empty());
        let redo: Vec<_> = s.history().redo_strokes().iter().map(|st| st.id()).collect();
        assert_eq!(redo, vec![first]);
        assert_eq!(s.surface().get_pixel(35, 10)[3], 0);
        assert_eq!(s.surface().get_pixel(5, 5)[3], 0);

        // pointer-down parks the redo stack; redo cancels and restores it first
        s.pointer_down(Point::new(30.0, 10.0), false, t0);
        assert!(!s.can_redo());
        assert!(s.redo());
        assert!(!s.is_drawing());
        assert_eq!(s.history().committed()[0].id(), first);
        assert_eq!(s.surface().get_pixel(5, 5)[3], 255);

        s.pointer_down(Point::new(30.0, 10.0), false, t0);
        s.clear();
        assert!(!s.is_drawing());
        assert!(!s.can_undo() && !s.can_redo());
        assert_eq!(s.surface().chunk_count(), 0);

        // no late resolution brings the cancelled stroke back
        s.poll(t0 + Duration::from_secs(1));
        assert!(s.history().committed().is_empty());
        assert_eq!(s.surface().chunk_count(), 0);
    }

    #[test]
    fn composite_layers_paper_strokes_and_line_art() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(19.0, 10.0), false, t0);
        s.pointer_up(t0);

        let img = s.composite();
        assert_eq!(*img.get_pixel(0, 0), PAPER);
        assert_eq!(*img.get_pixel(19, 10), Rgba([0, 0, 255, 255]));
        assert_eq!(*img.get_pixel(20, 10), Rgba([0, 0, 0, 255]));

        s.set_layer_visible(false);
        assert_eq!(*s.composite().get_pixel(20, 10), PAPER);
        assert_eq!(s.take_dirty(), Some(PixelRect::new(0, 0, 40, 20)));
    }

    #[test]
    fn export_is_a_png_of_the_stroke_layer() {
        let mut s = session();
        let t0 = Instant::now();
        s.pointer_down(Point::new(3.0, 3.0), false, t0);
        s.pointer_up(t0);
        let png = s.export_png().unwrap();
        let back = io::decode_rgba_png(&png).unwrap();
        assert_eq!(back.as_raw(), s.surface().to_rgba_image().as_raw());
    }

    #[test]
    fn on_demand_session_flattens_after_eight() {
        let mut s = ColoringSession::open(two_rooms(), SessionConfig::for_mode(MaskMode::OnDemand));
        let t0 = Instant::now();
        for i in 0..9 {
            s.pointer_down(Point::new(2.0 + i as f32, 2.0), false, t0);
            s.pointer_up(t0);
        }
        assert!(!s.can_undo());
        assert!(s.history().base().is_some());
    }
}
