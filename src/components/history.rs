use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canvas::TiledImage;
use crate::components::stroke::{RenderMode, Stroke};
use crate::error::{CanvasError, Result};
use crate::io;
use crate::masks::store::{MaskMode, MaskStore};
use crate::{log_info, log_warn};

// ============================================================================
// COMPACTION POLICY
// ============================================================================

/// Decides how much history to flatten into the base image after a commit.
pub trait CompactionPolicy: Send + Sync + fmt::Debug {
    /// Number of oldest committed strokes to flatten, given the committed
    /// count. Zero leaves history alone.
    fn strokes_to_flatten(&self, committed: usize) -> usize;
}

/// Flatten all but the newest `keep` strokes once `threshold` is exceeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShallowCompaction {
    pub threshold: usize,
    pub keep: usize,
}

impl CompactionPolicy for ShallowCompaction {
    fn strokes_to_flatten(&self, committed: usize) -> usize {
        if committed > self.threshold {
            committed - self.keep.min(committed)
        } else {
            0
        }
    }
}

/// Flatten everything once `threshold` is exceeded. Undo depth drops to zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FullFlatten {
    pub threshold: usize,
}

impl CompactionPolicy for FullFlatten {
    fn strokes_to_flatten(&self, committed: usize) -> usize {
        if committed > self.threshold { committed } else { 0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoCompaction;

impl CompactionPolicy for NoCompaction {
    fn strokes_to_flatten(&self, _committed: usize) -> usize {
        0
    }
}

/// Serializable selection of a compaction policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionConfig {
    Shallow { threshold: usize, keep: usize },
    FullFlatten { threshold: usize },
    Disabled,
}

impl CompactionConfig {
    /// Precomputed masks make replays cheap, so keep a long tail of strokes.
    /// On-demand replays re-extract every region, so flatten early and fully.
    pub fn for_mode(mode: MaskMode) -> Self {
        match mode {
            MaskMode::Precomputed => CompactionConfig::Shallow {
                threshold: 100,
                keep: 30,
            },
            MaskMode::OnDemand => CompactionConfig::FullFlatten { threshold: 8 },
        }
    }

    pub fn policy(&self) -> Box<dyn CompactionPolicy> {
        match *self {
            CompactionConfig::Shallow { threshold, keep } => {
                Box::new(ShallowCompaction { threshold, keep })
            }
            CompactionConfig::FullFlatten { threshold } => Box::new(FullFlatten { threshold }),
            CompactionConfig::Disabled => Box::new(NoCompaction),
        }
    }

    /// `shallow:100:30`, `full:8` or `disabled`.
    pub fn to_setting(&self) -> String {
        match self {
            CompactionConfig::Shallow { threshold, keep } => format!("shallow:{threshold}:{keep}"),
            CompactionConfig::FullFlatten { threshold } => format!("full:{threshold}"),
            CompactionConfig::Disabled => "disabled".to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split(':');
        match parts.next()? {
            "shallow" => {
                let threshold = parts.next()?.trim().parse().ok()?;
                let keep = parts.next()?.trim().parse().ok()?;
                Some(CompactionConfig::Shallow { threshold, keep })
            }
            "full" => {
                let threshold = parts.next()?.trim().parse().ok()?;
                Some(CompactionConfig::FullFlatten { threshold })
            }
            "disabled" | "off" => Some(CompactionConfig::Disabled),
            _ => None,
        }
    }
}

// ============================================================================
// BASE IMAGE
// ============================================================================

/// Flattened strokes, held PNG-compressed.
#[derive(Clone)]
pub struct BaseImage {
    width: u32,
    height: u32,
    png: Vec<u8>,
}

impl BaseImage {
    pub fn encode(surface: &TiledImage) -> Result<Self> {
        Ok(Self {
            width: surface.width(),
            height: surface.height(),
            png: io::encode_rgba_png(&surface.to_rgba_image())?,
        })
    }

    pub fn decode(&self) -> Result<TiledImage> {
        let img = io::decode_rgba_png(&self.png)?;
        if img.dimensions() != (self.width, self.height) {
            return Err(CanvasError::InvalidFormat(format!(
                "base image decoded as {}×{}, expected {}×{}",
                img.width(),
                img.height(),
                self.width,
                self.height
            )));
        }
        Ok(TiledImage::from_rgba_image(&img))
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn byte_len(&self) -> usize {
        self.png.len()
    }
}

impl fmt::Debug for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("png_bytes", &self.png.len())
            .finish()
    }
}

// ============================================================================
// STROKE HISTORY
// ============================================================================

/// Committed strokes, redo stack and flattened base image.
///
/// Replaying the base image followed by `committed` in order reproduces the
/// stroke surface exactly.
pub struct StrokeHistory {
    committed: Vec<Stroke>,
    redo: Vec<Stroke>,
    base: Option<BaseImage>,
    policy: Box<dyn CompactionPolicy>,
    render_mode: RenderMode,
}

impl StrokeHistory {
    pub fn new(policy: Box<dyn CompactionPolicy>, render_mode: RenderMode) -> Self {
        Self {
            committed: Vec::new(),
            redo: Vec::new(),
            base: None,
            policy,
            render_mode,
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    pub fn committed(&self) -> &[Stroke] {
        &self.committed
    }

    pub fn redo_strokes(&self) -> &[Stroke] {
        &self.redo
    }

    pub fn base(&self) -> Option<&BaseImage> {
        self.base.as_ref()
    }

    pub fn can_undo(&self) -> bool {
        !self.committed.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// A new stroke invalidates redo. The cleared strokes are handed back so a
    /// cancelled gesture can put them back with [`restore_redo`](Self::restore_redo).
    pub fn begin_stroke(&mut self) -> Vec<Stroke> {
        std::mem::take(&mut self.redo)
    }

    pub fn restore_redo(&mut self, parked: Vec<Stroke>) {
        if self.redo.is_empty() {
            self.redo = parked;
        }
    }

    pub fn commit(&mut self, stroke: Stroke) {
        self.redo.clear();
        self.committed.push(stroke);
    }

    /// Move the newest stroke to the redo stack. The caller redraws.
    pub fn undo(&mut self) -> bool {
        match self.committed.pop() {
            Some(stroke) => {
                self.redo.push(stroke);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.redo.pop() {
            Some(stroke) => {
                self.committed.push(stroke);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.committed.clear();
        self.redo.clear();
        self.base = None;
    }

    /// Rebuild `surface` from the base image and every committed stroke,
    /// re-resolving each stroke's clip mask at its seed.
    ///
    /// On error `surface` is left untouched.
    pub fn redraw(&self, surface: &mut TiledImage, store: &MaskStore) -> Result<()> {
        let mut canvas = self.base_canvas(surface.width(), surface.height())?;
        for stroke in &self.committed {
            self.replay(&mut canvas, stroke, store);
        }
        *surface = canvas;
        Ok(())
    }

    fn base_canvas(&self, width: u32, height: u32) -> Result<TiledImage> {
        match &self.base {
            Some(base) => {
                let canvas = base.decode()?;
                if canvas.width() != width || canvas.height() != height {
                    return Err(CanvasError::InvalidFormat(format!(
                        "base image is {}×{}, surface is {}×{}",
                        canvas.width(),
                        canvas.height(),
                        width,
                        height
                    )));
                }
                Ok(canvas)
            }
            None => Ok(TiledImage::new(width, height)),
        }
    }

    fn replay(&self, canvas: &mut TiledImage, stroke: &Stroke, store: &MaskStore) {
        let (x, y) = stroke.seed().to_pixel();
        match store.mask_at(x, y) {
            Some(mask) => {
                stroke.draw_full(canvas, Some(&mask), self.render_mode);
            }
            None => {
                log_warn!("Redraw: no mask at ({}, {}), skipping stroke {:?}", x, y, stroke.id());
            }
        }
    }

    /// Apply the policy after a commit. `surface` must equal a replay of the
    /// current history. Returns the number of strokes flattened.
    ///
    /// All or nothing: if the base image cannot be encoded, history is unchanged.
    pub fn compact(&mut self, surface: &TiledImage, store: &MaskStore) -> Result<usize> {
        self.compact_with(surface, store, BaseImage::encode)
    }

    fn compact_with<F>(&mut self, surface: &TiledImage, store: &MaskStore, encode: F) -> Result<usize>
    where
        F: FnOnce(&TiledImage) -> Result<BaseImage>,
    {
        let count = self.policy.strokes_to_flatten(self.committed.len()).min(self.committed.len());
        if count == 0 {
            return Ok(0);
        }

        let base = if count == self.committed.len() {
            encode(surface)?
        } else {
            let mut canvas = self.base_canvas(surface.width(), surface.height())?;
            for stroke in &self.committed[..count] {
                self.replay(&mut canvas, stroke, store);
            }
            encode(&canvas)?
        };

        log_info!(
            "Compacted history: flattened {} strokes, kept {}, base image {} bytes",
            count,
            self.committed.len() - count,
            base.byte_len()
        );
        self.committed.drain(..count);
        self.base = Some(base);
        Ok(count)
    }
}

impl fmt::Debug for StrokeHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrokeHistory")
            .field("committed", &self.committed.len())
            .field("redo", &self.redo.len())
            .field("base", &self.base)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::Bitmap;
    use crate::components::stroke::StrokeId;
    use crate::geometry::Point;
    use crate::masks::store::StoreOptions;
    use image::{Rgba, RgbaImage};

    fn open_store() -> MaskStore {
        let bmp = Bitmap::from_rgba_image(&RgbaImage::new(32, 32)).unwrap();
        MaskStore::new(std::sync::Arc::new(bmp), MaskMode::Precomputed, StoreOptions::default())
    }

    fn stroke(id: u64) -> Stroke {
        let y = id as f32 * 3.0 % 30.0;
        let mut s = Stroke::new(StrokeId(id), Rgba([id as u8 * 20, 0, 0, 255]), 2.0, Point::new(1.0, y));
        s.add_point(Point::new(30.0, y + 1.0));
        s
    }

    /// Commit with a live incremental draw, as the session does.
    fn commit_live(h: &mut StrokeHistory, surface: &mut TiledImage, store: &MaskStore, id: u64) {
        let mut s = stroke(id);
        let (x, y) = s.seed().to_pixel();
        let mask = store.mask_at(x, y).unwrap();
        s.draw_incremental(surface, Some(&mask), RenderMode::Pen);
        h.commit(s);
    }

    #[test]
    fn policies_pick_counts() {
        let shallow = ShallowCompaction { threshold: 8, keep: 3 };
        assert_eq!(shallow.strokes_to_flatten(8), 0);
        assert_eq!(shallow.strokes_to_flatten(9), 6);
        let full = FullFlatten { threshold: 8 };
        assert_eq!(full.strokes_to_flatten(9), 9);
        assert_eq!(NoCompaction.strokes_to_flatten(1000), 0);
    }

    #[test]
    fn compaction_config_settings_round_trip() {
        for cfg in [
            CompactionConfig::Shallow { threshold: 100, keep: 30 },
            CompactionConfig::FullFlatten { threshold: 8 },
            CompactionConfig::Disabled,
        ] {
            assert_eq!(CompactionConfig::parse(&cfg.to_setting()), Some(cfg));
        }
        assert_eq!(CompactionConfig::parse("shallow:1"), None);
    }

    #[test]
    fn undo_moves_to_redo_and_commit_clears_it() {
        let mut h = StrokeHistory::new(Box::new(NoCompaction), RenderMode::Pen);
        assert!(!h.undo());
        h.commit(stroke(1));
        h.commit(stroke(2));
        assert!(h.undo());
        assert_eq!(h.redo_strokes().len(), 1);
        assert!(h.redo());
        assert_eq!(h.committed().len(), 2);
        h.undo();
        h.commit(stroke(3));
        assert!(!h.can_redo());
    }

    #[test]
    fn begin_stroke_parks_redo() {
        let mut h = StrokeHistory::new(Box::new(NoCompaction), RenderMode::Pen);
        h.commit(stroke(1));
        h.commit(stroke(2));
        h.undo();
        h.undo();
        let parked = h.begin_stroke();
        assert_eq!(parked.len(), 2);
        assert!(!h.can_redo());
        h.restore_redo(parked);
        assert_eq!(h.redo_strokes().len(), 2);
    }

    #[test]
    fn shallow_compaction_keeps_newest_and_preserves_pixels() {
        let store = open_store();
        let mut h = StrokeHistory::new(
            CompactionConfig::Shallow { threshold: 8, keep: 3 }.policy(),
            RenderMode::Pen,
        );
        let mut surface = TiledImage::new(32, 32);
        for id in 1..=9 {
            commit_live(&mut h, &mut surface, &store, id);
        }
        assert_eq!(h.compact(&surface, &store).unwrap(), 6);
        assert_eq!(h.committed().len(), 3);
        assert_eq!(h.committed()[0].id(), StrokeId(7));
        assert!(h.base().is_some_and(|b| b.byte_len() > 0));

        let mut replay = TiledImage::new(32, 32);
        h.redraw(&mut replay, &store).unwrap();
        assert!(replay.same_pixels(&surface));
    }

    #[test]
    fn full_flatten_empties_history() {
        let store = open_store();
        let mut h = StrokeHistory::new(Box::new(FullFlatten { threshold: 2 }), RenderMode::Pen);
        let mut surface = TiledImage::new(32, 32);
        for id in 1..=3 {
            commit_live(&mut h, &mut surface, &store, id);
        }
        assert_eq!(h.compact(&surface, &store).unwrap(), 3);
        assert!(!h.can_undo());

        let mut replay = TiledImage::new(32, 32);
        h.redraw(&mut replay, &store).unwrap();
        assert!(replay.same_pixels(&surface));
    }

    #[test]
    fn failed_encode_leaves_history_untouched() {
        let store = open_store();
        let mut h = StrokeHistory::new(Box::new(ShallowCompaction { threshold: 1, keep: 1 }), RenderMode::Pen);
        let mut surface = TiledImage::new(32, 32);
        for id in 1..=3 {
            commit_live(&mut h, &mut surface, &store, id);
        }
        let result = h.compact_with(&surface, &store, |_| Err(CanvasError::InvalidFormat("disk full".into())));
        assert!(result.is_err());
        assert_eq!(h.committed().len(), 3);
        assert!(h.base().is_none());
    }

    #[test]
    fn clear_drops_everything() {
        let store = open_store();
        let mut h = StrokeHistory::new(Box::new(FullFlatten { threshold: 0 }), RenderMode::Pen);
        let mut surface = TiledImage::new(32, 32);
        commit_live(&mut h, &mut surface, &store, 1);
        h.compact(&surface, &store).unwrap();
        h.commit(stroke(2));
        h.undo();
        h.clear();
        assert!(!h.can_undo() && !h.can_redo() && h.base().is_none());
    }
}
