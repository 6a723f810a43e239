use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::error::{CanvasError, Result};
use crate::geometry::PixelRect;
use crate::masks::spatial::SpatialGrid;
use crate::masks::{CompressedMask, Mask};
use crate::ops::flood_fill::{self, FillStrategy};
use crate::{log_info, log_warn};

/// How region masks are produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskMode {
    /// Extract every region at load time, compress it and index it.
    #[default]
    Precomputed,
    /// Extract the tapped region per query; nothing is cached.
    OnDemand,
}

impl MaskMode {
    pub fn name(&self) -> &'static str {
        match self {
            MaskMode::Precomputed => "precomputed",
            MaskMode::OnDemand => "on-demand",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "precomputed" | "optimized" => Some(MaskMode::Precomputed),
            "on-demand" | "ondemand" | "lazy" => Some(MaskMode::OnDemand),
            _ => None,
        }
    }
}

/// Construction options for a [`MaskStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreOptions {
    /// Strategy for on-demand queries. Precomputation always burns with the
    /// scanline fill.
    pub strategy: FillStrategy,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            strategy: FillStrategy::Scanline,
            grid_x: 4,
            grid_y: 4,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MaskStoreStats {
    pub masks: usize,
    pub compressed_bytes: usize,
    pub raw_bytes: usize,
    pub grid_references: usize,
    pub build_time: Duration,
}

/// Owner of every region mask of one line-art image.
///
/// Read-only once constructed, so an `Arc<MaskStore>` can serve concurrent
/// queries from background tasks.
pub struct MaskStore {
    bitmap: Arc<Bitmap>,
    mode: MaskMode,
    strategy: FillStrategy,
    masks: Vec<CompressedMask>,
    grid: SpatialGrid,
    stats: MaskStoreStats,
}

impl MaskStore {
    pub fn new(bitmap: Arc<Bitmap>, mode: MaskMode, options: StoreOptions) -> Self {
        let start = Instant::now();
        let bounds = PixelRect::new(0, 0, bitmap.width(), bitmap.height());
        let mut grid = SpatialGrid::new(options.grid_x, options.grid_y, bounds);
        let mut stats = MaskStoreStats::default();

        let masks = match mode {
            MaskMode::OnDemand => Vec::new(),
            MaskMode::Precomputed => {
                let regions = enumerate_regions(&bitmap);
                stats.raw_bytes = regions.iter().map(Mask::raw_bytes).sum();

                let compressed: Vec<Option<CompressedMask>> = regions
                    .par_iter()
                    .map(|mask| match mask.compress() {
                        Ok(c) => Some(c),
                        Err(e) => {
                            log_warn!("Dropping region at {:?}: compression failed: {}", mask.rect(), e);
                            None
                        }
                    })
                    .collect();

                let masks: Vec<CompressedMask> = compressed.into_iter().flatten().collect();
                for (id, mask) in masks.iter().enumerate() {
                    grid.insert(id, mask.rect());
                }
                masks
            }
        };

        stats.masks = masks.len();
        stats.compressed_bytes = masks.iter().map(CompressedMask::byte_len).sum();
        stats.grid_references = grid.reference_count();
        stats.build_time = start.elapsed();

        if mode == MaskMode::Precomputed {
            log_info!(
                "Created {} masks, compressed from {} to {} bytes in {:.1}ms",
                stats.masks,
                stats.raw_bytes,
                stats.compressed_bytes,
                stats.build_time.as_secs_f64() * 1000.0
            );
        }

        Self {
            bitmap,
            mode,
            strategy: options.strategy,
            masks,
            grid,
            stats,
        }
    }

    /// Build on the rayon pool. Poll the returned loader from the foreground.
    pub fn spawn(bitmap: Arc<Bitmap>, mode: MaskMode, options: StoreOptions) -> MaskStoreLoader {
        let (tx, rx) = mpsc::channel();
        rayon::spawn(move || {
            let store = MaskStore::new(bitmap, mode, options);
            let _ = tx.send(store);
        });
        MaskStoreLoader {
            rx,
            started: Instant::now(),
        }
    }

    pub fn mode(&self) -> MaskMode {
        self.mode
    }

    pub fn strategy(&self) -> FillStrategy {
        self.strategy
    }

    pub fn bitmap(&self) -> &Arc<Bitmap> {
        &self.bitmap
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    pub fn stats(&self) -> &MaskStoreStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn compressed_masks(&self) -> &[CompressedMask] {
        &self.masks
    }

    /// Region mask under pixel `(x, y)`.
    ///
    /// `None` means the point is on line art, off the image, or in a seam no
    /// mask covers. None of these are errors.
    pub fn mask_at(&self, x: i64, y: i64) -> Option<Mask> {
        if !self.bitmap.in_bounds(x, y) || self.bitmap.is_boundary(x as u32, y as u32) {
            return None;
        }
        let start = Instant::now();
        let found = match self.mode {
            MaskMode::OnDemand => flood_fill::extract(&self.bitmap, x, y, self.strategy),
            MaskMode::Precomputed => self.lookup(x as u32, y as u32),
        };
        log_info!(
            "Mask query at ({}, {}) [{}] took {:.3}ms, found: {}",
            x,
            y,
            self.mode.name(),
            start.elapsed().as_secs_f64() * 1000.0,
            found.is_some()
        );
        found
    }

    fn lookup(&self, x: u32, y: u32) -> Option<Mask> {
        let mut candidates: Vec<&CompressedMask> = self
            .grid
            .query(x as f64, y as f64)
            .iter()
            .filter_map(|&id| self.masks.get(id))
            .filter(|m| m.contains(x, y))
            .collect();

        // Heuristic order: nearest bounding-box origin first
        candidates.sort_by(|a, b| {
            a.squared_distance_from_origin(x, y)
                .total_cmp(&b.squared_distance_from_origin(x, y))
        });

        let mut found: Option<Mask> = None;
        for candidate in candidates {
            let mask = match candidate.decompress() {
                Ok(m) => m,
                Err(e) => {
                    log_warn!("Mask at {:?} unavailable: {}", candidate.rect(), e);
                    continue;
                }
            };
            if !mask.covers(x, y) {
                continue;
            }
            if found.is_some() {
                // Burn-in makes regions disjoint; reaching this means that broke
                log_warn!("Overlapping masks cover ({}, {}); keeping the nearest", x, y);
                break;
            }
            found = Some(mask);
            if !cfg!(debug_assertions) {
                break;
            }
        }
        found
    }

    // ---- cache files ----------------------------------------------------------

    /// Persist precomputed masks so a later session can skip the scan.
    pub fn save_cache(&self, path: &Path) -> Result<()> {
        if self.mode != MaskMode::Precomputed {
            return Err(CanvasError::Cache("on-demand stores hold no masks".into()));
        }
        let cache = MaskCacheV1 {
            magic: CACHE_MAGIC_V1.to_string(),
            width: self.width(),
            height: self.height(),
            masks: self.masks.clone(),
        };
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &cache)?;
        Ok(())
    }

    /// Rebuild a precomputed store from a cache written for `bitmap`.
    pub fn load_cache(bitmap: Arc<Bitmap>, path: &Path, options: StoreOptions) -> Result<Self> {
        let start = Instant::now();
        let raw = std::fs::read(path)?;
        let cache: MaskCacheV1 = bincode::deserialize(&raw)?;
        if cache.magic != CACHE_MAGIC_V1 {
            return Err(CanvasError::InvalidFormat(format!(
                "Unknown magic '{}'",
                cache.magic
            )));
        }
        if cache.width != bitmap.width() || cache.height != bitmap.height() {
            return Err(CanvasError::InvalidFormat(format!(
                "cache is {}×{}, image is {}×{}",
                cache.width,
                cache.height,
                bitmap.width(),
                bitmap.height()
            )));
        }

        let bounds = PixelRect::new(0, 0, bitmap.width(), bitmap.height());
        let mut grid = SpatialGrid::new(options.grid_x, options.grid_y, bounds);
        for (id, mask) in cache.masks.iter().enumerate() {
            if !bounds.intersects(&mask.rect()) || mask.rect().intersection(&bounds) != Some(mask.rect()) {
                return Err(CanvasError::InvalidFormat(format!(
                    "mask {:?} lies outside the image",
                    mask.rect()
                )));
            }
            grid.insert(id, mask.rect());
        }

        let stats = MaskStoreStats {
            masks: cache.masks.len(),
            compressed_bytes: cache.masks.iter().map(CompressedMask::byte_len).sum(),
            raw_bytes: cache.masks.iter().map(|m| m.rect().area()).sum(),
            grid_references: grid.reference_count(),
            build_time: start.elapsed(),
        };
        log_info!("Loaded {} masks from cache {}", stats.masks, path.display());

        Ok(Self {
            bitmap,
            mode: MaskMode::Precomputed,
            strategy: options.strategy,
            masks: cache.masks,
            grid,
            stats,
        })
    }
}

const CACHE_MAGIC_V1: &str = "CBM1";

#[derive(Serialize, Deserialize)]
struct MaskCacheV1 {
    magic: String,
    width: u32,
    height: u32,
    masks: Vec<CompressedMask>,
}

/// Row-major scan burning each unvisited region into a working copy.
fn enumerate_regions(bitmap: &Bitmap) -> Vec<Mask> {
    let mut work = bitmap.working_copy();
    let mut regions = Vec::new();
    for y in 0..work.height() {
        for x in 0..work.width() {
            if work.is_boundary(x, y) {
                continue;
            }
            if let Some(mask) = flood_fill::burn_region(&mut work, x, y) {
                regions.push(mask);
            }
        }
    }
    regions
}

/// Handle to a store being built in the background.
pub struct MaskStoreLoader {
    rx: Receiver<MaskStore>,
    started: Instant,
}

impl MaskStoreLoader {
    /// Non-blocking. `Some` exactly once, when construction finished.
    pub fn poll(&mut self) -> Option<Arc<MaskStore>> {
        match self.rx.try_recv() {
            Ok(store) => Some(Arc::new(store)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log_warn!("Mask store construction ended without a result");
                None
            }
        }
    }

    /// Block until construction finishes. `None` if the builder panicked.
    pub fn wait(self) -> Option<Arc<MaskStore>> {
        self.rx.recv().ok().map(Arc::new)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// Two side-by-side boxes separated by a vertical line, inside a frame.
    fn two_rooms() -> Arc<Bitmap> {
        let (w, h) = (40u32, 20u32);
        let mut img = RgbaImage::new(w, h);
        let ink = Rgba([0, 0, 0, 255]);
        for x in 0..w {
            img.put_pixel(x, 0, ink);
            img.put_pixel(x, h - 1, ink);
        }
        for y in 0..h {
            img.put_pixel(0, y, ink);
            img.put_pixel(w - 1, y, ink);
            img.put_pixel(20, y, ink);
        }
        Arc::new(Bitmap::from_rgba_image(&img).unwrap())
    }

    #[test]
    fn precomputed_finds_each_room() {
        let store = MaskStore::new(two_rooms(), MaskMode::Precomputed, StoreOptions::default());
        assert_eq!(store.len(), 2);
        let left = store.mask_at(5, 5).unwrap();
        let right = store.mask_at(30, 10).unwrap();
        assert_eq!(left.rect(), PixelRect::new(1, 1, 19, 18));
        assert_eq!(right.rect(), PixelRect::new(21, 1, 18, 18));
        assert!(store.mask_at(20, 5).is_none());
        assert!(store.mask_at(-1, 5).is_none());
        assert!(store.mask_at(5, 20).is_none());
    }

    #[test]
    fn on_demand_matches_precomputed() {
        let bmp = two_rooms();
        let pre = MaskStore::new(bmp.clone(), MaskMode::Precomputed, StoreOptions::default());
        let lazy = MaskStore::new(bmp, MaskMode::OnDemand, StoreOptions::default());
        assert!(lazy.is_empty());
        for (x, y) in [(3, 3), (25, 15), (38, 18)] {
            let a = pre.mask_at(x, y).unwrap();
            let b = lazy.mask_at(x, y).unwrap();
            assert_eq!(a.rect(), b.rect());
            assert_eq!(a.coverage().as_raw(), b.coverage().as_raw());
        }
    }

    #[test]
    fn background_build_delivers_once() {
        let loader = MaskStore::spawn(two_rooms(), MaskMode::Precomputed, StoreOptions::default());
        let store = loader.wait().unwrap();
        assert_eq!(store.stats().masks, 2);
        assert!(store.stats().compressed_bytes > 0);
    }

    #[test]
    fn cache_round_trip_and_dimension_check() {
        let bmp = two_rooms();
        let store = MaskStore::new(bmp.clone(), MaskMode::Precomputed, StoreOptions::default());
        let path = std::env::temp_dir().join(format!("masks-{}.cbm", uuid::Uuid::new_v4()));
        store.save_cache(&path).unwrap();

        let loaded = MaskStore::load_cache(bmp, &path, StoreOptions::default()).unwrap();
        assert_eq!(loaded.len(), store.len());
        assert_eq!(loaded.mask_at(30, 10).unwrap().rect(), PixelRect::new(21, 1, 18, 18));

        let other = Arc::new(Bitmap::from_rgba_image(&RgbaImage::new(8, 8)).unwrap());
        assert!(MaskStore::load_cache(other, &path, StoreOptions::default()).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_mask_misses_without_affecting_others() {
        let mut store = MaskStore::new(two_rooms(), MaskMode::Precomputed, StoreOptions::default());
        // row-major scan finds the left room first
        assert_eq!(store.masks[0].rect(), PixelRect::new(1, 1, 19, 18));
        store.masks[0].png = vec![0x89, b'P', b'N', b'G', 0, 0, 0, 0];

        assert!(store.mask_at(5, 5).is_none());
        assert!(store.mask_at(18, 17).is_none());
        let right = store.mask_at(30, 5).unwrap();
        assert_eq!(right.rect(), PixelRect::new(21, 1, 18, 18));
        assert!(right.covers(30, 5));
    }

    #[test]
    fn on_demand_store_refuses_cache() {
        let store = MaskStore::new(two_rooms(), MaskMode::OnDemand, StoreOptions::default());
        let path = std::env::temp_dir().join(format!("masks-{}.cbm", uuid::Uuid::new_v4()));
        assert!(store.save_cache(&path).is_err());
    }
}
