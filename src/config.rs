use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::components::history::CompactionConfig;
use crate::components::stroke::RenderMode;
use crate::error::Result;
use crate::masks::store::{MaskMode, StoreOptions};
use crate::ops::flood_fill::FillStrategy;

/// Everything a session is configured with. Selected once at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mask_mode: MaskMode,
    pub fill_strategy: FillStrategy,
    /// Draw sampled points as dots instead of connected lines.
    pub debug_rendering: bool,
    pub compaction: CompactionConfig,
    /// Buffering delay after a touch pointer-down before points are drawn.
    pub touch_delay_ms: u64,
    pub stylus_delay_ms: u64,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_mode(MaskMode::Precomputed)
    }
}

impl SessionConfig {
    /// Defaults for `mode`, including its matching compaction policy.
    pub fn for_mode(mask_mode: MaskMode) -> Self {
        Self {
            mask_mode,
            fill_strategy: FillStrategy::Scanline,
            debug_rendering: false,
            compaction: CompactionConfig::for_mode(mask_mode),
            touch_delay_ms: 100,
            stylus_delay_ms: 42,
            grid_x: 4,
            grid_y: 4,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            strategy: self.fill_strategy,
            grid_x: self.grid_x.max(1),
            grid_y: self.grid_y.max(1),
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        if self.debug_rendering {
            RenderMode::DebugDots
        } else {
            RenderMode::Pen
        }
    }

    pub fn cancel_delay(&self, is_stylus: bool) -> Duration {
        Duration::from_millis(if is_stylus {
            self.stylus_delay_ms
        } else {
            self.touch_delay_ms
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = format!(
            "mask_mode={}\n\
             fill_strategy={}\n\
             debug_rendering={}\n\
             compaction={}\n\
             touch_delay_ms={}\n\
             stylus_delay_ms={}\n\
             grid_x={}\n\
             grid_y={}\n",
            self.mask_mode.name(),
            self.fill_strategy.name(),
            self.debug_rendering,
            self.compaction.to_setting(),
            self.touch_delay_ms,
            self.stylus_delay_ms,
            self.grid_x,
            self.grid_y,
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load settings (returns defaults if the file is missing or corrupt).
    /// Without an explicit `compaction` line the policy follows `mask_mode`.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };

        let mut s = Self::default();
        let mut compaction = None;
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "mask_mode" => {
                    s.mask_mode = MaskMode::parse(val).unwrap_or_default();
                }
                "fill_strategy" => {
                    s.fill_strategy = FillStrategy::parse(val).unwrap_or_default();
                }
                "debug_rendering" => {
                    s.debug_rendering = val == "true";
                }
                "compaction" => {
                    compaction = CompactionConfig::parse(val);
                }
                "touch_delay_ms" => {
                    s.touch_delay_ms = val.parse().unwrap_or(100);
                }
                "stylus_delay_ms" => {
                    s.stylus_delay_ms = val.parse().unwrap_or(42);
                }
                "grid_x" => {
                    s.grid_x = val.parse().unwrap_or(4);
                }
                "grid_y" => {
                    s.grid_y = val.parse().unwrap_or(4);
                }
                _ => {}
            }
        }
        s.compaction = compaction.unwrap_or_else(|| CompactionConfig::for_mode(s.mask_mode));
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cfg() -> PathBuf {
        std::env::temp_dir().join(format!("session-{}.cfg", uuid::Uuid::new_v4()))
    }

    #[test]
    fn defaults_follow_mask_mode() {
        assert_eq!(
            SessionConfig::default().compaction,
            CompactionConfig::Shallow { threshold: 100, keep: 30 }
        );
        assert_eq!(
            SessionConfig::for_mode(MaskMode::OnDemand).compaction,
            CompactionConfig::FullFlatten { threshold: 8 }
        );
        let cfg = SessionConfig::default();
        assert_eq!(cfg.cancel_delay(false), Duration::from_millis(100));
        assert_eq!(cfg.cancel_delay(true), Duration::from_millis(42));
    }

    #[test]
    fn settings_file_round_trip() {
        let path = temp_cfg();
        let cfg = SessionConfig {
            fill_strategy: FillStrategy::Queue,
            debug_rendering: true,
            compaction: CompactionConfig::Shallow { threshold: 8, keep: 3 },
            grid_x: 8,
            ..SessionConfig::for_mode(MaskMode::OnDemand)
        };
        cfg.save_to(&path).unwrap();
        assert_eq!(SessionConfig::load_from(&path), cfg);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_or_garbled_file_gives_defaults() {
        assert_eq!(SessionConfig::load_from(&temp_cfg()), SessionConfig::default());

        let path = temp_cfg();
        std::fs::write(&path, "nonsense\ngrid_x=abc\nmask_mode=on-demand\nunknown=1\n").unwrap();
        let cfg = SessionConfig::load_from(&path);
        assert_eq!(cfg.grid_x, 4);
        assert_eq!(cfg.mask_mode, MaskMode::OnDemand);
        assert_eq!(cfg.compaction, CompactionConfig::FullFlatten { threshold: 8 });
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn huge_grid_setting_still_builds_a_store() {
        let path = temp_cfg();
        std::fs::write(&path, "grid_x=100000\ngrid_y=100000\n").unwrap();
        let cfg = SessionConfig::load_from(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!((cfg.grid_x, cfg.grid_y), (100_000, 100_000));

        let img = image::RgbaImage::new(12, 9);
        let bmp = std::sync::Arc::new(crate::bitmap::Bitmap::from_rgba_image(&img).unwrap());
        let store = crate::masks::store::MaskStore::new(bmp, cfg.mask_mode, cfg.store_options());
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().grid_references, 12 * 9);
        assert!(store.mask_at(11, 8).is_some());
    }
}
