// ============================================================================
// coloring-book CLI: headless region extraction via command-line arguments
// ============================================================================
//
// Usage examples:
//   coloring-book -i page.png --stats
//   coloring-book -i page.png --seed 120,80 -o region.png
//   coloring-book -i "pages/*.png" --cache masks/ --mode precomputed
//   coloring-book -i page.png --seed 10,10 --mode on-demand --strategy queue
//
// Each input is prepared as line art, its regions are indexed, and the
// requested outputs are written. Nothing is drawn; strokes need a session.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use coloring_book::bitmap::DEFAULT_INK_THRESHOLD;
use coloring_book::config::SessionConfig;
use coloring_book::io;
use coloring_book::masks::store::{MaskMode, MaskStore};
use coloring_book::ops::flood_fill::FillStrategy;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Coloring-book region extractor.
///
/// Finds the closed regions of line-art drawings and exports their masks.
#[derive(Parser, Debug)]
#[command(
    name = "coloring-book",
    about = "Headless region extraction for coloring-book line art",
    long_about = "Prepare line-art images, index every closed region and export\n\
                  region masks or mask caches.\n\n\
                  Example:\n  \
                  coloring-book -i page.png --seed 120,80 -o region.png\n  \
                  coloring-book -i \"pages/*.png\" --cache masks/ --stats"
)]
pub struct CliArgs {
    /// Input line-art file(s). Glob patterns accepted (e.g. "pages/*.png").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Settings file supplying defaults for mode, strategy and grid.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Mask mode: precomputed or on-demand.
    #[arg(long, value_name = "MODE")]
    pub mode: Option<String>,

    /// Fill strategy for on-demand extraction: scanline, queue, recursive.
    /// `recursive` can overflow the stack on large regions.
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<String>,

    /// Luminance below which a pixel counts as line art (0-255).
    #[arg(long, default_value_t = DEFAULT_INK_THRESHOLD, value_name = "0-255")]
    pub threshold: u8,

    /// Extract the region under this pixel and write its mask.
    #[arg(long, value_name = "X,Y", value_parser = parse_seed)]
    pub seed: Option<(i64, i64)>,

    /// Output mask path for --seed. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print mask store statistics for each input.
    #[arg(long)]
    pub stats: bool,

    /// Directory to write mask cache files into (precomputed mode only).
    #[arg(long, value_name = "DIR")]
    pub cache: Option<PathBuf>,

    /// Print per-file timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_seed(s: &str) -> Result<(i64, i64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{}'", s))?;
    let x = x.trim().parse().map_err(|e| format!("bad X '{}': {}", x, e))?;
    let y = y.trim().parse().map_err(|e| format!("bad Y '{}': {}", y, e))?;
    Ok((x, y))
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Omit it to write each mask next to its input.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from(path),
        None => SessionConfig::default(),
    };
    if let Some(mode) = &args.mode {
        match MaskMode::parse(mode) {
            Some(m) => config.mask_mode = m,
            None => {
                eprintln!("error: unknown mode '{}' (precomputed, on-demand).", mode);
                return ExitCode::FAILURE;
            }
        }
    }
    if let Some(strategy) = &args.strategy {
        match FillStrategy::parse(strategy) {
            Some(s) => config.fill_strategy = s,
            None => {
                eprintln!(
                    "error: unknown strategy '{}' (scanline, queue, recursive).",
                    strategy
                );
                return ExitCode::FAILURE;
            }
        }
    }

    if let Some(dir) = &args.cache {
        if config.mask_mode != MaskMode::Precomputed {
            eprintln!("error: --cache needs --mode precomputed.");
            return ExitCode::FAILURE;
        }
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("error: could not create cache directory '{}': {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        match run_one(input_path, &args, &config) {
            Ok(()) => {
                if args.verbose {
                    println!(
                        "  done ({:.0}ms)",
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, args: &CliArgs, config: &SessionConfig) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let bitmap = io::load_line_art(input, args.threshold)
        .map_err(|e| format!("load failed: {}", e))?;
    if args.verbose {
        println!("  {}×{} line art", bitmap.width(), bitmap.height());
    }

    // -- Step 2: Index regions -------------------------------------------
    let store = MaskStore::new(Arc::new(bitmap), config.mask_mode, config.store_options());

    if args.stats {
        let stats = store.stats();
        println!(
            "  {} masks, {} raw bytes -> {} compressed bytes, {} grid refs, {:.1}ms",
            stats.masks,
            stats.raw_bytes,
            stats.compressed_bytes,
            stats.grid_references,
            stats.build_time.as_secs_f64() * 1000.0
        );
    }

    // -- Step 3: Cache ---------------------------------------------------
    if let Some(dir) = &args.cache {
        let stem = input
            .file_stem()
            .ok_or_else(|| "input has no file name".to_string())?
            .to_string_lossy();
        let path = dir.join(format!("{}.cbm", stem));
        store
            .save_cache(&path)
            .map_err(|e| format!("cache write failed: {}", e))?;
        if args.verbose {
            println!("  cache → {}", path.display());
        }
    }

    // -- Step 4: Seed mask -----------------------------------------------
    if let Some((x, y)) = args.seed {
        let mask = store
            .mask_at(x, y)
            .ok_or_else(|| format!("no region at ({}, {}): line art or outside the image", x, y))?;
        let output = build_output_path(input, args.output.as_deref())
            .ok_or_else(|| "cannot determine output path".to_string())?;
        io::write_gray_png(mask.coverage(), &output)
            .map_err(|e| format!("mask write failed: {}", e))?;
        let rect = mask.rect();
        println!(
            "  region ({}, {}, {}×{}), {} pixels → {}",
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            mask.covered_pixels(),
            output.display()
        );
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// `--output` when given, otherwise `<stem>_mask.png` next to the input.
fn build_output_path(input: &Path, output: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let parent = input.parent().unwrap_or(Path::new("."));
    Some(parent.join(format!("{}_mask.png", stem)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_parsing() {
        assert_eq!(parse_seed("12,34"), Ok((12, 34)));
        assert_eq!(parse_seed(" 5 , -1 "), Ok((5, -1)));
        assert!(parse_seed("12").is_err());
        assert!(parse_seed("a,b").is_err());
    }

    #[test]
    fn default_output_sits_next_to_input() {
        let out = build_output_path(Path::new("pages/cat.png"), None).unwrap();
        assert_eq!(out, Path::new("pages").join("cat_mask.png"));
        let explicit = build_output_path(Path::new("cat.png"), Some(Path::new("x.png"))).unwrap();
        assert_eq!(explicit, PathBuf::from("x.png"));
    }

    #[test]
    fn args_parse() {
        let args = CliArgs::try_parse_from([
            "coloring-book", "-i", "a.png", "--seed", "3,4", "--mode", "on-demand", "--stats",
        ])
        .unwrap();
        assert_eq!(args.seed, Some((3, 4)));
        assert!(args.stats);
        assert_eq!(args.threshold, DEFAULT_INK_THRESHOLD);
    }
}
