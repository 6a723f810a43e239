//! Engine log.
//!
//! One file per process run, truncated when opened. Nothing is written until
//! [`init`] or [`init_at`] has been called, so a host that never opens the log
//! (tests included) pays only an atomic load per message.
//!
//! [`init`] places the file under the platform data directory:
//! `%APPDATA%`, `~/Library/Application Support` or `$XDG_DATA_HOME`
//! (`~/.local/share`), each followed by `ColoringBook/coloring-book.log`.
//!
//! Messages go through `log_info!`, `log_warn!` and `log_err!`, which take
//! `format!` arguments and may be used as statements or expressions.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static SINK: OnceLock<Mutex<File>> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        })
    }
}

/// True once a log file is open.
pub fn is_enabled() -> bool {
    SINK.get().is_some()
}

fn append(line: &str) {
    if let Some(sink) = SINK.get()
        && let Ok(mut file) = sink.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Append `[HH:MM:SS] [LEVEL] msg`. I/O errors are dropped.
pub fn write(level: Level, msg: &str) {
    if is_enabled() {
        append(&format_line(&clock(), level, msg));
    }
}

fn format_line(clock: &str, level: Level, msg: &str) -> String {
    format!("[{}] [{}] {}", clock, level, msg)
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {{
        $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*));
    }};
}

/// Open the log at its default location.
pub fn init() {
    init_at(&data_dir().join("ColoringBook").join("coloring-book.log"));
}

/// Open (truncating) the log at `path` and hook panics into it. Later calls
/// are ignored once a file is open; a failure to open leaves logging off.
pub fn init_at(path: &Path) {
    if is_enabled() {
        return;
    }
    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }

    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] cannot open {}: {}", path.display(), e);
            return;
        }
    };
    let _ = SINK.set(Mutex::new(file));

    append(&format!("=== coloring-book log, unix time {} ===", unix_seconds()));
    append(&format!("file: {}", path.display()));
    append("");

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        append(&format!("[{}] [PANIC] {}", clock(), info));
        previous(info);
    }));
}

/// Per-user data directory, without the application folder.
fn data_dir() -> PathBuf {
    let var = |name: &str| std::env::var_os(name).map(PathBuf::from);
    if cfg!(target_os = "windows")
        && let Some(appdata) = var("APPDATA")
    {
        return appdata;
    }
    if cfg!(target_os = "macos")
        && let Some(home) = var("HOME")
    {
        return home.join("Library").join("Application Support");
    }
    var("XDG_DATA_HOME")
        .or_else(|| var("HOME").map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Time of day (UTC) as `HH:MM:SS`.
fn clock() -> String {
    let secs = unix_seconds() % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}
