//! Region-fill masking and incremental stroke history for coloring-book
//! line art.
//!
//! A [`session::ColoringSession`] turns pointer events into strokes clipped to
//! the line-art region under the pointer-down position. Regions come from a
//! [`masks::store::MaskStore`], either precomputed and indexed at load time or
//! extracted per query.

#[macro_use]
pub mod logger;

pub mod bitmap;
pub mod canvas;
pub mod components;
pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod masks;
pub mod ops;
pub mod session;

pub use bitmap::Bitmap;
pub use config::SessionConfig;
pub use error::{CanvasError, Result};
pub use geometry::{PixelRect, Point};
pub use masks::store::{MaskMode, MaskStore};
pub use session::ColoringSession;
