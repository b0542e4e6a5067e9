//! Object pools for marker configurations and decoded bitmaps.

pub mod bitmap;
pub mod manager;
pub mod marker;

pub use bitmap::{BitmapError, BitmapPool, BitmapStats, PooledBitmap, RgbaImage};
pub use manager::{ObjectPoolManager, PoolDiagnostics};
pub use marker::{MarkerConfig, MarkerPool, PooledMarker};
