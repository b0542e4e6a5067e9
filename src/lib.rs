//! # fleetmap
//!
//! A frame-budget-aware pipeline that turns a live stream of vehicle
//! positions into a bounded set of renderable markers and clusters.
//!
//! The map widget, tile rendering and network transport live outside this
//! crate. What lives here is the part between them: per-entity position
//! fan-out, grid clustering, adaptive level of detail, pooled marker and
//! bitmap objects, and a scheduler that keeps rebuild work on frame
//! boundaries.

pub mod background;
pub mod core;
pub mod lod;
pub mod pipeline;
pub mod pool;
pub mod prelude;
pub mod scheduler;
pub mod spatial;
pub mod stream;
pub mod traits;
pub use crate::core::constants;

// Re-export public API
pub use core::{
    config::{PipelineConfig, PipelinePreset},
    geo::{LatLng, LatLngBounds},
    position::{EntityId, EntityPosition},
    viewport::Viewport,
};

pub use lod::{controller::AdaptiveRenderController, mode::RenderMode};

pub use pool::{
    bitmap::BitmapPool,
    manager::ObjectPoolManager,
    marker::{MarkerConfig, MarkerPool, PooledMarker},
};

pub use spatial::clustering::{Cluster, ClusterOutput, SpatialClusterEngine};

pub use stream::hub::PositionStreamHub;

pub use scheduler::frame::FrameScheduler;

pub use pipeline::{FramePipeline, RenderFrame};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, FleetError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Unsupported snapshot version {found} (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bitmap error: {0}")]
    Bitmap(#[from] pool::bitmap::BitmapError),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Stream hub has been disposed")]
    HubDisposed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Error type alias for convenience
pub type Error = FleetError;

/// Installs `env_logger` as the `log` backend, honouring `RUST_LOG`.
#[cfg(feature = "debug")]
pub fn init_debug_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(cfg!(test))
        .try_init();
}
