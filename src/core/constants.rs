//! Core constants for the live-marker pipeline.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.
//! Every value here is only a default; `PipelineConfig` carries the tunable copy.

/// Grid cell edge at zoom 0, in Web Mercator meters.
pub const BASE_CELL_SIZE_METERS: f64 = 10_000_000.0;

/// Smallest grid cell the clustering engine will use.
pub const MIN_CELL_SIZE_METERS: f64 = 20.0;

/// Largest grid cell the clustering engine will use.
pub const MAX_CELL_SIZE_METERS: f64 = 500_000.0;

/// Bounded number of cell doublings when the marker cap is exceeded.
pub const MAX_COARSEN_STEPS: u32 = 4;

/// Smallest cell population that may ever become a cluster badge.
pub const MIN_CLUSTER_SIZE: usize = 2;

/// Frame rate below which the controller starts counting toward a downgrade.
pub const DOWNGRADE_FPS: f32 = 45.0;

/// Frame rate above which the controller starts counting toward an upgrade.
pub const RECOVERY_FPS: f32 = 55.0;

/// Consecutive samples required before a tier change.
pub const HYSTERESIS_SAMPLES: u32 = 3;

/// Rolling FPS window.
pub const FPS_WINDOW_MS: u64 = 1_000;

/// Minimum time a mode is held after a transition.
pub const MODE_MIN_DWELL_MS: u64 = 2_000;

/// Frame samples kept for percentile diagnostics.
pub const FRAME_HISTORY_LEN: usize = 240;

/// Visible entity count above which clustering is sent to a worker.
pub const INLINE_CLUSTER_THRESHOLD: usize = 200;

/// How long a worker may take before the pass falls back inline.
pub const WORKER_TIMEOUT_MS: u64 = 100;

/// Default quiet period for idle maintenance work.
pub const IDLE_MIN_DELAY_MS: u64 = 5_000;

/// Nominal frame interval for hosts without a vsync callback (60 Hz).
pub const FRAME_INTERVAL_MS: u64 = 16;

/// Per-entity broadcast buffer; lagging subscribers skip to the newest value.
pub const CHANNEL_CAPACITY: usize = 16;
