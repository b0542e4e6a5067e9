//! Prelude module for common fleetmap types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use fleetmap::prelude::*;`

pub use crate::core::{
    config::{
        ClusterConfig, ControllerConfig, ModeProfile, ModeProfiles, PipelineConfig,
        PipelinePreset, SchedulerConfig, WorkerConfig,
    },
    geo::{LatLng, LatLngBounds, Point},
    position::{EntityAnnotations, EntityId, EntityPosition},
    viewport::Viewport,
};

pub use crate::lod::{
    controller::{AdaptiveRenderController, FrameTimingStats, ModeTransition},
    mode::{QualityTier, RenderMode},
};

pub use crate::pool::{
    bitmap::{BitmapError, BitmapPool, BitmapStats, PooledBitmap, RgbaImage},
    manager::{ObjectPoolManager, PoolDiagnostics},
    marker::{MarkerConfig, MarkerPool, PooledMarker},
};

pub use crate::spatial::{
    clustering::{
        Cluster, ClusterOutput, ClusterPlan, ClusterStats, PlannedMarker, SpatialClusterEngine,
    },
    grid::{CellKey, GridSpec},
};

pub use crate::stream::{
    hub::{HubStats, PositionStreamHub, PositionSubscription},
    snapshot::{HubSnapshot, TierSizes},
};

pub use crate::scheduler::{
    clock::FrameTicker,
    frame::{DueWork, FrameScheduler, RequestId, SchedulerStats, TargetId},
};

pub use crate::background::{
    job::ClusterJob,
    worker::{BlockingClusterWorker, ClusterDispatcher, DispatchStats, ThreadClusterWorker},
};

pub use crate::pipeline::{
    DiagnosticsSnapshot, FramePipeline, PipelineCounters, PipelineWork, RenderFrame,
};

pub use crate::traits::{
    ClusterWorker, DecodedImage, FileSnapshotStore, MemorySnapshotStore, PoolStats, RecordingSink,
    RenderSink, SnapshotStore,
};

pub use crate::{Error as FleetError, Result};

pub use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

pub use instant::Instant;

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};

pub use futures::{Future, Stream};
