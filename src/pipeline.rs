//! The frame pipeline: owns every component and drives them from the
//! host's inbound events and frame boundaries.
//!
//! ```text
//! ingest ──► hub ──► scheduler ──(frame)──► dispatcher ──► engine ──► sink
//!                        ▲                      │
//! set_viewport ──────────┤                      └─ worker / inline plan
//! record_fps ──► controller ──► pools.reconfigure
//! ```

use crate::background::worker::{ClusterDispatcher, DispatchStats, ThreadClusterWorker};
use crate::core::config::{PipelineConfig, PipelinePreset};
use crate::core::position::{EntityAnnotations, EntityId, EntityPosition};
use crate::core::viewport::Viewport;
use crate::lod::controller::{AdaptiveRenderController, FrameTimingStats, ModeTransition};
use crate::lod::mode::RenderMode;
use crate::pool::bitmap::RgbaImage;
use crate::pool::manager::{ObjectPoolManager, PoolDiagnostics};
use crate::pool::marker::PooledMarker;
use crate::scheduler::frame::{FrameScheduler, SchedulerStats, TargetId};
use crate::spatial::clustering::{Cluster, ClusterOutput, ClusterStats, SpatialClusterEngine};
use crate::stream::hub::{HubStats, PositionStreamHub};
use crate::stream::snapshot::HubSnapshot;
use crate::traits::{ClusterWorker, DecodedImage, RenderSink, SnapshotStore};
use crate::Result;
use instant::Instant;
use serde::Serialize;
use std::sync::Arc;

/// Scheduler target for the marker layer
pub const MARKER_TARGET: TargetId = 0;

/// Work items the pipeline schedules for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineWork {
    Rebuild,
    TrimPools,
}

/// One completed clustering pass, as handed to the rendering sink
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub pass: u64,
    pub mode: RenderMode,
    pub viewport: Viewport,
    pub markers: Vec<PooledMarker>,
    pub clusters: Vec<Cluster>,
    pub stats: ClusterStats,
}

impl RenderFrame {
    fn new(viewport: Viewport, output: ClusterOutput) -> Self {
        Self {
            pass: output.pass,
            mode: output.mode,
            viewport,
            markers: output.markers,
            clusters: output.clusters,
            stats: output.stats,
        }
    }

    pub fn marker_ids(&self) -> Vec<EntityId> {
        self.markers.iter().map(PooledMarker::entity_id).collect()
    }

    /// Entities represented by the frame, standalone or clustered
    pub fn entity_count(&self) -> usize {
        self.markers.len() + self.clusters.iter().map(|c| c.member_count).sum::<usize>()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineCounters {
    pub ingested: u64,
    /// Updates the hub refused or dropped as out of order
    pub dropped_updates: u64,
    /// Reports with unusable coordinates, dropped before reaching the hub
    pub invalid: u64,
    pub passes: u64,
    /// Rebuilds skipped because no usable viewport was known
    pub skipped_passes: u64,
    pub frames: u64,
}

/// Everything worth logging or shipping to a dashboard, in one value
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub mode: RenderMode,
    pub marker_cap: usize,
    pub mode_transitions: u64,
    pub frame_timing: FrameTimingStats,
    pub pools: PoolDiagnostics,
    pub hub: HubStats,
    pub scheduler: SchedulerStats,
    pub dispatch: DispatchStats,
    pub last_pass: Option<ClusterStats>,
    pub pipeline: PipelineCounters,
}

impl DiagnosticsSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct FramePipeline<S: RenderSink, I: DecodedImage = RgbaImage> {
    config: PipelineConfig,
    hub: PositionStreamHub,
    engine: SpatialClusterEngine,
    pools: ObjectPoolManager<I>,
    controller: AdaptiveRenderController,
    scheduler: FrameScheduler<PipelineWork>,
    dispatcher: ClusterDispatcher,
    sink: S,
    annotations: EntityAnnotations,
    viewport: Option<Viewport>,
    last_frame: Option<RenderFrame>,
    snapshot_store: Option<Box<dyn SnapshotStore>>,
    next_pass: u64,
    counters: PipelineCounters,
}

impl<S: RenderSink, I: DecodedImage> FramePipeline<S, I> {
    /// Build a pipeline and its worker threads from a validated config
    pub fn new(config: PipelineConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let worker: Option<Arc<dyn ClusterWorker>> = if config.worker.worker_threads > 0 {
            Some(Arc::new(ThreadClusterWorker::new(config.worker.worker_threads)?))
        } else {
            None
        };
        Ok(Self::assemble(config, sink, worker))
    }

    pub fn from_preset(preset: PipelinePreset, sink: S) -> Result<Self> {
        Self::new(preset.resolve(), sink)
    }

    /// Pipeline with an injected clustering worker, or none for inline-only
    pub fn with_worker(
        config: PipelineConfig,
        sink: S,
        worker: Option<Arc<dyn ClusterWorker>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, sink, worker))
    }

    fn assemble(config: PipelineConfig, sink: S, worker: Option<Arc<dyn ClusterWorker>>) -> Self {
        let controller =
            AdaptiveRenderController::new(config.controller.clone(), config.modes.clone());
        let pools = ObjectPoolManager::new(&config.modes, controller.current_mode());
        log::info!(
            "frame pipeline ready: mode {}, worker {}",
            controller.current_mode(),
            worker.as_ref().map(|w| w.name()).unwrap_or("none")
        );

        Self {
            hub: PositionStreamHub::new(),
            engine: SpatialClusterEngine::new(config.cluster.clone()),
            pools,
            controller,
            scheduler: FrameScheduler::new(),
            dispatcher: ClusterDispatcher::new(config.worker.clone(), worker),
            sink,
            annotations: EntityAnnotations::new(),
            viewport: None,
            last_frame: None,
            snapshot_store: None,
            next_pass: 1,
            counters: PipelineCounters::default(),
            config,
        }
    }

    /// Store used by `pause` and `resume`
    pub fn with_snapshot_store(mut self, store: Box<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    // Inbound events

    /// Accept one position report and schedule a rebuild for the next frame
    pub fn ingest(&mut self, position: EntityPosition) {
        self.counters.ingested += 1;
        // The last good fix stays cached and keeps rendering
        if !position.lat_lng().is_valid() {
            self.counters.invalid += 1;
            log::trace!("dropping malformed report for entity {}", position.entity_id);
            return;
        }
        match self.hub.publish(position) {
            Ok(true) => self.request_rebuild(),
            Ok(false) => self.counters.dropped_updates += 1,
            Err(e) => {
                self.counters.dropped_updates += 1;
                log::debug!("position update refused: {}", e);
            }
        }
    }

    pub fn ingest_batch(&mut self, positions: impl IntoIterator<Item = EntityPosition>) {
        for position in positions {
            self.ingest(position);
        }
    }

    /// New camera state from the map widget
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
        self.controller.on_viewport_changed();
        self.scheduler.mark_active();
        self.request_rebuild();
        self.scheduler.schedule_idle(
            MARKER_TARGET,
            PipelineWork::TrimPools,
            self.config.scheduler.idle_min_delay(),
        );
    }

    /// One measured frame rate sample
    pub fn record_fps(&mut self, sample: f32) -> RenderMode {
        self.record_fps_at(sample, Instant::now())
    }

    pub fn record_fps_at(&mut self, sample: f32, now: Instant) -> RenderMode {
        let before = self.controller.current_mode();
        let mode = self.controller.update_fps_at(sample, now);
        if mode != before {
            self.apply_mode(mode);
        }
        mode
    }

    /// Override the adaptive controller
    pub fn force_mode(&mut self, mode: RenderMode) -> Option<ModeTransition> {
        let transition = self.controller.force_mode(mode);
        if transition.is_some() {
            self.apply_mode(mode);
        }
        transition
    }

    fn apply_mode(&mut self, mode: RenderMode) {
        let profile = self.controller.profile().clone();
        log::info!(
            "render mode now {} (marker cap {}, grid scale {})",
            mode,
            profile.marker_cap,
            profile.grid_scale
        );
        self.pools.reconfigure(mode, &profile);
        self.request_rebuild();
    }

    pub fn select(&mut self, entity_id: EntityId) {
        self.annotations.select(entity_id);
        self.request_rebuild();
    }

    pub fn deselect(&mut self, entity_id: EntityId) {
        self.annotations.deselect(entity_id);
        self.request_rebuild();
    }

    /// Edit names, icons and selection; a rebuild follows
    pub fn update_annotations(&mut self, edit: impl FnOnce(&mut EntityAnnotations)) {
        edit(&mut self.annotations);
        self.request_rebuild();
    }

    /// Queue a rebuild for the next frame boundary
    pub fn request_rebuild(&mut self) {
        self.scheduler
            .schedule_rebuild(MARKER_TARGET, PipelineWork::Rebuild);
    }

    // Lifecycle

    /// Stop rebuilding and persist the hub's cached positions
    pub fn pause(&mut self) -> Result<()> {
        self.scheduler.pause();
        if let Some(store) = self.snapshot_store.as_mut() {
            let snapshot = self.hub.snapshot(self.pools.markers.tier_sizes().into());
            store.save(&snapshot.encode()?)?;
            log::info!("paused with {} cached positions", snapshot.positions.len());
        }
        Ok(())
    }

    /// Lift the pause, restore the persisted positions and force a rebuild
    pub fn resume(&mut self) -> Result<()> {
        self.scheduler.resume();
        let bytes = match self.snapshot_store.as_ref() {
            Some(store) => store.load()?,
            None => None,
        };
        if let Some(bytes) = bytes {
            self.hub.restore(&HubSnapshot::decode(&bytes)?)?;
        }
        self.request_rebuild();
        Ok(())
    }

    /// Seed the hub from a persisted snapshot before the live feed connects.
    /// Returns the number of restored positions.
    pub fn warm_start(&mut self, store: &dyn SnapshotStore) -> Result<usize> {
        let bytes = match store.load()? {
            Some(bytes) => bytes,
            None => {
                log::debug!("no snapshot to warm start from");
                return Ok(0);
            }
        };
        let snapshot = HubSnapshot::decode(&bytes)?;
        let restored = self.hub.restore(&snapshot)?;
        log::info!(
            "warm start: {} positions, previous pool held {} markers",
            restored,
            snapshot.tier_sizes.total()
        );
        self.request_rebuild();
        Ok(restored)
    }

    /// Close every subscription and stop the pipeline for good
    pub fn dispose(&mut self) {
        self.scheduler.pause();
        self.engine.release_all(&mut self.pools);
        self.hub.dispose();
    }

    // Frame boundary

    /// Run whatever the scheduler releases at this boundary. Returns the
    /// frame presented to the sink, if a pass ran.
    pub async fn on_frame(&mut self, now: Instant) -> Option<RenderFrame> {
        self.counters.frames += 1;
        let mut rebuild = false;
        for due in self.scheduler.on_frame(now) {
            match due.work {
                PipelineWork::Rebuild => rebuild = true,
                PipelineWork::TrimPools => self.trim_pools(),
            }
        }
        if !rebuild {
            return None;
        }
        self.rebuild().await
    }

    async fn rebuild(&mut self) -> Option<RenderFrame> {
        let viewport = match &self.viewport {
            Some(viewport) if viewport.is_usable() => viewport.clone(),
            _ => {
                self.counters.skipped_passes += 1;
                log::debug!("no usable viewport, keeping the previous frame");
                return None;
            }
        };

        let pass = self.next_pass;
        self.next_pass += 1;
        let mode = self.controller.current_mode();
        let job = self
            .engine
            .job(
                &viewport,
                self.hub.all_latest_positions(),
                mode,
                self.controller.profile(),
                &self.annotations,
            )
            .with_pass(pass);

        let plan = self.dispatcher.run(job).await;
        let output = self.engine.materialize(plan, &self.annotations, &mut self.pools);
        let frame = RenderFrame::new(viewport, output);

        self.sink.present(&frame);
        self.counters.passes += 1;
        log::trace!(
            "pass {}: {} markers, {} clusters, {} invalid, {} off screen",
            pass,
            frame.markers.len(),
            frame.clusters.len(),
            frame.stats.invalid,
            frame.stats.off_screen
        );
        self.last_frame = Some(frame.clone());
        Some(frame)
    }

    fn trim_pools(&mut self) {
        let trimmed: usize = RenderMode::ALL
            .iter()
            .map(|tier| self.pools.markers.trim_idle(*tier))
            .sum();
        if trimmed > 0 {
            log::debug!("idle trim dropped {} pooled markers", trimmed);
        }
    }

    // Accessors

    /// Shared handle to the hub, for per-entity subscribers
    pub fn hub(&self) -> &PositionStreamHub {
        &self.hub
    }

    pub fn pools(&self) -> &ObjectPoolManager<I> {
        &self.pools
    }

    pub fn controller(&self) -> &AdaptiveRenderController {
        &self.controller
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    pub fn last_frame(&self) -> Option<&RenderFrame> {
        self.last_frame.as_ref()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn current_mode(&self) -> RenderMode {
        self.controller.current_mode()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            mode: self.controller.current_mode(),
            marker_cap: self.controller.marker_cap(),
            mode_transitions: self.controller.transition_count(),
            frame_timing: self.controller.frame_timing(),
            pools: self.pools.stats(),
            hub: self.hub.stats(),
            scheduler: self.scheduler.stats(),
            dispatch: self.dispatcher.stats(),
            last_pass: self.last_frame.as_ref().map(|frame| frame.stats.clone()),
            pipeline: self.counters.clone(),
        }
    }
}
