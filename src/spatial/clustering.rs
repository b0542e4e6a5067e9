//! Grid-based clustering of live entity positions.
//!
//! A pass is split in two. [`SpatialClusterEngine::plan`] is pure: it takes
//! an owned [`ClusterJob`] and produces an owned [`ClusterPlan`], so it can
//! run on a worker thread. [`SpatialClusterEngine::materialize`] turns the
//! plan into pooled markers and must run on the context that owns the pools.

use crate::background::job::ClusterJob;
use crate::core::config::{ClusterConfig, ModeProfile};
use crate::core::constants::MIN_CLUSTER_SIZE;
use crate::core::geo::{LatLng, Point};
use crate::core::position::{EntityAnnotations, EntityId, EntityPosition};
use crate::core::viewport::Viewport;
use crate::lod::mode::RenderMode;
use crate::pool::manager::ObjectPoolManager;
use crate::pool::marker::{MarkerConfig, PooledMarker};
use crate::prelude::HashMap;
use crate::spatial::grid::{CellKey, GridSpec};
use crate::traits::DecodedImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A group of nearby entities drawn as one badge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Grid cell plus zoom epoch, stable while the camera stays in one
    /// zoom level
    pub id: String,
    /// Arithmetic mean of the members' coordinates
    pub center: LatLng,
    pub member_count: usize,
    pub member_ids: BTreeSet<EntityId>,
}

impl Cluster {
    fn from_members(id: String, members: &[&PlannedMarker]) -> Self {
        let count = members.len() as f64;
        let (lat_sum, lng_sum) = members.iter().fold((0.0, 0.0), |(lat, lng), m| {
            (lat + m.position.lat, lng + m.position.lng)
        });
        Self {
            id,
            center: LatLng::new(lat_sum / count, lng_sum / count),
            member_count: members.len(),
            member_ids: members.iter().map(|m| m.entity_id).collect(),
        }
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.member_ids.contains(&entity_id)
    }
}

/// Counters describing one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    /// Positions inside the viewport
    pub visible: usize,
    /// Positions rejected as invalid or non-finite
    pub invalid: usize,
    /// Valid positions outside the viewport
    pub off_screen: usize,
    /// Entities rendered standalone because they are selected
    pub selected: usize,
    /// Cell doublings applied to get under the marker cap
    pub coarsen_steps: u32,
    /// Whether the cap was still exceeded after the last doubling
    pub forced: bool,
    pub cell_size_meters: f64,
    pub threshold: usize,
}

/// A standalone marker decided by the planning half
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMarker {
    pub entity_id: EntityId,
    pub position: LatLng,
    pub heading: Option<f32>,
    pub speed: Option<f32>,
    pub is_selected: bool,
}

impl PlannedMarker {
    fn from_position(position: &EntityPosition, is_selected: bool) -> Self {
        Self {
            entity_id: position.entity_id,
            position: position.lat_lng(),
            heading: position.heading,
            speed: position.speed,
            is_selected,
        }
    }
}

/// Output of the pure half of a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPlan {
    pub pass: u64,
    pub mode: RenderMode,
    /// Sorted by entity id
    pub markers: Vec<PlannedMarker>,
    /// Sorted by cell
    pub clusters: Vec<Cluster>,
    pub stats: ClusterStats,
}

/// Final result of a pass, ready for the rendering sink
#[derive(Debug, Clone)]
pub struct ClusterOutput {
    pub pass: u64,
    pub mode: RenderMode,
    pub markers: Vec<PooledMarker>,
    pub clusters: Vec<Cluster>,
    pub stats: ClusterStats,
}

impl ClusterOutput {
    /// Output of a pass that rendered nothing
    pub fn empty(mode: RenderMode) -> Self {
        Self {
            pass: 0,
            mode,
            markers: Vec::new(),
            clusters: Vec::new(),
            stats: ClusterStats::default(),
        }
    }

    /// Ids of standalone markers in output order
    pub fn marker_ids(&self) -> Vec<EntityId> {
        self.markers.iter().map(PooledMarker::entity_id).collect()
    }

    /// Total entities represented, standalone or clustered
    pub fn entity_count(&self) -> usize {
        self.markers.len() + self.clusters.iter().map(|c| c.member_count).sum::<usize>()
    }
}

/// Stateful half of the engine: remembers which markers the previous pass
/// acquired so that it can release the ones that disappear.
#[derive(Debug, Default)]
pub struct SpatialClusterEngine {
    config: ClusterConfig,
    live: HashMap<EntityId, PooledMarker>,
}

impl SpatialClusterEngine {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            live: HashMap::default(),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ClusterConfig) {
        self.config = config;
    }

    /// Build the owned job for a pass with this engine's configuration
    pub fn job(
        &self,
        viewport: &Viewport,
        positions: Vec<EntityPosition>,
        mode: RenderMode,
        profile: &ModeProfile,
        annotations: &EntityAnnotations,
    ) -> ClusterJob {
        ClusterJob::new(
            viewport.clone(),
            positions,
            mode,
            profile.clone(),
            self.config.clone(),
        )
        .with_selected(annotations.selected.clone())
    }

    /// Plan and materialize in one go on the calling context
    pub fn cluster<I: DecodedImage>(
        &mut self,
        viewport: &Viewport,
        positions: Vec<EntityPosition>,
        mode: RenderMode,
        profile: &ModeProfile,
        annotations: &EntityAnnotations,
        pools: &mut ObjectPoolManager<I>,
    ) -> ClusterOutput {
        let job = self.job(viewport, positions, mode, profile, annotations);
        let plan = Self::plan(&job);
        self.materialize(plan, annotations, pools)
    }

    /// Pure planning half. Identical jobs give identical plans, and the
    /// order in which distinct entities are listed does not matter.
    pub fn plan(job: &ClusterJob) -> ClusterPlan {
        let config = &job.config;
        let viewport = &job.viewport;
        let mut stats = ClusterStats::default();

        // Later reports for the same entity replace earlier ones
        let mut latest: BTreeMap<EntityId, &EntityPosition> = BTreeMap::new();
        for position in &job.positions {
            latest.insert(position.entity_id, position);
        }

        let mut markers = Vec::new();
        let mut candidates: Vec<(Point, PlannedMarker)> = Vec::new();
        for position in latest.values() {
            if !position.is_renderable() {
                stats.invalid += 1;
                continue;
            }
            let lat_lng = position.lat_lng();
            if !viewport.contains(&lat_lng) {
                stats.off_screen += 1;
                continue;
            }
            stats.visible += 1;

            if job.selected.contains(&position.entity_id) {
                stats.selected += 1;
                markers.push(PlannedMarker::from_position(position, true));
            } else {
                candidates.push((lat_lng.to_mercator(), PlannedMarker::from_position(position, false)));
            }
        }

        let mut threshold = config.threshold_for(viewport.zoom, job.profile.threshold_relief);
        let mut grid = GridSpec::new(viewport.cell_size_meters(
            config.base_cell_size_meters * job.profile.grid_scale,
            config.min_cell_size_meters,
            config.max_cell_size_meters,
        ));

        let mut cells = grid.bucket(&candidates);
        while standalone_count(&cells, threshold) > job.profile.marker_cap
            && stats.coarsen_steps < config.max_coarsen_steps
        {
            match grid.coarsened(config.max_cell_size_meters) {
                Some(coarser) => {
                    grid = coarser;
                    cells = grid.bucket(&candidates);
                    stats.coarsen_steps += 1;
                }
                None => break,
            }
        }
        if standalone_count(&cells, threshold) > job.profile.marker_cap {
            threshold = MIN_CLUSTER_SIZE;
            stats.forced = true;
        }
        if stats.coarsen_steps > 0 || stats.forced {
            log::debug!(
                "pass {}: {} candidates over cap {}, {} coarsen steps, forced={}",
                job.pass,
                candidates.len(),
                job.profile.marker_cap,
                stats.coarsen_steps,
                stats.forced
            );
        }

        let epoch = viewport.zoom_epoch();
        let mut clusters = Vec::new();
        for (key, members) in &cells {
            if members.len() >= threshold {
                let id = cluster_id(epoch, stats.coarsen_steps, key);
                clusters.push(Cluster::from_members(id, members));
            } else {
                markers.extend(members.iter().map(|m| (*m).clone()));
            }
        }
        markers.sort_by_key(|m| m.entity_id);

        stats.cell_size_meters = grid.cell_size_meters;
        stats.threshold = threshold;

        ClusterPlan {
            pass: job.pass,
            mode: job.mode,
            markers,
            clusters,
            stats,
        }
    }

    /// Acquire pooled markers for a plan and release the ones the previous
    /// pass acquired that are no longer standalone.
    pub fn materialize<I: DecodedImage>(
        &mut self,
        plan: ClusterPlan,
        annotations: &EntityAnnotations,
        pools: &mut ObjectPoolManager<I>,
    ) -> ClusterOutput {
        let mut live = HashMap::default();
        let mut markers = Vec::with_capacity(plan.markers.len());

        for planned in plan.markers {
            let id = planned.entity_id;
            let config = MarkerConfig {
                entity_id: id,
                position: planned.position,
                display_name: annotations.display_name(id),
                speed: planned.speed,
                heading: planned.heading,
                is_selected: planned.is_selected,
                quality_tier: plan.mode,
                icon_key: annotations.icon_key(id),
            };
            let marker = pools.markers.acquire(plan.mode, id, config);
            live.insert(id, marker.clone());
            markers.push(marker);
        }

        for (id, previous) in self.live.drain() {
            let still_live = live
                .get(&id)
                .map(|current| current.ptr_eq(&previous))
                .unwrap_or(false);
            if !still_live {
                pools.markers.release(&previous);
            }
        }
        self.live = live;

        ClusterOutput {
            pass: plan.pass,
            mode: plan.mode,
            markers,
            clusters: plan.clusters,
            stats: plan.stats,
        }
    }

    /// Release every marker the engine currently holds
    pub fn release_all<I: DecodedImage>(&mut self, pools: &mut ObjectPoolManager<I>) {
        for (_, marker) in self.live.drain() {
            pools.markers.release(&marker);
        }
    }

    /// Number of markers acquired by the last pass
    pub fn live_markers(&self) -> usize {
        self.live.len()
    }
}

fn standalone_count(cells: &BTreeMap<CellKey, Vec<&PlannedMarker>>, threshold: usize) -> usize {
    cells
        .values()
        .filter(|members| members.len() < threshold)
        .map(Vec::len)
        .sum()
}

fn cluster_id(epoch: u32, coarsen_steps: u32, key: &CellKey) -> String {
    if coarsen_steps == 0 {
        format!("cluster_z{}_{}_{}", epoch, key.x, key.y)
    } else {
        format!("cluster_z{}c{}_{}_{}", epoch, coarsen_steps, key.x, key.y)
    }
}
