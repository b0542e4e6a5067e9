//! Tiered pool of marker configurations.
//!
//! Each `(entity_id, tier)` pair maps to at most one live `PooledMarker`.
//! Re-acquiring an existing pair updates the instance in place so the
//! widget bound to it only sees a property change, never a new object.

use crate::core::config::ModeProfiles;
use crate::core::geo::LatLng;
use crate::core::position::EntityId;
use crate::lod::mode::{QualityTier, RenderMode};
use crate::traits::PoolStats;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything the rendering sink needs to draw one standalone marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    pub entity_id: EntityId,
    pub position: LatLng,
    pub display_name: String,
    pub speed: Option<f32>,
    pub heading: Option<f32>,
    pub is_selected: bool,
    pub quality_tier: QualityTier,
    pub icon_key: Option<String>,
}

impl MarkerConfig {
    pub fn new(entity_id: EntityId, position: LatLng, quality_tier: QualityTier) -> Self {
        Self {
            entity_id,
            position,
            display_name: format!("#{}", entity_id),
            speed: None,
            heading: None,
            is_selected: false,
            quality_tier,
            icon_key: None,
        }
    }
}

#[derive(Debug)]
struct MarkerSlot {
    instance_id: u64,
    config: Mutex<MarkerConfig>,
}

/// Shared handle to a pooled marker instance.
///
/// Clones point at the same instance; use [`PooledMarker::ptr_eq`] to test
/// identity.
#[derive(Debug, Clone)]
pub struct PooledMarker {
    slot: Arc<MarkerSlot>,
}

impl PooledMarker {
    fn new(instance_id: u64, config: MarkerConfig) -> Self {
        Self {
            slot: Arc::new(MarkerSlot {
                instance_id,
                config: Mutex::new(config),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MarkerConfig> {
        self.slot
            .config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> MarkerConfig {
        self.lock().clone()
    }

    pub fn entity_id(&self) -> EntityId {
        self.lock().entity_id
    }

    pub fn tier(&self) -> QualityTier {
        self.lock().quality_tier
    }

    /// Monotonic id assigned at construction, stable across reuse
    pub fn instance_id(&self) -> u64 {
        self.slot.instance_id
    }

    pub fn ptr_eq(&self, other: &PooledMarker) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    fn update(&self, config: MarkerConfig) {
        *self.lock() = config;
    }
}

#[derive(Debug)]
struct PoolEntry {
    marker: PooledMarker,
    in_use: bool,
}

#[derive(Debug)]
struct TierPool {
    entries: LruCache<EntityId, PoolEntry>,
    capacity: usize,
}

impl TierPool {
    fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity,
        }
    }

    /// Least recently acquired entry that is not in use
    fn lru_idle_key(&self) -> Option<EntityId> {
        self.entries
            .iter()
            .rev()
            .find(|(_, entry)| !entry.in_use)
            .map(|(id, _)| *id)
    }

    fn in_use(&self) -> usize {
        self.entries.iter().filter(|(_, entry)| entry.in_use).count()
    }
}

/// Marker pool with one LRU tier per render mode
#[derive(Debug)]
pub struct MarkerPool {
    tiers: [TierPool; 3],
    next_instance_id: u64,
    stats: PoolStats,
}

impl MarkerPool {
    /// Create a pool with per-tier capacities
    pub fn new(high: usize, medium: usize, low: usize) -> Self {
        Self {
            tiers: [TierPool::new(high), TierPool::new(medium), TierPool::new(low)],
            next_instance_id: 1,
            stats: PoolStats::default(),
        }
    }

    /// Capacities taken from each mode's marker cap
    pub fn from_profiles(profiles: &ModeProfiles) -> Self {
        Self::new(
            profiles.high.marker_cap,
            profiles.medium.marker_cap,
            profiles.low.marker_cap,
        )
    }

    fn tier(&self, tier: QualityTier) -> &TierPool {
        &self.tiers[tier.index()]
    }

    fn tier_mut(&mut self, tier: QualityTier) -> &mut TierPool {
        &mut self.tiers[tier.index()]
    }

    /// Hand out the marker for `(entity_id, tier)`, reusing the existing
    /// instance when there is one.
    pub fn acquire(
        &mut self,
        tier: QualityTier,
        entity_id: EntityId,
        mut config: MarkerConfig,
    ) -> PooledMarker {
        config.entity_id = entity_id;
        config.quality_tier = tier;

        if let Some(entry) = self.tier_mut(tier).entries.get_mut(&entity_id) {
            entry.marker.update(config);
            entry.in_use = true;
            let marker = entry.marker.clone();
            self.stats.hits += 1;
            return marker;
        }

        self.stats.misses += 1;
        let pool = &mut self.tiers[tier.index()];
        if pool.entries.len() >= pool.capacity {
            match pool.lru_idle_key() {
                Some(victim) => {
                    pool.entries.pop(&victim);
                    self.stats.evictions += 1;
                }
                None => {
                    self.stats.overflows += 1;
                    log::debug!(
                        "{} marker tier full of in-use entries ({}), growing past capacity",
                        tier,
                        pool.capacity
                    );
                }
            }
        }

        let marker = PooledMarker::new(self.next_instance_id, config);
        self.next_instance_id += 1;
        self.tier_mut(tier).entries.put(
            entity_id,
            PoolEntry {
                marker: marker.clone(),
                in_use: true,
            },
        );
        marker
    }

    /// Mark a marker available for reuse; it stays pooled until evicted
    pub fn release(&mut self, marker: &PooledMarker) -> bool {
        let config = marker.config();
        match self
            .tier_mut(config.quality_tier)
            .entries
            .peek_mut(&config.entity_id)
        {
            Some(entry) if entry.marker.ptr_eq(marker) => {
                entry.in_use = false;
                true
            }
            _ => false,
        }
    }

    /// Release whatever marker `(entity_id, tier)` currently maps to
    pub fn release_by_id(&mut self, entity_id: EntityId, tier: QualityTier) -> bool {
        match self.tier_mut(tier).entries.peek_mut(&entity_id) {
            Some(entry) => {
                entry.in_use = false;
                true
            }
            None => false,
        }
    }

    /// Release every in-use marker of a tier
    pub fn release_all(&mut self, tier: QualityTier) {
        for (_, entry) in self.tier_mut(tier).entries.iter_mut() {
            entry.in_use = false;
        }
    }

    /// Change a tier's capacity, evicting idle excess immediately
    pub fn set_capacity(&mut self, tier: QualityTier, capacity: usize) {
        let mut evicted = 0;
        let pool = self.tier_mut(tier);
        pool.capacity = capacity;
        while pool.entries.len() > pool.capacity {
            match pool.lru_idle_key() {
                Some(victim) => {
                    pool.entries.pop(&victim);
                    evicted += 1;
                }
                None => break,
            }
        }
        self.stats.evictions += evicted;
    }

    /// Drop every idle entry of a tier
    pub fn trim_idle(&mut self, tier: QualityTier) -> usize {
        let pool = self.tier_mut(tier);
        let idle: Vec<EntityId> = pool
            .entries
            .iter()
            .filter(|(_, entry)| !entry.in_use)
            .map(|(id, _)| *id)
            .collect();
        for id in &idle {
            pool.entries.pop(id);
        }
        self.stats.evictions += idle.len() as u64;
        idle.len()
    }

    pub fn contains(&self, tier: QualityTier, entity_id: EntityId) -> bool {
        self.tier(tier).entries.contains(&entity_id)
    }

    pub fn is_in_use(&self, tier: QualityTier, entity_id: EntityId) -> bool {
        self.tier(tier)
            .entries
            .peek(&entity_id)
            .map(|entry| entry.in_use)
            .unwrap_or(false)
    }

    pub fn len(&self, tier: QualityTier) -> usize {
        self.tier(tier).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(|tier| tier.entries.is_empty())
    }

    pub fn capacity(&self, tier: QualityTier) -> usize {
        self.tier(tier).capacity
    }

    pub fn in_use(&self, tier: QualityTier) -> usize {
        self.tier(tier).in_use()
    }

    /// Counters plus current occupancy across all tiers
    pub fn stats(&self) -> PoolStats {
        let mut stats = self.stats.clone();
        stats.size = self.tiers.iter().map(|tier| tier.entries.len()).sum();
        stats.in_use = self.tiers.iter().map(TierPool::in_use).sum();
        stats
    }

    /// Live entries per tier, in `RenderMode::ALL` order
    pub fn tier_sizes(&self) -> [usize; 3] {
        [
            self.len(RenderMode::High),
            self.len(RenderMode::Medium),
            self.len(RenderMode::Low),
        ]
    }
}

impl Default for MarkerPool {
    fn default() -> Self {
        Self::from_profiles(&ModeProfiles::default())
    }
}
