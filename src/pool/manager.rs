//! Owner of both pools; applies mode transitions to them.

use crate::core::config::{ModeProfile, ModeProfiles};
use crate::lod::mode::RenderMode;
use crate::pool::bitmap::{BitmapPool, BitmapStats, RgbaImage};
use crate::pool::marker::MarkerPool;
use crate::traits::{DecodedImage, PoolStats};
use serde::Serialize;

/// Pool counters for the diagnostics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolDiagnostics {
    pub active_tier: RenderMode,
    pub markers: PoolStats,
    pub marker_reuse_rate: f64,
    pub marker_tier_sizes: [usize; 3],
    pub bitmaps: BitmapStats,
    pub bitmap_hit_rate: f64,
}

pub struct ObjectPoolManager<I: DecodedImage = RgbaImage> {
    pub markers: MarkerPool,
    pub bitmaps: BitmapPool<I>,
    active_tier: RenderMode,
}

impl<I: DecodedImage> ObjectPoolManager<I> {
    /// Pools sized for `initial` mode
    pub fn new(profiles: &ModeProfiles, initial: RenderMode) -> Self {
        let profile = profiles.for_mode(initial);
        Self {
            markers: MarkerPool::from_profiles(profiles),
            bitmaps: BitmapPool::new(profile.bitmap_entries, profile.bitmap_bytes),
            active_tier: initial,
        }
    }

    /// Apply a mode's profile.
    ///
    /// The active tier gets the profile's marker cap, idle markers of the
    /// other tiers are dropped, and the bitmap pool is shrunk (or grown) to
    /// the profile's budgets with any excess evicted right away.
    pub fn reconfigure(&mut self, mode: RenderMode, profile: &ModeProfile) {
        self.markers.set_capacity(mode, profile.marker_cap);
        let mut trimmed = 0;
        for tier in RenderMode::ALL {
            if tier != mode {
                trimmed += self.markers.trim_idle(tier);
            }
        }
        self.bitmaps
            .set_limits(profile.bitmap_entries, profile.bitmap_bytes);

        log::debug!(
            "pools reconfigured for {} mode: marker cap {}, {} idle markers trimmed, bitmaps {}/{} bytes",
            mode,
            profile.marker_cap,
            trimmed,
            profile.bitmap_entries,
            profile.bitmap_bytes
        );
        self.active_tier = mode;
    }

    pub fn active_tier(&self) -> RenderMode {
        self.active_tier
    }

    pub fn stats(&self) -> PoolDiagnostics {
        let markers = self.markers.stats();
        let bitmaps = self.bitmaps.stats();
        PoolDiagnostics {
            active_tier: self.active_tier,
            marker_reuse_rate: markers.reuse_rate(),
            marker_tier_sizes: self.markers.tier_sizes(),
            bitmap_hit_rate: bitmaps.pool.hit_rate(),
            markers,
            bitmaps,
        }
    }
}

impl<I: DecodedImage> Default for ObjectPoolManager<I> {
    fn default() -> Self {
        Self::new(&ModeProfiles::default(), RenderMode::High)
    }
}
