//! Configuration system for pipeline performance and behavior tuning
//!
//! This module provides a hierarchical configuration system that allows hosts
//! to configure the clustering engine, the adaptive controller, the pools and
//! the scheduler through presets or custom configurations. Every threshold
//! observed to work well in practice is a default here, never a constant the
//! pipeline hard-codes.

use crate::core::constants::*;
use crate::lod::mode::RenderMode;
use crate::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelinePreset {
    Balanced,
    LowPower,
    HighFidelity,
    Custom(PipelineConfig),
}

impl PipelinePreset {
    pub fn resolve(&self) -> PipelineConfig {
        match self {
            Self::Balanced => PipelineConfig::default(),
            Self::LowPower => PipelineConfig {
                modes: ModeProfiles {
                    high: ModeProfile {
                        marker_cap: 300,
                        bitmap_entries: 50,
                        bitmap_bytes: 16 * 1024 * 1024,
                        grid_scale: 1.5,
                        threshold_relief: 1,
                    },
                    medium: ModeProfile {
                        marker_cap: 150,
                        bitmap_entries: 30,
                        bitmap_bytes: 8 * 1024 * 1024,
                        grid_scale: 2.0,
                        threshold_relief: 2,
                    },
                    low: ModeProfile {
                        marker_cap: 80,
                        bitmap_entries: 20,
                        bitmap_bytes: 4 * 1024 * 1024,
                        grid_scale: 3.0,
                        threshold_relief: 2,
                    },
                },
                controller: ControllerConfig {
                    downgrade_fps: 28.0,
                    recovery_fps: 33.0,
                    ..ControllerConfig::default()
                },
                worker: WorkerConfig {
                    inline_threshold: 150,
                    worker_threads: 1,
                    ..WorkerConfig::default()
                },
                ..PipelineConfig::default()
            },
            Self::HighFidelity => PipelineConfig {
                modes: ModeProfiles {
                    high: ModeProfile {
                        marker_cap: 1000,
                        bitmap_entries: 200,
                        bitmap_bytes: 64 * 1024 * 1024,
                        grid_scale: 0.75,
                        threshold_relief: 0,
                    },
                    ..ModeProfiles::default()
                },
                controller: ControllerConfig {
                    downgrade_fps: 50.0,
                    recovery_fps: 58.0,
                    ..ControllerConfig::default()
                },
                ..PipelineConfig::default()
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

impl Default for PipelinePreset {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub modes: ModeProfiles,
    pub cluster: ClusterConfig,
    pub controller: ControllerConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
}

impl PipelineConfig {
    /// Rejects configurations that would make the controller or the
    /// clustering engine misbehave.
    pub fn validate(&self) -> Result<()> {
        let c = &self.controller;
        if !(c.downgrade_fps < c.recovery_fps) {
            return Err(FleetError::InvalidConfig(format!(
                "downgrade_fps ({}) must be below recovery_fps ({})",
                c.downgrade_fps, c.recovery_fps
            )));
        }
        if c.downgrade_samples == 0 || c.recovery_samples == 0 {
            return Err(FleetError::InvalidConfig(
                "hysteresis sample counts must be at least 1".to_string(),
            ));
        }

        let k = &self.cluster;
        if !(k.min_cell_size_meters > 0.0 && k.min_cell_size_meters <= k.max_cell_size_meters) {
            return Err(FleetError::InvalidConfig(format!(
                "cell size range [{}, {}] is empty",
                k.min_cell_size_meters, k.max_cell_size_meters
            )));
        }

        for mode in RenderMode::ALL {
            let profile = self.modes.for_mode(mode);
            if profile.marker_cap == 0 || profile.grid_scale <= 0.0 {
                return Err(FleetError::InvalidConfig(format!(
                    "{:?} profile needs a positive marker cap and grid scale",
                    mode
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Parameters resolved once per render-mode transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    /// Live standalone markers allowed per pass
    pub marker_cap: usize,
    /// Decoded bitmaps kept by the bitmap pool
    pub bitmap_entries: usize,
    /// Byte budget of the bitmap pool
    pub bitmap_bytes: usize,
    /// Multiplier on the zoom-derived grid cell
    pub grid_scale: f64,
    /// Subtracted from the zoom-band density threshold
    pub threshold_relief: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeProfiles {
    pub high: ModeProfile,
    pub medium: ModeProfile,
    pub low: ModeProfile,
}

impl ModeProfiles {
    pub fn for_mode(&self, mode: RenderMode) -> &ModeProfile {
        match mode {
            RenderMode::High => &self.high,
            RenderMode::Medium => &self.medium,
            RenderMode::Low => &self.low,
        }
    }
}

impl Default for ModeProfiles {
    fn default() -> Self {
        Self {
            high: ModeProfile {
                marker_cap: 500,
                bitmap_entries: 100,
                bitmap_bytes: 32 * 1024 * 1024,
                grid_scale: 1.0,
                threshold_relief: 0,
            },
            medium: ModeProfile {
                marker_cap: 300,
                bitmap_entries: 50,
                bitmap_bytes: 16 * 1024 * 1024,
                grid_scale: 1.5,
                threshold_relief: 1,
            },
            low: ModeProfile {
                marker_cap: 150,
                bitmap_entries: 30,
                bitmap_bytes: 8 * 1024 * 1024,
                grid_scale: 2.0,
                threshold_relief: 2,
            },
        }
    }
}

/// Density threshold for zoom levels strictly below `below_zoom`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityBand {
    pub below_zoom: f64,
    pub threshold: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub base_cell_size_meters: f64,
    pub min_cell_size_meters: f64,
    pub max_cell_size_meters: f64,
    /// Bands in ascending `below_zoom` order
    pub density_bands: Vec<DensityBand>,
    /// Threshold above the last band
    pub default_threshold: usize,
    pub max_coarsen_steps: u32,
}

impl ClusterConfig {
    /// Inclusive cell population at which a cell becomes a cluster
    pub fn threshold_for(&self, zoom: f64, relief: usize) -> usize {
        let band = self
            .density_bands
            .iter()
            .find(|band| zoom < band.below_zoom)
            .map(|band| band.threshold)
            .unwrap_or(self.default_threshold);
        band.saturating_sub(relief).max(MIN_CLUSTER_SIZE)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base_cell_size_meters: BASE_CELL_SIZE_METERS,
            min_cell_size_meters: MIN_CELL_SIZE_METERS,
            max_cell_size_meters: MAX_CELL_SIZE_METERS,
            density_bands: vec![
                DensityBand {
                    below_zoom: 8.0,
                    threshold: 6,
                },
                DensityBand {
                    below_zoom: 13.0,
                    threshold: 4,
                },
            ],
            default_threshold: 3,
            max_coarsen_steps: MAX_COARSEN_STEPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub downgrade_fps: f32,
    pub recovery_fps: f32,
    pub downgrade_samples: u32,
    pub recovery_samples: u32,
    pub window_ms: u64,
    pub min_dwell_ms: u64,
    pub frame_history: usize,
}

impl ControllerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_millis(self.min_dwell_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            downgrade_fps: DOWNGRADE_FPS,
            recovery_fps: RECOVERY_FPS,
            downgrade_samples: HYSTERESIS_SAMPLES,
            recovery_samples: HYSTERESIS_SAMPLES,
            window_ms: FPS_WINDOW_MS,
            min_dwell_ms: MODE_MIN_DWELL_MS,
            frame_history: FRAME_HISTORY_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub idle_min_delay_ms: u64,
    pub frame_interval_ms: u64,
}

impl SchedulerConfig {
    pub fn idle_min_delay(&self) -> Duration {
        Duration::from_millis(self.idle_min_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_min_delay_ms: IDLE_MIN_DELAY_MS,
            frame_interval_ms: FRAME_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Visible entities above which clustering leaves the main context
    pub inline_threshold: usize,
    pub timeout_ms: u64,
    pub worker_threads: usize,
}

impl WorkerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            inline_threshold: INLINE_CLUSTER_THRESHOLD,
            timeout_ms: WORKER_TIMEOUT_MS,
            worker_threads: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_presets() {
        let balanced = PipelinePreset::Balanced.resolve();
        let low_power = PipelinePreset::LowPower.resolve();
        let high_fidelity = PipelinePreset::HighFidelity.resolve();

        assert_eq!(balanced.modes.high.marker_cap, 500);
        assert_eq!(balanced.modes.medium.marker_cap, 300);
        assert_eq!(balanced.modes.low.marker_cap, 150);
        assert_eq!(balanced.modes.low.bitmap_entries, 30);

        assert!(low_power.modes.high.marker_cap < balanced.modes.high.marker_cap);
        assert!(high_fidelity.modes.high.marker_cap > balanced.modes.high.marker_cap);

        for config in [balanced, low_power, high_fidelity] {
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_threshold_bands() {
        let config = ClusterConfig::default();
        assert_eq!(config.threshold_for(5.0, 0), 6);
        assert_eq!(config.threshold_for(10.0, 0), 4);
        assert_eq!(config.threshold_for(16.0, 0), 3);
        // Relief never pushes the threshold under a pair
        assert_eq!(config.threshold_for(16.0, 5), MIN_CLUSTER_SIZE);
        assert_eq!(config.threshold_for(5.0, 2), 4);
    }

    #[test]
    fn test_validation_rejects_inverted_hysteresis() {
        let mut config = PipelineConfig::default();
        config.controller.downgrade_fps = 60.0;
        assert!(matches!(
            config.validate(),
            Err(FleetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelinePreset::LowPower.resolve();
        let json = config.to_json().unwrap();
        let back = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
    }
}
