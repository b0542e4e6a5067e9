//! Frame-rate driven render-mode controller.
//!
//! Samples are averaged over a rolling window. A sample only counts toward a
//! tier change when both the raw sample and the window average sit on the
//! same side of the threshold, so one stalled frame can never build a streak
//! on its own. After a transition the new mode is held for a minimum dwell
//! time and the window starts empty.

use crate::core::config::{ControllerConfig, ModeProfile, ModeProfiles};
use crate::lod::mode::RenderMode;
use instant::Instant;
use serde::Serialize;
use std::collections::VecDeque;

/// Record of one mode change
#[derive(Debug, Clone, PartialEq)]
pub struct ModeTransition {
    pub from: RenderMode,
    pub to: RenderMode,
    pub at: Instant,
    /// Window average that triggered the change; `None` when forced
    pub average_fps: Option<f32>,
}

/// Frame-time percentiles over the recent sample history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameTimingStats {
    pub samples: usize,
    pub average_fps: f32,
    pub p50_ms: f32,
    pub p95_ms: f32,
    pub p99_ms: f32,
}

pub struct AdaptiveRenderController {
    config: ControllerConfig,
    profiles: ModeProfiles,
    mode: RenderMode,
    window: VecDeque<(Instant, f32)>,
    low_streak: u32,
    high_streak: u32,
    last_transition: Option<ModeTransition>,
    dwell_started: Option<Instant>,
    transition_count: u64,
    /// Frame times in milliseconds, oldest first
    frame_history: VecDeque<f32>,
}

impl AdaptiveRenderController {
    pub fn new(config: ControllerConfig, profiles: ModeProfiles) -> Self {
        let history_len = config.frame_history;
        Self {
            config,
            profiles,
            mode: RenderMode::High,
            window: VecDeque::new(),
            low_streak: 0,
            high_streak: 0,
            last_transition: None,
            dwell_started: None,
            transition_count: 0,
            frame_history: VecDeque::with_capacity(history_len),
        }
    }

    /// Feed one FPS reading taken now
    pub fn update_fps(&mut self, sample: f32) -> RenderMode {
        self.update_fps_at(sample, Instant::now())
    }

    /// Feed one FPS reading taken at `now`
    pub fn update_fps_at(&mut self, sample: f32, now: Instant) -> RenderMode {
        if !sample.is_finite() || sample <= 0.0 {
            log::debug!("ignoring unusable fps sample {}", sample);
            return self.mode;
        }

        self.record_frame_time(1000.0 / sample);

        self.window.push_back((now, sample));
        let window = self.config.window();
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
        let average = self.window_average();

        if let Some(started) = self.dwell_started {
            if now.duration_since(started) < self.config.min_dwell() {
                self.low_streak = 0;
                self.high_streak = 0;
                return self.mode;
            }
            self.dwell_started = None;
        }

        if sample < self.config.downgrade_fps && average < self.config.downgrade_fps {
            self.low_streak += 1;
            self.high_streak = 0;
        } else if sample > self.config.recovery_fps && average > self.config.recovery_fps {
            self.high_streak += 1;
            self.low_streak = 0;
        } else {
            self.low_streak = 0;
            self.high_streak = 0;
        }

        if self.low_streak >= self.config.downgrade_samples && self.mode != RenderMode::Low {
            self.transition(self.mode.downgraded(), now, Some(average));
        } else if self.high_streak >= self.config.recovery_samples && self.mode != RenderMode::High
        {
            self.transition(self.mode.upgraded(), now, Some(average));
        }

        self.mode
    }

    /// Explicit override (debug tooling, tests). Resets hysteresis state.
    pub fn force_mode(&mut self, mode: RenderMode) -> Option<ModeTransition> {
        let from = self.mode;
        self.mode = mode;
        self.reset_hysteresis();
        self.dwell_started = None;

        if from == mode {
            return None;
        }
        let transition = ModeTransition {
            from,
            to: mode,
            at: Instant::now(),
            average_fps: None,
        };
        log::info!("render mode forced {} -> {}", from, mode);
        self.transition_count += 1;
        self.last_transition = Some(transition.clone());
        Some(transition)
    }

    /// Camera movement is the heaviest workload; an upgrade is never earned
    /// while it is in progress.
    pub fn on_viewport_changed(&mut self) {
        self.high_streak = 0;
    }

    pub fn current_mode(&self) -> RenderMode {
        self.mode
    }

    pub fn marker_cap(&self) -> usize {
        self.profile().marker_cap
    }

    pub fn profile(&self) -> &ModeProfile {
        self.profiles.for_mode(self.mode)
    }

    pub fn profiles(&self) -> &ModeProfiles {
        &self.profiles
    }

    pub fn last_transition(&self) -> Option<&ModeTransition> {
        self.last_transition.as_ref()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn frame_timing(&self) -> FrameTimingStats {
        if self.frame_history.is_empty() {
            return FrameTimingStats::default();
        }

        let mut sorted: Vec<f32> = self.frame_history.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mean_ms = sorted.iter().sum::<f32>() / sorted.len() as f32;

        FrameTimingStats {
            samples: sorted.len(),
            average_fps: if mean_ms > 0.0 { 1000.0 / mean_ms } else { 0.0 },
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
        }
    }

    fn transition(&mut self, to: RenderMode, now: Instant, average_fps: Option<f32>) {
        let from = self.mode;
        log::info!(
            "render mode {} -> {} (avg {:.1} fps)",
            from,
            to,
            average_fps.unwrap_or_default()
        );
        self.mode = to;
        self.reset_hysteresis();
        self.dwell_started = Some(now);
        self.transition_count += 1;
        self.last_transition = Some(ModeTransition {
            from,
            to,
            at: now,
            average_fps,
        });
    }

    fn reset_hysteresis(&mut self) {
        self.low_streak = 0;
        self.high_streak = 0;
        self.window.clear();
    }

    fn window_average(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().map(|(_, fps)| fps).sum::<f32>() / self.window.len() as f32
    }

    fn record_frame_time(&mut self, frame_ms: f32) {
        if self.frame_history.len() >= self.config.frame_history.max(1) {
            self.frame_history.pop_front();
        }
        self.frame_history.push_back(frame_ms);
    }
}

impl Default for AdaptiveRenderController {
    fn default() -> Self {
        Self::new(ControllerConfig::default(), ModeProfiles::default())
    }
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[f32], p: f32) -> f32 {
    let rank = (p * sorted.len() as f32).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller() -> AdaptiveRenderController {
        AdaptiveRenderController::default()
    }

    /// Feeds samples 100ms apart starting at `start`, returning the next timestamp
    fn feed(
        controller: &mut AdaptiveRenderController,
        start: Instant,
        samples: &[f32],
    ) -> Instant {
        let mut at = start;
        for sample in samples {
            controller.update_fps_at(*sample, at);
            at += Duration::from_millis(100);
        }
        at
    }

    #[test]
    fn test_initial_mode_is_high() {
        let controller = controller();
        assert_eq!(controller.current_mode(), RenderMode::High);
        assert_eq!(controller.marker_cap(), 500);
    }

    #[test]
    fn test_single_dip_does_not_downgrade() {
        let mut controller = controller();
        let start = Instant::now();
        feed(&mut controller, start, &[60.0, 60.0, 5.0, 60.0, 60.0, 60.0]);
        assert_eq!(controller.current_mode(), RenderMode::High);
    }

    #[test]
    fn test_two_dips_are_not_sustained() {
        let mut controller = controller();
        feed(&mut controller, Instant::now(), &[30.0, 30.0, 60.0, 30.0, 30.0]);
        assert_eq!(controller.current_mode(), RenderMode::High);
    }

    #[test]
    fn test_sustained_low_downgrades_one_tier() {
        let mut controller = controller();
        feed(&mut controller, Instant::now(), &[30.0, 30.0, 30.0]);
        assert_eq!(controller.current_mode(), RenderMode::Medium);
        assert_eq!(controller.marker_cap(), 300);

        let transition = controller.last_transition().unwrap();
        assert_eq!(transition.from, RenderMode::High);
        assert_eq!(transition.to, RenderMode::Medium);
    }

    #[test]
    fn test_dwell_prevents_skipping_tiers() {
        let mut controller = controller();
        // Six low samples within 600ms: the second streak falls inside the dwell
        feed(&mut controller, Instant::now(), &[20.0; 6]);
        assert_eq!(controller.current_mode(), RenderMode::Medium);
    }

    #[test]
    fn test_no_oscillation_near_threshold() {
        let mut controller = controller();
        let start = Instant::now();
        let mut at = feed(&mut controller, start, &[40.0, 40.0, 40.0]);
        assert_eq!(controller.current_mode(), RenderMode::Medium);

        // FPS jitters inside the hysteresis band
        for i in 0..30 {
            let sample = if i % 2 == 0 { 46.0 } else { 54.0 };
            controller.update_fps_at(sample, at);
            at += Duration::from_millis(100);
        }
        assert_eq!(controller.current_mode(), RenderMode::Medium);
        assert_eq!(controller.transition_count(), 1);
    }

    #[test]
    fn test_recovery_after_dwell() {
        let mut controller = controller();
        let start = Instant::now();
        let at = feed(&mut controller, start, &[30.0, 30.0, 30.0]);
        assert_eq!(controller.current_mode(), RenderMode::Medium);

        // Inside the dwell nothing changes
        let at = feed(&mut controller, at, &[60.0, 60.0, 60.0]);
        assert_eq!(controller.current_mode(), RenderMode::Medium);

        let at = at + Duration::from_secs(3);
        feed(&mut controller, at, &[60.0, 60.0, 60.0]);
        assert_eq!(controller.current_mode(), RenderMode::High);
    }

    #[test]
    fn test_viewport_change_resets_recovery() {
        let mut controller = controller();
        controller.force_mode(RenderMode::Low);
        let start = Instant::now();
        let at = feed(&mut controller, start, &[60.0, 60.0]);
        controller.on_viewport_changed();
        let at = feed(&mut controller, at, &[60.0, 60.0]);
        assert_eq!(controller.current_mode(), RenderMode::Low);
        feed(&mut controller, at, &[60.0]);
        assert_eq!(controller.current_mode(), RenderMode::Medium);
    }

    #[test]
    fn test_force_mode_resets_hysteresis() {
        let mut controller = controller();
        let start = Instant::now();
        let at = feed(&mut controller, start, &[30.0, 30.0]);
        let transition = controller.force_mode(RenderMode::High);
        assert!(transition.is_none());

        // The two earlier low samples no longer count
        feed(&mut controller, at, &[30.0]);
        assert_eq!(controller.current_mode(), RenderMode::High);

        let forced = controller.force_mode(RenderMode::Low).unwrap();
        assert_eq!(forced.to, RenderMode::Low);
        assert_eq!(controller.marker_cap(), 150);
    }

    #[test]
    fn test_unusable_samples_are_ignored() {
        let mut controller = controller();
        feed(
            &mut controller,
            Instant::now(),
            &[f32::NAN, 0.0, -3.0, f32::INFINITY],
        );
        assert_eq!(controller.frame_timing().samples, 0);
        assert_eq!(controller.current_mode(), RenderMode::High);
    }

    #[test]
    fn test_frame_timing_percentiles() {
        let mut controller = controller();
        let mut samples = vec![100.0; 99];
        samples.push(10.0);
        feed(&mut controller, Instant::now(), &samples);

        let timing = controller.frame_timing();
        assert_eq!(timing.samples, 100);
        assert!((timing.p50_ms - 10.0).abs() < 1e-4);
        assert!((timing.p99_ms - 10.0).abs() < 1e-4);
        assert!(timing.p99_ms <= 100.0);
    }
}
