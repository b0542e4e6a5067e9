//! Adaptive level of detail: the render-quality tier and the controller that
//! moves between tiers based on measured frame rate.

pub mod controller;
pub mod mode;

pub use controller::{AdaptiveRenderController, FrameTimingStats, ModeTransition};
pub use mode::{QualityTier, RenderMode};
