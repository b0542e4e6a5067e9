//! When rebuild work runs relative to frame boundaries.

pub mod clock;
pub mod frame;

pub use clock::FrameTicker;
pub use frame::{DueWork, FrameScheduler, RequestId, SchedulerStats, TargetId};
