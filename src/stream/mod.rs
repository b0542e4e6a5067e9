//! Reactive distribution of position updates.

pub mod hub;
pub mod snapshot;

pub use hub::{HubStats, PositionStreamHub, PositionSubscription};
pub use snapshot::{HubSnapshot, TierSizes, SNAPSHOT_VERSION};
