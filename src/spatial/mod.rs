//! Spatial bucketing and clustering of entity positions.

pub mod clustering;
pub mod grid;

pub use clustering::{Cluster, ClusterOutput, ClusterPlan, ClusterStats, PlannedMarker, SpatialClusterEngine};
pub use grid::{CellKey, GridSpec};
