//! Owned clustering jobs and the workers that can run them off the main
//! context.

pub mod job;
pub mod worker;

pub use job::ClusterJob;
pub use worker::{BlockingClusterWorker, ClusterDispatcher, DispatchStats, ThreadClusterWorker};
