//! Shared trait abstractions at the pipeline's seams
//!
//! Everything the pipeline talks to but does not own is reached through a
//! trait defined here: the rendering sink, the clustering workers, decoded
//! images and persisted snapshot storage.

use crate::background::job::ClusterJob;
use crate::pipeline::RenderFrame;
use crate::spatial::clustering::ClusterPlan;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

/// Receives the output of every completed clustering pass
pub trait RenderSink: Send {
    /// Present one frame's worth of markers and clusters
    fn present(&mut self, frame: &RenderFrame);
}

/// Sink that keeps every presented frame; handy for tests and replays
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub frames: Vec<RenderFrame>,
}

impl RenderSink for RecordingSink {
    fn present(&mut self, frame: &RenderFrame) {
        self.frames.push(frame.clone());
    }
}

/// Background executor for clustering plans.
///
/// Only owned data crosses this boundary: a `ClusterJob` goes in, a
/// `ClusterPlan` comes back. Pool mutation stays with the caller.
#[async_trait]
pub trait ClusterWorker: Send + Sync {
    /// Compute a plan for the job
    async fn compute(&self, job: ClusterJob) -> Result<ClusterPlan>;

    /// Name used in logs
    fn name(&self) -> &str {
        "cluster-worker"
    }
}

/// A decoded bitmap held by the bitmap pool
pub trait DecodedImage: Send + Sync + 'static {
    /// Bytes counted against the pool's byte budget
    fn byte_size(&self) -> usize;

    /// Release native resources. Called exactly once, when the pool evicts
    /// the entry.
    fn dispose(&self) {}
}

/// Storage for the warm-start snapshot
pub trait SnapshotStore: Send {
    fn save(&mut self, bytes: &[u8]) -> Result<()>;

    fn load(&self) -> Result<Option<Vec<u8>>>;
}

/// Snapshot store backed by a byte buffer
#[derive(Debug, Default, Clone)]
pub struct MemorySnapshotStore {
    bytes: Option<Vec<u8>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes = Some(bytes.to_vec());
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bytes.clone())
    }
}

/// Snapshot store backed by a single file
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&mut self, bytes: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Pool statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Inserts that had to exceed capacity because nothing was evictable
    pub overflows: u64,
    pub size: usize,
    pub in_use: usize,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    /// For the marker pool a hit is a reused instance
    pub fn reuse_rate(&self) -> f64 {
        self.hit_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats_rates() {
        let stats = PoolStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(PoolStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemorySnapshotStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&[1, 2, 3]).unwrap();
        assert_eq!(store.load().unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = std::env::temp_dir().join(format!("fleetmap-store-{}.bin", std::process::id()));
        let mut store = FileSnapshotStore::new(&path);
        store.save(b"snapshot").unwrap();
        assert_eq!(store.load().unwrap(), Some(b"snapshot".to_vec()));
        let _ = std::fs::remove_file(&path);

        assert_eq!(store.load().unwrap(), None);
    }
}
