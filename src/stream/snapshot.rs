//! Warm-start snapshot of the hub's cached positions.

use crate::core::position::EntityPosition;
use crate::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Bumped whenever the encoded layout changes
pub const SNAPSHOT_VERSION: u32 = 1;

/// Marker pool occupancy per tier at the time of the snapshot.
///
/// Restoring uses it only as a sizing hint; pooled instances themselves are
/// never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSizes {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl From<[usize; 3]> for TierSizes {
    fn from(sizes: [usize; 3]) -> Self {
        Self {
            high: sizes[0],
            medium: sizes[1],
            low: sizes[2],
        }
    }
}

impl TierSizes {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSnapshot {
    pub version: u32,
    pub taken_at: SystemTime,
    /// Sorted by entity id
    pub positions: Vec<EntityPosition>,
    pub tier_sizes: TierSizes,
}

impl HubSnapshot {
    pub fn new(mut positions: Vec<EntityPosition>, tier_sizes: TierSizes) -> Self {
        positions.sort_by_key(|p| p.entity_id);
        Self {
            version: SNAPSHOT_VERSION,
            taken_at: SystemTime::now(),
            positions,
            tier_sizes,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let snapshot: HubSnapshot = bincode::deserialize(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(FleetError::SnapshotVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let snapshot = HubSnapshot::new(
            vec![
                EntityPosition::new(9, 48.1, 11.5).with_heading(270.0),
                EntityPosition::new(3, 48.2, 11.6).with_speed(13.5),
                EntityPosition::new(4, f64::MAX, 0.0).invalid(),
            ],
            TierSizes::from([120, 4, 0]),
        );
        let decoded = HubSnapshot::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.positions[0].entity_id, 3);
        assert_eq!(decoded.tier_sizes.total(), 124);
    }

    #[test]
    fn test_decode_rejects_other_versions() {
        let mut snapshot = HubSnapshot::new(Vec::new(), TierSizes::default());
        snapshot.version = SNAPSHOT_VERSION + 1;
        let bytes = snapshot.encode().unwrap();
        assert!(matches!(
            HubSnapshot::decode(&bytes),
            Err(FleetError::SnapshotVersion { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            HubSnapshot::decode(&[0xff, 0x01]),
            Err(FleetError::Snapshot(_))
        ));
    }
}
