//! Per-entity position fan-out.
//!
//! Every entity id gets its own channel: a last-value slot paired with a
//! `tokio::sync::broadcast` sender. Publishing touches exactly one channel,
//! so a subscriber of entity A never wakes up for an update to entity B.
//! Subscribing reads the slot and attaches to the sender under the same
//! lock, so a subscriber sees the replayed value followed by every later
//! update with no gap and no duplicate.

use crate::core::constants::CHANNEL_CAPACITY;
use crate::core::geo::LatLngBounds;
use crate::core::position::{EntityId, EntityPosition};
use crate::prelude::HashMap;
use crate::stream::snapshot::{HubSnapshot, TierSizes};
use crate::{FleetError, Result};
use futures::Stream;
use geo::BoundingRect;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Hub counters
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct HubStats {
    /// Updates accepted into the cache
    pub published: u64,
    /// Updates sent to at least one subscriber
    pub emitted: u64,
    /// Updates cached without a send because nobody was listening
    pub skipped: u64,
    /// Updates older than the cached value for their entity
    pub stale: u64,
    /// Updates refused because the hub was disposed
    pub rejected: u64,
    pub channels: usize,
    pub subscribers: usize,
}

struct EntityChannel {
    last: Option<EntityPosition>,
    sender: broadcast::Sender<EntityPosition>,
}

impl EntityChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { last: None, sender }
    }
}

struct HubInner {
    channels: HashMap<EntityId, EntityChannel>,
    capacity: usize,
    disposed: bool,
    stats: HubStats,
}

impl HubInner {
    fn channel(&mut self, entity_id: EntityId) -> &mut EntityChannel {
        let capacity = self.capacity;
        self.channels
            .entry(entity_id)
            .or_insert_with(|| EntityChannel::new(capacity))
    }

    /// `restoring` also skips values equal to the cached one, so replaying a
    /// snapshot the hub already holds emits nothing.
    fn publish(&mut self, position: EntityPosition, restoring: bool) -> Result<bool> {
        if self.disposed {
            self.stats.rejected += 1;
            return Err(FleetError::HubDisposed);
        }

        let capacity = self.capacity;
        let channel = self
            .channels
            .entry(position.entity_id)
            .or_insert_with(|| EntityChannel::new(capacity));
        if let Some(last) = &channel.last {
            if position.timestamp < last.timestamp {
                self.stats.stale += 1;
                return Ok(false);
            }
            if restoring && position.timestamp == last.timestamp {
                return Ok(false);
            }
        }

        channel.last = Some(position.clone());
        let sent = if channel.sender.receiver_count() == 0 {
            false
        } else {
            channel.sender.send(position).is_ok()
        };

        self.stats.published += 1;
        if sent {
            self.stats.emitted += 1;
        } else {
            self.stats.skipped += 1;
        }
        Ok(true)
    }
}

/// Reactive per-entity position distribution
#[derive(Clone)]
pub struct PositionStreamHub {
    inner: Arc<Mutex<HubInner>>,
}

impl PositionStreamHub {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Hub whose per-entity channels buffer `capacity` updates per slow
    /// subscriber before it starts skipping
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                channels: HashMap::default(),
                capacity: capacity.max(1),
                disposed: false,
                stats: HubStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish one update. Returns `Ok(false)` when the update was older than
    /// the cached value and got dropped.
    pub fn publish(&self, position: EntityPosition) -> Result<bool> {
        self.lock().publish(position, false)
    }

    /// Publish several updates under one lock; returns how many were accepted
    pub fn publish_batch(&self, positions: impl IntoIterator<Item = EntityPosition>) -> Result<usize> {
        self.publish_all(positions, false)
    }

    fn publish_all(
        &self,
        positions: impl IntoIterator<Item = EntityPosition>,
        restoring: bool,
    ) -> Result<usize> {
        let mut inner = self.lock();
        let mut accepted = 0;
        for position in positions {
            if inner.publish(position, restoring)? {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    /// Subscribe to one entity. The subscription first yields the cached
    /// value, if any, then live updates.
    pub fn position_stream(&self, entity_id: EntityId) -> Result<PositionSubscription> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(FleetError::HubDisposed);
        }
        let channel = inner.channel(entity_id);
        Ok(PositionSubscription {
            entity_id,
            replay: channel.last.clone(),
            receiver: channel.sender.subscribe(),
        })
    }

    pub fn latest_position(&self, entity_id: EntityId) -> Option<EntityPosition> {
        self.lock()
            .channels
            .get(&entity_id)
            .and_then(|channel| channel.last.clone())
    }

    /// Cached value of every entity, sorted by id
    pub fn all_latest_positions(&self) -> Vec<EntityPosition> {
        let mut positions: Vec<EntityPosition> = self
            .lock()
            .channels
            .values()
            .filter_map(|channel| channel.last.clone())
            .collect();
        positions.sort_by_key(|p| p.entity_id);
        positions
    }

    /// Bounds of every renderable cached position
    pub fn bounding_box(&self) -> Option<LatLngBounds> {
        let points: Vec<geo::Point<f64>> = self
            .lock()
            .channels
            .values()
            .filter_map(|channel| channel.last.as_ref())
            .filter(|p| p.is_renderable())
            .map(|p| p.lat_lng().into())
            .collect();
        geo::MultiPoint::from(points)
            .bounding_rect()
            .map(LatLngBounds::from)
    }

    /// Close the entity's channel and forget its cached value
    pub fn remove_entity(&self, entity_id: EntityId) -> bool {
        self.lock().channels.remove(&entity_id).is_some()
    }

    pub fn entity_count(&self) -> usize {
        self.lock()
            .channels
            .values()
            .filter(|channel| channel.last.is_some())
            .count()
    }

    pub fn subscriber_count(&self, entity_id: EntityId) -> usize {
        self.lock()
            .channels
            .get(&entity_id)
            .map(|channel| channel.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Close every channel; later publishes and subscribes are refused
    pub fn dispose(&self) {
        let mut inner = self.lock();
        let closed = inner.channels.len();
        inner.channels.clear();
        inner.disposed = true;
        log::debug!("position hub disposed, {} channels closed", closed);
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn stats(&self) -> HubStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.channels = inner.channels.len();
        stats.subscribers = inner
            .channels
            .values()
            .map(|channel| channel.sender.receiver_count())
            .sum();
        stats
    }

    /// Capture every cached position together with the pool tier sizes
    pub fn snapshot(&self, tier_sizes: TierSizes) -> HubSnapshot {
        HubSnapshot::new(self.all_latest_positions(), tier_sizes)
    }

    /// Feed a snapshot back through the publish path; values not newer than
    /// what the hub already holds are dropped.
    pub fn restore(&self, snapshot: &HubSnapshot) -> Result<usize> {
        let accepted = self.publish_all(snapshot.positions.iter().cloned(), true)?;
        log::info!(
            "restored {} of {} positions from snapshot",
            accepted,
            snapshot.positions.len()
        );
        Ok(accepted)
    }
}

impl Default for PositionStreamHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Live view of one entity's positions
pub struct PositionSubscription {
    entity_id: EntityId,
    replay: Option<EntityPosition>,
    receiver: broadcast::Receiver<EntityPosition>,
}

impl PositionSubscription {
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Next position; `None` once the channel is closed.
    ///
    /// A subscriber that fell behind skips straight to the newest value.
    pub async fn next(&mut self) -> Option<EntityPosition> {
        if let Some(replayed) = self.replay.take() {
            return Some(replayed);
        }
        loop {
            match self.receiver.recv().await {
                Ok(position) => return Some(position),
                Err(RecvError::Lagged(missed)) => {
                    log::debug!("subscriber of {} lagged by {}", self.entity_id, missed);
                    if let Some(newest) = self.drain_to_newest() {
                        return Some(newest);
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next); `None` when nothing is
    /// pending or the channel is closed.
    pub fn try_next(&mut self) -> Option<EntityPosition> {
        if let Some(replayed) = self.replay.take() {
            return Some(replayed);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(position) => return Some(position),
                Err(TryRecvError::Lagged(_)) => {
                    if let Some(newest) = self.drain_to_newest() {
                        return Some(newest);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn drain_to_newest(&mut self) -> Option<EntityPosition> {
        let mut newest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(position) => newest = Some(position),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return newest,
            }
        }
    }

    /// Stream form: the first item is the cached value (`None` if the entity
    /// has not reported yet), followed by every live update.
    pub fn into_stream(self) -> impl Stream<Item = Option<EntityPosition>> + Send {
        futures::stream::unfold((self, true), |(mut subscription, first)| async move {
            if first {
                let replayed = subscription.replay.take();
                return Some((replayed, (subscription, false)));
            }
            subscription
                .next()
                .await
                .map(|position| (Some(position), (subscription, false)))
        })
    }
}
