//! Frame-aligned work scheduling.
//!
//! Rebuild requests never run where they are made. They queue up and are
//! released at the next frame boundary, with only the newest request per
//! target surviving. Idle work waits for a quiet period instead and is
//! dropped as soon as the host reports activity.

use instant::Instant;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// What a request rebuilds; one pending request per target
pub type TargetId = u32;

/// Handle returned for every accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

/// Work released at a frame boundary
#[derive(Debug, Clone, PartialEq)]
pub struct DueWork<W> {
    pub id: RequestId,
    pub target: TargetId,
    pub work: W,
    pub idle: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub scheduled: u64,
    /// Requests replaced by a newer one for the same target
    pub coalesced: u64,
    pub released: u64,
    pub idle_released: u64,
    pub cancelled: u64,
    /// Requests refused while paused
    pub refused: u64,
    pub frames: u64,
}

#[derive(Debug)]
struct Pending<W> {
    id: RequestId,
    work: W,
}

#[derive(Debug)]
struct IdlePending<W> {
    id: RequestId,
    work: W,
    not_before: Instant,
    min_delay: Duration,
}

#[derive(Debug)]
pub struct FrameScheduler<W> {
    rebuilds: BTreeMap<TargetId, Pending<W>>,
    idle: BTreeMap<TargetId, IdlePending<W>>,
    next_id: u64,
    paused: bool,
    last_activity: Option<Instant>,
    stats: SchedulerStats,
}

impl<W> FrameScheduler<W> {
    pub fn new() -> Self {
        Self {
            rebuilds: BTreeMap::new(),
            idle: BTreeMap::new(),
            next_id: 1,
            paused: false,
            last_activity: None,
            stats: SchedulerStats::default(),
        }
    }

    fn next_request(&mut self) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Queue work for the next frame boundary, replacing whatever was
    /// pending for the same target. Returns `None` while paused.
    pub fn schedule_rebuild(&mut self, target: TargetId, work: W) -> Option<RequestId> {
        if self.paused {
            self.stats.refused += 1;
            return None;
        }
        let id = self.next_request();
        if self.rebuilds.insert(target, Pending { id, work }).is_some() {
            self.stats.coalesced += 1;
        }
        self.stats.scheduled += 1;
        Some(id)
    }

    /// Queue work that runs once the host has been quiet for `min_delay`
    pub fn schedule_idle(&mut self, target: TargetId, work: W, min_delay: Duration) -> Option<RequestId> {
        self.schedule_idle_at(target, work, min_delay, Instant::now())
    }

    pub fn schedule_idle_at(
        &mut self,
        target: TargetId,
        work: W,
        min_delay: Duration,
        now: Instant,
    ) -> Option<RequestId> {
        if self.paused {
            self.stats.refused += 1;
            return None;
        }
        let id = self.next_request();
        let request = IdlePending {
            id,
            work,
            not_before: now + min_delay,
            min_delay,
        };
        if self.idle.insert(target, request).is_some() {
            self.stats.coalesced += 1;
        }
        self.stats.scheduled += 1;
        Some(id)
    }

    /// Host activity: every pending idle request is dropped
    pub fn mark_active(&mut self) {
        self.mark_active_at(Instant::now());
    }

    pub fn mark_active_at(&mut self, now: Instant) {
        self.last_activity = Some(now);
        if !self.idle.is_empty() {
            log::trace!("activity cancelled {} idle requests", self.idle.len());
            self.stats.cancelled += self.idle.len() as u64;
            self.idle.clear();
        }
    }

    /// Drop a single request if it is still pending
    pub fn cancel(&mut self, id: RequestId) -> bool {
        let before = self.rebuilds.len() + self.idle.len();
        self.rebuilds.retain(|_, pending| pending.id != id);
        self.idle.retain(|_, pending| pending.id != id);
        let removed = before - (self.rebuilds.len() + self.idle.len());
        self.stats.cancelled += removed as u64;
        removed > 0
    }

    /// Drop everything pending for a target
    pub fn invalidate(&mut self, target: TargetId) -> bool {
        let removed = self.rebuilds.remove(&target).is_some() as u64
            + self.idle.remove(&target).is_some() as u64;
        self.stats.cancelled += removed;
        removed > 0
    }

    /// Cancel all pending work and refuse new requests until `resume`
    pub fn pause(&mut self) {
        let dropped = (self.rebuilds.len() + self.idle.len()) as u64;
        self.rebuilds.clear();
        self.idle.clear();
        self.stats.cancelled += dropped;
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Frame boundary: release pending rebuilds and any idle work whose
    /// quiet period has elapsed. Rebuilds come first, each group in target
    /// order.
    pub fn on_frame(&mut self, now: Instant) -> Vec<DueWork<W>> {
        self.stats.frames += 1;
        if self.paused {
            return Vec::new();
        }

        let mut due: Vec<DueWork<W>> = std::mem::take(&mut self.rebuilds)
            .into_iter()
            .map(|(target, pending)| DueWork {
                id: pending.id,
                target,
                work: pending.work,
                idle: false,
            })
            .collect();
        self.stats.released += due.len() as u64;

        let last_activity = self.last_activity;
        let ready: Vec<TargetId> = self
            .idle
            .iter()
            .filter(|(_, pending)| {
                let quiet = last_activity
                    .map(|at| now.saturating_duration_since(at) >= pending.min_delay)
                    .unwrap_or(true);
                now >= pending.not_before && quiet
            })
            .map(|(target, _)| *target)
            .collect();
        for target in ready {
            if let Some(pending) = self.idle.remove(&target) {
                self.stats.idle_released += 1;
                due.push(DueWork {
                    id: pending.id,
                    target,
                    work: pending.work,
                    idle: true,
                });
            }
        }
        due
    }

    pub fn has_pending(&self) -> bool {
        !self.rebuilds.is_empty() || !self.idle.is_empty()
    }

    pub fn pending_rebuilds(&self) -> usize {
        self.rebuilds.len()
    }

    pub fn pending_idle(&self) -> usize {
        self.idle.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }
}

impl<W> Default for FrameScheduler<W> {
    fn default() -> Self {
        Self::new()
    }
}
