use crate::core::config::{ClusterConfig, ModeProfile};
use crate::core::position::{EntityId, EntityPosition};
use crate::core::viewport::Viewport;
use crate::lod::mode::RenderMode;
use crate::prelude::HashSet;

/// Owned snapshot of everything a clustering pass needs.
///
/// Safe to move to another thread: nothing in here borrows from the
/// pipeline.
#[derive(Debug, Clone)]
pub struct ClusterJob {
    /// Monotonic pass number, echoed back in the plan
    pub pass: u64,
    pub viewport: Viewport,
    pub positions: Vec<EntityPosition>,
    pub mode: RenderMode,
    pub profile: ModeProfile,
    pub config: ClusterConfig,
    /// Entities that must always render standalone
    pub selected: HashSet<EntityId>,
}

impl ClusterJob {
    pub fn new(
        viewport: Viewport,
        positions: Vec<EntityPosition>,
        mode: RenderMode,
        profile: ModeProfile,
        config: ClusterConfig,
    ) -> Self {
        Self {
            pass: 0,
            viewport,
            positions,
            mode,
            profile,
            config,
            selected: HashSet::default(),
        }
    }

    pub fn with_pass(mut self, pass: u64) -> Self {
        self.pass = pass;
        self
    }

    pub fn with_selected(mut self, selected: HashSet<EntityId>) -> Self {
        self.selected = selected;
        self
    }

    /// Positions that fall inside the viewport; decides inline vs worker
    pub fn visible_count(&self) -> usize {
        self.positions
            .iter()
            .filter(|p| p.is_renderable() && self.viewport.contains(&p.lat_lng()))
            .count()
    }
}
