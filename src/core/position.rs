use crate::core::geo::LatLng;
use crate::prelude::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Identifier of a tracked entity (vehicle)
pub type EntityId = u64;

/// One position report for one entity.
///
/// Values are immutable once ingested; a newer report replaces the older
/// one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPosition {
    pub entity_id: EntityId,
    pub latitude: f64,
    pub longitude: f64,
    /// Heading in degrees clockwise from north
    pub heading: Option<f32>,
    /// Speed in meters per second
    pub speed: Option<f32>,
    pub timestamp: SystemTime,
    /// Upstream validity flag (e.g. GPS fix lost)
    pub valid: bool,
}

impl EntityPosition {
    pub fn new(entity_id: EntityId, latitude: f64, longitude: f64) -> Self {
        Self {
            entity_id,
            latitude,
            longitude,
            heading: None,
            speed: None,
            timestamp: SystemTime::now(),
            valid: true,
        }
    }

    pub fn with_heading(mut self, heading: f32) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn lat_lng(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Whether the report can be placed on the map at all
    pub fn is_renderable(&self) -> bool {
        self.valid && self.lat_lng().is_valid()
    }
}

/// Per-entity presentation data that does not travel with position reports
#[derive(Debug, Clone, Default)]
pub struct EntityAnnotations {
    pub selected: HashSet<EntityId>,
    pub display_names: HashMap<EntityId, String>,
    pub icon_keys: HashMap<EntityId, String>,
}

impl EntityAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, id: EntityId) {
        self.selected.insert(id);
    }

    pub fn deselect(&mut self, id: EntityId) {
        self.selected.remove(&id);
    }

    pub fn is_selected(&self, id: EntityId) -> bool {
        self.selected.contains(&id)
    }

    pub fn set_display_name(&mut self, id: EntityId, name: impl Into<String>) {
        self.display_names.insert(id, name.into());
    }

    pub fn set_icon_key(&mut self, id: EntityId, key: impl Into<String>) {
        self.icon_keys.insert(id, key.into());
    }

    /// Display name, falling back to `#<id>`
    pub fn display_name(&self, id: EntityId) -> String {
        self.display_names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{}", id))
    }

    pub fn icon_key(&self, id: EntityId) -> Option<String> {
        self.icon_keys.get(&id).cloned()
    }
}
