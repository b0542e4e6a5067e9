use crate::core::geo::{LatLng, LatLngBounds};
use serde::{Deserialize, Serialize};

/// Lowest zoom level the pipeline accepts
pub const MIN_ZOOM: f64 = 0.0;
/// Highest zoom level the pipeline accepts
pub const MAX_ZOOM: f64 = 20.0;

/// Camera description published by the external map widget.
///
/// The pipeline never mutates a viewport; it only reads the most recent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// The center of the map view in geographical coordinates
    pub center: LatLng,
    /// The current zoom level
    pub zoom: f64,
    /// Visible area (north-east / south-west corners)
    pub bounds: LatLngBounds,
}

impl Viewport {
    /// Creates a new viewport, clamping zoom to the supported range
    pub fn new(center: LatLng, zoom: f64, bounds: LatLngBounds) -> Self {
        Self {
            center,
            zoom: Self::clamp_zoom(zoom),
            bounds,
        }
    }

    /// Viewport whose visible bounds are derived from the center and zoom,
    /// for hosts that only know the camera position.
    pub fn around(center: LatLng, zoom: f64, width_px: f64, height_px: f64) -> Self {
        let zoom = Self::clamp_zoom(zoom);
        let degrees_per_px = 360.0 / (256.0 * 2_f64.powf(zoom));
        let half_lng = (width_px / 2.0) * degrees_per_px;
        let half_lat = (height_px / 2.0) * degrees_per_px * center.lat.to_radians().cos().max(0.01);

        let bounds = LatLngBounds::from_coords(
            LatLng::clamp_lat(center.lat - half_lat),
            LatLng::wrap_lng(center.lng - half_lng),
            LatLng::clamp_lat(center.lat + half_lat),
            LatLng::wrap_lng(center.lng + half_lng),
        );
        Self::new(center, zoom, bounds)
    }

    fn clamp_zoom(zoom: f64) -> f64 {
        if zoom.is_finite() {
            zoom.clamp(MIN_ZOOM, MAX_ZOOM)
        } else {
            MIN_ZOOM
        }
    }

    /// Gets the scale factor for the current zoom level
    pub fn scale(&self) -> f64 {
        2_f64.powf(self.zoom)
    }

    /// Integer zoom bucket, used to tag cluster ids
    pub fn zoom_epoch(&self) -> u32 {
        self.zoom.floor() as u32
    }

    /// Whether a point lies inside the visible bounds
    pub fn contains(&self, point: &LatLng) -> bool {
        self.bounds.contains(point)
    }

    /// Whether the viewport can drive a clustering pass
    pub fn is_usable(&self) -> bool {
        self.center.is_valid() && self.bounds.is_valid()
    }

    /// Grid cell edge in meters for the current zoom. Mode scaling belongs in
    /// `base_size` so the clamp still bounds the result.
    pub fn cell_size_meters(&self, base_size: f64, min_size: f64, max_size: f64) -> f64 {
        (base_size / self.scale()).clamp(min_size, max_size)
    }
}
