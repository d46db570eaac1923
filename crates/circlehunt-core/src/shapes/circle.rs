//! User-drawn circle.

use super::{Footprint, ShapeId};
use crate::geometry::{self, GeometryResult, LatLng, Ring};
use geo::MultiPolygon;

/// A circle drawn by the user, classified as inside or outside the target zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub(crate) id: ShapeId,
    /// Center point.
    pub center: LatLng,
    /// Radius in meters.
    pub radius_meters: f64,
    /// Target is asserted to be inside this circle.
    pub inside: bool,
    /// Whether the circle is drawn on the map.
    pub visible: bool,
}

impl Circle {
    /// Reconstruct a circle with a specific ID (for registry and storage).
    pub(crate) fn reconstruct(
        id: ShapeId,
        center: LatLng,
        radius_meters: f64,
        inside: bool,
        visible: bool,
    ) -> Self {
        Self {
            id,
            center,
            radius_meters,
            inside,
            visible,
        }
    }

    /// Polygon approximation as a single closed ring.
    pub fn ring(&self, steps: usize) -> GeometryResult<Ring> {
        geometry::circle_to_polygon(self.center, self.radius_meters, steps)
    }

    /// Planar containment test against the exact circle.
    pub fn contains(&self, point: LatLng) -> bool {
        self.center.distance_meters(point) <= self.radius_meters
    }
}

impl Footprint for Circle {
    fn id(&self) -> ShapeId {
        self.id
    }

    fn inside(&self) -> bool {
        self.inside
    }

    fn visible(&self) -> bool {
        self.visible
    }

    fn footprint(&self, circle_steps: usize) -> GeometryResult<MultiPolygon<f64>> {
        geometry::circle_footprint(self.center, self.radius_meters, circle_steps)
    }
}
