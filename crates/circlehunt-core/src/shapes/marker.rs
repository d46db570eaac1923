//! Point marker placed on the map.

use super::ShapeId;
use crate::geometry::LatLng;

/// A pin on the map. Markers carry no inside/outside meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub(crate) id: ShapeId,
    pub position: LatLng,
}

impl Marker {
    pub(crate) fn reconstruct(id: ShapeId, position: LatLng) -> Self {
        Self { id, position }
    }

    pub fn id(&self) -> ShapeId {
        self.id
    }
}
