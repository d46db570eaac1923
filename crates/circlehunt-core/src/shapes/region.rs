//! Merged region produced by consolidating overlapping same-class shapes.

use super::{Footprint, ShapeId};
use crate::geometry::{self, GeometryResult, RegionPart};
use geo::MultiPolygon;

/// A possibly multi-part polygon replacing two or more overlapping shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRegion {
    pub(crate) id: ShapeId,
    pub inside: bool,
    pub visible: bool,
    /// Disjoint polygons making up the region.
    pub parts: Vec<RegionPart>,
}

impl MergedRegion {
    pub(crate) fn reconstruct(id: ShapeId, inside: bool, visible: bool, parts: Vec<RegionPart>) -> Self {
        Self {
            id,
            inside,
            visible,
            parts,
        }
    }

    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        geometry::parts_to_multi_polygon(&self.parts)
    }

    /// Approximate area in square meters.
    pub fn area_square_meters(&self) -> f64 {
        geometry::area_square_meters(&self.to_multi_polygon())
    }
}

impl Footprint for MergedRegion {
    fn id(&self) -> ShapeId {
        self.id
    }

    fn inside(&self) -> bool {
        self.inside
    }

    fn visible(&self) -> bool {
        self.visible
    }

    fn footprint(&self, _circle_steps: usize) -> GeometryResult<MultiPolygon<f64>> {
        Ok(self.to_multi_polygon())
    }
}
