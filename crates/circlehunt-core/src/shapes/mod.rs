//! Map entries: user-drawn circles, merged regions and markers.

mod circle;
mod marker;
mod region;

pub use circle::Circle;
pub use marker::Marker;
pub use region::MergedRegion;

use crate::geometry::GeometryResult;
use geo::MultiPolygon;

/// Identifier shared by circles, merged regions and markers.
pub type ShapeId = u64;

/// Largest ID a saved map may carry. Larger values do not survive a trip
/// through a JSON number.
pub const MAX_SHAPE_ID: ShapeId = (1 << 53) - 1;

/// Common interface for entries that take part in merging and region algebra.
pub trait Footprint {
    /// Get the entry ID.
    fn id(&self) -> ShapeId;

    /// Whether the entry asserts the target is inside its area.
    fn inside(&self) -> bool;

    /// Whether the entry is currently drawn.
    fn visible(&self) -> bool;

    /// Polygon approximation of the entry's area.
    fn footprint(&self, circle_steps: usize) -> GeometryResult<MultiPolygon<f64>>;
}

/// An owned circle or merged region.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle(Circle),
    Region(MergedRegion),
}

impl Shape {
    pub fn as_circle(&self) -> Option<&Circle> {
        match self {
            Shape::Circle(c) => Some(c),
            Shape::Region(_) => None,
        }
    }

    pub fn as_region(&self) -> Option<&MergedRegion> {
        match self {
            Shape::Region(r) => Some(r),
            Shape::Circle(_) => None,
        }
    }
}

impl Footprint for Shape {
    fn id(&self) -> ShapeId {
        match self {
            Shape::Circle(c) => c.id(),
            Shape::Region(r) => r.id(),
        }
    }

    fn inside(&self) -> bool {
        match self {
            Shape::Circle(c) => c.inside,
            Shape::Region(r) => r.inside,
        }
    }

    fn visible(&self) -> bool {
        match self {
            Shape::Circle(c) => c.visible,
            Shape::Region(r) => r.visible,
        }
    }

    fn footprint(&self, circle_steps: usize) -> GeometryResult<MultiPolygon<f64>> {
        match self {
            Shape::Circle(c) => c.footprint(circle_steps),
            Shape::Region(r) => r.footprint(circle_steps),
        }
    }
}
