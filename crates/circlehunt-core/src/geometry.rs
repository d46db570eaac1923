//! Planar geometry kernel.
//!
//! Circles are approximated as polygons in a local equirectangular projection
//! around their own latitude. This is only accurate for small areas away from
//! the poles and the antimeridian.
//!
//! Polygons handed to `geo` use `x = lng` and `y = lat`.

use geo::{Area, BooleanOps, BoundingRect, Coord, Intersects, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::f64::consts::TAU;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Meters covered by one degree of latitude.
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Default number of vertices used to approximate a circle.
pub const DEFAULT_CIRCLE_STEPS: usize = 64;

/// Intersection area (square degrees) below which two shapes count as merely touching.
/// Roughly a hundredth of a square meter at mid latitudes.
pub const OVERLAP_EPSILON: f64 = 1e-12;

/// Geometry errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Degenerate geometry: {0}")]
    Degenerate(String),
    #[error("Polygon {operation} failed: {message}")]
    Clipping {
        operation: &'static str,
        message: String,
    },
}

/// Result type for geometry operations.
pub type GeometryResult<T> = Result<T, GeometryError>;

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Move this point by a planar offset in meters.
    pub fn offset_meters(&self, east: f64, north: f64) -> Self {
        Self::new(
            self.lat + north / METERS_PER_DEGREE_LAT,
            self.lng + east / meters_per_degree_lng(self.lat),
        )
    }

    /// Planar distance in meters, measured in the projection around `self`.
    pub fn distance_meters(&self, other: LatLng) -> f64 {
        let north = (other.lat - self.lat) * METERS_PER_DEGREE_LAT;
        let east = (other.lng - self.lng) * meters_per_degree_lng(self.lat);
        north.hypot(east)
    }

    pub(crate) fn to_coord(self) -> Coord<f64> {
        Coord {
            x: self.lng,
            y: self.lat,
        }
    }

    pub(crate) fn from_coord(coord: Coord<f64>) -> Self {
        Self::new(coord.y, coord.x)
    }
}

/// Meters covered by one degree of longitude at the given latitude.
pub fn meters_per_degree_lng(lat: f64) -> f64 {
    METERS_PER_DEGREE_LAT * lat.to_radians().cos()
}

/// A closed vertex sequence (first vertex repeated at the end).
pub type Ring = Vec<LatLng>;

/// One disjoint polygon of a merged region: an outer ring plus optional holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPart {
    pub exterior: Ring,
    #[serde(default)]
    pub holes: Vec<Ring>,
}

impl RegionPart {
    pub fn new(exterior: Ring) -> Self {
        Self {
            exterior,
            holes: Vec::new(),
        }
    }

    pub fn with_holes(exterior: Ring, holes: Vec<Ring>) -> Self {
        Self { exterior, holes }
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            ring_to_line_string(&self.exterior),
            self.holes.iter().map(|h| ring_to_line_string(h)).collect(),
        )
    }

    pub fn from_polygon(polygon: &Polygon<f64>) -> Self {
        Self {
            exterior: line_string_to_ring(polygon.exterior()),
            holes: polygon.interiors().iter().map(line_string_to_ring).collect(),
        }
    }
}

fn ring_to_line_string(ring: &[LatLng]) -> LineString<f64> {
    LineString::from(ring.iter().map(|p| p.to_coord()).collect::<Vec<_>>())
}

fn line_string_to_ring(line: &LineString<f64>) -> Ring {
    line.coords().map(|c| LatLng::from_coord(*c)).collect()
}

pub fn parts_to_multi_polygon(parts: &[RegionPart]) -> MultiPolygon<f64> {
    MultiPolygon::new(parts.iter().map(RegionPart::to_polygon).collect())
}

pub fn multi_polygon_to_parts(polygons: &MultiPolygon<f64>) -> Vec<RegionPart> {
    polygons.iter().map(RegionPart::from_polygon).collect()
}

pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

/// True if the multipolygon encloses no measurable area.
pub fn is_empty(polygons: &MultiPolygon<f64>) -> bool {
    polygons.0.is_empty() || polygons.unsigned_area() <= OVERLAP_EPSILON
}

/// Approximate a circle as a closed ring of `steps` distinct vertices (counter-clockwise).
pub fn circle_to_polygon(center: LatLng, radius_meters: f64, steps: usize) -> GeometryResult<Ring> {
    if steps < 3 {
        return Err(GeometryError::Degenerate(format!(
            "circle needs at least 3 steps, got {steps}"
        )));
    }
    if !center.is_finite() || !radius_meters.is_finite() || radius_meters <= 0.0 {
        return Err(GeometryError::Degenerate(format!(
            "invalid circle at ({}, {}) with radius {radius_meters}",
            center.lat, center.lng
        )));
    }
    let lng_scale = meters_per_degree_lng(center.lat);
    if lng_scale.abs() < 1e-6 {
        return Err(GeometryError::Degenerate("circle center too close to a pole".to_string()));
    }

    let mut ring = Vec::with_capacity(steps + 1);
    for i in 0..steps {
        let theta = TAU * i as f64 / steps as f64;
        let east = radius_meters * theta.cos();
        let north = radius_meters * theta.sin();
        ring.push(LatLng::new(
            center.lat + north / METERS_PER_DEGREE_LAT,
            center.lng + east / lng_scale,
        ));
    }
    ring.push(ring[0]);
    Ok(ring)
}

/// Same as [`circle_to_polygon`], wrapped as a single-part multipolygon.
pub fn circle_footprint(center: LatLng, radius_meters: f64, steps: usize) -> GeometryResult<MultiPolygon<f64>> {
    let ring = circle_to_polygon(center, radius_meters, steps)?;
    Ok(MultiPolygon::new(vec![RegionPart::new(ring).to_polygon()]))
}

/// True if `a` and `b` share a non-zero area. Touching boundaries do not count.
pub fn overlaps(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> GeometryResult<bool> {
    let (Some(box_a), Some(box_b)) = (a.bounding_rect(), b.bounding_rect()) else {
        return Ok(false);
    };
    if !box_a.intersects(&box_b) {
        return Ok(false);
    }
    let shared = intersect_pair(a, b)?;
    Ok(shared.unsigned_area() > OVERLAP_EPSILON)
}

/// Union of all polygons in the list. An empty list yields an empty result.
pub fn union(polygons: &[MultiPolygon<f64>]) -> GeometryResult<MultiPolygon<f64>> {
    let mut operands = polygons.iter().filter(|p| !p.0.is_empty());
    let Some(first) = operands.next() else {
        return Ok(empty());
    };
    let mut acc = first.clone();
    for next in operands {
        ensure_finite(next, "union")?;
        let merged = guarded("union", || acc.union(next))?;
        acc = merged;
    }
    Ok(acc)
}

/// Intersection of all polygons in the list, short-circuiting on the first empty result.
pub fn intersection(polygons: &[MultiPolygon<f64>]) -> GeometryResult<MultiPolygon<f64>> {
    let Some((first, rest)) = polygons.split_first() else {
        return Ok(empty());
    };
    let mut acc = first.clone();
    for next in rest {
        if acc.0.is_empty() {
            break;
        }
        acc = intersect_pair(&acc, next)?;
    }
    Ok(acc)
}

/// `base` minus every polygon in `subtract`, short-circuiting once nothing is left.
pub fn difference(base: &MultiPolygon<f64>, subtract: &[MultiPolygon<f64>]) -> GeometryResult<MultiPolygon<f64>> {
    let mut acc = base.clone();
    for next in subtract {
        if acc.0.is_empty() {
            break;
        }
        acc = subtract_pair(&acc, next)?;
    }
    Ok(acc)
}

pub fn intersect_pair(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> GeometryResult<MultiPolygon<f64>> {
    if a.0.is_empty() || b.0.is_empty() {
        return Ok(empty());
    }
    ensure_finite(a, "intersection")?;
    ensure_finite(b, "intersection")?;
    guarded("intersection", || a.intersection(b))
}

pub fn subtract_pair(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> GeometryResult<MultiPolygon<f64>> {
    if a.0.is_empty() {
        return Ok(empty());
    }
    if b.0.is_empty() {
        return Ok(a.clone());
    }
    ensure_finite(a, "difference")?;
    ensure_finite(b, "difference")?;
    guarded("difference", || a.difference(b))
}

/// Approximate area in square meters, scaled at the latitude of the bounding box center.
pub fn area_square_meters(polygons: &MultiPolygon<f64>) -> f64 {
    let Some(bounds) = polygons.bounding_rect() else {
        return 0.0;
    };
    let reference_lat = bounds.center().y;
    polygons.unsigned_area() * METERS_PER_DEGREE_LAT * meters_per_degree_lng(reference_lat)
}

fn ensure_finite(polygons: &MultiPolygon<f64>, operation: &'static str) -> GeometryResult<()> {
    let finite = polygons.iter().all(|polygon| {
        polygon.exterior().coords().all(|c| c.x.is_finite() && c.y.is_finite())
            && polygon
                .interiors()
                .iter()
                .all(|ring| ring.coords().all(|c| c.x.is_finite() && c.y.is_finite()))
    });
    if finite {
        Ok(())
    } else {
        Err(GeometryError::Degenerate(format!("non-finite coordinate passed to {operation}")))
    }
}

/// Run a clipping operation, turning a panic inside the clipping library into an error.
fn guarded<F>(operation: &'static str, op: F) -> GeometryResult<MultiPolygon<f64>>
where
    F: FnOnce() -> MultiPolygon<f64>,
{
    panic::catch_unwind(AssertUnwindSafe(op)).map_err(|payload| GeometryError::Clipping {
        operation,
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic in clipping library".to_string()
    }
}
