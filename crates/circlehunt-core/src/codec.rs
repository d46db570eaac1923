//! Persistence codec: registry state to and from a GeoJSON-shaped feature collection.
//!
//! # Format
//!
//! ```text
//! {
//!   "type": "FeatureCollection",
//!   "features": [
//!     { "type": "Feature",
//!       "geometry": { "type": "Point", "coordinates": [lng, lat] },
//!       "properties": { "type": "circle", "id": 1, "inside": true, "visible": true, "radius": 120.0 } },
//!     { "type": "Feature",
//!       "geometry": { "type": "MultiPolygon", "coordinates": [[[[lng, lat], ...]]] },
//!       "properties": { "type": "polygon", "id": 4, "inside": false, "visible": true } },
//!     { "type": "Feature",
//!       "geometry": { "type": "Point", "coordinates": [lng, lat] },
//!       "properties": { "type": "marker", "id": 5 } }
//!   ],
//!   "circleCount": 3,
//!   "earnedReward": false
//! }
//! ```
//!
//! A merged region is written as one feature per part; all its features share the region ID.

use crate::geometry::{LatLng, RegionPart, Ring};
use crate::registry::ShapeRegistry;
use crate::shapes::{Circle, MAX_SHAPE_ID, Marker, MergedRegion, ShapeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// Feature kinds, for error messages
const KIND_CIRCLE: &str = "circle";
const KIND_POLYGON: &str = "polygon";
const KIND_MARKER: &str = "marker";
const GEOMETRY_POINT: &str = "Point";
const GEOMETRY_MULTI_POLYGON: &str = "MultiPolygon";

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Duplicate feature id {0}")]
    DuplicateId(ShapeId),
    #[error("Feature {id} is a {kind} but has {found} geometry")]
    GeometryMismatch {
        id: ShapeId,
        kind: &'static str,
        found: &'static str,
    },
    #[error("Feature {id} has an invalid ring: {reason}")]
    InvalidRing { id: ShapeId, reason: String },
    #[error("Circle {id} is invalid: {reason}")]
    InvalidCircle { id: ShapeId, reason: String },
    #[error("Region {0} has parts with conflicting flags")]
    InconsistentRegion(ShapeId),
    #[error("Feature id {0} is out of range")]
    IdOutOfRange(ShapeId),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionType {
    #[default]
    FeatureCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureType {
    #[default]
    Feature,
}

/// Persisted map state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default)]
    pub kind: CollectionType,
    pub features: Vec<Feature>,
    #[serde(rename = "circleCount", default)]
    pub circle_count: u32,
    #[serde(rename = "earnedReward", default)]
    pub earned_reward: bool,
}

impl FeatureCollection {
    pub fn empty() -> Self {
        Self {
            kind: CollectionType::FeatureCollection,
            features: Vec::new(),
            circle_count: 0,
            earned_reward: false,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default)]
    pub kind: FeatureType,
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

/// Feature geometry. Positions are `[lng, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    MultiPolygon { coordinates: Vec<Vec<Vec<[f64; 2]>>> },
}

impl Geometry {
    fn name(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => GEOMETRY_POINT,
            Geometry::MultiPolygon { .. } => GEOMETRY_MULTI_POLYGON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeatureProperties {
    Circle {
        id: ShapeId,
        inside: bool,
        #[serde(default = "default_visible")]
        visible: bool,
        /// Radius in meters.
        radius: f64,
    },
    Polygon {
        id: ShapeId,
        inside: bool,
        #[serde(default = "default_visible")]
        visible: bool,
    },
    Marker {
        id: ShapeId,
    },
}

fn default_visible() -> bool {
    true
}

impl FeatureProperties {
    pub fn id(&self) -> ShapeId {
        match self {
            FeatureProperties::Circle { id, .. }
            | FeatureProperties::Polygon { id, .. }
            | FeatureProperties::Marker { id } => *id,
        }
    }
}

/// Registry content rebuilt from a feature collection.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMap {
    pub circles: Vec<Circle>,
    pub regions: Vec<MergedRegion>,
    pub markers: Vec<Marker>,
    /// One past the largest ID in the collection (1 for an empty one).
    pub next_id: ShapeId,
    pub circle_count: u32,
    pub earned_reward: bool,
}

/// An entry handed to the listener-attachment callback during decoding.
#[derive(Debug, Clone, Copy)]
pub enum DecodedEntry<'a> {
    Circle(&'a Circle),
    Region(&'a MergedRegion),
    Marker(&'a Marker),
}

impl DecodedEntry<'_> {
    pub fn id(&self) -> ShapeId {
        match self {
            DecodedEntry::Circle(c) => c.id,
            DecodedEntry::Region(r) => r.id,
            DecodedEntry::Marker(m) => m.id,
        }
    }
}

// --- Encoding ---

/// Encode the whole registry.
pub fn encode(registry: &ShapeRegistry) -> FeatureCollection {
    encode_entries(
        registry.circles(),
        registry.regions(),
        registry.markers(),
        registry.circle_count(),
        registry.earned_reward(),
    )
}

/// Encode explicit entry lists and metadata.
pub fn encode_entries(
    circles: &[Circle],
    regions: &[MergedRegion],
    markers: &[Marker],
    circle_count: u32,
    earned_reward: bool,
) -> FeatureCollection {
    let mut features = Vec::with_capacity(circles.len() + regions.len() + markers.len());

    for circle in circles {
        features.push(Feature {
            kind: FeatureType::Feature,
            geometry: Geometry::Point {
                coordinates: position(circle.center),
            },
            properties: FeatureProperties::Circle {
                id: circle.id,
                inside: circle.inside,
                visible: circle.visible,
                radius: circle.radius_meters,
            },
        });
    }

    for region in regions {
        for part in &region.parts {
            let mut rings = Vec::with_capacity(1 + part.holes.len());
            rings.push(ring_positions(&part.exterior));
            rings.extend(part.holes.iter().map(|h| ring_positions(h)));
            features.push(Feature {
                kind: FeatureType::Feature,
                geometry: Geometry::MultiPolygon {
                    coordinates: vec![rings],
                },
                properties: FeatureProperties::Polygon {
                    id: region.id,
                    inside: region.inside,
                    visible: region.visible,
                },
            });
        }
    }

    for marker in markers {
        features.push(Feature {
            kind: FeatureType::Feature,
            geometry: Geometry::Point {
                coordinates: position(marker.position),
            },
            properties: FeatureProperties::Marker { id: marker.id },
        });
    }

    FeatureCollection {
        kind: CollectionType::FeatureCollection,
        features,
        circle_count,
        earned_reward,
    }
}

fn position(point: LatLng) -> [f64; 2] {
    [point.lng, point.lat]
}

fn ring_positions(ring: &[LatLng]) -> Vec<[f64; 2]> {
    ring.iter().map(|p| position(*p)).collect()
}

// --- Decoding ---

/// Decode a collection without attaching anything.
pub fn decode(collection: &FeatureCollection) -> CodecResult<DecodedMap> {
    decode_with(collection, |_| {})
}

/// Decode a collection, calling `on_entry` once for every reconstructed entry.
///
/// The callback is where the caller re-creates render handles and hooks up
/// click/contextmenu listeners.
pub fn decode_with<F>(collection: &FeatureCollection, mut on_entry: F) -> CodecResult<DecodedMap>
where
    F: FnMut(DecodedEntry<'_>),
{
    let mut circles = Vec::new();
    let mut regions: Vec<MergedRegion> = Vec::new();
    let mut markers = Vec::new();
    let mut seen: HashMap<ShapeId, &'static str> = HashMap::new();
    let mut region_index: HashMap<ShapeId, usize> = HashMap::new();

    for feature in &collection.features {
        let id = feature.properties.id();
        if id > MAX_SHAPE_ID {
            return Err(CodecError::IdOutOfRange(id));
        }
        match (&feature.properties, &feature.geometry) {
            (
                FeatureProperties::Circle {
                    inside,
                    visible,
                    radius,
                    ..
                },
                Geometry::Point { coordinates },
            ) => {
                claim(&mut seen, id, KIND_CIRCLE)?;
                let center = parse_position(coordinates);
                if !center.is_finite() || !radius.is_finite() || *radius <= 0.0 {
                    return Err(CodecError::InvalidCircle {
                        id,
                        reason: format!("center ({}, {}) radius {}", center.lat, center.lng, radius),
                    });
                }
                circles.push(Circle::reconstruct(id, center, *radius, *inside, *visible));
            }
            (FeatureProperties::Polygon { inside, visible, .. }, Geometry::MultiPolygon { coordinates }) => {
                let parts = parse_parts(id, coordinates)?;
                match region_index.get(&id) {
                    Some(&index) => {
                        let region = &mut regions[index];
                        if region.inside != *inside || region.visible != *visible {
                            return Err(CodecError::InconsistentRegion(id));
                        }
                        region.parts.extend(parts);
                    }
                    None => {
                        claim(&mut seen, id, KIND_POLYGON)?;
                        region_index.insert(id, regions.len());
                        regions.push(MergedRegion::reconstruct(id, *inside, *visible, parts));
                    }
                }
            }
            (FeatureProperties::Marker { .. }, Geometry::Point { coordinates }) => {
                claim(&mut seen, id, KIND_MARKER)?;
                markers.push(Marker::reconstruct(id, parse_position(coordinates)));
            }
            (properties, geometry) => {
                let kind = match properties {
                    FeatureProperties::Circle { .. } => KIND_CIRCLE,
                    FeatureProperties::Polygon { .. } => KIND_POLYGON,
                    FeatureProperties::Marker { .. } => KIND_MARKER,
                };
                return Err(CodecError::GeometryMismatch {
                    id,
                    kind,
                    found: geometry.name(),
                });
            }
        }
    }

    let next_id = match seen.keys().max() {
        Some(&max) => max.checked_add(1).ok_or(CodecError::IdOutOfRange(max))?,
        None => 1,
    };

    for circle in &circles {
        on_entry(DecodedEntry::Circle(circle));
    }
    for region in &regions {
        on_entry(DecodedEntry::Region(region));
    }
    for marker in &markers {
        on_entry(DecodedEntry::Marker(marker));
    }

    Ok(DecodedMap {
        circles,
        regions,
        markers,
        next_id,
        circle_count: collection.circle_count,
        earned_reward: collection.earned_reward,
    })
}

fn claim(seen: &mut HashMap<ShapeId, &'static str>, id: ShapeId, kind: &'static str) -> CodecResult<()> {
    if seen.insert(id, kind).is_some() {
        return Err(CodecError::DuplicateId(id));
    }
    Ok(())
}

fn parse_position(coordinates: &[f64; 2]) -> LatLng {
    LatLng::new(coordinates[1], coordinates[0])
}

fn parse_parts(id: ShapeId, polygons: &[Vec<Vec<[f64; 2]>>]) -> CodecResult<Vec<RegionPart>> {
    let mut parts = Vec::with_capacity(polygons.len());
    for rings in polygons {
        let mut rings = rings.iter();
        let exterior = rings.next().ok_or_else(|| CodecError::InvalidRing {
            id,
            reason: "polygon without an exterior ring".to_string(),
        })?;
        let exterior = parse_ring(id, exterior)?;
        let holes = rings.map(|ring| parse_ring(id, ring)).collect::<CodecResult<Vec<_>>>()?;
        parts.push(RegionPart::with_holes(exterior, holes));
    }
    Ok(parts)
}

/// Parse a ring, closing it if the last position does not repeat the first.
fn parse_ring(id: ShapeId, positions: &[[f64; 2]]) -> CodecResult<Ring> {
    let mut ring: Ring = positions.iter().map(parse_position).collect();
    if ring.iter().any(|p| !p.is_finite()) {
        return Err(CodecError::InvalidRing {
            id,
            reason: "non-finite coordinate".to_string(),
        });
    }
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
    if ring.len() < 4 {
        return Err(CodecError::InvalidRing {
            id,
            reason: format!("ring has {} positions, need at least 4", ring.len()),
        });
    }
    Ok(ring)
}
