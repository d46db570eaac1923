//! Region algebra: unified fill layers and the solution region.

use crate::geometry::{self, GeometryError, GeometryResult, RegionPart};
use crate::registry::ShapeRegistry;
use crate::shapes::Footprint;
use geo::MultiPolygon;
use log::warn;

/// Union of every visible entry of the given class.
///
/// Drawn as one flat translucent polygon instead of stacking per-shape fills.
pub fn unified_fill(registry: &ShapeRegistry, inside: bool, circle_steps: usize) -> GeometryResult<MultiPolygon<f64>> {
    let footprints = registry
        .all()
        .footprints()
        .filter(|entry| entry.visible() && entry.inside() == inside)
        .map(|entry| entry.footprint(circle_steps))
        .collect::<GeometryResult<Vec<_>>>()?;
    geometry::union(&footprints)
}

/// Intersection of all inside entries minus the union of all outside entries.
///
/// No inside entries means no candidate area at all, not the whole map.
pub fn solution_region(
    inside_entries: &[&dyn Footprint],
    outside_entries: &[&dyn Footprint],
    circle_steps: usize,
) -> GeometryResult<MultiPolygon<f64>> {
    let Some((first, rest)) = inside_entries.split_first() else {
        return Ok(geometry::empty());
    };

    let mut region = first.footprint(circle_steps)?;
    for entry in rest {
        if region.0.is_empty() {
            return Ok(region);
        }
        region = geometry::intersect_pair(&region, &entry.footprint(circle_steps)?)?;
    }
    for entry in outside_entries {
        if region.0.is_empty() {
            break;
        }
        region = geometry::subtract_pair(&region, &entry.footprint(circle_steps)?)?;
    }
    Ok(region)
}

/// Solution region over every entry in the registry, hidden ones included.
pub fn registry_solution(registry: &ShapeRegistry, circle_steps: usize) -> GeometryResult<MultiPolygon<f64>> {
    let (inside, outside): (Vec<&dyn Footprint>, Vec<&dyn Footprint>) =
        registry.all().footprints().partition(|entry| entry.inside());
    solution_region(&inside, &outside, circle_steps)
}

/// Identifies one of the computed layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    InsideFill,
    OutsideFill,
    Solution,
}

/// Cached render layers derived from the registry.
///
/// A layer whose recomputation fails keeps its previous value, so one bad
/// clipping step never blanks the map.
#[derive(Debug, Clone)]
pub struct RegionLayers {
    inside_fill: MultiPolygon<f64>,
    outside_fill: MultiPolygon<f64>,
    solution: MultiPolygon<f64>,
    /// Registry revision the layers were last computed from.
    revision: Option<u64>,
}

impl Default for RegionLayers {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionLayers {
    pub fn new() -> Self {
        Self {
            inside_fill: geometry::empty(),
            outside_fill: geometry::empty(),
            solution: geometry::empty(),
            revision: None,
        }
    }

    /// Recompute all layers. Returns the layers that failed and kept their old value.
    pub fn refresh(&mut self, registry: &ShapeRegistry, circle_steps: usize) -> Vec<(LayerKind, GeometryError)> {
        let mut failures = Vec::new();

        let results = [
            (LayerKind::InsideFill, unified_fill(registry, true, circle_steps)),
            (LayerKind::OutsideFill, unified_fill(registry, false, circle_steps)),
            (LayerKind::Solution, registry_solution(registry, circle_steps)),
        ];
        for (kind, result) in results {
            match result {
                Ok(layer) => *self.layer_mut(kind) = layer,
                Err(e) => {
                    warn!("Keeping previous {:?} layer: {}", kind, e);
                    failures.push((kind, e));
                }
            }
        }

        self.revision = Some(registry.revision());
        failures
    }

    /// Whether the layers reflect the registry's current revision.
    pub fn is_current(&self, registry: &ShapeRegistry) -> bool {
        self.revision == Some(registry.revision())
    }

    /// Registry revision of the last refresh.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn layer(&self, kind: LayerKind) -> &MultiPolygon<f64> {
        match kind {
            LayerKind::InsideFill => &self.inside_fill,
            LayerKind::OutsideFill => &self.outside_fill,
            LayerKind::Solution => &self.solution,
        }
    }

    fn layer_mut(&mut self, kind: LayerKind) -> &mut MultiPolygon<f64> {
        match kind {
            LayerKind::InsideFill => &mut self.inside_fill,
            LayerKind::OutsideFill => &mut self.outside_fill,
            LayerKind::Solution => &mut self.solution,
        }
    }

    pub fn inside_fill(&self) -> &MultiPolygon<f64> {
        &self.inside_fill
    }

    pub fn outside_fill(&self) -> &MultiPolygon<f64> {
        &self.outside_fill
    }

    pub fn solution(&self) -> &MultiPolygon<f64> {
        &self.solution
    }

    /// Layer geometry as region parts, ready for the renderer.
    pub fn parts(&self, kind: LayerKind) -> Vec<RegionPart> {
        geometry::multi_polygon_to_parts(self.layer(kind))
    }

    /// Size of the candidate area in square meters.
    pub fn solution_area_m2(&self) -> f64 {
        geometry::area_square_meters(&self.solution)
    }
}
