//! Consolidation of overlapping same-class shapes.
//!
//! Shapes are partitioned by their inside/outside class. Within a class, an
//! overlap graph is built pairwise and every connected component with two or
//! more members is replaced by one merged region holding the union of its
//! members. Passes repeat until nothing merges, so the outcome only depends
//! on the geometry, not on the order shapes were drawn in.

use crate::geometry::{self, GeometryError, OVERLAP_EPSILON, DEFAULT_CIRCLE_STEPS};
use crate::registry::ShapeRegistry;
use crate::shapes::ShapeId;
use geo::{Area, MultiPolygon};
use log::{debug, warn};

/// Upper bound on resolution passes. One pass normally reaches the fixed point.
pub const MAX_RESOLVE_PASSES: usize = 8;

/// A single consolidation performed by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRecord {
    /// ID of the new merged region.
    pub new_id: ShapeId,
    /// Retired IDs of the entries it replaced, ascending.
    pub absorbed: Vec<ShapeId>,
    pub inside: bool,
}

/// A component that could not be merged.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeFailure {
    pub members: Vec<ShapeId>,
    pub error: GeometryError,
}

/// Outcome of a resolver run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveReport {
    pub merges: Vec<MergeRecord>,
    /// Regions dropped because they no longer enclose any area.
    pub pruned: Vec<ShapeId>,
    pub failures: Vec<MergeFailure>,
    pub passes: usize,
}

impl ResolveReport {
    /// True if the registry was left untouched.
    pub fn is_noop(&self) -> bool {
        self.merges.is_empty() && self.pruned.is_empty()
    }

    /// Every ID that stopped existing during the run.
    pub fn retired_ids(&self) -> impl Iterator<Item = ShapeId> + '_ {
        self.merges
            .iter()
            .flat_map(|m| m.absorbed.iter().copied())
            .chain(self.pruned.iter().copied())
    }

    /// The entry that now holds `id`, following merges made during the run.
    pub fn successor(&self, id: ShapeId) -> Option<ShapeId> {
        let mut current = id;
        let mut moved = false;
        for merge in &self.merges {
            if merge.absorbed.contains(&current) {
                current = merge.new_id;
                moved = true;
            }
        }
        moved.then_some(current)
    }
}

/// Planned replacement of one connected component.
struct PlannedMerge {
    members: Vec<ShapeId>,
    inside: bool,
    visible: bool,
    geometry: MultiPolygon<f64>,
}

/// Candidate entry with its polygon approximation.
struct Candidate {
    id: ShapeId,
    inside: bool,
    visible: bool,
    footprint: MultiPolygon<f64>,
}

/// Keeps the registry free of overlapping same-class entries.
#[derive(Debug, Clone, Copy)]
pub struct IntersectionResolver {
    circle_steps: usize,
}

impl Default for IntersectionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CIRCLE_STEPS)
    }
}

impl IntersectionResolver {
    pub fn new(circle_steps: usize) -> Self {
        Self { circle_steps }
    }

    pub fn circle_steps(&self) -> usize {
        self.circle_steps
    }

    /// Merge overlapping same-class entries until none remain.
    pub fn resolve(&self, registry: &mut ShapeRegistry) -> ResolveReport {
        let mut report = ResolveReport {
            pruned: self.prune_empty(registry),
            ..Default::default()
        };

        for pass in 0..MAX_RESOLVE_PASSES {
            report.passes = pass + 1;
            let plan = self.plan(registry, &mut report.failures);
            if plan.is_empty() {
                break;
            }
            for merge in plan {
                let parts = geometry::multi_polygon_to_parts(&merge.geometry);
                let new_id = registry.replace_with_region(&merge.members, merge.inside, merge.visible, parts);
                debug!(
                    "Merged {:?} into region {} ({})",
                    merge.members,
                    new_id,
                    if merge.inside { "inside" } else { "outside" }
                );
                report.merges.push(MergeRecord {
                    new_id,
                    absorbed: merge.members,
                    inside: merge.inside,
                });
            }
        }

        report
    }

    /// Remove merged regions that no longer enclose any area.
    fn prune_empty(&self, registry: &mut ShapeRegistry) -> Vec<ShapeId> {
        let empty: Vec<ShapeId> = registry
            .regions()
            .iter()
            .filter(|r| r.to_multi_polygon().unsigned_area() <= OVERLAP_EPSILON)
            .map(|r| r.id)
            .collect();
        for &id in &empty {
            debug!("Pruning empty region {}", id);
            // The ID was just read from the registry
            let _ = registry.remove_shape(id);
        }
        empty
    }

    /// Find the components to merge in the current registry state.
    fn plan(&self, registry: &ShapeRegistry, failures: &mut Vec<MergeFailure>) -> Vec<PlannedMerge> {
        let mut candidates: Vec<Candidate> = Vec::new();
        for entry in registry.all().footprints() {
            match entry.footprint(self.circle_steps) {
                Ok(footprint) => candidates.push(Candidate {
                    id: entry.id(),
                    inside: entry.inside(),
                    visible: entry.visible(),
                    footprint,
                }),
                Err(e) => warn!("Skipping shape {} during merge: {}", entry.id(), e),
            }
        }
        candidates.sort_by_key(|c| c.id);

        let mut plan = Vec::new();
        for inside in [true, false] {
            let pool: Vec<&Candidate> = candidates.iter().filter(|c| c.inside == inside).collect();
            for component in overlap_components(&pool) {
                let members: Vec<ShapeId> = component.iter().map(|&i| pool[i].id).collect();
                // Known-bad components are reported once, not on every pass
                if failures.iter().any(|f| f.members == members) {
                    continue;
                }
                let footprints: Vec<MultiPolygon<f64>> =
                    component.iter().map(|&i| pool[i].footprint.clone()).collect();
                match geometry::union(&footprints) {
                    Ok(geometry) => plan.push(PlannedMerge {
                        visible: component.iter().any(|&i| pool[i].visible),
                        members,
                        inside,
                        geometry,
                    }),
                    Err(error) => {
                        warn!("Could not merge shapes {:?}: {}", members, error);
                        failures.push(MergeFailure { members, error });
                    }
                }
            }
        }

        // Lowest member first, so new IDs follow a stable order
        plan.sort_by_key(|m| m.members[0]);
        plan
    }
}

/// Connected components of size two or more in the pairwise overlap graph.
/// Each component lists pool indices in ascending order.
fn overlap_components(pool: &[&Candidate]) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(pool.len());
    for i in 0..pool.len() {
        for j in (i + 1)..pool.len() {
            match geometry::overlaps(&pool[i].footprint, &pool[j].footprint) {
                Ok(true) => sets.union(i, j),
                Ok(false) => {}
                Err(e) => warn!(
                    "Overlap test between {} and {} failed: {}",
                    pool[i].id, pool[j].id, e
                ),
            }
        }
    }

    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut component_of_root: Vec<Option<usize>> = vec![None; pool.len()];
    for i in 0..pool.len() {
        let root = sets.find(i);
        match component_of_root[root] {
            Some(index) => components[index].push(i),
            None => {
                component_of_root[root] = Some(components.len());
                components.push(vec![i]);
            }
        }
    }
    components.retain(|c| c.len() >= 2);
    components
}

/// Union-find over pool indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Keep the smaller index as root
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LatLng;
    use crate::shapes::Footprint;
    use geo::{Contains, Point};

    fn origin() -> LatLng {
        LatLng::new(45.4642, 9.19)
    }

    fn east(meters: f64) -> LatLng {
        origin().offset_meters(meters, 0.0)
    }

    #[test]
    fn test_disjoint_circles_stay_separate() {
        let mut registry = ShapeRegistry::new();
        let a = registry.add_circle(origin(), 100.0, true).unwrap();
        let b = registry.add_circle(east(500.0), 100.0, true).unwrap();
        let before = registry.circles().to_vec();

        let report = IntersectionResolver::default().resolve(&mut registry);

        assert!(report.is_noop());
        assert_eq!(registry.circles(), before.as_slice());
        assert!(registry.regions().is_empty());
        assert!(registry.circle(a).is_some() && registry.circle(b).is_some());
    }

    #[test]
    fn test_overlapping_pair_merges() {
        let mut registry = ShapeRegistry::new();
        let a = registry.add_circle(origin(), 100.0, true).unwrap();
        let b = registry.add_circle(east(150.0), 100.0, true).unwrap();
        let area_a = registry.circle(a).unwrap().footprint(64).unwrap();
        let area_b = registry.circle(b).unwrap().footprint(64).unwrap();
        let expected = geometry::union(&[area_a, area_b]).unwrap().unsigned_area();

        let report = IntersectionResolver::default().resolve(&mut registry);

        assert_eq!(report.merges.len(), 1);
        assert_eq!(report.merges[0].absorbed, vec![a, b]);
        assert!(!registry.contains(a));
        assert!(!registry.contains(b));
        assert!(registry.circles().is_empty());
        assert_eq!(registry.regions().len(), 1);

        let region = &registry.regions()[0];
        assert!(region.inside);
        assert!(region.visible);
        let merged = region.to_multi_polygon();
        assert!(merged.unsigned_area() >= expected * (1.0 - 1e-9));
        assert!(merged.contains(&Point::from(origin().to_coord())));
        assert!(merged.contains(&Point::from(east(150.0).to_coord())));
    }

    #[test]
    fn test_opposite_classes_never_merge() {
        let mut registry = ShapeRegistry::new();
        registry.add_circle(origin(), 100.0, true).unwrap();
        registry.add_circle(east(50.0), 100.0, false).unwrap();

        let report = IntersectionResolver::default().resolve(&mut registry);

        assert!(report.is_noop());
        assert_eq!(registry.circles().len(), 2);
    }

    #[test]
    fn test_chain_merges_through_middle() {
        let mut registry = ShapeRegistry::new();
        let a = registry.add_circle(origin(), 100.0, true).unwrap();
        let b = registry.add_circle(east(150.0), 100.0, true).unwrap();
        let c = registry.add_circle(east(300.0), 100.0, true).unwrap();

        let report = IntersectionResolver::default().resolve(&mut registry);

        assert_eq!(report.merges.len(), 1);
        assert_eq!(report.merges[0].absorbed, vec![a, b, c]);
        assert_eq!(registry.regions().len(), 1);
        assert_eq!(registry.regions()[0].parts.len(), 1);
        assert_eq!(report.successor(a), Some(report.merges[0].new_id));
    }

    #[test]
    fn test_chain_is_order_independent() {
        let mut forward = ShapeRegistry::new();
        for offset in [0.0, 150.0, 300.0] {
            forward.add_circle(east(offset), 100.0, true).unwrap();
        }
        let mut backward = ShapeRegistry::new();
        for offset in [300.0, 150.0, 0.0] {
            backward.add_circle(east(offset), 100.0, true).unwrap();
        }
        let resolver = IntersectionResolver::default();
        resolver.resolve(&mut forward);
        resolver.resolve(&mut backward);

        let a = forward.regions()[0].to_multi_polygon().unsigned_area();
        let b = backward.regions()[0].to_multi_polygon().unsigned_area();
        assert!((a - b).abs() <= a * 1e-9);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut registry = ShapeRegistry::new();
        registry.add_circle(origin(), 100.0, true).unwrap();
        registry.add_circle(east(120.0), 100.0, true).unwrap();
        registry.add_circle(east(1000.0), 100.0, true).unwrap();
        registry.add_circle(east(60.0), 80.0, false).unwrap();
        registry.add_circle(east(140.0), 80.0, false).unwrap();
        let resolver = IntersectionResolver::default();

        resolver.resolve(&mut registry);
        let circles = registry.circles().to_vec();
        let regions = registry.regions().to_vec();
        let next_id = registry.next_id();
        let revision = registry.revision();

        let second = resolver.resolve(&mut registry);

        assert!(second.is_noop());
        assert_eq!(second.passes, 1);
        assert_eq!(registry.circles(), circles.as_slice());
        assert_eq!(registry.regions(), regions.as_slice());
        assert_eq!(registry.next_id(), next_id);
        assert_eq!(registry.revision(), revision);
    }

    #[test]
    fn test_new_circle_joins_existing_region() {
        let mut registry = ShapeRegistry::new();
        let resolver = IntersectionResolver::default();
        registry.add_circle(origin(), 100.0, false).unwrap();
        registry.add_circle(east(150.0), 100.0, false).unwrap();
        let first = resolver.resolve(&mut registry).merges[0].new_id;

        let c = registry.add_circle(east(280.0), 100.0, false).unwrap();
        let report = resolver.resolve(&mut registry);

        assert_eq!(report.merges.len(), 1);
        assert_eq!(report.merges[0].absorbed, vec![first, c]);
        assert!(report.merges[0].new_id > c);
        assert_eq!(registry.regions().len(), 1);
    }

    #[test]
    fn test_hidden_members_keep_region_visible() {
        let mut registry = ShapeRegistry::new();
        let a = registry.add_circle(origin(), 100.0, true).unwrap();
        let b = registry.add_circle(east(150.0), 100.0, true).unwrap();
        registry.set_visible(a, false).unwrap();
        registry.set_visible(b, false).unwrap();

        IntersectionResolver::default().resolve(&mut registry);

        assert!(!registry.regions()[0].visible);
    }

    #[test]
    fn test_empty_region_is_pruned() {
        let mut registry = ShapeRegistry::new();
        let id = registry.replace_with_region(&[], true, true, Vec::new());

        let report = IntersectionResolver::default().resolve(&mut registry);

        assert_eq!(report.pruned, vec![id]);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_disjoint_set_components() {
        let mut sets = DisjointSet::new(5);
        sets.union(3, 4);
        sets.union(0, 3);
        assert_eq!(sets.find(4), 0);
        assert_ne!(sets.find(1), sets.find(2));
    }
}
