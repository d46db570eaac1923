//! Canonical store of the player's map entries.

use crate::codec::DecodedMap;
use crate::geometry::{LatLng, RegionPart};
use crate::shapes::{Circle, Footprint, MAX_SHAPE_ID, Marker, MergedRegion, Shape, ShapeId};
use std::collections::HashSet;
use thiserror::Error;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Shape not found: {0}")]
    NotFound(ShapeId),
    #[error("Invalid circle: {0}")]
    InvalidCircle(String),
    #[error("Duplicate shape id: {0}")]
    DuplicateId(ShapeId),
    #[error("Shape id out of range: {0}")]
    IdOutOfRange(ShapeId),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// A mutation recorded by the registry, drained by whoever drives recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    Added(ShapeId),
    Removed(ShapeId),
    InsideChanged(ShapeId),
    VisibilityChanged(ShapeId),
    MarkerAdded(ShapeId),
    MarkerRemoved(ShapeId),
    MetadataChanged,
    Cleared,
    Restored,
}

impl RegistryChange {
    /// Whether the change can create or remove same-class overlaps.
    pub fn affects_geometry(&self) -> bool {
        matches!(
            self,
            RegistryChange::Added(_)
                | RegistryChange::Removed(_)
                | RegistryChange::InsideChanged(_)
                | RegistryChange::Cleared
                | RegistryChange::Restored
        )
    }
}

/// Borrowed view of the registry's shapes.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySnapshot<'a> {
    pub circles: &'a [Circle],
    pub regions: &'a [MergedRegion],
}

impl<'a> RegistrySnapshot<'a> {
    /// Iterate over circles then regions.
    pub fn footprints(self) -> impl Iterator<Item = &'a dyn Footprint> + 'a {
        let circles = self.circles.iter().map(|c| c as &'a dyn Footprint);
        let regions = self.regions.iter().map(|r| r as &'a dyn Footprint);
        circles.chain(regions)
    }

    pub fn len(&self) -> usize {
        self.circles.len() + self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circles.is_empty() && self.regions.is_empty()
    }
}

/// Owns circles, merged regions and markers, and hands out unique IDs.
#[derive(Debug, Clone)]
pub struct ShapeRegistry {
    circles: Vec<Circle>,
    regions: Vec<MergedRegion>,
    markers: Vec<Marker>,
    /// Next ID to allocate. Always greater than every ID ever handed out.
    next_id: ShapeId,
    /// Number of circles the player has drawn.
    circle_count: u32,
    earned_reward: bool,
    revision: u64,
    changes: Vec<RegistryChange>,
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapeRegistry {
    /// Create an empty registry. The first allocated ID is 1.
    pub fn new() -> Self {
        Self {
            circles: Vec::new(),
            regions: Vec::new(),
            markers: Vec::new(),
            next_id: 1,
            circle_count: 0,
            earned_reward: false,
            revision: 0,
            changes: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> ShapeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, change: RegistryChange) {
        self.revision += 1;
        self.changes.push(change);
    }

    /// Add a user-drawn circle. It starts visible.
    pub fn add_circle(&mut self, center: LatLng, radius_meters: f64, inside: bool) -> RegistryResult<ShapeId> {
        if !center.is_finite() {
            return Err(RegistryError::InvalidCircle("center is not finite".to_string()));
        }
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(RegistryError::InvalidCircle(format!(
                "radius must be positive, got {radius_meters}"
            )));
        }
        let id = self.allocate_id();
        self.circles
            .push(Circle::reconstruct(id, center, radius_meters, inside, true));
        self.circle_count += 1;
        self.record(RegistryChange::Added(id));
        Ok(id)
    }

    /// Add a marker pin.
    pub fn add_marker(&mut self, position: LatLng) -> ShapeId {
        let id = self.allocate_id();
        self.markers.push(Marker::reconstruct(id, position));
        self.record(RegistryChange::MarkerAdded(id));
        id
    }

    /// Remove a circle or merged region.
    pub fn remove_shape(&mut self, id: ShapeId) -> RegistryResult<Shape> {
        let removed = if let Some(pos) = self.circles.iter().position(|c| c.id == id) {
            Shape::Circle(self.circles.remove(pos))
        } else if let Some(pos) = self.regions.iter().position(|r| r.id == id) {
            Shape::Region(self.regions.remove(pos))
        } else {
            return Err(RegistryError::NotFound(id));
        };
        self.record(RegistryChange::Removed(id));
        Ok(removed)
    }

    /// Remove a marker.
    pub fn remove_marker(&mut self, id: ShapeId) -> RegistryResult<Marker> {
        let pos = self
            .markers
            .iter()
            .position(|m| m.id == id)
            .ok_or(RegistryError::NotFound(id))?;
        let marker = self.markers.remove(pos);
        self.record(RegistryChange::MarkerRemoved(id));
        Ok(marker)
    }

    /// Change the inside/outside classification without changing the ID.
    pub fn set_inside(&mut self, id: ShapeId, inside: bool) -> RegistryResult<()> {
        let flag = self.flags_mut(id)?.0;
        if *flag != inside {
            *flag = inside;
            self.record(RegistryChange::InsideChanged(id));
        }
        Ok(())
    }

    /// Show or hide an entry. Hidden entries keep their geometry and ID.
    pub fn set_visible(&mut self, id: ShapeId, visible: bool) -> RegistryResult<()> {
        let flag = self.flags_mut(id)?.1;
        if *flag != visible {
            *flag = visible;
            self.record(RegistryChange::VisibilityChanged(id));
        }
        Ok(())
    }

    /// Mutable (inside, visible) flags of a circle or region.
    fn flags_mut(&mut self, id: ShapeId) -> RegistryResult<(&mut bool, &mut bool)> {
        if let Some(c) = self.circles.iter_mut().find(|c| c.id == id) {
            return Ok((&mut c.inside, &mut c.visible));
        }
        if let Some(r) = self.regions.iter_mut().find(|r| r.id == id) {
            return Ok((&mut r.inside, &mut r.visible));
        }
        Err(RegistryError::NotFound(id))
    }

    /// Read snapshot of circles and regions.
    pub fn all(&self) -> RegistrySnapshot<'_> {
        RegistrySnapshot {
            circles: &self.circles,
            regions: &self.regions,
        }
    }

    pub fn circles(&self) -> &[Circle] {
        &self.circles
    }

    pub fn regions(&self) -> &[MergedRegion] {
        &self.regions
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn circle(&self, id: ShapeId) -> Option<&Circle> {
        self.circles.iter().find(|c| c.id == id)
    }

    pub fn region(&self, id: ShapeId) -> Option<&MergedRegion> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn marker(&self, id: ShapeId) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }

    /// Look up a circle or region.
    pub fn get(&self, id: ShapeId) -> Option<&dyn Footprint> {
        self.circle(id)
            .map(|c| c as &dyn Footprint)
            .or_else(|| self.region(id).map(|r| r as &dyn Footprint))
    }

    /// Whether any entry (circle, region or marker) has this ID.
    pub fn contains(&self, id: ShapeId) -> bool {
        self.get(id).is_some() || self.marker(id).is_some()
    }

    /// Remove every entry. The ID counter keeps counting.
    pub fn clear(&mut self) {
        self.circles.clear();
        self.regions.clear();
        self.markers.clear();
        self.record(RegistryChange::Cleared);
    }

    pub fn is_empty(&self) -> bool {
        self.circles.is_empty() && self.regions.is_empty() && self.markers.is_empty()
    }

    pub fn next_id(&self) -> ShapeId {
        self.next_id
    }

    pub fn circle_count(&self) -> u32 {
        self.circle_count
    }

    pub fn earned_reward(&self) -> bool {
        self.earned_reward
    }

    pub fn set_earned_reward(&mut self, earned: bool) {
        if self.earned_reward != earned {
            self.earned_reward = earned;
            self.record(RegistryChange::MetadataChanged);
        }
    }

    /// Counter bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Take the changes recorded since the last drain.
    pub fn drain_changes(&mut self) -> Vec<RegistryChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Replace the whole registry content with decoded state.
    pub fn restore(&mut self, decoded: DecodedMap) -> RegistryResult<()> {
        let mut seen = HashSet::new();
        let ids = decoded
            .circles
            .iter()
            .map(|c| c.id)
            .chain(decoded.regions.iter().map(|r| r.id))
            .chain(decoded.markers.iter().map(|m| m.id));
        let mut max_id = 0;
        for id in ids {
            if id > MAX_SHAPE_ID {
                return Err(RegistryError::IdOutOfRange(id));
            }
            if !seen.insert(id) {
                return Err(RegistryError::DuplicateId(id));
            }
            max_id = max_id.max(id);
        }
        let next_id = max_id
            .checked_add(1)
            .map(|past_max| decoded.next_id.max(past_max))
            .filter(|&next| next <= MAX_SHAPE_ID + 1)
            .ok_or(RegistryError::IdOutOfRange(decoded.next_id.max(max_id)))?;

        self.circles = decoded.circles;
        self.regions = decoded.regions;
        self.markers = decoded.markers;
        self.next_id = next_id;
        self.circle_count = decoded.circle_count;
        self.earned_reward = decoded.earned_reward;
        self.record(RegistryChange::Restored);
        Ok(())
    }

    // --- Resolver support ---

    /// Replace `absorbed` entries with one new merged region and return its ID.
    pub(crate) fn replace_with_region(
        &mut self,
        absorbed: &[ShapeId],
        inside: bool,
        visible: bool,
        parts: Vec<RegionPart>,
    ) -> ShapeId {
        self.circles.retain(|c| !absorbed.contains(&c.id));
        self.regions.retain(|r| !absorbed.contains(&r.id));
        for &id in absorbed {
            self.record(RegistryChange::Removed(id));
        }
        let id = self.allocate_id();
        self.regions
            .push(MergedRegion::reconstruct(id, inside, visible, parts));
        self.record(RegistryChange::Added(id));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> LatLng {
        LatLng::new(40.4168, -3.7038)
    }

    #[test]
    fn test_add_circle_allocates_sequential_ids() {
        let mut registry = ShapeRegistry::new();
        let a = registry.add_circle(here(), 50.0, true).unwrap();
        let b = registry.add_circle(here(), 80.0, false).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(registry.next_id(), 3);
        assert_eq!(registry.circle_count(), 2);
        assert!(registry.circle(a).unwrap().visible);
    }

    #[test]
    fn test_add_circle_rejects_bad_radius() {
        let mut registry = ShapeRegistry::new();
        assert!(matches!(
            registry.add_circle(here(), 0.0, true),
            Err(RegistryError::InvalidCircle(_))
        ));
        assert!(registry.add_circle(here(), f64::NAN, true).is_err());
        assert_eq!(registry.next_id(), 1);
    }

    #[test]
    fn test_remove_unknown_shape_is_not_found() {
        let mut registry = ShapeRegistry::new();
        assert_eq!(registry.remove_shape(42), Err(RegistryError::NotFound(42)));
    }

    #[test]
    fn test_remove_shape() {
        let mut registry = ShapeRegistry::new();
        let id = registry.add_circle(here(), 50.0, true).unwrap();
        let removed = registry.remove_shape(id).unwrap();
        assert_eq!(removed.as_circle().map(|c| c.radius_meters), Some(50.0));
        assert!(!registry.contains(id));
        // IDs are never reused
        let next = registry.add_circle(here(), 50.0, true).unwrap();
        assert_eq!(next, id + 1);
    }

    #[test]
    fn test_flags_keep_id() {
        let mut registry = ShapeRegistry::new();
        let id = registry.add_circle(here(), 50.0, true).unwrap();
        registry.set_inside(id, false).unwrap();
        registry.set_visible(id, false).unwrap();
        let circle = registry.circle(id).unwrap();
        assert!(!circle.inside);
        assert!(!circle.visible);
        assert_eq!(registry.set_visible(99, true), Err(RegistryError::NotFound(99)));
    }

    #[test]
    fn test_unchanged_flag_records_nothing() {
        let mut registry = ShapeRegistry::new();
        let id = registry.add_circle(here(), 50.0, true).unwrap();
        registry.drain_changes();
        let revision = registry.revision();
        registry.set_inside(id, true).unwrap();
        assert_eq!(registry.revision(), revision);
        assert!(!registry.has_pending_changes());
    }

    #[test]
    fn test_drain_changes() {
        let mut registry = ShapeRegistry::new();
        let id = registry.add_circle(here(), 50.0, true).unwrap();
        registry.set_visible(id, false).unwrap();
        let changes = registry.drain_changes();
        assert_eq!(
            changes,
            vec![RegistryChange::Added(id), RegistryChange::VisibilityChanged(id)]
        );
        assert!(changes[0].affects_geometry());
        assert!(!changes[1].affects_geometry());
        assert!(registry.drain_changes().is_empty());
    }

    #[test]
    fn test_markers_share_id_space() {
        let mut registry = ShapeRegistry::new();
        let circle = registry.add_circle(here(), 50.0, true).unwrap();
        let marker = registry.add_marker(here());
        assert_ne!(circle, marker);
        assert!(registry.contains(marker));
        assert!(registry.get(marker).is_none());
        assert_eq!(registry.remove_shape(marker), Err(RegistryError::NotFound(marker)));
        registry.remove_marker(marker).unwrap();
        assert!(!registry.contains(marker));
    }

    #[test]
    fn test_replace_with_region() {
        let mut registry = ShapeRegistry::new();
        let a = registry.add_circle(here(), 50.0, true).unwrap();
        let b = registry.add_circle(here(), 60.0, true).unwrap();
        let c = registry.add_circle(here(), 70.0, false).unwrap();
        let merged = registry.replace_with_region(&[a, b], true, true, Vec::new());
        assert_eq!(merged, 4);
        assert!(!registry.contains(a));
        assert!(!registry.contains(b));
        assert!(registry.contains(c));
        assert!(registry.region(merged).is_some());
    }

    #[test]
    fn test_clear_keeps_counter() {
        let mut registry = ShapeRegistry::new();
        registry.add_circle(here(), 50.0, true).unwrap();
        registry.add_marker(here());
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.next_id(), 3);
    }

    #[test]
    fn test_restore_rejects_duplicate_ids() {
        let mut registry = ShapeRegistry::new();
        let decoded = DecodedMap {
            circles: vec![Circle::reconstruct(5, here(), 10.0, true, true)],
            regions: Vec::new(),
            markers: vec![Marker::reconstruct(5, here())],
            next_id: 6,
            circle_count: 1,
            earned_reward: false,
        };
        assert_eq!(registry.restore(decoded), Err(RegistryError::DuplicateId(5)));
    }

    #[test]
    fn test_restore_rejects_out_of_range_ids() {
        let mut registry = ShapeRegistry::new();
        registry.add_marker(here());
        let decoded = DecodedMap {
            circles: Vec::new(),
            regions: Vec::new(),
            markers: vec![Marker::reconstruct(u64::MAX, here())],
            next_id: 1,
            circle_count: 0,
            earned_reward: false,
        };
        assert_eq!(registry.restore(decoded), Err(RegistryError::IdOutOfRange(u64::MAX)));
        assert_eq!(registry.markers().len(), 1);
        assert_eq!(registry.next_id(), 2);

        let decoded = DecodedMap {
            circles: Vec::new(),
            regions: Vec::new(),
            markers: Vec::new(),
            next_id: u64::MAX,
            circle_count: 0,
            earned_reward: false,
        };
        assert_eq!(registry.restore(decoded), Err(RegistryError::IdOutOfRange(u64::MAX)));
    }

    #[test]
    fn test_restore_sets_counter_past_max() {
        let mut registry = ShapeRegistry::new();
        let decoded = DecodedMap {
            circles: vec![Circle::reconstruct(9, here(), 10.0, true, true)],
            regions: Vec::new(),
            markers: Vec::new(),
            next_id: 2,
            circle_count: 7,
            earned_reward: true,
        };
        registry.restore(decoded).unwrap();
        assert_eq!(registry.next_id(), 10);
        assert_eq!(registry.circle_count(), 7);
        assert!(registry.earned_reward());
    }
}
