//! Boundary to the map-rendering library.
//!
//! The engine never stores render handles on its entities. [`RenderTable`]
//! keeps the id → handle mapping and reconciles it with the registry after
//! every change.

use crate::algebra::{LayerKind, RegionLayers};
use crate::codec::DecodedEntry;
use crate::geometry::{LatLng, RegionPart};
use crate::registry::ShapeRegistry;
use crate::shapes::{Circle, Marker, MergedRegion, ShapeId};
use crate::sharing::AcceptedShare;
use log::debug;
use std::collections::HashMap;

/// Opaque handle to something drawn by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    ContextMenu,
}

/// Pointer event on a registry entry, reported back by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeEvent {
    pub id: ShapeId,
    pub kind: EventKind,
}

impl ShapeEvent {
    pub fn click(id: ShapeId) -> Self {
        Self {
            id,
            kind: EventKind::Click,
        }
    }

    pub fn context_menu(id: ShapeId) -> Self {
        Self {
            id,
            kind: EventKind::ContextMenu,
        }
    }
}

/// How a primitive should be drawn. Colors and opacity are up to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeStyle {
    /// Outline of an inside entry.
    Inside,
    /// Outline of an outside entry.
    Outside,
    /// Unified translucent fill of all visible inside entries.
    InsideFill,
    /// Unified translucent fill of all visible outside entries.
    OutsideFill,
    /// Candidate area.
    Solution,
    /// Read-only circle from an accepted share: dashed stroke, owner tooltip.
    Shared { owner: String, inside: bool },
}

impl ShapeStyle {
    pub fn outline(inside: bool) -> Self {
        if inside { ShapeStyle::Inside } else { ShapeStyle::Outside }
    }

    pub fn layer(kind: LayerKind) -> Self {
        match kind {
            LayerKind::InsideFill => ShapeStyle::InsideFill,
            LayerKind::OutsideFill => ShapeStyle::OutsideFill,
            LayerKind::Solution => ShapeStyle::Solution,
        }
    }

    pub fn is_dashed(&self) -> bool {
        matches!(self, ShapeStyle::Shared { .. })
    }

    pub fn tooltip(&self) -> Option<String> {
        match self {
            ShapeStyle::Shared { owner, .. } => Some(format!("Shared by {owner}")),
            _ => None,
        }
    }
}

/// Rendering collaborator. Implemented by the map UI.
pub trait MapRenderer {
    fn render_circle(&mut self, center: LatLng, radius_meters: f64, style: &ShapeStyle) -> RenderHandle;

    fn render_polygon(&mut self, parts: &[RegionPart], style: &ShapeStyle) -> RenderHandle;

    fn render_marker(&mut self, position: LatLng) -> RenderHandle;

    fn remove_handle(&mut self, handle: RenderHandle);

    /// Route pointer events of `handle` back to the session as `target`.
    fn on_event(&mut self, handle: RenderHandle, kind: EventKind, target: ShapeId);
}

/// Handle of a rendered entry plus the class it was drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rendered {
    handle: RenderHandle,
    inside: Option<bool>,
}

/// Side table from entry IDs to live render handles.
#[derive(Debug, Default)]
pub struct RenderTable {
    entries: HashMap<ShapeId, Rendered>,
    layers: HashMap<LayerKind, RenderHandle>,
    layers_revision: Option<u64>,
    shares: HashMap<String, Vec<RenderHandle>>,
}

impl RenderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: ShapeId) -> Option<RenderHandle> {
        self.entries.get(&id).map(|r| r.handle)
    }

    /// Reverse lookup, for renderers that only report handles.
    pub fn entry_for_handle(&self, handle: RenderHandle) -> Option<ShapeId> {
        self.entries
            .iter()
            .find(|(_, r)| r.handle == handle)
            .map(|(id, _)| *id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn share_handles(&self, share_id: &str) -> &[RenderHandle] {
        self.shares.get(share_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn draw_circle<R: MapRenderer + ?Sized>(&mut self, circle: &Circle, renderer: &mut R) {
        let handle = renderer.render_circle(circle.center, circle.radius_meters, &ShapeStyle::outline(circle.inside));
        self.register(circle.id, handle, Some(circle.inside), renderer);
    }

    fn draw_region<R: MapRenderer + ?Sized>(&mut self, region: &MergedRegion, renderer: &mut R) {
        let handle = renderer.render_polygon(&region.parts, &ShapeStyle::outline(region.inside));
        self.register(region.id, handle, Some(region.inside), renderer);
    }

    fn draw_marker<R: MapRenderer + ?Sized>(&mut self, marker: &Marker, renderer: &mut R) {
        let handle = renderer.render_marker(marker.position);
        self.register(marker.id, handle, None, renderer);
    }

    fn register<R: MapRenderer + ?Sized>(
        &mut self,
        id: ShapeId,
        handle: RenderHandle,
        inside: Option<bool>,
        renderer: &mut R,
    ) {
        renderer.on_event(handle, EventKind::Click, id);
        renderer.on_event(handle, EventKind::ContextMenu, id);
        self.entries.insert(id, Rendered { handle, inside });
    }

    /// Render one freshly decoded entry and hook up its listeners.
    pub fn attach_entry<R: MapRenderer + ?Sized>(&mut self, entry: DecodedEntry<'_>, renderer: &mut R) {
        if let Some(previous) = self.entries.remove(&entry.id()) {
            renderer.remove_handle(previous.handle);
        }
        match entry {
            DecodedEntry::Circle(circle) if circle.visible => self.draw_circle(circle, renderer),
            DecodedEntry::Region(region) if region.visible => self.draw_region(region, renderer),
            DecodedEntry::Marker(marker) => self.draw_marker(marker, renderer),
            _ => {}
        }
    }

    /// Reconcile entry handles with the registry.
    ///
    /// Visible entries without a handle are drawn, entries whose class changed
    /// are redrawn, and handles of hidden or removed entries are dropped.
    pub fn sync<R: MapRenderer + ?Sized>(&mut self, registry: &ShapeRegistry, renderer: &mut R) {
        let mut wanted: HashMap<ShapeId, Option<bool>> = HashMap::new();
        for circle in registry.circles().iter().filter(|c| c.visible) {
            wanted.insert(circle.id, Some(circle.inside));
        }
        for region in registry.regions().iter().filter(|r| r.visible) {
            wanted.insert(region.id, Some(region.inside));
        }
        for marker in registry.markers() {
            wanted.insert(marker.id, None);
        }

        let stale: Vec<ShapeId> = self
            .entries
            .iter()
            .filter(|(id, rendered)| wanted.get(*id) != Some(&rendered.inside))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(rendered) = self.entries.remove(&id) {
                renderer.remove_handle(rendered.handle);
            }
        }

        let mut drawn = 0;
        for circle in registry.circles().iter().filter(|c| c.visible) {
            if !self.entries.contains_key(&circle.id) {
                self.draw_circle(circle, renderer);
                drawn += 1;
            }
        }
        for region in registry.regions().iter().filter(|r| r.visible) {
            if !self.entries.contains_key(&region.id) {
                self.draw_region(region, renderer);
                drawn += 1;
            }
        }
        for marker in registry.markers() {
            if !self.entries.contains_key(&marker.id) {
                self.draw_marker(marker, renderer);
                drawn += 1;
            }
        }
        if drawn > 0 {
            debug!("Rendered {} entries", drawn);
        }
    }

    /// Redraw the unified fills and the solution if the layers changed.
    pub fn sync_layers<R: MapRenderer + ?Sized>(&mut self, layers: &RegionLayers, renderer: &mut R) {
        if layers.revision().is_some() && self.layers_revision == layers.revision() {
            return;
        }
        for (_, handle) in self.layers.drain() {
            renderer.remove_handle(handle);
        }
        for kind in [LayerKind::InsideFill, LayerKind::OutsideFill, LayerKind::Solution] {
            let parts = layers.parts(kind);
            if parts.is_empty() {
                continue;
            }
            let handle = renderer.render_polygon(&parts, &ShapeStyle::layer(kind));
            self.layers.insert(kind, handle);
        }
        self.layers_revision = layers.revision();
    }

    /// Draw visible accepted shares and drop hidden or removed ones.
    ///
    /// Shared circles are read-only and get no event listeners.
    pub fn sync_shares<R: MapRenderer + ?Sized>(&mut self, shares: &[AcceptedShare], renderer: &mut R) {
        let stale: Vec<String> = self
            .shares
            .keys()
            .filter(|id| !shares.iter().any(|s| s.visible && &s.share_id == *id))
            .cloned()
            .collect();
        for share_id in stale {
            for handle in self.shares.remove(&share_id).unwrap_or_default() {
                renderer.remove_handle(handle);
            }
        }

        for share in shares.iter().filter(|s| s.visible) {
            if self.shares.contains_key(&share.share_id) {
                continue;
            }
            let handles = share
                .circles
                .iter()
                .map(|circle| {
                    let style = ShapeStyle::Shared {
                        owner: share.owner_username.clone(),
                        inside: circle.is_inside,
                    };
                    renderer.render_circle(circle.center(), circle.radius, &style)
                })
                .collect();
            self.shares.insert(share.share_id.clone(), handles);
        }
    }

    /// Remove every handle this table knows about.
    pub fn clear<R: MapRenderer + ?Sized>(&mut self, renderer: &mut R) {
        for (_, rendered) in self.entries.drain() {
            renderer.remove_handle(rendered.handle);
        }
        for (_, handle) in self.layers.drain() {
            renderer.remove_handle(handle);
        }
        for (_, handles) in self.shares.drain() {
            for handle in handles {
                renderer.remove_handle(handle);
            }
        }
        self.layers_revision = None;
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::{Drawn, RecordingRenderer};
    use super::*;
    use crate::codec;
    use crate::resolver::IntersectionResolver;
    use chrono::Utc;

    fn origin() -> LatLng {
        LatLng::new(-33.8688, 151.2093)
    }

    #[test]
    fn test_sync_draws_visible_entries() {
        let mut registry = ShapeRegistry::new();
        let shown = registry.add_circle(origin(), 100.0, true).unwrap();
        let hidden = registry.add_circle(origin().offset_meters(900.0, 0.0), 100.0, false).unwrap();
        registry.set_visible(hidden, false).unwrap();
        let marker = registry.add_marker(origin());

        let mut table = RenderTable::new();
        let mut renderer = RecordingRenderer::default();
        table.sync(&registry, &mut renderer);

        assert_eq!(renderer.live.len(), 2);
        let handle = table.lookup(shown).unwrap();
        assert!(renderer.has_listener(handle, EventKind::Click));
        assert!(renderer.has_listener(handle, EventKind::ContextMenu));
        assert!(table.lookup(hidden).is_none());
        assert!(table.lookup(marker).is_some());
        assert_eq!(table.entry_for_handle(handle), Some(shown));
    }

    #[test]
    fn test_sync_removes_hidden_and_merged() {
        let mut registry = ShapeRegistry::new();
        let a = registry.add_circle(origin(), 100.0, true).unwrap();
        let mut table = RenderTable::new();
        let mut renderer = RecordingRenderer::default();
        table.sync(&registry, &mut renderer);

        registry.set_visible(a, false).unwrap();
        table.sync(&registry, &mut renderer);
        assert!(renderer.live.is_empty());

        registry.set_visible(a, true).unwrap();
        registry.add_circle(origin().offset_meters(120.0, 0.0), 100.0, true).unwrap();
        IntersectionResolver::default().resolve(&mut registry);
        table.sync(&registry, &mut renderer);

        assert_eq!(renderer.live.len(), 1);
        assert!(table.lookup(a).is_none());
        let merged = registry.regions()[0].id;
        assert!(matches!(
            renderer.live.get(&table.lookup(merged).unwrap()),
            Some(Drawn::Polygon { parts: 1, style: ShapeStyle::Inside })
        ));
    }

    #[test]
    fn test_sync_redraws_on_class_change() {
        let mut registry = ShapeRegistry::new();
        let id = registry.add_circle(origin(), 100.0, true).unwrap();
        let mut table = RenderTable::new();
        let mut renderer = RecordingRenderer::default();
        table.sync(&registry, &mut renderer);
        let before = table.lookup(id).unwrap();

        registry.set_inside(id, false).unwrap();
        table.sync(&registry, &mut renderer);

        let after = table.lookup(id).unwrap();
        assert_ne!(before, after);
        assert_eq!(renderer.count_style(&ShapeStyle::Outside), 1);
        assert_eq!(renderer.count_style(&ShapeStyle::Inside), 0);
    }

    #[test]
    fn test_attach_entry_from_decode() {
        let mut registry = ShapeRegistry::new();
        registry.add_circle(origin(), 100.0, true).unwrap();
        let hidden = registry.add_circle(origin().offset_meters(500.0, 0.0), 50.0, true).unwrap();
        registry.set_visible(hidden, false).unwrap();

        let mut table = RenderTable::new();
        let mut renderer = RecordingRenderer::default();
        codec::decode_with(&codec::encode(&registry), |entry| table.attach_entry(entry, &mut renderer)).unwrap();

        assert_eq!(table.entry_count(), 1);
        assert_eq!(renderer.listeners.len(), 2);
    }

    #[test]
    fn test_sync_layers_only_on_new_revision() {
        let mut registry = ShapeRegistry::new();
        registry.add_circle(origin(), 100.0, true).unwrap();
        let mut layers = RegionLayers::new();
        layers.refresh(&registry, 32);

        let mut table = RenderTable::new();
        let mut renderer = RecordingRenderer::default();
        table.sync_layers(&layers, &mut renderer);
        // Inside fill and solution; no outside entries
        assert_eq!(renderer.live.len(), 2);

        table.sync_layers(&layers, &mut renderer);
        assert_eq!(renderer.removed, 0);

        registry.add_circle(origin().offset_meters(30.0, 0.0), 20.0, false).unwrap();
        layers.refresh(&registry, 32);
        table.sync_layers(&layers, &mut renderer);
        assert_eq!(renderer.removed, 2);
        assert_eq!(renderer.count_style(&ShapeStyle::OutsideFill), 1);
    }

    #[test]
    fn test_sync_shares() {
        let share = AcceptedShare {
            share_id: "s1".to_string(),
            owner_username: "kai".to_string(),
            circles: vec![crate::sharing::SharedCircle {
                id: 1,
                latitude: 1.0,
                longitude: 2.0,
                radius: 30.0,
                is_inside: true,
                owner_username: "kai".to_string(),
                created_at: Utc::now(),
            }],
            visible: true,
            accepted_at: Utc::now(),
        };
        let mut table = RenderTable::new();
        let mut renderer = RecordingRenderer::default();

        table.sync_shares(std::slice::from_ref(&share), &mut renderer);
        let style = ShapeStyle::Shared {
            owner: "kai".to_string(),
            inside: true,
        };
        assert_eq!(renderer.count_style(&style), 1);
        assert!(style.is_dashed());
        assert_eq!(style.tooltip().as_deref(), Some("Shared by kai"));
        assert!(renderer.listeners.is_empty());

        let hidden = AcceptedShare {
            visible: false,
            ..share
        };
        table.sync_shares(&[hidden], &mut renderer);
        assert!(renderer.live.is_empty());
        assert!(table.share_handles("s1").is_empty());
    }
}
