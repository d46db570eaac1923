//! The player's map session: the single place where edits flow through the engine.
//!
//! Every mutator ends in [`MapSession::on_registry_changed`], which resolves
//! overlaps, drops references to entries that no longer exist, recomputes the
//! region layers, syncs the renderer and schedules a save.

use crate::algebra::RegionLayers;
use crate::codec::{self, FeatureCollection};
use crate::config::HuntConfig;
use crate::geometry::LatLng;
use crate::registry::{RegistryChange, RegistryError, ShapeRegistry};
use crate::render::{EventKind, MapRenderer, RenderTable, ShapeEvent};
use crate::resolver::{IntersectionResolver, ResolveReport};
use crate::shapes::{Footprint, ShapeId};
use crate::sharing::AcceptedShare;
use crate::storage::{AutoSaveManager, PersistenceError, Storage};
use log::debug;
use std::sync::Arc;
use thiserror::Error;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("No context menu is open")]
    NoContextMenu,
    #[error("{action:?} is not available for entry {target}")]
    ActionUnavailable { action: MenuAction, target: ShapeId },
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Entry in the right-click menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    MarkInside,
    MarkOutside,
    Hide,
    Delete,
}

/// Open right-click menu for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMenu {
    pub target: ShapeId,
    pub actions: Vec<MenuAction>,
}

pub struct MapSession<S: Storage, R: MapRenderer> {
    config: HuntConfig,
    registry: ShapeRegistry,
    resolver: IntersectionResolver,
    layers: RegionLayers,
    render: RenderTable,
    renderer: R,
    autosave: AutoSaveManager<S>,
    selected: Option<ShapeId>,
    context_menu: Option<ContextMenu>,
    last_report: ResolveReport,
}

impl<S: Storage, R: MapRenderer> MapSession<S, R> {
    pub fn new(config: HuntConfig, storage: Arc<S>, renderer: R) -> Self {
        let resolver = IntersectionResolver::new(config.circle_steps);
        let autosave = AutoSaveManager::with_debounce(storage, config.save_debounce());
        Self {
            config,
            registry: ShapeRegistry::new(),
            resolver,
            layers: RegionLayers::new(),
            render: RenderTable::new(),
            renderer,
            autosave,
            selected: None,
            context_menu: None,
            last_report: ResolveReport::default(),
        }
    }

    pub fn config(&self) -> &HuntConfig {
        &self.config
    }

    pub fn registry(&self) -> &ShapeRegistry {
        &self.registry
    }

    pub fn layers(&self) -> &RegionLayers {
        &self.layers
    }

    pub fn render_table(&self) -> &RenderTable {
        &self.render
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn autosave(&self) -> &AutoSaveManager<S> {
        &self.autosave
    }

    pub fn selected(&self) -> Option<ShapeId> {
        self.selected
    }

    pub fn context_menu(&self) -> Option<&ContextMenu> {
        self.context_menu.as_ref()
    }

    /// Report of the most recent resolver run.
    pub fn last_report(&self) -> &ResolveReport {
        &self.last_report
    }

    // --- Mutators ---

    /// Draw a circle. Returns the ID of the entry now holding it, which is a
    /// merged region if the circle overlapped same-class shapes.
    pub fn draw_circle(&mut self, center: LatLng, radius_meters: f64, inside: bool) -> SessionResult<ShapeId> {
        let id = self.registry.add_circle(center, radius_meters, inside)?;
        self.on_registry_changed();
        Ok(self.last_report.successor(id).unwrap_or(id))
    }

    /// Delete a circle, region or marker.
    pub fn delete_shape(&mut self, id: ShapeId) -> SessionResult<()> {
        if self.registry.marker(id).is_some() {
            self.registry.remove_marker(id)?;
        } else {
            self.registry.remove_shape(id)?;
        }
        self.on_registry_changed();
        Ok(())
    }

    pub fn set_inside(&mut self, id: ShapeId, inside: bool) -> SessionResult<()> {
        self.registry.set_inside(id, inside)?;
        self.on_registry_changed();
        Ok(())
    }

    pub fn set_visible(&mut self, id: ShapeId, visible: bool) -> SessionResult<()> {
        self.registry.set_visible(id, visible)?;
        self.on_registry_changed();
        Ok(())
    }

    pub fn add_marker(&mut self, position: LatLng) -> ShapeId {
        let id = self.registry.add_marker(position);
        self.on_registry_changed();
        id
    }

    pub fn set_earned_reward(&mut self, earned: bool) {
        self.registry.set_earned_reward(earned);
        self.on_registry_changed();
    }

    /// Propagate pending registry changes through the engine.
    pub fn on_registry_changed(&mut self) {
        let changes = self.registry.drain_changes();
        if changes.is_empty() {
            return;
        }

        let report = if changes.iter().any(RegistryChange::affects_geometry) {
            self.resolver.resolve(&mut self.registry)
        } else {
            ResolveReport::default()
        };
        // The resolver's own replacements are already accounted for
        self.registry.drain_changes();
        if !report.merges.is_empty() {
            debug!("Resolver merged {} components", report.merges.len());
        }

        self.drop_stale_references();
        self.refresh_view();
        self.autosave.mark_dirty();
        self.last_report = report;
    }

    fn drop_stale_references(&mut self) {
        if self.selected.is_some_and(|id| !self.registry.contains(id)) {
            self.selected = None;
        }
        if self
            .context_menu
            .as_ref()
            .is_some_and(|menu| !self.registry.contains(menu.target))
        {
            debug!("Closing context menu of a retired entry");
            self.context_menu = None;
        }
    }

    fn refresh_view(&mut self) {
        self.layers.refresh(&self.registry, self.config.circle_steps);
        self.render.sync(&self.registry, &mut self.renderer);
        self.render.sync_layers(&self.layers, &mut self.renderer);
    }

    // --- Events ---

    /// Handle a pointer event reported by the renderer.
    pub fn handle_event(&mut self, event: ShapeEvent) {
        if !self.registry.contains(event.id) {
            debug!("Ignoring {:?} on unknown entry {}", event.kind, event.id);
            return;
        }
        match event.kind {
            EventKind::Click => {
                self.selected = Some(event.id);
                self.context_menu = None;
            }
            EventKind::ContextMenu => {
                let actions = match self.registry.get(event.id) {
                    Some(entry) => vec![
                        if entry.inside() {
                            MenuAction::MarkOutside
                        } else {
                            MenuAction::MarkInside
                        },
                        MenuAction::Hide,
                        MenuAction::Delete,
                    ],
                    // Markers
                    None => vec![MenuAction::Delete],
                };
                self.context_menu = Some(ContextMenu {
                    target: event.id,
                    actions,
                });
            }
        }
    }

    pub fn close_context_menu(&mut self) {
        self.context_menu = None;
    }

    /// Run an action from the open context menu and close it.
    pub fn apply_menu_action(&mut self, action: MenuAction) -> SessionResult<()> {
        let menu = self.context_menu.take().ok_or(SessionError::NoContextMenu)?;
        if !menu.actions.contains(&action) {
            return Err(SessionError::ActionUnavailable {
                action,
                target: menu.target,
            });
        }
        match action {
            MenuAction::MarkInside => self.set_inside(menu.target, true),
            MenuAction::MarkOutside => self.set_inside(menu.target, false),
            MenuAction::Hide => self.set_visible(menu.target, false),
            MenuAction::Delete => self.delete_shape(menu.target),
        }
    }

    /// Draw the viewer's accepted shares.
    pub fn show_shares(&mut self, shares: &[AcceptedShare]) {
        self.render.sync_shares(shares, &mut self.renderer);
    }

    // --- Persistence ---

    /// Load the user's map, replacing the current one.
    ///
    /// A user without a saved map starts empty. On failure the session is
    /// left empty and unloaded, and will not save.
    pub async fn load(&mut self, user_id: &str) -> SessionResult<()> {
        if let Err(e) = self.load_and_restore(user_id).await {
            self.discard_map();
            return Err(e);
        }

        self.registry.drain_changes();
        self.selected = None;
        self.context_menu = None;

        // Data saved by older clients may still hold overlaps
        let report = self.resolver.resolve(&mut self.registry);
        self.registry.drain_changes();
        self.refresh_view();
        if !report.is_noop() {
            self.autosave.mark_dirty();
        }
        self.last_report = report;
        Ok(())
    }

    async fn load_and_restore(&mut self, user_id: &str) -> SessionResult<()> {
        let document = self.autosave.load(user_id).await?;
        let collection = document.map_or_else(FeatureCollection::empty, |d| d.collection);

        self.render.clear(&mut self.renderer);
        let decoded = {
            let render = &mut self.render;
            let renderer = &mut self.renderer;
            codec::decode_with(&collection, |entry| render.attach_entry(entry, renderer))
        }
        .map_err(PersistenceError::from)?;
        self.registry.restore(decoded)?;
        Ok(())
    }

    /// Drop the in-memory map after a failed load.
    fn discard_map(&mut self) {
        self.render.clear(&mut self.renderer);
        self.registry = ShapeRegistry::new();
        self.layers = RegionLayers::new();
        self.selected = None;
        self.context_menu = None;
        self.last_report = ResolveReport::default();
        self.autosave.reset();
    }

    pub async fn save_if_due(&mut self) -> SessionResult<Option<u64>> {
        self.save_if_due_at(Instant::now()).await
    }

    /// Save if the debounce window has passed at `now`. Returns the saved revision.
    pub async fn save_if_due_at(&mut self, now: Instant) -> SessionResult<Option<u64>> {
        let registry = &self.registry;
        Ok(self.autosave.maybe_save_at(now, || codec::encode(registry)).await?)
    }

    /// Save pending changes immediately, ignoring the debounce.
    pub async fn flush(&mut self) -> SessionResult<Option<u64>> {
        if !self.autosave.is_dirty() || !self.autosave.is_loaded() {
            return Ok(None);
        }
        let collection = codec::encode(&self.registry);
        Ok(Some(self.autosave.save(collection).await?))
    }
}
