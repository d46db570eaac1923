//! Debounced autosave of the player's map.
//!
//! Every mutation pushes the save window back; a save fires once the map has
//! been quiet for the debounce period. Nothing is written until the initial
//! load has completed, so an empty pre-load map can never overwrite real data.

use crate::codec::FeatureCollection;
use crate::storage::{MapDocument, PersistenceError, PersistenceResult, Storage};
use log::{debug, warn};
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

/// Where the manager is in the load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Nothing loaded; saves are refused.
    #[default]
    Uninitialized,
    /// A load is in flight.
    Loading,
    /// The map was loaded (or found absent) and saves may proceed.
    Loaded,
}

/// Manages debounced map persistence for one user.
pub struct AutoSaveManager<S: Storage> {
    /// Storage backend.
    storage: Arc<S>,
    /// Quiet period after the last mutation.
    debounce: Duration,
    /// Time of the most recent unsaved mutation.
    last_change: Option<Instant>,
    /// Last successful save.
    last_save: Option<Instant>,
    /// Whether the map has unsaved changes.
    dirty: bool,
    state: LoadState,
    /// User whose map is loaded.
    user_id: Option<String>,
    /// Revision of the last document loaded or saved.
    revision: u64,
}

impl<S: Storage> AutoSaveManager<S> {
    /// Create a new auto-save manager with the default debounce.
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_debounce(
            storage,
            Duration::from_millis(crate::config::DEFAULT_SAVE_DEBOUNCE_MS),
        )
    }

    pub fn with_debounce(storage: Arc<S>, debounce: Duration) -> Self {
        Self {
            storage,
            debounce,
            last_change: None,
            last_save: None,
            dirty: false,
            state: LoadState::Uninitialized,
            user_id: None,
            revision: 0,
        }
    }

    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn load_state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Revision of the last document loaded or saved.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.last_save
    }

    /// Mark the map as changed now.
    pub fn mark_dirty(&mut self) {
        self.mark_dirty_at(Instant::now());
    }

    /// Mark the map as changed at `now`, restarting the debounce window.
    pub fn mark_dirty_at(&mut self, now: Instant) {
        self.dirty = true;
        self.last_change = Some(now);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn should_save(&self) -> bool {
        self.should_save_at(Instant::now())
    }

    /// Loaded, dirty and quiet for at least the debounce period.
    pub fn should_save_at(&self, now: Instant) -> bool {
        if self.state != LoadState::Loaded || !self.dirty {
            return false;
        }
        match self.last_change {
            Some(changed) => now.saturating_duration_since(changed) >= self.debounce,
            None => true,
        }
    }

    /// Load the user's map.
    ///
    /// Returns `None` for a user with no saved map yet; that still counts as
    /// loaded. Any other failure resets the state to `Uninitialized`.
    pub async fn load(&mut self, user_id: &str) -> PersistenceResult<Option<MapDocument>> {
        self.state = LoadState::Loading;
        self.user_id = Some(user_id.to_string());

        let result = self.storage.load(user_id).await;
        let document = match result {
            Ok(document) => Some(document),
            Err(PersistenceError::NotFound(_)) => None,
            Err(e) => {
                warn!("Map data unavailable for {}: {}", user_id, e);
                self.reset();
                return Err(e);
            }
        };

        self.revision = document.as_ref().map_or(0, |d| d.revision);
        self.state = LoadState::Loaded;
        self.dirty = false;
        self.last_change = None;
        debug!("Loaded map for {} at revision {}", user_id, self.revision);
        Ok(document)
    }

    /// Forget the loaded user and refuse saves until the next load.
    pub fn reset(&mut self) {
        self.state = LoadState::Uninitialized;
        self.user_id = None;
        self.revision = 0;
        self.dirty = false;
        self.last_change = None;
    }

    /// Save if due at `now`. `snapshot` is only called when a save fires.
    ///
    /// Returns the saved revision, or `None` when nothing was due.
    pub async fn maybe_save_at<F>(&mut self, now: Instant, snapshot: F) -> PersistenceResult<Option<u64>>
    where
        F: FnOnce() -> FeatureCollection,
    {
        if !self.should_save_at(now) {
            return Ok(None);
        }
        self.save(snapshot()).await.map(Some)
    }

    /// Save immediately with the next revision.
    ///
    /// A failed save leaves the map dirty so the next window retries. A stale
    /// save means another writer moved ahead: saving stops until a reload.
    pub async fn save(&mut self, collection: FeatureCollection) -> PersistenceResult<u64> {
        let user_id = match (&self.state, &self.user_id) {
            (LoadState::Loaded, Some(user_id)) => user_id.clone(),
            _ => return Err(PersistenceError::NotLoaded),
        };

        let revision = self.revision + 1;
        let document = MapDocument::new(user_id.clone(), revision, collection);
        match self.storage.save(&user_id, &document).await {
            Ok(()) => {
                self.revision = revision;
                self.dirty = false;
                self.last_change = None;
                self.last_save = Some(Instant::now());
                debug!("Saved map for {} at revision {}", user_id, revision);
                Ok(revision)
            }
            Err(e @ PersistenceError::Stale { .. }) => {
                warn!("Save for {} rejected, reload required: {}", user_id, e);
                self.state = LoadState::Uninitialized;
                Err(e)
            }
            Err(e) => {
                warn!("Save for {} failed, will retry: {}", user_id, e);
                Err(e)
            }
        }
    }

    /// Get a reference to the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

/// Create the platform file storage described by `config`.
#[cfg(not(target_arch = "wasm32"))]
pub fn create_default_storage(
    config: &crate::config::HuntConfig,
) -> PersistenceResult<Arc<crate::storage::FileStorage>> {
    let storage = match &config.storage_dir {
        Some(dir) => crate::storage::FileStorage::new(dir.clone())?,
        None => crate::storage::FileStorage::default_location()?,
    };
    Ok(Arc::new(storage))
}
