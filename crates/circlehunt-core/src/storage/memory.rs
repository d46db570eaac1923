//! In-memory storage implementation.

use super::{BoxFuture, MapDocument, PersistenceError, PersistenceResult, Storage};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for testing and ephemeral use.
#[derive(Default)]
pub struct MemoryStorage {
    maps: RwLock<HashMap<String, MapDocument>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored maps.
    pub fn len(&self) -> usize {
        self.maps.read().map(|maps| maps.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_error(e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Other(format!("Lock error: {}", e))
}

impl Storage for MemoryStorage {
    fn save(&self, user_id: &str, document: &MapDocument) -> BoxFuture<'_, PersistenceResult<()>> {
        let user_id = user_id.to_string();
        let document = document.clone();
        Box::pin(async move {
            let mut maps = self.maps.write().map_err(lock_error)?;
            document.check_newer_than(maps.get(&user_id).map(|stored| stored.revision))?;
            maps.insert(user_id, document);
            Ok(())
        })
    }

    fn load(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<MapDocument>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let maps = self.maps.read().map_err(lock_error)?;
            maps.get(&user_id)
                .cloned()
                .ok_or(PersistenceError::NotFound(user_id))
        })
    }

    fn delete(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<()>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut maps = self.maps.write().map_err(lock_error)?;
            maps.remove(&user_id);
            Ok(())
        })
    }

    fn exists(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<bool>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let maps = self.maps.read().map_err(lock_error)?;
            Ok(maps.contains_key(&user_id))
        })
    }
}
