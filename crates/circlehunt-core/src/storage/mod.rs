//! Storage abstraction for map persistence.

mod autosave;
mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

#[cfg(not(target_arch = "wasm32"))]
mod remote;

pub use autosave::{AutoSaveManager, LoadState};
pub use memory::MemoryStorage;

#[cfg(not(target_arch = "wasm32"))]
pub use autosave::create_default_storage;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStorage;

#[cfg(not(target_arch = "wasm32"))]
pub use remote::RemoteStorage;

use crate::codec::{CodecError, FeatureCollection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Map not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Stale save: stored revision {stored}, attempted {attempted}")]
    Stale { stored: u64, attempted: u64 },
    #[error("Access to the map of {0} was denied")]
    Forbidden(String),
    #[error("Map data has not been loaded yet")]
    NotLoaded,
    #[error("Corrupt map data: {0}")]
    Codec(#[from] CodecError),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A saved map: one full snapshot per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDocument {
    pub user_id: String,
    /// Monotonic save counter. Stores refuse a document older than what they hold.
    pub revision: u64,
    pub collection: FeatureCollection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl MapDocument {
    pub fn new(user_id: impl Into<String>, revision: u64, collection: FeatureCollection) -> Self {
        Self {
            user_id: user_id.into(),
            revision,
            collection,
            saved_at: Some(Utc::now()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Fails with [`PersistenceError::Stale`] if `self` would overwrite a newer revision.
    pub fn check_newer_than(&self, stored: Option<u64>) -> PersistenceResult<()> {
        match stored {
            Some(stored) if self.revision < stored => Err(PersistenceError::Stale {
                stored,
                attempted: self.revision,
            }),
            _ => Ok(()),
        }
    }
}

/// Body of a 409 response to a stale save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleRevision {
    pub stored: u64,
    pub attempted: u64,
}

/// Trait for map storage backends, keyed by user.
pub trait Storage: Send + Sync {
    /// Save a map, replacing the previous snapshot.
    fn save(&self, user_id: &str, document: &MapDocument) -> BoxFuture<'_, PersistenceResult<()>>;

    /// Load a map.
    fn load(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<MapDocument>>;

    /// Delete a map.
    fn delete(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<()>>;

    /// Check if a map exists.
    fn exists(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<bool>>;
}

#[cfg(test)]
pub(crate) mod test_util {
    /// Simple blocking executor for tests.
    pub fn block_on<F: std::future::Future>(f: F) -> F::Output {
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

        fn dummy_raw_waker() -> RawWaker {
            fn no_op(_: *const ()) {}
            fn clone(_: *const ()) -> RawWaker {
                dummy_raw_waker()
            }
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut f = std::pin::pin!(f);

        loop {
            match f.as_mut().poll(&mut cx) {
                Poll::Ready(result) => return result,
                Poll::Pending => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_json_shape() {
        let doc = MapDocument::new("alice", 3, FeatureCollection::empty());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["userId"], "alice");
        assert_eq!(value["revision"], 3);
        assert_eq!(value["collection"]["type"], "FeatureCollection");
        assert!(value["savedAt"].is_string());

        let parsed = MapDocument::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_check_newer_than() {
        let doc = MapDocument::new("bob", 4, FeatureCollection::empty());
        assert!(doc.check_newer_than(None).is_ok());
        assert!(doc.check_newer_than(Some(4)).is_ok());
        assert!(matches!(
            doc.check_newer_than(Some(5)),
            Err(PersistenceError::Stale { stored: 5, attempted: 4 })
        ));
    }
}
