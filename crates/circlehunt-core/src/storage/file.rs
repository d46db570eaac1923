//! File-based storage implementation for native platforms.

use super::{BoxFuture, MapDocument, PersistenceError, PersistenceResult, Storage};
use std::fs;
use std::path::{Path, PathBuf};

/// File-based storage for native platforms.
///
/// Stores one JSON file per user in a specified directory.
pub struct FileStorage {
    /// Base directory for map storage.
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new file storage with the given base directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(base_path: PathBuf) -> PersistenceResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                PersistenceError::Io(format!("Failed to create storage directory: {}", e))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Create file storage in the default location.
    ///
    /// On Unix: `~/.local/share/circlehunt/maps/`
    /// On Windows: `%LOCALAPPDATA%\circlehunt\maps\`
    pub fn default_location() -> PersistenceResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| PersistenceError::Io("Could not determine home directory".to_string()))?;

        Self::new(base.join("circlehunt").join("maps"))
    }

    /// Get the file path for a user's map.
    fn map_path(&self, user_id: &str) -> PathBuf {
        // Sanitize ID to be safe for filenames
        let safe_id: String = user_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{}.json", safe_id))
    }

    /// Get the base path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

fn read_document(path: &Path) -> PersistenceResult<MapDocument> {
    let json = fs::read_to_string(path)
        .map_err(|e| PersistenceError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    MapDocument::from_json(&json).map_err(|e| {
        PersistenceError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
    })
}

impl Storage for FileStorage {
    fn save(&self, user_id: &str, document: &MapDocument) -> BoxFuture<'_, PersistenceResult<()>> {
        let path = self.map_path(user_id);
        let json = match document.to_json() {
            Ok(j) => j,
            Err(e) => {
                return Box::pin(async move { Err(PersistenceError::Serialization(e.to_string())) });
            }
        };
        let revision = document.revision;

        Box::pin(async move {
            if path.exists() {
                // An unreadable old file is overwritten rather than blocking every save
                let stored = read_document(&path).ok().map(|d| d.revision);
                if let Some(stored) = stored {
                    if revision < stored {
                        return Err(PersistenceError::Stale {
                            stored,
                            attempted: revision,
                        });
                    }
                }
            }
            fs::write(&path, json).map_err(|e| {
                PersistenceError::Io(format!("Failed to write {}: {}", path.display(), e))
            })
        })
    }

    fn load(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<MapDocument>> {
        let path = self.map_path(user_id);
        let user_owned = user_id.to_string();

        Box::pin(async move {
            if !path.exists() {
                return Err(PersistenceError::NotFound(user_owned));
            }
            read_document(&path)
        })
    }

    fn delete(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<()>> {
        let path = self.map_path(user_id);

        Box::pin(async move {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    PersistenceError::Io(format!("Failed to delete {}: {}", path.display(), e))
                })?;
            }
            Ok(())
        })
    }

    fn exists(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<bool>> {
        let path = self.map_path(user_id);
        Box::pin(async move { Ok(path.exists()) })
    }
}
