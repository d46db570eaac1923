//! Read-only circle sharing between players.

mod dto;
mod memory;
mod service;

#[cfg(not(target_arch = "wasm32"))]
mod http;

pub use dto::{
    AcceptedCheck, AcceptedShare, ApiMessage, CreateShareRequest, ShareCircle, ShareCreated, SharedCircle,
    VisibilityUpdate,
};
pub use memory::MemoryShareBackend;
pub use service::SharingService;

#[cfg(not(target_arch = "wasm32"))]
pub use http::{HttpShareBackend, USERNAME_HEADER};

use crate::storage::BoxFuture;
use thiserror::Error;

/// Sharing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    #[error("Share not found: {0}")]
    NotFound(String),
    #[error("Share expired: {0}")]
    Expired(String),
    #[error("Share already accepted: {0}")]
    Conflict(String),
    #[error("Share not accepted: {0}")]
    NotAccepted(String),
    #[error("Nothing to share")]
    EmptyShare,
    /// The server refused the request body, with its explanation.
    #[error("Share rejected: {0}")]
    Rejected(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for sharing operations.
pub type ShareResult<T> = Result<T, ShareError>;

/// Sharing API as seen by one viewer.
pub trait ShareBackend: Send + Sync {
    /// Publish a snapshot of circles under a new share ID.
    fn create_share(&self, circles: Vec<ShareCircle>) -> BoxFuture<'_, ShareResult<ShareCreated>>;

    /// Circles of a share, without accepting it.
    fn fetch_share(&self, share_id: &str) -> BoxFuture<'_, ShareResult<Vec<SharedCircle>>>;

    /// Accept a share. Fails with [`ShareError::Conflict`] if already accepted.
    fn accept(&self, share_id: &str) -> BoxFuture<'_, ShareResult<AcceptedShare>>;

    fn check_accepted(&self, share_id: &str) -> BoxFuture<'_, ShareResult<bool>>;

    fn toggle_visibility(&self, share_id: &str, visible: bool) -> BoxFuture<'_, ShareResult<AcceptedShare>>;

    fn remove(&self, share_id: &str) -> BoxFuture<'_, ShareResult<()>>;

    /// Every share the viewer has accepted.
    fn list_accepted(&self) -> BoxFuture<'_, ShareResult<Vec<AcceptedShare>>>;
}
