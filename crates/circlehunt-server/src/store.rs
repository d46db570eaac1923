//! Shared server state: published shares, per-user accepted shares and saved maps.

use chrono::{DateTime, Duration, Utc};
use circlehunt_core::sharing::{AcceptedShare, ShareCircle, ShareCreated, SharedCircle};
use circlehunt_core::storage::MapDocument;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Share not found: {0}")]
    ShareNotFound(String),
    #[error("Share expired: {0}")]
    ShareExpired(String),
    #[error("Share already accepted: {0}")]
    AlreadyAccepted(String),
    #[error("Share not accepted: {0}")]
    NotAccepted(String),
    #[error("A share needs at least one circle")]
    EmptyShare,
    #[error("Invalid circle: {0}")]
    InvalidCircle(String),
    #[error("No saved map for {0}")]
    MapNotFound(String),
    #[error("Stale save: stored revision {stored}, attempted {attempted}")]
    StaleMap { stored: u64, attempted: u64 },
}

/// A published share.
#[derive(Debug, Clone)]
pub struct ShareRecord {
    pub owner: String,
    pub circles: Vec<SharedCircle>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ShareRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }
}

/// Shared application state
pub struct AppState {
    /// Published shares by share ID
    shares: DashMap<String, ShareRecord>,
    /// Accepted shares by username
    accepted: DashMap<String, Vec<AcceptedShare>>,
    /// Saved maps by username
    maps: DashMap<String, MapDocument>,
    next_circle_id: AtomicI64,
    /// Public base URL used to build share links
    public_url: String,
    /// How long a share can be fetched or accepted; `None` keeps it forever.
    /// A TTL reaching past the last representable date also never expires.
    share_ttl: Option<Duration>,
}

impl AppState {
    pub fn new(public_url: impl Into<String>, share_ttl: Option<Duration>) -> Self {
        Self {
            shares: DashMap::new(),
            accepted: DashMap::new(),
            maps: DashMap::new(),
            next_circle_id: AtomicI64::new(1),
            public_url: public_url.into(),
            share_ttl,
        }
    }

    pub fn share_url(&self, share_id: &str) -> String {
        format!("{}/share/{}", self.public_url.trim_end_matches('/'), share_id)
    }

    // --- Shares ---

    /// Publish a snapshot of circles owned by `owner`.
    pub fn create_share(
        &self,
        owner: &str,
        circles: &[ShareCircle],
        now: DateTime<Utc>,
    ) -> Result<ShareCreated, StoreError> {
        if circles.is_empty() {
            return Err(StoreError::EmptyShare);
        }
        if let Some(bad) = circles.iter().find(|c| {
            !c.latitude.is_finite() || !c.longitude.is_finite() || !c.radius.is_finite() || c.radius <= 0.0
        }) {
            return Err(StoreError::InvalidCircle(format!(
                "({}, {}) radius {}",
                bad.latitude, bad.longitude, bad.radius
            )));
        }

        let share_id = Uuid::new_v4().to_string();
        let circles = circles
            .iter()
            .map(|c| SharedCircle {
                id: self.next_circle_id.fetch_add(1, Ordering::Relaxed),
                latitude: c.latitude,
                longitude: c.longitude,
                radius: c.radius,
                is_inside: c.is_inside,
                owner_username: owner.to_string(),
                created_at: now,
            })
            .collect();
        self.shares.insert(
            share_id.clone(),
            ShareRecord {
                owner: owner.to_string(),
                circles,
                expires_at: self.share_ttl.and_then(|ttl| now.checked_add_signed(ttl)),
            },
        );

        Ok(ShareCreated {
            share_url: self.share_url(&share_id),
            share_id,
            message: "Circles shared".to_string(),
        })
    }

    fn live_share(&self, share_id: &str, now: DateTime<Utc>) -> Result<ShareRecord, StoreError> {
        let record = self
            .shares
            .get(share_id)
            .ok_or_else(|| StoreError::ShareNotFound(share_id.to_string()))?;
        if record.is_expired(now) {
            return Err(StoreError::ShareExpired(share_id.to_string()));
        }
        Ok(record.clone())
    }

    pub fn fetch_share(&self, share_id: &str, now: DateTime<Utc>) -> Result<Vec<SharedCircle>, StoreError> {
        Ok(self.live_share(share_id, now)?.circles)
    }

    pub fn accept(&self, user: &str, share_id: &str, now: DateTime<Utc>) -> Result<AcceptedShare, StoreError> {
        let record = self.live_share(share_id, now)?;
        let mut list = self.accepted.entry(user.to_string()).or_default();
        if list.iter().any(|s| s.share_id == share_id) {
            return Err(StoreError::AlreadyAccepted(share_id.to_string()));
        }
        let accepted = AcceptedShare {
            share_id: share_id.to_string(),
            owner_username: record.owner,
            circles: record.circles,
            visible: true,
            accepted_at: now,
        };
        list.push(accepted.clone());
        Ok(accepted)
    }

    pub fn is_accepted(&self, user: &str, share_id: &str) -> bool {
        self.accepted
            .get(user)
            .is_some_and(|list| list.iter().any(|s| s.share_id == share_id))
    }

    pub fn set_visibility(&self, user: &str, share_id: &str, visible: bool) -> Result<AcceptedShare, StoreError> {
        let mut list = self
            .accepted
            .get_mut(user)
            .ok_or_else(|| StoreError::NotAccepted(share_id.to_string()))?;
        let share = list
            .iter_mut()
            .find(|s| s.share_id == share_id)
            .ok_or_else(|| StoreError::NotAccepted(share_id.to_string()))?;
        share.visible = visible;
        Ok(share.clone())
    }

    pub fn remove_accepted(&self, user: &str, share_id: &str) -> Result<(), StoreError> {
        let mut list = self
            .accepted
            .get_mut(user)
            .ok_or_else(|| StoreError::NotAccepted(share_id.to_string()))?;
        let before = list.len();
        list.retain(|s| s.share_id != share_id);
        if list.len() == before {
            return Err(StoreError::NotAccepted(share_id.to_string()));
        }
        Ok(())
    }

    pub fn list_accepted(&self, user: &str) -> Vec<AcceptedShare> {
        self.accepted.get(user).map(|list| list.clone()).unwrap_or_default()
    }

    /// Drop expired shares. Accepted copies are kept.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.shares.len();
        self.shares.retain(|_, record| !record.is_expired(now));
        before - self.shares.len()
    }

    pub fn share_count(&self) -> usize {
        self.shares.len()
    }

    // --- Maps ---

    /// Store a map unless it is older than the stored one.
    pub fn save_map(&self, user: &str, document: MapDocument) -> Result<(), StoreError> {
        match self.maps.entry(user.to_string()) {
            Entry::Occupied(mut entry) => {
                let stored = entry.get().revision;
                if document.revision < stored {
                    return Err(StoreError::StaleMap {
                        stored,
                        attempted: document.revision,
                    });
                }
                entry.insert(document);
            }
            Entry::Vacant(entry) => {
                entry.insert(document);
            }
        }
        Ok(())
    }

    pub fn load_map(&self, user: &str) -> Result<MapDocument, StoreError> {
        self.maps
            .get(user)
            .map(|doc| doc.clone())
            .ok_or_else(|| StoreError::MapNotFound(user.to_string()))
    }

    /// Returns whether a map was deleted.
    pub fn delete_map(&self, user: &str) -> bool {
        self.maps.remove(user).is_some()
    }
}
