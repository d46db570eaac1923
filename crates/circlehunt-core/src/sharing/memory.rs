//! In-memory share backend for tests and offline play.

use super::{AcceptedShare, ShareBackend, ShareCircle, ShareCreated, ShareError, ShareResult, SharedCircle};
use crate::storage::BoxFuture;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

struct StoredShare {
    circles: Vec<SharedCircle>,
    expired: bool,
}

#[derive(Default)]
struct MemoryShares {
    shares: HashMap<String, StoredShare>,
    accepted: Vec<AcceptedShare>,
    next_circle_id: i64,
}

impl MemoryShares {
    fn publish(&mut self, owner: &str, circles: &[ShareCircle]) -> String {
        let share_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let circles = circles
            .iter()
            .map(|c| {
                self.next_circle_id += 1;
                SharedCircle {
                    id: self.next_circle_id,
                    latitude: c.latitude,
                    longitude: c.longitude,
                    radius: c.radius,
                    is_inside: c.is_inside,
                    owner_username: owner.to_string(),
                    created_at,
                }
            })
            .collect();
        self.shares.insert(
            share_id.clone(),
            StoredShare {
                circles,
                expired: false,
            },
        );
        share_id
    }

    fn live_share(&self, share_id: &str) -> ShareResult<&StoredShare> {
        let share = self
            .shares
            .get(share_id)
            .ok_or_else(|| ShareError::NotFound(share_id.to_string()))?;
        if share.expired {
            return Err(ShareError::Expired(share_id.to_string()));
        }
        Ok(share)
    }

    fn accepted_mut(&mut self, share_id: &str) -> ShareResult<&mut AcceptedShare> {
        self.accepted
            .iter_mut()
            .find(|s| s.share_id == share_id)
            .ok_or_else(|| ShareError::NotAccepted(share_id.to_string()))
    }
}

/// Share backend keeping everything in process memory, acting for one viewer.
pub struct MemoryShareBackend {
    viewer: String,
    state: RwLock<MemoryShares>,
}

fn lock_error(e: impl std::fmt::Display) -> ShareError {
    ShareError::Serialization(format!("Lock error: {}", e))
}

impl MemoryShareBackend {
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            state: RwLock::new(MemoryShares::default()),
        }
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    /// Publish circles on behalf of another player. Returns the share ID.
    pub fn publish_as(&self, owner: &str, circles: &[ShareCircle]) -> ShareResult<String> {
        let mut state = self.state.write().map_err(lock_error)?;
        Ok(state.publish(owner, circles))
    }

    /// Mark a share as expired.
    pub fn expire(&self, share_id: &str) -> ShareResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        let share = state
            .shares
            .get_mut(share_id)
            .ok_or_else(|| ShareError::NotFound(share_id.to_string()))?;
        share.expired = true;
        Ok(())
    }
}

impl ShareBackend for MemoryShareBackend {
    fn create_share(&self, circles: Vec<ShareCircle>) -> BoxFuture<'_, ShareResult<ShareCreated>> {
        Box::pin(async move {
            if circles.is_empty() {
                return Err(ShareError::EmptyShare);
            }
            let share_id = self.publish_as(&self.viewer, &circles)?;
            Ok(ShareCreated {
                share_url: format!("memory://share/{share_id}"),
                share_id,
                message: "Share created".to_string(),
            })
        })
    }

    fn fetch_share(&self, share_id: &str) -> BoxFuture<'_, ShareResult<Vec<SharedCircle>>> {
        let share_id = share_id.to_string();
        Box::pin(async move {
            let state = self.state.read().map_err(lock_error)?;
            Ok(state.live_share(&share_id)?.circles.clone())
        })
    }

    fn accept(&self, share_id: &str) -> BoxFuture<'_, ShareResult<AcceptedShare>> {
        let share_id = share_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().map_err(lock_error)?;
            if state.accepted.iter().any(|s| s.share_id == share_id) {
                return Err(ShareError::Conflict(share_id));
            }
            let circles = state.live_share(&share_id)?.circles.clone();
            let owner_username = circles
                .first()
                .map(|c| c.owner_username.clone())
                .unwrap_or_default();
            let accepted = AcceptedShare {
                share_id,
                owner_username,
                circles,
                visible: true,
                accepted_at: Utc::now(),
            };
            state.accepted.push(accepted.clone());
            Ok(accepted)
        })
    }

    fn check_accepted(&self, share_id: &str) -> BoxFuture<'_, ShareResult<bool>> {
        let share_id = share_id.to_string();
        Box::pin(async move {
            let state = self.state.read().map_err(lock_error)?;
            Ok(state.accepted.iter().any(|s| s.share_id == share_id))
        })
    }

    fn toggle_visibility(&self, share_id: &str, visible: bool) -> BoxFuture<'_, ShareResult<AcceptedShare>> {
        let share_id = share_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().map_err(lock_error)?;
            let accepted = state.accepted_mut(&share_id)?;
            accepted.visible = visible;
            Ok(accepted.clone())
        })
    }

    fn remove(&self, share_id: &str) -> BoxFuture<'_, ShareResult<()>> {
        let share_id = share_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().map_err(lock_error)?;
            let before = state.accepted.len();
            state.accepted.retain(|s| s.share_id != share_id);
            if state.accepted.len() == before {
                return Err(ShareError::NotAccepted(share_id));
            }
            Ok(())
        })
    }

    fn list_accepted(&self) -> BoxFuture<'_, ShareResult<Vec<AcceptedShare>>> {
        Box::pin(async move {
            let state = self.state.read().map_err(lock_error)?;
            Ok(state.accepted.clone())
        })
    }
}
