//! Client-side sharing state: the viewer's accepted shares.

use super::{AcceptedShare, ShareBackend, ShareCircle, ShareCreated, ShareError, ShareResult, SharedCircle};
use crate::shapes::Circle;
use chrono::Utc;
use log::{debug, info};

/// Manages shares for one viewer over a [`ShareBackend`].
///
/// Accepted shares live here, never in the viewer's shape registry, so they
/// can't be merged, edited or saved as the viewer's own circles.
pub struct SharingService<B: ShareBackend> {
    backend: B,
    accepted: Vec<AcceptedShare>,
}

impl<B: ShareBackend> SharingService<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            accepted: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Publish a snapshot of circles. Only position, radius and class are sent.
    pub async fn create_share(&self, circles: &[Circle]) -> ShareResult<ShareCreated> {
        if circles.is_empty() {
            return Err(ShareError::EmptyShare);
        }
        let payload: Vec<ShareCircle> = circles.iter().map(ShareCircle::from).collect();
        let created = self.backend.create_share(payload).await?;
        info!("Shared {} circles as {}", circles.len(), created.share_id);
        Ok(created)
    }

    /// Preview a share without accepting it.
    pub async fn fetch_share(&self, share_id: &str) -> ShareResult<Vec<SharedCircle>> {
        self.backend.fetch_share(share_id).await
    }

    pub async fn check_accepted(&self, share_id: &str) -> ShareResult<bool> {
        if self.get(share_id).is_some() {
            return Ok(true);
        }
        self.backend.check_accepted(share_id).await
    }

    /// Accept a share. Accepting one that is already accepted returns the existing entry.
    pub async fn accept(&mut self, share_id: &str) -> ShareResult<AcceptedShare> {
        if let Some(existing) = self.get(share_id) {
            debug!("Share {} already accepted", share_id);
            return Ok(existing.clone());
        }

        let accepted = match self.backend.accept(share_id).await {
            Ok(accepted) => accepted,
            Err(ShareError::Conflict(_)) => self.recover_accepted(share_id).await?,
            Err(e) => return Err(e),
        };
        self.accepted.push(accepted.clone());
        Ok(accepted)
    }

    /// The server says we accepted this before but we have no local copy.
    async fn recover_accepted(&self, share_id: &str) -> ShareResult<AcceptedShare> {
        let listed = self.backend.list_accepted().await?;
        if let Some(accepted) = listed.into_iter().find(|s| s.share_id == share_id) {
            return Ok(accepted);
        }
        let circles = self.backend.fetch_share(share_id).await?;
        let owner_username = circles
            .first()
            .map(|c| c.owner_username.clone())
            .unwrap_or_default();
        Ok(AcceptedShare {
            share_id: share_id.to_string(),
            owner_username,
            circles,
            visible: true,
            accepted_at: Utc::now(),
        })
    }

    pub async fn toggle_visibility(&mut self, share_id: &str, visible: bool) -> ShareResult<()> {
        if self.get(share_id).is_none() {
            return Err(ShareError::NotAccepted(share_id.to_string()));
        }
        self.backend.toggle_visibility(share_id, visible).await?;
        if let Some(share) = self.accepted.iter_mut().find(|s| s.share_id == share_id) {
            share.visible = visible;
        }
        Ok(())
    }

    pub async fn remove(&mut self, share_id: &str) -> ShareResult<()> {
        if self.get(share_id).is_none() {
            return Err(ShareError::NotAccepted(share_id.to_string()));
        }
        self.backend.remove(share_id).await?;
        self.accepted.retain(|s| s.share_id != share_id);
        Ok(())
    }

    /// Replace the local list with the backend's.
    pub async fn sync_accepted(&mut self) -> ShareResult<&[AcceptedShare]> {
        self.accepted = self.backend.list_accepted().await?;
        Ok(&self.accepted)
    }

    pub fn accepted(&self) -> &[AcceptedShare] {
        &self.accepted
    }

    pub fn get(&self, share_id: &str) -> Option<&AcceptedShare> {
        self.accepted.iter().find(|s| s.share_id == share_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LatLng;
    use crate::sharing::MemoryShareBackend;
    use crate::storage::test_util::block_on;

    fn friend_share(backend: &MemoryShareBackend) -> String {
        backend
            .publish_as(
                "friend",
                &[ShareCircle {
                    latitude: 34.05,
                    longitude: -118.24,
                    radius: 800.0,
                    is_inside: true,
                }],
            )
            .unwrap()
    }

    #[test]
    fn test_create_share_snapshots_circles() {
        let service = SharingService::new(MemoryShareBackend::new("owner"));
        let circles = vec![
            Circle::reconstruct(7, LatLng::new(34.0, -118.0), 150.0, true, true),
            Circle::reconstruct(9, LatLng::new(34.1, -118.1), 60.0, false, false),
        ];

        let created = block_on(service.create_share(&circles)).unwrap();
        let fetched = block_on(service.fetch_share(&created.share_id)).unwrap();

        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[1].center(), LatLng::new(34.1, -118.1));
        assert!(!fetched[1].is_inside);
        assert_eq!(fetched[0].radius, 150.0);
    }

    #[test]
    fn test_create_empty_share() {
        let service = SharingService::new(MemoryShareBackend::new("owner"));
        assert_eq!(block_on(service.create_share(&[])), Err(ShareError::EmptyShare));
    }

    #[test]
    fn test_accept_twice_keeps_one_entry() {
        let backend = MemoryShareBackend::new("viewer");
        let share_id = friend_share(&backend);
        let mut service = SharingService::new(backend);

        let first = block_on(service.accept(&share_id)).unwrap();
        let second = block_on(service.accept(&share_id)).unwrap();

        assert_eq!(first, second);
        assert_eq!(service.accepted().len(), 1);
        assert_eq!(service.accepted()[0].owner_username, "friend");
        assert!(block_on(service.check_accepted(&share_id)).unwrap());
    }

    #[test]
    fn test_accept_recovers_from_remote_conflict() {
        let backend = MemoryShareBackend::new("viewer");
        let share_id = friend_share(&backend);
        // Accepted from another device: the backend knows, the local list doesn't
        block_on(backend.accept(&share_id)).unwrap();
        let mut service = SharingService::new(backend);
        assert!(service.accepted().is_empty());

        let accepted = block_on(service.accept(&share_id)).unwrap();
        assert_eq!(accepted.share_id, share_id);
        assert_eq!(service.accepted().len(), 1);
    }

    #[test]
    fn test_accept_expired_share() {
        let backend = MemoryShareBackend::new("viewer");
        let share_id = friend_share(&backend);
        backend.expire(&share_id).unwrap();
        let mut service = SharingService::new(backend);

        assert!(matches!(block_on(service.accept(&share_id)), Err(ShareError::Expired(_))));
        assert!(service.accepted().is_empty());
    }

    #[test]
    fn test_toggle_and_remove() {
        let backend = MemoryShareBackend::new("viewer");
        let share_id = friend_share(&backend);
        let mut service = SharingService::new(backend);

        assert_eq!(
            block_on(service.toggle_visibility(&share_id, false)),
            Err(ShareError::NotAccepted(share_id.clone()))
        );

        block_on(service.accept(&share_id)).unwrap();
        block_on(service.toggle_visibility(&share_id, false)).unwrap();
        assert!(!service.get(&share_id).unwrap().visible);

        block_on(service.remove(&share_id)).unwrap();
        assert!(service.get(&share_id).is_none());
        assert!(!block_on(service.check_accepted(&share_id)).unwrap());
        assert!(matches!(block_on(service.remove(&share_id)), Err(ShareError::NotAccepted(_))));
    }

    #[test]
    fn test_sync_accepted() {
        let backend = MemoryShareBackend::new("viewer");
        let share_id = friend_share(&backend);
        block_on(backend.accept(&share_id)).unwrap();
        let mut service = SharingService::new(backend);

        let synced = block_on(service.sync_accepted()).unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].share_id, share_id);
    }
}
