//! Share backend talking to the CircleHunt REST API.

use super::{
    AcceptedCheck, AcceptedShare, ApiMessage, CreateShareRequest, ShareBackend, ShareCircle, ShareCreated, ShareError, ShareResult,
    SharedCircle, VisibilityUpdate,
};
use crate::config::HuntConfig;
use crate::storage::BoxFuture;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// Header carrying the authenticated username, set by the upstream auth layer.
pub const USERNAME_HEADER: &str = "x-username";

/// Which kind of resource a request addresses, for 404 mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Share,
    Accepted,
}

pub struct HttpShareBackend {
    client: Client,
    base_url: Url,
    username: String,
}

impl HttpShareBackend {
    pub fn new(base_url: &str, username: impl Into<String>) -> ShareResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ShareError::Network(format!("Invalid API URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ShareError::Network(format!("{base_url} cannot be a base URL")));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            username: username.into(),
        })
    }

    pub fn from_config(config: &HuntConfig, username: impl Into<String>) -> ShareResult<Self> {
        Self::new(&config.api_base_url, username)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Base URL with the given path segments appended (each percent-encoded).
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(USERNAME_HEADER, &self.username)
    }
}

fn network_error(e: reqwest::Error) -> ShareError {
    ShareError::Network(e.to_string())
}

/// Map a non-success status to an error. `message` is the server's
/// explanation, when it sent one.
fn status_error(status: StatusCode, share_id: &str, resource: Resource, message: Option<String>) -> ShareError {
    match (status, resource) {
        (StatusCode::NOT_FOUND, Resource::Share) => ShareError::NotFound(share_id.to_string()),
        (StatusCode::NOT_FOUND, Resource::Accepted) => ShareError::NotAccepted(share_id.to_string()),
        (StatusCode::GONE, _) => ShareError::Expired(share_id.to_string()),
        (StatusCode::CONFLICT, _) => ShareError::Conflict(share_id.to_string()),
        (StatusCode::BAD_REQUEST, _) => ShareError::Rejected(message.unwrap_or_else(|| status.to_string())),
        (status, _) => ShareError::Network(format!("sharing API responded with {status}")),
    }
}

async fn send(request: RequestBuilder, share_id: &str, resource: Resource) -> ShareResult<Response> {
    let response = request.send().await.map_err(network_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.json::<ApiMessage>().await.ok().map(|body| body.message);
    Err(status_error(status, share_id, resource, message))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ShareResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ShareError::Serialization(e.to_string()))
}

impl ShareBackend for HttpShareBackend {
    fn create_share(&self, circles: Vec<ShareCircle>) -> BoxFuture<'_, ShareResult<ShareCreated>> {
        let request = self
            .authed(self.client.post(self.endpoint(&["circles", "share"])))
            .json(&CreateShareRequest { circles });
        Box::pin(async move { read_json(send(request, "", Resource::Share).await?).await })
    }

    fn fetch_share(&self, share_id: &str) -> BoxFuture<'_, ShareResult<Vec<SharedCircle>>> {
        let share_id = share_id.to_string();
        let request = self.client.get(self.endpoint(&["circles", "shared", share_id.as_str()]));
        Box::pin(async move { read_json(send(request, &share_id, Resource::Share).await?).await })
    }

    fn accept(&self, share_id: &str) -> BoxFuture<'_, ShareResult<AcceptedShare>> {
        let share_id = share_id.to_string();
        let request = self.authed(self.client.post(self.endpoint(&["circles", "accept", share_id.as_str()])));
        Box::pin(async move { read_json(send(request, &share_id, Resource::Share).await?).await })
    }

    fn check_accepted(&self, share_id: &str) -> BoxFuture<'_, ShareResult<bool>> {
        let share_id = share_id.to_string();
        let request = self.authed(
            self.client
                .get(self.endpoint(&["circles", "accepted", share_id.as_str(), "check"])),
        );
        Box::pin(async move {
            let check: AcceptedCheck = read_json(send(request, &share_id, Resource::Accepted).await?).await?;
            Ok(check.accepted)
        })
    }

    fn toggle_visibility(&self, share_id: &str, visible: bool) -> BoxFuture<'_, ShareResult<AcceptedShare>> {
        let share_id = share_id.to_string();
        let request = self
            .authed(
                self.client
                    .put(self.endpoint(&["circles", "accepted", share_id.as_str(), "toggle-visibility"])),
            )
            .json(&VisibilityUpdate { visible });
        Box::pin(async move { read_json(send(request, &share_id, Resource::Accepted).await?).await })
    }

    fn remove(&self, share_id: &str) -> BoxFuture<'_, ShareResult<()>> {
        let share_id = share_id.to_string();
        let request = self.authed(self.client.delete(self.endpoint(&["circles", "accepted", share_id.as_str()])));
        Box::pin(async move {
            send(request, &share_id, Resource::Accepted).await?;
            Ok(())
        })
    }

    fn list_accepted(&self) -> BoxFuture<'_, ShareResult<Vec<AcceptedShare>>> {
        let request = self.authed(self.client.get(self.endpoint(&["circles", "accepted"])));
        Box::pin(async move { read_json(send(request, "", Resource::Accepted).await?).await })
    }
}
