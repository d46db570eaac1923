//! HTTP storage backed by the map API (`/maps/{user}`).
//!
//! Every request names the map owner in the username header; the server only
//! serves a map to its owner.

use super::{BoxFuture, MapDocument, PersistenceError, PersistenceResult, StaleRevision, Storage};
use crate::config::HuntConfig;
use crate::sharing::USERNAME_HEADER;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use url::Url;

/// Storage that saves and loads maps through the CircleHunt server.
pub struct RemoteStorage {
    client: Client,
    base_url: Url,
}

impl RemoteStorage {
    pub fn new(base_url: &str) -> PersistenceResult<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> PersistenceResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PersistenceError::Other(format!("Invalid API URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(PersistenceError::Other(format!("{base_url} cannot be a base URL")));
        }
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &HuntConfig) -> PersistenceResult<Self> {
        Self::new(&config.api_base_url)
    }

    /// `{base}/maps/{user}`, with the user ID percent-encoded as one segment.
    pub fn map_url(&self, user_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("maps").push(user_id);
        }
        url
    }

    fn request(&self, method: Method, user_id: &str) -> RequestBuilder {
        self.client
            .request(method, self.map_url(user_id))
            .header(USERNAME_HEADER, user_id)
    }
}

fn network_error(e: reqwest::Error) -> PersistenceError {
    PersistenceError::Network(e.to_string())
}

/// Map a non-success response status to an error.
fn status_error(status: StatusCode, user_id: &str, stale: Option<StaleRevision>) -> PersistenceError {
    match status {
        StatusCode::NOT_FOUND => PersistenceError::NotFound(user_id.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PersistenceError::Forbidden(user_id.to_string()),
        StatusCode::CONFLICT => {
            let StaleRevision { stored, attempted } = stale.unwrap_or(StaleRevision {
                stored: 0,
                attempted: 0,
            });
            PersistenceError::Stale { stored, attempted }
        }
        status => PersistenceError::Network(format!("map server responded with {status}")),
    }
}

impl Storage for RemoteStorage {
    fn save(&self, user_id: &str, document: &MapDocument) -> BoxFuture<'_, PersistenceResult<()>> {
        let request = self.request(Method::PUT, user_id).json(document);
        let user_id = user_id.to_string();

        Box::pin(async move {
            let response = request.send().await.map_err(network_error)?;
            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let stale = if status == StatusCode::CONFLICT {
                response.json::<StaleRevision>().await.ok()
            } else {
                None
            };
            Err(status_error(status, &user_id, stale))
        })
    }

    fn load(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<MapDocument>> {
        let request = self.request(Method::GET, user_id);
        let user_id = user_id.to_string();

        Box::pin(async move {
            let response = request.send().await.map_err(network_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(status_error(status, &user_id, None));
            }
            response
                .json::<MapDocument>()
                .await
                .map_err(|e| PersistenceError::Serialization(format!("Failed to parse map for {user_id}: {e}")))
        })
    }

    fn delete(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<()>> {
        let request = self.request(Method::DELETE, user_id);
        let user_id = user_id.to_string();

        Box::pin(async move {
            let response = request.send().await.map_err(network_error)?;
            let status = response.status();
            if status.is_success() || status == StatusCode::NOT_FOUND {
                Ok(())
            } else {
                Err(status_error(status, &user_id, None))
            }
        })
    }

    fn exists(&self, user_id: &str) -> BoxFuture<'_, PersistenceResult<bool>> {
        let request = self.request(Method::GET, user_id);
        let user_id = user_id.to_string();

        Box::pin(async move {
            let response = request.send().await.map_err(network_error)?;
            match response.status() {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                status => Err(status_error(status, &user_id, None)),
            }
        })
    }
}
