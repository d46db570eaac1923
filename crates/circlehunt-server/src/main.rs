//! CircleHunt Share Server
//!
//! REST server for read-only circle sharing and remote map storage.
//!
//! ## Endpoints
//!
//! Every route except the public share lookup identifies the caller with an
//! `x-username` header. Map routes answer 403 when the caller is not `user_id`.
//!
//! ```text
//! POST   /circles/share                                 { "circles": [...] } -> 201 ShareCreated
//! GET    /circles/shared/{share_id}                     -> [SharedCircle]
//! POST   /circles/accept/{share_id}                     -> AcceptedShare (409 if already accepted)
//! GET    /circles/accepted                              -> [AcceptedShare]
//! GET    /circles/accepted/{share_id}/check             -> { "accepted": bool }
//! PUT    /circles/accepted/{share_id}/toggle-visibility { "visible": bool } -> AcceptedShare
//! DELETE /circles/accepted/{share_id}                   -> 204
//! GET    /maps/{user_id}                                -> MapDocument
//! PUT    /maps/{user_id}                                MapDocument -> 204 (409 StaleRevision)
//! DELETE /maps/{user_id}                                -> 204
//! ```

mod store;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{Duration, Utc};
use circlehunt_core::sharing::{
    AcceptedCheck, AcceptedShare, ApiMessage, CreateShareRequest, ShareCreated, SharedCircle, VisibilityUpdate,
};
use circlehunt_core::storage::{MapDocument, StaleRevision};
use std::{net::SocketAddr, sync::Arc};
use store::{AppState, StoreError};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Header carrying the caller's username.
const USERNAME_HEADER: &str = "x-username";

const DEFAULT_PUBLIC_URL: &str = "http://localhost:3030";
const DEFAULT_SHARE_TTL_DAYS: i64 = 30;

/// Server settings read from the environment.
struct ServerConfig {
    addr: SocketAddr,
    public_url: String,
    /// `None` when shares never expire.
    share_ttl: Option<Duration>,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let addr = lookup("CIRCLEHUNT_ADDR")
            .and_then(|value| match value.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!("Ignoring CIRCLEHUNT_ADDR={}: {}", value, e);
                    None
                }
            })
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3030)));

        let public_url = lookup("CIRCLEHUNT_PUBLIC_URL").unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string());

        let ttl_days = lookup("CIRCLEHUNT_SHARE_TTL_DAYS")
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(DEFAULT_SHARE_TTL_DAYS);
        let share_ttl = (ttl_days > 0).then(|| {
            Duration::try_days(ttl_days).unwrap_or_else(|| {
                warn!(
                    "Ignoring CIRCLEHUNT_SHARE_TTL_DAYS={}: out of range, using {} days",
                    ttl_days, DEFAULT_SHARE_TTL_DAYS
                );
                Duration::days(DEFAULT_SHARE_TTL_DAYS)
            })
        });

        Self {
            addr,
            public_url,
            share_ttl,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "circlehunt_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let state = Arc::new(AppState::new(config.public_url.clone(), config.share_ttl));

    if config.share_ttl.is_some() {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let purged = state.purge_expired(Utc::now());
                if purged > 0 {
                    info!("Purged {} expired shares, {} remain", purged, state.share_count());
                }
            }
        });
    }

    let app = router(state);

    info!("CircleHunt share server listening on {}", config.addr);
    info!("Share links point at {}", config.public_url);

    let listener = tokio::net::TcpListener::bind(config.addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/circles/share", post(create_share))
        .route("/circles/shared/{share_id}", get(get_shared))
        .route("/circles/accept/{share_id}", post(accept_share))
        .route("/circles/accepted", get(list_accepted))
        .route("/circles/accepted/{share_id}", delete(remove_accepted))
        .route("/circles/accepted/{share_id}/check", get(check_accepted))
        .route("/circles/accepted/{share_id}/toggle-visibility", put(toggle_visibility))
        .route("/maps/{user_id}", get(load_map).put(save_map).delete(delete_map))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler error.
#[derive(Debug)]
enum ApiError {
    Store(StoreError),
    MissingUsername,
    /// The caller asked for another player's map.
    Forbidden(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingUsername => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Store(e) => match e {
                StoreError::ShareNotFound(_) | StoreError::NotAccepted(_) | StoreError::MapNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                StoreError::ShareExpired(_) => StatusCode::GONE,
                StoreError::AlreadyAccepted(_) | StoreError::StaleMap { .. } => StatusCode::CONFLICT,
                StoreError::EmptyShare | StoreError::InvalidCircle(_) => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Store(StoreError::StaleMap { stored, attempted }) => {
                (status, Json(StaleRevision { stored, attempted })).into_response()
            }
            ApiError::Store(e) => (status, Json(ApiMessage::new(e.to_string()))).into_response(),
            ApiError::MissingUsername => {
                (status, Json(ApiMessage::new(format!("Missing {USERNAME_HEADER} header")))).into_response()
            }
            ApiError::Forbidden(owner) => {
                (status, Json(ApiMessage::new(format!("Not allowed to access the map of {owner}")))).into_response()
            }
        }
    }
}

/// Username of the calling player, taken from the `x-username` header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Viewer(String);

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USERNAME_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| Viewer(name.to_string()))
            .ok_or(ApiError::MissingUsername)
    }
}

impl Viewer {
    /// Only the owner may read or write a map.
    fn owns(&self, user_id: &str) -> Result<(), ApiError> {
        if self.0 == user_id {
            return Ok(());
        }
        warn!("{} tried to access the map of {}", self.0, user_id);
        Err(ApiError::Forbidden(user_id.to_string()))
    }
}

/// Index page
async fn index() -> &'static str {
    "CircleHunt Share Server - see /circles and /maps"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

async fn create_share(
    State(state): State<Arc<AppState>>,
    Viewer(owner): Viewer,
    Json(request): Json<CreateShareRequest>,
) -> Result<(StatusCode, Json<ShareCreated>), ApiError> {
    let created = state.create_share(&owner, &request.circles, Utc::now())?;
    info!("{} shared {} circles as {}", owner, request.circles.len(), created.share_id);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_shared(
    State(state): State<Arc<AppState>>,
    Path(share_id): Path<String>,
) -> Result<Json<Vec<SharedCircle>>, ApiError> {
    Ok(Json(state.fetch_share(&share_id, Utc::now())?))
}

async fn accept_share(
    State(state): State<Arc<AppState>>,
    Viewer(user): Viewer,
    Path(share_id): Path<String>,
) -> Result<Json<AcceptedShare>, ApiError> {
    let accepted = state.accept(&user, &share_id, Utc::now())?;
    info!("{} accepted share {}", user, share_id);
    Ok(Json(accepted))
}

async fn list_accepted(State(state): State<Arc<AppState>>, Viewer(user): Viewer) -> Json<Vec<AcceptedShare>> {
    Json(state.list_accepted(&user))
}

async fn check_accepted(
    State(state): State<Arc<AppState>>,
    Viewer(user): Viewer,
    Path(share_id): Path<String>,
) -> Json<AcceptedCheck> {
    Json(AcceptedCheck {
        accepted: state.is_accepted(&user, &share_id),
    })
}

async fn toggle_visibility(
    State(state): State<Arc<AppState>>,
    Viewer(user): Viewer,
    Path(share_id): Path<String>,
    Json(update): Json<VisibilityUpdate>,
) -> Result<Json<AcceptedShare>, ApiError> {
    Ok(Json(state.set_visibility(&user, &share_id, update.visible)?))
}

async fn remove_accepted(
    State(state): State<Arc<AppState>>,
    Viewer(user): Viewer,
    Path(share_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.remove_accepted(&user, &share_id)?;
    info!("{} removed share {}", user, share_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn load_map(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(user_id): Path<String>,
) -> Result<Json<MapDocument>, ApiError> {
    viewer.owns(&user_id)?;
    Ok(Json(state.load_map(&user_id)?))
}

async fn save_map(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(user_id): Path<String>,
    Json(document): Json<MapDocument>,
) -> Result<StatusCode, ApiError> {
    viewer.owns(&user_id)?;
    let revision = document.revision;
    if let Err(e) = state.save_map(&user_id, document) {
        warn!("Rejected map save for {}: {}", user_id, e);
        return Err(e.into());
    }
    info!("Saved map for {} at revision {}", user_id, revision);
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_map(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    viewer.owns(&user_id)?;
    if state.delete_map(&user_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use circlehunt_core::codec::FeatureCollection;
    use circlehunt_core::sharing::ShareCircle;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new("http://localhost:3030", None))
    }

    fn share_request() -> CreateShareRequest {
        CreateShareRequest {
            circles: vec![ShareCircle {
                latitude: 48.85,
                longitude: 2.35,
                radius: 400.0,
                is_inside: false,
            }],
        }
    }

    async fn viewer_from(request: Request<()>) -> Result<Viewer, ApiError> {
        let (mut parts, _) = request.into_parts();
        Viewer::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_viewer_extractor() {
        let request = Request::builder().header(USERNAME_HEADER, " ana ").body(()).unwrap();
        assert_eq!(viewer_from(request).await.unwrap(), Viewer("ana".to_string()));

        let missing = Request::builder().body(()).unwrap();
        let rejection = viewer_from(missing).await.unwrap_err();
        assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);

        let blank = Request::builder().header(USERNAME_HEADER, "  ").body(()).unwrap();
        assert!(viewer_from(blank).await.is_err());
    }

    #[tokio::test]
    async fn test_share_and_accept_handlers() {
        let state = state();
        let (status, Json(created)) = create_share(
            State(state.clone()),
            Viewer("ana".to_string()),
            Json(share_request()),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.share_url.ends_with(&created.share_id));

        let Json(circles) = get_shared(State(state.clone()), Path(created.share_id.clone()))
            .await
            .unwrap();
        assert_eq!(circles.len(), 1);
        assert!(!circles[0].is_inside);

        let Json(accepted) = accept_share(
            State(state.clone()),
            Viewer("ben".to_string()),
            Path(created.share_id.clone()),
        )
        .await
        .unwrap();
        assert_eq!(accepted.owner_username, "ana");
        assert!(accepted.visible);

        let again = accept_share(
            State(state.clone()),
            Viewer("ben".to_string()),
            Path(created.share_id.clone()),
        )
        .await
        .unwrap_err();
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let Json(check) = check_accepted(
            State(state.clone()),
            Viewer("ben".to_string()),
            Path(created.share_id.clone()),
        )
        .await;
        assert!(check.accepted);

        let Json(hidden) = toggle_visibility(
            State(state.clone()),
            Viewer("ben".to_string()),
            Path(created.share_id.clone()),
            Json(VisibilityUpdate { visible: false }),
        )
        .await
        .unwrap();
        assert!(!hidden.visible);

        let status = remove_accepted(
            State(state.clone()),
            Viewer("ben".to_string()),
            Path(created.share_id.clone()),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let Json(list) = list_accepted(State(state), Viewer("ben".to_string())).await;
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let state = state();
        let missing = get_shared(State(state.clone()), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let empty = create_share(
            State(state.clone()),
            Viewer("ana".to_string()),
            Json(CreateShareRequest { circles: vec![] }),
        )
        .await
        .unwrap_err();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        let not_accepted = toggle_visibility(
            State(state),
            Viewer("ben".to_string()),
            Path("nope".to_string()),
            Json(VisibilityUpdate { visible: true }),
        )
        .await
        .unwrap_err();
        assert_eq!(not_accepted.status(), StatusCode::NOT_FOUND);

        let expired = ApiError::from(StoreError::ShareExpired("s".to_string()));
        assert_eq!(expired.status(), StatusCode::GONE);
    }

    fn ana() -> Viewer {
        Viewer("ana".to_string())
    }

    #[tokio::test]
    async fn test_map_handlers() {
        let state = state();
        let doc = |revision| MapDocument::new("ana", revision, FeatureCollection::empty());

        let missing = load_map(State(state.clone()), ana(), Path("ana".to_string()))
            .await
            .unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let status = save_map(State(state.clone()), ana(), Path("ana".to_string()), Json(doc(4)))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let stale = save_map(State(state.clone()), ana(), Path("ana".to_string()), Json(doc(3)))
            .await
            .unwrap_err();
        assert_eq!(stale.status(), StatusCode::CONFLICT);
        assert_eq!(stale.into_response().status(), StatusCode::CONFLICT);

        let Json(loaded) = load_map(State(state.clone()), ana(), Path("ana".to_string()))
            .await
            .unwrap();
        assert_eq!(loaded.revision, 4);

        let deleted = delete_map(State(state.clone()), ana(), Path("ana".to_string())).await;
        assert_eq!(deleted.unwrap(), StatusCode::NO_CONTENT);
        let deleted = delete_map(State(state), ana(), Path("ana".to_string())).await;
        assert_eq!(deleted.unwrap(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_map_handlers_reject_other_players() {
        let state = state();
        let doc = MapDocument::new("ana", 1, FeatureCollection::empty());
        save_map(State(state.clone()), ana(), Path("ana".to_string()), Json(doc.clone()))
            .await
            .unwrap();
        let ben = || Viewer("ben".to_string());

        let read = load_map(State(state.clone()), ben(), Path("ana".to_string()))
            .await
            .unwrap_err();
        assert_eq!(read.status(), StatusCode::FORBIDDEN);
        assert_eq!(read.into_response().status(), StatusCode::FORBIDDEN);

        let mut overwrite = doc;
        overwrite.revision = 9;
        let write = save_map(State(state.clone()), ben(), Path("ana".to_string()), Json(overwrite))
            .await
            .unwrap_err();
        assert_eq!(write.status(), StatusCode::FORBIDDEN);

        let erase = delete_map(State(state.clone()), ben(), Path("ana".to_string()))
            .await
            .unwrap_err();
        assert_eq!(erase.status(), StatusCode::FORBIDDEN);

        assert_eq!(state.load_map("ana").unwrap().revision, 1);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServerConfig::from_lookup(|key| match key {
            "CIRCLEHUNT_ADDR" => Some("127.0.0.1:8080".to_string()),
            "CIRCLEHUNT_SHARE_TTL_DAYS" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.addr, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(config.public_url, DEFAULT_PUBLIC_URL);
        assert!(config.share_ttl.is_none());

        let defaults = ServerConfig::from_lookup(|_| None);
        assert_eq!(defaults.addr.to_string(), "0.0.0.0:3030");
        assert_eq!(defaults.share_ttl, Some(Duration::days(DEFAULT_SHARE_TTL_DAYS)));
    }

    #[test]
    fn test_config_out_of_range_ttl() {
        let config = ServerConfig::from_lookup(|key| match key {
            "CIRCLEHUNT_SHARE_TTL_DAYS" => Some(i64::MAX.to_string()),
            _ => None,
        });
        assert_eq!(config.share_ttl, Some(Duration::days(DEFAULT_SHARE_TTL_DAYS)));
    }

    #[test]
    fn test_router_builds() {
        let _ = router(state());
    }
}
