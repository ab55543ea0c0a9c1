//! Router and admin endpoints for listing, creating, signaling and
//! terminating matches.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::directory::{DirectoryError, MatchFilter, MatchListing, MatchParams};
use crate::ws::{ws_handler, AppState};

/// Build the full HTTP router: `/ws` plus the admin endpoints.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/matches", get(list_matches).post(create_match))
        .route("/matches/{match_id}/signal", post(signal_match))
        .route("/matches/{match_id}/terminate", post(terminate_match))
        .with_state(app_state)
}

type ApiError = (StatusCode, String);

fn api_error(e: DirectoryError) -> ApiError {
    let status = match &e {
        DirectoryError::UnknownModule(_) => StatusCode::BAD_REQUEST,
        DirectoryError::MatchNotFound(_) => StatusCode::NOT_FOUND,
        DirectoryError::Draining => StatusCode::SERVICE_UNAVAILABLE,
        DirectoryError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        DirectoryError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub label: String,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    #[serde(default)]
    pub query: String,
    pub limit: Option<usize>,
}

async fn list_matches(
    State(app_state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Json<Vec<MatchListing>> {
    let filter = MatchFilter {
        label: q.label,
        min_size: q.min_size.unwrap_or(0),
        max_size: q.max_size.unwrap_or(usize::MAX),
        authoritative: true,
        query: q.query,
    };
    Json(app_state.registry.listings(&filter, q.limit.unwrap_or(100)))
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub module: String,
    #[serde(default)]
    pub params: MatchParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub match_id: String,
}

async fn create_match(
    State(app_state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    let match_id = app_state
        .registry
        .create_match(&req.module, req.params)
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(CreateResponse { match_id })))
}

async fn signal_match(
    State(app_state): State<AppState>,
    Path(match_id): Path<String>,
    body: String,
) -> Result<String, ApiError> {
    app_state
        .registry
        .signal(&match_id, body)
        .await
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateQuery {
    pub grace_seconds: Option<u32>,
}

async fn terminate_match(
    State(app_state): State<AppState>,
    Path(match_id): Path<String>,
    Query(q): Query<TerminateQuery>,
) -> Result<StatusCode, ApiError> {
    if app_state.registry.get(&match_id).is_none() {
        return Err(api_error(DirectoryError::MatchNotFound(match_id)));
    }
    let grace_seconds = q
        .grace_seconds
        .unwrap_or_else(|| app_state.registry.grace_seconds());
    let registry = app_state.registry.clone();
    tokio::spawn(async move {
        match registry.terminate(&match_id, grace_seconds).await {
            Ok(migrated) => tracing::info!(match_id = %match_id, migrated, "match terminated"),
            Err(e) => tracing::warn!(match_id = %match_id, error = %e, "terminate failed"),
        }
    });
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MatchConfig, ServerConfig};
    use crate::registry::MatchRegistry;

    fn app_state() -> AppState {
        let registry = MatchRegistry::new(&ServerConfig::default());
        registry.register_module("match", MatchConfig::default());
        AppState { registry }
    }

    fn empty_list_query() -> ListQuery {
        ListQuery {
            label: String::new(),
            min_size: None,
            max_size: None,
            query: String::new(),
            limit: None,
        }
    }

    #[tokio::test]
    async fn create_then_list() {
        let state = app_state();
        let req = CreateRequest {
            module: "match".to_string(),
            params: MatchParams::new(),
        };
        let (status, Json(created)) = create_match(State(state.clone()), Json(req))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(listed) = list_matches(State(state), Query(empty_list_query())).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].match_id, created.match_id);
        assert_eq!(listed[0].size, 0);
    }

    #[tokio::test]
    async fn create_unknown_module_is_bad_request() {
        let req = CreateRequest {
            module: "tournament".to_string(),
            params: MatchParams::new(),
        };
        let err = create_match(State(app_state()), Json(req)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signal_returns_match_response() {
        let state = app_state();
        let id = state
            .registry
            .create_match("match", MatchParams::new())
            .unwrap();
        let reply = signal_match(State(state), Path(id), "inspect".to_string())
            .await
            .unwrap();
        assert_eq!(reply, "signal received: inspect");
    }

    #[tokio::test]
    async fn terminate_unknown_match_is_not_found() {
        let err = terminate_match(
            State(app_state()),
            Path("missing.node1".to_string()),
            Query(TerminateQuery {
                grace_seconds: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn terminate_without_grace_uses_configured_default() {
        let state = app_state();
        assert_eq!(
            state.registry.grace_seconds(),
            ServerConfig::default().shutdown_grace_secs
        );
        let id = state
            .registry
            .create_match("match", MatchParams::new())
            .unwrap();
        let status = terminate_match(
            State(state.clone()),
            Path(id.clone()),
            Query(TerminateQuery {
                grace_seconds: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        for _ in 0..100 {
            if state.registry.get(&id).is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(state.registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn terminate_is_accepted_and_migrates() {
        let state = app_state();
        let id = state
            .registry
            .create_match("match", MatchParams::new())
            .unwrap();
        let status = terminate_match(
            State(state.clone()),
            Path(id.clone()),
            Query(TerminateQuery {
                grace_seconds: Some(1),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        // No other open match exists, so a fresh one is created as the migration target
        let mut listed = Vec::new();
        for _ in 0..100 {
            let Json(found) = list_matches(State(state.clone()), Query(empty_list_query())).await;
            let found: Vec<MatchListing> = found.into_iter().filter(|l| l.match_id != id).collect();
            if !found.is_empty() {
                listed = found;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(listed.len(), 1);
        assert!(state.registry.get(&id).is_none());
    }
}
