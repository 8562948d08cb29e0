//! REST surface
//!
//! A thin HTTP layer over one backend family: the capability model plus
//! per-kind resource collections. Handlers only translate between HTTP and
//! the facade contracts; all semantics live behind [`BackendProxy`].

use crate::backend::{BackendProxy, FacadeRef};
use crate::error::Error;
use crate::occi::{ActionInstance, Link, LinkId, LinkKind, Model, Resource};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

// =============================================================================
// State and error mapping
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<BackendProxy>,
    pub model: Arc<Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

/// Taxonomy error carried out of a handler
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::Argument(_)
        | Error::ArgumentTypeMismatch { .. }
        | Error::IdentifierNotValid(_)
        | Error::ResourceNotValid(_) => StatusCode::BAD_REQUEST,
        Error::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
        Error::IdentifierConflict { .. } | Error::ResourceState { .. } => StatusCode::CONFLICT,
        Error::ActionNotImplemented(_) | Error::MethodNotImplemented { .. } => {
            StatusCode::NOT_IMPLEMENTED
        }
        Error::Authentication(_) => StatusCode::UNAUTHORIZED,
        Error::Authorization(_) => StatusCode::FORBIDDEN,
        Error::Connection(_) | Error::ResourceRetrieval(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn variant_of(err: &Error) -> &'static str {
    match err {
        Error::Argument(_) => "argument",
        Error::ArgumentTypeMismatch { .. } => "argument_type_mismatch",
        Error::IdentifierNotValid(_) => "identifier_not_valid",
        Error::ResourceNotFound { .. } => "resource_not_found",
        Error::IdentifierConflict { .. } => "identifier_conflict",
        Error::ResourceNotValid(_) => "resource_not_valid",
        Error::ResourceState { .. } => "resource_state",
        Error::ResourceAction { .. } => "resource_action",
        Error::ActionNotImplemented(_) => "action_not_implemented",
        Error::MethodNotImplemented { .. } => "method_not_implemented",
        Error::Authentication(_) => "authentication",
        Error::Authorization(_) => "authorization",
        Error::Connection(_) => "connection",
        _ => "internal",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        debug!(status = %status, error = %self.0, "request failed");
        let body = ApiErrorResponse {
            error: variant_of(&self.0).to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type HandlerResult<T> = std::result::Result<T, ApiError>;

// =============================================================================
// Router
// =============================================================================

/// Build the service router over one backend family
pub fn router(proxy: Arc<BackendProxy>, model: Arc<Model>) -> Router {
    let state = AppState { proxy, model };

    Router::new()
        .route("/healthz", get(health))
        .route("/occi/model", get(get_model))
        .route("/occi/link", post(attach_link))
        .route("/occi/link/:link_id", get(get_link).delete(detach_link))
        .route(
            "/occi/:kind",
            get(list_resources)
                .post(create_resource)
                .delete(delete_all),
        )
        .route(
            "/occi/:kind/:id",
            get(get_resource).delete(delete_resource),
        )
        .route("/occi/:kind/action", post(trigger_action_on_all))
        .route("/occi/:kind/:id/action", post(trigger_action))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Mixin filter carried as a comma-separated query parameter
#[derive(Debug, Default, Deserialize)]
struct FilterQuery {
    #[serde(default)]
    mixin: Option<String>,
}

impl FilterQuery {
    fn mixins(&self) -> Vec<String> {
        self.mixin
            .as_deref()
            .map(|m| {
                m.split(',')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn facade(state: &AppState, kind: &str) -> HandlerResult<FacadeRef> {
    // An unregistered kind term is a bad path, not a server fault
    state
        .proxy
        .resolve(kind)
        .map_err(|_| ApiError(Error::not_found("kind", kind)))
}

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn get_model(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.model.as_ref().clone())
}

async fn list_resources(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(filter): Query<FilterQuery>,
) -> HandlerResult<Json<Vec<Resource>>> {
    let facade = facade(&state, &kind)?;
    let resources = facade.resources().list(&filter.mixins()).await?;
    Ok(Json(resources))
}

async fn get_resource(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> HandlerResult<Json<Resource>> {
    let facade = facade(&state, &kind)?;
    Ok(Json(facade.resources().get(&id).await?))
}

#[derive(Debug, Serialize, Deserialize)]
struct CreatedResponse {
    id: String,
}

async fn create_resource(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(resource): Json<Resource>,
) -> HandlerResult<impl IntoResponse> {
    let facade = facade(&state, &kind)?;
    let id = facade.resources().create(resource).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn delete_resource(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> HandlerResult<StatusCode> {
    let facade = facade(&state, &kind)?;
    facade.resources().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_all(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(filter): Query<FilterQuery>,
) -> HandlerResult<StatusCode> {
    let facade = facade(&state, &kind)?;
    facade.resources().delete_all(&filter.mixins()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger_action(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Json(action): Json<ActionInstance>,
) -> HandlerResult<StatusCode> {
    let facade = facade(&state, &kind)?;
    facade.resources().trigger_action(&id, &action).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger_action_on_all(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(filter): Query<FilterQuery>,
    Json(action): Json<ActionInstance>,
) -> HandlerResult<StatusCode> {
    let facade = facade(&state, &kind)?;
    facade
        .resources()
        .trigger_action_on_all(&action, &filter.mixins())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn attach_link(
    State(state): State<AppState>,
    Json(link): Json<Link>,
) -> HandlerResult<impl IntoResponse> {
    let compute = state.proxy.compute().map_err(ApiError::from)?;
    let id = match link.kind {
        LinkKind::NetworkInterface => compute.attach_network(link).await?,
        LinkKind::StorageLink => compute.attach_storage(link).await?,
        LinkKind::SecurityGroupLink => {
            return Err(ApiError(Error::ActionNotImplemented(
                "securitygrouplink attach".into(),
            )))
        }
    };
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn get_link(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
) -> HandlerResult<Json<Link>> {
    let parsed = LinkId::parse(&link_id)?;
    let compute = state.proxy.compute().map_err(ApiError::from)?;
    let link = match parsed.kind {
        LinkKind::NetworkInterface => compute.get_network_link(&link_id).await?,
        LinkKind::StorageLink => compute.get_storage_link(&link_id).await?,
        LinkKind::SecurityGroupLink => {
            return Err(ApiError(Error::ActionNotImplemented(
                "securitygrouplink retrieval".into(),
            )))
        }
    };
    Ok(Json(link))
}

async fn detach_link(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
) -> HandlerResult<StatusCode> {
    let parsed = LinkId::parse(&link_id)?;
    let compute = state.proxy.compute().map_err(ApiError::from)?;
    match parsed.kind {
        LinkKind::NetworkInterface => compute.detach_network(&link_id).await?,
        LinkKind::StorageLink => compute.detach_storage(&link_id).await?,
        LinkKind::SecurityGroupLink => {
            return Err(ApiError(Error::ActionNotImplemented(
                "securitygrouplink detach".into(),
            )))
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendFactory;
    use crate::config::BridgeConfig;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_router() -> Router {
        let dir = tempfile::tempdir().unwrap();
        let fixture = serde_json::json!({
            "resources": [{
                "id": "42",
                "kind": "compute",
                "title": "vm one",
                "attributes": {"occi.core.id": "42"},
                "state": {"kind": "compute", "state": "active"}
            }]
        });
        for kind in ["compute", "network", "storage"] {
            let doc = if kind == "compute" {
                fixture.clone()
            } else {
                serde_json::json!({"resources": []})
            };
            std::fs::write(
                dir.path().join(format!("{}.json", kind)),
                doc.to_string(),
            )
            .unwrap();
        }

        let mut config = BridgeConfig::default();
        config.dummy.fixtures_dir = dir.path().to_path_buf();
        let (proxy, extender) = BackendFactory::create("dummy", &config, MemoryStore::shared())
            .await
            .unwrap();

        let mut model = Model::infrastructure();
        extender.extend_model(&mut model).await.unwrap();
        router(Arc::new(proxy), Arc::new(model))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_router().await;
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_model_lists_kinds() {
        let app = test_router().await;
        let response = app
            .oneshot(Request::builder().uri("/occi/model").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let model = body_json(response).await;
        assert!(model["kinds"].as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn test_list_and_get_resource() {
        let app = test_router().await;
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/occi/compute").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list = body_json(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let response = app
            .oneshot(Request::builder().uri("/occi/compute/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let vm = body_json(response).await;
        assert_eq!(vm["id"], "42");
    }

    #[tokio::test]
    async fn test_missing_resource_is_404_with_taxonomy_body() {
        let app = test_router().await;
        let response = app
            .oneshot(Request::builder().uri("/occi/compute/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "resource_not_found");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_404() {
        let app = test_router().await;
        let response = app
            .oneshot(Request::builder().uri("/occi/printer").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_returns_created_id() {
        let app = test_router().await;
        let resource = serde_json::json!({"id": "n1", "kind": "network"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/occi/network")
                    .header("content-type", "application/json")
                    .body(Body::from(resource.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["id"], "n1");
    }

    #[tokio::test]
    async fn test_action_dispatch_and_state_conflict() {
        let app = test_router().await;
        let stop = serde_json::json!({
            "action": {
                "scheme": "http://schemas.ogf.org/occi/infrastructure/compute/action#",
                "term": "stop"
            }
        });

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/occi/compute/42/action")
                    .header("content-type", "application/json")
                    .body(Body::from(stop.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // A second stop is invalid in the now-inactive state
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/occi/compute/42/action")
                    .header("content-type", "application/json")
                    .body(Body::from(stop.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_delete_resource() {
        let app = test_router().await;
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/occi/compute/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::builder().uri("/occi/compute/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_link_id_is_400() {
        let app = test_router().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/occi/link/compute_42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
