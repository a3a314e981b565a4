//! HTTP surface of the sync server.
//!
//! # Endpoints
//!
//! - `GET /health`: change-log health (no auth required)
//! - `POST /sync`: push a chunk of changes, receive other clients' changes
//! - `POST /sync/rv`: incremental pull by revision
//! - `GET /records/{table}/{pk}`: single-row fetch
//! - `GET /status/{client_id}`: per-table sync state of one client

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::storage::{ServerStore, ServerStoreError};
use crate::sync::protocol::{PullRequest, PushRequest, ResyncRequired};

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Authenticated user info, added to request extensions after auth
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// API key store - maps key -> AuthUser
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    pub fn from_entries(entries: Vec<ApiKeyEntry>) -> Self {
        let keys = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    AuthUser {
                        user_id: entry.user_id,
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Load API keys from config file
    pub fn load(config_path: &FsPath) -> Self {
        match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<ConfigFile>(&contents) {
                Ok(config) => {
                    let store = Self::from_entries(config.api_keys);
                    tracing::info!("Loaded {} API key(s)", store.keys.len());
                    store
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                Self::default()
            }
        }
    }

    /// Validate an API key and return the associated user
    fn validate(&self, key: &str) -> Option<AuthUser> {
        self.keys.get(key).cloned()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: ServerStore,
    pub api_keys: Arc<ApiKeyStore>,
}

/// Error response body
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for ServerStoreError {
    fn into_response(self) -> Response {
        match self {
            ServerStoreError::ResyncRequired { current_position } => (
                StatusCode::GONE,
                Json(ResyncRequired {
                    resync_required: true,
                    current_position,
                }),
            )
                .into_response(),
            ServerStoreError::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            other => {
                tracing::error!("request failed: {}", other);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    other.to_string(),
                )
            }
        }
    }
}

/// Authentication middleware
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        Some(_) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            );
        }
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "missing_auth",
                "Authorization header required",
            );
        }
    };

    match state.api_keys.validate(api_key) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key"),
    }
}

async fn health(State(state): State<AppState>) -> Result<Response, ServerStoreError> {
    Ok(Json(state.store.health().await?).into_response())
}

async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<PushRequest>,
) -> Result<Response, ServerStoreError> {
    tracing::debug!(
        user = %user.user_id,
        client = %request.client_id,
        changes = request.changes.len(),
        "push"
    );
    Ok(Json(state.store.push(&request).await?).into_response())
}

async fn pull(
    State(state): State<AppState>,
    Json(request): Json<PullRequest>,
) -> Result<Response, ServerStoreError> {
    Ok(Json(state.store.pull(&request).await?).into_response())
}

async fn fetch_record(
    State(state): State<AppState>,
    Path((table, pk)): Path<(String, String)>,
) -> Result<Response, ServerStoreError> {
    match state.store.fetch(&table, &pk).await? {
        Some(row) => Ok(Json(row).into_response()),
        None => Ok(error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{}/{} not found", table, pk),
        )),
    }
}

async fn client_status(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Response, ServerStoreError> {
    Ok(Json(state.store.client_status(&client_id).await?).into_response())
}

pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/sync", post(push))
        .route("/sync/rv", post(pull))
        .route("/records/{table}/{pk}", get(fetch_record))
        .route("/status/{client_id}", get(client_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app() -> (Router, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ServerStore::open(&temp_dir.path().join("server.db"), 72)
            .await
            .unwrap();
        let api_keys = ApiKeyStore::from_entries(vec![ApiKeyEntry {
            key: "secret".into(),
            user_id: "geo1".into(),
        }]);
        let state = AppState {
            store,
            api_keys: Arc::new(api_keys),
        };
        (router(state), temp_dir)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn authed(method: &str, uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer secret")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _dir) = app().await;
        let response = app
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["retentionWindowHours"], 72);
    }

    #[tokio::test]
    async fn test_sync_requires_bearer_key() {
        let (app, _dir) = app().await;
        let response = app
            .clone()
            .oneshot(
                HttpRequest::post("/sync/rv")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"tables": []}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "missing_auth");

        let mut request = authed("POST", "/sync/rv", json!({"tables": []}));
        request.headers_mut().insert(
            header::AUTHORIZATION,
            "Bearer wrong".parse().unwrap(),
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(body_json(response).await["error"], "invalid_key");
    }

    #[tokio::test]
    async fn test_push_then_fetch_record() {
        let (app, _dir) = app().await;
        let push = json!({
            "clientId": "dev-1",
            "lastChangeLogPosition": 0,
            "changes": [{
                "table": "collars",
                "op": "insert",
                "pk": "c-1",
                "fields": {"holeId": "BH-1", "holeType": "DD", "ActiveInd": true, "RowStatus": 0}
            }]
        });
        let response = app.clone().oneshot(authed("POST", "/sync", push)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["appliedCount"], 1);
        assert_eq!(body["applied"][0]["rv"], 1);
        assert_eq!(body["newChangeLogPosition"], 1);

        let response = app
            .clone()
            .oneshot(authed("GET", "/records/collars/c-1", Value::Null))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["fields"]["holeId"], "BH-1");

        let response = app
            .clone()
            .oneshot(authed("GET", "/records/collars/c-404", Value::Null))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(authed("GET", "/status/dev-1", Value::Null))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["clientId"], "dev-1");
        assert_eq!(body["tables"][0]["name"], "collars");
        assert_eq!(body["tables"][0]["lastSyncRevision"], 1);
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_engines_sync_over_http() {
        use crate::db::test_support::TestContext;
        use crate::db::CollarRepository;
        use crate::models::{Collar, RowStatus};
        use crate::sync::{HttpTransport, SyncEngine, SyncError};

        let (app, _dir) = app().await;
        let url = serve(app).await;

        let field = TestContext::new().await;
        let office = TestContext::new().await;
        let field_engine = SyncEngine::new(
            field.store.clone(),
            Arc::new(HttpTransport::new(&url, "secret")),
            "field-1",
        );
        let office_engine = SyncEngine::new(
            office.store.clone(),
            Arc::new(HttpTransport::new(&url, "secret")),
            "office-1",
        );

        let repo = CollarRepository::new(field.store.clone(), "geo1");
        let created = repo.create(Collar::new("BH-7", "RC")).await.unwrap();

        let report = field_engine.run_cycle().await.unwrap();
        assert_eq!(report.push.pushed, 1);
        assert_eq!(report.push.acknowledged, 1);
        let local = repo.require(created.id()).await.unwrap();
        assert!(!local.meta.is_dirty());
        assert!(local.meta.rv > 0);

        let summary = office_engine.pull_incremental().await.unwrap();
        assert_eq!(summary.applied, 1);
        let copy = CollarRepository::new(office.store.clone(), "lead")
            .require(created.id())
            .await
            .unwrap();
        assert_eq!(copy.data.hole_id, "BH-7");
        assert_eq!(copy.meta.row_status, RowStatus::Draft);
        assert_eq!(copy.meta.rv, local.meta.rv);
        assert!(!copy.meta.is_dirty());

        let stranger = SyncEngine::new(
            office.store.clone(),
            Arc::new(HttpTransport::new(&url, "wrong")),
            "office-1",
        );
        let err = stranger.pull_incremental().await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_bad_push_is_400() {
        let (app, _dir) = app().await;
        let push = json!({
            "clientId": "dev-1",
            "lastChangeLogPosition": 0,
            "changes": [{"table": "lookup_codes", "op": "insert", "pk": "X", "fields": {}}]
        });
        let response = app.oneshot(authed("POST", "/sync", push)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
