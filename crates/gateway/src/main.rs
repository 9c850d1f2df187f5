//! Scriptorium API Gateway
//!
//! HTTP surface of the manuscript core.
//! Handles:
//! - Bearer token authentication (anonymous callers allowed where reads permit)
//! - File upload, watermarked view and download, deletion
//! - Access requests and their review
//! - Watermark settings administration
//! - Observability (logging, metrics, request ids)

mod auth;
mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use scriptorium_common::{
    auth::JwtManager,
    config::{AppConfig, ObservabilityConfig},
    db::{self, RecordStore},
    metrics, notify,
    notify::Notifier,
    storage::{self, ContentStore},
    CryptoStore,
};
use scriptorium_delivery::{
    AccessRequestWorkflow, Clock, DeliveryPipeline, RetryPolicy, SystemClock,
    WatermarkSettingsService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RecordStore>,
    pub pipeline: DeliveryPipeline,
    pub workflow: AccessRequestWorkflow,
    pub settings: WatermarkSettingsService,
    pub jwt: Option<Arc<JwtManager>>,
}

impl AppState {
    /// Wire services from already-built backends
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn RecordStore>,
        content: Arc<dyn ContentStore>,
        crypto: Arc<CryptoStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings =
            WatermarkSettingsService::new(store.clone(), config.watermark.default_text.clone());

        let pipeline = DeliveryPipeline::new(
            store.clone(),
            content,
            crypto,
            settings.clone(),
            clock.clone(),
        )
        .with_retry(RetryPolicy::from_config(&config.retry))
        .with_max_upload_bytes(config.server.max_upload_bytes);

        let workflow = AccessRequestWorkflow::new(
            store.clone(),
            notifier,
            clock,
            config.access_requests.clone(),
        );

        let jwt = config
            .auth
            .jwt_secret
            .as_deref()
            .map(|secret| Arc::new(JwtManager::new(secret, config.auth.jwt_expiration_secs)));

        Self {
            config,
            store,
            pipeline,
            workflow,
            settings,
            jwt,
        }
    }

    /// Connect the configured backends
    pub async fn connect(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let crypto = CryptoStore::from_config(&config.crypto).context("crypto configuration")?;
        let store = db::connect(&config.database)
            .await
            .context("record store")?;
        let content = storage::from_config(&config.storage);
        let notifier = notify::from_config(&config.notifications).context("notifier")?;

        Ok(Self::new(
            config,
            store,
            content,
            Arc::new(crypto),
            notifier,
            Arc::new(SystemClock),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.observability);

    info!("Starting Scriptorium API Gateway v{}", scriptorium_common::VERSION);

    let config = Arc::new(config);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(port = config.observability.metrics_port, "Metrics exporter listening");
    }
    metrics::register_metrics();

    info!(backend = ?config.database.backend, "Connecting record store...");
    let state = AppState::connect(config.clone()).await?;

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let upload_limit = state.config.server.max_upload_bytes;
    let timeout = state.config.request_timeout();

    // API routes
    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Manuscript headers
        .route(
            "/manuscripts/{id}",
            get(handlers::manuscripts::get_manuscript).put(handlers::manuscripts::put_manuscript),
        )
        .route("/manuscripts/{id}/access", get(handlers::manuscripts::get_access_level))

        // Files
        .route(
            "/manuscripts/{id}/files",
            post(handlers::files::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/manuscripts/{id}/files/{slot}",
            get(handlers::files::view_file).delete(handlers::files::delete_file),
        )
        .route("/manuscripts/{id}/files/{slot}/download", get(handlers::files::download_file))
        .route("/manuscripts/{id}/orphans/sweep", post(handlers::files::sweep_orphans))

        // Access requests
        .route(
            "/manuscripts/{id}/access-requests",
            post(handlers::access_requests::create_request),
        )
        .route("/access-requests/pending", get(handlers::access_requests::list_pending))
        .route("/access-requests/mine", get(handlers::access_requests::list_mine))
        .route(
            "/access-requests/{id}/review",
            post(handlers::access_requests::review_request),
        )

        // Administration
        .route(
            "/settings/watermark",
            get(handlers::settings::get_watermark_settings)
                .put(handlers::settings::update_watermark_settings),
        )
        .route(
            "/forensics/extract",
            post(handlers::forensics::extract).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_metrics));

    // Compose the app
    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use scriptorium_common::{
        db::MemoryStore, notify::RecordingNotifier, storage::MemoryContentStore, Principal, Role,
    };
    use scriptorium_delivery::ManualClock;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "gateway-test-secret";

    struct TestApp {
        router: Router,
        jwt: JwtManager,
        clock: ManualClock,
    }

    fn test_app() -> TestApp {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = Some(SECRET.to_string());
        config.server.max_upload_bytes = 64 * 1024;

        let clock = ManualClock::default();
        let state = AppState::new(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryContentStore::new()),
            Arc::new(CryptoStore::new(&CryptoStore::generate_key_hex())),
            Arc::new(RecordingNotifier::new()),
            Arc::new(clock.clone()),
        );

        TestApp {
            router: create_router(state),
            jwt: JwtManager::new(SECRET, 3600),
            clock,
        }
    }

    impl TestApp {
        fn token(&self, principal: &Principal) -> String {
            format!("Bearer {}", self.jwt.generate_token(principal).unwrap())
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, headers, body.to_vec())
        }

        async fn json(
            &self,
            method: &str,
            uri: &str,
            principal: Option<&Principal>,
            body: Value,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(p) = principal {
                builder = builder.header(header::AUTHORIZATION, self.token(p));
            }
            let (status, _, bytes) = self
                .send(builder.body(Body::from(body.to_string())).unwrap())
                .await;
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    fn principal(role: Role, email: &str) -> Principal {
        Principal::new(Uuid::new_v4(), role, email, "Jane Doe")
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = app.json("GET", "/api/v1/health", None, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = app.json("GET", "/api/v1/ready", None, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["record_store"]["status"], "up");
    }

    #[tokio::test]
    async fn test_restricted_flow_over_http() {
        let app = test_app();
        let owner = principal(Role::Owner, "owner@example.edu");
        let reader = principal(Role::User, "jane@example.edu");
        let reviewer = principal(Role::Reviewer, "reviewer@example.edu");
        let id = Uuid::new_v4();
        let base = format!("/api/v1/manuscripts/{}", id);

        let (status, _) = app
            .json(
                "PUT",
                &base,
                Some(&owner),
                json!({
                    "title": "Codex Example",
                    "visibility": "restricted",
                    "status": "published",
                    "access_level": { "metadata": "public", "content": "approved", "download": "owner" }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let upload = Request::builder()
            .method("POST")
            .uri(format!("{}/files?name=notes.txt", base))
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::AUTHORIZATION, app.token(&owner))
            .body(Body::from("incipit"))
            .unwrap();
        let (status, _, body) = app.send(upload).await;
        assert_eq!(status, StatusCode::CREATED);
        let ingested: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(ingested["slot"], 0);

        let (status, body) = app
            .json("GET", &format!("{}/files/0", base), Some(&reader), Value::Null)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["kind"], "FORBIDDEN");

        let (status, request) = app
            .json(
                "POST",
                &format!("{}/access-requests", base),
                Some(&reader),
                json!({
                    "requested_level": "VIEW_CONTENT",
                    "justification": "Transcribing the colophon and comparing scribal hands across folios.",
                    "purpose": "palaeographic study",
                    "institution": "Inst",
                    "duration_days": 30
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(request["status"], "PENDING");

        let (status, _) = app
            .json(
                "POST",
                &format!("{}/access-requests", base),
                Some(&reader),
                json!({
                    "requested_level": "VIEW_CONTENT",
                    "justification": "Transcribing the colophon and comparing scribal hands across folios.",
                    "purpose": "palaeographic study",
                    "institution": "Inst"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let request_id = request["id"].as_str().unwrap();
        let (status, reviewed) = app
            .json(
                "POST",
                &format!("/api/v1/access-requests/{}/review", request_id),
                Some(&reviewer),
                json!({ "decision": "APPROVED", "approved_duration_days": 30 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reviewed["approved_level"], "VIEW_CONTENT");

        let view = Request::builder()
            .uri(format!("{}/files/0", base))
            .header(header::AUTHORIZATION, app.token(&reader))
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = app.send(view).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"incipit");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("inline"));

        let (status, level) = app
            .json("GET", &format!("{}/access", base), Some(&reader), Value::Null)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(level["level"], "CONTENT");

        app.clock.advance(chrono::Duration::days(31));
        let (status, _) = app
            .json("GET", &format!("{}/files/0", base), Some(&reader), Value::Null)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthorized() {
        let app = test_app();
        let request = Request::builder()
            .uri(format!("/api/v1/manuscripts/{}/access", Uuid::new_v4()))
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = app.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_manuscript_is_not_found() {
        let app = test_app();
        let (status, body) = app
            .json(
                "GET",
                &format!("/api/v1/manuscripts/{}/files/0", Uuid::new_v4()),
                None,
                Value::Null,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_settings_admin_only() {
        let app = test_app();
        let (status, body) = app.json("GET", "/api/v1/settings/watermark", None, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["opacity"], 0.15);
        assert_eq!(body["fontSize"], 14.0);

        let user = principal(Role::User, "jane@example.edu");
        let (status, _) = app
            .json("PUT", "/api/v1/settings/watermark", Some(&user), json!({ "opacity": 0.3 }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = principal(Role::Admin, "admin@example.edu");
        let (status, body) = app
            .json("PUT", "/api/v1/settings/watermark", Some(&admin), json!({ "opacity": 0.01 }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["opacity"], 0.05);
    }

    #[tokio::test]
    async fn test_extraction_reports_not_implemented() {
        let app = test_app();
        let admin = principal(Role::Admin, "admin@example.edu");
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/forensics/extract?mime_type=application/pdf")
            .header(header::AUTHORIZATION, app.token(&admin))
            .body(Body::from("%PDF-1.5"))
            .unwrap();
        let (status, _, body) = app.send(request).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"]["code"], "EXTRACTION_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let app = test_app();
        let owner = principal(Role::Owner, "owner@example.edu");
        let id = Uuid::new_v4();
        app.json(
            "PUT",
            &format!("/api/v1/manuscripts/{}", id),
            Some(&owner),
            json!({ "title": "Codex", "visibility": "public", "status": "published" }),
        )
        .await;

        let upload = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/manuscripts/{}/files", id))
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::AUTHORIZATION, app.token(&owner))
            .body(Body::from(vec![b'a'; 64 * 1024 + 1]))
            .unwrap();
        let (status, _, _) = app.send(upload).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
