use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, body::Body, http::Request};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use super::api::{self, AppState, SharedState};
use super::selection::ThreadRandom;
use super::sqlite::SqliteStore;
use crate::config::ServiceConfig;

/// Configuration for the HTTP server.
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub dev_mode: bool,
}

impl From<&ServiceConfig> for ServerConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            bind_addr: config.bind_addr(),
            db_path: config.db_path.clone(),
            request_timeout: config.request_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            dev_mode: config.dev_mode,
        }
    }
}

/// Create the database directory if needed, open the database and migrate it.
pub fn open_database(db_path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    SqliteStore::open(db_path)
        .with_context(|| format!("Failed to initialize database at {}", db_path.display()))
}

/// Build the application router with request tracing and, in dev mode,
/// permissive CORS.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    let mut app = api::api_router().layer(trace).with_state(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve until Ctrl+C or SIGTERM, then give in-flight requests
/// `shutdown_timeout` to finish.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let store = open_database(&config.db_path)?;
    let state = Arc::new(AppState::new(
        store,
        Arc::new(ThreadRandom),
        config.request_timeout,
    ));
    let app = build_router(state, config.dev_mode);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, db = %config.db_path.display(), "reviewer-assign listening");

    let shutdown = CancellationToken::new();
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        res = &mut server => {
            res.context("Server task panicked")?.context("Server error")?;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    info!(
        timeout_secs = config.shutdown_timeout.as_secs(),
        "Shutting down, draining in-flight requests"
    );
    shutdown.cancel();
    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(res) => res.context("Server task panicked")?.context("Server error")?,
        Err(_) => warn!("In-flight requests did not finish before the shutdown timeout"),
    }

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::selection::SeededRandom;
    use axum::http::{StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(dev_mode: bool) -> Router {
        let store = SqliteStore::open_in_memory().unwrap();
        let state = Arc::new(AppState::new(
            store,
            Arc::new(SeededRandom::new(1)),
            Duration::from_secs(5),
        ));
        build_router(state, dev_mode)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_team_via_full_router() {
        let app = test_router(false);
        let req = Request::builder()
            .method("POST")
            .uri("/team/add")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"team_name": "infra", "members": []}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["team"]["team_name"], "infra");
    }

    #[tokio::test]
    async fn test_dev_mode_adds_cors_headers() {
        let app = test_router(true);
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(
            resp.headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_server_config_from_service_config() {
        let config = ServerConfig::from(&ServiceConfig::default());
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_server_config_uses_overridden_host_and_port() {
        let service = ServiceConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            ..ServiceConfig::default()
        };
        assert_eq!(ServerConfig::from(&service).bind_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_open_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/reviewers.db");
        open_database(&path).unwrap();
        assert!(path.exists());
    }
}
