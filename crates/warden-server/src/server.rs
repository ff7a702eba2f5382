use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use warden_auth::storage::{InMemoryAuthStorage, Stores};
use warden_auth::{OAuthState, router};
use warden_auth_postgres::PostgresAuthStorage;

use crate::cleanup::spawn_token_cleanup;
use crate::config::{AppConfig, StorageBackend, StorageConfig};
use crate::middleware as app_middleware;

pub struct WardenServer {
    addr: SocketAddr,
    app: Router,
    stores: Stores,
    config: AppConfig,
}

/// Opens the configured storage backend.
pub async fn build_stores(cfg: &StorageConfig) -> anyhow::Result<Stores> {
    match cfg.backend {
        StorageBackend::Memory => {
            let backend = InMemoryAuthStorage::new();
            for tenant in &cfg.memory.tenants {
                backend.insert_tenant(*tenant).await;
            }
            tracing::warn!(
                tenants = cfg.memory.tenants.len(),
                "Using in-memory storage; all data is lost on restart"
            );
            Ok(Stores::from_backend(Arc::new(backend)))
        }
        StorageBackend::Postgres => {
            let pg = &cfg.postgres;
            let backend = PostgresAuthStorage::connect(
                &pg.connection_url(),
                pg.pool_size,
                pg.connect_timeout(),
            )
            .await?;
            if pg.run_migrations {
                backend.migrate().await?;
            }
            Ok(Stores::from_backend(Arc::new(backend)))
        }
    }
}

pub fn build_app(cfg: &AppConfig, stores: Stores) -> anyhow::Result<Router> {
    let state = OAuthState::new(stores, cfg.auth.clone())?;
    let body_limit = cfg.server.body_limit_bytes;

    let app = router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    // Query strings carry codes and state; log the path only
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit));
    Ok(app)
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<WardenServer> {
        let stores = build_stores(&self.config.storage).await?;
        let app = build_app(&self.config, stores.clone())?;

        Ok(WardenServer {
            addr: self.config.addr(),
            app,
            stores,
            config: self.config,
        })
    }
}

impl WardenServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let (stop_tx, stop_rx) = watch::channel(false);
        let cleanup = spawn_token_cleanup(
            self.stores.tokens.clone(),
            self.config.auth.retry.clone(),
            self.config.auth.oauth.cleanup_interval,
            stop_rx,
        );

        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        let _ = stop_tx.send(true);
        if let Err(e) = cleanup.await {
            tracing::warn!(error = %e, "Token cleanup task ended abnormally");
        }
        served?;
        Ok(())
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
