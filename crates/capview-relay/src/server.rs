use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::RelayConfig,
    error::RelayError,
    handlers::{self, RelayState},
};

pub fn build_app(cfg: &RelayConfig) -> Result<Router, RelayError> {
    let client = reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()?;
    let state = Arc::new(RelayState {
        client,
        allow_http: cfg.allow_http,
    });

    Ok(Router::new()
        .route("/health", get(handlers::health))
        .route("/proxy", get(handlers::proxy))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        ))
}

pub struct RelayServer {
    addr: SocketAddr,
    app: Router,
}

impl RelayServer {
    pub fn new(cfg: &RelayConfig) -> Result<Self, RelayError> {
        Ok(Self {
            addr: cfg.addr()?,
            app: build_app(cfg)?,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
