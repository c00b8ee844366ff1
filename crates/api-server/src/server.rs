//! API server: HTTP routes plus the optional Prometheus exporter.

use crate::rest::{self, AppState, Engine};
use axum::routing::get;
use axum::Router;
use spotline_core::config::AppConfig;
use spotline_store::AnyStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, store: Arc<AnyStore>, engine: Arc<Engine>) -> Self {
        let state = AppState::new(store, engine, config.node_id.clone());
        Self { config, state }
    }

    /// Full route table with middleware, ready to serve or to drive in tests.
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve HTTP until `shutdown` resolves, then drain in-flight requests.
    pub async fn start_http<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Install the Prometheus recorder and its scrape listener on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Ad delivery
        .route("/vast", get(rest::get_vast))
        // Campaign authoring
        .route(
            "/api/campaigns",
            get(rest::list_campaigns).post(rest::create_campaign),
        )
        .route(
            "/api/campaigns/:id",
            get(rest::get_campaign)
                .put(rest::update_campaign)
                .delete(rest::delete_campaign),
        )
        // Creative pool
        .route(
            "/api/ads/available",
            get(rest::list_available_ads).post(rest::seed_available_ads),
        )
        .route("/api/ads/available/lookup", get(rest::lookup_available_ad))
        .route("/api/clients/:client_id/budget", get(rest::client_budget))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
