//! Duplex voice gateway: WebSocket front door for the orchestration core.

mod api;
mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use duplex_voice::{ConnectionRegistry, GatewayConfig, ProviderRegistry};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub providers: Arc<ProviderRegistry>,
    pub connections: Arc<ConnectionRegistry>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duplex_gateway=info,duplex_voice=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            tracing::error!(%e, "configuration error");
            std::process::exit(1);
        }
    };

    let providers = Arc::new(ProviderRegistry::new(Arc::clone(&config)));
    if let Err(e) = providers.initialize().await {
        tracing::error!(%e, "provider initialization failed");
        std::process::exit(1);
    }

    let state = AppState {
        config: Arc::clone(&config),
        providers,
        connections: Arc::new(ConnectionRegistry::new()),
    };

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/api/status", get(api::status))
        .route("/api/providers", post(api::change_provider))
        .route("/ws", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, app = %config.app_name, "gateway listening");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
