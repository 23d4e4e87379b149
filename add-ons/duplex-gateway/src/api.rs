//! HTTP endpoints for health, status, and provider management.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use duplex_voice::Capability;

use crate::AppState;

pub async fn health() -> &'static str {
    "OK"
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let (recognition, synthesis, generation) = state.providers.active_names();
    Json(json!({
        "app": state.config.app_name,
        "activeConnections": state.connections.count(),
        "providers": {
            "recognition": recognition,
            "synthesis": synthesis,
            "generation": generation,
        },
    }))
}

#[derive(Deserialize)]
pub struct ChangeProviderRequest {
    pub capability: String,
    pub name: String,
}

pub async fn change_provider(
    State(state): State<AppState>,
    Json(request): Json<ChangeProviderRequest>,
) -> impl IntoResponse {
    let capability: Capability = match request.capability.parse() {
        Ok(c) => c,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    match state.providers.change_provider(capability, &request.name).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "capability": request.capability,
                "provider": request.name,
            })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, post};
    use axum::Router;
    use duplex_voice::{ConnectionRegistry, GatewayConfig, ProviderRegistry};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let config = Arc::new(GatewayConfig::default());
        let providers = Arc::new(ProviderRegistry::with_mocks(Arc::clone(&config)).unwrap());
        let state = AppState {
            config,
            providers,
            connections: Arc::new(ConnectionRegistry::new()),
        };
        Router::new()
            .route("/health", get(health))
            .route("/api/status", get(status))
            .route("/api/providers", post(change_provider))
            .with_state(state)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let response = test_app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_active_providers() {
        let response = test_app()
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["activeConnections"], 0);
        assert_eq!(body["providers"]["generation"], "mock");
    }

    #[tokio::test]
    async fn change_provider_rejects_unknown_capability() {
        let request = Request::post("/api/providers")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"capability":"telepathy","name":"mock"}"#,
            ))
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn change_provider_rejects_unknown_name() {
        let request = Request::post("/api/providers")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"capability":"synthesis","name":"no-such"}"#,
            ))
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
