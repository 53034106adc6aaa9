use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use clientdesk_core::registry::ModuleRegistry;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    registry: Arc<ModuleRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub registry: HealthCheck,
    pub checked_at: String,
}

pub fn router(registry: Arc<ModuleRegistry>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { registry })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let registry = registry_check(&state.registry);
    let ready = registry.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "clientdesk-server runtime initialized".to_string(),
        },
        registry,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn registry_check(registry: &ModuleRegistry) -> HealthCheck {
    if registry.is_empty() {
        HealthCheck { status: "degraded", detail: "no modules registered".to_string() }
    } else {
        HealthCheck { status: "ready", detail: format!("{} modules registered", registry.len()) }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use clientdesk_core::registry::ModuleRegistry;

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_with_builtin_registry() {
        let registry = Arc::new(ModuleRegistry::builtin().expect("builtin registry"));

        let (status, Json(payload)) = health(State(HealthState { registry })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.registry.status, "ready");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_registry_is_empty() {
        let registry = Arc::new(ModuleRegistry::default());

        let (status, Json(payload)) = health(State(HealthState { registry })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.registry.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
