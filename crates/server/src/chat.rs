//! HTTP surface for chat turns (`/chat`, `/chat/stream`), record review
//! (`/scan`) and the module list.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clientdesk_agent::conversation::{ChatRequest, ChatResponse};
use clientdesk_agent::runtime::AgentRuntime;
use clientdesk_agent::scan::{ScanRequest, ScanResponse};
use clientdesk_core::errors::{ApplicationError, InterfaceError};
use futures::TryStreamExt;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    correlation_id: String,
}

#[derive(Debug, Serialize)]
struct ModuleSummary {
    slug: String,
    remote_module: String,
}

#[derive(Debug, Serialize)]
struct ModuleList {
    modules: Vec<ModuleSummary>,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::Unprocessable { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable"),
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = ErrorBody {
            error: code,
            message: self.0.message().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/scan", post(scan))
        .route("/modules", get(modules))
        .with_state(ChatState { runtime })
}

async fn chat(
    State(state): State<ChatState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let Json(request) = payload.map_err(|rejection| bad_request(rejection, &correlation_id))?;
    let span = info_span!("chat_turn", correlation_id = %correlation_id, module = %request.slug);

    let result = state.runtime.handle(&request).instrument(span).await;
    match result {
        Ok(response) => {
            info!(
                event_name = "server.chat.completed",
                correlation_id = %correlation_id,
                requires_confirmation = response.requires_confirmation,
                "chat request completed"
            );
            Ok(Json(response))
        }
        Err(failure) => Err(log_failure(failure, &correlation_id)),
    }
}

async fn chat_stream(
    State(state): State<ChatState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let Json(request) = payload.map_err(|rejection| bad_request(rejection, &correlation_id))?;
    let span = info_span!("chat_stream", correlation_id = %correlation_id, module = %request.slug);

    let stream = match state.runtime.answer_stream(&request).instrument(span).await {
        Ok(stream) => stream,
        Err(failure) => return Err(log_failure(failure, &correlation_id)),
    };

    let stream_correlation = correlation_id.clone();
    let body = Body::from_stream(stream.inspect_err(move |failure| {
        warn!(
            event_name = "server.chat.stream_interrupted",
            correlation_id = %stream_correlation,
            error = %failure,
            "answer stream ended early"
        );
    }));

    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    Ok(response)
}

async fn scan(
    State(state): State<ChatState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let Json(request) = payload.map_err(|rejection| bad_request(rejection, &correlation_id))?;
    let span = info_span!("record_scan", correlation_id = %correlation_id, module = %request.slug);

    match state.runtime.scan(&request).instrument(span).await {
        Ok(response) => {
            info!(
                event_name = "server.scan.completed",
                correlation_id = %correlation_id,
                recommendations = response.recommendations.len(),
                "scan request completed"
            );
            Ok(Json(response))
        }
        Err(failure) => Err(log_failure(failure, &correlation_id)),
    }
}

async fn modules(State(state): State<ChatState>) -> Json<ModuleList> {
    let registry = state.runtime.registry();
    let modules = registry
        .slugs()
        .into_iter()
        .filter_map(|slug| registry.resolve(slug))
        .map(|descriptor| ModuleSummary {
            slug: descriptor.slug.clone(),
            remote_module: descriptor.remote_module.clone(),
        })
        .collect();
    Json(ModuleList { modules })
}

fn bad_request(rejection: JsonRejection, correlation_id: &str) -> ApiError {
    warn!(
        event_name = "server.chat.bad_request",
        correlation_id,
        error = %rejection,
        "chat request body rejected"
    );
    ApiError(InterfaceError::BadRequest {
        message: rejection.body_text(),
        correlation_id: correlation_id.to_string(),
    })
}

fn log_failure(failure: ApplicationError, correlation_id: &str) -> ApiError {
    if matches!(failure, ApplicationError::Upstream { .. } | ApplicationError::Configuration(_)) {
        error!(
            event_name = "server.chat.failed",
            correlation_id,
            retryable = failure.is_retryable(),
            error = %failure,
            "chat request failed"
        );
    } else {
        info!(
            event_name = "server.chat.rejected",
            correlation_id,
            error = %failure,
            "chat request rejected"
        );
    }
    ApiError::from_application(failure, correlation_id)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use clientdesk_agent::llm::ScriptedLlm;
    use clientdesk_agent::runtime::{AgentRuntime, RuntimeSettings};
    use clientdesk_core::registry::ModuleRegistry;
    use clientdesk_core::store::memory::InMemoryStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, CORRELATION_HEADER};

    const DEAL_ID: &str = "4000000000100";

    fn app(llm: ScriptedLlm) -> Router {
        let store = InMemoryStore::new()
            .with_record("Deals", json!({"id": DEAL_ID, "Deal_Name": "Renewal", "Stage": "Qualification"}))
            .with_record("Accounts", json!({"id": "4000000000001", "Account_Name": "Acme"}));
        let registry = Arc::new(ModuleRegistry::builtin().expect("builtin registry"));
        let runtime = AgentRuntime::new(Arc::new(store), registry, Arc::new(llm), RuntimeSettings::default());
        router(Arc::new(runtime))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn chat_answers_about_the_active_record() {
        let llm = ScriptedLlm::new([
            r#"{"plan": [{"step": 1, "agent": "deals", "action": "query", "query": "brief"}]}"#,
            "The renewal is in Qualification.",
        ]);
        let response = app(llm)
            .oneshot(post("/chat", json!({"id": DEAL_ID, "module": "Deals", "query": "Give me a brief"})))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = json_body(response).await;
        assert_eq!(payload["answer"], "The renewal is in Qualification.");
        assert_eq!(payload["requires_confirmation"], false);
    }

    #[tokio::test]
    async fn unknown_module_is_bad_request_with_correlation_id() {
        let response = app(ScriptedLlm::default())
            .oneshot(post("/chat", json!({"id": DEAL_ID, "module": "widgets", "query": "hi"})))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = json_body(response).await;
        assert_eq!(payload["error"], "bad_request");
        assert!(payload["message"].as_str().unwrap_or_default().contains("widgets"));
        assert!(!payload["correlation_id"].as_str().unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn unresolved_reference_is_unprocessable() {
        let llm = ScriptedLlm::new([
            r#"{"plan": [{"step": 1, "agent": "deals", "action": "create", "query": "new deal"}]}"#,
            r#"<<<ACTION>>>{"action": "create", "module": "Deals", "data": {"Deal_Name": "Expansion", "Account_Name": "Acme Holdings"}}<<<END_ACTION>>>"#,
        ]);
        let request = json!({"module": "deals", "query": "Create a deal for Acme Holdings", "confirmed": true});
        let response = app(llm).oneshot(post("/chat", request)).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let payload = json_body(response).await;
        assert!(payload["message"].as_str().unwrap_or_default().contains("Acme Holdings"));
    }

    #[tokio::test]
    async fn text_generation_failure_is_bad_gateway() {
        let response = app(ScriptedLlm::default())
            .oneshot(post("/chat", json!({"id": DEAL_ID, "module": "deals", "query": "brief"})))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(response).await["error"], "upstream_unavailable");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let response = app(ScriptedLlm::default()).oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "bad_request");
    }

    #[tokio::test]
    async fn stream_returns_plain_text() {
        let llm = ScriptedLlm::new(["Renewal is on track."]);
        let response = app(llm)
            .oneshot(post("/chat/stream", json!({"id": DEAL_ID, "module": "deals", "query": "status?"})))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CORRELATION_HEADER));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(String::from_utf8_lossy(&bytes), "Renewal is on track.");
    }

    #[tokio::test]
    async fn stream_for_missing_record_is_not_found() {
        let response = app(ScriptedLlm::default())
            .oneshot(post("/chat/stream", json!({"id": "4000000000999", "module": "deals", "query": "status?"})))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn scan_returns_schema_checked_recommendations() {
        let llm = ScriptedLlm::new([r#"{"recommendations": [
            {"type": "alert", "message": "Website is missing", "priority": "high",
             "actions": [{"label": "Add website", "field": "Website", "value": "https://acme.example"}]}
        ]}"#]);
        let response = app(llm)
            .oneshot(post("/scan", json!({"entity_type": "Accounts", "entity_id": "4000000000001"})))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = json_body(response).await;
        assert_eq!(payload["recommendations"][0]["type"], "alert");
        assert_eq!(payload["recommendations"][0]["actions"][0]["field"], "Website");
    }

    #[tokio::test]
    async fn scan_of_missing_record_is_not_found() {
        let response = app(ScriptedLlm::default())
            .oneshot(post("/scan", json!({"module": "accounts", "id": "4000000000999"})))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn modules_lists_registered_slugs() {
        let request = Request::builder().uri("/modules").body(Body::empty()).expect("request");
        let response = app(ScriptedLlm::default()).oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = json_body(response).await;
        let slugs = payload["modules"]
            .as_array()
            .map(|modules| modules.iter().filter_map(|m| m["slug"].as_str()).collect::<Vec<_>>())
            .unwrap_or_default();
        assert!(slugs.contains(&"deals"));
        assert!(slugs.contains(&"contacts"));
    }
}
