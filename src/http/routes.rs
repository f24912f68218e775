use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::config::RenderConfig;
use crate::render::{RenderManager, RenderOptions};

use super::dto::{ErrorResponseDto, HealthzResponseDto, RenderRequestDto, RenderResponseDto};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RenderManager>,
    pub defaults: Arc<RenderConfig>,
    pub browser_width: u32,
    pub browser_height: u32,
    pub user_agent: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/render", post(render))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> impl IntoResponse {
    Json(HealthzResponseDto { status: "ok" })
}

fn validate_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid url: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported url scheme: {other}")),
    }
}

async fn render(
    State(state): State<AppState>,
    Json(request): Json<RenderRequestDto>,
) -> Response {
    if let Err(message) = validate_url(&request.url) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponseDto { code: "invalid_url".to_string(), message }),
        )
            .into_response();
    }

    let completion_trigger = request
        .completion_trigger
        .map(|dto| {
            dto.into_config(match &state.defaults.completion_trigger {
                crate::config::CompletionTriggerFileConfig::Requests { wait_after_last_request_millis } => {
                    *wait_after_last_request_millis
                }
                _ => 500,
            })
        })
        .unwrap_or_else(|| state.defaults.completion_trigger.clone().into());

    let options = RenderOptions {
        url: request.url,
        page_load_timeout_millis: request
            .page_load_timeout_millis
            .unwrap_or(state.defaults.page_load_timeout_millis),
        browser_width: request.browser_width.unwrap_or(state.browser_width),
        browser_height: request.browser_height.unwrap_or(state.browser_height),
        allow_partial_load: request.allow_partial_load.unwrap_or(state.defaults.allow_partial_load),
        fresh_browser_context: request
            .fresh_browser_context
            .unwrap_or(state.defaults.fresh_browser_context),
        script_to_evaluate_on_new_document: request.script_to_evaluate_on_new_document,
        expected_status_codes: request
            .expected_status_codes
            .or_else(|| state.defaults.expected_status_codes.clone()),
        completion_trigger,
        user_agent: state.user_agent.clone(),
    };

    match state.manager.render(options).await {
        Ok(outcome) => (StatusCode::OK, Json(RenderResponseDto::from(outcome))).into_response(),
        Err(err) => {
            tracing::warn!(kind = err.kind.code(), message = %err.message, "render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponseDto::from(&err))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::CompletionTriggerFileConfig;
    use crate::provider::Provider;

    struct UnavailableProvider;

    #[async_trait::async_trait]
    impl Provider for UnavailableProvider {
        async fn start(self: &Arc<Self>) -> Result<(), crate::error::LogicError> {
            Ok(())
        }
        async fn close(&self) {}
        async fn create_handle(&self) -> Option<crate::handle::Handle> {
            None
        }
    }

    fn test_state() -> AppState {
        AppState {
            manager: Arc::new(RenderManager::new(Arc::new(UnavailableProvider))),
            defaults: Arc::new(RenderConfig {
                page_load_timeout_millis: 30_000,
                allow_partial_load: false,
                fresh_browser_context: false,
                expected_status_codes: None,
                completion_trigger: CompletionTriggerFileConfig::Requests {
                    wait_after_last_request_millis: 500,
                },
            }),
            browser_width: 1280,
            browser_height: 800,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn render_rejects_non_http_scheme() {
        let app = build_router(test_state());
        let body = Body::from(r#"{"url":"file:///etc/passwd"}"#);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/render")
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn render_reports_browser_unavailable() {
        let app = build_router(test_state());
        let body = Body::from(r#"{"url":"https://example.com"}"#);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/render")
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
