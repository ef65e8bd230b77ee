use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/slack/events", post(slack_events))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SlackEventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub event: Option<serde_json::Value>,
}

/// Slack Events API receiver
///
/// Answers the `url_verification` handshake and acknowledges everything else.
#[utoipa::path(
    post,
    path = "/api/slack/events",
    request_body = SlackEventEnvelope,
    responses(
        (status = 200, description = "Challenge echo or empty acknowledgement"),
        (status = 400, description = "Malformed envelope", body = slack_mcp_core::error::ApiError)
    ),
    tag = "slack"
)]
pub async fn slack_events(AppJson(envelope): AppJson<SlackEventEnvelope>) -> Response {
    if envelope.kind == "url_verification" {
        tracing::info!(event = "slack_url_verification");
        return Json(json!({ "challenge": envelope.challenge })).into_response();
    }

    let inner_type = envelope
        .event
        .as_ref()
        .and_then(|event| event.get("type"))
        .and_then(|kind| kind.as_str());
    tracing::info!(
        event = "slack_event_received",
        envelope_type = %envelope.kind,
        event_type = ?inner_type,
        team_id = ?envelope.team_id
    );
    axum::http::StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::state::test_support::memory_state;

    fn post_event(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/slack/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let app = router().with_state(memory_state("http://127.0.0.1:9"));
        let response = app
            .oneshot(post_event(
                r#"{"type":"url_verification","challenge":"3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P","token":"x"}"#,
            ))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("JSON body");
        assert_eq!(
            body["challenge"],
            "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"
        );
    }

    #[tokio::test]
    async fn other_events_are_acknowledged_empty() {
        let app = router().with_state(memory_state("http://127.0.0.1:9"));
        let response = app
            .oneshot(post_event(
                r#"{"type":"event_callback","team_id":"T1","event":{"type":"app_mention","text":"hi"}}"#,
            ))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        assert!(bytes.is_empty());
    }
}
