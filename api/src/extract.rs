//! JSON extractor that reports deserialization failures as `AppError`.
//!
//! `AppJson<T>` replaces `axum::Json<T>` in handler signatures so a bad body
//! produces the structured validation error instead of axum's plain-text 422.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let field = field_from_serde_message(&body_text).unwrap_or_else(|| "body".to_string());

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field),
        docs_hint: Some(
            "Send a JSON body with Content-Type: application/json (see /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

/// Pull the field name out of serde's "missing field `x`" / "unknown field `x`".
fn field_from_serde_message(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"]
        .iter()
        .find_map(|pattern| {
            let start = msg.find(pattern)? + pattern.len();
            let rest = &msg[start..];
            rest.find('`').map(|end| rest[..end].to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Deserialize)]
    struct Probe {
        #[allow(dead_code)]
        query: String,
    }

    async fn probe(AppJson(_): AppJson<Probe>) -> StatusCode {
        StatusCode::OK
    }

    #[test]
    fn extracts_missing_field_name() {
        let msg = "Failed to deserialize the JSON body: missing field `query` at line 1 column 2";
        assert_eq!(field_from_serde_message(msg), Some("query".to_string()));
    }

    #[test]
    fn extracts_unknown_field_name() {
        let msg = "unknown field `foo`, expected `query`";
        assert_eq!(field_from_serde_message(msg), Some("foo".to_string()));
    }

    #[test]
    fn returns_none_for_generic_error() {
        assert_eq!(field_from_serde_message("invalid type: string, expected u64"), None);
    }

    #[tokio::test]
    async fn rejection_becomes_validation_error() {
        let app = Router::new().route("/probe", post(probe));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/probe")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed")
            .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("JSON body");
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "query");
    }
}
