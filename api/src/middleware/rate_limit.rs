use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode};
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer = GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, Body>;

/// Rate limit for /oauth/authorize: 10 requests per minute per IP.
pub fn authorize_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_second(6)
            .burst_size(10)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for authorize"),
    )
    .error_handler(json_error_handler)
}

/// Rate limit for /oauth/token and /oauth/revoke: 30 requests per minute per IP.
pub fn token_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(30)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for token"),
    )
    .error_handler(json_error_handler)
}

/// Rate limit for POST /mcp and /api/slack/*: 120 requests per minute per IP.
pub fn slack_proxy_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(500)
            .burst_size(30)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for slack proxy"),
    )
    .error_handler(json_error_handler)
}

/// Answer rejected requests in the `ApiError` shape with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response<Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default()),
    };

    tracing::warn!(
        event = "rate_limited",
        status = status.as_u16(),
        retry_after_secs = ?retry_after,
        "Request rejected by rate limiter"
    );

    let body = serde_json::json!({
        "error": slack_mcp_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("application/json"),
    );
    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from(seconds));
    }
    response
}
