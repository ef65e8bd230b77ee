use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// Origins of hosted MCP clients that call the server from the browser.
const CONNECTOR_ORIGINS: &[&str] = &[
    "https://chatgpt.com",
    "https://chat.openai.com",
    "https://claude.ai",
];

/// Build a CORS layer from the `SLACK_MCP_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated list (default: `http://localhost:3000`) plus connector origins
/// - Methods: GET, POST, OPTIONS
/// - Headers: Authorization, Content-Type, Mcp-Protocol-Version, Mcp-Session-Id
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    let configured = std::env::var("SLACK_MCP_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    cors_layer_for(&allowed_origins(&configured))
}

fn allowed_origins(configured: &str) -> Vec<String> {
    let mut origins: Vec<String> = configured
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    // Browsers send lowercase scheme and host; the layer matches exactly.
    for connector_origin in CONNECTOR_ORIGINS {
        if !origins.iter().any(|existing| existing == connector_origin) {
            origins.push((*connector_origin).to_string());
        }
    }
    origins
}

fn cors_layer_for(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static("mcp-session-id"),
        ])
        .expose_headers([HeaderName::from_static("www-authenticate")])
        .max_age(std::time::Duration::from_secs(3600))
}
