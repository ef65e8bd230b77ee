use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(server_info))
}

/// Server description and endpoint map
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Server info")),
    tag = "system"
)]
pub async fn server_info() -> Json<Value> {
    Json(json!({
        "name": "Slack MCP Server",
        "description": "Model Context Protocol server for Slack integration",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "mcp": "/mcp",
            "health": "/health",
            "oauth_config": "/oauth/config",
            "oauth_authorize": "/oauth/authorize",
            "oauth_token": "/oauth/token",
            "oauth_revoke": "/oauth/revoke",
            "slack_channels": "/api/slack/channels",
            "slack_search": "/api/slack/search",
            "slack_users": "/api/slack/users",
            "slack_events": "/api/slack/events",
            "openapi": "/api-doc/openapi.json"
        },
        "documentation": "GET /mcp lists the MCP tools; POST /mcp speaks JSON-RPC with a session bearer token."
    }))
}
