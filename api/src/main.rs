use std::net::SocketAddr;

use axum::Router;
use serde::Serialize;
use slack_mcp_core::config::AuthConfig;
use slack_mcp_core::credentials::CredentialStore;
use slack_mcp_core::session::SessionService;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;

use state::{AppState, CredentialBackend};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Slack MCP Server",
        version = "0.1.0",
        description = "Model Context Protocol bridge to Slack. Clients authorize once with a Slack token and then call Slack through short-lived session tokens."
    ),
    paths(
        routes::info::server_info,
        routes::health::health_check,
        routes::oauth::oauth_config,
        routes::oauth::authorize_form,
        routes::oauth::authorize_submit,
        routes::oauth::token,
        routes::oauth::revoke,
        routes::mcp_http::mcp_get,
        routes::mcp_http::mcp_post,
        routes::slack::list_channels,
        routes::slack::search_messages,
        routes::slack::list_users,
        routes::events::slack_events,
    ),
    components(schemas(
        HealthResponse,
        slack_mcp_core::error::ApiError,
        routes::oauth::AuthorizeSubmit,
        routes::oauth::TokenRequest,
        routes::oauth::TokenResponse,
        routes::slack::ChannelSummary,
        routes::slack::ChannelsResponse,
        routes::slack::SearchRequest,
        routes::slack::SearchMatch,
        routes::slack::SearchResponse,
        routes::slack::UserSummary,
        routes::slack::UsersResponse,
        routes::events::SlackEventEnvelope,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// `kv_rest` or `memory`
    pub credential_store: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slack_mcp_api=debug,slack_mcp_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let auth_config = match AuthConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Invalid auth configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        event = "auth_config_loaded",
        default_signing_secret = auth_config.using_default_secret,
        token_max_age_ms = auth_config.token_max_age_ms,
        authorization_code_max_age_ms = auth_config.authorization_code_max_age_ms,
        "Session signing configured"
    );

    let backend = match CredentialBackend::from_env() {
        Ok(backend) => backend,
        Err(err) => {
            tracing::error!(error = %err, "Invalid credential store configuration");
            std::process::exit(1);
        }
    };
    if backend == CredentialBackend::Memory {
        tracing::warn!(
            event = "memory_credential_store",
            "Using the in-memory credential store; linked Slack tokens are lost on restart"
        );
    }
    let kv = match backend.build() {
        Ok(kv) => kv,
        Err(err) => {
            tracing::error!(error = %err, "Failed to initialise credential store");
            std::process::exit(1);
        }
    };

    let credentials = CredentialStore::with_ttl(kv, auth_config.credential_ttl_secs);
    let sessions = SessionService::new(&auth_config, credentials);
    let app_state = AppState::new(sessions, AppState::slack_api_url_from_env());

    // HTTPS enforcement (only when SLACK_MCP_REQUIRE_HTTPS=true)
    let require_https = std::env::var("SLACK_MCP_REQUIRE_HTTPS")
        .map(|v| v == "true")
        .unwrap_or(false);

    // CORS
    let cors_layer = middleware::cors::build_cors_layer();

    // Router with per-endpoint rate limiting on OAuth and Slack-facing routes
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::info::router())
        .merge(routes::health::router())
        .merge(routes::oauth::metadata_router())
        .merge(routes::mcp_http::metadata_router())
        .merge(routes::oauth::authorize_router().layer(middleware::rate_limit::authorize_layer()))
        .merge(routes::oauth::token_router().layer(middleware::rate_limit::token_layer()))
        .merge(routes::mcp_http::router().layer(middleware::rate_limit::slack_proxy_layer()))
        .merge(routes::slack::router().layer(middleware::rate_limit::slack_proxy_layer()))
        .merge(routes::events::router())
        .layer(axum::middleware::from_fn(middleware::security_headers::apply))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .option_layer(require_https.then(|| {
                    axum::middleware::from_fn(middleware::https::require_https)
                }))
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Slack MCP server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "Failed to bind listener");
            std::process::exit(1);
        }
    };
    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!(error = %err, "Server exited with error");
        std::process::exit(1);
    }
}
