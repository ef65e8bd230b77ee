pub mod events;
pub mod health;
pub mod info;
pub mod mcp_http;
pub mod oauth;
pub mod slack;
