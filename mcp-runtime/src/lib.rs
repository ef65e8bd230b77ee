use clap::{Args, Subcommand};
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

mod slack;
mod tools;
mod util;

pub use slack::{AuthIdentity, SLACK_API_BASE, SlackClient, SlackError, TokenKind};
pub use tools::active_members;

use tools::{ToolFailure, call_tool, tool_definitions};
use util::to_pretty_json;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const MCP_SERVER_NAME: &str = "slack-mcp-server";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Slack MCP server over stdio
    Serve(McpServeArgs),
    /// Check the Slack token with auth.test and print the identity
    Check(McpServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct McpServeArgs {
    /// Slack token (bot `xoxb-` or user `xoxp-`)
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub token: String,
    /// Slack Web API base URL
    #[arg(long, env = "SLACK_API_URL", default_value = SLACK_API_BASE)]
    pub api_url: String,
}

pub async fn run(command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => {
            let slack = SlackClient::with_base_url(args.token, args.api_url);
            if let Err(code) = verify_token(&slack).await {
                return code;
            }
            let server = McpServer::new(slack);
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Check(args) => {
            let slack = SlackClient::with_base_url(args.token, args.api_url);
            match slack.auth_test().await {
                Ok(identity) => {
                    let payload = json!({
                        "status": "ok",
                        "token_type": slack.token_kind().as_str(),
                        "identity": identity,
                    });
                    println!("{}", to_pretty_json(&payload));
                    0
                }
                Err(err) => {
                    let payload = json!({
                        "error": "slack_auth_failed",
                        "message": err.to_string(),
                        "slack_error": err.api_code(),
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
    }
}

async fn verify_token(slack: &SlackClient) -> Result<(), i32> {
    match slack.auth_test().await {
        Ok(identity) => {
            tracing::info!(
                event = "slack_token_verified",
                team_id = %identity.team_id,
                user_id = %identity.user_id,
                token_type = slack.token_kind().as_str(),
                "Slack token verified"
            );
            Ok(())
        }
        Err(err) => {
            let payload = json!({
                "error": "slack_auth_failed",
                "message": err.to_string(),
                "slack_error": err.api_code(),
            });
            eprintln!("{}", to_pretty_json(&payload));
            Err(1)
        }
    }
}

/// Names of every tool the server exposes, in listing order.
pub fn tool_names() -> Vec<&'static str> {
    tools::tool_names()
}

/// Answer one decoded HTTP body (object or batch) on behalf of a Slack token.
pub async fn handle_http_jsonrpc(slack: SlackClient, incoming: Value) -> Vec<Value> {
    McpServer::new(slack).handle_incoming_message(incoming).await
}

/// JSON-RPC 2.0 MCP server bound to one Slack token.
pub struct McpServer {
    slack: SlackClient,
}

impl McpServer {
    pub fn new(slack: SlackClient) -> Self {
        Self { slack }
    }

    async fn serve_stdio(&self) -> Result<(), String> {
        let mut reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(&mut reader, &mut stdout).await
    }

    async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let incoming = match read_framed_json(reader).await {
                Ok(Some(incoming)) => incoming,
                Ok(None) => break,
                Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::warn!(error = %err, "discarding unreadable MCP message");
                    let response = error_response(Value::Null, RpcError::parse_error(err.to_string()));
                    write_framed_json(writer, &response)
                        .await
                        .map_err(|e| format!("Failed to write MCP response: {e}"))?;
                    continue;
                }
                Err(err) => return Err(format!("Failed to read MCP message: {err}")),
            };

            let responses = self.handle_incoming_message(incoming).await;
            for response in responses {
                write_framed_json(writer, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        Ok(())
    }

    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A client response; this server never issues requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(method, params).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            self.handle_notification(method);
            None
        }
    }

    fn handle_notification(&self, method: &str) {
        tracing::debug!(mcp_method = %method, "MCP notification received");
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Slack workspace access. Channel arguments accept an id or a #name. Use search to find messages and fetch to read one by id."
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        match call_tool(&self.slack, name, &args).await {
            Ok(text) => {
                tracing::info!(event = "mcp_tool_call", tool = %name, outcome = "ok");
                Ok(json!({
                    "content": [{ "type": "text", "text": text }]
                }))
            }
            Err(err) => {
                let slack_error = match &err {
                    ToolFailure::Slack(slack) => slack.api_code().map(str::to_string),
                    _ => None,
                };
                tracing::warn!(
                    event = "mcp_tool_call",
                    tool = %name,
                    outcome = "error",
                    slack_error = ?slack_error,
                    error = %err
                );
                Ok(json!({
                    "content": [{ "type": "text", "text": format!("Error: {err}") }],
                    "isError": true
                }))
            }
        }
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: Some(json!({ "method": method })),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

async fn read_framed_json<R>(reader: &mut R) -> Result<Option<Value>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        if line == "\r\n" || line == "\n" {
            break;
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = line
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let json: Value = serde_json::from_slice(&payload).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid JSON payload: {e}"),
        )
    })?;
    Ok(Some(json))
}

async fn write_framed_json<W>(writer: &mut W, value: &Value) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
