//! Slack tool surface: definitions, argument handling, response shaping.

use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::slack::{SlackClient, SlackError};
use crate::util::{iso_from_slack_ts, iso_from_unix_secs, to_pretty_json};

const DEFAULT_CHANNEL_TYPES: &str = "public_channel,private_channel";
const SEARCH_RESULT_TEXT_MAX_CHARS: usize = 500;

#[derive(Debug)]
pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: Value,
}

#[derive(Debug, Error)]
pub(crate) enum ToolFailure {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Missing required argument '{0}'")]
    MissingArgument(&'static str),
    #[error("Invalid argument '{field}': {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Slack(#[from] SlackError),
}

pub(crate) fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "slack_list_channels",
            description: "List all channels in the Slack workspace with their details",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "types": {
                        "type": "string",
                        "description": "Channel types to include (public_channel, private_channel, mpim, im)",
                        "default": DEFAULT_CHANNEL_TYPES
                    },
                    "limit": { "type": "number", "default": 100, "minimum": 1, "maximum": 1000 },
                    "exclude_archived": { "type": "boolean", "default": true }
                }
            }),
        },
        ToolDefinition {
            name: "slack_search_messages",
            description: "Search for messages across all Slack channels",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query (can include from:@user, in:#channel, etc.)"
                    },
                    "count": { "type": "number", "default": 20, "minimum": 1, "maximum": 100 },
                    "sort": { "type": "string", "enum": ["timestamp", "score"], "default": "timestamp" },
                    "sort_dir": { "type": "string", "enum": ["asc", "desc"], "default": "desc" }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "slack_channel_history",
            description: "Get message history from a specific channel",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channel": { "type": "string", "description": "Channel ID or name (with # prefix for names)" },
                    "limit": { "type": "number", "default": 50, "minimum": 1, "maximum": 1000 },
                    "oldest": { "type": "string", "description": "Start of time range (Unix timestamp)" },
                    "latest": { "type": "string", "description": "End of time range (Unix timestamp)" },
                    "include_all_metadata": { "type": "boolean", "default": false }
                },
                "required": ["channel"]
            }),
        },
        ToolDefinition {
            name: "slack_send_message",
            description: "Send a message to a Slack channel or user",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channel": { "type": "string", "description": "Channel ID, channel name (with #), or user ID" },
                    "text": { "type": "string", "description": "Message text (supports Slack markdown)" },
                    "thread_ts": { "type": "string", "description": "Thread timestamp to reply to a thread" },
                    "unfurl_links": { "type": "boolean", "default": true }
                },
                "required": ["channel", "text"]
            }),
        },
        ToolDefinition {
            name: "slack_get_users",
            description: "Get list of users in the Slack workspace",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "number", "default": 100, "minimum": 1, "maximum": 1000 },
                    "include_locale": { "type": "boolean", "default": false }
                }
            }),
        },
        ToolDefinition {
            name: "slack_get_user_info",
            description: "Get detailed information about a specific user",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user": { "type": "string", "description": "User ID" },
                    "include_locale": { "type": "boolean", "default": false }
                },
                "required": ["user"]
            }),
        },
        ToolDefinition {
            name: "slack_get_channel_info",
            description: "Get detailed information about a specific channel",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channel": { "type": "string", "description": "Channel ID or name (with # prefix)" },
                    "include_locale": { "type": "boolean", "default": false }
                },
                "required": ["channel"]
            }),
        },
        ToolDefinition {
            name: "slack_get_thread_replies",
            description: "Get replies to a specific message thread",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channel": { "type": "string", "description": "Channel ID or name (with # prefix)" },
                    "ts": { "type": "string", "description": "Thread timestamp" },
                    "limit": { "type": "number", "default": 100, "minimum": 1, "maximum": 1000 }
                },
                "required": ["channel", "ts"]
            }),
        },
        ToolDefinition {
            name: "search",
            description: "Search Slack messages. Returns result ids usable with fetch.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "fetch",
            description: "Fetch a single Slack message by the id returned from search (<channel_id>:<ts>).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Result id from search" }
                },
                "required": ["id"]
            }),
        },
    ]
}

pub(crate) fn tool_names() -> Vec<&'static str> {
    tool_definitions().into_iter().map(|tool| tool.name).collect()
}

/// Run a tool and return the text content for the MCP result.
pub(crate) async fn call_tool(
    slack: &SlackClient,
    name: &str,
    args: &Map<String, Value>,
) -> Result<String, ToolFailure> {
    match name {
        "slack_list_channels" => list_channels(slack, args).await,
        "slack_search_messages" => search_messages(slack, args).await,
        "slack_channel_history" => channel_history(slack, args).await,
        "slack_send_message" => send_message(slack, args).await,
        "slack_get_users" => get_users(slack, args).await,
        "slack_get_user_info" => get_user_info(slack, args).await,
        "slack_get_channel_info" => get_channel_info(slack, args).await,
        "slack_get_thread_replies" => get_thread_replies(slack, args).await,
        "search" => connector_search(slack, args).await,
        "fetch" => connector_fetch(slack, args).await,
        other => Err(ToolFailure::UnknownTool(other.to_string())),
    }
}

async fn list_channels(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let types = optional_str(args, "types").unwrap_or(DEFAULT_CHANNEL_TYPES);
    let body = slack
        .call(
            "conversations.list",
            &[
                ("types", types.to_string()),
                ("limit", bounded_u64(args, "limit", 100, 1, 1000).to_string()),
                ("exclude_archived", flag(args, "exclude_archived", true).to_string()),
            ],
        )
        .await?;
    let channels = map_array(body.get("channels"), shape_channel);
    Ok(format!(
        "Found {} channels:\n\n{}",
        channels.len(),
        to_pretty_json(&Value::Array(channels))
    ))
}

async fn search_messages(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let query = required_str(args, "query")?;
    let sort = match optional_str(args, "sort") {
        Some("score") => "score",
        _ => "timestamp",
    };
    let sort_dir = match optional_str(args, "sort_dir") {
        Some("asc") => "asc",
        _ => "desc",
    };
    let body = slack
        .call(
            "search.messages",
            &[
                ("query", query.to_string()),
                ("count", bounded_u64(args, "count", 20, 1, 100).to_string()),
                ("sort", sort.to_string()),
                ("sort_dir", sort_dir.to_string()),
            ],
        )
        .await?;
    let messages = map_array(body.pointer("/messages/matches"), shape_search_match);
    Ok(format!(
        "Found {} messages matching \"{query}\":\n\n{}",
        messages.len(),
        to_pretty_json(&Value::Array(messages))
    ))
}

async fn channel_history(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let requested = required_str(args, "channel")?;
    let channel = slack.resolve_channel(requested).await?;
    let mut params = vec![
        ("channel", channel),
        ("limit", bounded_u64(args, "limit", 50, 1, 1000).to_string()),
        (
            "include_all_metadata",
            flag(args, "include_all_metadata", false).to_string(),
        ),
    ];
    if let Some(oldest) = optional_str(args, "oldest") {
        params.push(("oldest", oldest.to_string()));
    }
    if let Some(latest) = optional_str(args, "latest") {
        params.push(("latest", latest.to_string()));
    }
    let body = slack.call("conversations.history", &params).await?;
    let messages = map_array(body.get("messages"), shape_message);
    Ok(format!(
        "Channel history for {requested} ({} messages):\n\n{}",
        messages.len(),
        to_pretty_json(&Value::Array(messages))
    ))
}

async fn send_message(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let requested = required_str(args, "channel")?;
    let text = required_str(args, "text")?;
    let channel = slack.resolve_channel(requested).await?;
    let body = slack
        .post_message(
            &channel,
            text,
            optional_str(args, "thread_ts"),
            flag(args, "unfurl_links", true),
        )
        .await?;
    let ts = body.get("ts").and_then(Value::as_str).unwrap_or("unknown");
    Ok(format!(
        "Message sent successfully to {requested}. Message timestamp: {ts}"
    ))
}

async fn get_users(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let body = slack
        .call(
            "users.list",
            &[
                ("limit", bounded_u64(args, "limit", 100, 1, 1000).to_string()),
                ("include_locale", flag(args, "include_locale", false).to_string()),
            ],
        )
        .await?;
    let users: Vec<Value> = active_members(body.get("members"))
        .map(shape_user_summary)
        .collect();
    Ok(format!(
        "Found {} users:\n\n{}",
        users.len(),
        to_pretty_json(&Value::Array(users))
    ))
}

async fn get_user_info(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let user = required_str(args, "user")?;
    let body = slack
        .call(
            "users.info",
            &[
                ("user", user.to_string()),
                ("include_locale", flag(args, "include_locale", false).to_string()),
            ],
        )
        .await?;
    let info = shape_user_detail(body.get("user").unwrap_or(&Value::Null));
    Ok(format!(
        "User information for {user}:\n\n{}",
        to_pretty_json(&info)
    ))
}

async fn get_channel_info(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let requested = required_str(args, "channel")?;
    let channel = slack.resolve_channel(requested).await?;
    let body = slack
        .call(
            "conversations.info",
            &[
                ("channel", channel),
                ("include_locale", flag(args, "include_locale", false).to_string()),
            ],
        )
        .await?;
    let info = shape_channel_detail(body.get("channel").unwrap_or(&Value::Null));
    Ok(format!(
        "Channel information for {requested}:\n\n{}",
        to_pretty_json(&info)
    ))
}

async fn get_thread_replies(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let requested = required_str(args, "channel")?;
    let ts = required_str(args, "ts")?;
    let channel = slack.resolve_channel(requested).await?;
    let body = slack
        .call(
            "conversations.replies",
            &[
                ("channel", channel),
                ("ts", ts.to_string()),
                ("limit", bounded_u64(args, "limit", 100, 1, 1000).to_string()),
            ],
        )
        .await?;
    let replies = map_array(body.get("messages"), shape_reply);
    Ok(format!(
        "Thread replies for message {ts} in {requested} ({} replies):\n\n{}",
        replies.len(),
        to_pretty_json(&Value::Array(replies))
    ))
}

async fn connector_search(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let query = required_str(args, "query")?;
    let body = slack
        .call(
            "search.messages",
            &[("query", query.to_string()), ("count", "20".to_string())],
        )
        .await?;
    let results = map_array(body.pointer("/messages/matches"), shape_connector_result);
    Ok(json!({ "results": results }).to_string())
}

async fn connector_fetch(slack: &SlackClient, args: &Map<String, Value>) -> Result<String, ToolFailure> {
    let id = required_str(args, "id")?;
    let (channel, ts) = parse_message_id(id)?;

    let body = slack
        .call(
            "conversations.history",
            &[
                ("channel", channel.to_string()),
                ("latest", ts.to_string()),
                ("inclusive", "true".to_string()),
                ("limit", "1".to_string()),
            ],
        )
        .await?;
    let message = body
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.first())
        .filter(|message| message.get("ts").and_then(Value::as_str) == Some(ts))
        .ok_or_else(|| ToolFailure::InvalidArgument {
            field: "id",
            message: format!("message {id} was not found"),
        })?;

    // The permalink is decoration; a failure here should not fail the fetch.
    let url = slack
        .call(
            "chat.getPermalink",
            &[("channel", channel.to_string()), ("message_ts", ts.to_string())],
        )
        .await
        .ok()
        .and_then(|body| body.get("permalink").cloned())
        .unwrap_or(Value::Null);

    let user = message.get("user").and_then(Value::as_str).unwrap_or("unknown");
    let document = json!({
        "id": id,
        "title": format!("Message from {user} in {channel}"),
        "text": field(message, "text"),
        "url": url,
        "metadata": {
            "channel_id": channel,
            "user": user,
            "ts": ts,
            "date": iso_from_slack_ts(message.get("ts")),
            "thread_ts": field(message, "thread_ts"),
            "reply_count": message.get("reply_count").cloned().unwrap_or(json!(0)),
        }
    });
    Ok(document.to_string())
}

/// Split a connector result id `<channel_id>:<ts>`.
fn parse_message_id(id: &str) -> Result<(&str, &str), ToolFailure> {
    match id.split_once(':') {
        Some((channel, ts)) if !channel.is_empty() && !ts.is_empty() => Ok((channel, ts)),
        _ => Err(ToolFailure::InvalidArgument {
            field: "id",
            message: "expected '<channel_id>:<ts>'".to_string(),
        }),
    }
}

// ── Response shaping ──────────────────────────────────────────────

pub(crate) fn shape_channel(channel: &Value) -> Value {
    json!({
        "id": field(channel, "id"),
        "name": field(channel, "name"),
        "is_private": field(channel, "is_private"),
        "is_member": field(channel, "is_member"),
        "is_archived": field(channel, "is_archived"),
        "topic": text_or(channel.pointer("/topic/value"), "No topic set"),
        "purpose": text_or(channel.pointer("/purpose/value"), "No purpose set"),
        "member_count": field(channel, "num_members"),
        "created": unix_secs_to_iso(channel.get("created")),
        "creator": field(channel, "creator"),
    })
}

pub(crate) fn shape_channel_detail(channel: &Value) -> Value {
    json!({
        "id": field(channel, "id"),
        "name": field(channel, "name"),
        "is_private": field(channel, "is_private"),
        "is_archived": field(channel, "is_archived"),
        "is_general": field(channel, "is_general"),
        "is_member": field(channel, "is_member"),
        "topic": text_or(channel.pointer("/topic/value"), "No topic set"),
        "purpose": text_or(channel.pointer("/purpose/value"), "No purpose set"),
        "member_count": field(channel, "num_members"),
        "created": unix_secs_to_iso(channel.get("created")),
        "creator": field(channel, "creator"),
        "locale": field(channel, "locale"),
    })
}

pub(crate) fn shape_search_match(item: &Value) -> Value {
    json!({
        "channel": pointer(item, "/channel/name"),
        "channel_id": pointer(item, "/channel/id"),
        "user": field(item, "username"),
        "user_id": field(item, "user"),
        "text": field(item, "text"),
        "timestamp": field(item, "ts"),
        "date": iso_from_slack_ts(item.get("ts")),
        "permalink": field(item, "permalink"),
        "score": field(item, "score"),
    })
}

pub(crate) fn shape_message(message: &Value) -> Value {
    json!({
        "user": field(message, "user"),
        "text": field(message, "text"),
        "timestamp": field(message, "ts"),
        "date": iso_from_slack_ts(message.get("ts")),
        "type": field(message, "type"),
        "subtype": field(message, "subtype"),
        "thread_ts": field(message, "thread_ts"),
        "reply_count": message.get("reply_count").cloned().unwrap_or(json!(0)),
        "reactions": message.get("reactions").cloned().unwrap_or(json!([])),
    })
}

pub(crate) fn shape_reply(message: &Value) -> Value {
    json!({
        "user": field(message, "user"),
        "text": field(message, "text"),
        "timestamp": field(message, "ts"),
        "date": iso_from_slack_ts(message.get("ts")),
        "type": field(message, "type"),
        "subtype": field(message, "subtype"),
        "thread_ts": field(message, "thread_ts"),
        "parent_user_id": field(message, "parent_user_id"),
        "reactions": message.get("reactions").cloned().unwrap_or(json!([])),
    })
}

pub(crate) fn shape_user_summary(user: &Value) -> Value {
    json!({
        "id": field(user, "id"),
        "name": field(user, "name"),
        "real_name": field(user, "real_name"),
        "display_name": display_name(user),
        "email": pointer(user, "/profile/email"),
        "title": pointer(user, "/profile/title"),
        "phone": pointer(user, "/profile/phone"),
        "is_bot": field(user, "is_bot"),
        "is_admin": field(user, "is_admin"),
        "is_owner": field(user, "is_owner"),
        "is_primary_owner": field(user, "is_primary_owner"),
        "timezone": field(user, "tz"),
        "status": text_or(user.pointer("/profile/status_text"), "No status"),
        "presence": field(user, "presence"),
    })
}

pub(crate) fn shape_user_detail(user: &Value) -> Value {
    json!({
        "id": field(user, "id"),
        "name": field(user, "name"),
        "real_name": field(user, "real_name"),
        "display_name": display_name(user),
        "email": pointer(user, "/profile/email"),
        "phone": pointer(user, "/profile/phone"),
        "title": pointer(user, "/profile/title"),
        "department": pointer(user, "/profile/fields/department/value"),
        "manager": pointer(user, "/profile/fields/manager/value"),
        "is_bot": field(user, "is_bot"),
        "is_admin": field(user, "is_admin"),
        "is_owner": field(user, "is_owner"),
        "is_primary_owner": field(user, "is_primary_owner"),
        "timezone": field(user, "tz"),
        "locale": field(user, "locale"),
        "status": text_or(user.pointer("/profile/status_text"), "No status"),
        "avatar": pointer(user, "/profile/image_512"),
        "presence": field(user, "presence"),
    })
}

pub(crate) fn shape_connector_result(item: &Value) -> Value {
    let channel_id = item.pointer("/channel/id").and_then(Value::as_str).unwrap_or("");
    let channel_name = item
        .pointer("/channel/name")
        .and_then(Value::as_str)
        .unwrap_or(channel_id);
    let ts = item.get("ts").and_then(Value::as_str).unwrap_or("");
    let user = item
        .get("username")
        .or_else(|| item.get("user"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let text: String = item
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .chars()
        .take(SEARCH_RESULT_TEXT_MAX_CHARS)
        .collect();
    json!({
        "id": format!("{channel_id}:{ts}"),
        "title": format!("#{channel_name} - {user}"),
        "text": text,
        "url": field(item, "permalink"),
    })
}

/// Members of a `users.list` response that are not deactivated.
pub fn active_members(members: Option<&Value>) -> impl Iterator<Item = &Value> {
    members
        .and_then(Value::as_array)
        .map(|members| members.as_slice())
        .unwrap_or_default()
        .iter()
        .filter(|user| user.get("deleted").and_then(Value::as_bool) != Some(true))
}

fn display_name(user: &Value) -> Value {
    user.pointer("/profile/display_name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(|name| Value::String(name.to_string()))
        .unwrap_or_else(|| field(user, "real_name"))
}

fn map_array(value: Option<&Value>, shape: fn(&Value) -> Value) -> Vec<Value> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().map(shape).collect())
        .unwrap_or_default()
}

fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

fn pointer(value: &Value, path: &str) -> Value {
    value.pointer(path).cloned().unwrap_or(Value::Null)
}

fn text_or(value: Option<&Value>, fallback: &str) -> Value {
    let text = value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .unwrap_or(fallback);
    Value::String(text.to_string())
}

fn unix_secs_to_iso(value: Option<&Value>) -> Value {
    value
        .and_then(Value::as_f64)
        .and_then(iso_from_unix_secs)
        .map(Value::String)
        .unwrap_or(Value::Null)
}

// ── Argument helpers ──────────────────────────────────────────────

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, ToolFailure> {
    optional_str(args, key).ok_or(ToolFailure::MissingArgument(key))
}

fn bounded_u64(args: &Map<String, Value>, key: &str, default: u64, min: u64, max: u64) -> u64 {
    let raw = match args.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(value) if value.is_finite() && value >= 1.0 => (value as u64).clamp(min, max),
        _ => default,
    }
}

fn flag(args: &Map<String, Value>, key: &str, default: bool) -> bool {
    match args.get(key) {
        Some(Value::Bool(value)) => *value,
        Some(Value::String(s)) => match s.trim() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        _ => default,
    }
}
