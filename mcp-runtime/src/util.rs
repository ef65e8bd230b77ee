use std::time::Duration;

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;

const SLACK_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(SLACK_HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Render fractional unix seconds as an RFC 3339 UTC timestamp with millis.
pub fn iso_from_unix_secs(secs: f64) -> Option<String> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Slack message timestamps are strings like `"1700000000.000100"`.
pub fn iso_from_slack_ts(ts: Option<&Value>) -> Value {
    let secs = match ts {
        Some(Value::String(raw)) => raw.parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    };
    secs.and_then(iso_from_unix_secs)
        .map(Value::String)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn iso_conversion_matches_javascript_shape() {
        assert_eq!(
            iso_from_unix_secs(1_700_000_000.0).as_deref(),
            Some("2023-11-14T22:13:20.000Z")
        );
        assert_eq!(
            iso_from_slack_ts(Some(&json!("1700000000.123456"))),
            json!("2023-11-14T22:13:20.123Z")
        );
        assert_eq!(iso_from_slack_ts(Some(&json!("garbage"))), Value::Null);
        assert_eq!(iso_from_slack_ts(None), Value::Null);
    }
}
