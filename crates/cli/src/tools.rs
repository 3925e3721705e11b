//! Built-in tools registered by the binary.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use streamrelay_core::error::ToolError;
use streamrelay_core::tool::Tool;

/// Reports the current date and time.
pub struct CurrentTime;

#[async_trait]
impl Tool for CurrentTime {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally shifted to a UTC offset."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "number",
                    "description": "Hours east of UTC, e.g. 8 or -5.5. Defaults to 0."
                },
                "format": {
                    "type": "string",
                    "description": "strftime pattern, e.g. %Y-%m-%d. Defaults to RFC 3339."
                }
            }
        })
    }

    async fn call(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        let hours = match arguments.get("utc_offset_hours") {
            None | Some(serde_json::Value::Null) => 0.0,
            Some(value) => value.as_f64().ok_or_else(|| {
                ToolError::InvalidArguments("'utc_offset_hours' must be a number".into())
            })?,
        };
        let offset = FixedOffset::east_opt((hours * 3600.0).round() as i32).ok_or_else(|| {
            ToolError::InvalidArguments(format!("utc offset {hours}h is out of range"))
        })?;
        let now = Utc::now().with_timezone(&offset);

        match arguments.get("format").and_then(|v| v.as_str()) {
            Some(pattern) if !pattern.is_empty() => format_with(&now, pattern),
            _ => Ok(now.to_rfc3339()),
        }
    }
}

fn format_with(
    now: &chrono::DateTime<FixedOffset>,
    pattern: &str,
) -> Result<String, ToolError> {
    use std::fmt::Write;

    let mut out = String::new();
    write!(out, "{}", now.format(pattern))
        .map_err(|_| ToolError::InvalidArguments(format!("bad format pattern '{pattern}'")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn default_output_is_rfc3339_utc() {
        let out = CurrentTime.call(&args(serde_json::json!({}))).await.unwrap();
        let parsed = chrono::DateTime::parse_from_rfc3339(&out).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 0);
    }

    #[tokio::test]
    async fn offset_shifts_the_zone() {
        let out = CurrentTime
            .call(&args(serde_json::json!({"utc_offset_hours": 5.5})))
            .await
            .unwrap();
        assert!(out.ends_with("+05:30"), "got {out}");
    }

    #[tokio::test]
    async fn custom_format_is_applied() {
        let out = CurrentTime
            .call(&args(serde_json::json!({"format": "%Y"})))
            .await
            .unwrap();
        assert_eq!(out.len(), 4);
        assert!(out.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected() {
        let err = CurrentTime
            .call(&args(serde_json::json!({"utc_offset_hours": "eight"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = CurrentTime
            .call(&args(serde_json::json!({"utc_offset_hours": 30})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = CurrentTime
            .call(&args(serde_json::json!({"format": "%Q"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
