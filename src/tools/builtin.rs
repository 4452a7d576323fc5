//! Tools served in-process

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::json;

use super::{ContentItem, ToolArguments, ToolBackend, ToolDefinition};
use crate::{Error, Result};

const GET_CURRENT_TIME: &str = "get_current_time";

/// Names of every built-in tool
pub const BUILTIN_TOOL_NAMES: &[&str] = &[GET_CURRENT_TIME];

/// In-process tools, filtered by the configured allowlist
#[derive(Debug, Clone)]
pub struct BuiltinTools {
    enabled: Vec<String>,
}

impl BuiltinTools {
    /// Enable the named tools; unknown names are ignored with a warning
    #[must_use]
    pub fn new(enabled: &[String]) -> Self {
        let enabled = enabled
            .iter()
            .filter(|name| {
                let known = BUILTIN_TOOL_NAMES.contains(&name.as_str());
                if !known {
                    tracing::warn!(tool = %name, "unknown built-in tool");
                }
                known
            })
            .cloned()
            .collect();
        Self { enabled }
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|n| n == name)
    }

    fn definition(name: &str) -> Option<ToolDefinition> {
        match name {
            GET_CURRENT_TIME => Some(ToolDefinition {
                name: GET_CURRENT_TIME.to_string(),
                description: "Get the current date and time.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "timezone_offset_hours": {
                            "type": "number",
                            "description": "Offset from UTC in hours, e.g. -5 or 5.5. Defaults to UTC."
                        }
                    },
                    "required": []
                }),
            }),
            _ => None,
        }
    }

    fn current_time(arguments: &ToolArguments) -> Result<String> {
        let offset_hours = match arguments.get("timezone_offset_hours") {
            None | Some(serde_json::Value::Null) => 0.0,
            Some(value) => value.as_f64().ok_or_else(|| {
                Error::Tool(format!("timezone_offset_hours must be a number, got {value}"))
            })?,
        };

        if !(-14.0..=14.0).contains(&offset_hours) {
            return Err(Error::Tool(format!(
                "timezone_offset_hours out of range: {offset_hours}"
            )));
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset_seconds = (offset_hours * 3600.0).round() as i32;
        let offset = FixedOffset::east_opt(offset_seconds)
            .ok_or_else(|| Error::Tool(format!("invalid offset: {offset_hours}")))?;

        let now = Utc::now().with_timezone(&offset);
        Ok(now.format("%A, %B %-d, %Y, %H:%M (UTC%:z)").to_string())
    }
}

impl Default for BuiltinTools {
    fn default() -> Self {
        Self {
            enabled: BUILTIN_TOOL_NAMES.iter().map(ToString::to_string).collect(),
        }
    }
}

#[async_trait]
impl ToolBackend for BuiltinTools {
    fn id(&self) -> &str {
        "builtin"
    }

    async fn active_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self
            .enabled
            .iter()
            .filter_map(|name| Self::definition(name))
            .collect())
    }

    async fn call(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentItem>> {
        if !self.is_enabled(name) {
            return Err(Error::Tool(format!("built-in tool not enabled: {name}")));
        }

        let text = match name {
            GET_CURRENT_TIME => Self::current_time(&arguments)?,
            _ => return Err(Error::Tool(format!("unknown built-in tool: {name}"))),
        };

        Ok(vec![ContentItem::text(text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allowlist_controls_active_tools() {
        let none = BuiltinTools::new(&[]);
        assert!(none.active_tools().await.unwrap().is_empty());

        let some = BuiltinTools::new(&["get_current_time".to_string(), "teleport".to_string()]);
        let tools = some.active_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "get_current_time");
    }

    #[tokio::test]
    async fn current_time_honours_offset() {
        let tools = BuiltinTools::default();
        let mut args = ToolArguments::new();
        args.insert("timezone_offset_hours".to_string(), json!(5.5));

        let items = tools.call("get_current_time", args).await.unwrap();
        let ContentItem::Text { text } = &items[0] else {
            panic!("expected text");
        };
        assert!(text.ends_with("(UTC+05:30)"), "{text}");
    }

    #[tokio::test]
    async fn bad_offset_is_an_error() {
        let tools = BuiltinTools::default();
        let mut args = ToolArguments::new();
        args.insert("timezone_offset_hours".to_string(), json!("noon"));
        assert!(tools.call("get_current_time", args).await.is_err());
    }
}
