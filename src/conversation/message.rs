//! Conversation log entries

use serde::Serialize;
use uuid::Uuid;

use crate::tools::{ToolArguments, ToolMedia};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A tool invocation recorded in an assistant message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub function_name: String,
    pub parameters: ToolArguments,
    /// Empty until the call resolves
    pub response: String,
    pub response_media: Option<ToolMedia>,
}

/// One ordered piece of a message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    ToolCall(ToolCallPart),
}

/// A conversation entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl Message {
    /// An empty message
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            parts: Vec::new(),
        }
    }

    /// A message holding a single text part
    #[must_use]
    pub fn with_text(role: Role, text: impl Into<String>) -> Self {
        let mut message = Self::new(role);
        message.parts.push(MessagePart::Text { text: text.into() });
        message
    }

    /// Text parts joined by spaces
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::ToolCall(_) => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Tool call parts in order
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::ToolCall(call) => Some(call),
            MessagePart::Text { .. } => None,
        })
    }
}
