//! Tool sources and dispatch
//!
//! A [`ToolBackend`] advertises the tools it currently serves and executes
//! calls by name. The [`ToolDispatcher`] routes calls to the owning backend and
//! turns every failure into model-visible text.

mod builtin;
mod dispatcher;
mod mcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

pub use builtin::BuiltinTools;
pub use dispatcher::{MediaKind, ToolDispatcher, ToolMedia, ToolResponse};
pub use mcp::McpHttpBackend;

/// Arguments passed to a tool call
pub type ToolArguments = Map<String, Value>;

/// A callable tool as advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters object
    pub parameters: Value,
}

/// One piece of tool output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        /// Base64 payload
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        /// Base64 payload
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A source of tools
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Stable identifier used in logs
    fn id(&self) -> &str;

    /// Tools this backend currently serves
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached
    async fn active_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Execute one tool
    ///
    /// # Errors
    ///
    /// Returns error if the call fails; the dispatcher converts it to text
    async fn call(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentItem>>;

    /// Whether calls may overlap; when false the dispatcher serializes them
    fn supports_concurrent_calls(&self) -> bool {
        true
    }
}
