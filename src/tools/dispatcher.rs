//! Routing tool calls to their owning backend

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tokio::sync::Mutex;

use super::{ContentItem, ToolArguments, ToolBackend, ToolDefinition};
use crate::{Error, Result};

/// Kind of media attached to a tool response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

/// The first media item a tool returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolMedia {
    pub kind: MediaKind,
    /// Base64 payload
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl ToolMedia {
    /// Decode the base64 payload
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` if the payload is not valid base64
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| Error::Tool(format!("invalid {} payload: {e}", self.mime_type)))
    }
}

/// Normalized tool output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolResponse {
    /// All text items joined by newlines
    pub text: String,
    pub media: Option<ToolMedia>,
}

impl ToolResponse {
    fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }

    /// Fold content items into one text response and at most one attachment
    #[must_use]
    pub fn from_content(items: Vec<ContentItem>) -> Self {
        let mut texts = Vec::new();
        let mut media = None;

        for item in items {
            match item {
                ContentItem::Text { text } => texts.push(text),
                ContentItem::Image { data, mime_type } if media.is_none() => {
                    media = Some(ToolMedia {
                        kind: MediaKind::Image,
                        data,
                        mime_type,
                    });
                }
                ContentItem::Audio { data, mime_type } if media.is_none() => {
                    media = Some(ToolMedia {
                        kind: MediaKind::Audio,
                        data,
                        mime_type,
                    });
                }
                ContentItem::Image { .. } | ContentItem::Audio { .. } => {}
            }
        }

        Self {
            text: texts.join("\n"),
            media,
        }
    }
}

struct Slot {
    backend: Arc<dyn ToolBackend>,
    /// Held for the duration of a call when the backend is not reentrant
    gate: Option<Mutex<()>>,
}

/// Routes tool calls across backends
#[derive(Default)]
pub struct ToolDispatcher {
    slots: Vec<Slot>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend; earlier backends win name collisions
    pub fn add_backend(&mut self, backend: Arc<dyn ToolBackend>) {
        let gate = (!backend.supports_concurrent_calls()).then(|| Mutex::new(()));
        tracing::debug!(backend = backend.id(), serialized = gate.is_some(), "tool backend added");
        self.slots.push(Slot { backend, gate });
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ToolBackend>) -> Self {
        self.add_backend(backend);
        self
    }

    /// Number of registered backends
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.slots.len()
    }

    /// Tools across all reachable backends, first owner per name
    pub async fn list_active_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = Vec::new();

        for slot in &self.slots {
            match slot.backend.active_tools().await {
                Ok(defs) => {
                    for def in defs {
                        if tools.iter().any(|t| t.name == def.name) {
                            tracing::warn!(
                                backend = slot.backend.id(),
                                tool = %def.name,
                                "duplicate tool name, keeping earlier backend"
                            );
                            continue;
                        }
                        tools.push(def);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        backend = slot.backend.id(),
                        error = %e,
                        "skipping unavailable tool backend"
                    );
                }
            }
        }

        tools
    }

    /// Call a tool by name
    ///
    /// Unknown tools and backend failures come back as text. Only a failed
    /// owner lookup (no backend claims the tool and at least one backend could
    /// not be asked) is returned as an error.
    ///
    /// # Errors
    ///
    /// Returns the lookup error of an unreachable backend
    pub async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<ToolResponse> {
        let Some(slot) = self.owner_of(name).await? else {
            tracing::warn!(tool = name, "no backend serves tool");
            return Ok(ToolResponse::text_only(format!(
                "Cannot call tool \"{name}\": it is not available."
            )));
        };

        let _guard = match &slot.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let started = std::time::Instant::now();
        match slot.backend.call(name, arguments).await {
            Ok(items) => {
                let response = ToolResponse::from_content(items);
                tracing::debug!(
                    backend = slot.backend.id(),
                    tool = name,
                    elapsed_ms = started.elapsed().as_millis(),
                    has_media = response.media.is_some(),
                    "tool call complete"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    backend = slot.backend.id(),
                    tool = name,
                    error = %e,
                    "tool call failed"
                );
                let detail = serde_json::json!({ "tool": name, "error": e.to_string() });
                Ok(ToolResponse::text_only(format!("Error calling tool \"{name}\": {detail}")))
            }
        }
    }

    async fn owner_of(&self, name: &str) -> Result<Option<&Slot>> {
        let mut lookup_error = None;

        for slot in &self.slots {
            match slot.backend.active_tools().await {
                Ok(defs) if defs.iter().any(|d| d.name == name) => return Ok(Some(slot)),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(backend = slot.backend.id(), error = %e, "tool lookup failed");
                    lookup_error = Some(e);
                }
            }
        }

        lookup_error.map_or(Ok(None), Err)
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.slots.iter().map(|s| s.backend.id()).collect();
        f.debug_struct("ToolDispatcher").field("backends", &ids).finish()
    }
}
