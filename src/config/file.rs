//! TOML configuration file loading
//!
//! Supports `~/.config/voxloop/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// VAD tuning
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Conversation behaviour
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// LLM backend and sampling
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech-to-text endpoint
    #[serde(default)]
    pub stt: SpeechEndpointFileConfig,

    /// Text-to-speech endpoint
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Tool sources
    #[serde(default)]
    pub tools: ToolsFileConfig,

    /// Live voice loop
    #[serde(default)]
    pub voice: VoiceFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    pub speech_threshold: Option<f32>,
    pub exit_threshold: Option<f32>,
    pub min_silence_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,
    pub speech_pad_ms: Option<u32>,
    pub max_buffer_ms: Option<u32>,
    pub max_prev_buffers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Base instructions placed before the tool prompt
    pub system_prompt: Option<String>,
    /// Trailing keyword that ends the conversation (e.g. "<END>")
    pub end_keyword: Option<String>,
    pub restart_delay_ms: Option<u64>,
    pub max_tool_rounds: Option<usize>,
    /// Prime new sessions with a zero-token generation
    pub warmup: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Ollama server URL (e.g. "http://localhost:11434")
    pub base_url: Option<String>,
    /// Model tag (e.g. "qwen2.5:3b")
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechEndpointFileConfig {
    /// OpenAI-compatible server URL
    pub base_url: Option<String>,
    /// Model (e.g. "whisper-1")
    pub model: Option<String>,
    /// Spoken language hint (ISO-639-1)
    pub language: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub base_url: Option<String>,
    /// Model (e.g. "tts-1")
    pub model: Option<String>,
    /// Voice identifier (e.g. "alloy")
    pub voice: Option<String>,
    /// Speed multiplier (0.25 to 4.0)
    pub speed: Option<f32>,
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolsFileConfig {
    /// Built-in tools to enable (empty list disables all)
    pub builtin: Option<Vec<String>>,
    /// Remote MCP servers reachable over HTTP
    #[serde(default)]
    pub mcp: Vec<McpServerFileConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpServerFileConfig {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Interrupt speech as soon as the user starts talking
    pub barge_in: Option<bool>,
    /// Play responses through the speakers
    pub speak: Option<bool>,
}

/// Parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML for this schema
pub fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voxloop/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxloop").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_leaves_other_sections_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[llm]
model = "llama3.2:1b"

[[tools.mcp]]
id = "search"
url = "http://localhost:9000/mcp"
"#
        )
        .unwrap();

        let config = read_config_file(file.path()).unwrap();
        assert_eq!(config.llm.model.as_deref(), Some("llama3.2:1b"));
        assert!(config.llm.base_url.is_none());
        assert!(config.vad.speech_threshold.is_none());
        assert_eq!(config.tools.mcp.len(), 1);
        assert_eq!(config.tools.mcp[0].id, "search");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm\nmodel = ").unwrap();
        assert!(read_config_file(file.path()).is_err());
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[channels]\ndiscord = true").unwrap();
        assert!(read_config_file(file.path()).is_err());
    }
}
