//! Configuration for the voice loop
//!
//! Resolution order is environment, then TOML file, then compiled defaults.

pub mod file;

use std::path::Path;

use crate::vad::VadConfig;
use crate::Result;

pub use file::{
    ConfigFile, McpServerFileConfig, config_file_path, load_config_file, read_config_file,
};

/// Default instructions given to the model ahead of the tool prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
Your replies are spoken aloud, so answer in short, natural sentences without \
markdown, lists or code. Keep answers brief unless asked for more detail.";

/// Voxloop configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Voice activity detection
    pub vad: VadConfig,

    /// Conversation behaviour
    pub conversation: ConversationConfig,

    /// LLM backend
    pub llm: LlmConfig,

    /// Speech-to-text endpoint
    pub stt: SttConfig,

    /// Text-to-speech endpoint
    pub tts: TtsConfig,

    /// Tool sources
    pub tools: ToolsConfig,

    /// Live voice loop
    pub voice: VoiceConfig,
}

/// Conversation orchestration settings
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Base instructions placed before the tool prompt
    pub system_prompt: String,

    /// A reply ending with this keyword ends the conversation
    pub end_keyword: String,

    /// Delay between the end callback and the forced rebuild
    pub restart_delay_ms: u64,

    /// Upper bound on generation rounds per user turn
    pub max_tool_rounds: usize,

    /// Prime new sessions with a zero-token generation
    pub warmup: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            end_keyword: "<END>".to_string(),
            restart_delay_ms: 1000,
            max_tool_rounds: 8,
            warmup: true,
        }
    }
}

/// Local LLM server settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Ollama server URL (from `VOXLOOP_LLM_URL` env)
    pub base_url: String,

    /// Model tag (from `VOXLOOP_LLM_MODEL` env)
    pub model: String,

    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:3b".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 512,
        }
    }
}

/// Speech-to-text settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// OpenAI-compatible server URL (from `VOXLOOP_STT_URL` env)
    pub base_url: String,

    /// Model (e.g. "whisper-1")
    pub model: String,

    /// Spoken language hint
    pub language: Option<String>,

    /// Bearer token (falls back to `OPENAI_API_KEY`)
    pub api_key: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "whisper-1".to_string(),
            language: None,
            api_key: None,
        }
    }
}

/// Text-to-speech settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// OpenAI-compatible server URL (from `VOXLOOP_TTS_URL` env)
    pub base_url: String,

    /// Model (e.g. "tts-1")
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,

    /// Bearer token (falls back to `OPENAI_API_KEY`)
    pub api_key: Option<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            api_key: None,
        }
    }
}

/// Tool source settings
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Enabled built-in tool names
    pub builtin: Vec<String>,

    /// Remote MCP servers
    pub mcp: Vec<McpServerConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            builtin: vec!["get_current_time".to_string()],
            mcp: Vec::new(),
        }
    }
}

/// A remote MCP server reachable over HTTP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServerConfig {
    pub id: String,
    pub url: String,
}

/// Live voice loop settings
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Interrupt speech as soon as the user starts talking
    pub barge_in: bool,

    /// Play responses through the speakers
    pub speak: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            barge_in: true,
            speak: true,
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit `path` must exist and parse; otherwise the default path is
    /// tried and a broken file there only logs a warning.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded or the
    /// resulting configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => read_config_file(path)?,
            None => load_config_file(),
        };
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file and an environment lookup over the defaults
    ///
    /// # Errors
    ///
    /// Returns error if the merged configuration is invalid
    pub fn resolve(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let vad = VadConfig {
            speech_threshold: fc.vad.speech_threshold.unwrap_or(defaults.vad.speech_threshold),
            exit_threshold: fc.vad.exit_threshold.unwrap_or(defaults.vad.exit_threshold),
            min_silence_ms: fc.vad.min_silence_ms.unwrap_or(defaults.vad.min_silence_ms),
            min_speech_ms: fc.vad.min_speech_ms.unwrap_or(defaults.vad.min_speech_ms),
            speech_pad_ms: fc.vad.speech_pad_ms.unwrap_or(defaults.vad.speech_pad_ms),
            max_buffer_ms: fc.vad.max_buffer_ms.unwrap_or(defaults.vad.max_buffer_ms),
            max_prev_buffers: fc
                .vad
                .max_prev_buffers
                .unwrap_or(defaults.vad.max_prev_buffers),
            ..defaults.vad
        };
        vad.validate()?;

        let conversation = ConversationConfig {
            system_prompt: fc
                .conversation
                .system_prompt
                .unwrap_or(defaults.conversation.system_prompt),
            end_keyword: fc
                .conversation
                .end_keyword
                .unwrap_or(defaults.conversation.end_keyword),
            restart_delay_ms: fc
                .conversation
                .restart_delay_ms
                .unwrap_or(defaults.conversation.restart_delay_ms),
            max_tool_rounds: fc
                .conversation
                .max_tool_rounds
                .unwrap_or(defaults.conversation.max_tool_rounds)
                .max(1),
            warmup: fc.conversation.warmup.unwrap_or(defaults.conversation.warmup),
        };

        // LLM (env > toml > default)
        let llm = LlmConfig {
            base_url: env("VOXLOOP_LLM_URL")
                .or(fc.llm.base_url)
                .unwrap_or(defaults.llm.base_url),
            model: env("VOXLOOP_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(defaults.llm.model),
            temperature: fc.llm.temperature.unwrap_or(defaults.llm.temperature),
            top_p: fc.llm.top_p.unwrap_or(defaults.llm.top_p),
            top_k: fc.llm.top_k.unwrap_or(defaults.llm.top_k),
            max_tokens: fc.llm.max_tokens.unwrap_or(defaults.llm.max_tokens),
        };

        let openai_key = env("OPENAI_API_KEY").filter(|k| !k.is_empty());

        let stt = SttConfig {
            base_url: env("VOXLOOP_STT_URL")
                .or(fc.stt.base_url)
                .unwrap_or(defaults.stt.base_url),
            model: fc.stt.model.unwrap_or(defaults.stt.model),
            language: fc.stt.language,
            api_key: fc.stt.api_key.or_else(|| openai_key.clone()),
        };

        let tts = TtsConfig {
            base_url: env("VOXLOOP_TTS_URL")
                .or(fc.tts.base_url)
                .unwrap_or(defaults.tts.base_url),
            model: fc.tts.model.unwrap_or(defaults.tts.model),
            voice: fc.tts.voice.unwrap_or(defaults.tts.voice),
            speed: fc.tts.speed.unwrap_or(defaults.tts.speed).clamp(0.25, 4.0),
            api_key: fc.tts.api_key.or(openai_key),
        };

        let tools = ToolsConfig {
            builtin: fc.tools.builtin.unwrap_or(defaults.tools.builtin),
            mcp: fc
                .tools
                .mcp
                .into_iter()
                .map(|s| McpServerConfig { id: s.id, url: s.url })
                .collect(),
        };

        let voice = VoiceConfig {
            barge_in: fc.voice.barge_in.unwrap_or(defaults.voice.barge_in),
            speak: fc.voice.speak.unwrap_or(defaults.voice.speak),
        };

        tracing::debug!(
            llm_url = %llm.base_url,
            llm_model = %llm.model,
            stt_url = %stt.base_url,
            tts_url = %tts.base_url,
            mcp_servers = tools.mcp.len(),
            "configuration resolved"
        );

        Ok(Self {
            vad,
            conversation,
            llm,
            stt,
            tts,
            tools,
            voice,
        })
    }
}
