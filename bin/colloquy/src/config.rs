//! Centralized configuration.
//!
//! Loaded via the `config` crate from an optional `colloquy.toml` in the
//! working directory, overridden by `COLLOQUY__*` environment variables
//! (e.g. `COLLOQUY__OPENAI__API_KEY`).

use colloquy_core::Side;
use colloquy_graph::Neo4jConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// OpenAI side.
    pub openai: ParticipantConfig,

    /// Anthropic side.
    pub anthropic: ParticipantConfig,

    /// Gemini consultation; the tool reports itself unconfigured without it.
    #[serde(default)]
    pub gemini: Option<GeminiConfig>,

    /// Neo4j; an in-memory graph is used without it.
    #[serde(default)]
    pub neo4j: Option<Neo4jConfig>,

    /// Model used for summarization, graph extraction and condensation.
    #[serde(default = "default_postprocess_model")]
    pub postprocess_model: String,

    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Dialog pacing and tool limits.
    #[serde(default)]
    pub dialog: DialogSettings,

    /// Request timeout for every vendor client, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// One participant's model settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantConfig {
    /// Model identifier.
    pub model: String,

    /// API key.
    pub api_key: String,

    /// Overrides the vendor's base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Context size at which the side is asked to wrap up, at 80%.
    #[serde(default = "default_token_ceiling")]
    pub token_ceiling: u64,

    /// Upper bound on generated tokens per call.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Extended thinking budget (Anthropic only).
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

/// Gemini settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    /// Model identifier.
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// API key.
    pub api_key: String,
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Participant records, pending instructions and developer notes.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Run logs, tool usage caches and transcripts.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Tree served by `get_main_source_codes`.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
}

/// Dialog pacing and tool limits.
#[derive(Debug, Clone, Deserialize)]
pub struct DialogSettings {
    /// Pause between turns, in seconds.
    #[serde(default = "default_pacing_secs")]
    pub pacing_secs: u64,

    /// Upper bound for the `sleep` tool, in seconds.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,

    /// Forces the starting side (`openai` or `anthropic`).
    #[serde(default)]
    pub starting_side: Option<Side>,

    /// Tool round trips allowed in one turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
}

fn default_postprocess_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_token_ceiling() -> u64 {
    120_000
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_pacing_secs() -> u64 {
    1
}

fn default_max_sleep_secs() -> u64 {
    colloquy_conversation::tools::DEFAULT_MAX_SLEEP_SECS
}

fn default_max_tool_rounds() -> u32 {
    16
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            source_dir: default_source_dir(),
        }
    }
}

impl Default for DialogSettings {
    fn default() -> Self {
        Self {
            pacing_secs: default_pacing_secs(),
            max_sleep_secs: default_max_sleep_secs(),
            starting_side: None,
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `colloquy.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("colloquy").required(false))
            .add_source(
                config::Environment::with_prefix("COLLOQUY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Returns the vendor request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
