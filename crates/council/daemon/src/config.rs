//! Configuration for councild

use council_engine::{EngineConfig, ParticipantProfile};
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Narrative generation backend
    #[serde(default)]
    pub narrative: NarrativeBackendConfig,

    /// Participant profiles registered on top of the default experts
    #[serde(default)]
    pub participants: Vec<ParticipantProfile>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which narrative service answers participant prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeBackendKind {
    /// Offline, deterministic template text
    #[default]
    Template,
    /// Local Ollama server (`/api/generate`)
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint
    OpenaiCompatible,
}

/// Narrative backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeBackendConfig {
    #[serde(default)]
    pub kind: NarrativeBackendKind,

    /// Base URL (Ollama) or full chat completions URL (OpenAI-compatible)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// HTTP client timeout; each call is additionally bounded by the
    /// engine's per-call timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Honor HTTP(S)_PROXY from the environment
    #[serde(default)]
    pub use_system_proxy: bool,
}

impl Default for NarrativeBackendConfig {
    fn default() -> Self {
        Self {
            kind: NarrativeBackendKind::Template,
            endpoint: None,
            model: default_model(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            request_timeout_secs: default_request_timeout(),
            use_system_proxy: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_model() -> String {
    "llama3".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `COUNCIL_`-prefixed environment variables (`__` between sections,
    /// e.g. `COUNCIL_ENGINE__DELIBERATION__MAX_ROUNDS=3`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COUNCIL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
