//! Configuration types for the assistant core.
//!
//! All sections use `#[serde(default)]` so a partial TOML file only
//! overrides the fields it names. Provider API keys are referenced by
//! environment-variable name (`api_key_env`) and resolved when the
//! router is constructed, never stored inline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AssistantError, Result};
use crate::router::ProviderDescriptor;

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Wake-phrase gate settings.
    pub trigger: TriggerConfig,
    /// Conversation history settings.
    pub conversation: ConversationConfig,
    /// Provider routing settings.
    pub router: RouterConfig,
    /// Voice output defaults.
    pub speech: SpeechConfig,
    /// Session lifecycle settings.
    pub session: SessionConfig,
}

/// A wake phrase and its accepted variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerPhrase {
    /// Canonical form, e.g. `"hola iri"`.
    pub canonical: String,
    /// Accepted variants (common mishearings, synonyms).
    #[serde(default)]
    pub variants: Vec<String>,
}

/// Wake-phrase gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Phrases that activate listening. Matching is case-insensitive
    /// containment over canonicals and variants.
    pub phrases: Vec<TriggerPhrase>,
    /// Minimum time between activations in milliseconds. Re-triggers
    /// inside this window are suppressed to avoid duplicate activations
    /// from chained audio fragments.
    pub cooldown_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            phrases: vec![TriggerPhrase {
                canonical: "hola iri".into(),
                variants: vec!["oye iri".into(), "hey iri".into()],
            }],
            cooldown_ms: 2000,
        }
    }
}

/// Conversation history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Maximum total content size (bytes) of all turns in a session,
    /// system prompt included. Oldest non-system turns are evicted when
    /// exceeded.
    pub budget_bytes: usize,
    /// System prompt installed in every new session.
    pub system_prompt: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 16_384,
            system_prompt: "You are Iri, a concise voice assistant. \
                            Keep replies short enough to speak aloud."
                .into(),
        }
    }
}

/// Provider routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Hard ceiling on one dispatch across all retries and fallbacks,
    /// in milliseconds. Bounds the worst case of
    /// `attempts x providers x timeout`.
    pub max_total_time_ms: u64,
    /// Sampling temperature sent with every provider call.
    pub temperature: f64,
    /// Ordered provider lists per task category (kebab-case category
    /// names, e.g. `"finance-tool"`). Within a list, lower `priority`
    /// is tried first; order defines fallback order. Keys are resolved
    /// into the typed dispatch table once, at router construction.
    pub routes: HashMap<String, Vec<ProviderDescriptor>>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_total_time_ms: 30_000,
            temperature: 0.7,
            routes: HashMap::new(),
        }
    }
}

/// Voice output defaults applied to every speech job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// BCP-47 language tag for synthesis.
    pub language: String,
    /// Voice pitch multiplier (1.0 = neutral).
    pub pitch: f32,
    /// Speaking rate multiplier (1.0 = neutral).
    pub rate: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: "es-ES".into(),
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle longer than this are destroyed by
    /// [`SessionManager::reap_idle`](crate::session::SessionManager::reap_idle).
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
        }
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Config`] if the file cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AssistantError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            AssistantError::Config(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Default config file location (`<config dir>/iri/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("iri")
            .join("config.toml")
    }
}
