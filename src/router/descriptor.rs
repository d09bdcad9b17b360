//! Routing table types: task categories, provider descriptors, and the
//! dispatch request/result pair.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::Turn;
use crate::error::AssistantError;

/// The kind of work a request represents. Each category maps to an
/// ordered provider list in the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCategory {
    /// General conversation.
    #[default]
    General,
    /// Financial calculations and lookups.
    FinanceTool,
    /// Translation between languages.
    Translation,
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::FinanceTool => write!(f, "finance-tool"),
            Self::Translation => write!(f, "translation"),
        }
    }
}

impl FromStr for TaskCategory {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Self::General),
            "finance-tool" => Ok(Self::FinanceTool),
            "translation" => Ok(Self::Translation),
            other => Err(AssistantError::Config(format!(
                "unknown task category: {other}"
            ))),
        }
    }
}

/// One hosted model backend in a fallback chain.
///
/// Descriptors are static after router construction; the per-category
/// list sorted by `priority` (ascending) defines the fallback order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Display name, used in logs and error messages.
    pub name: String,
    /// Full chat-completions endpoint URL.
    pub endpoint: String,
    /// Model identifier sent in the request body.
    pub model_id: String,
    /// Maximum output tokens per response.
    pub max_tokens: u32,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Fallback position; lower is tried first.
    pub priority: u32,
    /// Environment variable holding the bearer token for this provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Resolved bearer token. Filled at router construction, never
    /// serialized.
    #[serde(skip)]
    pub(crate) api_key: Option<String>,
}

impl ProviderDescriptor {
    /// Per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A request handed to the router for dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Selects the provider chain.
    pub task_category: TaskCategory,
    /// Ordered conversation history, system turn first.
    pub messages: Vec<Turn>,
    /// Descriptor index to start from, for resuming a partial dispatch.
    pub attempt: usize,
}

impl DispatchRequest {
    /// Create a request starting at the primary provider.
    pub fn new(task_category: TaskCategory, messages: Vec<Turn>) -> Self {
        Self {
            task_category,
            messages,
            attempt: 0,
        }
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// Input units consumed.
    pub prompt_units: u32,
    /// Output units produced.
    pub completion_units: u32,
}

/// Why a dispatch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, connection failure, or 5xx from the provider.
    Network,
    /// 4xx from the provider (auth, quota, bad request).
    Provider,
    /// Every descriptor in the chain failed.
    AllProvidersExhausted,
    /// The configured total-time ceiling elapsed.
    DeadlineExceeded,
    /// The caller cancelled the dispatch.
    Cancelled,
    /// No provider chain configured for the task category.
    NoRoute,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Provider => write!(f, "provider"),
            Self::AllProvidersExhausted => write!(f, "all-providers-exhausted"),
            Self::DeadlineExceeded => write!(f, "deadline-exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::NoRoute => write!(f, "no-route"),
        }
    }
}

/// Outcome of a dispatch.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// A provider answered.
    Success {
        /// The assistant reply text.
        content: String,
        /// Token accounting for the winning call.
        usage: Usage,
    },
    /// No provider answered.
    Failure {
        /// Failure classification.
        kind: FailureKind,
        /// Human-readable detail.
        message: String,
        /// Whether re-issuing the whole dispatch could succeed.
        retryable: bool,
    },
}

impl DispatchResult {
    /// Returns true for the `Success` variant.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub(crate) fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        let retryable = matches!(kind, FailureKind::Network | FailureKind::DeadlineExceeded);
        Self::Failure {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_category_round_trips_kebab_case() {
        for (cat, name) in [
            (TaskCategory::General, "general"),
            (TaskCategory::FinanceTool, "finance-tool"),
            (TaskCategory::Translation, "translation"),
        ] {
            assert_eq!(cat.to_string(), name);
            assert_eq!(name.parse::<TaskCategory>().unwrap(), cat);
            let json = serde_json::to_string(&cat).unwrap();
            assert_eq!(json, format!("\"{name}\""));
        }
    }

    #[test]
    fn unknown_category_is_a_config_error() {
        assert!("juggling".parse::<TaskCategory>().is_err());
    }

    #[test]
    fn descriptor_timeout_conversion() {
        let desc = ProviderDescriptor {
            name: "p".into(),
            endpoint: "http://localhost".into(),
            model_id: "m".into(),
            max_tokens: 256,
            timeout_ms: 1500,
            priority: 0,
            api_key_env: None,
            api_key: None,
        };
        assert_eq!(desc.timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn resolved_api_key_is_not_serialized() {
        let desc = ProviderDescriptor {
            name: "p".into(),
            endpoint: "http://localhost".into(),
            model_id: "m".into(),
            max_tokens: 256,
            timeout_ms: 1000,
            priority: 0,
            api_key_env: Some("KEY".into()),
            api_key: Some("secret".into()),
        };
        let json = serde_json::to_string(&desc).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn failure_retryability_follows_kind() {
        for (kind, retryable) in [
            (FailureKind::Network, true),
            (FailureKind::DeadlineExceeded, true),
            (FailureKind::Provider, false),
            (FailureKind::AllProvidersExhausted, false),
            (FailureKind::Cancelled, false),
            (FailureKind::NoRoute, false),
        ] {
            match DispatchResult::failure(kind, "x") {
                DispatchResult::Failure { retryable: r, .. } => assert_eq!(r, retryable, "{kind}"),
                DispatchResult::Success { .. } => unreachable!("failure constructor"),
            }
        }
    }
}
