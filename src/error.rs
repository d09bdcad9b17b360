//! Error types for the assistant orchestration core.

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Invalid input (empty turn content, malformed request).
    #[error("validation error: {0}")]
    Validation(String),

    /// Network-level failure (timeout, connection refused, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// Provider rejected the request (4xx: auth, quota, bad request).
    #[error("provider error: {0}")]
    Provider(String),

    /// Every configured provider for the task category failed.
    #[error("all providers exhausted: {0}")]
    Exhausted(String),

    /// Transcription or playback failure.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl AssistantError {
    /// Returns true if this failure is transient and worth retrying.
    ///
    /// Only network-level failures qualify. Validation, provider 4xx,
    /// audio, and configuration errors require caller intervention and
    /// are never retried locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
