//! Chat-completions wire contract for hosted model backends.
//!
//! One non-streaming request/response call per provider attempt. All
//! configured backends speak the same OpenAI-compatible shape:
//! `{model, messages, temperature, max_tokens}` in,
//! `{choices: [{message: {role, content}}], usage}` out, with a
//! structured `{error: {message, code}}` body on non-2xx.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::Turn;
use crate::router::descriptor::{ProviderDescriptor, Usage};

/// Request body sent to a provider.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response body returned by a provider.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Structured error body on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// A single provider attempt's failure, classified for retry policy.
#[derive(Debug)]
pub(crate) enum CallError {
    /// The call did not complete within the descriptor's timeout.
    Timeout(Duration),
    /// Connection-level failure (refused, DNS, TLS, reset).
    Connect(String),
    /// The provider answered with a non-2xx status.
    Status {
        status: reqwest::StatusCode,
        message: String,
    },
    /// The provider answered 2xx with an unusable body.
    Decode(String),
}

impl CallError {
    /// Timeouts, connection failures, and 5xx responses are transient;
    /// 4xx and malformed bodies are not.
    pub(crate) fn retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) => true,
            Self::Status { status, .. } => status.is_server_error(),
            Self::Decode(_) => false,
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(t) => write!(f, "timed out after {}ms", t.as_millis()),
            Self::Connect(msg) => write!(f, "connection failed: {msg}"),
            Self::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Decode(msg) => write!(f, "unusable response: {msg}"),
        }
    }
}

/// Issue one chat-completions call against a provider.
///
/// Applies the descriptor's per-call timeout and bearer token. Returns
/// the first choice's content plus usage accounting.
pub(crate) async fn call_provider(
    client: &reqwest::Client,
    descriptor: &ProviderDescriptor,
    messages: &[Turn],
    temperature: f64,
) -> Result<(String, Usage), CallError> {
    let body = ChatRequest {
        model: &descriptor.model_id,
        messages: messages
            .iter()
            .map(|t| WireMessage {
                role: match t.role {
                    crate::conversation::Role::System => "system",
                    crate::conversation::Role::User => "user",
                    crate::conversation::Role::Assistant => "assistant",
                },
                content: &t.content,
            })
            .collect(),
        temperature,
        max_tokens: descriptor.max_tokens,
    };

    let mut request = client
        .post(&descriptor.endpoint)
        .timeout(descriptor.timeout())
        .json(&body);
    if let Some(key) = &descriptor.api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            CallError::Timeout(descriptor.timeout())
        } else {
            CallError::Connect(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let raw = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&raw) {
            Ok(body) => match body.error.code {
                Some(code) => format!("{} ({code})", body.error.message),
                None => body.error.message,
            },
            Err(_) => raw.chars().take(200).collect(),
        };
        return Err(CallError::Status { status, message });
    }

    let parsed: ChatResponse = response.json().await.map_err(|e| {
        if e.is_timeout() {
            CallError::Timeout(descriptor.timeout())
        } else {
            CallError::Decode(e.to_string())
        }
    })?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| CallError::Decode("response carried no choices".into()))?;

    let usage = parsed.usage.map_or_else(Usage::default, |u| Usage {
        prompt_units: u.prompt_tokens,
        completion_units: u.completion_tokens,
    });

    Ok((content, usage))
}
