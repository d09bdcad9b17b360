//! Provider routing with timeout, retry, and fallback.
//!
//! [`ProviderRouter`] maps a request's task category to an ordered
//! provider chain and walks it: up to two attempts per provider for
//! transient failures (exponential backoff with jitter between them),
//! immediate advance on permanent failures, next provider when a chain
//! link is exhausted. Keeping within-provider retries separate from
//! cross-provider fallback lets a slow-but-working provider recover
//! without being abandoned early, while the total-time ceiling bounds
//! the worst case.

mod api;
mod descriptor;

pub use descriptor::{
    DispatchRequest, DispatchResult, FailureKind, ProviderDescriptor, TaskCategory, Usage,
};

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RouterConfig;
use crate::error::{AssistantError, Result};

/// Attempts per provider before falling back (initial call + 1 retry).
const MAX_ATTEMPTS_PER_PROVIDER: u32 = 2;

/// Base delay for exponential backoff between retries.
const BACKOFF_BASE_MS: u64 = 500;

/// Cap on the exponential backoff delay.
const BACKOFF_CAP_MS: u64 = 4_000;

/// Dispatches requests to hosted model backends.
///
/// The routing table and credentials are resolved once at construction
/// and read-only afterwards; a router is safely shared across sessions.
pub struct ProviderRouter {
    routes: HashMap<TaskCategory, Vec<ProviderDescriptor>>,
    client: reqwest::Client,
    temperature: f64,
    max_total_time: Duration,
}

impl ProviderRouter {
    /// Build a router from configuration.
    ///
    /// Sorts each provider chain by priority and resolves bearer tokens
    /// from the environment variables named by `api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Config`] on an unknown category name or
    /// a missing/empty key environment variable.
    pub fn new(config: &RouterConfig) -> Result<Self> {
        let mut routes = HashMap::new();
        for (key, descriptors) in &config.routes {
            let category: TaskCategory = key.parse()?;
            let mut chain = descriptors.clone();
            chain.sort_by_key(|d| d.priority);
            for descriptor in &mut chain {
                descriptor.api_key = resolve_api_key(descriptor)?;
            }
            info!(
                category = %category,
                providers = chain.len(),
                "route configured"
            );
            routes.insert(category, chain);
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AssistantError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            routes,
            client,
            temperature: config.temperature,
            max_total_time: Duration::from_millis(config.max_total_time_ms),
        })
    }

    /// The resolved provider chain for a category, if configured.
    pub fn route(&self, category: TaskCategory) -> Option<&[ProviderDescriptor]> {
        self.routes.get(&category).map(Vec::as_slice)
    }

    /// Dispatch a request through its provider chain.
    ///
    /// Walks descriptors in priority order starting at
    /// `request.attempt`. Transient failures (timeout, connection, 5xx)
    /// are retried on the same descriptor up to
    /// [`MAX_ATTEMPTS_PER_PROVIDER`] times with backoff; permanent
    /// failures (4xx) advance immediately. Each descriptor starts with a
    /// fresh attempt counter. The whole dispatch is bounded by the
    /// configured total-time ceiling and by `cancel`, both observed at
    /// every suspension point.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        let chain = self
            .routes
            .get(&request.task_category)
            .filter(|chain| !chain.is_empty());
        let Some(chain) = chain else {
            return DispatchResult::failure(
                FailureKind::NoRoute,
                format!("no providers configured for {}", request.task_category),
            );
        };
        if request.attempt >= chain.len() {
            return DispatchResult::failure(
                FailureKind::NoRoute,
                format!(
                    "resume index {} out of range for {}",
                    request.attempt, request.task_category
                ),
            );
        }

        let deadline = Instant::now() + self.max_total_time;
        let mut last_error = String::new();

        for descriptor in chain.iter().skip(request.attempt) {
            let mut failures = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return DispatchResult::failure(FailureKind::Cancelled, "dispatch cancelled");
                }
                if Instant::now() >= deadline {
                    return DispatchResult::failure(
                        FailureKind::DeadlineExceeded,
                        format!(
                            "total dispatch ceiling of {}ms elapsed",
                            self.max_total_time.as_millis()
                        ),
                    );
                }

                let call = api::call_provider(
                    &self.client,
                    descriptor,
                    &request.messages,
                    self.temperature,
                );
                let outcome = tokio::select! {
                    () = cancel.cancelled() => {
                        return DispatchResult::failure(
                            FailureKind::Cancelled,
                            "dispatch cancelled",
                        );
                    }
                    outcome = call => outcome,
                };

                match outcome {
                    Ok((content, usage)) => {
                        info!(
                            provider = %descriptor.name,
                            category = %request.task_category,
                            prompt_units = usage.prompt_units,
                            completion_units = usage.completion_units,
                            "dispatch succeeded"
                        );
                        return DispatchResult::Success { content, usage };
                    }
                    Err(error) => {
                        failures += 1;
                        last_error = format!("{}: {error}", descriptor.name);
                        warn!(
                            provider = %descriptor.name,
                            attempt = failures,
                            retryable = error.retryable(),
                            error = %error,
                            "provider call failed"
                        );

                        if error.retryable() && failures < MAX_ATTEMPTS_PER_PROVIDER {
                            let delay = backoff_delay(failures)
                                .min(deadline.saturating_duration_since(Instant::now()));
                            tokio::select! {
                                () = cancel.cancelled() => {
                                    return DispatchResult::failure(
                                        FailureKind::Cancelled,
                                        "dispatch cancelled",
                                    );
                                }
                                () = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }

                        // Exhausted or permanent: fall back to the next
                        // descriptor with a fresh attempt counter.
                        break;
                    }
                }
            }
        }

        DispatchResult::failure(
            FailureKind::AllProvidersExhausted,
            format!(
                "every provider for {} failed, last: {last_error}",
                request.task_category
            ),
        )
    }
}

/// Exponential backoff for the nth failure: `base * 2^(n-1)`, capped,
/// plus 0–10% jitter.
fn backoff_delay(failures: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1 << failures.saturating_sub(1).min(16));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = (capped as f64 * rand::random::<f64>() * 0.1) as u64;
    Duration::from_millis(capped + jitter)
}

/// Resolve a descriptor's bearer token from its environment reference.
fn resolve_api_key(descriptor: &ProviderDescriptor) -> Result<Option<String>> {
    let Some(var) = &descriptor.api_key_env else {
        return Ok(None);
    };
    let value = std::env::var(var).map_err(|_| {
        AssistantError::Config(format!(
            "provider {} key env var is missing: {var}",
            descriptor.name
        ))
    })?;
    if value.trim().is_empty() {
        return Err(AssistantError::Config(format!(
            "provider {} key env var is empty: {var}",
            descriptor.name
        )));
    }
    Ok(Some(value))
}
