//! Wake-phrase detection over transcribed or typed text.
//!
//! [`TriggerDetector`] matches input text against a configured set of
//! trigger phrases and their accepted variants, case-insensitively.
//! A cool-down window suppresses duplicate activations from chained
//! audio fragments. Matching is pure; the only state is the timestamp
//! of the last successful trigger.

use std::time::{Duration, Instant};

use crate::config::TriggerConfig;
use crate::error::{AssistantError, Result};

/// Detects wake phrases in text.
pub struct TriggerDetector {
    /// Normalized (lowercased, trimmed) phrases: canonicals and variants.
    phrases: Vec<String>,
    cooldown: Duration,
    last_triggered: Option<Instant>,
}

impl TriggerDetector {
    /// Build a detector from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Config`] if no non-empty phrase is
    /// configured.
    pub fn new(config: &TriggerConfig) -> Result<Self> {
        let mut phrases: Vec<String> = config
            .phrases
            .iter()
            .flat_map(|p| std::iter::once(&p.canonical).chain(p.variants.iter()))
            .map(|p| p.to_lowercase().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if phrases.is_empty() {
            return Err(AssistantError::Config(
                "no trigger phrases configured".into(),
            ));
        }

        // Longest first, so command extraction strips the fullest match.
        phrases.sort_by_key(|p| std::cmp::Reverse(p.len()));
        phrases.dedup();

        tracing::debug!(count = phrases.len(), "trigger detector initialized");

        Ok(Self {
            phrases,
            cooldown: Duration::from_millis(config.cooldown_ms),
            last_triggered: None,
        })
    }

    /// Check whether `text` contains a wake phrase.
    ///
    /// Returns false within the cool-down window of the previous
    /// trigger, even on a textual match.
    pub fn detect(&mut self, text: &str) -> bool {
        self.detect_at(text, Instant::now())
    }

    /// Deterministic form of [`detect()`](Self::detect) for tests.
    fn detect_at(&mut self, text: &str, now: Instant) -> bool {
        if self.matched_phrase(text).is_none() {
            return false;
        }

        if let Some(last) = self.last_triggered {
            if now.duration_since(last) < self.cooldown {
                tracing::trace!("trigger suppressed within cool-down window");
                return false;
            }
        }

        self.last_triggered = Some(now);
        true
    }

    /// The phrase that matches `text`, if any. Does not touch cool-down
    /// state.
    pub fn matched_phrase(&self, text: &str) -> Option<&str> {
        let normalized = text.to_lowercase();
        self.phrases
            .iter()
            .find(|p| normalized.contains(p.as_str()))
            .map(String::as_str)
    }

    /// The remainder of the utterance after the matched phrase, with
    /// leading separators stripped. `None` when no phrase matches.
    pub fn command_after(&self, text: &str) -> Option<String> {
        let phrase = self.matched_phrase(text)?;
        let normalized = text.to_lowercase();
        let pos = normalized.find(phrase)?;

        // Lowercasing can change byte lengths for some scripts; fall
        // back to the whole utterance when offsets no longer line up.
        let rest = text
            .get(pos + phrase.len()..)
            .unwrap_or(text)
            .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.')
            .trim_end();
        Some(rest.to_string())
    }

    /// Forget the last trigger time, lifting the cool-down.
    pub fn reset(&mut self) {
        self.last_triggered = None;
    }

    /// The configured cool-down window.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
