//! Session lifecycle: construction, lookup, idle reaping.
//!
//! Sessions are fully independent: each owns its history, detector,
//! and cancellation scope. The only shared pieces are the read-only
//! routing table and the global speech queue.

mod controller;

pub use controller::{SessionController, SessionState, TurnOutcome};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::router::ProviderRouter;
use crate::speech::SpeechQueue;
use crate::stt::Transcriber;

/// Owns the live sessions of one assistant instance.
pub struct SessionManager {
    config: AssistantConfig,
    router: Arc<ProviderRouter>,
    speech: SpeechQueue,
    transcriber: Option<Arc<dyn Transcriber>>,
    sessions: HashMap<String, SessionController>,
}

impl SessionManager {
    /// Create a manager sharing one router and speech queue.
    pub fn new(config: AssistantConfig, router: Arc<ProviderRouter>, speech: SpeechQueue) -> Self {
        Self {
            config,
            router,
            speech,
            transcriber: None,
            sessions: HashMap::new(),
        }
    }

    /// Attach the transcription capability handed to every new session.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Create a session with a generated ID.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Config`] if session construction fails.
    pub fn create(&mut self) -> Result<&mut SessionController> {
        let id = uuid::Uuid::new_v4().to_string();
        self.create_named(id)
    }

    /// Create a session with a caller-chosen ID.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Validation`] if the ID is already in
    /// use.
    pub fn create_named(&mut self, id: impl Into<String>) -> Result<&mut SessionController> {
        let id = id.into();
        if self.sessions.contains_key(&id) {
            return Err(AssistantError::Validation(format!(
                "session already exists: {id}"
            )));
        }

        let mut controller = SessionController::new(
            id.clone(),
            &self.config,
            Arc::clone(&self.router),
            self.speech.clone(),
        )?;
        if let Some(transcriber) = &self.transcriber {
            controller = controller.with_transcriber(Arc::clone(transcriber));
        }

        info!(session = %id, "session started");
        Ok(self.sessions.entry(id).or_insert(controller))
    }

    /// Look up a live session.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut SessionController> {
        self.sessions.get_mut(id)
    }

    /// End a session, cancelling whatever it owns. Returns false when
    /// the ID is unknown.
    pub fn end(&mut self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some(mut controller) => {
                controller.cancel();
                info!(session = %id, "session ended");
                true
            }
            None => false,
        }
    }

    /// Destroy sessions idle past the configured timeout. Returns how
    /// many were removed.
    pub fn reap_idle(&mut self) -> usize {
        let timeout = Duration::from_secs(self.config.session.idle_timeout_secs);
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, c)| c.idle_for() > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(mut controller) = self.sessions.remove(id) {
                controller.cancel();
                debug!(session = %id, "reaped idle session");
            }
        }
        expired.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true when no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// IDs of the live sessions.
    pub fn ids(&self) -> Vec<&str> {
        self.sessions.keys().map(String::as_str).collect()
    }
}
