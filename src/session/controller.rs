//! Per-session state machine.
//!
//! [`SessionController`] wires the wake-phrase gate, conversation
//! store, provider router, and speech queue into one turn loop:
//!
//! ```text
//! Idle --trigger--> Listening --text--> Dispatching --ok--> Speaking --> Idle
//!                                            \--fail--> Error --ack--> Idle
//! ```
//!
//! A trigger received while `Speaking` cancels the active speech job
//! and moves straight to `Listening`: responsiveness wins over
//! finishing the sentence. The controller is the sole writer of the
//! session state, and a whole turn runs under `&mut self`, so at most
//! one dispatch is ever in flight per session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AssistantConfig, SpeechConfig};
use crate::conversation::{ConversationStore, Turn};
use crate::error::{AssistantError, Result};
use crate::router::{DispatchRequest, DispatchResult, ProviderRouter, TaskCategory};
use crate::speech::{SpeechHandle, SpeechJob, SpeechOutcome, SpeechQueue};
use crate::stt::{AudioSource, Transcriber};
use crate::trigger::TriggerDetector;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a wake phrase.
    Idle,
    /// Gate passed; waiting for the command text.
    Listening,
    /// A provider call is in flight.
    Dispatching,
    /// The reply is being spoken.
    Speaking,
    /// The last turn failed; waiting for acknowledgement.
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Speaking => write!(f, "speaking"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What one piece of input did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Input did not pass the gate (or arrived in a state that ignores
    /// it); nothing changed.
    Ignored,
    /// The gate passed without a command; the session is listening.
    Armed,
    /// A full turn completed; the assistant reply is being spoken.
    Replied(String),
    /// Dispatch failed; the session is in the error state.
    Failed(String),
}

/// State machine for one conversation session.
pub struct SessionController {
    id: String,
    state: SessionState,
    store: ConversationStore,
    detector: TriggerDetector,
    router: Arc<ProviderRouter>,
    speech: SpeechQueue,
    transcriber: Option<Arc<dyn Transcriber>>,
    category: TaskCategory,
    speech_config: SpeechConfig,
    cancel: CancellationToken,
    active_speech: Option<SpeechHandle>,
    last_error: Option<String>,
    last_activity: Instant,
}

impl SessionController {
    /// Create a session with its own history and cancellation scope.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Config`] if the trigger configuration
    /// is unusable.
    pub fn new(
        id: impl Into<String>,
        config: &AssistantConfig,
        router: Arc<ProviderRouter>,
        speech: SpeechQueue,
    ) -> Result<Self> {
        let id = id.into();
        let detector = TriggerDetector::new(&config.trigger)?;
        let store = ConversationStore::new(
            config.conversation.system_prompt.clone(),
            config.conversation.budget_bytes,
        );

        debug!(session = %id, "session created");

        Ok(Self {
            id,
            state: SessionState::Idle,
            store,
            detector,
            router,
            speech,
            transcriber: None,
            category: TaskCategory::default(),
            speech_config: config.speech.clone(),
            cancel: CancellationToken::new(),
            active_speech: None,
            last_error: None,
            last_activity: Instant::now(),
        })
    }

    /// Attach the external transcription capability.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Route subsequent turns through this task category.
    pub fn set_category(&mut self, category: TaskCategory) {
        self.category = category;
    }

    /// The task category used for dispatch.
    pub fn category(&self) -> TaskCategory {
        self.category
    }

    /// The session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state, settling `Speaking -> Idle` once playback ended.
    pub fn state(&mut self) -> SessionState {
        self.settle();
        self.state
    }

    /// The last dispatch failure message, while in the error state.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Read access to the conversation history.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Full history for external persistence.
    pub fn export_history(&self) -> Vec<Turn> {
        self.store.export()
    }

    /// Restore history from external persistence.
    pub fn load_history(&mut self, turns: Vec<Turn>) {
        self.store.load(turns);
    }

    /// How long since this session last saw input.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Feed one piece of text (typed or transcribed) into the machine.
    ///
    /// In `Idle` the text must contain a wake phrase; any trailing
    /// command runs immediately, otherwise the session arms and waits.
    /// In `Listening` the text is the command. In `Speaking` a wake
    /// phrase cancels the active utterance first.
    ///
    /// # Errors
    ///
    /// Propagates [`AssistantError::Validation`] from the store.
    /// Dispatch failures are reported as [`TurnOutcome::Failed`], not
    /// errors.
    pub async fn handle_transcript(&mut self, text: &str) -> Result<TurnOutcome> {
        self.last_activity = Instant::now();
        self.settle();

        match self.state {
            SessionState::Idle => {
                if !self.detector.detect(text) {
                    return Ok(TurnOutcome::Ignored);
                }
                self.begin_listening(text).await
            }
            SessionState::Listening => {
                if text.trim().is_empty() {
                    return Ok(TurnOutcome::Ignored);
                }
                self.run_turn(text).await
            }
            SessionState::Speaking => {
                if !self.detector.detect(text) {
                    return Ok(TurnOutcome::Ignored);
                }
                self.stop_speaking();
                self.state = SessionState::Listening;
                self.begin_listening(text).await
            }
            SessionState::Dispatching => {
                // One dispatch per session; new input cannot preempt it.
                warn!(session = %self.id, "input ignored while dispatching");
                Ok(TurnOutcome::Ignored)
            }
            SessionState::Error => Ok(TurnOutcome::Ignored),
        }
    }

    /// Transcribe audio and feed the text through the machine.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Audio`] when no transcriber is
    /// configured or transcription fails; the failure is never retried,
    /// and a listening session falls back to idle so the user can
    /// re-trigger.
    pub async fn handle_audio(&mut self, audio: &AudioSource) -> Result<TurnOutcome> {
        let Some(transcriber) = self.transcriber.clone() else {
            return Err(AssistantError::Audio("no transcriber configured".into()));
        };

        let language = self.speech_config.language.clone();
        match transcriber.transcribe(audio, Some(&language)).await {
            Ok(text) => self.handle_transcript(&text).await,
            Err(error) => {
                warn!(session = %self.id, error = %error, "transcription failed");
                if self.state == SessionState::Listening {
                    self.state = SessionState::Idle;
                }
                Err(error)
            }
        }
    }

    /// UI-button activation: arm the session without phrase matching.
    ///
    /// Cancels the active utterance when pressed while speaking.
    pub fn press_trigger(&mut self) -> TurnOutcome {
        self.last_activity = Instant::now();
        self.settle();

        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Listening;
                TurnOutcome::Armed
            }
            SessionState::Speaking => {
                self.stop_speaking();
                self.state = SessionState::Listening;
                TurnOutcome::Armed
            }
            SessionState::Listening => TurnOutcome::Armed,
            SessionState::Dispatching | SessionState::Error => TurnOutcome::Ignored,
        }
    }

    /// Leave the error state.
    pub fn acknowledge_error(&mut self) {
        if self.state == SessionState::Error {
            self.state = SessionState::Idle;
            self.last_error = None;
        }
    }

    /// Wait for the active utterance to finish and settle to idle.
    ///
    /// Returns `None` when nothing is playing.
    pub async fn await_playback(&mut self) -> Option<SpeechOutcome> {
        let mut handle = self.active_speech.take()?;
        let outcome = handle.wait().await;
        if self.state == SessionState::Speaking {
            self.state = SessionState::Idle;
        }
        Some(outcome)
    }

    /// Cancel everything this session owns: the in-flight dispatch
    /// token scope and any active utterance. Idempotent.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.stop_speaking();
        if self.state != SessionState::Error {
            self.state = SessionState::Idle;
        }
    }

    /// Gate passed on `text`: run its trailing command, or arm and wait.
    async fn begin_listening(&mut self, text: &str) -> Result<TurnOutcome> {
        let command = self.detector.command_after(text).unwrap_or_default();
        if command.trim().is_empty() {
            self.state = SessionState::Listening;
            debug!(session = %self.id, "armed, waiting for command");
            return Ok(TurnOutcome::Armed);
        }
        self.run_turn(&command).await
    }

    /// One full turn: append the user text, dispatch, append the reply,
    /// queue it for speaking.
    async fn run_turn(&mut self, command: &str) -> Result<TurnOutcome> {
        self.store.append(Turn::user(command))?;
        self.state = SessionState::Dispatching;
        info!(session = %self.id, category = %self.category, "dispatching turn");

        let request = DispatchRequest::new(self.category, self.store.snapshot());
        let dispatch_cancel = self.cancel.child_token();
        match self.router.dispatch(&request, &dispatch_cancel).await {
            DispatchResult::Success { content, usage } => {
                debug!(
                    session = %self.id,
                    completion_units = usage.completion_units,
                    "reply received"
                );
                self.store.append(Turn::assistant(content.clone()))?;
                let job = SpeechJob::new(self.id.as_str(), content.as_str(), &self.speech_config);
                self.active_speech = Some(self.speech.enqueue(job));
                self.state = SessionState::Speaking;
                Ok(TurnOutcome::Replied(content))
            }
            DispatchResult::Failure { kind, message, .. } => {
                // The failed attempt leaves no phantom assistant turn.
                warn!(session = %self.id, kind = %kind, error = %message, "dispatch failed");
                self.state = SessionState::Error;
                self.last_error = Some(message.clone());
                Ok(TurnOutcome::Failed(message))
            }
        }
    }

    /// Cancel the active utterance, if any.
    fn stop_speaking(&mut self) {
        if let Some(handle) = self.active_speech.take() {
            debug!(session = %self.id, "cancelling active utterance");
            handle.cancel();
        }
    }

    /// Settle `Speaking -> Idle` once the utterance has finished.
    fn settle(&mut self) {
        if self.state == SessionState::Speaking {
            let finished = self
                .active_speech
                .as_ref()
                .is_none_or(SpeechHandle::is_finished);
            if finished {
                self.active_speech = None;
                self.state = SessionState::Idle;
            }
        }
    }
}
