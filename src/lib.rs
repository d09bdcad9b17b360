//! Iri: wake-phrase conversational assistant orchestration core.
//!
//! This crate provides the control plane of a voice assistant:
//! input text (typed or transcribed) passes a wake-phrase gate, joins a
//! budgeted conversation history, is dispatched to a hosted language
//! model with timeout/retry/fallback, and the reply is spoken through a
//! serialized voice-output queue.
//!
//! # Architecture
//!
//! Independent components composed by a per-session state machine:
//! - **Trigger gate**: case-insensitive wake-phrase matching with a
//!   cool-down window ([`trigger`])
//! - **Conversation store**: ordered turn history under a byte budget
//!   ([`conversation`])
//! - **Provider router**: task-category dispatch table over hosted LLM
//!   backends, with per-provider retry and cross-provider fallback
//!   ([`router`])
//! - **Speech queue**: one global playback worker, newer jobs supersede
//!   older ones per session ([`speech`])
//! - **Session controller**: the `Idle → Listening → Dispatching →
//!   Speaking` state machine tying it together ([`session`])
//!
//! Speech synthesis and transcription engines stay outside the crate,
//! behind the [`Speaker`] and [`Transcriber`] traits.

pub mod config;
pub mod conversation;
pub mod error;
pub mod router;
pub mod session;
pub mod speech;
pub mod stt;
pub mod trigger;

pub use config::AssistantConfig;
pub use conversation::{ConversationStore, Role, Turn};
pub use error::{AssistantError, Result};
pub use router::{
    DispatchRequest, DispatchResult, FailureKind, ProviderDescriptor, ProviderRouter, TaskCategory,
    Usage,
};
pub use session::{SessionController, SessionManager, SessionState, TurnOutcome};
pub use speech::{Speaker, SpeechHandle, SpeechJob, SpeechOutcome, SpeechQueue, VoiceParams};
pub use stt::{AudioSource, Transcriber};
pub use trigger::TriggerDetector;
