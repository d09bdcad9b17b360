//! Speech-to-text capability seam.
//!
//! Transcription engines are external to this crate; the controller
//! only needs `audio in, text out`. Failures surface as
//! [`AssistantError::Audio`](crate::error::AssistantError::Audio) and
//! are never retried automatically — the user re-triggers instead.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

/// Audio input handed to a transcriber.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Raw audio bytes (container format is the engine's concern).
    Bytes(Vec<u8>),
    /// Path to an audio file on disk.
    Path(PathBuf),
}

/// External transcription capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio to plain text.
    ///
    /// `language` is a BCP-47 hint; engines may ignore it.
    async fn transcribe(&self, audio: &AudioSource, language: Option<&str>) -> Result<String>;
}
