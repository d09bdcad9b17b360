//! Serialized voice output.
//!
//! [`SpeechQueue`] owns a single worker task that drains speech jobs
//! one at a time, so at most one utterance plays regardless of how many
//! sessions produce output (the audio device is one physical resource).
//! A new job for a session that already has one queued or playing
//! supersedes it: the queued job is replaced, the playing job is
//! cancelled. The external synthesis/playback capability sits behind
//! the [`Speaker`] trait and must stop playback when its cancellation
//! token fires.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SpeechConfig;
use crate::error::Result;

/// Synthesis parameters for one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    /// Voice pitch multiplier (1.0 = neutral).
    pub pitch: f32,
    /// Speaking rate multiplier (1.0 = neutral).
    pub rate: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

/// One utterance to speak.
#[derive(Debug, Clone)]
pub struct SpeechJob {
    /// Text to synthesize.
    pub text: String,
    /// BCP-47 language tag.
    pub language: String,
    /// Synthesis parameters.
    pub voice: VoiceParams,
    /// Owning session; used for supersede bookkeeping.
    pub session_id: String,
}

impl SpeechJob {
    /// Build a job from the session's voice defaults.
    pub fn new(session_id: impl Into<String>, text: impl Into<String>, config: &SpeechConfig) -> Self {
        Self {
            text: text.into(),
            language: config.language.clone(),
            voice: VoiceParams {
                pitch: config.pitch,
                rate: config.rate,
            },
            session_id: session_id.into(),
        }
    }
}

/// External speech-output capability.
///
/// `speak` resolves once playback has finished. Implementations must
/// observe `cancel` and stop the audio device promptly when it fires;
/// the queue treats the token as a hard stop signal, not a hint.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Synthesize and play one job to completion or cancellation.
    async fn speak(&self, job: &SpeechJob, cancel: CancellationToken) -> Result<()>;
}

/// Terminal state of a speech job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Playback ran to the end.
    Completed,
    /// The job was cancelled or superseded before or during playback.
    Cancelled,
    /// The speaker reported an error.
    Failed(String),
}

/// Handle to a queued or playing speech job.
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    id: u64,
    session_id: String,
    cancel: CancellationToken,
    done: watch::Receiver<Option<SpeechOutcome>>,
}

impl SpeechHandle {
    /// Stop this job, whether queued or playing. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// The terminal state, if reached.
    pub fn outcome(&self) -> Option<SpeechOutcome> {
        self.done.borrow().clone()
    }

    /// Wait for the job to finish or be cancelled.
    pub async fn wait(&mut self) -> SpeechOutcome {
        loop {
            if let Some(outcome) = self.done.borrow_and_update().clone() {
                return outcome;
            }
            if self.done.changed().await.is_err() {
                // Worker gone; whatever state we last saw is final.
                return self
                    .done
                    .borrow()
                    .clone()
                    .unwrap_or(SpeechOutcome::Cancelled);
            }
        }
    }

    /// The owning session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue-assigned job ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct QueuedJob {
    id: u64,
    job: SpeechJob,
    cancel: CancellationToken,
    done: watch::Sender<Option<SpeechOutcome>>,
}

impl QueuedJob {
    fn finish(self, outcome: SpeechOutcome) {
        let _ = self.done.send(Some(outcome));
    }
}

enum Command {
    Enqueue(QueuedJob),
}

/// FIFO speech queue with one global playback worker.
#[derive(Clone)]
pub struct SpeechQueue {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl SpeechQueue {
    /// Start the worker task draining jobs through `speaker`.
    ///
    /// The worker stops when the last queue clone is dropped.
    pub fn spawn(speaker: Arc<dyn Speaker>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx, speaker));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Queue a job, superseding any queued or playing job of the same
    /// session, and return a handle to it.
    pub fn enqueue(&self, job: SpeechJob) -> SpeechHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session_id = job.session_id.clone();
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);

        let queued = QueuedJob {
            id,
            job,
            cancel: cancel.clone(),
            done: done_tx,
        };
        if let Err(mpsc::error::SendError(Command::Enqueue(returned))) =
            self.tx.send(Command::Enqueue(queued))
        {
            warn!(id, "speech worker is gone, dropping job");
            returned.finish(SpeechOutcome::Failed("speech worker unavailable".into()));
        }

        SpeechHandle {
            id,
            session_id,
            cancel,
            done: done_rx,
        }
    }

    /// Cancel the job behind `handle`. Idempotent.
    pub fn cancel(&self, handle: &SpeechHandle) {
        handle.cancel();
    }
}

async fn worker(mut rx: mpsc::UnboundedReceiver<Command>, speaker: Arc<dyn Speaker>) {
    let mut pending: VecDeque<QueuedJob> = VecDeque::new();

    loop {
        // Pick the next live job, applying any buffered commands first.
        let job = loop {
            while let Ok(command) = rx.try_recv() {
                apply(command, &mut pending, None);
            }
            match pending.pop_front() {
                Some(job) if job.cancel.is_cancelled() => job.finish(SpeechOutcome::Cancelled),
                Some(job) => break job,
                None => match rx.recv().await {
                    Some(command) => apply(command, &mut pending, None),
                    None => return,
                },
            }
        };

        debug!(
            id = job.id,
            session = %job.job.session_id,
            chars = job.job.text.len(),
            "speaking"
        );

        // Play while staying responsive to new commands, so a
        // superseding enqueue can cancel the active job immediately.
        // The worker always waits for the speaker to return: the token
        // is the stop signal, and the next job must not start until the
        // audio device is actually released.
        let outcome = {
            let speak = speaker.speak(&job.job, job.cancel.clone());
            tokio::pin!(speak);
            let mut rx_open = true;
            loop {
                tokio::select! {
                    result = &mut speak => break match result {
                        Ok(()) if job.cancel.is_cancelled() => SpeechOutcome::Cancelled,
                        Ok(()) => SpeechOutcome::Completed,
                        Err(e) => SpeechOutcome::Failed(e.to_string()),
                    },
                    command = rx.recv(), if rx_open => match command {
                        Some(command) => apply(command, &mut pending, Some(&job)),
                        None => {
                            rx_open = false;
                            job.cancel.cancel();
                        }
                    },
                }
            }
        };

        if let SpeechOutcome::Failed(ref message) = outcome {
            warn!(id = job.id, session = %job.job.session_id, error = %message, "playback failed");
        }
        job.finish(outcome);
    }
}

/// Apply one command to the queue state. A job for a session that
/// already has a queued job replaces it; one for the active session
/// cancels the active job.
fn apply(command: Command, pending: &mut VecDeque<QueuedJob>, active: Option<&QueuedJob>) {
    let Command::Enqueue(new) = command;
    let session = new.job.session_id.clone();

    let mut index = 0;
    while index < pending.len() {
        if pending[index].job.session_id == session {
            if let Some(superseded) = pending.remove(index) {
                debug!(id = superseded.id, session = %session, "superseded queued job");
                superseded.cancel.cancel();
                superseded.finish(SpeechOutcome::Cancelled);
            }
        } else {
            index += 1;
        }
    }

    if let Some(active) = active {
        if active.job.session_id == session {
            debug!(id = active.id, session = %session, "superseding active job");
            active.cancel.cancel();
        }
    }

    pending.push_back(new);
}
