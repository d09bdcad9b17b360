//! Headless console driver for the assistant core.
//!
//! Reads one utterance per line from stdin, feeds it through a single
//! session, and "speaks" replies by printing them. Tracing goes to
//! stderr so stdout stays clean conversation output.
//!
//! Usage: `iri-console [config.toml]`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use iri::{
    AssistantConfig, ProviderRouter, SessionManager, Speaker, SpeechJob, SpeechQueue, TurnOutcome,
};

/// Speaker that prints the utterance and paces itself like playback,
/// honoring cancellation mid-utterance.
struct ConsoleSpeaker;

#[async_trait]
impl Speaker for ConsoleSpeaker {
    async fn speak(&self, job: &SpeechJob, cancel: CancellationToken) -> iri::Result<()> {
        println!("iri> {}", job.text);
        let pace = Duration::from_millis((job.text.chars().count() as u64 * 25).min(5_000));
        tokio::select! {
            () = tokio::time::sleep(pace) => {}
            () = cancel.cancelled() => eprintln!("(playback interrupted)"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(AssistantConfig::default_path, Into::into);
    let config = if config_path.exists() {
        tracing::info!(path = %config_path.display(), "loading config");
        AssistantConfig::load(&config_path)?
    } else {
        tracing::warn!(path = %config_path.display(), "no config file, using defaults");
        AssistantConfig::default()
    };

    let router = Arc::new(ProviderRouter::new(&config.router)?);
    let speech = SpeechQueue::spawn(Arc::new(ConsoleSpeaker));
    let mut manager = SessionManager::new(config, router, speech);
    let session_id = manager.create()?.id().to_string();

    tracing::info!(session = %session_id, "console session started, ctrl-d to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(session) = manager.get_mut(&session_id) else {
            break;
        };
        match session.handle_transcript(line).await {
            Ok(TurnOutcome::Ignored) => eprintln!("(no wake phrase; say \"hola iri ...\")"),
            Ok(TurnOutcome::Armed) => eprintln!("(listening)"),
            Ok(TurnOutcome::Replied(_)) => {
                // The speech queue prints the reply; wait so utterances
                // don't interleave with the next prompt.
                session.await_playback().await;
            }
            Ok(TurnOutcome::Failed(message)) => {
                eprintln!("(turn failed: {message})");
                session.acknowledge_error();
            }
            Err(error) => eprintln!("(error: {error})"),
        }
    }

    manager.end(&session_id);
    tracing::info!("console session closed");
    Ok(())
}
