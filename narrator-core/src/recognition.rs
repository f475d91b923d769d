//! Speech recognition client plumbing.
//!
//! The platform microphone device sits behind [`RecognizerDevice`]. This
//! module owns everything layered on top of it: silence-based transcript
//! finalization and the detach-then-abort discipline for superseded
//! sessions.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::warn;

/// How long after the last interim result the transcript is considered
/// final.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(1200);

/// Errors from speech recognition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    /// The session was aborted programmatically. Expected during
    /// cancellation and never fed into retry logic.
    #[error("recognition aborted")]
    Aborted,

    #[error("no speech detected")]
    NoSpeech,

    #[error("recognition device error: {0}")]
    Device(String),
}

/// Events emitted by an active recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A partial transcript. Replaces the accumulated text and re-arms the
    /// silence window.
    Interim(String),
    /// The device finalized a transcript on its own.
    Final(String),
    Error(RecognitionError),
    /// Capture ended without an explicit final transcript.
    End,
}

/// Control surface of an active session.
///
/// Callers superseding a session must call `detach` before `abort` so a
/// stale transcript can never surface after the handoff.
pub trait SessionControl: Send {
    /// Stop delivering events for this session.
    fn detach(&mut self);
    /// Stop microphone capture.
    fn abort(&mut self);
}

/// One microphone listening attempt.
pub struct RecognitionSession {
    pub events: mpsc::UnboundedReceiver<RecognitionEvent>,
    pub control: Box<dyn SessionControl>,
}

/// Platform speech recognition device (continuous capture, interim
/// results enabled).
pub trait RecognizerDevice: Send + Sync {
    fn open(&self, language_tag: &str) -> Result<RecognitionSession, RecognitionError>;
}

/// Result of one listening attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    /// A finalized transcript. Empty when nothing usable was heard.
    Transcript(String),
    /// The session was aborted; the caller must not retry.
    Aborted,
}

/// Drive a session's event stream until a transcript is finalized.
///
/// Interim results accumulate and re-arm the silence window; when the
/// window lapses the accumulated text is final. Device errors other than
/// an abort degrade to an empty transcript so they feed the retry path.
pub async fn listen_for_transcript(
    events: &mut mpsc::UnboundedReceiver<RecognitionEvent>,
) -> ListenOutcome {
    let mut heard = String::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let event = match deadline {
            Some(at) => {
                tokio::select! {
                    event = events.recv() => event,
                    _ = sleep_until(at) => return ListenOutcome::Transcript(heard),
                }
            }
            None => events.recv().await,
        };

        match event {
            Some(RecognitionEvent::Interim(text)) => {
                heard = text;
                deadline = Some(Instant::now() + SILENCE_WINDOW);
            }
            Some(RecognitionEvent::Final(text)) => return ListenOutcome::Transcript(text),
            Some(RecognitionEvent::Error(RecognitionError::Aborted)) => {
                return ListenOutcome::Aborted;
            }
            Some(RecognitionEvent::Error(err)) => {
                warn!(%err, "recognition error, treating as empty transcript");
                return ListenOutcome::Transcript(String::new());
            }
            Some(RecognitionEvent::End) => return ListenOutcome::Transcript(heard),
            // Channel closed: the session was torn down.
            None => return ListenOutcome::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<RecognitionEvent>,
        mpsc::UnboundedReceiver<RecognitionEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_window_finalizes_last_interim() {
        let (tx, mut rx) = channel();
        tx.send(RecognitionEvent::Interim("go".to_string())).unwrap();
        tx.send(RecognitionEvent::Interim("go left".to_string()))
            .unwrap();

        // No further events: the window lapses and the accumulated text wins.
        let outcome = listen_for_transcript(&mut rx).await;
        assert_eq!(outcome, ListenOutcome::Transcript("go left".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_final_wins_over_window() {
        let (tx, mut rx) = channel();
        tx.send(RecognitionEvent::Interim("run".to_string())).unwrap();
        tx.send(RecognitionEvent::Final("run away".to_string()))
            .unwrap();

        let outcome = listen_for_transcript(&mut rx).await;
        assert_eq!(outcome, ListenOutcome::Transcript("run away".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_abort_error_degrades_to_empty_transcript() {
        let (tx, mut rx) = channel();
        tx.send(RecognitionEvent::Error(RecognitionError::NoSpeech))
            .unwrap();

        let outcome = listen_for_transcript(&mut rx).await;
        assert_eq!(outcome, ListenOutcome::Transcript(String::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_is_not_a_transcript() {
        let (tx, mut rx) = channel();
        tx.send(RecognitionEvent::Interim("lef".to_string())).unwrap();
        tx.send(RecognitionEvent::Error(RecognitionError::Aborted))
            .unwrap();

        let outcome = listen_for_transcript(&mut rx).await;
        assert_eq!(outcome, ListenOutcome::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_finalizes_accumulated_text() {
        let (tx, mut rx) = channel();
        tx.send(RecognitionEvent::Interim("wait".to_string())).unwrap();
        tx.send(RecognitionEvent::End).unwrap();

        let outcome = listen_for_transcript(&mut rx).await;
        assert_eq!(outcome, ListenOutcome::Transcript("wait".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_counts_as_abort() {
        let (tx, mut rx) = channel();
        drop(tx);

        let outcome = listen_for_transcript(&mut rx).await;
        assert_eq!(outcome, ListenOutcome::Aborted);
    }
}
