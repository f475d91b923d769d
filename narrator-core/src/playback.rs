//! Audio playback scheduling.
//!
//! At most one clip plays at a time. Starting a new clip detaches the
//! previous clip's ended notification before stopping it, so a superseded
//! narration can never resume its continuation.

use crate::synthesis::AudioClip;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Identifier handed out by an [`AudioSink`] for a started clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(pub u64);

/// Callback invoked by the sink when a clip plays to natural completion.
pub type EndedFn = Box<dyn FnOnce() + Send + 'static>;

/// Platform audio output device.
///
/// Implementations must invoke `on_ended` only when the clip plays to
/// completion, never as a result of `stop`, and must tolerate `stop` on a
/// clip that already finished.
pub trait AudioSink: Send + Sync {
    fn start(&self, clip: AudioClip, rate: f32, on_ended: EndedFn) -> SinkId;
    fn stop(&self, id: SinkId);
}

struct ActiveClip {
    id: SinkId,
    detached: Arc<AtomicBool>,
}

/// Schedules clips on an [`AudioSink`], enforcing the single-active-clip
/// invariant.
pub struct PlaybackScheduler {
    sink: Arc<dyn AudioSink>,
    active: Mutex<Option<ActiveClip>>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            active: Mutex::new(None),
        }
    }

    /// Start a clip, silencing any previous one first.
    ///
    /// The returned receiver resolves exactly once if the clip plays to
    /// natural completion, and errors if the clip is superseded or stopped.
    pub fn start(&self, clip: AudioClip, rate: f32) -> oneshot::Receiver<()> {
        self.start_if(clip, rate, || true)
            .expect("unconditional start")
    }

    /// Start a clip only while `permit` still holds.
    ///
    /// The check runs under the scheduler lock: a concurrent `stop` either
    /// observes the denial (nothing to stop) or runs after the start and
    /// silences the new clip. A denied start leaves the active clip alone.
    pub fn start_if(
        &self,
        clip: AudioClip,
        rate: f32,
        permit: impl FnOnce() -> bool,
    ) -> Option<oneshot::Receiver<()>> {
        let mut active = self.active.lock().expect("playback state poisoned");
        if !permit() {
            return None;
        }
        if let Some(prev) = active.take() {
            prev.detached.store(true, Ordering::SeqCst);
            self.sink.stop(prev.id);
        }

        let (tx, rx) = oneshot::channel();
        let detached = Arc::new(AtomicBool::new(false));
        let flag = detached.clone();
        let id = self.sink.start(
            clip,
            rate,
            Box::new(move || {
                if !flag.load(Ordering::SeqCst) {
                    let _ = tx.send(());
                }
            }),
        );
        *active = Some(ActiveClip { id, detached });
        Some(rx)
    }

    /// Stop the active clip, if any, without delivering its ended
    /// notification.
    pub fn stop(&self) {
        let mut active = self.active.lock().expect("playback state poisoned");
        if let Some(prev) = active.take() {
            prev.detached.store(true, Ordering::SeqCst);
            self.sink.stop(prev.id);
        }
    }

    /// Whether a clip has been started and not yet stopped or superseded.
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .expect("playback state poisoned")
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSink;
    use crate::synthesis::SAMPLE_RATE;

    fn clip() -> AudioClip {
        AudioClip {
            samples: vec![0.0; 240],
            sample_rate: SAMPLE_RATE,
        }
    }

    #[tokio::test]
    async fn test_ended_fires_once_on_natural_completion() {
        let sink = Arc::new(FakeSink::manual());
        let scheduler = PlaybackScheduler::new(sink.clone());

        let ended = scheduler.start(clip(), 1.0);
        sink.finish_next();

        assert!(ended.await.is_ok());
    }

    #[tokio::test]
    async fn test_new_clip_detaches_previous_ended() {
        let sink = Arc::new(FakeSink::manual());
        let scheduler = PlaybackScheduler::new(sink.clone());

        let first = scheduler.start(clip(), 1.0);
        let second = scheduler.start(clip(), 1.25);

        // The first clip was stopped when the second started.
        assert_eq!(sink.stopped(), vec![SinkId(1)]);

        // Even a late natural-end signal from the first clip is suppressed.
        sink.finish_all();
        assert!(first.await.is_err());
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn test_explicit_stop_suppresses_ended() {
        let sink = Arc::new(FakeSink::manual());
        let scheduler = PlaybackScheduler::new(sink.clone());

        let ended = scheduler.start(clip(), 1.0);
        assert!(scheduler.is_active());
        scheduler.stop();
        assert!(!scheduler.is_active());

        sink.finish_all();
        assert!(ended.await.is_err());
    }

    #[tokio::test]
    async fn test_denied_start_leaves_active_clip_alone() {
        let sink = Arc::new(FakeSink::manual());
        let scheduler = PlaybackScheduler::new(sink.clone());

        let first = scheduler.start(clip(), 1.0);
        assert!(scheduler.start_if(clip(), 1.0, || false).is_none());

        // Nothing was started or stopped by the denied call.
        assert!(scheduler.is_active());
        assert!(sink.stopped().is_empty());
        assert_eq!(sink.start_count(), 1);

        sink.finish_next();
        assert!(first.await.is_ok());
    }

    #[tokio::test]
    async fn test_rates_forwarded_to_sink() {
        let sink = Arc::new(FakeSink::auto());
        let scheduler = PlaybackScheduler::new(sink.clone());

        let _ = scheduler.start(clip(), 1.5);
        assert_eq!(sink.rates(), vec![1.5]);
    }
}
