//! The narration orchestrator.
//!
//! Owns the lifecycle of one *operation* at a time: narrate the story
//! text, narrate the choice prompt, listen for a spoken reply, interpret
//! it, and either report the selected choice or retry within a fixed
//! bound. A newer operation supersedes the current one by bumping a
//! generation counter; every deferred continuation captures its
//! operation id and re-checks it against the counter before producing
//! any externally visible effect, so stale results are dropped silently.

use crate::interpreter::{ChoiceInterpreter, Interpretation};
use crate::playback::{AudioSink, PlaybackScheduler};
use crate::recognition::{
    listen_for_transcript, ListenOutcome, RecognitionSession, RecognizerDevice, SessionControl,
};
use crate::story::{Language, PlaybackRate, StepId, StoryStep};
use crate::synthesis::Synthesizer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Re-listens allowed after an unclear reply (three attempts total).
pub const MAX_RETRIES: u32 = 2;

/// Errors surfaced to the host through the event channel.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] crate::synthesis::SynthesisError),

    #[error("interpretation failed: {0}")]
    Interpretation(#[from] crate::interpreter::InterpreterError),
}

/// Externally visible phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarratorState {
    Idle,
    Narrating,
    Listening,
    Processing,
}

/// Events delivered to the host application.
#[derive(Debug)]
pub enum NarratorEvent {
    State(NarratorState),
    ChoiceSelected { step_id: StepId, choice: String },
    Error(NarratorError),
}

/// Narration settings. Changing any of them cancels the in-flight
/// operation.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    pub language: Language,
    pub rate: PlaybackRate,
    /// Spoken phrase that cancels voice selection, compared lowercased.
    pub stop_phrase: String,
}

impl NarratorConfig {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            rate: PlaybackRate::Normal,
            stop_phrase: language.stop_phrase().to_string(),
        }
    }

    pub fn with_rate(mut self, rate: PlaybackRate) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_stop_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.stop_phrase = phrase.into();
        self
    }
}

struct Shared {
    synthesizer: Arc<dyn Synthesizer>,
    recognizer: Arc<dyn RecognizerDevice>,
    playback: PlaybackScheduler,
    interpreter: Arc<dyn ChoiceInterpreter>,
    events: mpsc::UnboundedSender<NarratorEvent>,
    /// Identifier of the operation allowed to produce effects.
    current_op: AtomicU64,
    next_op: AtomicU64,
    /// Control handle of the active recognition session, keyed by owner
    /// operation.
    listener: Mutex<Option<(u64, Box<dyn SessionControl>)>>,
    state: Mutex<NarratorState>,
    config: Mutex<NarratorConfig>,
    step: Mutex<Option<StoryStep>>,
    disposed: AtomicBool,
}

/// The narration state machine.
///
/// Methods must be called from within a tokio runtime; operations run as
/// spawned tasks and report back through the event channel handed out by
/// [`Narrator::new`].
pub struct Narrator {
    shared: Arc<Shared>,
}

impl Narrator {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        recognizer: Arc<dyn RecognizerDevice>,
        sink: Arc<dyn AudioSink>,
        interpreter: Arc<dyn ChoiceInterpreter>,
        config: NarratorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<NarratorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            synthesizer,
            recognizer,
            playback: PlaybackScheduler::new(sink),
            interpreter,
            events,
            current_op: AtomicU64::new(0),
            next_op: AtomicU64::new(0),
            listener: Mutex::new(None),
            state: Mutex::new(NarratorState::Idle),
            config: Mutex::new(config),
            step: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        (Self { shared }, events_rx)
    }

    /// Begin narrating a freshly generated step and listening for the
    /// player's choice. Steps that already carry a choice are ignored.
    pub fn start_for_step(&self, step: &StoryStep) {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return;
        }
        if !step.awaiting_choice() {
            debug!(step_id = %step.id, "step already resolved, not narrating");
            return;
        }

        *lock(&self.shared.step) = Some(step.clone());
        let op = begin_operation(&self.shared);
        let shared = self.shared.clone();
        let step = step.clone();
        tokio::spawn(async move {
            run_step(shared, op, step).await;
        });
    }

    /// Interrupt the current narration and jump straight to the choice
    /// prompt and listening, for the most recent step.
    pub fn skip(&self) {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Some(step) = lock(&self.shared.step).clone() else {
            return;
        };
        if !step.awaiting_choice() {
            return;
        }

        let op = begin_operation(&self.shared);
        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_choice_cycle(shared, op, step).await;
        });
    }

    /// Narrate a single utterance, e.g. a choice the player clicked, as an
    /// isolated operation. Never opens a recognition session.
    pub fn narrate_once(&self, text: impl Into<String>) {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return;
        }
        let op = begin_operation(&self.shared);
        let shared = self.shared.clone();
        let text = text.into();
        tokio::spawn(async move {
            if speak_checked(&shared, op, &text).await {
                settle_idle(&shared, op);
            }
        });
    }

    /// Cancel the in-flight operation without reporting a choice.
    pub fn cancel(&self) {
        begin_operation(&self.shared);
        publish_state(&self.shared, NarratorState::Idle);
    }

    /// Tear down: cancel the in-flight operation and refuse further work.
    pub fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.cancel();
        *lock(&self.shared.step) = None;
    }

    pub fn set_language(&self, language: Language) {
        {
            let mut config = lock(&self.shared.config);
            let default_stop = config.language.stop_phrase();
            // Keep a host-overridden stop phrase; swap a default one.
            if config.stop_phrase == default_stop {
                config.stop_phrase = language.stop_phrase().to_string();
            }
            config.language = language;
        }
        self.cancel();
    }

    pub fn set_playback_rate(&self, rate: PlaybackRate) {
        lock(&self.shared.config).rate = rate;
        self.cancel();
    }

    pub fn set_stop_phrase(&self, phrase: impl Into<String>) {
        lock(&self.shared.config).stop_phrase = phrase.into();
        self.cancel();
    }

    /// Current externally visible state.
    pub fn state(&self) -> NarratorState {
        *lock(&self.shared.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("narrator state poisoned")
}

/// Supersede the current operation: bump the generation counter, silence
/// audio, and shut down any recognition session.
fn begin_operation(shared: &Shared) -> u64 {
    let op = shared.next_op.fetch_add(1, Ordering::SeqCst) + 1;
    shared.current_op.store(op, Ordering::SeqCst);
    shared.playback.stop();
    if let Some((owner, mut control)) = lock(&shared.listener).take() {
        debug!(owner, "detaching superseded recognition session");
        control.detach();
        control.abort();
    }
    op
}

fn is_current(shared: &Shared, op: u64) -> bool {
    shared.current_op.load(Ordering::SeqCst) == op
}

fn publish_state(shared: &Shared, state: NarratorState) {
    let mut current = lock(&shared.state);
    if *current != state {
        *current = state;
        let _ = shared.events.send(NarratorEvent::State(state));
    }
}

/// Report a state change on behalf of an operation. Returns false (and
/// reports nothing) when the operation is stale.
fn set_state(shared: &Shared, op: u64, state: NarratorState) -> bool {
    if !is_current(shared, op) {
        debug!(op, ?state, "stale operation, dropping state change");
        return false;
    }
    publish_state(shared, state);
    true
}

fn settle_idle(shared: &Shared, op: u64) {
    if is_current(shared, op) {
        publish_state(shared, NarratorState::Idle);
    }
}

fn report_error(shared: &Shared, op: u64, err: NarratorError) {
    if !is_current(shared, op) {
        debug!(op, "stale operation, dropping error");
        return;
    }
    error!(%err, "narration error");
    let _ = shared.events.send(NarratorEvent::Error(err));
    publish_state(shared, NarratorState::Idle);
}

/// Synthesize and play one utterance to completion.
///
/// Returns `Ok(false)` when the operation was superseded at any point
/// before the clip finished.
async fn speak(shared: &Arc<Shared>, op: u64, text: &str) -> Result<bool, NarratorError> {
    if !set_state(shared, op, NarratorState::Narrating) {
        return Ok(false);
    }

    let (language, rate) = {
        let config = lock(&shared.config);
        (config.language, config.rate.multiplier())
    };

    let clip = shared.synthesizer.synthesize(text, language).await?;
    // Checked under the scheduler lock so a concurrent cancellation cannot
    // slip between the staleness check and the start.
    let Some(ended) = shared
        .playback
        .start_if(clip, rate, || is_current(shared, op))
    else {
        debug!(op, "stale operation, discarding synthesized clip");
        return Ok(false);
    };
    match ended.await {
        Ok(()) => Ok(is_current(shared, op)),
        Err(_) => {
            debug!(op, "playback superseded before completion");
            Ok(false)
        }
    }
}

/// [`speak`], with service failures reported to the host. Returns whether
/// the sequence should continue.
async fn speak_checked(shared: &Arc<Shared>, op: u64, text: &str) -> bool {
    match speak(shared, op, text).await {
        Ok(done) => done,
        Err(err) => {
            report_error(shared, op, err);
            false
        }
    }
}

async fn run_step(shared: Arc<Shared>, op: u64, step: StoryStep) {
    if !speak_checked(&shared, op, &step.narrative).await {
        return;
    }
    run_choice_cycle(shared, op, step).await;
}

/// Narrate the choice prompt, then listen/interpret with bounded retries.
async fn run_choice_cycle(shared: Arc<Shared>, op: u64, step: StoryStep) {
    let language = lock(&shared.config).language;
    let prompt = language.choice_prompt(&step.choices);
    if !speak_checked(&shared, op, &prompt).await {
        return;
    }

    let mut retries = 0u32;
    loop {
        let Some(transcript) = listen(&shared, op).await else {
            return;
        };

        let stop_phrase = lock(&shared.config).stop_phrase.clone();
        if transcript.trim().to_lowercase() == stop_phrase.trim().to_lowercase() {
            debug!(op, "stop command spoken, ending without a choice");
            settle_idle(&shared, op);
            return;
        }

        if !set_state(&shared, op, NarratorState::Processing) {
            return;
        }

        let result = shared
            .interpreter
            .interpret(&transcript, &step.choices, &step.narrative, language)
            .await;
        if !is_current(&shared, op) {
            debug!(op, "stale operation, discarding interpretation");
            return;
        }

        match result {
            Ok(Interpretation::Choice(choice)) => {
                debug!(op, %choice, "choice selected by voice");
                let _ = shared.events.send(NarratorEvent::ChoiceSelected {
                    step_id: step.id,
                    choice,
                });
                settle_idle(&shared, op);
                return;
            }
            Ok(Interpretation::Unclear) if retries < MAX_RETRIES => {
                retries += 1;
                debug!(op, retries, "unclear reply, retrying");
                if !speak_checked(&shared, op, language.retry_prompt()).await {
                    return;
                }
            }
            Ok(Interpretation::Unclear) => {
                debug!(op, "unclear reply after final retry, giving up");
                if speak_checked(&shared, op, language.give_up_prompt()).await {
                    settle_idle(&shared, op);
                }
                return;
            }
            Err(err) => {
                report_error(&shared, op, err.into());
                return;
            }
        }
    }
}

/// Open a recognition session and wait for a finalized transcript.
///
/// Returns `None` when the operation was superseded or the session was
/// aborted; the caller must then stop without retrying.
async fn listen(shared: &Arc<Shared>, op: u64) -> Option<String> {
    if !set_state(shared, op, NarratorState::Listening) {
        return None;
    }

    let language_tag = lock(&shared.config).language.tag();
    let session = match shared.recognizer.open(language_tag) {
        Ok(session) => session,
        Err(err) => {
            // A transiently unavailable device behaves like silence.
            warn!(%err, "failed to open recognition session");
            return is_current(shared, op).then(String::new);
        }
    };
    let RecognitionSession {
        mut events,
        mut control,
    } = session;

    {
        let mut listener = lock(&shared.listener);
        if let Some((owner, mut prev)) = listener.take() {
            debug!(owner, "detaching superseded recognition session");
            prev.detach();
            prev.abort();
        }
        // Re-checked under the listener lock: a cancellation that bumped
        // the counter after the open either sees this slot filled, or this
        // session is released right here and never installed.
        if !is_current(shared, op) {
            debug!(op, "stale operation, releasing fresh recognition session");
            control.detach();
            control.abort();
            return None;
        }
        *listener = Some((op, control));
    }

    let outcome = listen_for_transcript(&mut events).await;

    // Release the session slot if it is still ours, stopping capture.
    {
        let mut listener = lock(&shared.listener);
        if listener.as_ref().is_some_and(|(owner, _)| *owner == op) {
            if let Some((_, mut control)) = listener.take() {
                control.abort();
            }
        }
    }

    if !is_current(shared, op) {
        debug!(op, "stale operation, discarding transcript");
        return None;
    }

    match outcome {
        ListenOutcome::Transcript(text) => Some(text),
        ListenOutcome::Aborted => None,
    }
}
