//! Testing utilities for the narration engine.
//!
//! This module provides deterministic substitutes for every external
//! dependency of the orchestrator:
//! - `FakeSynthesizer`, `FakeSink`, `FakeRecognizer`, `ScriptedInterpreter`
//! - `NarrationHarness` wiring them to a `Narrator` with an event drain
//! - Assertion helpers for verifying emitted events

use crate::interpreter::{ChoiceInterpreter, Interpretation, InterpreterError};
use crate::orchestrator::{Narrator, NarratorConfig, NarratorEvent, NarratorState};
use crate::playback::{AudioSink, EndedFn, SinkId};
use crate::recognition::{
    RecognitionError, RecognitionEvent, RecognitionSession, RecognizerDevice, SessionControl,
};
use crate::story::Language;
use crate::synthesis::{AudioClip, SynthesisError, Synthesizer, SAMPLE_RATE};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("test state poisoned")
}

// ============================================================================
// Synthesizer
// ============================================================================

/// A synthesizer that returns a short clip instantly and records every
/// utterance it was asked to speak.
pub struct FakeSynthesizer {
    spoken: Mutex<Vec<String>>,
    fail_next: AtomicBool,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
            gates: Mutex::new(VecDeque::new()),
        }
    }

    /// Every utterance synthesized so far, in order.
    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }

    /// Make the next synthesis call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Hold the next synthesis call until the returned sender fires.
    pub fn gate_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.gates).push_back(rx);
        tx
    }
}

impl Default for FakeSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _language: Language,
    ) -> Result<AudioClip, SynthesisError> {
        lock(&self.spoken).push(text.to_string());
        let gate = lock(&self.gates).pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(AudioClip {
            samples: vec![0.0; 240],
            sample_rate: SAMPLE_RATE,
        })
    }
}

// ============================================================================
// Audio sink
// ============================================================================

/// An audio sink that records starts and stops.
///
/// In `auto` mode every clip "plays to completion" immediately. In
/// `manual` mode the test fires completions itself, including late ones
/// for clips that were already stopped.
pub struct FakeSink {
    auto_finish: bool,
    next_id: AtomicU64,
    started: Mutex<Vec<(SinkId, f32)>>,
    stopped: Mutex<Vec<SinkId>>,
    pending: Mutex<VecDeque<EndedFn>>,
}

impl FakeSink {
    pub fn auto() -> Self {
        Self::new(true)
    }

    pub fn manual() -> Self {
        Self::new(false)
    }

    fn new(auto_finish: bool) -> Self {
        Self {
            auto_finish,
            next_id: AtomicU64::new(0),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Fire the oldest pending natural-completion callback.
    pub fn finish_next(&self) {
        let callback = lock(&self.pending).pop_front();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Fire all pending natural-completion callbacks, oldest first.
    pub fn finish_all(&self) {
        loop {
            let callback = lock(&self.pending).pop_front();
            match callback {
                Some(callback) => callback(),
                None => break,
            }
        }
    }

    pub fn started(&self) -> Vec<(SinkId, f32)> {
        lock(&self.started).clone()
    }

    pub fn rates(&self) -> Vec<f32> {
        lock(&self.started).iter().map(|(_, rate)| *rate).collect()
    }

    pub fn stopped(&self) -> Vec<SinkId> {
        lock(&self.stopped).clone()
    }

    pub fn start_count(&self) -> usize {
        lock(&self.started).len()
    }
}

impl AudioSink for FakeSink {
    fn start(&self, _clip: AudioClip, rate: f32, on_ended: EndedFn) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.started).push((id, rate));
        if self.auto_finish {
            on_ended();
        } else {
            lock(&self.pending).push_back(on_ended);
        }
        id
    }

    fn stop(&self, id: SinkId) {
        lock(&self.stopped).push(id);
    }
}

// ============================================================================
// Recognizer
// ============================================================================

/// Per-session record of control calls, for asserting the
/// detach-before-abort discipline.
#[derive(Clone)]
pub struct SessionLog {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl SessionLog {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }
}

struct FakeControl {
    log: SessionLog,
    sender: Option<mpsc::UnboundedSender<RecognitionEvent>>,
}

impl SessionControl for FakeControl {
    fn detach(&mut self) {
        lock(&self.log.calls).push("detach");
    }

    fn abort(&mut self) {
        lock(&self.log.calls).push("abort");
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(RecognitionEvent::Error(RecognitionError::Aborted));
        }
    }
}

/// A recognizer whose sessions replay scripted event feeds.
///
/// Each call to `open` consumes the next script; sessions with no script
/// stay silent until aborted. All opened sessions are logged for
/// inspection.
pub struct FakeRecognizer {
    scripts: Mutex<VecDeque<Vec<RecognitionEvent>>>,
    sessions: Mutex<Vec<SessionLog>>,
    languages: Mutex<Vec<String>>,
}

impl FakeRecognizer {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(Vec::new()),
            languages: Mutex::new(Vec::new()),
        }
    }

    /// Queue a session script: the events the next opened session emits.
    pub fn script_events(&self, events: Vec<RecognitionEvent>) {
        lock(&self.scripts).push_back(events);
    }

    /// Queue a session that immediately finalizes the given transcript.
    pub fn script_final(&self, transcript: &str) {
        self.script_events(vec![RecognitionEvent::Final(transcript.to_string())]);
    }

    /// Control logs of every session opened so far.
    pub fn sessions(&self) -> Vec<SessionLog> {
        lock(&self.sessions).clone()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Language tags the sessions were opened with.
    pub fn languages(&self) -> Vec<String> {
        lock(&self.languages).clone()
    }
}

impl Default for FakeRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognizerDevice for FakeRecognizer {
    fn open(&self, language_tag: &str) -> Result<RecognitionSession, RecognitionError> {
        lock(&self.languages).push(language_tag.to_string());

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(events) = lock(&self.scripts).pop_front() {
            for event in events {
                let _ = tx.send(event);
            }
        }

        let log = SessionLog::new();
        lock(&self.sessions).push(log.clone());

        Ok(RecognitionSession {
            events: rx,
            control: Box::new(FakeControl {
                log,
                sender: Some(tx),
            }),
        })
    }
}

// ============================================================================
// Interpreter
// ============================================================================

enum ScriptedResult {
    Choice(String),
    Unclear,
    Fail,
    /// Hold the interpretation until the gate fires, then resolve it.
    Gated(oneshot::Receiver<()>, Interpretation),
}

/// An interpreter that replays scripted results and records the
/// transcripts it was asked about.
pub struct ScriptedInterpreter {
    script: Mutex<VecDeque<ScriptedResult>>,
    transcripts: Mutex<Vec<String>>,
}

impl ScriptedInterpreter {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            transcripts: Mutex::new(Vec::new()),
        }
    }

    pub fn script_choice(&self, choice: &str) {
        lock(&self.script).push_back(ScriptedResult::Choice(choice.to_string()));
    }

    pub fn script_unclear(&self) {
        lock(&self.script).push_back(ScriptedResult::Unclear);
    }

    pub fn script_failure(&self) {
        lock(&self.script).push_back(ScriptedResult::Fail);
    }

    /// Script a result that stays pending until the returned sender fires.
    pub fn script_gated_choice(&self, choice: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.script).push_back(ScriptedResult::Gated(
            rx,
            Interpretation::Choice(choice.to_string()),
        ));
        tx
    }

    /// Transcripts received so far, in order.
    pub fn transcripts(&self) -> Vec<String> {
        lock(&self.transcripts).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.transcripts).len()
    }
}

impl Default for ScriptedInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChoiceInterpreter for ScriptedInterpreter {
    async fn interpret(
        &self,
        transcript: &str,
        _choices: &[String],
        _scene_text: &str,
        _language: Language,
    ) -> Result<Interpretation, InterpreterError> {
        lock(&self.transcripts).push(transcript.to_string());
        let next = lock(&self.script).pop_front();
        match next {
            Some(ScriptedResult::Choice(choice)) => Ok(Interpretation::Choice(choice)),
            Some(ScriptedResult::Unclear) | None => Ok(Interpretation::Unclear),
            Some(ScriptedResult::Fail) => Err(InterpreterError::EmptyAnswer),
            Some(ScriptedResult::Gated(gate, result)) => {
                let _ = gate.await;
                Ok(result)
            }
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Wires a [`Narrator`] to the fakes above and drains its events.
pub struct NarrationHarness {
    pub narrator: Narrator,
    pub events: mpsc::UnboundedReceiver<NarratorEvent>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub recognizer: Arc<FakeRecognizer>,
    pub sink: Arc<FakeSink>,
    pub interpreter: Arc<ScriptedInterpreter>,
}

impl NarrationHarness {
    /// Harness whose sink completes every clip immediately.
    pub fn new() -> Self {
        Self::with_sink(FakeSink::auto())
    }

    /// Harness whose sink waits for the test to fire completions.
    pub fn with_manual_sink() -> Self {
        Self::with_sink(FakeSink::manual())
    }

    fn with_sink(sink: FakeSink) -> Self {
        let synthesizer = Arc::new(FakeSynthesizer::new());
        let recognizer = Arc::new(FakeRecognizer::new());
        let sink = Arc::new(sink);
        let interpreter = Arc::new(ScriptedInterpreter::new());
        let (narrator, events) = Narrator::new(
            synthesizer.clone(),
            recognizer.clone(),
            sink.clone(),
            interpreter.clone(),
            NarratorConfig::new(Language::EnglishUs),
        );
        Self {
            narrator,
            events,
            synthesizer,
            recognizer,
            sink,
            interpreter,
        }
    }

    /// Receive the next narrator event, panicking after a timeout.
    pub async fn next_event(&mut self) -> NarratorEvent {
        tokio::time::timeout(Duration::from_secs(10), self.events.recv())
            .await
            .expect("timed out waiting for narrator event")
            .expect("narrator event channel closed")
    }

    /// Expect the next event to be the given state change.
    #[track_caller]
    pub async fn expect_state(&mut self, expected: NarratorState) {
        match self.next_event().await {
            NarratorEvent::State(state) if state == expected => {}
            other => panic!("expected state {expected:?}, got {other:?}"),
        }
    }

    /// Expect the next event to report the given selected choice.
    #[track_caller]
    pub async fn expect_choice(&mut self, expected: &str) {
        match self.next_event().await {
            NarratorEvent::ChoiceSelected { choice, .. } if choice == expected => {}
            other => panic!("expected choice {expected:?}, got {other:?}"),
        }
    }

    /// Expect the next event to be an error.
    #[track_caller]
    pub async fn expect_error(&mut self) {
        match self.next_event().await {
            NarratorEvent::Error(_) => {}
            other => panic!("expected an error event, got {other:?}"),
        }
    }

    /// Assert that no further event arrives within a short grace period.
    pub async fn expect_quiet(&mut self) {
        let waited =
            tokio::time::timeout(Duration::from_millis(100), self.events.recv()).await;
        if let Ok(Some(event)) = waited {
            panic!("expected no further events, got {event:?}");
        }
    }
}

impl Default for NarrationHarness {
    fn default() -> Self {
        Self::new()
    }
}
