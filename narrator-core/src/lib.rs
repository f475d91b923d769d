//! Voice narration engine for an interactive story.
//!
//! This crate reads freshly generated story steps aloud, asks the player
//! which option they pick, listens to the microphone, and maps the spoken
//! reply onto one of the step's choices with Claude. The host application
//! supplies the platform audio devices and receives results over an event
//! channel.
//!
//! # Example
//!
//! ```no_run
//! use narrator_core::{
//!     ClaudeInterpreter, Language, Narrator, NarratorConfig, StoryStep,
//! };
//! use narrator_core::synthesis::HttpSynthesizer;
//! use std::sync::Arc;
//!
//! # async fn run(
//! #     recognizer: Arc<dyn narrator_core::recognition::RecognizerDevice>,
//! #     sink: Arc<dyn narrator_core::playback::AudioSink>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let synthesizer = Arc::new(HttpSynthesizer::from_env()?);
//! let interpreter = Arc::new(ClaudeInterpreter::from_env()?);
//! let (narrator, mut events) = Narrator::new(
//!     synthesizer,
//!     recognizer,
//!     sink,
//!     interpreter,
//!     NarratorConfig::new(Language::EnglishUs),
//! );
//!
//! let step = StoryStep::new(
//!     "You stand at a fork in the road.",
//!     vec!["Go left".to_string(), "Go right".to_string()],
//! );
//! narrator.start_for_step(&step);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod interpreter;
pub mod orchestrator;
pub mod playback;
pub mod recognition;
pub mod story;
pub mod synthesis;
pub mod testing;

pub use interpreter::{ChoiceInterpreter, ClaudeInterpreter, Interpretation, InterpreterError};
pub use orchestrator::{
    Narrator, NarratorConfig, NarratorError, NarratorEvent, NarratorState, MAX_RETRIES,
};
pub use playback::{AudioSink, PlaybackScheduler, SinkId};
pub use recognition::{
    RecognitionError, RecognitionEvent, RecognitionSession, RecognizerDevice, SessionControl,
};
pub use story::{Language, PlaybackRate, StepId, StoryStep};
pub use synthesis::{AudioClip, SynthesisError, Synthesizer};
