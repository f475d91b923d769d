//! Spoken-choice interpretation.
//!
//! Maps a raw transcript onto one of the step's choices using Claude,
//! with a defensive matching layer that only ever accepts strings
//! literally present in the candidate list.

use crate::story::Language;
use async_trait::async_trait;
use thiserror::Error;

/// Sentinel answer the model returns when the utterance matches no choice.
pub const UNCLEAR: &str = "UNCLEAR";

/// Errors from choice interpretation.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("Claude API error: {0}")]
    Api(#[from] claude::Error),

    #[error("model returned an empty answer")]
    EmptyAnswer,
}

/// Outcome of interpreting one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// One of the candidate choices, verbatim.
    Choice(String),
    /// The utterance could not be mapped to a candidate.
    Unclear,
}

/// Disambiguates a transcript against the current step's choices.
#[async_trait]
pub trait ChoiceInterpreter: Send + Sync {
    async fn interpret(
        &self,
        transcript: &str,
        choices: &[String],
        scene_text: &str,
        language: Language,
    ) -> Result<Interpretation, InterpreterError>;
}

/// Claude-backed interpreter.
pub struct ClaudeInterpreter {
    client: claude::Claude,
    max_tokens: usize,
}

impl ClaudeInterpreter {
    pub fn new(client: claude::Claude) -> Self {
        Self {
            client,
            max_tokens: 64,
        }
    }

    /// Create an interpreter from the ANTHROPIC_API_KEY environment
    /// variable.
    pub fn from_env() -> Result<Self, InterpreterError> {
        Ok(Self::new(claude::Claude::from_env()?))
    }

    fn build_system_prompt(language: Language) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "You match a player's spoken reply to one of the choices offered \
             by an interactive story. The reply is a speech-recognition \
             transcript and may be hesitant or noisy. Answer with the chosen \
             option exactly as written, character for character, and nothing \
             else. If the reply does not clearly indicate one of the options, \
             answer with the single word UNCLEAR.",
        );
        prompt.push_str("\nThe player is speaking ");
        prompt.push_str(language.name());
        prompt.push('.');
        prompt
    }

    fn build_user_prompt(transcript: &str, choices: &[String], scene_text: &str) -> String {
        let mut prompt = String::new();
        prompt.push_str("## Scene\n");
        prompt.push_str(scene_text);
        prompt.push_str("\n\n## Options\n");
        for choice in choices {
            prompt.push_str("- ");
            prompt.push_str(choice);
            prompt.push('\n');
        }
        prompt.push_str("\n## Player said\n");
        prompt.push_str(transcript);
        prompt
    }
}

#[async_trait]
impl ChoiceInterpreter for ClaudeInterpreter {
    async fn interpret(
        &self,
        transcript: &str,
        choices: &[String],
        scene_text: &str,
        language: Language,
    ) -> Result<Interpretation, InterpreterError> {
        // An empty transcript can never match a choice; skip the call.
        if transcript.trim().is_empty() {
            return Ok(Interpretation::Unclear);
        }

        let system = Self::build_system_prompt(language);
        let user = Self::build_user_prompt(transcript, choices, scene_text);
        let request = claude::Request::new(vec![claude::Message::user(user)])
            .with_system(system)
            .with_max_tokens(self.max_tokens)
            .with_temperature(0.0);

        let response = self.client.complete(request).await?;
        let answer = response.text();
        if answer.trim().is_empty() {
            return Err(InterpreterError::EmptyAnswer);
        }

        Ok(match resolve_choice(answer, choices) {
            Some(choice) => Interpretation::Choice(choice.to_string()),
            None => Interpretation::Unclear,
        })
    }
}

/// Match a raw model answer against the candidate list.
///
/// Exact match is tried first, after stripping wrapping whitespace,
/// quotes, and punctuation. Verbose answers fall back to substring
/// containment (first candidate in list order wins). Text not literally
/// present in the candidates is never accepted.
pub fn resolve_choice<'a>(raw: &str, choices: &'a [String]) -> Option<&'a str> {
    let cleaned = raw.trim_matches(|c: char| {
        c.is_whitespace()
            || c.is_ascii_punctuation()
            || matches!(c, '\u{201c}' | '\u{201d}' | '\u{2018}' | '\u{2019}')
    });

    if cleaned.eq_ignore_ascii_case(UNCLEAR) {
        return None;
    }

    if let Some(choice) = choices
        .iter()
        .find(|c| cleaned.eq_ignore_ascii_case(c.as_str()))
    {
        return Some(choice.as_str());
    }

    let raw_lower = raw.to_lowercase();
    choices
        .iter()
        .find(|c| raw_lower.contains(&c.to_lowercase()))
        .map(|c| c.as_str())
}
