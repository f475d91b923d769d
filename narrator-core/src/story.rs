//! Story data model and per-language narration text.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a story step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One turn of the story: narrative text plus the choices offered to the
/// player.
///
/// Steps are produced by the story generation pipeline and handed to the
/// narrator read-only. Only the host mutates a step, by recording `chosen`
/// after a choice has been reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryStep {
    pub id: StepId,
    pub narrative: String,
    pub choices: Vec<String>,
    #[serde(default)]
    pub chosen: Option<String>,
}

impl StoryStep {
    pub fn new(narrative: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            id: StepId::new(),
            narrative: narrative.into(),
            choices,
            chosen: None,
        }
    }

    /// Whether this step is still waiting for the player to pick a choice.
    pub fn awaiting_choice(&self) -> bool {
        self.chosen.is_none()
    }
}

/// Narration and recognition language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    EnglishUs,
    SpanishEs,
    FrenchFr,
}

impl Language {
    /// Region-qualified tag passed to the recognition device.
    pub fn tag(&self) -> &'static str {
        match self {
            Language::EnglishUs => "en-US",
            Language::SpanishEs => "es-ES",
            Language::FrenchFr => "fr-FR",
        }
    }

    /// English name, used in interpretation prompts.
    pub fn name(&self) -> &'static str {
        match self {
            Language::EnglishUs => "English",
            Language::SpanishEs => "Spanish",
            Language::FrenchFr => "French",
        }
    }

    /// Spoken prompt listing the available choices.
    pub fn choice_prompt(&self, choices: &[String]) -> String {
        let listed = join_spoken(choices, self.or_word());
        match self {
            Language::EnglishUs => format!("Which will you choose: {listed}?"),
            Language::SpanishEs => format!("¿Qué eliges: {listed}?"),
            Language::FrenchFr => format!("Que choisis-tu : {listed} ?"),
        }
    }

    /// Spoken prompt after an utterance could not be matched to a choice.
    pub fn retry_prompt(&self) -> &'static str {
        match self {
            Language::EnglishUs => "Sorry, I didn't catch that. Which will you choose?",
            Language::SpanishEs => "Perdona, no te he entendido. ¿Qué eliges?",
            Language::FrenchFr => "Désolé, je n'ai pas compris. Que choisis-tu ?",
        }
    }

    /// Spoken message after the final failed attempt.
    pub fn give_up_prompt(&self) -> &'static str {
        match self {
            Language::EnglishUs => {
                "I still couldn't understand you. Please pick a choice by hand."
            }
            Language::SpanishEs => {
                "Sigo sin entenderte. Por favor, elige una opción con la mano."
            }
            Language::FrenchFr => {
                "Je ne te comprends toujours pas. Choisis une option à la main."
            }
        }
    }

    /// Default spoken phrase that cancels voice selection.
    pub fn stop_phrase(&self) -> &'static str {
        match self {
            Language::EnglishUs => "stop",
            Language::SpanishEs => "para",
            Language::FrenchFr => "stop",
        }
    }

    fn or_word(&self) -> &'static str {
        match self {
            Language::EnglishUs => "or",
            Language::SpanishEs => "o",
            Language::FrenchFr => "ou",
        }
    }
}

/// Join choices for speech: "A, B or C".
fn join_spoken(choices: &[String], or_word: &str) -> String {
    match choices {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => {
            let head = init
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{head} {or_word} {last}")
        }
    }
}

/// Narration speed applied uniformly to every utterance in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackRate {
    Normal,
    Faster,
    Fastest,
}

impl PlaybackRate {
    pub fn multiplier(&self) -> f32 {
        match self {
            PlaybackRate::Normal => 1.0,
            PlaybackRate::Faster => 1.25,
            PlaybackRate::Fastest => 1.5,
        }
    }
}

impl Default for PlaybackRate {
    fn default() -> Self {
        PlaybackRate::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choices(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_awaiting_choice() {
        let mut step = StoryStep::new("You stand at a fork.", choices(&["Left", "Right"]));
        assert!(step.awaiting_choice());

        step.chosen = Some("Left".to_string());
        assert!(!step.awaiting_choice());
    }

    #[test]
    fn test_step_ids_are_unique() {
        let a = StoryStep::new("a", vec![]);
        let b = StoryStep::new("b", vec![]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_choice_prompt_lists_all_choices() {
        let prompt =
            Language::EnglishUs.choice_prompt(&choices(&["Open the door", "Run away", "Wait"]));
        assert_eq!(
            prompt,
            "Which will you choose: Open the door, Run away or Wait?"
        );
    }

    #[test]
    fn test_choice_prompt_single_choice() {
        let prompt = Language::EnglishUs.choice_prompt(&choices(&["Wait"]));
        assert_eq!(prompt, "Which will you choose: Wait?");
    }

    #[test]
    fn test_playback_rate_multipliers() {
        assert_eq!(PlaybackRate::Normal.multiplier(), 1.0);
        assert_eq!(PlaybackRate::Faster.multiplier(), 1.25);
        assert_eq!(PlaybackRate::Fastest.multiplier(), 1.5);
    }

    #[test]
    fn test_language_tags() {
        assert_eq!(Language::EnglishUs.tag(), "en-US");
        assert_eq!(Language::SpanishEs.tag(), "es-ES");
        assert_eq!(Language::FrenchFr.tag(), "fr-FR");
    }

    #[test]
    fn test_step_round_trips_through_json() {
        let step = StoryStep::new("You stand at a fork.", choices(&["Left", "Right", "Back"]));
        let json = serde_json::to_string(&step).unwrap();
        let back: StoryStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, step.id);
        assert_eq!(back.choices, step.choices);
        assert!(back.awaiting_choice());
    }
}
