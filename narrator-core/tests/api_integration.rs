//! Integration tests that call the real Claude API.
//!
//! These tests require ANTHROPIC_API_KEY to be set (via .env file or
//! environment). Run with:
//! `cargo test -p narrator-core --test api_integration -- --ignored`
//!
//! These are marked #[ignore] by default to avoid:
//! - API costs in CI
//! - Test failures when no API key is available
//! - Slow test runs (API calls take seconds)

use narrator_core::{ChoiceInterpreter, ClaudeInterpreter, Interpretation, Language};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

fn choices() -> Vec<String> {
    vec![
        "Open the door".to_string(),
        "Run away".to_string(),
        "Wait and listen".to_string(),
    ]
}

const SCENE: &str = "You stand before an old oak door. Something scratches \
                     at the wood from the other side.";

#[tokio::test]
#[ignore] // Run with: cargo test -p narrator-core --test api_integration -- --ignored
async fn test_interpreter_maps_hesitant_reply_to_choice() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let interpreter = ClaudeInterpreter::from_env().expect("Failed to create interpreter");
    let result = interpreter
        .interpret(
            "um, I guess I'll just run for it",
            &choices(),
            SCENE,
            Language::EnglishUs,
        )
        .await
        .expect("interpretation should succeed");

    assert_eq!(result, Interpretation::Choice("Run away".to_string()));
}

#[tokio::test]
#[ignore]
async fn test_interpreter_reports_unrelated_reply_as_unclear() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let interpreter = ClaudeInterpreter::from_env().expect("Failed to create interpreter");
    let result = interpreter
        .interpret(
            "what was the weather like yesterday",
            &choices(),
            SCENE,
            Language::EnglishUs,
        )
        .await
        .expect("interpretation should succeed");

    assert_eq!(result, Interpretation::Unclear);
}
