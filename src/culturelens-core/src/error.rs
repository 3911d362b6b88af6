//! Error types for viewpoint generation and narration.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Empty completion for {0}")]
    EmptyCompletion(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Narration failures. These never fail a request; they are reported
/// through [`crate::narrator::NarrationOutcome::Failed`].
#[derive(Error, Debug)]
pub enum NarrationError {
    #[error("Speech synthesis failed: {0}")]
    Speech(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Playback failed: {0}")]
    Playback(String),
}
