//! CultureLens Core Library
//!
//! Generates single-culture viewpoints with an OpenAI-compatible model,
//! compares two of them, and narrates the comparison aloud.

pub mod comparator;
pub mod completion;
pub mod config;
pub mod error;
pub mod narrator;
pub mod perspective;

pub use comparator::{Comparator, Comparison, ComparisonRequest, ComparisonResult};
pub use completion::{ChatBackend, ChatPrompt, OpenAIChat, ProviderConfig};
pub use config::{Config, default_config};
pub use error::{CompareError, NarrationError};
pub use narrator::{AudioPlayer, CommandPlayer, NarrationOutcome, Narrator, OpenAISpeech, SpeechBackend};
pub use perspective::{PerspectiveGenerator, PromptRequest, Viewpoint};
