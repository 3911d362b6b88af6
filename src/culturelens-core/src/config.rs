//! Configuration module for loading TOML config files.

use regex::{Captures, Regex};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::CompareError;

/// Port used when neither the CLI, the environment nor the config file set one.
pub const DEFAULT_PORT: u16 = 3000;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub narration: NarrationConfig,
    pub prompts: PromptsConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Provider models and speech settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub chat_model: String,
    pub speech_model: String,
    pub voice: String,
    pub speech_instructions: String,
    /// Audio encoding requested from the speech API; also the file extension.
    pub response_format: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat_model: "gpt-4o".to_string(),
            speech_model: "gpt-4o-mini-tts".to_string(),
            voice: "ash".to_string(),
            speech_instructions: "Speak clearly and authoritatively.".to_string(),
            response_format: "wav".to_string(),
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
        }
    }
}

/// Narration output and playback settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub enabled: bool,
    /// Directory that receives one audio file per narration.
    pub output_dir: PathBuf,
    /// External player program. Empty selects the platform default.
    pub player: String,
    /// Extra arguments passed to the player before the file path.
    pub player_args: Vec<String>,
    pub wait_for_playback: bool,
    pub keep_audio: bool,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("."),
            player: String::new(),
            player_args: Vec::new(),
            wait_for_playback: false,
            keep_audio: false,
        }
    }
}

/// Prompt templates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Placeholders: `{culture}`.
    pub viewpoint_system: String,
    /// Placeholders: `{question}`, `{max_tokens}`.
    pub viewpoint_user: String,
    /// Placeholders: `{culture_one}`, `{viewpoint_one}`, `{culture_two}`, `{viewpoint_two}`.
    pub comparison_system: String,
    /// Placeholders: `{max_tokens}`.
    pub comparison_user: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            viewpoint_system: DEFAULT_VIEWPOINT_SYSTEM.to_string(),
            viewpoint_user: DEFAULT_VIEWPOINT_USER.to_string(),
            comparison_system: DEFAULT_COMPARISON_SYSTEM.to_string(),
            comparison_user: DEFAULT_COMPARISON_USER.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CompareError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| CompareError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, CompareError> {
        toml::from_str(content)
            .map_err(|e| CompareError::ConfigError(format!("Failed to parse config: {}", e)))
    }
}

impl PromptsConfig {
    /// System prompt for a single cultural viewpoint.
    pub fn viewpoint_system(&self, culture: &str) -> String {
        render(&self.viewpoint_system, &[("culture", culture)])
    }

    /// User prompt for a single cultural viewpoint.
    pub fn viewpoint_user(&self, question: &str, max_tokens: u32) -> String {
        render(
            &self.viewpoint_user,
            &[("question", question), ("max_tokens", &max_tokens.to_string())],
        )
    }

    /// System prompt for the comparison, embedding both viewpoints.
    pub fn comparison_system(
        &self,
        culture_one: &str,
        viewpoint_one: &str,
        culture_two: &str,
        viewpoint_two: &str,
    ) -> String {
        render(
            &self.comparison_system,
            &[
                ("culture_one", culture_one),
                ("viewpoint_one", viewpoint_one),
                ("culture_two", culture_two),
                ("viewpoint_two", viewpoint_two),
            ],
        )
    }

    /// User prompt for the comparison.
    pub fn comparison_user(&self, max_tokens: u32) -> String {
        render(&self.comparison_user, &[("max_tokens", &max_tokens.to_string())])
    }
}

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// Fill `{name}` placeholders in one pass. Substituted values are never
/// scanned again; unknown placeholders are left as written.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| (*value).to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

const DEFAULT_VIEWPOINT_SYSTEM: &str = "You are a helpful AI explaining to a user. \
Your cultural perspective is {culture}, and you will answer the user from that perspective. \
Make sure your response sounds like it comes from someone of that culture. \
Heavily rely on the culture's viewpoints while answering the question.";

const DEFAULT_VIEWPOINT_USER: &str = "{question}. Answer in less than {max_tokens} tokens";

const DEFAULT_COMPARISON_SYSTEM: &str = r#"You are a helpful AI tasked with comparing and contrasting cultural viewpoints.
You will receive two cultural perspectives on the same question.
Analyze how they are similar and how they differ, and write a detailed comparison.

Culture One: {culture_one}
Viewpoint: {viewpoint_one}

Culture Two: {culture_two}
Viewpoint: {viewpoint_two}

Focus on how their values, beliefs, or historical context shape their answers."#;

const DEFAULT_COMPARISON_USER: &str =
    "Compare and Contrast both viewpoints provided. Answer in less than {max_tokens} tokens";
