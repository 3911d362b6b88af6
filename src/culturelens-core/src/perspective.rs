//! Single-culture viewpoints.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use crate::completion::{ChatBackend, ChatPrompt};
use crate::config::PromptsConfig;
use crate::error::CompareError;
use crate::narrator::{NarrationOutcome, Narrator};

/// A question to answer from one cultural perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptRequest {
    /// Cultural label, e.g. "Japanese".
    pub culture: String,
    pub question: String,
    /// Generation limit passed to the provider.
    pub max_tokens: u32,
}

impl PromptRequest {
    pub fn new(culture: impl Into<String>, question: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            culture: culture.into(),
            question: question.into(),
            max_tokens,
        }
    }

    pub fn validate(&self) -> Result<(), CompareError> {
        require_non_empty("culture", &self.culture)?;
        require_non_empty("question", &self.question)?;
        require_positive_budget(self.max_tokens)
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), CompareError> {
    if value.trim().is_empty() {
        return Err(CompareError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

pub(crate) fn require_positive_budget(max_tokens: u32) -> Result<(), CompareError> {
    if max_tokens == 0 {
        return Err(CompareError::InvalidRequest(
            "max_tokens must be positive".to_string(),
        ));
    }
    Ok(())
}

/// One generated viewpoint.
#[derive(Debug)]
pub struct Viewpoint {
    pub culture: String,
    pub text: String,
    pub narration: NarrationOutcome,
}

/// Answers questions from a single cultural perspective.
pub struct PerspectiveGenerator {
    backend: Arc<dyn ChatBackend>,
    narrator: Arc<Narrator>,
    prompts: PromptsConfig,
}

impl PerspectiveGenerator {
    pub fn new(backend: Arc<dyn ChatBackend>, narrator: Arc<Narrator>, prompts: PromptsConfig) -> Self {
        Self {
            backend,
            narrator,
            prompts,
        }
    }

    /// Build the system and user messages for `request`.
    pub fn prompt(&self, request: &PromptRequest) -> ChatPrompt {
        ChatPrompt::new(
            self.prompts.viewpoint_system(&request.culture),
            self.prompts.viewpoint_user(&request.question, request.max_tokens),
        )
    }

    /// Generate the viewpoint, speaking it aloud when `narrate` is set.
    pub async fn generate(
        &self,
        request: &PromptRequest,
        narrate: bool,
    ) -> Result<Viewpoint, CompareError> {
        request.validate()?;

        let text = self
            .backend
            .complete(&self.prompt(request), request.max_tokens)
            .await
            .inspect_err(|e| error!(culture = %request.culture, error = %e, "Viewpoint generation failed"))?;

        debug!(culture = %request.culture, "{}", text);

        let narration = if narrate {
            self.narrator.narrate(&text).await
        } else {
            NarrationOutcome::Skipped
        };

        Ok(Viewpoint {
            culture: request.culture.clone(),
            text,
            narration,
        })
    }
}
