//! Two-culture comparison.
//!
//! Generates both viewpoints concurrently, feeds them back to the model for
//! a contrastive summary, and narrates only that summary.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::completion::{ChatBackend, ChatPrompt, OpenAIChat, ProviderConfig};
use crate::config::{Config, PromptsConfig};
use crate::error::CompareError;
use crate::narrator::{CommandPlayer, NarrationOutcome, Narrator, OpenAISpeech};
use crate::perspective::{
    PerspectiveGenerator, PromptRequest, require_non_empty, require_positive_budget,
};

/// Request body of the comparison endpoint.
///
/// `maxTokens` must be a non-negative JSON integer; fractional numbers such
/// as `50.0` fail to deserialize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRequest {
    pub culture_one: String,
    pub culture_two: String,
    pub question: String,
    pub max_tokens: u32,
}

impl ComparisonRequest {
    pub fn new(
        culture_one: impl Into<String>,
        culture_two: impl Into<String>,
        question: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            culture_one: culture_one.into(),
            culture_two: culture_two.into(),
            question: question.into(),
            max_tokens,
        }
    }

    pub fn validate(&self) -> Result<(), CompareError> {
        require_non_empty("cultureOne", &self.culture_one)?;
        require_non_empty("cultureTwo", &self.culture_two)?;
        require_non_empty("question", &self.question)?;
        require_positive_budget(self.max_tokens)
    }

    fn viewpoint_requests(&self) -> (PromptRequest, PromptRequest) {
        (
            PromptRequest::new(&self.culture_one, &self.question, self.max_tokens),
            PromptRequest::new(&self.culture_two, &self.question, self.max_tokens),
        )
    }
}

/// The three generated texts, serialized as `[viewpointOne, viewpointTwo, comparison]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(into = "[String; 3]", from = "[String; 3]")]
pub struct ComparisonResult {
    pub viewpoint_one: String,
    pub viewpoint_two: String,
    pub comparison: String,
}

impl From<ComparisonResult> for [String; 3] {
    fn from(result: ComparisonResult) -> Self {
        [result.viewpoint_one, result.viewpoint_two, result.comparison]
    }
}

impl From<[String; 3]> for ComparisonResult {
    fn from([viewpoint_one, viewpoint_two, comparison]: [String; 3]) -> Self {
        Self {
            viewpoint_one,
            viewpoint_two,
            comparison,
        }
    }
}

/// A comparison together with the outcome of narrating it.
#[derive(Debug)]
pub struct Comparison {
    pub result: ComparisonResult,
    pub narration: NarrationOutcome,
}

/// Compares how two cultures answer the same question.
pub struct Comparator {
    backend: Arc<dyn ChatBackend>,
    perspectives: PerspectiveGenerator,
    narrator: Arc<Narrator>,
    prompts: PromptsConfig,
}

impl Comparator {
    pub fn new(backend: Arc<dyn ChatBackend>, narrator: Arc<Narrator>, prompts: PromptsConfig) -> Self {
        let perspectives =
            PerspectiveGenerator::new(Arc::clone(&backend), Arc::clone(&narrator), prompts.clone());

        Self {
            backend,
            perspectives,
            narrator,
            prompts,
        }
    }

    /// Wire the OpenAI chat and speech backends and the command-line player.
    pub fn from_config(config: &Config, provider: &ProviderConfig) -> Result<Self, CompareError> {
        let http = provider.http_client(&config.models)?;

        let backend = Arc::new(OpenAIChat::new(provider, &config.models.chat_model, http.clone()));
        let speech = Arc::new(OpenAISpeech::new(provider, &config.models, http));
        let player = Arc::new(CommandPlayer::from_config(&config.narration));
        let narrator = Narrator::new(
            speech,
            player,
            config.narration.clone(),
            &config.models.response_format,
        );

        Ok(Self::new(backend, Arc::new(narrator), config.prompts.clone()))
    }

    /// Narrator shared with the perspective generator.
    pub fn narrator(&self) -> &Arc<Narrator> {
        &self.narrator
    }

    pub fn perspectives(&self) -> &PerspectiveGenerator {
        &self.perspectives
    }

    /// Build the comparison prompt from two generated viewpoints.
    pub fn prompt(
        &self,
        request: &ComparisonRequest,
        viewpoint_one: &str,
        viewpoint_two: &str,
    ) -> ChatPrompt {
        ChatPrompt::new(
            self.prompts.comparison_system(
                &request.culture_one,
                viewpoint_one,
                &request.culture_two,
                viewpoint_two,
            ),
            self.prompts.comparison_user(request.max_tokens),
        )
    }

    /// Run the comparison. Only the final comparison text is narrated.
    pub async fn compare(&self, request: &ComparisonRequest) -> Result<Comparison, CompareError> {
        request.validate()?;
        info!(
            culture_one = %request.culture_one,
            culture_two = %request.culture_two,
            max_tokens = request.max_tokens,
            "Comparing viewpoints"
        );

        let (first, second) = request.viewpoint_requests();
        let (one, two) = tokio::try_join!(
            self.perspectives.generate(&first, false),
            self.perspectives.generate(&second, false),
        )?;

        let comparison = self
            .backend
            .complete(&self.prompt(request, &one.text, &two.text), request.max_tokens)
            .await
            .inspect_err(|e| error!(error = %e, "Comparison generation failed"))?;

        let narration = self.narrator.narrate(&comparison).await;
        info!(narration = %narration, "Comparison complete");

        debug!("Culture One Viewpoint: {}", one.text);
        debug!("Culture Two Viewpoint: {}", two.text);
        debug!("Comparison: {}", comparison);

        Ok(Comparison {
            result: ComparisonResult {
                viewpoint_one: one.text,
                viewpoint_two: two.text,
                comparison,
            },
            narration,
        })
    }
}
