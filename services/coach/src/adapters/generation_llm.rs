//! services/coach/src/adapters/generation_llm.rs
//!
//! This module contains the adapter for the content-generating LLM.
//! It implements the `GenerationService` port from the `core` crate against any
//! OpenAI-compatible chat completions endpoint.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use titanfit_core::{
    domain::{Goal, Language, UserProfile},
    ports::{GenerationService, PortError, PortResult},
};
use tracing::{debug, instrument};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiGenerationAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGenerationAdapter {
    /// Creates a new `OpenAiGenerationAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// Builds the client for `api_base` (for example Gemini's OpenAI-compatible endpoint).
    pub fn from_credentials(api_key: &str, api_base: &str, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        Self::new(Client::with_config(config), model)
    }

    /// Sends one system + user exchange and returns the text of the first choice.
    async fn complete(
        &self,
        system: String,
        user: String,
        json_object: bool,
    ) -> PortResult<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(messages).n(1);
        if json_object {
            builder.response_format(ResponseFormat::JsonObject);
        }
        let request = builder
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                PortError::Unexpected("Generation LLM returned no choices in its response.".to_string())
            })?
            .message
            .content
            .ok_or_else(|| {
                PortError::Unexpected("Generation LLM response contained no text content.".to_string())
            })?;

        debug!(chars = content.len(), "Generation LLM responded.");
        Ok(content)
    }
}

fn profile_json(profile: &UserProfile) -> PortResult<String> {
    serde_json::to_string(profile).map_err(|e| PortError::Unexpected(e.to_string()))
}

fn coach_persona(profile: &UserProfile) -> PortResult<String> {
    Ok(format!(
        "You are Titan, a world-class fitness coach. Be concise and motivational. \
         Respond in {}. Gender: {}. Context: {}. \
         When the user asks for a diet or workout plan, append a single JSON object of the form \
         {{\"planData\": {{\"title\": string, \"type\": \"diet\" | \"workout\", \
         \"rows\": [{{\"col1\": string, \"col2\": string, \"col3\": string}}], \"summary\": string}}}} \
         after your message.",
        profile.language.name(),
        profile.gender.as_str(),
        profile_json(profile)?
    ))
}

//=========================================================================================
// `GenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl GenerationService for OpenAiGenerationAdapter {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate_workout(&self, profile: &UserProfile) -> PortResult<String> {
        let system = "You design daily weight loss workouts. Respond only with a JSON object with the \
            fields name (string), duration (string), intensity (string) and exercises, an array of \
            objects with name (string), sets (number), reps (string), description (string) and \
            muscleGroup (string)."
            .to_string();
        let user = format!(
            "Create a weight loss workout JSON for: {}. Respond only with JSON.",
            profile_json(profile)?
        );
        self.complete(system, user, true).await
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate_meal_plan(&self, profile: &UserProfile) -> PortResult<String> {
        // The meal plan is a top-level array, which the JSON-object response mode cannot express.
        let system = "You design daily weight loss meal plans. Respond only with a JSON array of \
            objects with the fields time (string), name (string), calories (number), protein \
            (number), carbs (number) and fat (number)."
            .to_string();
        let user = format!(
            "Generate daily weight loss meal plan array JSON: {}.",
            profile_json(profile)?
        );
        self.complete(system, user, false).await
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn chat(&self, message: &str, profile: &UserProfile) -> PortResult<String> {
        self.complete(coach_persona(profile)?, message.to_string(), false)
            .await
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn fitness_tips(&self, goal: Goal, language: Language) -> PortResult<String> {
        let system = "You are a fitness research assistant. Write one tip per line.".to_string();
        let user = format!(
            "List top 3 weight loss tips for {}. Respond in {}.",
            goal.as_str(),
            language.name()
        );
        self.complete(system, user, false).await
    }
}
