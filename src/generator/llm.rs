//! `llm` crate backed generator.
//!
//! Providers are built per request because the system prompt and
//! temperature depend on the category, and the `llm` crate fixes both at
//! build time.

use async_trait::async_trait;
use futures_util::StreamExt;
use llm::LLMProvider;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::{ChatMessage, StreamChunk};
use tracing::instrument;

use super::{DEFAULT_GENERATION_TIMEOUT_SECS, GenerateStream, Generator, PromptTemplate};
use crate::types::{Category, GenerateEvent};
use crate::{MimirError, Result};

/// Backend, model and per-category prompt settings for [`LlmGenerator`].
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// One of "openai", "anthropic", "openrouter", "ollama", "google".
    pub backend: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Override the backend's default endpoint (OpenAI-compatible gateways, Ollama).
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: Option<u32>,
    pub code_temperature: f32,
    pub article_temperature: f32,
    pub code_prompt: PromptTemplate,
    pub article_prompt: PromptTemplate,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
            max_tokens: None,
            code_temperature: 0.8,
            article_temperature: 0.8,
            code_prompt: PromptTemplate::for_category(Category::Code),
            article_prompt: PromptTemplate::for_category(Category::Article),
        }
    }
}

impl GeneratorConfig {
    pub fn new(backend: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn prompt(mut self, category: Category, template: PromptTemplate) -> Self {
        match category {
            Category::Code => self.code_prompt = template,
            Category::Article => self.article_prompt = template,
        }
        self
    }

    fn prompt_for(&self, category: Category) -> &PromptTemplate {
        match category {
            Category::Code => &self.code_prompt,
            Category::Article => &self.article_prompt,
        }
    }

    fn temperature_for(&self, category: Category) -> f32 {
        match category {
            Category::Code => self.code_temperature,
            Category::Article => self.article_temperature,
        }
    }
}

fn parse_backend(name: &str) -> Result<LLMBackend> {
    match name {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "openrouter" => Ok(LLMBackend::OpenRouter),
        "ollama" => Ok(LLMBackend::Ollama),
        "google" => Ok(LLMBackend::Google),
        other => Err(MimirError::Configuration(format!(
            "unknown generator backend '{other}'"
        ))),
    }
}

/// Generator calling a chat-completion backend through the `llm` crate.
pub struct LlmGenerator {
    backend: LLMBackend,
    config: GeneratorConfig,
}

impl LlmGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let backend = parse_backend(&config.backend)?;
        if config.api_key.is_none() && backend != LLMBackend::Ollama {
            return Err(MimirError::Configuration(format!(
                "generator backend '{}' requires an API key",
                config.backend
            )));
        }
        Ok(Self { backend, config })
    }

    fn build_provider(&self, category: Category) -> Result<Box<dyn LLMProvider>> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .model(&self.config.model)
            .timeout_seconds(self.config.timeout_secs)
            .system(self.config.prompt_for(category).system.clone())
            .temperature(self.config.temperature_for(category));
        if let Some(ref key) = self.config.api_key {
            builder = builder.api_key(key);
        }
        if let Some(ref url) = self.config.base_url {
            builder = builder.base_url(url.clone());
        }
        if let Some(max) = self.config.max_tokens {
            builder = builder.max_tokens(max);
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    fn name(&self) -> &str {
        &self.config.backend
    }

    #[instrument(name = "llm.generate_stream", skip(self, text), fields(model = %self.config.model, category = %category))]
    async fn generate_stream(&self, category: Category, text: &str) -> Result<GenerateStream> {
        let provider = self.build_provider(category)?;
        let prompt = self.config.prompt_for(category).render(text);
        let messages = vec![ChatMessage::user().content(prompt).build()];

        let stream = provider
            .chat_stream_with_tools(&messages, provider.tools())
            .await?;

        // keep text and completion, drop reasoning and tool chatter
        let events = stream.filter_map(|chunk| async {
            match chunk {
                Ok(StreamChunk::Text(text)) => Some(Ok(GenerateEvent::Text(text))),
                Ok(StreamChunk::Done { .. }) => Some(Ok(GenerateEvent::Done)),
                Ok(_) => None,
                Err(e) => Some(Err(MimirError::from(e))),
            }
        });

        Ok(Box::pin(events))
    }
}
