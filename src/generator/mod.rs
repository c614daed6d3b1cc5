//! Generation backend abstraction.
//!
//! A [`Generator`] turns a question into streamed text. The resolver treats
//! it as an opaque, slow, expensive function: it is only ever called while
//! holding the lease for the question's key.
//!
//! - [`LlmGenerator`] (feature `llm`) — chat-completion backends via the
//!   `llm` crate, with one [`PromptTemplate`] per [`Category`].
//! - [`RetryingGenerator`] — decorator retrying transient connection errors.

#[cfg(feature = "llm")]
mod llm;
mod retry;

#[cfg(feature = "llm")]
pub use self::llm::{GeneratorConfig, LlmGenerator};
pub use retry::{RetryConfig, RetryingGenerator};

use std::future::{self, Future};
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::types::{Category, GenerateEvent};
use crate::{MimirError, Result};

/// Default per-request generator timeout, in seconds.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;

/// Boxed stream of generation events.
pub type GenerateStream = Pin<Box<dyn Stream<Item = Result<GenerateEvent>> + Send>>;

/// The external slow backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Start generating an answer for `text`.
    ///
    /// Errors returned here mean the stream never started; errors inside the
    /// stream mean it failed part way.
    async fn generate_stream(&self, category: Category, text: &str) -> Result<GenerateStream>;

    /// Generate and collect the full answer.
    async fn generate(&self, category: Category, text: &str) -> Result<String> {
        let stream = self.generate_stream(category, text).await?;
        accumulate(stream).await
    }
}

/// Drain a generation stream into its full text.
///
/// Stops at the first `Done` or error. Whitespace-only output is
/// [`MimirError::EmptyGeneration`].
pub async fn accumulate(stream: GenerateStream) -> Result<String> {
    accumulate_relayed(stream, |_| future::ready(false)).await
}

/// [`accumulate`], handing each fragment to `relay` as it arrives.
///
/// `relay` returns `false` once its reader is gone; the rest of the stream
/// is still collected but no longer relayed.
pub async fn accumulate_relayed<F, Fut>(
    mut stream: GenerateStream,
    mut relay: F,
) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut text = String::new();
    let mut relaying = true;
    while let Some(event) = stream.next().await {
        match event? {
            GenerateEvent::Text(chunk) => {
                if relaying {
                    relaying = relay(chunk.clone()).await;
                }
                text.push_str(&chunk);
            }
            GenerateEvent::Done => break,
        }
    }
    if text.trim().is_empty() {
        return Err(MimirError::EmptyGeneration);
    }
    Ok(text)
}

/// System and user prompt for one category.
///
/// `{text}` in `user` is replaced by the question text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

impl PromptTemplate {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Built-in template for `category`.
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Code => Self::new(
                "You are a professional code explanation assistant.",
                "Explain the following code in a single paragraph of at most 300 words.\n\n{text}",
            ),
            Category::Article => Self::new(
                "You are a professional technical article analysis assistant.",
                "Write an abstract and a summary of the following article. \
                 Reply with exactly two sections, 'Abstract:' and 'Summary:', and nothing else. \
                 If the article is empty or meaningless, reply with 'nil'.\n\n{text}",
            ),
        }
    }

    pub fn render(&self, text: &str) -> String {
        self.user.replace("{text}", text)
    }
}
