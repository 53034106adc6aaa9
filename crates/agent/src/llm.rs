use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clientdesk_core::errors::{ApplicationError, UpstreamService};
use futures::stream::{self, BoxStream, StreamExt};

/// Incremental model output; each item is the next chunk of text.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Clients without native streaming yield the whole completion as one chunk.
    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let text = self.complete(prompt).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

/// Model failures are transient from the caller's point of view.
pub fn text_generation_error(error: anyhow::Error) -> ApplicationError {
    ApplicationError::upstream(UpstreamService::TextGeneration, format!("{error:#}"), true)
}

/// Replays canned completions in order and keeps every prompt it was given.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|replies| replies.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut replies = self.replies.lock().map_err(|_| anyhow!("scripted replies lock poisoned"))?;
        replies.pop_front().ok_or_else(|| anyhow!("no scripted reply left for prompt"))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::{LlmClient, ScriptedLlm};

    #[tokio::test]
    async fn scripted_replies_are_served_in_order() {
        let llm = ScriptedLlm::new(["first", "second"]);
        assert_eq!(llm.complete("a").await.ok().as_deref(), Some("first"));
        assert_eq!(llm.complete("b").await.ok().as_deref(), Some("second"));
        assert!(llm.complete("c").await.is_err());
        assert_eq!(llm.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn default_stream_yields_the_whole_completion() {
        let llm = ScriptedLlm::new(["all at once"]);
        let stream = llm.complete_stream("prompt").await.expect("stream");
        let chunks = stream.collect::<Vec<_>>().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().ok().map(String::as_str), Some("all at once"));
    }
}
