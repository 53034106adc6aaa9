//! Text-generation clients behind the agent's `LlmClient` seam.
//!
//! Gemini uses `generateContent` / `streamGenerateContent?alt=sse`. OpenAI
//! and Ollama share the OpenAI-compatible `/chat/completions` surface.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clientdesk_agent::llm::{LlmClient, TextStream};
use clientdesk_core::config::{LlmConfig, LlmProvider};
use eventsource_stream::Eventsource;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::warn;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const RETRY_BASE_DELAY_MS: u64 = 250;

#[derive(Clone)]
pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build text generation http client")?;
        let default_base = match config.provider {
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            LlmProvider::OpenAi => OPENAI_BASE_URL,
            LlmProvider::Ollama => OLLAMA_BASE_URL,
        };
        let base_url = config.base_url.as_deref().unwrap_or(default_base).trim_end_matches('/').to_string();

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    fn request(&self, prompt: &str, streaming: bool) -> RequestBuilder {
        match self.provider {
            LlmProvider::Gemini => {
                let url = if streaming {
                    format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, self.model)
                } else {
                    format!("{}/models/{}:generateContent", self.base_url, self.model)
                };
                let body = json!({"contents": [{"role": "user", "parts": [{"text": prompt}]}]});
                let mut request = self.client.post(url).json(&body);
                if let Some(key) = &self.api_key {
                    request = request.header("x-goog-api-key", key.expose_secret());
                }
                request
            }
            LlmProvider::OpenAi | LlmProvider::Ollama => {
                let body = json!({
                    "model": self.model,
                    "messages": [{"role": "user", "content": prompt}],
                    "stream": streaming,
                });
                let mut request = self.client.post(format!("{}/chat/completions", self.base_url)).json(&body);
                if let Some(key) = &self.api_key {
                    request = request.bearer_auth(key.expose_secret());
                }
                request
            }
        }
    }

    /// Retries transport failures, 429 and 5xx with linear backoff.
    async fn send(&self, prompt: &str, streaming: bool) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let outcome = self.request(prompt, streaming).send().await;
            let retryable = match &outcome {
                Ok(response) => is_retryable(response.status()),
                Err(error) => !error.is_builder(),
            };
            if retryable && attempt < self.max_retries {
                attempt += 1;
                warn!(
                    event_name = "llm.request.retry",
                    provider = ?self.provider,
                    attempt,
                    "retrying text generation request"
                );
                tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * u64::from(attempt))).await;
                continue;
            }

            let response = outcome.context("text generation request failed")?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("text generation endpoint returned {status}: {body}");
            }
            return Ok(response);
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self.send(prompt, false).await?;
        let body: Value = response.json().await.context("could not decode text generation response")?;
        let text = match self.provider {
            LlmProvider::Gemini => gemini_text(&body),
            LlmProvider::OpenAi | LlmProvider::Ollama => openai_text(&body, "message"),
        };
        text.ok_or_else(|| anyhow!("text generation response carried no text"))
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let response = self.send(prompt, true).await?;
        let provider = self.provider;
        let chunks = response
            .bytes_stream()
            .eventsource()
            .map_err(|error| anyhow!("text generation stream broke: {error}"))
            .try_filter_map(move |event| async move { event_text(provider, &event.data) })
            .boxed();
        Ok(chunks)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn gemini_text(body: &Value) -> Option<String> {
    let parts = body.pointer("/candidates/0/content/parts")?.as_array()?;
    let text = parts.iter().filter_map(|part| part.get("text").and_then(Value::as_str)).collect::<String>();
    Some(text)
}

fn openai_text(body: &Value, key: &str) -> Option<String> {
    body.pointer(&format!("/choices/0/{key}/content")).and_then(Value::as_str).map(str::to_string)
}

/// Text carried by the data of one server-sent event, if any.
fn event_text(provider: LlmProvider, data: &str) -> Result<Option<String>> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let event: Value = serde_json::from_str(data).context("malformed stream event")?;
    if let Some(error) = event.get("error") {
        bail!("text generation stream failed: {error}");
    }
    let text = match provider {
        LlmProvider::Gemini => gemini_text(&event),
        LlmProvider::OpenAi | LlmProvider::Ollama => openai_text(&event, "delta"),
    };
    Ok(text.filter(|text| !text.is_empty()))
}
