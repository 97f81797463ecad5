use crate::types::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Single blocking-call seam to the text-generation backend. The classifier
/// is the only caller; it converts every failure into a tagged verdict rather
/// than letting errors escape further up.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Run one generation request and return the produced text.
    async fn complete(&self, model: &str, prompt: &str, max_tokens: u32) -> Result<String>;
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// HTTP backend speaking the Anthropic messages API shape.
///
/// Configured from the environment: `LLM_API_KEY` (required for real calls)
/// and `LLM_API_BASE` (defaults to the public endpoint).
pub struct HttpLlmBackend {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
}

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

impl HttpLlmBackend {
    pub fn new(api_key: String, api_base: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("newsbrief/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            api_key,
            api_base,
        }
    }

    pub fn from_env() -> Self {
        let api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
        let api_base =
            std::env::var("LLM_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self::new(api_key, api_base)
    }
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn complete(&self, model: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = MessageRequest {
            model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(
            "Sending generation request: model={}, prompt={} chars",
            model,
            prompt.len()
        );

        let response = self
            .http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::Backend(format!("HTTP {}: {}", status, detail)));
        }

        let parsed: MessageResponse = response.json().await?;
        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default();

        Ok(text)
    }
}

type MockHandler = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Scripted backend for tests: answers via a caller-supplied handler and
/// records every prompt it was asked.
pub struct MockLlmBackend {
    handler: MockHandler,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmBackend {
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Backend that answers every request with the same text.
    pub fn returning(text: &str) -> Self {
        let text = text.to_string();
        Self::with_handler(move |_| Ok(text.clone()))
    }

    /// Backend whose every call fails with a transport-style error.
    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::with_handler(move |_| Err(PipelineError::Backend(message.clone())))
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().expect("prompt log poisoned").len()
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    async fn complete(&self, _model: &str, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.prompts
            .lock()
            .expect("prompt log poisoned")
            .push(prompt.to_string());
        (self.handler)(prompt)
    }
}
