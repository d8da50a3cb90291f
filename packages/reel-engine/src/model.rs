use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Abstract interface for a generative model service.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Single-turn generation with a system and a user prompt.
    async fn generate(&self, model: &str, system: &str, prompt: &str) -> Result<String>;

    /// Chat-style completion over a message list.
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// HTTP client for an Ollama-compatible server.
#[derive(Clone)]
pub struct OllamaClient {
    pub host: String,
    pub timeout: Duration,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(180),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.host, path);
        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "model server returned {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn generate(&self, model: &str, system: &str, prompt: &str) -> Result<String> {
        tracing::debug!(model, prompt_len = prompt.len(), "generate request");
        let request = GenerateRequest {
            model,
            system,
            prompt,
            stream: false,
        };
        let response: GenerateResponse = self
            .post("/api/generate", &request)
            .await?
            .json()
            .await
            .context("malformed generate response")?;
        Ok(response.response)
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        tracing::debug!(model, messages = messages.len(), "chat request");
        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };
        let response: ChatResponse = self
            .post("/api/chat", &request)
            .await?
            .json()
            .await
            .context("malformed chat response")?;
        Ok(response.message.content)
    }
}

// Exposed for e2e and integration testing
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type MockResponseAction = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

    /// Replays queued responses in order. Each action receives the user-facing prompt.
    #[derive(Clone, Default)]
    pub struct MockModelClient {
        responses: Arc<Mutex<VecDeque<MockResponseAction>>>,
        calls: Arc<AtomicUsize>,
    }

    impl MockModelClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_response(&self, response: impl Into<String>) {
            let response = response.into();
            let mut guard = self.responses.lock().unwrap();
            guard.push_back(Box::new(move |_| Ok(response.clone())));
        }

        pub fn add_failure(&self, message: impl Into<String>) {
            let message = message.into();
            let mut guard = self.responses.lock().unwrap();
            guard.push_back(Box::new(move |_| Err(anyhow::anyhow!(message.clone()))));
        }

        pub fn add_action<F>(&self, action: F)
        where
            F: Fn(&str) -> Result<String> + Send + Sync + 'static,
        {
            let mut guard = self.responses.lock().unwrap();
            guard.push_back(Box::new(action));
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let action_opt = {
                let mut guard = self.responses.lock().unwrap();
                guard.pop_front()
            };

            if let Some(action) = action_opt {
                action(prompt)
            } else {
                Ok("MOCK_RESPONSE".to_string())
            }
        }
    }

    #[async_trait]
    impl ModelClient for MockModelClient {
        async fn generate(&self, _model: &str, _system: &str, prompt: &str) -> Result<String> {
            self.next(prompt)
        }

        async fn chat(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
            let prompt = messages
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            self.next(prompt)
        }
    }
}
