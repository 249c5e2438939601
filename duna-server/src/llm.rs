//! Text-generation client for contract source.
//!
//! Talks to any OpenAI-compatible chat-completions endpoint. One prompt in,
//! one block of generated text out. The client never retries; wrap it in
//! [`Retrying`] when the caller wants that.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Longest slice of an error response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request to generation endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("generation endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed generation response: {0}")]
    Malformed(String),
}

/// Something that turns a prompt into generated text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Generation endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

/// Response from a completions endpoint.
///
/// Chat endpoints put the text in `choices[0].message.content`; legacy
/// completion endpoints use `choices[0].text`. Both are accepted.
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Option<ChoiceMessage>,
    pub text: Option<String>,
    /// `length` means the output was cut off at `max_tokens`.
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

impl CompletionResponse {
    /// The generated text of the first choice.
    pub fn into_text(self) -> Result<String, GenerationError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::Malformed("response has no choices".into()))?;
        if choice.finish_reason.as_deref() == Some("length") {
            return Err(GenerationError::Malformed(
                "generation truncated at max_tokens".into(),
            ));
        }
        let text = choice
            .message
            .and_then(|m| m.content)
            .or(choice.text)
            .ok_or_else(|| GenerationError::Malformed("choice has no text".into()))?;
        if text.trim().is_empty() {
            return Err(GenerationError::Malformed("generated text is empty".into()));
        }
        Ok(text)
    }
}

/// HTTP client for the generation endpoint.
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut req = self.http.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(GenerationError::Status { status, body });
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        let text = parsed.into_text()?;
        tracing::debug!(model = %self.config.model, chars = text.len(), "Generated contract source");
        Ok(text)
    }
}

/// Caller-side retry around any [`Generator`].
///
/// Re-invokes the inner generator up to `retries` extra times, sleeping
/// `backoff` between attempts. The last error is returned if all fail.
pub struct Retrying {
    inner: Arc<dyn Generator>,
    retries: u32,
    backoff: Duration,
}

impl Retrying {
    pub fn new(inner: Arc<dyn Generator>, retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            retries,
            backoff,
        }
    }
}

#[async_trait]
impl Generator for Retrying {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, retries = self.retries, "Generation failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn parse(json: &str) -> Result<String, GenerationError> {
        serde_json::from_str::<CompletionResponse>(json).unwrap().into_text()
    }

    #[test]
    fn reads_chat_message_content() {
        let text = parse(r#"{"choices":[{"message":{"role":"assistant","content":"contract A {}"}}]}"#);
        assert_eq!(text.unwrap(), "contract A {}");
    }

    #[test]
    fn reads_legacy_text_field() {
        let text = parse(r#"{"choices":[{"text":"contract B {}","index":0}]}"#);
        assert_eq!(text.unwrap(), "contract B {}");
    }

    #[test]
    fn missing_text_is_malformed() {
        assert!(matches!(parse(r#"{"choices":[]}"#), Err(GenerationError::Malformed(_))));
        assert!(matches!(parse(r#"{}"#), Err(GenerationError::Malformed(_))));
        assert!(matches!(
            parse(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(
            parse(r#"{"choices":[{"text":"  \n"}]}"#),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn truncated_output_is_rejected() {
        let text = parse(
            r#"{"choices":[{"message":{"content":"pragma solidity ^0.8.20;\ncontract Alpha_Co {\n    uint8 public level"},"finish_reason":"length"}]}"#,
        );
        match text {
            Err(GenerationError::Malformed(msg)) => assert!(msg.contains("truncated"), "{msg}"),
            other => panic!("Expected truncation error, got {other:?}"),
        }
        let done = parse(r#"{"choices":[{"message":{"content":"contract A {}"},"finish_reason":"stop"}]}"#);
        assert_eq!(done.unwrap(), "contract A {}");
    }

    /// Fails a fixed number of times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Generator for Flaky {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(GenerationError::Malformed(format!("failure {n}")))
            } else {
                Ok("contract A {}".into())
            }
        }
    }

    #[tokio::test]
    async fn retrying_recovers_within_budget() {
        let flaky = Arc::new(Flaky { failures: 2, calls: AtomicU32::new(0) });
        let generator = Retrying::new(flaky.clone(), 2, Duration::ZERO);
        assert_eq!(generator.generate("p").await.unwrap(), "contract A {}");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retrying_gives_up_with_last_error() {
        let flaky = Arc::new(Flaky { failures: 5, calls: AtomicU32::new(0) });
        let generator = Retrying::new(flaky.clone(), 1, Duration::ZERO);
        match generator.generate("p").await {
            Err(GenerationError::Malformed(msg)) => assert_eq!(msg, "failure 1"),
            other => panic!("Expected failure, got {other:?}"),
        }
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }
}
