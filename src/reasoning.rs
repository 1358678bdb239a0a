//! Reasoning provider abstraction and implementations.
//!
//! Defines the [`ReasoningProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns `Value::Null`; stages fall back to
//!   their locally computed findings.
//! - **[`OpenAiProvider`]** — calls the OpenAI chat completions API with
//!   retry and backoff.
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/chat`
//!   endpoint with the same retry envelope.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Every provider failure surfaces as [`PipelineError::Upstream`], the one
//! retryable class at the job level.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ReasoningConfig;
use crate::error::PipelineError;

/// One request to the reasoning backend: a system role and a user prompt,
/// expecting a JSON object back.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: &'static str,
    pub system: String,
    pub prompt: String,
}

/// Trait for reasoning backends used by the analysis stages.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Returns the backend identifier (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Send a request and return the parsed JSON payload. A disabled
    /// backend returns `Value::Null`; callers treat that as "no
    /// enrichment" rather than an error.
    async fn invoke(&self, request: &StageRequest) -> Result<Value, PipelineError>;
}

/// Instantiate the provider named in the configuration.
pub fn create_provider(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config))),
        "disabled" => Ok(Arc::new(DisabledProvider)),
        other => bail!("Unknown reasoning provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op reasoning provider.
///
/// Used when `reasoning.provider = "disabled"` in the configuration and in
/// offline tests. Stages receiving `Null` keep their locally computed
/// findings.
pub struct DisabledProvider;

#[async_trait]
impl ReasoningProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn invoke(&self, _request: &StageRequest) -> Result<Value, PipelineError> {
        Ok(Value::Null)
    }
}

// ============ OpenAI Provider ============

/// Reasoning provider using the OpenAI chat completions API.
///
/// Calls `POST {url}/chat/completions` with a system + user message pair.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiProvider {
    model: String,
    url: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiProvider {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("reasoning.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ReasoningProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn invoke(&self, request: &StageRequest) -> Result<Value, PipelineError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PipelineError::Upstream(anyhow!("OPENAI_API_KEY not set")))?;

        let body = serde_json::json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });

        let endpoint = format!("{}/chat/completions", self.url.trim_end_matches('/'));
        let json = post_with_retry(
            &endpoint,
            Some(&api_key),
            &body,
            self.timeout_secs,
            self.max_retries,
        )
        .await?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PipelineError::Upstream(anyhow!("OpenAI response missing message content"))
            })?;

        extract_json(content)
            .ok_or_else(|| PipelineError::Upstream(anyhow!("no JSON object in OpenAI response")))
    }
}

// ============ Ollama Provider ============

/// Reasoning provider using a local Ollama instance.
///
/// Calls `POST {url}/api/chat` (default `http://localhost:11434`) with
/// `stream: false` and JSON output format.
pub struct OllamaProvider {
    model: String,
    url: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &ReasoningConfig) -> Self {
        Self {
            model: config.model.clone().unwrap_or_else(|| "llama3".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

#[async_trait]
impl ReasoningProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn invoke(&self, request: &StageRequest) -> Result<Value, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });

        let endpoint = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let json = post_with_retry(&endpoint, None, &body, self.timeout_secs, self.max_retries)
            .await?;

        let content = json
            .pointer("/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PipelineError::Upstream(anyhow!("Ollama response missing message content"))
            })?;

        extract_json(content)
            .ok_or_else(|| PipelineError::Upstream(anyhow!("no JSON object in Ollama response")))
    }
}

/// POST a JSON body with retry/backoff.
///
/// Retry strategy:
/// - HTTP 429 or 5xx → retry with exponential backoff
/// - HTTP 4xx (not 429) → fail immediately
/// - Network error → retry
async fn post_with_retry(
    endpoint: &str,
    bearer: Option<&str>,
    body: &Value,
    timeout_secs: u64,
    max_retries: u32,
) -> Result<Value, PipelineError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::Upstream(e.into()))?;

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(endpoint).json(body);
        if let Some(key) = bearer {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: Value = response
                        .json()
                        .await
                        .map_err(|e| PipelineError::Upstream(e.into()))?;
                    return Ok(json);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow!("reasoning API error {}: {}", status, body_text));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                return Err(PipelineError::Upstream(anyhow!(
                    "reasoning API error {}: {}",
                    status,
                    body_text
                )));
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(PipelineError::Upstream(
        last_err.unwrap_or_else(|| anyhow!("reasoning request failed after retries")),
    ))
}

/// Pull the first balanced JSON object or array out of free-form model
/// output. Models wrap JSON in prose or code fences often enough that
/// strict parsing alone loses usable responses.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let start = trimmed.find(['{', '['])?;
    let bytes = trimmed.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&trimmed[start..=i]).ok();
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_provider_returns_null() {
        let provider = DisabledProvider;
        let request = StageRequest {
            stage: "triage",
            system: "s".into(),
            prompt: "p".into(),
        };
        let value = provider.invoke(&request).await.unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn create_provider_rejects_unknown() {
        let mut config = ReasoningConfig::default();
        config.provider = "carrier-pigeon".into();
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn extract_json_strict() {
        let v = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extract_json_from_prose_and_fences() {
        let v = extract_json("Here you go:\n```json\n{\"tone\": \"hostile\"}\n```").unwrap();
        assert_eq!(v["tone"], "hostile");

        let v = extract_json("I found these: [1, 2, 3] as requested").unwrap();
        assert_eq!(v, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn extract_json_handles_braces_in_strings() {
        let v = extract_json(r#"note {"text": "a } inside", "n": 2} trailing"#).unwrap();
        assert_eq!(v["n"], 2);
    }

    #[test]
    fn extract_json_none_on_garbage() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{broken").is_none());
    }
}
