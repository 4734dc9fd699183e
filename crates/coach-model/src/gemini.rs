//! Gemini-style REST client implementing `ModelProvider`.
//!
//! Speaks the generative-language API surface: `GET /models` for capability
//! discovery, `POST /models/{variant}:generateContent` for buffered
//! generation, and `POST /models/{variant}:streamGenerateContent?alt=sse`
//! for streamed generation parsed from `data:` framed SSE lines.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::provider::{FragmentReceiver, ModelError, ModelProvider};

/// Channel depth for streamed fragments; backpressures a slow consumer.
const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

/// Maximum error-body characters carried into an error message.
const ERROR_BODY_LIMIT: usize = 200;

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a client against the production endpoint.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn check_credential(&self) -> Result<(), ModelError> {
        if self.api_key.trim().is_empty() {
            return Err(ModelError::MissingCredential);
        }
        Ok(())
    }

    /// Both namespaced (`models/x`) and bare (`x`) identifiers map to the
    /// same URL path.
    fn model_path(variant: &str) -> String {
        if variant.starts_with("models/") {
            variant.to_string()
        } else {
            format!("models/{}", variant)
        }
    }

    fn request_body(prompt: &str) -> Value {
        serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        })
    }

    /// Pull the concatenated candidate text out of a generation response.
    fn extract_text(value: &Value) -> Option<String> {
        let parts = value
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Parse one SSE line into a text fragment. Lines without a `data:`
    /// prefix, unparsable payloads, and textless payloads are skipped.
    fn fragment_from_sse_line(line: &str) -> Option<String> {
        let payload = line.trim_end_matches('\r').strip_prefix("data: ")?;
        let value = serde_json::from_str::<Value>(payload).ok()?;
        Self::extract_text(&value)
    }

    fn classify_failure(variant: &str, status: StatusCode, body: &str) -> ModelError {
        let message: String = format!("{}: {}", status.as_u16(), body)
            .chars()
            .take(ERROR_BODY_LIMIT)
            .collect();
        match status {
            StatusCode::BAD_REQUEST
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
            | StatusCode::TOO_MANY_REQUESTS => ModelError::VariantUnavailable {
                variant: variant.to_string(),
                message,
            },
            _ => ModelError::Request(message),
        }
    }
}

#[async_trait]
impl ModelProvider for GeminiClient {
    async fn list_variants(&self) -> Result<Vec<String>, ModelError> {
        self.check_credential()?;
        let url = format!("{}/models?key={}", self.base_url, self.api_key);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Request(format!("{}: {}", status.as_u16(), body)));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;
        let names = value
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        debug!(count = names.len(), "Model capability discovery completed");
        Ok(names)
    }

    async fn generate(&self, variant: &str, prompt: &str) -> Result<String, ModelError> {
        self.check_credential()?;
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url,
            Self::model_path(variant),
            self.api_key
        );

        let resp = self
            .http
            .post(&url)
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_failure(variant, status, &body));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;
        Self::extract_text(&value)
            .ok_or_else(|| ModelError::Parse("no candidate text in response".to_string()))
    }

    async fn generate_stream(
        &self,
        variant: &str,
        prompt: &str,
    ) -> Result<FragmentReceiver, ModelError> {
        self.check_credential()?;
        let url = format!(
            "{}/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url,
            Self::model_path(variant),
            self.api_key
        );

        let resp = self
            .http
            .post(&url)
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_failure(variant, status, &body));
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let mut bytes = resp.bytes_stream();

        tokio::spawn(async move {
            let mut buf = String::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(data) => {
                        buf.push_str(&String::from_utf8_lossy(&data));
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].to_string();
                            buf.drain(..=pos);
                            if let Some(text) = GeminiClient::fragment_from_sse_line(&line) {
                                if tx.send(Ok(text)).await.is_err() {
                                    // Receiver dropped; release the channel.
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ModelError::Request(e.to_string()))).await;
                        return;
                    }
                }
            }
            // The stream may end without a trailing newline; flush the
            // remaining buffered line.
            if let Some(text) = GeminiClient::fragment_from_sse_line(&buf) {
                let _ = tx.send(Ok(text)).await;
            }
        });

        Ok(rx)
    }
}
