//! Scripted in-memory provider for tests in this crate and downstream.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::provider::{FragmentReceiver, ModelError, ModelProvider};

/// One recorded generation attempt.
#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub variant: String,
    pub prompt: String,
    pub streamed: bool,
}

#[derive(Default)]
struct Inner {
    responses: Mutex<VecDeque<String>>,
    unavailable: Mutex<HashSet<String>>,
    served_variants: Mutex<Vec<String>>,
    discovery_fails: Mutex<bool>,
    stream_open_fails: Mutex<bool>,
    interrupt_after: Mutex<Option<usize>>,
    calls: Mutex<Vec<GenerationCall>>,
}

/// A `ModelProvider` that replays scripted responses and records every call.
///
/// Cloning shares the script and the call log, so a test can keep a handle
/// for assertions after moving a clone into the component under test.
#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<Inner>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response; each generation call (buffered or streamed)
    /// consumes one.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.inner.responses.lock().unwrap().push_back(text.into());
        self
    }

    /// Mark a variant as unavailable (both delivery modes).
    pub fn with_unavailable(self, variant: impl Into<String>) -> Self {
        self.inner.unavailable.lock().unwrap().insert(variant.into());
        self
    }

    /// Script the capability-discovery result.
    pub fn with_variants(self, variants: &[&str]) -> Self {
        *self.inner.served_variants.lock().unwrap() =
            variants.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Make capability discovery fail.
    pub fn with_discovery_failure(self) -> Self {
        *self.inner.discovery_fails.lock().unwrap() = true;
        self
    }

    /// Make every streamed channel fail to open.
    pub fn with_stream_open_failure(self) -> Self {
        *self.inner.stream_open_fails.lock().unwrap() = true;
        self
    }

    /// Interrupt streamed responses after `n` fragments.
    pub fn with_interrupt_after(self, n: usize) -> Self {
        *self.inner.interrupt_after.lock().unwrap() = Some(n);
        self
    }

    /// All recorded generation attempts, in order.
    pub fn generation_calls(&self) -> Vec<GenerationCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// The prompt of the most recent generation attempt.
    pub fn last_prompt(&self) -> Option<String> {
        self.inner.calls.lock().unwrap().last().map(|c| c.prompt.clone())
    }

    fn record(&self, variant: &str, prompt: &str, streamed: bool) {
        self.inner.calls.lock().unwrap().push(GenerationCall {
            variant: variant.to_string(),
            prompt: prompt.to_string(),
            streamed,
        });
    }

    fn check_available(&self, variant: &str) -> Result<(), ModelError> {
        if self.inner.unavailable.lock().unwrap().contains(variant) {
            return Err(ModelError::VariantUnavailable {
                variant: variant.to_string(),
                message: "scripted unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn pop_response(&self) -> Result<String, ModelError> {
        self.inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Request("no scripted response".to_string()))
    }
}

/// Split text into word fragments whose concatenation is the original.
fn fragments_of(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn list_variants(&self) -> Result<Vec<String>, ModelError> {
        if *self.inner.discovery_fails.lock().unwrap() {
            return Err(ModelError::Request("scripted discovery failure".to_string()));
        }
        Ok(self.inner.served_variants.lock().unwrap().clone())
    }

    async fn generate(&self, variant: &str, prompt: &str) -> Result<String, ModelError> {
        self.record(variant, prompt, false);
        self.check_available(variant)?;
        self.pop_response()
    }

    async fn generate_stream(
        &self,
        variant: &str,
        prompt: &str,
    ) -> Result<FragmentReceiver, ModelError> {
        self.record(variant, prompt, true);
        self.check_available(variant)?;
        if *self.inner.stream_open_fails.lock().unwrap() {
            return Err(ModelError::Request("scripted stream open failure".to_string()));
        }
        let text = self.pop_response()?;
        let interrupt_after = *self.inner.interrupt_after.lock().unwrap();

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for (i, fragment) in fragments_of(&text).into_iter().enumerate() {
                if let Some(limit) = interrupt_after {
                    if i >= limit {
                        let _ = tx
                            .send(Err(ModelError::Request("scripted interruption".to_string())))
                            .await;
                        return;
                    }
                }
                if tx.send(Ok(fragment)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
