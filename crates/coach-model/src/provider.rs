//! The model-provider trait and its error type.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// One streamed text fragment, or the error that ended the stream.
pub type Fragment = Result<String, ModelError>;

/// Receiving end of a streamed generation. The channel closing is the only
/// end-of-stream marker; fragments arrive strictly in generation order.
pub type FragmentReceiver = mpsc::Receiver<Fragment>;

/// Errors from a model provider.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The requested variant does not exist, is not served, or is out of
    /// quota. The fallback chain retries the next variant on this one.
    #[error("model variant '{variant}' unavailable: {message}")]
    VariantUnavailable { variant: String, message: String },

    /// Transport or server failure.
    #[error("model request failed: {0}")]
    Request(String),

    /// The provider answered but the payload could not be interpreted.
    #[error("model response unparsable: {0}")]
    Parse(String),

    /// Every variant in the fallback chain was tried and failed.
    #[error("all {attempts} model variants exhausted; last error: {last}")]
    Exhausted { attempts: usize, last: String },

    #[error("missing model credential")]
    MissingCredential,
}

impl ModelError {
    /// Whether the fallback chain should advance to the next variant.
    pub fn is_variant_unavailable(&self) -> bool {
        matches!(self, ModelError::VariantUnavailable { .. })
    }
}

/// A generation backend: capability discovery plus buffered and streamed
/// text generation against a named model variant.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Enumerate variant identifiers the provider currently serves.
    async fn list_variants(&self) -> Result<Vec<String>, ModelError>;

    /// Run one buffered generation call and return the full text.
    async fn generate(&self, variant: &str, prompt: &str) -> Result<String, ModelError>;

    /// Open a streamed generation channel. An `Err` here means the channel
    /// never opened; errors after opening arrive as the final fragment.
    async fn generate_stream(
        &self,
        variant: &str,
        prompt: &str,
    ) -> Result<FragmentReceiver, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_unavailable_classification() {
        let err = ModelError::VariantUnavailable {
            variant: "gemini-pro".to_string(),
            message: "404".to_string(),
        };
        assert!(err.is_variant_unavailable());
        assert!(!ModelError::Request("timeout".to_string()).is_variant_unavailable());
        assert!(!ModelError::MissingCredential.is_variant_unavailable());
    }

    #[test]
    fn test_error_display() {
        let err = ModelError::Exhausted {
            attempts: 8,
            last: "quota".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "all 8 model variants exhausted; last error: quota"
        );
    }
}
