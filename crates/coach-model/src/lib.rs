//! Coach model crate - the model-provider boundary.
//!
//! Defines the `ModelProvider` trait (capability discovery, buffered and
//! streamed generation), a Gemini-style REST client, and the priority-ordered
//! variant fallback chain shared by SQL generation and answer synthesis.

pub mod fallback;
pub mod gemini;
pub mod mock;
pub mod provider;

pub use fallback::FallbackChain;
pub use gemini::GeminiClient;
pub use mock::MockProvider;
pub use provider::{FragmentReceiver, ModelError, ModelProvider};
