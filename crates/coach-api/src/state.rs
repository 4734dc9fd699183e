//! Application state shared across route handlers.

use std::sync::Arc;
use std::time::Instant;

use coach_pipeline::CoachOrchestrator;

use crate::auth::IdentityProvider;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// The question-answering pipeline.
    pub orchestrator: Arc<CoachOrchestrator>,
    /// Bearer token to tenant identity mapping.
    pub identity: Arc<IdentityProvider>,
    /// Whether a model API key was resolved at startup. When false the
    /// coach endpoint answers 503 without touching the pipeline.
    pub model_configured: bool,
    /// API server port, used for the default CORS allow-list.
    pub port: u16,
    /// Configured CORS origins; empty means localhost on the API port.
    pub allowed_origins: Vec<String>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<CoachOrchestrator>,
        identity: IdentityProvider,
        model_configured: bool,
        port: u16,
    ) -> Self {
        Self {
            orchestrator,
            identity: Arc::new(identity),
            model_configured,
            port,
            allowed_origins: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }
}
