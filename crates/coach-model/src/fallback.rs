//! Priority-ordered model-variant fallback.
//!
//! One `FallbackChain` instance is shared by SQL generation and answer
//! synthesis, in both buffered and streamed delivery, so the two call sites
//! cannot grow divergent retry logic.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::provider::{FragmentReceiver, ModelError, ModelProvider};

pub struct FallbackChain {
    provider: Arc<dyn ModelProvider>,
    variants: Vec<String>,
}

/// Strip the `models/` namespace for identity comparison.
fn bare(variant: &str) -> &str {
    variant.strip_prefix("models/").unwrap_or(variant)
}

impl FallbackChain {
    /// Build a chain from the primary variant plus ordered alternates.
    /// Duplicate identifiers (after namespace stripping, order preserved)
    /// are kept so both namespaced and bare forms get tried as configured.
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        primary: impl Into<String>,
        alternates: &[String],
    ) -> Self {
        let mut variants = vec![primary.into()];
        for alt in alternates {
            if !variants.contains(alt) {
                variants.push(alt.clone());
            }
        }
        Self { provider, variants }
    }

    /// The configured variant order, for inspection.
    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    /// Best-effort capability discovery: variants the provider reports as
    /// served move to the front, preserving configured relative order.
    /// Discovery failure is non-fatal and keeps the configured order.
    async fn resolve_order(&self) -> Vec<String> {
        match self.provider.list_variants().await {
            Ok(available) => {
                let served: HashSet<String> =
                    available.iter().map(|v| bare(v).to_string()).collect();
                let (mut present, absent): (Vec<String>, Vec<String>) = self
                    .variants
                    .iter()
                    .cloned()
                    .partition(|v| served.contains(bare(v)));
                if present.is_empty() {
                    self.variants.clone()
                } else {
                    present.extend(absent);
                    present
                }
            }
            Err(e) => {
                debug!(error = %e, "Capability discovery failed; using configured variant order");
                self.variants.clone()
            }
        }
    }

    /// Buffered generation with fallback. Returns the text and the variant
    /// that produced it.
    pub async fn generate(&self, prompt: &str) -> Result<(String, String), ModelError> {
        let order = self.resolve_order().await;
        let mut attempts = 0;
        let mut last: Option<ModelError> = None;

        for variant in &order {
            attempts += 1;
            match self.provider.generate(variant, prompt).await {
                Ok(text) => return Ok((text, variant.clone())),
                Err(e) if e.is_variant_unavailable() => {
                    warn!(variant = %variant, error = %e, "Variant unavailable; trying next");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ModelError::Exhausted {
            attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no variants configured".to_string()),
        })
    }

    /// Streamed generation with fallback. A variant whose channel fails to
    /// open as unavailable falls through to the next; once a channel opens,
    /// fallback is over and any later failure arrives as a stream fragment.
    pub async fn generate_stream(
        &self,
        prompt: &str,
    ) -> Result<(FragmentReceiver, String), ModelError> {
        let order = self.resolve_order().await;
        let mut attempts = 0;
        let mut last: Option<ModelError> = None;

        for variant in &order {
            attempts += 1;
            match self.provider.generate_stream(variant, prompt).await {
                Ok(rx) => return Ok((rx, variant.clone())),
                Err(e) if e.is_variant_unavailable() => {
                    warn!(variant = %variant, error = %e, "Variant unavailable for streaming; trying next");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ModelError::Exhausted {
            attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no variants configured".to_string()),
        })
    }
}
