//! Page-context augmentation.
//!
//! When a request names the UI page the user is looking at, one extra query
//! is generated and executed to pull rows relevant to that page. The whole
//! step is best-effort: generation failure, an unparsable envelope, or
//! query failure all collapse to "no supplementary rows". A generated
//! statement containing a mutating verb is discarded before it reaches the
//! executor.

use std::sync::Arc;

use tracing::{debug, warn};

use coach_core::types::Row;
use coach_model::FallbackChain;

use crate::executor::QueryExecutor;
use crate::sqlgen::{enforce_user_scope, extract_sql, is_mutation};

pub struct ContextAugmenter {
    chain: Arc<FallbackChain>,
}

impl ContextAugmenter {
    pub fn new(chain: Arc<FallbackChain>) -> Self {
        Self { chain }
    }

    fn build_prompt(page_context: &str, schema_text: &str, user_id: &str) -> String {
        format!(
            "You supply supporting data for a property-management dashboard.\n\
             The user is currently viewing the \"{page}\" page.\n\
             \n\
             {schema}\n\
             \n\
             Write one read-only SELECT statement returning the rows most\n\
             relevant to that page. Filter with user_id = '{user}'. Respond\n\
             with JSON in the form {{\"sql_query\": \"...\"}} and nothing else.",
            page = page_context,
            schema = schema_text,
            user = user_id.replace('\'', "''"),
        )
    }

    /// Fetch supplementary rows for the page the user is viewing. Never
    /// fails; every problem along the way degrades to an empty result set.
    pub async fn augment(
        &self,
        page_context: &str,
        schema_text: &str,
        user_id: &str,
        executor: &dyn QueryExecutor,
    ) -> Vec<Row> {
        let prompt = Self::build_prompt(page_context, schema_text, user_id);
        let raw = match self.chain.generate(&prompt).await {
            Ok((text, _)) => text,
            Err(e) => {
                warn!(error = %e, page = %page_context, "Context query generation failed");
                return Vec::new();
            }
        };

        let sql = match extract_sql(&raw) {
            Some(s) if !s.trim().is_empty() => enforce_user_scope(s.trim(), user_id),
            _ => {
                warn!(page = %page_context, "Could not extract a context query");
                return Vec::new();
            }
        };

        if is_mutation(&sql) {
            warn!(page = %page_context, "Discarding mutating context query");
            return Vec::new();
        }

        match executor.execute(&sql).await {
            Ok(rows) => {
                debug!(page = %page_context, rows = rows.len(), "Context augmentation complete");
                rows
            }
            Err(e) => {
                warn!(error = %e, page = %page_context, "Context query failed");
                Vec::new()
            }
        }
    }
}
