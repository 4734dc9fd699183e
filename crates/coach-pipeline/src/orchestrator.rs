//! Request orchestration.
//!
//! One request walks a fixed stage order: validation, cache lookup (buffered
//! delivery only), SQL generation, execution, page-context augmentation,
//! synthesis, cache write, response. Data-gathering stages degrade to "no
//! data"; only validation and synthesis can end the request with an error.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use coach_core::config::PromptConfig;
use coach_core::types::{CoachReply, DataInfo, GeneratedQuery, Question};
use coach_model::FallbackChain;

use crate::augment::ContextAugmenter;
use crate::cache::AnswerCache;
use crate::error::PipelineError;
use crate::executor::{QueryExecutor, SchemaProvider};
use crate::sqlgen::{is_mutation, SqlGenerator};
use crate::synth::{AnswerSynthesizer, Evidence};

/// Upper bound on question length, in characters.
pub const MAX_QUESTION_LENGTH: usize = 4000;

/// Delivery channel for streamed answers. Model-side interruptions have
/// already been rendered as inline text by the time chunks arrive here.
pub type AnswerReceiver = mpsc::Receiver<String>;

struct Gathered {
    evidence: Evidence,
    query: Option<GeneratedQuery>,
    result_count: usize,
}

pub struct CoachOrchestrator {
    cache: Arc<AnswerCache>,
    sqlgen: SqlGenerator,
    augmenter: ContextAugmenter,
    synthesizer: AnswerSynthesizer,
    executor: Arc<dyn QueryExecutor>,
    schema: Arc<dyn SchemaProvider>,
    sample_rows: usize,
}

impl CoachOrchestrator {
    pub fn new(
        chain: Arc<FallbackChain>,
        executor: Arc<dyn QueryExecutor>,
        schema: Arc<dyn SchemaProvider>,
        cache: Arc<AnswerCache>,
        prompt: &PromptConfig,
    ) -> Self {
        Self {
            cache,
            sqlgen: SqlGenerator::new(Arc::clone(&chain)),
            augmenter: ContextAugmenter::new(Arc::clone(&chain)),
            synthesizer: AnswerSynthesizer::new(chain, prompt),
            executor,
            schema,
            sample_rows: prompt.sample_rows,
        }
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    fn validate(question: &Question) -> Result<(), PipelineError> {
        if question.text.trim().is_empty() {
            return Err(PipelineError::EmptyMessage);
        }
        if question.text.chars().count() > MAX_QUESTION_LENGTH {
            return Err(PipelineError::MessageTooLong(MAX_QUESTION_LENGTH));
        }
        Ok(())
    }

    /// Run the data-gathering stages. Nothing in here fails the request.
    async fn gather(&self, question: &Question) -> Gathered {
        let schema_text = self.schema.schema_text();

        let query = self
            .sqlgen
            .generate(&question.text, &schema_text, &question.user_id)
            .await;

        let mut evidence = Evidence::default();
        let mut result_count = 0;
        let mut kept_query = None;

        if let Some(q) = query {
            if is_mutation(&q.sql) {
                warn!(user = %question.user_id, "Discarding mutating generated query");
            } else {
                match self.executor.execute(&q.sql).await {
                    Ok(rows) => {
                        result_count = rows.len();
                        evidence.primary_rows = Some(rows);
                        kept_query = Some(q);
                    }
                    Err(e) => {
                        warn!(error = %e, "Query execution failed; continuing without data");
                    }
                }
            }
        }

        if let Some(page) = &question.page_context {
            evidence.context_rows = self
                .augmenter
                .augment(page, &schema_text, &question.user_id, self.executor.as_ref())
                .await;
        }

        Gathered {
            evidence,
            query: kept_query,
            result_count,
        }
    }

    fn data_info(&self, gathered: &Gathered) -> Option<DataInfo> {
        let query = gathered.query.as_ref()?;
        let sample_data = gathered
            .evidence
            .primary_rows
            .as_deref()
            .unwrap_or_default()
            .iter()
            .take(self.sample_rows)
            .map(|row| Value::Object(row.clone()))
            .collect();
        Some(DataInfo {
            sql_query: query.sql.clone(),
            result_count: gathered.result_count,
            has_data: gathered.result_count > 0,
            sample_data,
        })
    }

    /// Buffered delivery: the full pipeline, cache included.
    pub async fn answer(&self, question: &Question) -> Result<CoachReply, PipelineError> {
        Self::validate(question)?;

        if let Some(entry) = self.cache.get(&question.user_id, &question.text) {
            info!(user = %question.user_id, "Answer served from cache");
            let data_info = entry.sql_query.map(|sql| DataInfo {
                sql_query: sql,
                result_count: entry.result_count,
                has_data: entry.result_count > 0,
                // Sample rows are not retained across requests.
                sample_data: Vec::new(),
            });
            return Ok(CoachReply {
                reply: entry.response_text,
                cached: true,
                data_info,
            });
        }

        let gathered = self.gather(question).await;
        let reply = self.synthesizer.synthesize(question, &gathered.evidence).await?;

        self.cache.put(
            &question.user_id,
            &question.text,
            &reply,
            gathered.query.as_ref().map(|q| q.sql.clone()),
            gathered.result_count,
        );

        Ok(CoachReply {
            reply,
            cached: false,
            data_info: self.data_info(&gathered),
        })
    }

    /// Streamed delivery. The cache is never read here so the user watches
    /// the answer being produced, but a cleanly completed stream is written
    /// back for later buffered requests.
    ///
    /// If no stream can be opened the answer is synthesized buffered and
    /// delivered as a single chunk.
    pub async fn answer_stream(
        &self,
        question: &Question,
    ) -> Result<AnswerReceiver, PipelineError> {
        Self::validate(question)?;

        let gathered = self.gather(question).await;

        let (out_tx, out_rx) = mpsc::channel::<String>(64);

        match self.synthesizer.open_stream(question, &gathered.evidence).await {
            Ok((mut rx, variant)) => {
                debug!(variant = %variant, "Streaming answer opened");
                let cache = Arc::clone(&self.cache);
                let user_id = question.user_id.clone();
                let text = question.text.clone();
                let sql = gathered.query.as_ref().map(|q| q.sql.clone());
                let result_count = gathered.result_count;

                tokio::spawn(async move {
                    let mut full = String::new();
                    let mut interrupted = false;
                    let mut client_gone = false;

                    while let Some(fragment) = rx.recv().await {
                        match fragment {
                            Ok(chunk) => {
                                full.push_str(&chunk);
                                if !client_gone && out_tx.send(chunk).await.is_err() {
                                    // Keep draining so a clean completion
                                    // still reaches the cache.
                                    client_gone = true;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Answer stream interrupted");
                                interrupted = true;
                                if !client_gone {
                                    let notice = format!(
                                        "\n\n[The response was interrupted: {}]",
                                        e
                                    );
                                    let _ = out_tx.send(notice).await;
                                }
                            }
                        }
                    }

                    if !interrupted && !full.is_empty() {
                        cache.put(&user_id, &text, &full, sql, result_count);
                    }
                });

                Ok(out_rx)
            }
            Err(e) => {
                warn!(error = %e, "Could not open answer stream; falling back to buffered");
                let reply = self.synthesizer.synthesize(question, &gathered.evidence).await?;
                self.cache.put(
                    &question.user_id,
                    &question.text,
                    &reply,
                    gathered.query.as_ref().map(|q| q.sql.clone()),
                    gathered.result_count,
                );
                // Buffered text as a single chunk; capacity covers it.
                let _ = out_tx.send(reply).await;
                Ok(out_rx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{SqliteExecutor, StaticSchema};
    use coach_model::MockProvider;

    const COUNT_ENVELOPE: &str =
        r#"{"sql_query": "SELECT COUNT(*) AS count FROM properties"}"#;

    fn seeded_executor() -> Arc<SqliteExecutor> {
        let exec = SqliteExecutor::in_memory().unwrap();
        exec.execute_batch(
            "CREATE TABLE properties (
                 id INTEGER PRIMARY KEY,
                 user_id TEXT NOT NULL,
                 address TEXT,
                 city TEXT
             );
             INSERT INTO properties (user_id, address, city) VALUES
                 ('U1', '12 Elm St', 'Lisbon'),
                 ('U1', '8 Oak Ave', 'Porto'),
                 ('U1', '3 Pine Rd', 'Lisbon'),
                 ('U2', '99 Birch Ln', 'Faro');",
        )
        .unwrap();
        Arc::new(exec)
    }

    fn orchestrator(provider: MockProvider) -> CoachOrchestrator {
        let chain = Arc::new(FallbackChain::new(Arc::new(provider), "test-variant", &[]));
        CoachOrchestrator::new(
            chain,
            seeded_executor(),
            Arc::new(StaticSchema::default()),
            Arc::new(AnswerCache::new(600)),
            &PromptConfig::default(),
        )
    }

    async fn collect(mut rx: AnswerReceiver) -> String {
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_count_question_end_to_end() {
        // Two scripted responses: one for the SQL generator, one for the
        // synthesizer.
        let provider = MockProvider::new()
            .with_response(COUNT_ENVELOPE)
            .with_response("You have 3 properties.");
        let orch = orchestrator(provider.clone());

        let question = Question::new("U1", "How many properties do I have?");
        let reply = orch.answer(&question).await.unwrap();

        assert_eq!(reply.reply, "You have 3 properties.");
        assert!(!reply.cached);
        let info = reply.data_info.unwrap();
        assert!(info.sql_query.contains("user_id = 'U1'"));
        assert_eq!(info.result_count, 1);
        assert!(info.has_data);
        assert_eq!(info.sample_data[0]["count"], 3);

        // The synthesizer saw the executed count.
        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains(r#"{"count":3}"#));
    }

    #[tokio::test]
    async fn test_second_ask_hits_cache() {
        let provider = MockProvider::new()
            .with_response(COUNT_ENVELOPE)
            .with_response("You have 3 properties.");
        let orch = orchestrator(provider.clone());

        let question = Question::new("U1", "How many properties do I have?");
        orch.answer(&question).await.unwrap();
        let calls_after_first = provider.generation_calls().len();

        // Different whitespace and casing still hits.
        let rephrased = Question::new("U1", "  how many PROPERTIES do I have?");
        let reply = orch.answer(&rephrased).await.unwrap();
        assert!(reply.cached);
        assert_eq!(reply.reply, "You have 3 properties.");
        let info = reply.data_info.unwrap();
        assert_eq!(info.result_count, 1);
        assert!(info.sample_data.is_empty());
        assert_eq!(provider.generation_calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn test_unparsable_generation_degrades_to_advice() {
        let provider = MockProvider::new()
            .with_response("I cannot write SQL.")
            .with_response("Here is some general guidance.");
        let orch = orchestrator(provider.clone());

        let reply = orch
            .answer(&Question::new("U1", "How many properties?"))
            .await
            .unwrap();
        assert_eq!(reply.reply, "Here is some general guidance.");
        assert!(reply.data_info.is_none());
        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains("No account data is available"));
    }

    #[tokio::test]
    async fn test_query_failure_is_non_fatal() {
        let provider = MockProvider::new()
            .with_response(r#"{"sql_query": "SELECT * FROM no_such_table"}"#)
            .with_response("Advice without data.");
        let orch = orchestrator(provider);

        let reply = orch
            .answer(&Question::new("U1", "Anything odd?"))
            .await
            .unwrap();
        assert_eq!(reply.reply, "Advice without data.");
        assert!(reply.data_info.is_none());
    }

    #[tokio::test]
    async fn test_mutating_query_is_never_executed() {
        let provider = MockProvider::new()
            .with_response(r#"{"sql_query": "DELETE FROM properties"}"#)
            .with_response("Advice only.");
        let chain = Arc::new(FallbackChain::new(Arc::new(provider), "v", &[]));
        let executor = seeded_executor();
        let orch = CoachOrchestrator::new(
            chain,
            Arc::clone(&executor) as Arc<dyn QueryExecutor>,
            Arc::new(StaticSchema::default()),
            Arc::new(AnswerCache::new(600)),
            &PromptConfig::default(),
        );

        let reply = orch
            .answer(&Question::new("U1", "Clean up my data"))
            .await
            .unwrap();
        assert!(reply.data_info.is_none());
        let rows = executor
            .execute("SELECT COUNT(*) AS count FROM properties")
            .await
            .unwrap();
        assert_eq!(rows[0]["count"], 4);
    }

    #[tokio::test]
    async fn test_page_context_adds_augmentation() {
        let provider = MockProvider::new()
            // Generator output, augmenter output, synthesizer output.
            .with_response(COUNT_ENVELOPE)
            .with_response(r#"{"sql_query": "SELECT address FROM properties WHERE city = 'Lisbon'"}"#)
            .with_response("Those Lisbon flats look busy.");
        let orch = orchestrator(provider.clone());

        let mut question = Question::new("U1", "What should I focus on?");
        question.page_context = Some("properties".to_string());
        let reply = orch.answer(&question).await.unwrap();
        assert_eq!(reply.reply, "Those Lisbon flats look busy.");

        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains("properties"));
        assert!(prompt.contains("12 Elm St"));
    }

    #[tokio::test]
    async fn test_synthesis_exhaustion_is_fatal() {
        let provider = MockProvider::new().with_unavailable("test-variant");
        let orch = orchestrator(provider);
        let err = orch
            .answer(&Question::new("U1", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_and_oversized_questions_rejected() {
        let orch = orchestrator(MockProvider::new());
        let err = orch.answer(&Question::new("U1", "   ")).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyMessage));

        let long = "x".repeat(MAX_QUESTION_LENGTH + 1);
        let err = orch.answer(&Question::new("U1", long)).await.unwrap_err();
        assert!(matches!(err, PipelineError::MessageTooLong(_)));
    }

    #[tokio::test]
    async fn test_stream_concatenates_to_buffered_answer() {
        let provider = MockProvider::new()
            .with_response(COUNT_ENVELOPE)
            .with_response("You have 3 properties in total.");
        let orch = orchestrator(provider);

        let mut question = Question::new("U1", "How many properties do I have?");
        question.streaming = true;
        let rx = orch.answer_stream(&question).await.unwrap();
        assert_eq!(collect(rx).await, "You have 3 properties in total.");
    }

    #[tokio::test]
    async fn test_stream_skips_cache_read_but_writes_back() {
        let provider = MockProvider::new()
            .with_response(COUNT_ENVELOPE)
            .with_response("Streamed answer.")
            .with_response(COUNT_ENVELOPE)
            .with_response("Second streamed answer.");
        let orch = orchestrator(provider.clone());

        let mut question = Question::new("U1", "How many properties do I have?");
        question.streaming = true;
        let rx = orch.answer_stream(&question).await.unwrap();
        assert_eq!(collect(rx).await, "Streamed answer.");

        // Give the forwarding task a beat to write the cache.
        tokio::task::yield_now().await;
        let buffered = Question::new("U1", "How many properties do I have?");
        let reply = orch.answer(&buffered).await.unwrap();
        assert!(reply.cached);
        assert_eq!(reply.reply, "Streamed answer.");

        // A second streamed ask still regenerates rather than reading the
        // cache.
        let rx = orch.answer_stream(&question).await.unwrap();
        let streamed_calls: Vec<_> = provider
            .generation_calls()
            .into_iter()
            .filter(|c| c.streamed)
            .collect();
        assert_eq!(streamed_calls.len(), 2);
        drop(rx);
    }

    #[tokio::test]
    async fn test_stream_interruption_becomes_inline_notice() {
        let provider = MockProvider::new()
            .with_response(COUNT_ENVELOPE)
            .with_response("one two three four")
            .with_interrupt_after(2);
        let orch = orchestrator(provider);

        let mut question = Question::new("U1", "How many properties do I have?");
        question.streaming = true;
        let rx = orch.answer_stream(&question).await.unwrap();
        let text = collect(rx).await;
        assert!(text.starts_with("one two "));
        assert!(text.contains("[The response was interrupted:"));

        // Interrupted answers are not cached.
        tokio::task::yield_now().await;
        let reply = orch
            .cache()
            .get("U1", "How many properties do I have?");
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_stream_open_failure_falls_back_to_buffered() {
        let provider = MockProvider::new()
            .with_stream_open_failure()
            .with_response(COUNT_ENVELOPE)
            .with_response("Single chunk fallback.");
        let orch = orchestrator(provider);

        let mut question = Question::new("U1", "How many properties do I have?");
        question.streaming = true;
        let rx = orch.answer_stream(&question).await.unwrap();
        assert_eq!(collect(rx).await, "Single chunk fallback.");

        // The fallback result is cached like any buffered answer.
        let entry = orch
            .cache()
            .get("U1", "How many properties do I have?")
            .unwrap();
        assert_eq!(entry.response_text, "Single chunk fallback.");
    }

    #[tokio::test]
    async fn test_stream_total_failure_is_fatal() {
        let provider = MockProvider::new().with_unavailable("test-variant");
        let orch = orchestrator(provider);
        let mut question = Question::new("U1", "hello");
        question.streaming = true;
        let err = orch.answer_stream(&question).await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationUnavailable(_)));
    }
}
