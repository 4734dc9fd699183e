//! Answer synthesis.
//!
//! Takes the question plus whatever evidence the earlier stages gathered
//! (primary query rows, page-context rows, raw page data) and renders one
//! persona prompt. The same prompt drives buffered and streamed delivery;
//! the two differ only in how the model's output travels back.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use coach_core::config::PromptConfig;
use coach_core::types::{Question, Row};
use coach_model::{FallbackChain, FragmentReceiver};

use crate::error::PipelineError;

/// Evidence gathered ahead of synthesis.
#[derive(Debug, Default)]
pub struct Evidence {
    /// Rows from the question-specific query, if one ran.
    pub primary_rows: Option<Vec<Row>>,
    /// Rows fetched for the page the user is viewing.
    pub context_rows: Vec<Row>,
}

pub struct AnswerSynthesizer {
    chain: Arc<FallbackChain>,
    max_result_rows: usize,
    max_page_data_bytes: usize,
}

impl AnswerSynthesizer {
    pub fn new(chain: Arc<FallbackChain>, prompt: &PromptConfig) -> Self {
        Self {
            chain,
            max_result_rows: prompt.max_result_rows,
            max_page_data_bytes: prompt.max_page_data_bytes,
        }
    }

    fn render_rows(&self, rows: &[Row]) -> String {
        let shown = rows.len().min(self.max_result_rows);
        let mut out = String::new();
        for row in &rows[..shown] {
            out.push_str(&Value::Object(row.clone()).to_string());
            out.push('\n');
        }
        if rows.len() > shown {
            out.push_str(&format!("... and {} more rows\n", rows.len() - shown));
        }
        out
    }

    /// Serialized page data, truncated to the byte cap on a char boundary.
    fn render_page_data(&self, data: &Value) -> String {
        let mut text = data.to_string();
        if text.len() > self.max_page_data_bytes {
            let mut cut = self.max_page_data_bytes;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str(" ...");
        }
        text
    }

    pub fn build_prompt(&self, question: &Question, evidence: &Evidence) -> String {
        let mut prompt = String::from(
            "You are Coach, a friendly property-management advisor. Answer the\n\
             landlord's question in plain language. Be concise: a short paragraph,\n\
             or a few bullet points when listing. Never mention SQL, queries, or\n\
             databases. Ground every number in the data below; if the data does\n\
             not answer the question, say so and give general guidance instead.\n\n",
        );

        match &evidence.primary_rows {
            Some(rows) if !rows.is_empty() => {
                prompt.push_str("Data for this question:\n");
                prompt.push_str(&self.render_rows(rows));
                prompt.push('\n');
            }
            Some(_) => {
                prompt.push_str(
                    "The data lookup for this question returned no rows; tell the\n\
                     user that plainly before giving any advice.\n\n",
                );
            }
            None => {
                prompt.push_str(
                    "No account data is available for this question; answer from\n\
                     general property-management knowledge and say the numbers\n\
                     could not be checked.\n\n",
                );
            }
        }

        if let Some(page) = &question.page_context {
            prompt.push_str(&format!("The user is viewing the \"{}\" page.\n", page));
            if !evidence.context_rows.is_empty() {
                prompt.push_str("Data currently on that page:\n");
                prompt.push_str(&self.render_rows(&evidence.context_rows));
            }
            prompt.push('\n');
        }

        if let Some(data) = &question.page_data {
            prompt.push_str("Extra page state supplied by the client:\n");
            prompt.push_str(&self.render_page_data(data));
            prompt.push_str("\n\n");
        }

        prompt.push_str(&format!("Question: \"{}\"", question.text));
        prompt
    }

    /// Buffered synthesis. Failure here is fatal for the request.
    pub async fn synthesize(
        &self,
        question: &Question,
        evidence: &Evidence,
    ) -> Result<String, PipelineError> {
        let prompt = self.build_prompt(question, evidence);
        let (text, variant) = self
            .chain
            .generate(&prompt)
            .await
            .map_err(|e| PipelineError::GenerationUnavailable(e.to_string()))?;
        debug!(variant = %variant, chars = text.len(), "Answer synthesized");
        Ok(text)
    }

    /// Open a fragment stream for the same prompt. Failure to open any
    /// stream is reported so the caller can fall back to buffered delivery.
    pub async fn open_stream(
        &self,
        question: &Question,
        evidence: &Evidence,
    ) -> Result<(FragmentReceiver, String), PipelineError> {
        let prompt = self.build_prompt(question, evidence);
        self.chain
            .generate_stream(&prompt)
            .await
            .map_err(|e| PipelineError::GenerationUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_model::MockProvider;
    use serde_json::json;

    fn synthesizer(provider: MockProvider) -> AnswerSynthesizer {
        let chain = FallbackChain::new(Arc::new(provider), "test-variant", &[]);
        AnswerSynthesizer::new(Arc::new(chain), &PromptConfig::default())
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut r = Row::new();
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    #[tokio::test]
    async fn test_synthesize_embeds_rows_and_question() {
        let provider = MockProvider::new().with_response("You have 3 properties.");
        let synth = synthesizer(provider.clone());
        let question = Question::new("U1", "How many properties do I have?");
        let evidence = Evidence {
            primary_rows: Some(vec![row(&[("count", json!(3))])]),
            context_rows: Vec::new(),
        };
        let answer = synth.synthesize(&question, &evidence).await.unwrap();
        assert_eq!(answer, "You have 3 properties.");

        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains(r#"{"count":3}"#));
        assert!(prompt.contains("How many properties do I have?"));
        assert!(prompt.contains("Never mention SQL"));
    }

    #[tokio::test]
    async fn test_prompt_flags_empty_result_set() {
        let provider = MockProvider::new().with_response("answer");
        let synth = synthesizer(provider.clone());
        let question = Question::new("U1", "Any overdue payments?");
        let evidence = Evidence {
            primary_rows: Some(Vec::new()),
            context_rows: Vec::new(),
        };
        synth.synthesize(&question, &evidence).await.unwrap();
        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains("returned no rows"));
    }

    #[tokio::test]
    async fn test_prompt_flags_missing_data() {
        let provider = MockProvider::new().with_response("answer");
        let synth = synthesizer(provider.clone());
        let question = Question::new("U1", "Should I raise rent?");
        synth
            .synthesize(&question, &Evidence::default())
            .await
            .unwrap();
        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains("No account data is available"));
    }

    #[tokio::test]
    async fn test_prompt_includes_page_context_and_data() {
        let provider = MockProvider::new().with_response("answer");
        let synth = synthesizer(provider.clone());
        let mut question = Question::new("U1", "What about this one?");
        question.page_context = Some("property-detail".to_string());
        question.page_data = Some(json!({"propertyId": 7}));
        let evidence = Evidence {
            primary_rows: None,
            context_rows: vec![row(&[("address", json!("12 Elm St"))])],
        };
        synth.synthesize(&question, &evidence).await.unwrap();
        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains("property-detail"));
        assert!(prompt.contains("12 Elm St"));
        assert!(prompt.contains(r#"{"propertyId":7}"#));
    }

    #[test]
    fn test_row_rendering_caps_and_counts_overflow() {
        let synth = AnswerSynthesizer {
            chain: Arc::new(FallbackChain::new(
                Arc::new(MockProvider::new()),
                "v",
                &[],
            )),
            max_result_rows: 2,
            max_page_data_bytes: 4096,
        };
        let rows: Vec<Row> = (0..5).map(|i| row(&[("n", json!(i))])).collect();
        let rendered = synth.render_rows(&rows);
        assert!(rendered.contains(r#"{"n":0}"#));
        assert!(rendered.contains(r#"{"n":1}"#));
        assert!(!rendered.contains(r#"{"n":2}"#));
        assert!(rendered.contains("... and 3 more rows"));
    }

    #[test]
    fn test_page_data_truncated_on_char_boundary() {
        let synth = AnswerSynthesizer {
            chain: Arc::new(FallbackChain::new(
                Arc::new(MockProvider::new()),
                "v",
                &[],
            )),
            max_result_rows: 20,
            max_page_data_bytes: 16,
        };
        // Multi-byte characters straddle the cap.
        let data = json!({"note": "éééééééééé"});
        let rendered = synth.render_page_data(&data);
        assert!(rendered.ends_with(" ..."));
        assert!(rendered.len() <= 16 + " ...".len());
    }

    #[tokio::test]
    async fn test_synthesize_exhaustion_is_generation_unavailable() {
        let provider = MockProvider::new().with_unavailable("test-variant");
        let synth = synthesizer(provider);
        let question = Question::new("U1", "hello");
        let err = synth
            .synthesize(&question, &Evidence::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_open_stream_delivers_fragments() {
        let provider = MockProvider::new().with_response("one two three");
        let synth = synthesizer(provider);
        let question = Question::new("U1", "hello");
        let (mut rx, _variant) = synth
            .open_stream(&question, &Evidence::default())
            .await
            .unwrap();
        let mut text = String::new();
        while let Some(fragment) = rx.recv().await {
            text.push_str(&fragment.unwrap());
        }
        assert_eq!(text, "one two three");
    }
}
