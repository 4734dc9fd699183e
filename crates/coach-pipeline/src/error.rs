//! Error types for the insight pipeline.

/// Errors surfaced by the pipeline. Only the request-terminal variants ever
/// reach the API boundary; everything else is absorbed where it happens.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("could not produce an answer: {0}")]
    GenerationUnavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            PipelineError::EmptyMessage.to_string(),
            "message cannot be empty"
        );
        assert_eq!(
            PipelineError::MessageTooLong(4000).to_string(),
            "message exceeds maximum length of 4000 characters"
        );
        assert_eq!(
            PipelineError::GenerationUnavailable("all variants exhausted".to_string()).to_string(),
            "could not produce an answer: all variants exhausted"
        );
        assert_eq!(
            PipelineError::Query("no such table: x".to_string()).to_string(),
            "query failed: no such table: x"
        );
    }
}
