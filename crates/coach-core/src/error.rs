use thiserror::Error;

/// Error type for configuration and server lifecycle failures.
///
/// Per-request errors live in the pipeline and API crates, which define
/// their own types and map them to HTTP responses; `CoachError` covers
/// everything around the request path: loading config, binding the server,
/// and the I/O plumbing between them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoachError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API server error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for CoachError {
    fn from(err: toml::de::Error) -> Self {
        CoachError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CoachError {
    fn from(err: toml::ser::Error) -> Self {
        CoachError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CoachError {
    fn from(err: serde_json::Error) -> Self {
        CoachError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Coach operations.
pub type Result<T> = std::result::Result<T, CoachError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CoachError::Config("port out of range".to_string()).to_string(),
            "Configuration error: port out of range"
        );
        assert_eq!(
            CoachError::Api("Failed to bind 127.0.0.1:4040".to_string()).to_string(),
            "API server error: Failed to bind 127.0.0.1:4040"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CoachError = io_err.into();
        assert!(matches!(err, CoachError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let bad_toml = "invalid = [[[";
        let parsed: std::result::Result<toml::Value, _> = toml::from_str(bad_toml);
        let err: CoachError = parsed.unwrap_err().into();
        assert!(matches!(err, CoachError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let parsed: std::result::Result<serde_json::Value, _> =
            serde_json::from_str("{ invalid json }");
        let err: CoachError = parsed.unwrap_err().into();
        assert!(matches!(err, CoachError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }
        assert_eq!(inner().unwrap(), "success");
    }
}
