use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single result row: arbitrary column name to JSON scalar.
pub type Row = serde_json::Map<String, Value>;

/// An inbound question, created per request and never persisted.
#[derive(Debug, Clone)]
pub struct Question {
    /// Opaque authenticated tenant identifier.
    pub user_id: String,
    /// Free-text question.
    pub text: String,
    /// Label of the UI page the user is viewing, if any.
    pub page_context: Option<String>,
    /// Opaque JSON payload supplied by the page, if any.
    pub page_data: Option<Value>,
    /// Whether the caller asked for incremental delivery.
    pub streaming: bool,
}

impl Question {
    /// Build a buffered question with no page context.
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            page_context: None,
            page_data: None,
            streaming: false,
        }
    }
}

/// A SQL statement produced by the generator, tagged with the model variant
/// that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub sql: String,
    pub variant: String,
}

/// Structured metadata attached to a buffered reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInfo {
    pub sql_query: String,
    pub result_count: usize,
    pub has_data: bool,
    pub sample_data: Vec<Value>,
}

/// The buffered response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachReply {
    pub reply: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_info: Option<DataInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_new_defaults() {
        let q = Question::new("u1", "how many properties do I have?");
        assert_eq!(q.user_id, "u1");
        assert!(!q.streaming);
        assert!(q.page_context.is_none());
        assert!(q.page_data.is_none());
    }

    #[test]
    fn test_reply_serializes_camel_case() {
        let reply = CoachReply {
            reply: "You have 3 properties.".to_string(),
            cached: false,
            data_info: Some(DataInfo {
                sql_query: "SELECT 1".to_string(),
                result_count: 1,
                has_data: true,
                sample_data: vec![serde_json::json!({"count": 3})],
            }),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["dataInfo"]["sqlQuery"], "SELECT 1");
        assert_eq!(json["dataInfo"]["resultCount"], 1);
        assert_eq!(json["dataInfo"]["hasData"], true);
        assert_eq!(json["dataInfo"]["sampleData"][0]["count"], 3);
    }

    #[test]
    fn test_reply_omits_absent_data_info() {
        let reply = CoachReply {
            reply: "hi".to_string(),
            cached: true,
            data_info: None,
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert!(json.get("dataInfo").is_none());
        assert_eq!(json["cached"], true);
    }

    #[test]
    fn test_row_holds_arbitrary_scalars() {
        let mut row = Row::new();
        row.insert("count".to_string(), Value::from(3));
        row.insert("city".to_string(), Value::from("Lisbon"));
        assert_eq!(row["count"], 3);
        assert_eq!(row["city"], "Lisbon");
    }
}
