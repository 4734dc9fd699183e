//! Natural-language-to-SQL generation with tenant scoping.
//!
//! The model is asked for a `{"sql_query": "..."}` envelope. Extraction is
//! layered: balanced-brace JSON scan, then code-fence stripping, then a
//! regex salvage of the value. Whatever comes back is passed through
//! `enforce_user_scope`, a textual rewrite that guarantees a `user_id`
//! predicate before the statement can reach the executor. The rewrite is
//! defense-in-depth, not a security boundary.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use coach_core::types::GeneratedQuery;
use coach_model::FallbackChain;

pub struct SqlGenerator {
    chain: Arc<FallbackChain>,
}

impl SqlGenerator {
    pub fn new(chain: Arc<FallbackChain>) -> Self {
        Self { chain }
    }

    /// One prompt: schema, question, and the output rules.
    pub fn build_prompt(question: &str, schema_text: &str, user_id: &str) -> String {
        format!(
            "You translate questions about a property-management database into SQL.\n\
             \n\
             {schema}\n\
             \n\
             Rules:\n\
             - Return exactly one SQL statement, no prose and no explanation.\n\
             - Reference only the tables and columns described above.\n\
             - Always filter with user_id = '{user}' so only the caller's rows are visible.\n\
             - For SELECT statements add LIMIT 50 unless the question asks for an aggregate.\n\
             - Respond with JSON in the form {{\"sql_query\": \"...\"}} and nothing else.\n\
             \n\
             Question: \"{question}\"",
            schema = schema_text,
            user = escape_sql_literal(user_id),
            question = question,
        )
    }

    /// Generate a tenant-scoped SQL statement for the question.
    ///
    /// Non-fatal by design: any failure (fallback exhaustion, unparsable
    /// output) returns `None` and the pipeline degrades to advice-only mode.
    pub async fn generate(
        &self,
        question: &str,
        schema_text: &str,
        user_id: &str,
    ) -> Option<GeneratedQuery> {
        let prompt = Self::build_prompt(question, schema_text, user_id);
        let (raw, variant) = match self.chain.generate(&prompt).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "SQL generation failed; continuing without data");
                return None;
            }
        };

        let sql = match extract_sql(&raw) {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                warn!(raw_len = raw.len(), "Could not extract SQL from model output");
                return None;
            }
        };

        let sql = enforce_user_scope(sql.trim(), user_id);
        debug!(variant = %variant, "SQL generated");
        Some(GeneratedQuery { sql, variant })
    }
}

/// Pull the `sql_query` value out of the model's raw output.
pub fn extract_sql(raw: &str) -> Option<String> {
    if let Some(sql) = json_envelope_sql(raw) {
        return Some(sql);
    }
    let stripped = strip_code_fences(raw);
    if let Some(sql) = json_envelope_sql(&stripped) {
        return Some(sql);
    }
    regex_salvage(&stripped)
}

/// Strict pass: find the first balanced JSON object carrying the key.
fn json_envelope_sql(raw: &str) -> Option<String> {
    for (i, ch) in raw.char_indices() {
        if ch != '{' {
            continue;
        }
        let Some(candidate) = balanced_object_at(raw, i) else {
            continue;
        };
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            if let Some(sql) = map.get("sql_query").and_then(Value::as_str) {
                return Some(sql.to_string());
            }
        }
    }
    None
}

/// Slice of `raw` spanning one balanced `{...}` starting at `start`,
/// string-literal aware.
fn balanced_object_at(raw: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Last resort: regex-extract the value even from malformed JSON.
fn regex_salvage(raw: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#""sql_query"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex")
    });
    let captured = re.captures(raw)?.get(1)?.as_str();
    // Re-wrap as a JSON string literal to resolve escapes.
    serde_json::from_str::<String>(&format!("\"{}\"", captured)).ok()
}

/// Whether the statement text contains a mutating verb, anywhere,
/// case-insensitive.
pub fn is_mutation(sql: &str) -> bool {
    let lower = sql.to_lowercase();
    ["insert", "update", "delete"]
        .iter()
        .any(|verb| lower.contains(verb))
}

fn escape_sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn where_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bwhere\b").expect("valid regex"))
}

fn from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bfrom\s+[A-Za-z_][A-Za-z0-9_.]*").expect("valid regex"))
}

fn trailing_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(group\s+by|order\s+by|having|limit)\b").expect("valid regex")
    })
}

/// Guarantee a `user_id` equality predicate in the statement.
///
/// Statements already mentioning `user_id` pass through untouched. Otherwise
/// the predicate is conjoined onto an existing `WHERE`, or a new `WHERE` is
/// placed after the `FROM` clause, ahead of any GROUP BY / ORDER BY /
/// HAVING / LIMIT. Best-effort text surgery; malformed input may come out
/// still malformed, never unscoped-but-valid.
pub fn enforce_user_scope(sql: &str, user_id: &str) -> String {
    if sql.to_lowercase().contains("user_id") {
        return sql.to_string();
    }
    let predicate = format!("user_id = '{}'", escape_sql_literal(user_id));

    if let Some(m) = where_re().find(sql) {
        let (head, tail) = sql.split_at(m.end());
        return format!("{} {} AND{}", head, predicate, tail);
    }

    let body = sql.trim_end();
    let (body, semicolon) = match body.strip_suffix(';') {
        Some(stripped) => (stripped.trim_end(), ";"),
        None => (body, ""),
    };

    let insert_at = from_re()
        .find(body)
        .and_then(|m| trailing_clause_re().find_at(body, m.end()))
        .map(|m| m.start());

    match insert_at {
        Some(pos) => format!(
            "{}WHERE {} {}{}",
            &body[..pos],
            predicate,
            &body[pos..],
            semicolon
        ),
        None => format!("{} WHERE {}{}", body, predicate, semicolon),
    }
}
