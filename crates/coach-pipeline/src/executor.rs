//! The query-executor and schema-provider boundaries.
//!
//! The executor is a narrow capability owned by an external collaborator;
//! every failure behind it is non-fatal at its call sites. The bundled
//! SQLite implementation maps arbitrary result columns to JSON scalars.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;

use coach_core::types::Row;

use crate::error::PipelineError;

/// Runs one SQL statement and returns its rows.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, PipelineError>;
}

/// Supplies the static textual description of the queryable tables.
pub trait SchemaProvider: Send + Sync {
    fn schema_text(&self) -> String;
}

/// Built-in schema description for the property-management domain.
const DEFAULT_SCHEMA: &str = "\
Tables available (every table has a user_id TEXT column identifying the owner):

properties(id INTEGER, user_id TEXT, address TEXT, city TEXT, property_type TEXT, bedrooms INTEGER, monthly_rent REAL, status TEXT)
tenants(id INTEGER, user_id TEXT, property_id INTEGER, name TEXT, email TEXT, lease_start TEXT, lease_end TEXT)
payments(id INTEGER, user_id TEXT, property_id INTEGER, tenant_id INTEGER, amount REAL, paid_on TEXT, status TEXT)
maintenance_requests(id INTEGER, user_id TEXT, property_id INTEGER, description TEXT, priority TEXT, status TEXT, opened_on TEXT)";

/// A fixed schema description, from config or the built-in default.
pub struct StaticSchema {
    text: String,
}

impl StaticSchema {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for StaticSchema {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA)
    }
}

impl SchemaProvider for StaticSchema {
    fn schema_text(&self) -> String {
        self.text.clone()
    }
}

/// SQLite-backed executor.
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let conn = Connection::open(path).map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, PipelineError> {
        let conn = Connection::open_in_memory().map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a batch of statements; used for schema setup and test seeding.
    pub fn execute_batch(&self, sql: &str) -> Result<(), PipelineError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PipelineError::Storage(format!("connection lock poisoned: {}", e)))?;
        conn.execute_batch(sql)
            .map_err(|e| PipelineError::Storage(e.to_string()))
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).to_string()),
        // Binary payloads have no place in a generation prompt.
        ValueRef::Blob(_) => Value::Null,
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, PipelineError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PipelineError::Storage(format!("connection lock poisoned: {}", e)))?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| PipelineError::Query(e.to_string()))?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = stmt
            .query([])
            .map_err(|e| PipelineError::Query(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(r) = rows.next().map_err(|e| PipelineError::Query(e.to_string()))? {
            let mut row = Row::new();
            for (i, name) in names.iter().enumerate() {
                let value = r
                    .get_ref(i)
                    .map(value_ref_to_json)
                    .map_err(|e| PipelineError::Query(e.to_string()))?;
                row.insert(name.clone(), value);
            }
            out.push(row);
        }
        Ok(out)
    }
}
