//! Coach pipeline crate - the natural-language-to-data-insight core.
//!
//! Sequencing: cache lookup, SQL generation with tenant scoping, execution
//! at the query-executor boundary, page-context augmentation, and answer
//! synthesis in buffered or streamed form, all coordinated by the
//! `CoachOrchestrator` state machine.

pub mod augment;
pub mod cache;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod sqlgen;
pub mod synth;

pub use augment::ContextAugmenter;
pub use cache::{AnswerCache, CacheEntry};
pub use error::PipelineError;
pub use executor::{QueryExecutor, SchemaProvider, SqliteExecutor, StaticSchema};
pub use orchestrator::{AnswerReceiver, CoachOrchestrator, MAX_QUESTION_LENGTH};
pub use sqlgen::SqlGenerator;
pub use synth::{AnswerSynthesizer, Evidence};
