//! Machine translation of subtitle lines.
//!
//! The engine batches lines, validates output against hallucination and
//! passthrough, applies glossaries, and fails over across backends. Backends
//! only translate; retries and health tracking live here.

pub mod backends;
mod batch;
mod engine;
mod glossary;
mod types;
mod validate;

pub use batch::{build_batch_prompt, parse_numbered_response};
pub use engine::{TranslationEngine, TranslationEngineConfig};
pub use glossary::Glossary;
pub use types::*;
pub use validate::{validate_line, LineIssue};
