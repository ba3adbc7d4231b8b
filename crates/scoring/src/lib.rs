//! Deterministic scoring engines, one per instrument.
//!
//! Every engine is a pure function from an [`AnswerSet`](shared::domain::AnswerSet) to a typed result.
//! Classification goes through a [`rules::RuleTable`]: safety overrides are
//! evaluated strictly first, then the ordered rules (first match wins), then
//! an explicit fallback.

use std::collections::BTreeMap;

use shared::protocol::ResultSummary;
use thiserror::Error;

pub mod atm;
pub mod aura;
pub mod gbsi;
pub mod metabolic;
pub mod questions;
pub mod rules;

pub use questions::{QuestionKind, QuestionSpec};
pub use rules::{MatchKind, Rule, RuleTable, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    #[error("missing answer for `{0}`")]
    MissingAnswer(String),
    #[error("unknown question `{0}`")]
    UnknownQuestion(String),
    #[error("answer for `{question}` is invalid: {reason}")]
    InvalidAnswer { question: String, reason: String },
}

/// Common view over every engine's result type.
pub trait ScoredOutcome {
    fn summary(&self) -> ResultSummary;

    /// Flat key/value columns for the results log.
    fn row_fields(&self) -> BTreeMap<String, String>;
}

#[cfg(test)]
#[path = "tests/engine_table_tests.rs"]
mod tests;
