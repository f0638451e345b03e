//! Fatal error taxonomy.
//!
//! Only *configuration* problems are errors here: an ill-formed rule, a cycle
//! of category-unary rules, an unknown pruning strategy, or a malformed
//! formula string. They are raised once, at engine construction or formula
//! parsing, and abort the whole run.
//!
//! Everything that happens per candidate during a parse (type-check failure,
//! pruner veto, a semantic function declining to produce output) is *not* an
//! error: those are ordinary rejection signals and are handled by dropping
//! the candidate and moving on.

use thiserror::Error;

/// Raised when an engine is constructed over an ill-formed grammar or
/// configuration. Not recoverable per example.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule left-hand side must be a category (got `{0}`)")]
    NonCategoryLhs(String),

    #[error("rule `{0}` has an empty right-hand side")]
    EmptyRhs(String),

    #[error("cycle of category-unary rules involving `{0}`")]
    UnaryRuleCycle(String),

    #[error("unknown pruning strategy `{0}`")]
    UnknownPruningStrategy(String),
}

/// Raised by [`Formula::parse`](crate::Formula::parse) on malformed input.
/// Surfaced immediately; a malformed formula is never silently coerced.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormulaError {
    #[error("unbalanced parentheses at byte {0}")]
    Unbalanced(usize),

    #[error("unsupported operator `{0}`")]
    UnknownHead(String),

    #[error("`{head}` expects {expected} arguments, got {got}")]
    Arity { head: String, expected: usize, got: usize },

    #[error("expected {0}, got `{1}`")]
    Expected(&'static str, String),

    #[error("empty input")]
    Empty,
}
