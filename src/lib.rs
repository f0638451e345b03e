//! semantron: grammar-driven semantic parsing.
//!
//! Maps natural-language utterances to executable logical forms by
//! compositional chart search: grammar rules apply bottom-up over token spans
//! (or, in floating mode, over formula sizes), every candidate is
//! type-checked against a lattice, scored by a linear model, and only the
//! top-K per chart cell survive.
//!
//! ```text
//! tokens ──┐
//!          ├── AnchoredParser / FloatingParser ── ranked Derivations
//! Grammar ─┤        (beam-pruned chart DP)            │
//! Weights ─┘                                          v
//!                                        Formula ── Executor ── Value
//! ```
//!
//! The pieces, leaf to root: [`Formula`] (immutable logical forms),
//! [`SemType`] (the type lattice), [`Grammar`]/[`Rule`] with a trie index,
//! [`Derivation`] (a scored, typed chart entry), [`BoundedPriorityQueue`]
//! (the per-cell beam), [`DerivationPruner`] (opt-in veto strategies), and
//! the engines in [`engine`]. Collaborators — lexicon, executor, feature
//! extractor — are explicit objects in an [`EngineSpec`]; there are no
//! global singletons.

extern crate self as semantron;

#[macro_use]
mod macros;

pub mod api;
pub mod beam;
pub mod derivation;
pub mod engine;
pub mod error;
pub mod example;
pub mod executor;
pub mod features;
pub mod formula;
pub mod grammar;
pub mod lexicon;
pub mod pruner;
pub mod semfn;
pub mod semtype;
pub mod values;

pub use api::{ParseDetails, ParseResult, ParseResultVerbose, ParsedDerivation, parse_verbose_with, parse_with};
pub use beam::BoundedPriorityQueue;
pub use derivation::{Derivation, DerivationBuilder, Span};
pub use engine::{
    AllowSpec, AnchoredParser, CellKey, EngineSpec, FeatureExtractor, FloatingParser, MixParser, ParseMetrics,
    ParseOutcome, ParserConfig, ParserEngine, PassMetrics, Phase, RuleIndicatorExtractor,
};
pub use error::{EngineError, FormulaError};
pub use example::{ExContext, Example};
pub use executor::{ExecStats, Execution, Executor, GraphExecutor, KnowledgeGraph};
pub use features::{FeatureVector, Weights};
pub use formula::{
    ActionMode, AggregateMode, ArithmeticMode, Formula, MergeMode, SuperlativeMode, beta_reduce,
    contains_free_var, lambda_apply, substitute_var,
};
pub use grammar::{CatSizeBound, Grammar, PHRASE_CAT, ROOT_CAT, Rule, RuleModes, TOKEN_CAT, Trie, is_cat};
pub use lexicon::{EmptyLexicon, FuzzyMatchMode, LexiconSeeder, SeedEntry, SimpleLexicon};
pub use pruner::{
    DefaultPruningComputer, DerivationPruner, PruneContext, PruneScratch, PrunerConfig, PruningComputer,
};
pub use semfn::{
    Candidate, CandidateError, CandidateResult, CandidateStream, CallInfo, ConstantFn, IdentityFn, JoinFn,
    MergeFn, SemFnRegistry, SemanticFn,
};
pub use semtype::{SemType, TypeHierarchy};
pub use values::Value;
