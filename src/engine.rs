//! Chart parsing engines.
//!
//! This module is the operational core of the crate. Parsing an utterance is
//! a bottom-up, beam-pruned combinatorial search:
//!
//! ```text
//! grammar + trie ────┐
//!                    │
//! example ── seed ───┼── fill cells in dependency order ── root cell
//!  (lexicon)         │     (span length or formula size)      │
//!                    │   per candidate:                       v
//! weights ───────────┘     type check -> featurize/score   ranked
//!                          -> prune -> dedup -> beam     derivations
//! ```
//!
//! Two engines share that machinery and differ only in how cells are keyed:
//!
//! - [`AnchoredParser`] (anchored.rs): cells are `(category, span)`.
//! - [`FloatingParser`] (floating.rs): cells are `(category, formula size)`.
//! - [`MixParser`] (mix.rs): unions other engines' root sets, gated by a
//!   per-engine allow-list.
//!
//! Everything an engine consumes beyond the grammar is an explicit
//! collaborator in the [`EngineSpec`]: the lexicon seeder, the executor, the
//! feature extractor, and the type hierarchy. Engines are constructed once
//! (configuration errors surface there) and are read-only afterwards, so one
//! engine can serve many parses, including concurrently — each parse owns
//! its chart, beams, and scratch state.

#[path = "engine/anchored.rs"]
mod anchored;
#[path = "engine/floating.rs"]
mod floating;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/mix.rs"]
mod mix;
#[path = "engine/state.rs"]
mod state;

#[cfg(test)]
#[path = "engine/tests.rs"]
mod tests;

use std::sync::Arc;

pub use anchored::AnchoredParser;
pub use floating::FloatingParser;
pub use metrics::{ParseMetrics, PassMetrics};
pub use mix::{AllowSpec, MixParser, Phase};
pub use state::{CellKey, ParseOutcome};

use crate::derivation::DerivationBuilder;
use crate::example::Example;
use crate::executor::{Executor, GraphExecutor};
use crate::features::Weights;
use crate::grammar::{Grammar, RuleModes};
use crate::lexicon::{EmptyLexicon, LexiconSeeder};
use crate::pruner::PrunerConfig;
use crate::semtype::TypeHierarchy;

/// A parsing engine: given an example and a weight snapshot, produce the
/// ranked root derivations. Implementations must be safe to share across
/// threads; per-parse state lives inside the call.
pub trait ParserEngine: Send + Sync {
    fn parse(&self, ex: &Example, weights: &Weights) -> ParseOutcome;
}

/// Appends named feature contributions to a derivation under construction.
/// Invoked once per finalized derivation, never retroactively.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, ex: &Example, builder: &mut DerivationBuilder);
}

/// The default extractor: one indicator feature per fired rule.
#[derive(Debug, Default)]
pub struct RuleIndicatorExtractor;

impl FeatureExtractor for RuleIndicatorExtractor {
    fn extract(&self, _ex: &Example, builder: &mut DerivationBuilder) {
        if let Some(rule) = builder.rule_ref() {
            builder.add_feature(format!("rule:{rule}"));
        }
    }
}

/// The collaborators an engine consumes, constructed explicitly and threaded
/// through every parse. No global state.
pub struct EngineSpec {
    pub grammar: Arc<Grammar>,
    pub lexicon: Arc<dyn LexiconSeeder>,
    pub executor: Arc<dyn Executor>,
    pub extractor: Arc<dyn FeatureExtractor>,
    pub hierarchy: TypeHierarchy,
}

impl EngineSpec {
    pub fn new(grammar: Arc<Grammar>) -> EngineSpec {
        EngineSpec {
            grammar,
            lexicon: Arc::new(EmptyLexicon),
            executor: Arc::new(GraphExecutor),
            extractor: Arc::new(RuleIndicatorExtractor),
            hierarchy: TypeHierarchy::new(),
        }
    }

    pub fn with_lexicon(mut self, lexicon: Arc<dyn LexiconSeeder>) -> EngineSpec {
        self.lexicon = lexicon;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> EngineSpec {
        self.executor = executor;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> EngineSpec {
        self.extractor = extractor;
        self
    }

    pub fn with_hierarchy(mut self, hierarchy: TypeHierarchy) -> EngineSpec {
        self.hierarchy = hierarchy;
        self
    }
}

/// Engine configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Beam capacity per chart cell.
    pub beam_size: usize,
    /// Root formula-size budget for the floating engine.
    pub max_formula_size: usize,
    /// Search modes assumed for rules without explicit anchored/floating
    /// flags.
    pub default_modes: RuleModes,
    /// Longest span seeded as `$PHRASE`.
    pub max_phrase_length: usize,
    /// Reject candidates whose type is `bottom`.
    pub hard_type_check: bool,
    /// Optional cap on candidates built per parse; checked at cell
    /// granularity so a caller-imposed budget can stop a parse mid-chart.
    pub node_budget: Option<usize>,
    pub pruner: PrunerConfig,
}

impl Default for ParserConfig {
    fn default() -> ParserConfig {
        ParserConfig {
            beam_size: 200,
            max_formula_size: 10,
            default_modes: RuleModes::ANCHORED.union(RuleModes::FLOATING),
            max_phrase_length: 3,
            hard_type_check: true,
            node_budget: None,
            pruner: PrunerConfig::default(),
        }
    }
}
