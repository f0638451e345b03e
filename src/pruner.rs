//! Derivation pruning.
//!
//! Pruning strategies veto candidates that type-checking alone cannot rule
//! out. Each strategy is a named, opt-in predicate; only names listed in the
//! engine configuration are consulted, in computer registration order, and
//! the first strategy to return a rejection wins.
//!
//! A strategy can fire at three points:
//!
//! ```text
//! (1) structural   -> before any execution, from the formula/types alone
//! (2) executed     -> after the denotation is available (execution is lazy
//!                     and cached on the derivation)
//! (3) subformula   -> once per subformula node, with per-parse scratch state
//! ```
//!
//! A pruned candidate is not an error: the engine records the vetoing
//! strategy's name for diagnostics and moves on.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use tracing::debug;

use crate::derivation::Derivation;
use crate::error::EngineError;
use crate::example::Example;
use crate::executor::Executor;
use crate::formula::Formula;
use crate::semtype::TypeHierarchy;
use crate::values::Value;

// --- Plumbing ----------------------------------------------------------------

/// Mutable scratch state shared by subformula strategies for the duration of
/// one parse. Strategies namespace their keys.
#[derive(Debug, Default)]
pub struct PruneScratch {
    pub counters: HashMap<String, i64>,
}

/// Read-only environment handed to strategies.
pub struct PruneContext<'a> {
    pub ex: &'a Example,
    pub executor: &'a dyn Executor,
    pub hier: &'a TypeHierarchy,
    pub max_values: usize,
    pub allow_count_one: bool,
}

/// A bundle of named pruning strategies. Implementations advertise their
/// strategy names; each hook checks `enabled` before doing work.
pub trait PruningComputer: Send + Sync {
    fn strategies(&self) -> Vec<&'static str>;

    /// Veto from structural inspection alone, before any execution.
    fn prune_structural(
        &self,
        _deriv: &Derivation,
        _enabled: &HashSet<String>,
        _ctx: &PruneContext<'_>,
    ) -> Option<&'static str> {
        None
    }

    /// Veto once the denotation is available.
    fn prune_executed(
        &self,
        _deriv: &Derivation,
        _value: &Value,
        _enabled: &HashSet<String>,
        _ctx: &PruneContext<'_>,
    ) -> Option<&'static str> {
        None
    }

    /// Veto from one subformula node; called once per node.
    fn prune_subformula(
        &self,
        _deriv: &Derivation,
        _node: &Formula,
        _scratch: &mut PruneScratch,
        _enabled: &HashSet<String>,
        _ctx: &PruneContext<'_>,
    ) -> Option<&'static str> {
        None
    }
}

/// Configuration for the pruning pass.
#[derive(Debug, Clone)]
pub struct PrunerConfig {
    /// Enabled strategy names; empty disables pruning entirely.
    pub strategies: Vec<String>,
    /// Maximum denotation size tolerated by `tooManyValues`.
    pub max_values: usize,
    /// Let `badSummarizerHead` accept counting a single element.
    pub allow_count_one: bool,
    /// Execute formulas so denotation-based strategies can fire.
    pub ensure_executed: bool,
    /// Walk subformulas recursively; otherwise only the outermost node is
    /// offered to subformula strategies.
    pub recursive: bool,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        PrunerConfig {
            strategies: Vec::new(),
            max_values: 10,
            allow_count_one: false,
            ensure_executed: true,
            recursive: true,
        }
    }
}

/// Consults registered computers in order; first rejection wins. An enabled
/// strategy name no computer knows is a fatal configuration error.
pub struct DerivationPruner {
    computers: Vec<Box<dyn PruningComputer>>,
    enabled: HashSet<String>,
    config: PrunerConfig,
}

impl DerivationPruner {
    pub fn new(config: PrunerConfig, computers: Vec<Box<dyn PruningComputer>>) -> Result<DerivationPruner, EngineError> {
        let known: HashSet<&'static str> = computers.iter().flat_map(|c| c.strategies()).collect();
        for name in &config.strategies {
            if !known.contains(name.as_str()) {
                return Err(EngineError::UnknownPruningStrategy(name.clone()));
            }
        }
        let enabled = config.strategies.iter().cloned().collect();
        Ok(DerivationPruner { computers, enabled, config })
    }

    pub fn is_active(&self) -> bool {
        !self.enabled.is_empty()
    }

    /// Returns the name of the vetoing strategy, or `None` to keep the
    /// derivation.
    pub fn is_pruned(
        &self,
        deriv: &Derivation,
        ctx: &PruneContext<'_>,
        scratch: &mut PruneScratch,
    ) -> Option<&'static str> {
        if self.enabled.is_empty() {
            return None;
        }

        for computer in &self.computers {
            if let Some(strategy) = computer.prune_structural(deriv, &self.enabled, ctx) {
                debug!(strategy, formula = %deriv.formula, "pruned");
                return Some(strategy);
            }
        }

        if self.config.ensure_executed {
            let value = deriv.ensure_executed(ctx.executor, &ctx.ex.context).value.clone();
            for computer in &self.computers {
                if let Some(strategy) = computer.prune_executed(deriv, &value, &self.enabled, ctx) {
                    debug!(strategy, formula = %deriv.formula, "pruned");
                    return Some(strategy);
                }
            }
        }

        let mut matched = None;
        if self.config.recursive {
            deriv.formula.for_each(&mut |node| {
                if matched.is_some() {
                    return true; // stop descending, already vetoed
                }
                for computer in &self.computers {
                    if let Some(strategy) = computer.prune_subformula(deriv, node, scratch, &self.enabled, ctx) {
                        matched = Some(strategy);
                        return true;
                    }
                }
                false
            });
        } else {
            for computer in &self.computers {
                matched = computer.prune_subformula(deriv, &deriv.formula, scratch, &self.enabled, ctx);
                if matched.is_some() {
                    break;
                }
            }
        }
        if let Some(strategy) = matched {
            debug!(strategy, formula = %deriv.formula, "pruned");
        }
        matched
    }
}

// --- Default strategies ------------------------------------------------------

pub const ATOMIC: &str = "atomic";
pub const EMPTY_DENOTATION: &str = "emptyDenotation";
pub const NON_LAMBDA_ERROR: &str = "nonLambdaError";
pub const TOO_MANY_VALUES: &str = "tooManyValues";
pub const DOUBLE_SUMMARIZERS: &str = "doubleSummarizers";
pub const MULTIPLE_SUPERLATIVES: &str = "multipleSuperlatives";
pub const SAME_MERGE: &str = "sameMerge";
pub const UNSORTED_MERGE: &str = "unsortedMerge";
pub const MISTYPED_MERGE: &str = "mistypedMerge";
pub const BAD_SUMMARIZER_HEAD: &str = "badSummarizerHead";

/// Task-independent strategies useful in most grammars.
pub struct DefaultPruningComputer;

impl DefaultPruningComputer {
    fn is_summarizer(f: &Formula) -> bool {
        matches!(f, Formula::Aggregate { .. } | Formula::Superlative { .. })
    }
}

impl PruningComputer for DefaultPruningComputer {
    fn strategies(&self) -> Vec<&'static str> {
        vec![
            ATOMIC,
            EMPTY_DENOTATION,
            NON_LAMBDA_ERROR,
            TOO_MANY_VALUES,
            DOUBLE_SUMMARIZERS,
            MULTIPLE_SUPERLATIVES,
            SAME_MERGE,
            UNSORTED_MERGE,
            MISTYPED_MERGE,
            BAD_SUMMARIZER_HEAD,
        ]
    }

    fn prune_structural(
        &self,
        deriv: &Derivation,
        enabled: &HashSet<String>,
        ctx: &PruneContext<'_>,
    ) -> Option<&'static str> {
        // atomic: a bare lexicon value at the root means no computation
        // happened at all.
        if enabled.contains(ATOMIC)
            && deriv.is_root(ctx.ex.num_tokens())
            && matches!(&*deriv.formula, Formula::Value(_))
        {
            return Some(ATOMIC);
        }

        // doubleSummarizers: (sum (mean ...)) and friends; the outer
        // operation is redundant.
        if enabled.contains(DOUBLE_SUMMARIZERS) {
            let inner = match &*deriv.formula {
                Formula::Aggregate { child, .. } => Some(child),
                Formula::Superlative { head, .. } => Some(head),
                _ => None,
            };
            if let Some(inner) = inner {
                if Self::is_summarizer(inner) {
                    return Some(DOUBLE_SUMMARIZERS);
                }
            }
        }

        if enabled.contains(MULTIPLE_SUPERLATIVES) {
            let count = deriv
                .formula
                .collect_where(&|f| matches!(f, Formula::Superlative { .. }), true)
                .len();
            if count >= 2 {
                return Some(MULTIPLE_SUPERLATIVES);
            }
        }

        // mistypedMerge: the merged sides' types do not unify.
        if enabled.contains(MISTYPED_MERGE) && matches!(&*deriv.formula, Formula::Merge { .. }) {
            if let [left, right] = deriv.children.as_slice() {
                if !left.sem_type.meet(&right.sem_type, ctx.hier).is_valid() {
                    return Some(MISTYPED_MERGE);
                }
            }
        }

        None
    }

    fn prune_executed(
        &self,
        deriv: &Derivation,
        value: &Value,
        enabled: &HashSet<String>,
        ctx: &PruneContext<'_>,
    ) -> Option<&'static str> {
        if enabled.contains(EMPTY_DENOTATION) && value.list_len() == Some(0) {
            return Some(EMPTY_DENOTATION);
        }

        if enabled.contains(NON_LAMBDA_ERROR)
            && value.is_error()
            && !matches!(&*deriv.formula, Formula::Lambda { .. })
        {
            return Some(NON_LAMBDA_ERROR);
        }

        if enabled.contains(TOO_MANY_VALUES) && deriv.is_root(ctx.ex.num_tokens()) {
            match value.list_len() {
                Some(n) if n <= ctx.max_values => {}
                _ => return Some(TOO_MANY_VALUES),
            }
        }

        // badSummarizerHead: summarizing an empty or single-element set is
        // vacuous (counting a singleton optionally allowed).
        if enabled.contains(BAD_SUMMARIZER_HEAD) {
            let (inner, is_count) = match &*deriv.formula {
                Formula::Superlative { head, .. } => (Some(head), false),
                Formula::Aggregate { mode, child } => {
                    (Some(child), *mode == crate::formula::AggregateMode::Count)
                }
                _ => (None, false),
            };
            if let Some(inner) = inner {
                let inner_value = ctx.executor.execute(inner, &ctx.ex.context).value;
                match inner_value.list_len() {
                    Some(0) => return Some(BAD_SUMMARIZER_HEAD),
                    Some(1) if !(ctx.allow_count_one && is_count) => return Some(BAD_SUMMARIZER_HEAD),
                    _ => {}
                }
            }
        }

        None
    }

    fn prune_subformula(
        &self,
        _deriv: &Derivation,
        node: &Formula,
        scratch: &mut PruneScratch,
        enabled: &HashSet<String>,
        _ctx: &PruneContext<'_>,
    ) -> Option<&'static str> {
        let Formula::Merge { left, right, .. } = node else {
            return None;
        };

        // Merges are shared across many derivations in a parse; remember the
        // ones that already passed so they are checked once.
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        node.hash(&mut hasher);
        let memo = format!("merge-ok:{:x}", hasher.finish());
        if scratch.counters.contains_key(&memo) {
            return None;
        }

        if enabled.contains(SAME_MERGE) && left == right {
            return Some(SAME_MERGE);
        }
        // unsortedMerge: keep only the lexicographically sorted of the two
        // equivalent orders, removing redundant (and b a) next to (and a b).
        if enabled.contains(UNSORTED_MERGE) && left.to_string() >= right.to_string() {
            return Some(UNSORTED_MERGE);
        }

        scratch.counters.insert(memo, 1);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::derivation::{DerivationBuilder, Span};
    use crate::executor::{GraphExecutor, KnowledgeGraph};
    use crate::example::ExContext;
    use crate::features::Weights;
    use crate::semtype::SemType;

    fn pruner(strategies: &[&str]) -> DerivationPruner {
        let config = PrunerConfig {
            strategies: strategies.iter().map(|s| s.to_string()).collect(),
            ..PrunerConfig::default()
        };
        DerivationPruner::new(config, vec![Box::new(DefaultPruningComputer)]).unwrap()
    }

    fn root_deriv(text: &str, span: Span) -> Arc<Derivation> {
        DerivationBuilder::new("$ROOT", Some(span), Arc::new(Formula::parse(text).unwrap()), SemType::entity())
            .finish(&Weights::new())
    }

    fn graph_example() -> Example {
        let graph = KnowledgeGraph::new(vec![
            (Value::name("e.a"), "type".into(), Value::name("thing")),
            (Value::name("e.b"), "type".into(), Value::name("thing")),
        ]);
        Example::from_tokens(["q"]).with_context(ExContext { graph: Some(Arc::new(graph)) })
    }

    fn check(p: &DerivationPruner, ex: &Example, deriv: &Derivation) -> Option<&'static str> {
        let hier = TypeHierarchy::new();
        let ctx = PruneContext { ex, executor: &GraphExecutor, hier: &hier, max_values: 10, allow_count_one: false };
        p.is_pruned(deriv, &ctx, &mut PruneScratch::default())
    }

    #[test]
    fn unknown_strategy_is_fatal() {
        let config = PrunerConfig { strategies: vec!["noSuchStrategy".into()], ..PrunerConfig::default() };
        let err = DerivationPruner::new(config, vec![Box::new(DefaultPruningComputer)]);
        assert!(matches!(err, Err(EngineError::UnknownPruningStrategy(_))));
    }

    #[test]
    fn atomic_root_is_vetoed_structurally() {
        let p = pruner(&[ATOMIC]);
        let ex = graph_example();
        assert_eq!(check(&p, &ex, &root_deriv("e.a", Span::new(0, 1))), Some(ATOMIC));
        // a computed root passes
        assert_eq!(check(&p, &ex, &root_deriv("(type thing)", Span::new(0, 1))), None);
    }

    #[test]
    fn empty_denotation_fires_after_execution() {
        let p = pruner(&[EMPTY_DENOTATION]);
        let ex = graph_example();
        assert_eq!(check(&p, &ex, &root_deriv("(type nothing-here)", Span::new(0, 1))), Some(EMPTY_DENOTATION));
        assert_eq!(check(&p, &ex, &root_deriv("(type thing)", Span::new(0, 1))), None);
    }

    #[test]
    fn subformula_strategies_see_nested_nodes() {
        let p = pruner(&[SAME_MERGE]);
        let ex = graph_example();
        // the offending merge is nested under an aggregate
        let d = root_deriv("(count (and (type thing) (type thing)))", Span::new(0, 1));
        assert_eq!(check(&p, &ex, &d), Some(SAME_MERGE));
    }

    #[test]
    fn summarizing_a_singleton_is_vacuous() {
        let p = pruner(&[BAD_SUMMARIZER_HEAD]);
        let ex = graph_example();
        // (type thing) has two elements: counting it is fine
        assert_eq!(check(&p, &ex, &root_deriv("(count (type thing))", Span::new(0, 1))), None);
        // a merge that narrows to one element is not worth summarizing
        let d = root_deriv("(count (and (type thing) e.a))", Span::new(0, 1));
        assert_eq!(check(&p, &ex, &d), Some(BAD_SUMMARIZER_HEAD));
    }

    #[test]
    fn disabled_strategies_are_never_consulted() {
        let p = pruner(&[]);
        let ex = graph_example();
        assert_eq!(check(&p, &ex, &root_deriv("e.a", Span::new(0, 1))), None);
    }
}
