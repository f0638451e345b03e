//! The floating (size-chart) engine.
//!
//! Derivations here are unanchored: cells are keyed by `(category, formula
//! size)` instead of spans, and rules combine whatever the smaller cells
//! hold, regardless of the utterance. Good for extractive tasks where most
//! tokens are unaccounted for.
//!
//! ```text
//! for size in 1..=max_formula_size          (outer pass)
//!   walk the rule trie with a size budget of size-1:
//!     literal edge   -> free (consumes no budget)
//!     category edge  -> pick a child size s in 1..=budget, recurse with
//!                       budget - s   (multiset split over all RHS slots)
//!     completed rules fire when the budget is exactly spent
//!   unary closure at this size
//! ```
//!
//! Category size bounds cap the whole search: a cell `(cat, s)` with
//! `s > bound(cat)` could never reach a root-sized derivation, so it is
//! never built, and trie subtrees whose reachable categories are all out of
//! budget are skipped outright.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::metrics::PassMetrics;
use super::state::{CellAssign, CellKey, ParseOutcome, ParseState};
use super::{EngineSpec, ParserConfig, ParserEngine};
use crate::derivation::Derivation;
use crate::error::EngineError;
use crate::example::Example;
use crate::features::Weights;
use crate::grammar::{CatSizeBound, ROOT_CAT, Rule, RuleModes, Trie, is_cat};
use crate::pruner::{DefaultPruningComputer, DerivationPruner, PruningComputer};

pub struct FloatingParser {
    spec: EngineSpec,
    config: ParserConfig,
    cat_unary: Vec<Arc<Rule>>,
    bounds: CatSizeBound,
    pruner: DerivationPruner,
}

impl FloatingParser {
    pub fn new(spec: EngineSpec, config: ParserConfig) -> Result<FloatingParser, EngineError> {
        FloatingParser::with_computers(spec, config, vec![Box::new(DefaultPruningComputer)])
    }

    pub fn with_computers(
        spec: EngineSpec,
        config: ParserConfig,
        computers: Vec<Box<dyn PruningComputer>>,
    ) -> Result<FloatingParser, EngineError> {
        let cat_unary = spec.grammar.cat_unary_rules_sorted(config.default_modes, RuleModes::FLOATING)?;
        let bounds = CatSizeBound::new(config.max_formula_size, &spec.grammar);
        let pruner = DerivationPruner::new(config.pruner.clone(), computers)?;
        Ok(FloatingParser { spec, config, cat_unary, bounds, pruner })
    }

    pub fn bounds(&self) -> &CatSizeBound {
        &self.bounds
    }

    fn is_floating(&self, rule: &Rule) -> bool {
        rule.modes(self.config.default_modes).contains(RuleModes::FLOATING)
    }

    /// Base case: lexicon entries (the "all possible" enumeration) and rules
    /// whose right-hand side is all literal tokens.
    fn seed_base_cells(&self, state: &mut ParseState<'_>) {
        for entry in self.spec.lexicon.all_entries() {
            let size = entry.candidate.formula.size();
            if size <= self.bounds.get_bound(&entry.cat) {
                state.seed(&entry.cat, CellKey::Floating(size), None, entry.candidate);
            }
        }
        for rule in self.spec.grammar.rules() {
            if !self.is_floating(rule) || rule.rhs_cats().next().is_some() {
                continue;
            }
            state.apply_rule(rule, CellAssign::FloatingAtLeast { target: 1, bounds: &self.bounds }, None, &[]);
        }
    }

    /// Walk the trie distributing `budget` over the category edges; rules
    /// complete only when the budget is exactly spent. Literal edges are
    /// traversed freely (a token costs nothing in a floating derivation).
    fn walk(
        &self,
        state: &mut ParseState<'_>,
        node: &Trie,
        target: usize,
        budget: usize,
        children: &mut Vec<Arc<Derivation>>,
    ) {
        // No category producible beneath this node fits the budget.
        if !node.categories().iter().any(|cat| self.bounds.get_bound(cat) >= target) {
            return;
        }

        if budget == 0 {
            for rule in node.completed() {
                if rule.is_cat_unary() || !self.is_floating(rule) {
                    continue;
                }
                if rule.rhs_cats().next().is_none() {
                    continue; // all-literal rules fire in the base case
                }
                state.apply_rule(
                    rule,
                    CellAssign::FloatingAtLeast { target, bounds: &self.bounds },
                    None,
                    children,
                );
            }
        }

        let mut symbols: Vec<&str> = node.edge_symbols().collect();
        symbols.sort_unstable();
        for symbol in symbols {
            let Some(next) = node.next(symbol) else { continue };
            if !is_cat(symbol) {
                self.walk(state, next, target, budget, children);
                continue;
            }
            for child_size in 1..=budget {
                for deriv in state.derivations(symbol, CellKey::Floating(child_size)) {
                    children.push(deriv);
                    self.walk(state, next, target, budget - child_size, children);
                    children.pop();
                }
            }
        }
    }

    /// Unary closure among cells of the current size. Identity-style
    /// productions land at the same size under a different category; wrapping
    /// productions land in a future (larger) cell.
    fn unary_closure(&self, state: &mut ParseState<'_>, size: usize) {
        loop {
            let mut changed = false;
            for rule in &self.cat_unary {
                let rhs = rule.rhs[0].as_str();
                if rule.lhs == rhs {
                    continue; // a unary application must change category
                }
                let derivs = state.derivations(rhs, CellKey::Floating(size));
                if derivs.is_empty() {
                    continue;
                }
                let kept_before = state.metrics.kept;
                for deriv in derivs {
                    state.apply_rule(
                        rule,
                        CellAssign::FloatingAtLeast { target: size, bounds: &self.bounds },
                        None,
                        &[deriv],
                    );
                }
                changed |= state.metrics.kept > kept_before;
            }
            if !changed {
                break;
            }
        }
    }
}

impl ParserEngine for FloatingParser {
    fn parse(&self, ex: &Example, weights: &Weights) -> ParseOutcome {
        let started = Instant::now();
        let mut state = ParseState::new(ex, weights, &self.spec, &self.config, &self.pruner);

        self.seed_base_cells(&mut state);

        let mut children = Vec::new();
        for size in 1..=self.config.max_formula_size {
            if state.budget_exhausted() {
                state.metrics.interrupted = true;
                debug!(size, "node budget exhausted; stopping at cell granularity");
                break;
            }
            let pass_started = Instant::now();
            let kept_before = state.metrics.kept;
            state.touch_cell();
            if size > 1 {
                self.walk(&mut state, self.spec.grammar.trie(), size, size - 1, &mut children);
            }
            self.unary_closure(&mut state, size);
            state.metrics.passes.push(PassMetrics {
                index: size,
                duration: pass_started.elapsed(),
                kept: state.metrics.kept - kept_before,
            });
        }

        let derivations = state.ranked(ROOT_CAT, (1..=self.config.max_formula_size).map(CellKey::Floating));
        let mut metrics = state.metrics;
        metrics.total = started.elapsed();
        ParseOutcome { derivations, metrics }
    }
}
