//! The anchored (span-chart) engine.
//!
//! Classic bottom-up dynamic programming over token spans:
//!
//! ```text
//! for len in 1..=n                      (outer pass; hard data dependency:
//!   for start in 0..=n-len               longer spans need shorter ones done)
//!     walk the rule trie over [start, end):
//!       literal edge    -> consume token at the fencepost
//!       category edge   -> consume a completed constituent [i, mid)
//!       completed rules -> semantic function x child cross product
//!     unary closure     -> $A -> $B within the cell, to fixpoint
//! ```
//!
//! Base cells are seeded from `$TOKEN`/`$PHRASE` plus the lexicon. The root
//! cell is `($ROOT, [0, n))`; an empty root cell means "no parse" and is a
//! normal outcome.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::metrics::PassMetrics;
use super::state::{CellAssign, CellKey, ParseOutcome, ParseState};
use super::{EngineSpec, ParserConfig, ParserEngine};
use crate::derivation::{Derivation, Span};
use crate::error::EngineError;
use crate::example::Example;
use crate::features::Weights;
use crate::formula::Formula;
use crate::grammar::{PHRASE_CAT, ROOT_CAT, Rule, RuleModes, TOKEN_CAT, Trie};
use crate::pruner::{DefaultPruningComputer, DerivationPruner, PruningComputer};
use crate::semfn::Candidate;
use crate::semtype::SemType;

pub struct AnchoredParser {
    spec: EngineSpec,
    config: ParserConfig,
    /// Category-unary rules, child-first; an ordered pass per cell reaches
    /// closure, and the enclosing loop re-runs it to fixpoint.
    cat_unary: Vec<Arc<Rule>>,
    pruner: DerivationPruner,
}

impl AnchoredParser {
    pub fn new(spec: EngineSpec, config: ParserConfig) -> Result<AnchoredParser, EngineError> {
        AnchoredParser::with_computers(spec, config, vec![Box::new(DefaultPruningComputer)])
    }

    /// Construct with custom pruning computers. All configuration errors
    /// (unary cycles, unknown strategies) surface here, once.
    pub fn with_computers(
        spec: EngineSpec,
        config: ParserConfig,
        computers: Vec<Box<dyn PruningComputer>>,
    ) -> Result<AnchoredParser, EngineError> {
        let cat_unary = spec.grammar.cat_unary_rules_sorted(config.default_modes, RuleModes::ANCHORED)?;
        let pruner = DerivationPruner::new(config.pruner.clone(), computers)?;
        Ok(AnchoredParser { spec, config, cat_unary, pruner })
    }

    fn seed_base_cells(&self, state: &mut ParseState<'_>) {
        let n = state.ex.num_tokens();
        for start in 0..n {
            let span = Span::new(start, start + 1);
            let token = state.ex.token(start).to_string();
            state.seed(
                TOKEN_CAT,
                CellKey::Anchored(span),
                Some(span),
                Candidate::new(Formula::string(token), SemType::string()),
            );
        }
        for len in 1..=self.config.max_phrase_length.min(n) {
            for start in 0..=(n - len) {
                let span = Span::new(start, start + len);
                let phrase = state.ex.phrase(span);
                state.seed(
                    PHRASE_CAT,
                    CellKey::Anchored(span),
                    Some(span),
                    Candidate::new(Formula::string(phrase), SemType::string()),
                );
                for entry in self.spec.lexicon.seed(state.ex, span) {
                    state.seed(&entry.cat, CellKey::Anchored(span), Some(span), entry.candidate);
                }
            }
        }
    }

    fn build_span(&self, state: &mut ParseState<'_>, span: Span) {
        state.touch_cell();
        let mut children = Vec::new();
        self.walk(state, span, span.start, self.spec.grammar.trie(), &mut children);
        self.unary_closure(state, span);
    }

    /// Walk the trie along the span, one RHS symbol at a time. `at` is the
    /// fencepost; every complete rule at the end of the span fires on the
    /// children gathered along the way.
    fn walk(
        &self,
        state: &mut ParseState<'_>,
        span: Span,
        at: usize,
        node: &Trie,
        children: &mut Vec<Arc<Derivation>>,
    ) {
        if at == span.end {
            for rule in node.completed() {
                if rule.is_cat_unary() {
                    continue; // unary closure applies these
                }
                if !rule.modes(self.config.default_modes).contains(RuleModes::ANCHORED) {
                    continue;
                }
                state.apply_rule(rule, CellAssign::Fixed(CellKey::Anchored(span)), Some(span), children);
            }
            return;
        }

        // Advance over the literal token at the fencepost.
        let token = state.ex.token(at).to_string();
        if let Some(next) = node.next(&token) {
            self.walk(state, span, at + 1, next, children);
        }

        // Advance over a completed constituent [at, mid).
        for mid in (at + 1)..=span.end {
            let sub = Span::new(at, mid);
            for cat in state.cats_at(CellKey::Anchored(sub)) {
                let Some(next) = node.next(&cat) else { continue };
                for deriv in state.derivations(&cat, CellKey::Anchored(sub)) {
                    children.push(deriv);
                    self.walk(state, span, mid, next, children);
                    children.pop();
                }
            }
        }
    }

    /// Apply `$A -> $B` rules within one cell until nothing new lands. The
    /// child-first rule order makes one pass sufficient for acyclic unaries;
    /// the loop plus the cell dedup guard covers rules that feed each other.
    fn unary_closure(&self, state: &mut ParseState<'_>, span: Span) {
        loop {
            let mut changed = false;
            for rule in &self.cat_unary {
                let rhs = rule.rhs[0].as_str();
                if rule.lhs == rhs {
                    continue; // a unary application must change category
                }
                let derivs = state.derivations(rhs, CellKey::Anchored(span));
                if derivs.is_empty() {
                    continue;
                }
                let kept_before = state.metrics.kept;
                for deriv in derivs {
                    state.apply_rule(rule, CellAssign::Fixed(CellKey::Anchored(span)), Some(span), &[deriv]);
                }
                changed |= state.metrics.kept > kept_before;
            }
            if !changed {
                break;
            }
        }
    }
}

impl ParserEngine for AnchoredParser {
    fn parse(&self, ex: &Example, weights: &Weights) -> ParseOutcome {
        let started = Instant::now();
        let mut state = ParseState::new(ex, weights, &self.spec, &self.config, &self.pruner);
        let n = ex.num_tokens();

        self.seed_base_cells(&mut state);

        'passes: for len in 1..=n {
            let pass_started = Instant::now();
            let kept_before = state.metrics.kept;
            for start in 0..=(n - len) {
                if state.budget_exhausted() {
                    state.metrics.interrupted = true;
                    debug!(len, start, "node budget exhausted; stopping at cell granularity");
                    break 'passes;
                }
                self.build_span(&mut state, Span::new(start, start + len));
            }
            state.metrics.passes.push(PassMetrics {
                index: len,
                duration: pass_started.elapsed(),
                kept: state.metrics.kept - kept_before,
            });
        }

        let derivations = state.ranked(ROOT_CAT, [CellKey::Anchored(Span::new(0, n))]);
        let mut metrics = state.metrics;
        metrics.total = started.elapsed();
        ParseOutcome { derivations, metrics }
    }
}
