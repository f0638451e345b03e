//! Derivations: scored, typed candidate parse-tree nodes.
//!
//! A derivation records how a formula was built: the rule that fired, the
//! child derivations it consumed, the span it covers (or `None` when
//! floating), the inferred type, the features attached during construction,
//! and the cached model score. Once built, a derivation is immutable except
//! for the lazily populated execution result.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::example::ExContext;
use crate::executor::{Execution, Executor};
use crate::features::{FeatureVector, Weights};
use crate::formula::Formula;
use crate::grammar::{ROOT_CAT, Rule};
use crate::semtype::SemType;
use crate::values::Value;

/// A token span `[start, end)`. Floating derivations carry no span at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// A scored, typed candidate covering a span or representing a floating
/// subformula.
#[derive(Debug)]
pub struct Derivation {
    /// Category this derivation was produced for.
    pub cat: String,
    /// Covered span; `None` for floating (unanchored) derivations.
    pub span: Option<Span>,
    /// Rule that fired, or `None` for base/leaf derivations.
    pub rule: Option<Arc<Rule>>,
    /// Child derivations, corresponding to the rule's RHS categories.
    pub children: Vec<Arc<Derivation>>,
    pub formula: Arc<Formula>,
    pub sem_type: SemType,
    features: FeatureVector,
    score: f64,
    execution: OnceCell<Execution>,
}

impl Derivation {
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    pub fn is_anchored(&self) -> bool {
        self.span.is_some()
    }

    /// Whether this is a root derivation over the whole utterance (anchored)
    /// or a floating root.
    pub fn is_root(&self, num_tokens: usize) -> bool {
        self.cat == ROOT_CAT
            && match self.span {
                Some(span) => span.start == 0 && span.end == num_tokens,
                None => true,
            }
    }

    /// Formula size; floating chart cells are indexed by this.
    pub fn size(&self) -> usize {
        self.formula.size()
    }

    /// Execute the formula if it has not been executed yet, caching the
    /// result. Subsequent calls return the cached execution.
    pub fn ensure_executed(&self, executor: &dyn Executor, context: &ExContext) -> &Execution {
        self.execution.get_or_init(|| executor.execute(&self.formula, context))
    }

    /// The cached denotation, if this derivation has been executed.
    pub fn value(&self) -> Option<&Value> {
        self.execution.get().map(|e| &e.value)
    }

    pub fn is_executed(&self) -> bool {
        self.execution.get().is_some()
    }

    /// Fold the feature vectors of this derivation and all descendants into
    /// `map`, scaled by `factor`.
    pub fn increment_all_features(&self, factor: f64, map: &mut std::collections::HashMap<String, f64>) {
        self.features.increment_map(factor, map);
        for child in &self.children {
            child.increment_all_features(factor, map);
        }
    }
}

impl fmt::Display for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{}{}: {} : {}", self.cat, span, self.formula, self.sem_type),
            None => write!(f, "{}(~): {} : {}", self.cat, self.formula, self.sem_type),
        }
    }
}

// --- Builder -----------------------------------------------------------------

/// Assembles a [`Derivation`]. Features may be added freely until
/// [`finish`](DerivationBuilder::finish) computes and caches the score; after
/// that the derivation never changes (apart from lazy execution).
pub struct DerivationBuilder {
    cat: String,
    span: Option<Span>,
    rule: Option<Arc<Rule>>,
    children: Vec<Arc<Derivation>>,
    formula: Arc<Formula>,
    sem_type: SemType,
    features: FeatureVector,
    bonus: f64,
}

impl DerivationBuilder {
    pub fn new(cat: impl Into<String>, span: Option<Span>, formula: Arc<Formula>, sem_type: SemType) -> Self {
        DerivationBuilder {
            cat: cat.into(),
            span,
            rule: None,
            children: Vec::new(),
            formula,
            sem_type,
            features: FeatureVector::new(),
            bonus: 0.0,
        }
    }

    pub fn rule(mut self, rule: Arc<Rule>) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn children(mut self, children: Vec<Arc<Derivation>>) -> Self {
        self.children = children;
        self
    }

    /// A flat score term added on top of the weighted features.
    pub fn bonus(mut self, bonus: f64) -> Self {
        self.bonus = bonus;
        self
    }

    pub fn add_feature(&mut self, name: impl Into<String>) {
        self.features.add(name);
    }

    pub fn add_features(&mut self, fv: &FeatureVector) {
        self.features.extend(fv);
    }

    pub fn features_mut(&mut self) -> &mut FeatureVector {
        &mut self.features
    }

    pub fn cat(&self) -> &str {
        &self.cat
    }

    pub fn rule_ref(&self) -> Option<&Arc<Rule>> {
        self.rule.as_ref()
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn formula(&self) -> &Arc<Formula> {
        &self.formula
    }

    pub fn sem_type(&self) -> &SemType {
        &self.sem_type
    }

    pub fn children_slice(&self) -> &[Arc<Derivation>] {
        &self.children
    }

    /// Score against the weight snapshot and freeze. The score is the dot
    /// product of the local features, plus the bonus, plus the children's
    /// (already cached) scores.
    pub fn finish(self, weights: &Weights) -> Arc<Derivation> {
        if let Some(span) = self.span {
            debug_assert!(
                spans_partition(span, &self.children),
                "anchored children must partition the span {span} without gaps or overlaps"
            );
        }
        let score =
            self.features.dot(weights) + self.bonus + self.children.iter().map(|c| c.score()).sum::<f64>();
        Arc::new(Derivation {
            cat: self.cat,
            span: self.span,
            rule: self.rule,
            children: self.children,
            formula: self.formula,
            sem_type: self.sem_type,
            features: self.features,
            score,
            execution: OnceCell::new(),
        })
    }
}

/// Anchored children must tile the parent span left to right. Children
/// without spans (floating) are exempt.
fn spans_partition(span: Span, children: &[Arc<Derivation>]) -> bool {
    let spans: Vec<Span> = children.iter().filter_map(|c| c.span).collect();
    if spans.is_empty() {
        return true;
    }
    let mut at = spans[0].start;
    if at < span.start {
        return false;
    }
    for s in &spans {
        if s.start != at {
            return false;
        }
        at = s.end;
    }
    at <= span.end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::GraphExecutor;

    fn leaf(cat: &str, span: Span, formula: Formula) -> Arc<Derivation> {
        DerivationBuilder::new(cat, Some(span), Arc::new(formula), SemType::entity()).finish(&Weights::new())
    }

    #[test]
    fn score_is_local_dot_plus_children() {
        let mut w = Weights::new();
        w.set("leaf", 2.0);
        w.set("pair", 10.0);

        let mut left = DerivationBuilder::new("$A", Some(Span::new(0, 1)), Arc::new(Formula::name("a")), SemType::entity());
        left.add_feature("leaf");
        let left = left.finish(&w);
        let mut right =
            DerivationBuilder::new("$B", Some(Span::new(1, 2)), Arc::new(Formula::name("b")), SemType::entity());
        right.add_feature("leaf");
        let right = right.finish(&w);

        let mut parent = DerivationBuilder::new(
            "$ROOT",
            Some(Span::new(0, 2)),
            Arc::new(Formula::merge(crate::formula::MergeMode::And, Formula::name("a"), Formula::name("b"))),
            SemType::entity(),
        )
        .children(vec![left, right])
        .bonus(0.5);
        parent.add_feature("pair");
        let parent = parent.finish(&w);

        assert_eq!(parent.score(), 10.0 + 0.5 + 2.0 + 2.0);
    }

    #[test]
    fn execution_is_lazy_and_cached() {
        let d = leaf("$A", Span::new(0, 1), Formula::number(7.0));
        assert!(!d.is_executed());
        let ctx = ExContext::default();
        let v = d.ensure_executed(&GraphExecutor, &ctx).value.clone();
        assert_eq!(v, Value::Number(7.0));
        assert!(d.is_executed());
        // second call returns the cached execution
        let again = d.ensure_executed(&GraphExecutor, &ctx).value.clone();
        assert_eq!(again, v);
    }

    #[test]
    #[should_panic(expected = "partition")]
    #[cfg(debug_assertions)]
    fn gapped_children_are_rejected() {
        let a = leaf("$A", Span::new(0, 1), Formula::name("a"));
        let b = leaf("$B", Span::new(2, 3), Formula::name("b"));
        let _ = DerivationBuilder::new("$ROOT", Some(Span::new(0, 3)), Arc::new(Formula::name("ab")), SemType::entity())
            .children(vec![a, b])
            .finish(&Weights::new());
    }
}
