//! Convenience layer over the engines.
//!
//! [`parse_with`] runs any [`ParserEngine`] and flattens the ranked root
//! derivations into display-oriented [`ParsedDerivation`] records;
//! [`parse_verbose_with`] additionally returns compact per-pass details for
//! profiling and rule debugging without dumping internal state. Callers that
//! need the derivation trees themselves use [`ParserEngine::parse`] directly.

use std::time::Duration;

use crate::derivation::Derivation;
use crate::engine::{ParseOutcome, ParserEngine, PassMetrics};
use crate::example::Example;
use crate::features::Weights;

/// A flattened root derivation.
#[derive(Debug, Clone)]
pub struct ParsedDerivation {
    /// Canonical s-expression form of the logical form.
    pub formula: String,
    pub sem_type: String,
    pub score: f64,
    /// Covered token span; `None` for floating derivations.
    pub span: Option<(usize, usize)>,
    /// The rule that produced the root, if any.
    pub rule: Option<String>,
    /// The denotation, if the derivation has been executed.
    pub value: Option<String>,
}

/// Result from [`parse_with`].
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// The parsed utterance.
    pub utterance: String,
    /// Flattened root derivations, best first. Empty means "no parse".
    pub results: Vec<ParsedDerivation>,
    /// Total elapsed parse time.
    pub elapsed: Duration,
}

/// Additional details returned by [`parse_verbose_with`].
#[derive(Debug, Clone)]
pub struct ParseDetails {
    pub total: Duration,
    /// One entry per outer pass (span length or formula size).
    pub passes: Vec<PassMetrics>,
    /// Candidates pulled from semantic functions.
    pub candidates: usize,
    /// Candidates that survived into some beam.
    pub kept: usize,
    pub type_rejected: usize,
    /// Prune counts by strategy name.
    pub pruned: Vec<(String, usize)>,
    pub fell_off_beam: bool,
    pub interrupted: bool,
}

/// Result from [`parse_verbose_with`].
#[derive(Debug, Clone)]
pub struct ParseResultVerbose {
    pub utterance: String,
    pub results: Vec<ParsedDerivation>,
    pub elapsed: Duration,
    pub details: ParseDetails,
}

/// Parse `ex` with `engine` and flatten the outcome.
pub fn parse_with(engine: &dyn ParserEngine, ex: &Example, weights: &Weights) -> ParseResult {
    let outcome = engine.parse(ex, weights);
    ParseResult {
        utterance: ex.utterance.clone(),
        results: outcome.derivations.iter().map(|d| flatten(d)).collect(),
        elapsed: outcome.metrics.total,
    }
}

/// Parse with extra (compact) debug details. The plain [`parse_with`] path
/// allocates none of these traces.
pub fn parse_verbose_with(engine: &dyn ParserEngine, ex: &Example, weights: &Weights) -> ParseResultVerbose {
    let outcome = engine.parse(ex, weights);
    let details = details_of(&outcome);
    ParseResultVerbose {
        utterance: ex.utterance.clone(),
        results: outcome.derivations.iter().map(|d| flatten(d)).collect(),
        elapsed: outcome.metrics.total,
        details,
    }
}

fn flatten(deriv: &Derivation) -> ParsedDerivation {
    ParsedDerivation {
        formula: deriv.formula.to_string(),
        sem_type: deriv.sem_type.to_string(),
        score: deriv.score(),
        span: deriv.span.map(|s| (s.start, s.end)),
        rule: deriv.rule.as_ref().map(|r| r.to_string()),
        value: deriv.value().map(|v| v.to_string()),
    }
}

fn details_of(outcome: &ParseOutcome) -> ParseDetails {
    let m = &outcome.metrics;
    ParseDetails {
        total: m.total,
        passes: m.passes.clone(),
        candidates: m.candidates,
        kept: m.kept,
        type_rejected: m.type_rejected,
        pruned: m.pruned.iter().map(|(name, n)| (name.to_string(), *n)).collect(),
        fell_off_beam: m.fell_off_beam,
        interrupted: m.interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::engine::{AnchoredParser, EngineSpec, ParserConfig};
    use crate::formula::{Formula, MergeMode};
    use crate::grammar::Grammar;
    use crate::semfn::{ConstantFn, MergeFn};
    use crate::semtype::SemType;

    fn engine() -> AnchoredParser {
        let mut g = Grammar::new();
        g.add_rule(rule!("$A" => ["x"], ConstantFn::new(Formula::name("x-val"), SemType::entity()))).unwrap();
        g.add_rule(rule!("$B" => ["y"], ConstantFn::new(Formula::name("y-val"), SemType::entity()))).unwrap();
        g.add_rule(rule!("$ROOT" => ["$A", "$B"], MergeFn { mode: MergeMode::And })).unwrap();
        AnchoredParser::new(EngineSpec::new(Arc::new(g)), ParserConfig::default()).unwrap()
    }

    #[test]
    fn parse_with_flattens_roots() {
        let out = parse_with(&engine(), &Example::from_tokens(["x", "y"]), &Weights::new());
        assert_eq!(out.utterance, "x y");
        assert_eq!(out.results.len(), 1);
        let top = &out.results[0];
        assert_eq!(top.formula, "(and x-val y-val)");
        assert_eq!(top.span, Some((0, 2)));
        assert_eq!(top.sem_type, "entity");
        assert!(top.rule.as_deref().unwrap().starts_with("$ROOT"));
    }

    #[test]
    fn parse_verbose_includes_pass_details() {
        let out = parse_verbose_with(&engine(), &Example::from_tokens(["x", "y"]), &Weights::new());
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.details.passes.len(), 2);
        assert!(out.details.candidates >= out.details.kept);
        assert_eq!(out.elapsed, out.details.total);
    }
}
