use std::sync::Arc;

use super::{AllowSpec, AnchoredParser, EngineSpec, FloatingParser, MixParser, ParserConfig, ParserEngine};
use crate::derivation::{Derivation, Span};
use crate::example::Example;
use crate::features::Weights;
use crate::formula::{ActionMode, Formula, MergeMode};
use crate::grammar::Grammar;
use crate::lexicon::SimpleLexicon;
use crate::pruner;
use crate::semfn::{
    Candidate, CandidateStream, CallInfo, ConstantFn, IdentityFn, JoinFn, MergeFn, SemanticFn, err_stream,
    once_stream,
};
use crate::semtype::SemType;

/// Tuple-builder used to exercise n-ary right-hand sides: the formula grows
/// by exactly one node over the sum of the children.
#[derive(Debug)]
struct TupleFn;

impl SemanticFn for TupleFn {
    fn name(&self) -> &'static str {
        "tuple"
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        let args = info.children.iter().map(|c| Arc::clone(&c.formula)).collect();
        once_stream(Candidate::new(Formula::Action { mode: ActionMode::Block, args }, SemType::Top))
    }
}

/// Pairs its two children, but fails (recoverably) whenever the left child is
/// the named formula.
#[derive(Debug)]
struct PairUnless(&'static str);

impl SemanticFn for PairUnless {
    fn name(&self) -> &'static str {
        "pair-unless"
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        let (left, right) = (&info.children[0], &info.children[1]);
        if left.formula.to_string() == self.0 {
            return err_stream(format!("refusing to pair {}", self.0));
        }
        let out_type = left.sem_type.meet(&right.sem_type, info.hier);
        once_stream(Candidate::new(
            Formula::Merge {
                mode: MergeMode::And,
                left: Arc::clone(&left.formula),
                right: Arc::clone(&right.formula),
            },
            out_type,
        ))
    }
}

fn xy_grammar() -> Arc<Grammar> {
    let mut g = Grammar::new();
    g.add_rule(rule!("$A" => ["x"], ConstantFn::new(Formula::name("x-val"), SemType::entity()))).unwrap();
    g.add_rule(rule!("$B" => ["y"], ConstantFn::new(Formula::name("y-val"), SemType::entity()))).unwrap();
    g.add_rule(rule!("$ROOT" => ["$A", "$B"], MergeFn { mode: MergeMode::And })).unwrap();
    Arc::new(g)
}

fn anchored(grammar: Arc<Grammar>, config: ParserConfig) -> AnchoredParser {
    AnchoredParser::new(EngineSpec::new(grammar), config).unwrap()
}

fn assert_all_types_valid(derivations: &[Arc<Derivation>]) {
    for d in derivations {
        assert!(d.sem_type.is_valid(), "retained derivation has an invalid type: {d}");
    }
}

#[test]
fn two_token_grammar_produces_exactly_one_root() {
    let parser = anchored(xy_grammar(), ParserConfig::default());
    let out = parser.parse(&Example::from_tokens(["x", "y"]), &Weights::new());

    assert_eq!(out.derivations.len(), 1);
    let root = &out.derivations[0];
    assert_eq!(root.span, Some(Span::new(0, 2)));
    assert_eq!(root.formula.to_string(), "(and x-val y-val)");
    assert_all_types_valid(&out.derivations);

    // children tile the span without gaps or overlaps
    let spans: Vec<Span> = root.children.iter().filter_map(|c| c.span).collect();
    assert_eq!(spans, vec![Span::new(0, 1), Span::new(1, 2)]);
}

#[test]
fn unparseable_utterance_yields_empty_list_not_error() {
    let parser = anchored(xy_grammar(), ParserConfig::default());
    let out = parser.parse(&Example::from_tokens(["y", "x"]), &Weights::new());
    assert!(out.derivations.is_empty());
}

#[test]
fn mistyped_merge_is_dropped_under_hard_type_check() {
    let mut g = Grammar::new();
    g.add_rule(rule!("$A" => ["x"], ConstantFn::new(Formula::number(1.0), SemType::number()))).unwrap();
    g.add_rule(rule!("$B" => ["y"], ConstantFn::new(Formula::name("d"), SemType::date()))).unwrap();
    g.add_rule(rule!("$ROOT" => ["$A", "$B"], MergeFn { mode: MergeMode::And })).unwrap();

    let parser = anchored(Arc::new(g), ParserConfig::default());
    let out = parser.parse(&Example::from_tokens(["x", "y"]), &Weights::new());
    assert!(out.derivations.is_empty());
    assert_eq!(out.metrics.type_rejected, 1);
}

#[test]
fn lexicon_seeded_join_parses_and_executes() {
    use crate::example::ExContext;
    use crate::executor::KnowledgeGraph;
    use crate::values::Value;

    let mut g = Grammar::new();
    g.add_rule(rule!("$ROOT" => ["$Relation", "$Entity"], JoinFn)).unwrap();

    let mut lex = SimpleLexicon::new();
    lex.add("washington", "$Entity", Formula::name("state.washington"), SemType::atomic("state"));
    lex.add(
        "capital",
        "$Relation",
        Formula::name("capitalOf"),
        SemType::func(SemType::atomic("state"), SemType::atomic("city")),
    );

    let spec = EngineSpec::new(Arc::new(g)).with_lexicon(Arc::new(lex));
    let parser = AnchoredParser::new(spec, ParserConfig::default()).unwrap();
    let out = parser.parse(&Example::from_tokens(["capital", "washington"]), &Weights::new());

    assert_eq!(out.derivations.len(), 1);
    let root = &out.derivations[0];
    assert_eq!(root.sem_type, SemType::atomic("city"));
    assert_eq!(root.formula.to_string(), "(capitalOf state.washington)");

    let graph = KnowledgeGraph::new(vec![(
        Value::name("city.olympia"),
        "capitalOf".into(),
        Value::name("state.washington"),
    )]);
    let ctx = ExContext { graph: Some(Arc::new(graph)) };
    let value = root.ensure_executed(&crate::executor::GraphExecutor, &ctx).value.clone();
    assert_eq!(value, Value::list([Value::name("city.olympia")]));
}

#[test]
fn literal_tokens_mix_with_categories_in_one_rhs() {
    use crate::example::ExContext;
    use crate::formula::ArithmeticMode;
    use crate::semfn::ArithmeticFn;
    use crate::values::Value;

    let mut g = Grammar::new();
    g.add_rule(rule!("$ROOT" => ["$Number", "plus", "$Number"], ArithmeticFn { mode: ArithmeticMode::Add }))
        .unwrap();

    let lex = SimpleLexicon::new().recognize_numbers("$Number");
    let spec = EngineSpec::new(Arc::new(g)).with_lexicon(Arc::new(lex));
    let parser = AnchoredParser::new(spec, ParserConfig::default()).unwrap();
    let out = parser.parse(&Example::from_tokens(["3", "plus", "4"]), &Weights::new());

    assert_eq!(out.derivations.len(), 1);
    let root = &out.derivations[0];
    assert_eq!(root.formula.to_string(), "(add (number 3) (number 4))");
    assert_eq!(root.sem_type, SemType::number());
    let value = root.ensure_executed(&crate::executor::GraphExecutor, &ExContext::default()).value.clone();
    assert_eq!(value, Value::Number(7.0));
}

#[test]
fn beams_keep_only_the_best_candidates_per_cell() {
    let mut g = Grammar::new();
    for name in ["v1", "v2", "v3"] {
        g.add_rule(rule!("$A" => ["x"], ConstantFn::new(Formula::name(name), SemType::entity()))).unwrap();
    }
    g.add_rule(rule!("$ROOT" => ["$A"], IdentityFn)).unwrap();

    let mut weights = Weights::new();
    weights.set("rule:$A -> x (constant[v1])", 1.0);
    weights.set("rule:$A -> x (constant[v2])", 2.0);
    weights.set("rule:$A -> x (constant[v3])", 3.0);

    let config = ParserConfig { beam_size: 2, ..ParserConfig::default() };
    let parser = anchored(Arc::new(g), config);
    let out = parser.parse(&Example::from_tokens(["x"]), &weights);

    let formulas: Vec<String> = out.derivations.iter().map(|d| d.formula.to_string()).collect();
    assert_eq!(formulas, vec!["v3", "v2"]);
    assert_eq!(out.derivations[0].score(), 3.0);
    assert!(out.metrics.fell_off_beam);
}

#[test]
fn reparsing_is_deterministic() {
    let parser = anchored(xy_grammar(), ParserConfig::default());
    let ex = Example::from_tokens(["x", "y"]);
    let weights = Weights::new();

    let first: Vec<(String, f64)> =
        parser.parse(&ex, &weights).derivations.iter().map(|d| (d.formula.to_string(), d.score())).collect();
    let second: Vec<(String, f64)> =
        parser.parse(&ex, &weights).derivations.iter().map(|d| (d.formula.to_string(), d.score())).collect();
    assert_eq!(first, second);
}

#[test]
fn one_failing_candidate_does_not_abort_the_cell() {
    let mut g = Grammar::new();
    g.add_rule(rule!("$A" => ["x"], ConstantFn::new(Formula::name("bad"), SemType::entity()))).unwrap();
    g.add_rule(rule!("$A" => ["x"], ConstantFn::new(Formula::name("good"), SemType::entity()))).unwrap();
    g.add_rule(rule!("$B" => ["y"], ConstantFn::new(Formula::name("other"), SemType::entity()))).unwrap();
    g.add_rule(rule!("$ROOT" => ["$A", "$B"], PairUnless("bad"))).unwrap();

    let parser = anchored(Arc::new(g), ParserConfig::default());
    let out = parser.parse(&Example::from_tokens(["x", "y"]), &Weights::new());

    assert_eq!(out.metrics.candidate_errors, 1);
    assert_eq!(out.derivations.len(), 1);
    assert_eq!(out.derivations[0].formula.to_string(), "(and good other)");
}

#[test]
fn pruning_strategies_reject_inside_the_engine() {
    let mut g = Grammar::new();
    g.add_rule(rule!("$E" => ["a"], ConstantFn::new(Formula::name("a-val"), SemType::entity()))).unwrap();
    g.add_rule(rule!("$ROOT" => ["$E", "$E"], MergeFn { mode: MergeMode::And })).unwrap();
    let g = Arc::new(g);

    let permissive = anchored(Arc::clone(&g), ParserConfig::default());
    let out = permissive.parse(&Example::from_tokens(["a", "a"]), &Weights::new());
    assert_eq!(out.derivations.len(), 1);

    let mut config = ParserConfig::default();
    config.pruner.strategies = vec![pruner::SAME_MERGE.to_string()];
    config.pruner.ensure_executed = false;
    let strict = anchored(g, config);
    let out = strict.parse(&Example::from_tokens(["a", "a"]), &Weights::new());
    assert!(out.derivations.is_empty());
    assert_eq!(out.metrics.pruned, vec![(pruner::SAME_MERGE, 1)]);
}

#[test]
fn node_budget_interrupts_at_cell_granularity() {
    let config = ParserConfig { node_budget: Some(1), ..ParserConfig::default() };
    let parser = anchored(xy_grammar(), config);
    let out = parser.parse(&Example::from_tokens(["x", "y"]), &Weights::new());
    assert!(out.metrics.interrupted);
    assert!(out.derivations.is_empty());
}

// --- Floating mode -----------------------------------------------------------

fn triple_grammar() -> Arc<Grammar> {
    let mut g = Grammar::new();
    g.add_rule(rule!("$E" => ["a"], ConstantFn::new(Formula::name("a"), SemType::entity()))).unwrap();
    g.add_rule(rule!("$E" => ["b"], ConstantFn::new(Formula::name("b"), SemType::entity()))).unwrap();
    g.add_rule(rule!("$ROOT" => ["$E", "$E", "$E"], TupleFn)).unwrap();
    Arc::new(g)
}

#[test]
fn floating_mode_splits_the_budget_across_nary_rhs() {
    let config = ParserConfig { max_formula_size: 4, ..ParserConfig::default() };
    let parser = FloatingParser::new(EngineSpec::new(triple_grammar()), config).unwrap();
    // floating derivations are unanchored; the utterance contributes nothing
    let out = parser.parse(&Example::from_tokens(["unrelated"]), &Weights::new());

    // all ordered triples over {a, b}
    assert_eq!(out.derivations.len(), 8);
    for root in &out.derivations {
        assert_eq!(root.span, None);
        assert_eq!(root.size(), 4);
        assert_eq!(root.children.len(), 3);
    }
    let formulas: Vec<String> = out.derivations.iter().map(|d| d.formula.to_string()).collect();
    assert!(formulas.contains(&"(:blk a b a)".to_string()));
}

#[test]
fn floating_sizes_are_monotone_and_bounded() {
    let config = ParserConfig { max_formula_size: 4, ..ParserConfig::default() };
    let parser = FloatingParser::new(EngineSpec::new(triple_grammar()), config).unwrap();
    let bounds = parser.bounds();
    assert_eq!(bounds.get_bound("$ROOT"), 4);
    assert_eq!(bounds.get_bound("$E"), 3);

    let out = parser.parse(&Example::from_tokens(["unrelated"]), &Weights::new());
    fn check(deriv: &Arc<Derivation>, bounds: &crate::grammar::CatSizeBound) {
        assert!(deriv.size() <= bounds.get_bound(&deriv.cat));
        for child in &deriv.children {
            assert!(child.size() < deriv.size(), "child {child} is not smaller than {deriv}");
            check(child, bounds);
        }
    }
    for root in &out.derivations {
        check(root, bounds);
    }
}

#[test]
fn floating_budget_too_small_for_the_rule_yields_nothing() {
    let config = ParserConfig { max_formula_size: 3, ..ParserConfig::default() };
    let parser = FloatingParser::new(EngineSpec::new(triple_grammar()), config).unwrap();
    let out = parser.parse(&Example::from_tokens(["unrelated"]), &Weights::new());
    assert!(out.derivations.is_empty());
}

// --- Mixing ------------------------------------------------------------------

#[test]
fn mix_unions_root_sets_subject_to_the_allow_list() {
    let grammar = xy_grammar();
    let ex = Example::from_tokens(["x", "y"]);
    let weights = Weights::new();

    let make_mix = || {
        MixParser::new()
            .add_engine(
                "anchored",
                Box::new(anchored(Arc::clone(&grammar), ParserConfig::default())),
                AllowSpec::Always,
            )
            .add_engine(
                "floating",
                Box::new(
                    FloatingParser::new(EngineSpec::new(Arc::clone(&grammar)), ParserConfig::default()).unwrap(),
                ),
                AllowSpec::Only(vec![("train".to_string(), None)]),
            )
    };

    let mix = make_mix();
    mix.begin_group("train", 0);
    let out = mix.parse(&ex, &weights);
    // the same pairing arrives from both engines; the union keeps both
    assert_eq!(out.derivations.len(), 2);

    let mix = make_mix();
    mix.begin_group("dev", 0);
    let out = mix.parse(&ex, &weights);
    assert_eq!(out.derivations.len(), 1);
    assert_eq!(out.derivations[0].span, Some(Span::new(0, 2)));
}
