//! Semantic functions: the pluggable productions behind grammar rules.
//!
//! A [`SemanticFn`] receives the child derivations matched for a rule's RHS
//! and produces zero or more `(formula, type, feature-delta)` candidates. The
//! contract, which the engine relies on:
//!
//! - stateless across calls;
//! - candidates come back as a *pull-based stream* (an iterator), so a
//!   function with a large candidate space never materializes it eagerly;
//! - a recoverable failure for one candidate is an `Err` item in the stream —
//!   the engine skips it and keeps pulling, it never aborts the cell.
//!
//! The built-in functions here cover the structural compositions (join,
//! merge, aggregate, ...). Task-specific libraries plug in through the same
//! trait, typically registered in a [`SemFnRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::derivation::{Derivation, Span};
use crate::example::Example;
use crate::features::FeatureVector;
use crate::formula::{AggregateMode, ArithmeticMode, Formula, MergeMode, SuperlativeMode};
use crate::grammar::Rule;
use crate::semtype::{SemType, TypeHierarchy};

// --- Candidates --------------------------------------------------------------

/// One output of a semantic function.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub formula: Arc<Formula>,
    pub sem_type: SemType,
    /// Features contributed by the semantic function itself.
    pub features: FeatureVector,
}

impl Candidate {
    pub fn new(formula: Formula, sem_type: SemType) -> Candidate {
        Candidate { formula: Arc::new(formula), sem_type, features: FeatureVector::new() }
    }

    pub fn from_arc(formula: Arc<Formula>, sem_type: SemType) -> Candidate {
        Candidate { formula, sem_type, features: FeatureVector::new() }
    }

    pub fn with_feature(mut self, name: impl Into<String>) -> Candidate {
        self.features.add(name);
        self
    }
}

/// A recoverable, per-candidate failure. The engine drops the candidate and
/// continues exploring the rest of the combination space.
#[derive(Debug, Clone)]
pub struct CandidateError(pub String);

impl fmt::Display for CandidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type CandidateResult = Result<Candidate, CandidateError>;

/// Lazily pulled candidate stream; consumed until exhausted or until beam
/// saturation makes further pulls unnecessary.
pub type CandidateStream<'a> = Box<dyn Iterator<Item = CandidateResult> + 'a>;

/// Everything a semantic function may look at for one application.
#[derive(Clone, Copy)]
pub struct CallInfo<'a> {
    pub cat: &'a str,
    pub span: Option<Span>,
    pub rule: &'a Rule,
    pub children: &'a [Arc<Derivation>],
    pub hier: &'a TypeHierarchy,
}

pub trait SemanticFn: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stable description used for rule identity and logging. Parametrized
    /// functions should fold their parameters in.
    fn describe(&self) -> String {
        self.name().to_string()
    }

    fn call<'a>(&'a self, ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a>;
}

pub fn empty_stream<'a>() -> CandidateStream<'a> {
    Box::new(std::iter::empty())
}

pub fn once_stream<'a>(candidate: Candidate) -> CandidateStream<'a> {
    Box::new(std::iter::once(Ok(candidate)))
}

pub fn err_stream<'a>(msg: impl Into<String>) -> CandidateStream<'a> {
    Box::new(std::iter::once(Err(CandidateError(msg.into()))))
}

fn expect_children<'a>(info: &CallInfo<'a>, n: usize, who: &str) -> Result<(), String> {
    if info.children.len() == n { Ok(()) } else { Err(format!("{who} expects {n} children, got {}", info.children.len())) }
}

// --- Built-in functions ------------------------------------------------------

/// Pass the single child through unchanged.
#[derive(Debug)]
pub struct IdentityFn;

impl SemanticFn for IdentityFn {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 1, self.name()) {
            return err_stream(e);
        }
        let child = &info.children[0];
        once_stream(Candidate::from_arc(Arc::clone(&child.formula), child.sem_type.clone()))
    }
}

/// Ignore the children and emit a fixed formula/type. The usual production
/// for lexical rules with literal-token right-hand sides.
#[derive(Debug)]
pub struct ConstantFn {
    pub formula: Arc<Formula>,
    pub sem_type: SemType,
}

impl ConstantFn {
    pub fn new(formula: Formula, sem_type: SemType) -> ConstantFn {
        ConstantFn { formula: Arc::new(formula), sem_type }
    }
}

impl SemanticFn for ConstantFn {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn describe(&self) -> String {
        format!("constant[{}]", self.formula)
    }

    fn call<'a>(&'a self, _ex: &'a Example, _info: CallInfo<'a>) -> CandidateStream<'a> {
        once_stream(Candidate::from_arc(Arc::clone(&self.formula), self.sem_type.clone()))
    }
}

/// Pick child `index` and discard the rest.
#[derive(Debug)]
pub struct SelectFn {
    pub index: usize,
}

impl SemanticFn for SelectFn {
    fn name(&self) -> &'static str {
        "select"
    }

    fn describe(&self) -> String {
        format!("select[{}]", self.index)
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        match info.children.get(self.index) {
            Some(child) => once_stream(Candidate::from_arc(Arc::clone(&child.formula), child.sem_type.clone())),
            None => err_stream(format!("select[{}] out of range ({} children)", self.index, info.children.len())),
        }
    }
}

/// Relational join: first child is the relation, second the argument set.
/// The type is the relation type applied to the argument type; an
/// inapplicable pair surfaces as a `Bottom`-typed candidate for the type
/// check to reject.
#[derive(Debug)]
pub struct JoinFn;

impl SemanticFn for JoinFn {
    fn name(&self) -> &'static str {
        "join"
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 2, self.name()) {
            return err_stream(e);
        }
        let (relation, child) = (&info.children[0], &info.children[1]);
        let out_type = relation.sem_type.apply(&child.sem_type, info.hier);
        let formula = Formula::Join {
            relation: Arc::clone(&relation.formula),
            child: Arc::clone(&child.formula),
        };
        once_stream(Candidate::new(formula, out_type))
    }
}

/// Set intersection/union of the two children; the type is their meet.
#[derive(Debug)]
pub struct MergeFn {
    pub mode: MergeMode,
}

impl SemanticFn for MergeFn {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn describe(&self) -> String {
        format!("merge[{}]", self.mode.as_str())
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 2, self.name()) {
            return err_stream(e);
        }
        let (left, right) = (&info.children[0], &info.children[1]);
        let out_type = left.sem_type.meet(&right.sem_type, info.hier);
        let formula = Formula::Merge {
            mode: self.mode,
            left: Arc::clone(&left.formula),
            right: Arc::clone(&right.formula),
        };
        once_stream(Candidate::new(formula, out_type))
    }
}

#[derive(Debug)]
pub struct AggregateFn {
    pub mode: AggregateMode,
}

impl SemanticFn for AggregateFn {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn describe(&self) -> String {
        format!("aggregate[{}]", self.mode.as_str())
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 1, self.name()) {
            return err_stream(e);
        }
        let child = &info.children[0];
        let out_type = match self.mode {
            AggregateMode::Exists => SemType::boolean(),
            AggregateMode::Count => SemType::number(),
            // numeric aggregates require a numeric child
            _ => {
                if child.sem_type.meet(&SemType::number(), info.hier).is_valid() {
                    SemType::number()
                } else {
                    SemType::Bottom
                }
            }
        };
        let formula = Formula::Aggregate { mode: self.mode, child: Arc::clone(&child.formula) };
        once_stream(Candidate::new(formula, out_type))
    }
}

#[derive(Debug)]
pub struct ArithmeticFn {
    pub mode: ArithmeticMode,
}

impl SemanticFn for ArithmeticFn {
    fn name(&self) -> &'static str {
        "arithmetic"
    }

    fn describe(&self) -> String {
        format!("arithmetic[{}]", self.mode.as_str())
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 2, self.name()) {
            return err_stream(e);
        }
        let (left, right) = (&info.children[0], &info.children[1]);
        let number = SemType::number();
        let out_type = if left.sem_type.meet(&number, info.hier).is_valid()
            && right.sem_type.meet(&number, info.hier).is_valid()
        {
            number
        } else {
            SemType::Bottom
        };
        let formula = Formula::Arithmetic {
            mode: self.mode,
            left: Arc::clone(&left.formula),
            right: Arc::clone(&right.formula),
        };
        once_stream(Candidate::new(formula, out_type))
    }
}

/// Complement of the single child; type passes through.
#[derive(Debug)]
pub struct NotFn;

impl SemanticFn for NotFn {
    fn name(&self) -> &'static str {
        "not"
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 1, self.name()) {
            return err_stream(e);
        }
        let child = &info.children[0];
        once_stream(Candidate::new(Formula::Not(Arc::clone(&child.formula)), child.sem_type.clone()))
    }
}

/// Wrap the single child's formula in a binder for `var`.
#[derive(Debug)]
pub struct LambdaFn {
    pub var: String,
}

impl SemanticFn for LambdaFn {
    fn name(&self) -> &'static str {
        "lambda"
    }

    fn describe(&self) -> String {
        format!("lambda[{}]", self.var)
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 1, self.name()) {
            return err_stream(e);
        }
        let child = &info.children[0];
        let formula = Formula::Lambda { var: self.var.clone(), body: Arc::clone(&child.formula) };
        let sem_type = SemType::func(SemType::Top, child.sem_type.clone());
        once_stream(Candidate::new(formula, sem_type))
    }
}

/// Restrict the first child by the second (a lambda condition).
#[derive(Debug)]
pub struct FilterFn;

impl SemanticFn for FilterFn {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 2, self.name()) {
            return err_stream(e);
        }
        let (domain, condition) = (&info.children[0], &info.children[1]);
        let formula = Formula::Filter {
            domain: Arc::clone(&domain.formula),
            condition: Arc::clone(&condition.formula),
        };
        once_stream(Candidate::new(formula, domain.sem_type.clone()))
    }
}

/// Top-1 superlative over (head, relation) children.
#[derive(Debug)]
pub struct SuperlativeFn {
    pub mode: SuperlativeMode,
}

impl SemanticFn for SuperlativeFn {
    fn name(&self) -> &'static str {
        "superlative"
    }

    fn describe(&self) -> String {
        format!("superlative[{}]", self.mode.as_str())
    }

    fn call<'a>(&'a self, _ex: &'a Example, info: CallInfo<'a>) -> CandidateStream<'a> {
        if let Err(e) = expect_children(&info, 2, self.name()) {
            return err_stream(e);
        }
        let (head, relation) = (&info.children[0], &info.children[1]);
        let formula = Formula::Superlative {
            mode: self.mode,
            rank: Arc::new(Formula::number(1.0)),
            count: Arc::new(Formula::number(1.0)),
            head: Arc::clone(&head.formula),
            relation: Arc::clone(&relation.formula),
        };
        once_stream(Candidate::new(formula, head.sem_type.clone()))
    }
}

// --- Registry ----------------------------------------------------------------

type SemFnFactory = Box<dyn Fn() -> Arc<dyn SemanticFn> + Send + Sync>;

/// String-keyed factories for semantic functions, populated at startup.
/// Late-bound pluggability without any runtime reflection: callers that
/// materialize grammars from external descriptions look functions up here.
#[derive(Default)]
pub struct SemFnRegistry {
    factories: HashMap<String, SemFnFactory>,
}

impl SemFnRegistry {
    pub fn new() -> SemFnRegistry {
        SemFnRegistry::default()
    }

    /// A registry pre-populated with the built-in structural functions.
    pub fn with_defaults() -> SemFnRegistry {
        let mut r = SemFnRegistry::new();
        r.register("identity", || Arc::new(IdentityFn));
        r.register("join", || Arc::new(JoinFn));
        r.register("not", || Arc::new(NotFn));
        r.register("filter", || Arc::new(FilterFn));
        r.register("merge.and", || Arc::new(MergeFn { mode: MergeMode::And }));
        r.register("merge.or", || Arc::new(MergeFn { mode: MergeMode::Or }));
        r.register("aggregate.count", || Arc::new(AggregateFn { mode: AggregateMode::Count }));
        r.register("superlative.argmax", || Arc::new(SuperlativeFn { mode: SuperlativeMode::Argmax }));
        r.register("superlative.argmin", || Arc::new(SuperlativeFn { mode: SuperlativeMode::Argmin }));
        r
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn SemanticFn> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn SemanticFn>> {
        self.factories.get(name).map(|f| f())
    }
}
