//! Shared per-parse machinery.
//!
//! Both engines drive the same funnel for every candidate a semantic
//! function emits:
//!
//! ```text
//! candidate ── hard type check ── build + featurize + score ── prune ── dedup ── beam
//!                   │                                            │         │       │
//!                   └─ type_rejected                             │         │       └─ fell_off_beam
//!                                                                └─ pruned └─ duplicate dropped
//! ```
//!
//! A [`ParseState`] owns the chart, the beams, the dedup set, the pruning
//! scratch state, and the metrics for exactly one parse; nothing in it is
//! shared across examples.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use super::metrics::ParseMetrics;
use super::{EngineSpec, ParserConfig};
use crate::beam::BoundedPriorityQueue;
use crate::derivation::{Derivation, DerivationBuilder, Span};
use crate::example::Example;
use crate::features::Weights;
use crate::formula::Formula;
use crate::grammar::{CatSizeBound, Rule};
use crate::pruner::{DerivationPruner, PruneContext, PruneScratch};
use crate::semfn::{CallInfo, Candidate};
use crate::semtype::SemType;

/// Where a cell lives: a token span, or a formula size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKey {
    Anchored(Span),
    Floating(usize),
}

/// The ranked set a parse returns.
#[derive(Debug)]
pub struct ParseOutcome {
    /// Root derivations, best first. Empty when the utterance has no parse;
    /// that is a normal outcome, not an error.
    pub derivations: Vec<Arc<Derivation>>,
    pub metrics: ParseMetrics,
}

/// A derivation plus its insertion sequence number, which breaks score ties
/// deterministically (earlier insertion ranks higher).
#[derive(Debug, Clone)]
pub struct Ranked {
    pub deriv: Arc<Derivation>,
    pub seq: u64,
}

/// Comparator for beams: ascending by score, with later insertions ranking
/// lower on ties. "Strictly better" under this ordering is exactly what beam
/// eviction requires.
pub fn rank_cmp(a: &Ranked, b: &Ranked) -> Ordering {
    a.deriv.score().partial_cmp(&b.deriv.score()).unwrap_or(Ordering::Equal).then_with(|| b.seq.cmp(&a.seq))
}

type CellBeam = BoundedPriorityQueue<Ranked, fn(&Ranked, &Ranked) -> Ordering>;

/// The chart: one beam per (category, cell key), plus an insertion-ordered
/// index of which categories are populated at each key so engines can
/// enumerate them deterministically.
#[derive(Default)]
struct Chart {
    cells: HashMap<(String, CellKey), CellBeam>,
    cats_by_key: HashMap<CellKey, Vec<String>>,
}

impl Chart {
    fn beam_mut(&mut self, cat: &str, key: CellKey, capacity: usize) -> &mut CellBeam {
        let id = (cat.to_string(), key);
        if !self.cells.contains_key(&id) {
            self.cats_by_key.entry(key).or_default().push(cat.to_string());
            self.cells.insert(id.clone(), BoundedPriorityQueue::new(capacity, rank_cmp as _));
        }
        self.cells.get_mut(&id).expect("cell was just inserted")
    }

    fn cats_at(&self, key: CellKey) -> Vec<String> {
        self.cats_by_key.get(&key).cloned().unwrap_or_default()
    }

    /// Cell contents, best first. Insertion order breaks ties, so repeated
    /// calls (and reparses) see identical sequences.
    fn sorted(&self, cat: &str, key: CellKey) -> Vec<Arc<Derivation>> {
        match self.cells.get(&(cat.to_string(), key)) {
            None => Vec::new(),
            Some(beam) => {
                let mut ranked = beam.to_sorted_vec();
                ranked.reverse();
                ranked.into_iter().map(|r| r.deriv).collect()
            }
        }
    }
}

/// How a produced candidate maps to a chart cell.
pub enum CellAssign<'a> {
    /// Anchored: every candidate of this application lands in one cell.
    Fixed(CellKey),
    /// Floating: the candidate lands at its own formula size, which must be
    /// at least `target` (cells below `target` are already closed) and within
    /// the category's size bound.
    FloatingAtLeast { target: usize, bounds: &'a CatSizeBound },
}

pub struct ParseState<'a> {
    pub ex: &'a Example,
    pub weights: &'a Weights,
    pub spec: &'a EngineSpec,
    pub config: &'a ParserConfig,
    pruner: &'a DerivationPruner,
    chart: Chart,
    seen: HashSet<(String, CellKey, Arc<Formula>, SemType)>,
    scratch: PruneScratch,
    seq: u64,
    nodes_built: usize,
    pub metrics: ParseMetrics,
}

impl<'a> ParseState<'a> {
    pub fn new(
        ex: &'a Example,
        weights: &'a Weights,
        spec: &'a EngineSpec,
        config: &'a ParserConfig,
        pruner: &'a DerivationPruner,
    ) -> ParseState<'a> {
        ParseState {
            ex,
            weights,
            spec,
            config,
            pruner,
            chart: Chart::default(),
            seen: HashSet::new(),
            scratch: PruneScratch::default(),
            seq: 0,
            nodes_built: 0,
            metrics: ParseMetrics::default(),
        }
    }

    /// Whether the caller-imposed node budget is spent. Engines check this at
    /// cell granularity and stop filling further cells when it trips.
    pub fn budget_exhausted(&self) -> bool {
        self.config.node_budget.is_some_and(|budget| self.nodes_built >= budget)
    }

    pub fn cats_at(&self, key: CellKey) -> Vec<String> {
        self.chart.cats_at(key)
    }

    pub fn derivations(&self, cat: &str, key: CellKey) -> Vec<Arc<Derivation>> {
        self.chart.sorted(cat, key)
    }

    /// Seed a base cell directly from the lexicon (no rule fired).
    pub fn seed(&mut self, cat: &str, key: CellKey, span: Option<Span>, candidate: Candidate) {
        self.metrics.candidates += 1;
        self.admit(cat, key, span, None, Vec::new(), candidate);
    }

    /// Run one rule application: call the semantic function on `children`,
    /// pull its candidate stream, and push survivors through the funnel. A
    /// stream error drops that one candidate and continues.
    pub fn apply_rule(
        &mut self,
        rule: &Arc<Rule>,
        assign: CellAssign<'_>,
        span: Option<Span>,
        children: &[Arc<Derivation>],
    ) {
        let info = CallInfo {
            cat: &rule.lhs,
            span,
            rule,
            children,
            hier: &self.spec.hierarchy,
        };
        // The stream is materialized before admission because admitting
        // mutates `self`; candidate counts stay identical either way.
        let results: Vec<_> = rule.sem.call(self.ex, info).collect();
        for result in results {
            self.nodes_built += 1;
            self.metrics.candidates += 1;
            match result {
                Err(err) => {
                    self.metrics.candidate_errors += 1;
                    trace!(rule = %rule, error = %err, "candidate failed; skipping");
                }
                Ok(candidate) => {
                    let key = match &assign {
                        CellAssign::Fixed(key) => Some(*key),
                        CellAssign::FloatingAtLeast { target, bounds } => {
                            let size = candidate.formula.size();
                            if size < *target || size > bounds.get_bound(&rule.lhs) {
                                self.metrics.size_rejected += 1;
                                None
                            } else {
                                Some(CellKey::Floating(size))
                            }
                        }
                    };
                    if let Some(key) = key {
                        self.admit(&rule.lhs, key, span, Some(Arc::clone(rule)), children.to_vec(), candidate);
                    }
                }
            }
        }
    }

    /// The per-candidate funnel: type check, build, featurize, score, prune,
    /// dedup, beam insert. Returns whether the candidate was kept.
    fn admit(
        &mut self,
        cat: &str,
        key: CellKey,
        span: Option<Span>,
        rule: Option<Arc<Rule>>,
        children: Vec<Arc<Derivation>>,
        candidate: Candidate,
    ) -> bool {
        // (1) hard type check; rejection is normal and quiet
        let mut sem_type = candidate.sem_type;
        if let Some(rule) = &rule {
            if let Some((_, constraint)) = rule.info.iter().find(|(k, _)| k == "type") {
                sem_type = sem_type.meet(&SemType::atomic(constraint.clone()), &self.spec.hierarchy);
            }
        }
        if self.config.hard_type_check && !sem_type.is_valid() {
            self.metrics.type_rejected += 1;
            return false;
        }

        // (2) build, featurize, score
        let mut builder = DerivationBuilder::new(cat, span, candidate.formula, sem_type);
        if let Some(rule) = rule {
            if let Some((_, bonus)) = rule.info.iter().find(|(k, _)| k == "bonus") {
                if let Ok(bonus) = bonus.parse::<f64>() {
                    builder = builder.bonus(bonus);
                }
            }
            builder = builder.rule(rule);
        }
        builder = builder.children(children);
        builder.add_features(&candidate.features);
        self.spec.extractor.extract(self.ex, &mut builder);
        let deriv = builder.finish(self.weights);

        // (3) prune
        if self.pruner.is_active() {
            let ctx = PruneContext {
                ex: self.ex,
                executor: self.spec.executor.as_ref(),
                hier: &self.spec.hierarchy,
                max_values: self.config.pruner.max_values,
                allow_count_one: self.config.pruner.allow_count_one,
            };
            if let Some(strategy) = self.pruner.is_pruned(&deriv, &ctx, &mut self.scratch) {
                self.metrics.record_prune(strategy);
                return false;
            }
        }

        // (4) dedup: the same (formula, type) in the same cell adds nothing
        let dedup = (cat.to_string(), key, Arc::clone(&deriv.formula), deriv.sem_type.clone());
        if !self.seen.insert(dedup) {
            return false;
        }

        // (5) beam insert
        let seq = self.seq;
        self.seq += 1;
        let beam = self.chart.beam_mut(cat, key, self.config.beam_size);
        let at_capacity = beam.len() == beam.capacity();
        let kept = beam.add(Ranked { deriv, seq });
        if kept {
            self.metrics.kept += 1;
        }
        if at_capacity {
            // either the candidate was refused or it evicted the old worst
            self.metrics.fell_off_beam = true;
        }
        kept
    }

    pub fn touch_cell(&mut self) {
        self.metrics.cells_touched += 1;
    }

    /// Drain the given cells into a single ranked list, best first.
    pub fn ranked(&self, cat: &str, keys: impl IntoIterator<Item = CellKey>) -> Vec<Arc<Derivation>> {
        let mut all: Vec<Ranked> = Vec::new();
        for key in keys {
            if let Some(beam) = self.chart.cells.get(&(cat.to_string(), key)) {
                all.extend(beam.to_sorted_vec());
            }
        }
        all.sort_by(|a, b| rank_cmp(b, a));
        all.into_iter().map(|r| r.deriv).collect()
    }
}
