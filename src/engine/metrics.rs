//! Parse metrics.
//!
//! Opt-in observability for one parse: how many candidates the semantic
//! functions produced, how many survived type-checking, pruning, and the
//! beams, and how long each pass took. The hot path only bumps counters;
//! nothing here allocates per candidate.

use std::time::Duration;

/// Timing and production counts for one outer pass (one span length in
/// anchored mode, one formula size in floating mode).
#[derive(Debug, Default, Clone)]
pub struct PassMetrics {
    /// Span length or formula size this pass filled.
    pub index: usize,
    pub duration: Duration,
    /// Derivations kept (inserted into some beam) during the pass.
    pub kept: usize,
}

/// Counters for a whole parse.
#[derive(Debug, Default, Clone)]
pub struct ParseMetrics {
    /// Total wall-clock time.
    pub total: Duration,
    /// Chart cells that received at least one insertion attempt.
    pub cells_touched: usize,
    /// Candidates pulled from semantic-function streams.
    pub candidates: usize,
    /// Derivations that survived type check, pruning, and beam insertion.
    pub kept: usize,
    /// Candidates rejected by the hard type check.
    pub type_rejected: usize,
    /// Candidates rejected by the floating size bounds.
    pub size_rejected: usize,
    /// Recoverable per-candidate semantic-function failures (skipped).
    pub candidate_errors: usize,
    /// Prune counts by vetoing strategy, in first-seen order.
    pub pruned: Vec<(&'static str, usize)>,
    /// Whether any beam evicted or refused a candidate at capacity.
    pub fell_off_beam: bool,
    /// Whether the parse stopped early on the node budget.
    pub interrupted: bool,
    /// One entry per outer pass.
    pub passes: Vec<PassMetrics>,
}

impl ParseMetrics {
    pub fn record_prune(&mut self, strategy: &'static str) {
        match self.pruned.iter_mut().find(|(name, _)| *name == strategy) {
            Some((_, n)) => *n += 1,
            None => self.pruned.push((strategy, 1)),
        }
    }

    pub fn pruned_total(&self) -> usize {
        self.pruned.iter().map(|(_, n)| n).sum()
    }

    /// Fold another engine's metrics into this one (used when mixing).
    pub fn absorb(&mut self, other: &ParseMetrics) {
        self.total += other.total;
        self.cells_touched += other.cells_touched;
        self.candidates += other.candidates;
        self.kept += other.kept;
        self.type_rejected += other.type_rejected;
        self.size_rejected += other.size_rejected;
        self.candidate_errors += other.candidate_errors;
        for (strategy, n) in &other.pruned {
            match self.pruned.iter_mut().find(|(name, _)| name == strategy) {
                Some((_, total)) => *total += n,
                None => self.pruned.push((strategy, *n)),
            }
        }
        self.fell_off_beam |= other.fell_off_beam;
        self.interrupted |= other.interrupted;
    }
}
