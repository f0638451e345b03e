//! Mixing independent engines.
//!
//! A [`MixParser`] runs several sub-engines (anchored, floating, or any
//! external derivation source implementing [`ParserEngine`]) and unions their
//! root derivation sets before the final ranking. Per-engine internals are
//! untouched.
//!
//! Each sub-engine carries an allow-list keyed by training group and
//! iteration, so a curriculum can admit a source only during certain phases
//! (say, a serialized oracle during early training iterations and never at
//! dev time).

use std::sync::RwLock;

use tracing::debug;

use super::state::{ParseOutcome, rank_cmp};
use super::ParserEngine;
use crate::example::Example;
use crate::features::Weights;

/// The current training phase, set between parses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub group: String,
    pub iter: usize,
}

/// When a sub-engine's derivations are admitted into the union.
#[derive(Debug, Clone)]
pub enum AllowSpec {
    /// Admit in every phase.
    Always,
    /// Admit only in the listed `(group, iteration)` pairs; `None` for the
    /// iteration means every iteration of that group.
    Only(Vec<(String, Option<usize>)>),
}

impl AllowSpec {
    fn allows(&self, phase: Option<&Phase>) -> bool {
        match self {
            AllowSpec::Always => true,
            AllowSpec::Only(entries) => match phase {
                None => false,
                Some(phase) => entries
                    .iter()
                    .any(|(group, iter)| *group == phase.group && iter.is_none_or(|i| i == phase.iter)),
            },
        }
    }
}

pub struct MixParser {
    engines: Vec<(String, Box<dyn ParserEngine>, AllowSpec)>,
    /// Set by `begin_group` between parses; never written mid-parse.
    phase: RwLock<Option<Phase>>,
}

impl MixParser {
    pub fn new() -> MixParser {
        MixParser { engines: Vec::new(), phase: RwLock::new(None) }
    }

    pub fn add_engine(mut self, name: impl Into<String>, engine: Box<dyn ParserEngine>, allow: AllowSpec) -> MixParser {
        self.engines.push((name.into(), engine, allow));
        self
    }

    /// Declare the phase for subsequent parses. Callers synchronize this with
    /// their training loop; it must not race an in-flight parse.
    pub fn begin_group(&self, group: impl Into<String>, iter: usize) {
        *self.phase.write().expect("phase lock poisoned") = Some(Phase { group: group.into(), iter });
    }
}

impl Default for MixParser {
    fn default() -> Self {
        MixParser::new()
    }
}

impl ParserEngine for MixParser {
    fn parse(&self, ex: &Example, weights: &Weights) -> ParseOutcome {
        let phase = self.phase.read().expect("phase lock poisoned").clone();
        let mut union = ParseOutcome { derivations: Vec::new(), metrics: Default::default() };

        for (name, engine, allow) in &self.engines {
            if !allow.allows(phase.as_ref()) {
                debug!(engine = %name, "suppressed by allow-list");
                continue;
            }
            let outcome = engine.parse(ex, weights);
            debug!(engine = %name, derivations = outcome.derivations.len(), "mixed in");
            union.metrics.absorb(&outcome.metrics);
            union.derivations.extend(outcome.derivations);
        }

        // Re-rank the union; ties keep engine order via the sequence number.
        let mut ranked: Vec<_> = std::mem::take(&mut union.derivations)
            .into_iter()
            .enumerate()
            .map(|(i, deriv)| super::state::Ranked { deriv, seq: i as u64 })
            .collect();
        ranked.sort_by(|a, b| rank_cmp(b, a));
        union.derivations = ranked.into_iter().map(|r| r.deriv).collect();
        union
    }
}
