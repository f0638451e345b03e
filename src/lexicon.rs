//! Lexicon seeding: how leaf derivations enter the chart.
//!
//! The engine itself never interprets raw text. Everything lexical comes
//! through a [`LexiconSeeder`]: given a token span it returns `(category,
//! formula, type)` seed triples that populate the base cells. The bundled
//! [`SimpleLexicon`] does exact-phrase lookup plus regex recognition of
//! numbers and ISO dates; knowledge-source-backed fuzzy matching hangs off
//! the same trait.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::derivation::Span;
use crate::example::Example;
use crate::formula::Formula;
use crate::semfn::Candidate;
use crate::semtype::SemType;

/// A seed for one chart cell: the category it lands in plus the candidate.
#[derive(Debug, Clone)]
pub struct SeedEntry {
    pub cat: String,
    pub candidate: Candidate,
}

impl SeedEntry {
    pub fn new(cat: impl Into<String>, formula: Formula, sem_type: SemType) -> SeedEntry {
        SeedEntry { cat: cat.into(), candidate: Candidate::new(formula, sem_type) }
    }
}

/// Approximate-match modes against a knowledge source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyMatchMode {
    Entity,
    Unary,
    Binary,
}

/// Populates base chart cells.
pub trait LexiconSeeder: Send + Sync {
    /// Seeds for one token span (called for spans the engine is seeding).
    fn seed(&self, ex: &Example, span: Span) -> Vec<SeedEntry>;

    /// Predicates approximately matching `phrase`, filtered by mode.
    fn fuzzy(&self, _phrase: &str, _mode: FuzzyMatchMode) -> Vec<SeedEntry> {
        Vec::new()
    }

    /// The "all possible" enumeration mode: every seed the lexicon can emit,
    /// regardless of surface phrase. The floating engine uses this as its
    /// base case.
    fn all_entries(&self) -> Vec<SeedEntry> {
        Vec::new()
    }
}

/// A seeder that never produces anything; useful for grammars whose leaves
/// are all literal-token rules.
#[derive(Debug, Default)]
pub struct EmptyLexicon;

impl LexiconSeeder for EmptyLexicon {
    fn seed(&self, _ex: &Example, _span: Span) -> Vec<SeedEntry> {
        Vec::new()
    }
}

// --- SimpleLexicon -----------------------------------------------------------

/// Exact-phrase lookup plus numeric/date token recognition.
#[derive(Debug, Default)]
pub struct SimpleLexicon {
    entries: HashMap<String, Vec<SeedEntry>>,
    /// Category numeric tokens seed into, e.g. `$Number`.
    number_cat: Option<String>,
    /// Category ISO-date tokens seed into, e.g. `$Date`.
    date_cat: Option<String>,
}

impl SimpleLexicon {
    pub fn new() -> SimpleLexicon {
        SimpleLexicon::default()
    }

    /// Map an exact (lowercased) phrase to a seed.
    pub fn add(&mut self, phrase: &str, cat: impl Into<String>, formula: Formula, sem_type: SemType) {
        self.entries.entry(phrase.to_lowercase()).or_default().push(SeedEntry::new(cat, formula, sem_type));
    }

    pub fn recognize_numbers(mut self, cat: impl Into<String>) -> SimpleLexicon {
        self.number_cat = Some(cat.into());
        self
    }

    pub fn recognize_dates(mut self, cat: impl Into<String>) -> SimpleLexicon {
        self.date_cat = Some(cat.into());
        self
    }
}

impl LexiconSeeder for SimpleLexicon {
    fn seed(&self, ex: &Example, span: Span) -> Vec<SeedEntry> {
        let phrase = ex.phrase(span).to_lowercase();
        let mut out: Vec<SeedEntry> = self.entries.get(&phrase).cloned().unwrap_or_default();

        if span.len() == 1 {
            if let Some(cat) = &self.number_cat {
                if crate::regex!(r"^[+-]?(\d+\.?\d*|\.\d+)$").is_match(&phrase) {
                    if let Ok(n) = phrase.parse::<f64>() {
                        out.push(SeedEntry::new(cat.clone(), Formula::number(n), SemType::number()));
                    }
                }
            }
            if let Some(cat) = &self.date_cat {
                if let Some(caps) = crate::regex!(r"^(\d{4})-(\d{2})-(\d{2})$").captures(&phrase) {
                    let ymd = (caps[1].parse::<i32>(), caps[2].parse::<u32>(), caps[3].parse::<u32>());
                    if let (Ok(y), Ok(m), Ok(d)) = ymd {
                        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                            out.push(SeedEntry::new(
                                cat.clone(),
                                Formula::Value(crate::values::Value::Date(date)),
                                SemType::date(),
                            ));
                        }
                    }
                }
            }
        }
        out
    }

    fn fuzzy(&self, phrase: &str, mode: FuzzyMatchMode) -> Vec<SeedEntry> {
        let needle = phrase.to_lowercase();
        let mut out = Vec::new();
        for (key, entries) in &self.entries {
            if !key.contains(&needle) && !needle.contains(key.as_str()) {
                continue;
            }
            for entry in entries {
                let keep = match mode {
                    FuzzyMatchMode::Binary => matches!(entry.candidate.sem_type, SemType::Func(..)),
                    FuzzyMatchMode::Unary => !matches!(entry.candidate.sem_type, SemType::Func(..)),
                    FuzzyMatchMode::Entity => {
                        matches!(&*entry.candidate.formula, Formula::Value(crate::values::Value::Name(_)))
                            && !matches!(entry.candidate.sem_type, SemType::Func(..))
                    }
                };
                if keep {
                    out.push(entry.clone());
                }
            }
        }
        // Deterministic output regardless of map iteration order.
        out.sort_by_key(entry_key);
        out
    }

    fn all_entries(&self) -> Vec<SeedEntry> {
        let mut out: Vec<SeedEntry> = self.entries.values().flatten().cloned().collect();
        out.sort_by_key(entry_key);
        out
    }
}

fn entry_key(entry: &SeedEntry) -> (String, String) {
    (entry.cat.clone(), entry.candidate.formula.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> SimpleLexicon {
        let mut lex = SimpleLexicon::new().recognize_numbers("$Number").recognize_dates("$Date");
        lex.add("seattle", "$Entity", Formula::name("city.seattle"), SemType::atomic("city"));
        lex.add(
            "population",
            "$Relation",
            Formula::name("population"),
            SemType::func(SemType::atomic("city"), SemType::number()),
        );
        lex
    }

    #[test]
    fn exact_phrase_lookup_is_case_insensitive() {
        let lex = lexicon();
        let ex = Example::from_tokens(["Seattle"]);
        let seeds = lex.seed(&ex, Span::new(0, 1));
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].cat, "$Entity");
    }

    #[test]
    fn numbers_and_dates_are_recognized() {
        let lex = lexicon();
        let ex = Example::from_tokens(["600000", "2013-02-12"]);
        let n = lex.seed(&ex, Span::new(0, 1));
        assert_eq!(n[0].cat, "$Number");
        assert_eq!(n[0].candidate.formula.to_string(), "(number 600000)");
        let d = lex.seed(&ex, Span::new(1, 2));
        assert_eq!(d[0].cat, "$Date");
        assert_eq!(d[0].candidate.sem_type, SemType::date());
    }

    #[test]
    fn fuzzy_filters_by_mode() {
        let lex = lexicon();
        assert_eq!(lex.fuzzy("popul", FuzzyMatchMode::Binary).len(), 1);
        assert_eq!(lex.fuzzy("popul", FuzzyMatchMode::Entity).len(), 0);
        assert_eq!(lex.fuzzy("seattle area", FuzzyMatchMode::Entity).len(), 1);
    }
}
