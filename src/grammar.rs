//! Rules, the grammar, and its indexes.
//!
//! This module holds the *static* side of the engine: the rule database and
//! the structures derived from it that make a parse run fast.
//!
//! - [`Rule`]: one production `$Lhs -> rhs...` with a semantic function.
//! - [`Grammar`]: the ordered rule set plus a [`Trie`] over right-hand sides,
//!   maintained incrementally so rules can be added between parses.
//! - [`CatSizeBound`]: per-category formula-size caps for the floating engine.
//!
//! Once a parse starts, everything here is read-only shared state; the only
//! mutation path is [`Grammar::add_rule`], which takes `&mut self` and is
//! therefore impossible to call while a parse holds a shared borrow.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::EngineError;
use crate::semfn::SemanticFn;

/// The distinguished root category.
pub const ROOT_CAT: &str = "$ROOT";
/// Category of single-token leaf derivations.
pub const TOKEN_CAT: &str = "$TOKEN";
/// Category of multi-token phrase leaf derivations.
pub const PHRASE_CAT: &str = "$PHRASE";

/// Whether a right-hand-side symbol is a category reference (`$` sigil) as
/// opposed to a literal token.
pub fn is_cat(symbol: &str) -> bool {
    symbol.starts_with('$')
}

bitflags! {
    /// Search modes a rule participates in. A rule carries explicit flags or
    /// inherits the engine-wide default.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RuleModes: u8 {
        const ANCHORED = 1 << 0;
        const FLOATING = 1 << 1;
    }
}

// --- Rule --------------------------------------------------------------------

/// A grammar production. Immutable after construction; equality for duplicate
/// filtering is by left-hand side, right-hand side, and the semantic
/// function's descriptor.
pub struct Rule {
    /// Left-hand side; always a category.
    pub lhs: String,
    /// Right-hand side: categories (with `$` sigil) and literal tokens.
    pub rhs: Vec<String>,
    /// Produces candidate (formula, type) outputs from child derivations.
    pub sem: Arc<dyn SemanticFn>,
    /// Explicit anchored flag; `None` defers to the engine default.
    pub anchored: Option<bool>,
    /// Explicit floating flag; `None` defers to the engine default.
    pub floating: Option<bool>,
    /// Free-form key/value metadata tags.
    pub info: Vec<(String, String)>,
}

impl Rule {
    pub fn new(lhs: impl Into<String>, rhs: Vec<String>, sem: Arc<dyn SemanticFn>) -> Rule {
        Rule { lhs: lhs.into(), rhs, sem, anchored: None, floating: None, info: Vec::new() }
    }

    pub fn with_anchored(mut self, anchored: bool) -> Rule {
        self.anchored = Some(anchored);
        self
    }

    pub fn with_floating(mut self, floating: bool) -> Rule {
        self.floating = Some(floating);
        self
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Rule {
        self.info.push((key.into(), value.into()));
        self
    }

    /// `$A -> $B`: one category on each side.
    pub fn is_cat_unary(&self) -> bool {
        self.rhs.len() == 1 && is_cat(&self.rhs[0])
    }

    /// Categories mentioned on the right-hand side, in order.
    pub fn rhs_cats(&self) -> impl Iterator<Item = &str> {
        self.rhs.iter().map(String::as_str).filter(|s| is_cat(s))
    }

    /// Search modes, resolved against the engine-wide default for rules that
    /// do not carry explicit flags.
    pub fn modes(&self, default: RuleModes) -> RuleModes {
        match (self.anchored, self.floating) {
            (None, None) => default,
            _ => {
                let mut modes = RuleModes::empty();
                modes.set(RuleModes::ANCHORED, self.anchored.unwrap_or(false));
                modes.set(RuleModes::FLOATING, self.floating.unwrap_or(false));
                modes
            }
        }
    }

    /// Stable identity used for duplicate filtering at insertion.
    fn descriptor(&self) -> String {
        format!("{} -> {} [{}]", self.lhs, self.rhs.join(" "), self.sem.describe())
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("lhs", &self.lhs)
            .field("rhs", &self.rhs)
            .field("sem", &self.sem.describe())
            .finish()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.lhs, self.rhs.join(" "), self.sem.describe())
    }
}

// --- Trie index --------------------------------------------------------------

/// A prefix tree over rule right-hand sides, consumed one symbol at a time.
/// Each node caches the rules *completed* exactly there and the set of
/// left-hand categories producible at or beneath it, so the engine can walk a
/// partial match and enumerate only consistent continuations.
#[derive(Debug, Default)]
pub struct Trie {
    children: HashMap<String, Trie>,
    rules: Vec<Arc<Rule>>,
    cats: HashSet<String>,
}

impl Trie {
    fn add(&mut self, rule: &Arc<Rule>) {
        let mut node = self;
        node.cats.insert(rule.lhs.clone());
        for symbol in &rule.rhs {
            node = node.children.entry(symbol.clone()).or_default();
            node.cats.insert(rule.lhs.clone());
        }
        node.rules.push(Arc::clone(rule));
    }

    /// Child node reached by consuming `symbol`, if any.
    pub fn next(&self, symbol: &str) -> Option<&Trie> {
        self.children.get(symbol)
    }

    /// Rules whose right-hand side ends exactly at this node.
    pub fn completed(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    /// Left-hand categories reachable at or beneath this node.
    pub fn categories(&self) -> &HashSet<String> {
        &self.cats
    }

    /// Symbols on outgoing edges; the engine intersects these with the chart.
    pub fn edge_symbols(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }
}

// --- Grammar -----------------------------------------------------------------

/// The ordered rule set plus its trie index. Rule application order is
/// insertion order; duplicates (same LHS, RHS, semantic function) are
/// filtered at insertion.
#[derive(Debug, Default)]
pub struct Grammar {
    rules: Vec<Arc<Rule>>,
    trie: Trie,
    seen: HashSet<String>,
}

impl Grammar {
    pub fn new() -> Grammar {
        Grammar::default()
    }

    /// Insert a rule into both the rule list and the trie. A duplicate is
    /// silently dropped; an ill-formed rule is a fatal configuration error.
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), EngineError> {
        if !is_cat(&rule.lhs) {
            return Err(EngineError::NonCategoryLhs(rule.lhs));
        }
        if rule.rhs.is_empty() {
            return Err(EngineError::EmptyRhs(rule.lhs));
        }
        let descriptor = rule.descriptor();
        if !self.seen.insert(descriptor) {
            return Ok(());
        }
        let rule = Arc::new(rule);
        self.trie.add(&rule);
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    /// All left-hand categories, in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.rules.iter().map(|r| r.lhs.as_str()).filter(|c| seen.insert(*c)).collect()
    }

    /// Category-unary rules sorted child-first, so a single ordered pass per
    /// cell reaches closure. A cycle of unary rules is a fatal configuration
    /// error, reported at engine construction.
    pub(crate) fn cat_unary_rules_sorted(&self, default: RuleModes, mode: RuleModes) -> Result<Vec<Arc<Rule>>, EngineError> {
        let mut graph: HashMap<&str, Vec<&Arc<Rule>>> = HashMap::new();
        for rule in &self.rules {
            if rule.is_cat_unary() && rule.modes(default).contains(mode) {
                graph.entry(rule.lhs.as_str()).or_default().push(rule);
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        fn visit<'a>(
            cat: &'a str,
            graph: &HashMap<&'a str, Vec<&'a Arc<Rule>>>,
            marks: &mut HashMap<&'a str, Mark>,
            out: &mut Vec<Arc<Rule>>,
        ) -> Result<(), EngineError> {
            match marks.get(cat) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => return Err(EngineError::UnaryRuleCycle(cat.to_string())),
                None => {}
            }
            marks.insert(cat, Mark::InProgress);
            if let Some(rules) = graph.get(cat) {
                for rule in rules {
                    visit(rule.rhs[0].as_str(), graph, marks, out)?;
                    out.push(Arc::clone(rule));
                }
            }
            marks.insert(cat, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut out = Vec::new();
        // Visit in insertion order so the sorted list is deterministic.
        let mut cats: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if graph.contains_key(rule.lhs.as_str()) && !cats.contains(&rule.lhs.as_str()) {
                cats.push(rule.lhs.as_str());
            }
        }
        for cat in cats {
            visit(cat, &graph, &mut marks, &mut out)?;
        }
        Ok(out)
    }
}

// --- CatSizeBound ------------------------------------------------------------

/// Per-category formula-size caps for the floating engine.
///
/// The bound is `max_root_size - distance(root, cat)` under breadth-first
/// shortest distance over the rule dependency graph (edges LHS -> RHS
/// category), defaulting to `max_root_size` for unreachable categories. A
/// cell `(cat, size)` with `size > bound(cat)` can never contribute to a
/// root-sized derivation and is skipped entirely.
#[derive(Debug)]
pub struct CatSizeBound {
    max_root_size: usize,
    bound: HashMap<String, usize>,
}

impl CatSizeBound {
    pub fn new(max_root_size: usize, grammar: &Grammar) -> CatSizeBound {
        let mut graph: HashMap<&str, HashSet<&str>> = HashMap::new();
        for rule in grammar.rules() {
            for rhs_cat in rule.rhs_cats() {
                graph.entry(rule.lhs.as_str()).or_default().insert(rhs_cat);
            }
        }

        let mut bound: HashMap<String, usize> = HashMap::new();
        bound.insert(ROOT_CAT.to_string(), max_root_size);
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(ROOT_CAT);
        while let Some(cat) = queue.pop_front() {
            let next = bound[cat].saturating_sub(1);
            if let Some(rhs_cats) = graph.get(cat) {
                for &rhs_cat in rhs_cats {
                    if !bound.contains_key(rhs_cat) {
                        bound.insert(rhs_cat.to_string(), next);
                        queue.push_back(rhs_cat);
                    }
                }
            }
        }
        CatSizeBound { max_root_size, bound }
    }

    pub fn get_bound(&self, cat: &str) -> usize {
        self.bound.get(cat).copied().unwrap_or(self.max_root_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semfn::IdentityFn;

    fn rule(lhs: &str, rhs: &[&str]) -> Rule {
        Rule::new(lhs, rhs.iter().map(|s| s.to_string()).collect(), Arc::new(IdentityFn))
    }

    #[test]
    fn trie_walks_rhs_symbol_by_symbol() {
        let mut g = Grammar::new();
        g.add_rule(rule("$ROOT", &["$A", "$B"])).unwrap();
        g.add_rule(rule("$ROOT", &["$A", "or", "$B"])).unwrap();
        g.add_rule(rule("$X", &["$A"])).unwrap();

        let node = g.trie().next("$A").unwrap();
        // `$X -> $A` completes here; the two `$ROOT` rules continue deeper.
        assert_eq!(node.completed().len(), 1);
        assert!(node.categories().contains("$ROOT"));
        assert!(node.categories().contains("$X"));

        let node = node.next("$B").unwrap();
        assert_eq!(node.completed().len(), 1);
        assert_eq!(node.completed()[0].lhs, "$ROOT");
        assert!(g.trie().next("$Z").is_none());
    }

    #[test]
    fn duplicate_rules_are_filtered_at_insertion() {
        let mut g = Grammar::new();
        let sem: Arc<dyn SemanticFn> = Arc::new(IdentityFn);
        g.add_rule(Rule::new("$A", vec!["$B".into()], Arc::clone(&sem))).unwrap();
        g.add_rule(Rule::new("$A", vec!["$B".into()], Arc::clone(&sem))).unwrap();
        assert_eq!(g.rules().len(), 1);
    }

    #[test]
    fn non_category_lhs_is_fatal() {
        let mut g = Grammar::new();
        assert!(matches!(g.add_rule(rule("token", &["$A"])), Err(EngineError::NonCategoryLhs(_))));
    }

    #[test]
    fn unary_rules_sort_child_first_and_detect_cycles() {
        let mut g = Grammar::new();
        g.add_rule(rule("$ROOT", &["$A"])).unwrap();
        g.add_rule(rule("$A", &["$B"])).unwrap();
        let sorted = g.cat_unary_rules_sorted(RuleModes::ANCHORED, RuleModes::ANCHORED).unwrap();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].lhs, "$A");
        assert_eq!(sorted[1].lhs, "$ROOT");

        g.add_rule(rule("$B", &["$ROOT"])).unwrap();
        assert!(matches!(
            g.cat_unary_rules_sorted(RuleModes::ANCHORED, RuleModes::ANCHORED),
            Err(EngineError::UnaryRuleCycle(_))
        ));
    }

    #[test]
    fn size_bounds_follow_shortest_distance_from_root() {
        let mut g = Grammar::new();
        g.add_rule(rule("$ROOT", &["$A"])).unwrap();
        g.add_rule(rule("$A", &["$B"])).unwrap();
        g.add_rule(rule("$B", &["$C"])).unwrap();
        let bounds = CatSizeBound::new(10, &g);
        assert_eq!(bounds.get_bound(ROOT_CAT), 10);
        assert_eq!(bounds.get_bound("$A"), 9);
        assert_eq!(bounds.get_bound("$B"), 8);
        assert_eq!(bounds.get_bound("$C"), 7);
        // unreachable categories default to the root budget
        assert_eq!(bounds.get_bound("$ELSEWHERE"), 10);
    }
}
