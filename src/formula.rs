//! Logical forms.
//!
//! A [`Formula`] is an immutable expression tree. Derivations carry formulas,
//! semantic functions build bigger formulas out of smaller ones, and the
//! executor evaluates a formula against a knowledge graph. Because formulas
//! are immutable they are shared freely behind `Arc`; every transformation
//! returns a new tree and never touches the original.
//!
//! The canonical textual form is an s-expression, written by `Display` and
//! read back by [`Formula::parse`]. `parse(f.to_string()) == f` holds for
//! every formula.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::FormulaError;
use crate::values::Value;

// --- Modes -------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeMode {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateMode {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuperlativeMode {
    Argmin,
    Argmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticMode {
    Add,
    Sub,
    Mul,
    Div,
}

/// Modes for imperative/compositional actions: sequencing, looping,
/// conditionals, and scoping blocks. The textual heads carry a `:` sigil so
/// they can never collide with ordinary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionMode {
    Primitive,
    Sequential,
    Repeat,
    Conditional,
    Block,
}

impl MergeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMode::And => "and",
            MergeMode::Or => "or",
        }
    }

    fn from_str(s: &str) -> Option<MergeMode> {
        match s {
            "and" => Some(MergeMode::And),
            "or" => Some(MergeMode::Or),
            _ => None,
        }
    }
}

impl AggregateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateMode::Count => "count",
            AggregateMode::Sum => "sum",
            AggregateMode::Mean => "mean",
            AggregateMode::Min => "min",
            AggregateMode::Max => "max",
            AggregateMode::Exists => "exists",
        }
    }

    fn from_str(s: &str) -> Option<AggregateMode> {
        match s {
            "count" => Some(AggregateMode::Count),
            "sum" => Some(AggregateMode::Sum),
            "mean" => Some(AggregateMode::Mean),
            "min" => Some(AggregateMode::Min),
            "max" => Some(AggregateMode::Max),
            "exists" => Some(AggregateMode::Exists),
            _ => None,
        }
    }
}

impl SuperlativeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SuperlativeMode::Argmin => "argmin",
            SuperlativeMode::Argmax => "argmax",
        }
    }

    fn from_str(s: &str) -> Option<SuperlativeMode> {
        match s {
            "argmin" => Some(SuperlativeMode::Argmin),
            "argmax" => Some(SuperlativeMode::Argmax),
            _ => None,
        }
    }
}

impl ArithmeticMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ArithmeticMode::Add => "add",
            ArithmeticMode::Sub => "sub",
            ArithmeticMode::Mul => "mul",
            ArithmeticMode::Div => "div",
        }
    }

    fn from_str(s: &str) -> Option<ArithmeticMode> {
        match s {
            "add" => Some(ArithmeticMode::Add),
            "sub" => Some(ArithmeticMode::Sub),
            "mul" => Some(ArithmeticMode::Mul),
            "div" => Some(ArithmeticMode::Div),
            _ => None,
        }
    }
}

impl ActionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionMode::Primitive => ":p",
            ActionMode::Sequential => ":s",
            ActionMode::Repeat => ":loop",
            ActionMode::Conditional => ":if",
            ActionMode::Block => ":blk",
        }
    }

    fn from_str(s: &str) -> Option<ActionMode> {
        match s {
            ":p" => Some(ActionMode::Primitive),
            ":s" => Some(ActionMode::Sequential),
            ":loop" => Some(ActionMode::Repeat),
            ":if" => Some(ActionMode::Conditional),
            ":blk" => Some(ActionMode::Block),
            _ => None,
        }
    }
}

// --- Formula -----------------------------------------------------------------

/// An immutable logical form. Construction is strictly bottom-up, so sharing
/// is plain `Arc` with no possibility of cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Formula {
    /// A literal denotation.
    Value(Value),
    /// A named reference, bound by an enclosing `Lambda`.
    Variable(String),
    Lambda {
        var: String,
        body: Arc<Formula>,
    },
    /// Relational image: entities related to `child` through `relation`.
    Join {
        relation: Arc<Formula>,
        child: Arc<Formula>,
    },
    Merge {
        mode: MergeMode,
        left: Arc<Formula>,
        right: Arc<Formula>,
    },
    Aggregate {
        mode: AggregateMode,
        child: Arc<Formula>,
    },
    Superlative {
        mode: SuperlativeMode,
        rank: Arc<Formula>,
        count: Arc<Formula>,
        head: Arc<Formula>,
        relation: Arc<Formula>,
    },
    Arithmetic {
        mode: ArithmeticMode,
        left: Arc<Formula>,
        right: Arc<Formula>,
    },
    /// Restrict `domain` to the elements satisfying `condition`.
    Filter {
        domain: Arc<Formula>,
        condition: Arc<Formula>,
    },
    Not(Arc<Formula>),
    Call {
        func: Arc<Formula>,
        args: Vec<Arc<Formula>>,
    },
    Action {
        mode: ActionMode,
        args: Vec<Arc<Formula>>,
    },
}

impl Formula {
    // Convenience constructors; rule productions and tests use these heavily.

    pub fn name(id: impl Into<String>) -> Formula {
        Formula::Value(Value::Name(id.into()))
    }

    pub fn number(n: f64) -> Formula {
        Formula::Value(Value::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Formula {
        Formula::Value(Value::Str(s.into()))
    }

    pub fn var(name: impl Into<String>) -> Formula {
        Formula::Variable(name.into())
    }

    pub fn join(relation: Formula, child: Formula) -> Formula {
        Formula::Join { relation: Arc::new(relation), child: Arc::new(child) }
    }

    pub fn merge(mode: MergeMode, left: Formula, right: Formula) -> Formula {
        Formula::Merge { mode, left: Arc::new(left), right: Arc::new(right) }
    }

    pub fn aggregate(mode: AggregateMode, child: Formula) -> Formula {
        Formula::Aggregate { mode, child: Arc::new(child) }
    }

    pub fn lambda(var: impl Into<String>, body: Formula) -> Formula {
        Formula::Lambda { var: var.into(), body: Arc::new(body) }
    }

    /// Immediate subformulas, in order.
    pub fn children(&self) -> Vec<&Arc<Formula>> {
        match self {
            Formula::Value(_) | Formula::Variable(_) => Vec::new(),
            Formula::Lambda { body, .. } => vec![body],
            Formula::Join { relation, child } => vec![relation, child],
            Formula::Merge { left, right, .. } => vec![left, right],
            Formula::Aggregate { child, .. } => vec![child],
            Formula::Superlative { rank, count, head, relation, .. } => vec![rank, count, head, relation],
            Formula::Arithmetic { left, right, .. } => vec![left, right],
            Formula::Filter { domain, condition } => vec![domain, condition],
            Formula::Not(child) => vec![child],
            Formula::Call { func, args } => std::iter::once(func).chain(args.iter()).collect(),
            Formula::Action { args, .. } => args.iter().collect(),
        }
    }

    /// Number of nodes in the tree. Floating-mode chart cells are indexed by
    /// this quantity.
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(|c| c.size()).sum::<usize>()
    }

    /// Pre-order traversal. When `f` returns `true` the children of the
    /// current node are skipped (the traversal does not descend).
    pub fn for_each<F: FnMut(&Formula) -> bool>(&self, f: &mut F) {
        if f(self) {
            return;
        }
        for child in self.children() {
            child.for_each(f);
        }
    }

    /// Collect every subformula satisfying `pred`. With `always_recurse`,
    /// matching nodes still have their subtrees searched; otherwise a match
    /// stops the descent along that branch.
    pub fn collect_where<'a, F: Fn(&Formula) -> bool>(&'a self, pred: &F, always_recurse: bool) -> Vec<&'a Formula> {
        let mut out = Vec::new();
        self.collect_into(pred, always_recurse, &mut out);
        out
    }

    fn collect_into<'a, F: Fn(&Formula) -> bool>(&'a self, pred: &F, always_recurse: bool, out: &mut Vec<&'a Formula>) {
        let matched = pred(self);
        if matched {
            out.push(self);
        }
        if matched && !always_recurse {
            return;
        }
        for child in self.children() {
            child.collect_into(pred, always_recurse, out);
        }
    }

    /// Whole-tree rewrite. `f` is consulted at every node top-down; a `Some`
    /// result replaces that node and short-circuits the descent. Unchanged
    /// subtrees keep their existing `Arc`s.
    pub fn rewrite<F: Fn(&Formula) -> Option<Formula>>(self: &Arc<Formula>, f: &F) -> Arc<Formula> {
        if let Some(replacement) = f(self) {
            return Arc::new(replacement);
        }
        let rw = |child: &Arc<Formula>| child.rewrite(f);
        let rebuilt = match &**self {
            Formula::Value(_) | Formula::Variable(_) => return Arc::clone(self),
            Formula::Lambda { var, body } => Formula::Lambda { var: var.clone(), body: rw(body) },
            Formula::Join { relation, child } => Formula::Join { relation: rw(relation), child: rw(child) },
            Formula::Merge { mode, left, right } => Formula::Merge { mode: *mode, left: rw(left), right: rw(right) },
            Formula::Aggregate { mode, child } => Formula::Aggregate { mode: *mode, child: rw(child) },
            Formula::Superlative { mode, rank, count, head, relation } => Formula::Superlative {
                mode: *mode,
                rank: rw(rank),
                count: rw(count),
                head: rw(head),
                relation: rw(relation),
            },
            Formula::Arithmetic { mode, left, right } => {
                Formula::Arithmetic { mode: *mode, left: rw(left), right: rw(right) }
            }
            Formula::Filter { domain, condition } => Formula::Filter { domain: rw(domain), condition: rw(condition) },
            Formula::Not(child) => Formula::Not(rw(child)),
            Formula::Call { func, args } => Formula::Call { func: rw(func), args: args.iter().map(|a| rw(a)).collect() },
            Formula::Action { mode, args } => {
                Formula::Action { mode: *mode, args: args.iter().map(|a| rw(a)).collect() }
            }
        };
        if rebuilt == **self { Arc::clone(self) } else { Arc::new(rebuilt) }
    }

    /// Parse the canonical s-expression form. The single entry point for
    /// reading formulas back from text; malformed input (unknown operator,
    /// wrong arity, unbalanced parens) fails immediately.
    pub fn parse(input: &str) -> Result<Formula, FormulaError> {
        let tokens = lex(input)?;
        let mut pos = 0;
        let formula = parse_expr(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err(FormulaError::Expected("end of input", format!("{:?}", tokens[pos])));
        }
        Ok(formula)
    }
}

// --- Variable operations -----------------------------------------------------

/// Replace free occurrences of `var` with `replacement`. Occurrences under a
/// `Lambda` binding the same name are left alone.
pub fn substitute_var(formula: &Arc<Formula>, var: &str, replacement: &Formula) -> Arc<Formula> {
    formula.rewrite(&|f| match f {
        Formula::Variable(name) if name == var => Some(replacement.clone()),
        Formula::Lambda { var: bound, .. } if bound == var => Some(f.clone()),
        _ => None,
    })
}

/// Beta-reduction step: apply a lambda to an argument.
pub fn lambda_apply(var: &str, body: &Arc<Formula>, arg: &Formula) -> Arc<Formula> {
    substitute_var(body, var, arg)
}

/// Reduce every `Join` whose relation is a lambda, bottom-up until none remain.
pub fn beta_reduce(formula: &Arc<Formula>) -> Arc<Formula> {
    formula.rewrite(&|f| {
        if let Formula::Join { relation, child } = f {
            let relation = beta_reduce(relation);
            if let Formula::Lambda { var, body } = &*relation {
                let child = beta_reduce(child);
                return Some((*beta_reduce(&lambda_apply(var, body, &child))).clone());
            }
        }
        None
    })
}

/// Whether `var` occurs free in `formula`.
pub fn contains_free_var(formula: &Formula, var: &str) -> bool {
    match formula {
        Formula::Variable(name) => name == var,
        Formula::Lambda { var: bound, body } => bound != var && contains_free_var(body, var),
        _ => formula.children().iter().any(|c| contains_free_var(c, var)),
    }
}

// --- Textual form ------------------------------------------------------------

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Bare names print without the (name ...) wrapper, like predicates
            // in hand-written grammars. Other values keep their tagged form.
            Formula::Value(Value::Name(id)) => write!(f, "{id}"),
            Formula::Value(v) => write!(f, "{v}"),
            Formula::Variable(name) => write!(f, "(var {name})"),
            Formula::Lambda { var, body } => write!(f, "(lambda {var} {body})"),
            Formula::Join { relation, child } => write!(f, "({relation} {child})"),
            Formula::Merge { mode, left, right } => write!(f, "({} {left} {right})", mode.as_str()),
            Formula::Aggregate { mode, child } => write!(f, "({} {child})", mode.as_str()),
            Formula::Superlative { mode, rank, count, head, relation } => {
                write!(f, "({} {rank} {count} {head} {relation})", mode.as_str())
            }
            Formula::Arithmetic { mode, left, right } => write!(f, "({} {left} {right})", mode.as_str()),
            Formula::Filter { domain, condition } => write!(f, "(filter {domain} {condition})"),
            Formula::Not(child) => write!(f, "(not {child})"),
            Formula::Call { func, args } => {
                write!(f, "(call {func}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            Formula::Action { mode, args } => {
                write!(f, "({}", mode.as_str())?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Open,
    Close,
    Atom(String),
    Str(String),
}

fn lex(input: &str) -> Result<Vec<Tok>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(at, c)) = chars.peek() {
        match c {
            '(' => {
                tokens.push(Tok::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Tok::Close);
                chars.next();
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some((_, esc)) = chars.next() {
                                s.push(esc);
                            }
                        }
                        _ => s.push(c),
                    }
                }
                if !closed {
                    return Err(FormulaError::Unbalanced(at));
                }
                tokens.push(Tok::Str(s));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut atom = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                }
                tokens.push(Tok::Atom(atom));
            }
        }
    }
    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }
    Ok(tokens)
}

fn parse_expr(tokens: &[Tok], pos: &mut usize) -> Result<Formula, FormulaError> {
    match tokens.get(*pos) {
        None => Err(FormulaError::Empty),
        Some(Tok::Close) => Err(FormulaError::Unbalanced(*pos)),
        Some(Tok::Str(s)) => {
            *pos += 1;
            Ok(Formula::string(s.clone()))
        }
        Some(Tok::Atom(atom)) => {
            *pos += 1;
            Ok(Formula::name(atom.clone()))
        }
        Some(Tok::Open) => {
            *pos += 1;
            let form = parse_list(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Tok::Close) => {
                    *pos += 1;
                    Ok(form)
                }
                _ => Err(FormulaError::Unbalanced(*pos)),
            }
        }
    }
}

/// Parse the interior of a parenthesized form (the opening paren is consumed).
fn parse_list(tokens: &[Tok], pos: &mut usize) -> Result<Formula, FormulaError> {
    let head = match tokens.get(*pos) {
        Some(Tok::Atom(a)) => Some(a.clone()),
        _ => None,
    };

    if let Some(head) = head {
        if let Some(f) = parse_keyword_form(&head, tokens, pos)? {
            return Ok(f);
        }
    }

    // Default: a two-element list is a join, `(relation child)`.
    let relation = parse_expr(tokens, pos)?;
    let child = parse_expr(tokens, pos)?;
    if !matches!(tokens.get(*pos), Some(Tok::Close)) {
        let extra = count_until_close(tokens, *pos);
        return Err(FormulaError::Arity { head: "join".into(), expected: 2, got: 2 + extra });
    }
    Ok(Formula::join(relation, child))
}

/// Try to parse a reserved-head form; `Ok(None)` means the head is not
/// reserved and the caller should fall back to a join.
fn parse_keyword_form(head: &str, tokens: &[Tok], pos: &mut usize) -> Result<Option<Formula>, FormulaError> {
    let consume_head = |pos: &mut usize| *pos += 1;

    let f = match head {
        "var" => {
            consume_head(pos);
            Formula::Variable(expect_atom(tokens, pos)?)
        }
        "lambda" => {
            consume_head(pos);
            let var = expect_atom(tokens, pos)?;
            let body = parse_expr(tokens, pos)?;
            Formula::lambda(var, body)
        }
        "not" => {
            consume_head(pos);
            Formula::Not(Arc::new(parse_expr(tokens, pos)?))
        }
        "filter" => {
            consume_head(pos);
            let domain = parse_expr(tokens, pos)?;
            let condition = parse_expr(tokens, pos)?;
            Formula::Filter { domain: Arc::new(domain), condition: Arc::new(condition) }
        }
        "call" => {
            consume_head(pos);
            let func = parse_expr(tokens, pos)?;
            let mut args = Vec::new();
            while !matches!(tokens.get(*pos), Some(Tok::Close) | None) {
                args.push(Arc::new(parse_expr(tokens, pos)?));
            }
            Formula::Call { func: Arc::new(func), args }
        }
        "number" => {
            consume_head(pos);
            let raw = expect_atom(tokens, pos)?;
            let n = raw.parse::<f64>().map_err(|_| FormulaError::Expected("a number", raw))?;
            Formula::number(n)
        }
        "string" => {
            consume_head(pos);
            match tokens.get(*pos) {
                Some(Tok::Str(s)) => {
                    let s = s.clone();
                    *pos += 1;
                    Formula::string(s)
                }
                other => return Err(FormulaError::Expected("a string literal", format!("{other:?}"))),
            }
        }
        "name" => {
            consume_head(pos);
            Formula::name(expect_atom(tokens, pos)?)
        }
        "boolean" => {
            consume_head(pos);
            let raw = expect_atom(tokens, pos)?;
            let b = raw.parse::<bool>().map_err(|_| FormulaError::Expected("true or false", raw))?;
            Formula::Value(Value::Bool(b))
        }
        "date" => {
            consume_head(pos);
            let y = expect_int(tokens, pos)?;
            let m = expect_int(tokens, pos)? as u32;
            let d = expect_int(tokens, pos)? as u32;
            let date = NaiveDate::from_ymd_opt(y as i32, m, d)
                .ok_or_else(|| FormulaError::Expected("a valid date", format!("{y}-{m}-{d}")))?;
            Formula::Value(Value::Date(date))
        }
        _ => {
            if let Some(mode) = MergeMode::from_str(head) {
                consume_head(pos);
                let left = parse_expr(tokens, pos)?;
                let right = parse_expr(tokens, pos)?;
                Formula::merge(mode, left, right)
            } else if let Some(mode) = AggregateMode::from_str(head) {
                consume_head(pos);
                Formula::aggregate(mode, parse_expr(tokens, pos)?)
            } else if let Some(mode) = SuperlativeMode::from_str(head) {
                consume_head(pos);
                let rank = parse_expr(tokens, pos)?;
                let count = parse_expr(tokens, pos)?;
                let head_f = parse_expr(tokens, pos)?;
                let relation = parse_expr(tokens, pos)?;
                Formula::Superlative {
                    mode,
                    rank: Arc::new(rank),
                    count: Arc::new(count),
                    head: Arc::new(head_f),
                    relation: Arc::new(relation),
                }
            } else if let Some(mode) = ArithmeticMode::from_str(head) {
                consume_head(pos);
                let left = parse_expr(tokens, pos)?;
                let right = parse_expr(tokens, pos)?;
                Formula::Arithmetic { mode, left: Arc::new(left), right: Arc::new(right) }
            } else if let Some(mode) = ActionMode::from_str(head) {
                consume_head(pos);
                let mut args = Vec::new();
                while !matches!(tokens.get(*pos), Some(Tok::Close) | None) {
                    args.push(Arc::new(parse_expr(tokens, pos)?));
                }
                Formula::Action { mode, args }
            } else if head.starts_with(':') {
                // A `:` head that is not a known action mode is malformed, not
                // a join.
                return Err(FormulaError::UnknownHead(head.to_string()));
            } else {
                return Ok(None);
            }
        }
    };
    Ok(Some(f))
}

fn expect_atom(tokens: &[Tok], pos: &mut usize) -> Result<String, FormulaError> {
    match tokens.get(*pos) {
        Some(Tok::Atom(a)) => {
            let a = a.clone();
            *pos += 1;
            Ok(a)
        }
        other => Err(FormulaError::Expected("an atom", format!("{other:?}"))),
    }
}

fn expect_int(tokens: &[Tok], pos: &mut usize) -> Result<i64, FormulaError> {
    let raw = expect_atom(tokens, pos)?;
    raw.parse::<i64>().map_err(|_| FormulaError::Expected("an integer", raw))
}

fn count_until_close(tokens: &[Tok], mut pos: usize) -> usize {
    let mut n = 0;
    let mut depth = 0;
    while let Some(tok) = tokens.get(pos) {
        match tok {
            Tok::Close if depth == 0 => break,
            Tok::Open => depth += 1,
            Tok::Close => depth -= 1,
            _ => {}
        }
        if depth == 0 {
            n += 1;
        }
        pos += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(text: &str) -> Formula {
        let f = Formula::parse(text).unwrap();
        assert_eq!(Formula::parse(&f.to_string()).unwrap(), f, "round trip failed for {text}");
        f
    }

    #[test]
    fn parses_and_prints_canonical_forms() {
        roundtrip("city.seattle");
        roundtrip("(number 42)");
        roundtrip("(population city.seattle)");
        roundtrip("(and (type city) (population (number 600000)))");
        roundtrip("(count (type city))");
        roundtrip("(argmax (number 1) (number 1) (type city) population)");
        roundtrip("(lambda x (population (var x)))");
        roundtrip("(filter (type city) (lambda x (coastal (var x))))");
        roundtrip("(:s (:p move) (:loop (number 3) (:p dig)))");
        roundtrip("(call concat (string \"a\") (string \"b\"))");
    }

    #[test]
    fn malformed_input_fails_fast() {
        assert!(matches!(Formula::parse("(foo a b c)"), Err(FormulaError::Arity { .. })));
        assert_eq!(Formula::parse("(:bogus x)"), Err(FormulaError::UnknownHead(":bogus".into())));
        assert!(Formula::parse("(and x)").is_err());
        assert!(Formula::parse("((a b)").is_err());
        assert!(matches!(Formula::parse("(a b))"), Err(FormulaError::Expected(_, _))));
        assert!(matches!(Formula::parse(""), Err(FormulaError::Empty)));
    }

    #[test]
    fn size_counts_nodes() {
        let f = roundtrip("(and (type city) (population (number 600000)))");
        // and + two joins + four leaves
        assert_eq!(f.size(), 7);
        assert_eq!(Formula::name("x").size(), 1);
    }

    #[test]
    fn for_each_can_stop_descending() {
        let f = roundtrip("(count (and a b))");
        let mut seen = Vec::new();
        f.for_each(&mut |node| {
            seen.push(node.to_string());
            matches!(node, Formula::Merge { .. }) // do not descend into the merge
        });
        assert_eq!(seen, vec!["(count (and a b))", "(and a b)"]);
    }

    #[test]
    fn collect_where_always_recurse() {
        let f = roundtrip("(and (and a b) c)");
        let merges = f.collect_where(&|n| matches!(n, Formula::Merge { .. }), true);
        assert_eq!(merges.len(), 2);
        let outer_only = f.collect_where(&|n| matches!(n, Formula::Merge { .. }), false);
        assert_eq!(outer_only.len(), 1);
    }

    #[test]
    fn rewrite_short_circuits_and_shares() {
        let f = Arc::new(roundtrip("(population (var x))"));
        let rewritten = substitute_var(&f, "x", &Formula::name("city.seattle"));
        assert_eq!(rewritten.to_string(), "(population city.seattle)");
        // untouched trees come back as the same allocation
        let same = f.rewrite(&|_| None);
        assert!(Arc::ptr_eq(&f, &same));
    }

    #[test]
    fn substitution_respects_binders() {
        let f = Arc::new(roundtrip("(and (var x) (lambda x (var x)))"));
        let out = substitute_var(&f, "x", &Formula::name("e"));
        assert_eq!(out.to_string(), "(and e (lambda x (var x)))");
    }

    #[test]
    fn beta_reduction() {
        let f = Arc::new(roundtrip("((lambda x (population (var x))) city.seattle)"));
        assert_eq!(beta_reduce(&f).to_string(), "(population city.seattle)");
        assert!(contains_free_var(&roundtrip("(population (var x))"), "x"));
        assert!(!contains_free_var(&roundtrip("(lambda x (var x))"), "x"));
    }
}
