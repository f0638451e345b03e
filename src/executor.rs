//! Formula execution against an in-memory knowledge graph.
//!
//! The engine only ever executes lazily: a formula is evaluated when a
//! pruning strategy or a feature needs the denotation, and the result is
//! cached on the derivation. Execution failures are *values*
//! ([`Value::Error`]), not panics or `Err`s, because a bad candidate formula
//! is ordinary business during search.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::example::ExContext;
use crate::formula::{AggregateMode, ArithmeticMode, Formula, MergeMode, SuperlativeMode, lambda_apply};
use crate::values::Value;

/// Statistics from a single execution.
#[derive(Debug, Clone, Default)]
pub struct ExecStats {
    pub elapsed: Duration,
}

/// A denotation plus how it was obtained.
#[derive(Debug, Clone)]
pub struct Execution {
    pub value: Value,
    pub stats: ExecStats,
}

/// Executes a formula against a context, producing a denotation. Must be
/// synchronous and side-effect-free on shared state.
pub trait Executor: Send + Sync {
    fn execute(&self, formula: &Formula, context: &ExContext) -> Execution;
}

// --- Knowledge graph ---------------------------------------------------------

/// A small in-memory triple store: `(subject, relation, object)`.
#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    triples: Vec<(Value, String, Value)>,
}

impl KnowledgeGraph {
    pub fn new(triples: Vec<(Value, String, Value)>) -> KnowledgeGraph {
        KnowledgeGraph { triples }
    }

    /// Subjects `s` with `(s, relation, o)` for some `o` in `objects`.
    pub fn subjects(&self, relation: &str, objects: &[Value]) -> Vec<Value> {
        let mut out = Vec::new();
        for (s, r, o) in &self.triples {
            if r == relation && objects.contains(o) && !out.contains(s) {
                out.push(s.clone());
            }
        }
        out
    }

    /// The unique object related to `subject` through `relation`, if any.
    pub fn object(&self, subject: &Value, relation: &str) -> Option<&Value> {
        self.triples.iter().find(|(s, r, _)| s == subject && r == relation).map(|(_, _, o)| o)
    }

    /// Every value appearing in subject position.
    pub fn all_entities(&self) -> Vec<Value> {
        let mut seen = HashSet::new();
        self.triples.iter().map(|(s, _, _)| s.clone()).filter(|s| seen.insert(s.clone())).collect()
    }
}

// --- Graph executor ----------------------------------------------------------

/// The default [`Executor`]: set-denotational evaluation over the context's
/// [`KnowledgeGraph`].
#[derive(Debug, Default)]
pub struct GraphExecutor;

impl Executor for GraphExecutor {
    fn execute(&self, formula: &Formula, context: &ExContext) -> Execution {
        let started = Instant::now();
        let value = match evaluate(formula, context) {
            Ok(v) => v,
            Err(msg) => Value::Error(msg),
        };
        Execution { value, stats: ExecStats { elapsed: started.elapsed() } }
    }
}

fn graph(context: &ExContext) -> Result<&Arc<KnowledgeGraph>, String> {
    context.graph.as_ref().ok_or_else(|| "no knowledge graph in context".to_string())
}

fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::List(vs) => vs,
        v => vec![v],
    }
}

fn as_numbers(values: &[Value]) -> Result<Vec<f64>, String> {
    values
        .iter()
        .map(|v| v.as_number().ok_or_else(|| format!("expected a number, got {v}")))
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::List(vs) => !vs.is_empty(),
        Value::Error(_) => false,
        _ => true,
    }
}

fn evaluate(formula: &Formula, context: &ExContext) -> Result<Value, String> {
    match formula {
        Formula::Value(v) => Ok(v.clone()),
        Formula::Variable(name) => Err(format!("free variable {name}")),
        Formula::Lambda { .. } => Err("cannot execute a bare lambda".to_string()),

        Formula::Join { relation, child } => {
            let objects = as_list(evaluate(child, context)?);
            match &**relation {
                Formula::Value(Value::Name(rel)) => Ok(Value::List(graph(context)?.subjects(rel, &objects))),
                Formula::Lambda { var, body } => {
                    // Relational image through a lambda: union over the objects.
                    let mut out = Vec::new();
                    for o in objects {
                        let applied = lambda_apply(var, body, &Formula::Value(o));
                        for v in as_list(evaluate(&applied, context)?) {
                            if !out.contains(&v) {
                                out.push(v);
                            }
                        }
                    }
                    Ok(Value::List(out))
                }
                other => Err(format!("join relation must be a name or lambda, got {other}")),
            }
        }

        Formula::Merge { mode, left, right } => {
            let l = as_list(evaluate(left, context)?);
            let r = as_list(evaluate(right, context)?);
            let merged = match mode {
                MergeMode::And => l.into_iter().filter(|v| r.contains(v)).collect(),
                MergeMode::Or => {
                    let mut out = l;
                    for v in r {
                        if !out.contains(&v) {
                            out.push(v);
                        }
                    }
                    out
                }
            };
            Ok(Value::List(merged))
        }

        Formula::Aggregate { mode, child } => {
            let vs = as_list(evaluate(child, context)?);
            match mode {
                AggregateMode::Count => Ok(Value::Number(vs.len() as f64)),
                AggregateMode::Exists => Ok(Value::Bool(!vs.is_empty())),
                _ => {
                    let ns = as_numbers(&vs)?;
                    if ns.is_empty() {
                        return Err("aggregate over an empty set".to_string());
                    }
                    let v = match mode {
                        AggregateMode::Sum => ns.iter().sum(),
                        AggregateMode::Mean => ns.iter().sum::<f64>() / ns.len() as f64,
                        AggregateMode::Min => ns.iter().cloned().fold(f64::INFINITY, f64::min),
                        AggregateMode::Max => ns.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                        AggregateMode::Count | AggregateMode::Exists => unreachable!(),
                    };
                    Ok(Value::Number(v))
                }
            }
        }

        Formula::Superlative { mode, rank, count, head, relation } => {
            let rank = evaluate(rank, context)?.as_number().ok_or("superlative rank must be a number")? as usize;
            let count = evaluate(count, context)?.as_number().ok_or("superlative count must be a number")? as usize;
            if rank == 0 {
                return Err("superlative rank is 1-based".to_string());
            }
            let elements = as_list(evaluate(head, context)?);
            let mut keyed: Vec<(f64, Value)> = Vec::new();
            for e in elements {
                let key = projection(relation, &e, context)?;
                keyed.push((key, e));
            }
            // Stable sort keeps head order deterministic among equal keys.
            match mode {
                SuperlativeMode::Argmax => keyed.sort_by(|a, b| b.0.total_cmp(&a.0)),
                SuperlativeMode::Argmin => keyed.sort_by(|a, b| a.0.total_cmp(&b.0)),
            }
            Ok(Value::List(keyed.into_iter().skip(rank - 1).take(count).map(|(_, e)| e).collect()))
        }

        Formula::Arithmetic { mode, left, right } => {
            let l = evaluate(left, context)?.as_number().ok_or("arithmetic over a non-number")?;
            let r = evaluate(right, context)?.as_number().ok_or("arithmetic over a non-number")?;
            let v = match mode {
                ArithmeticMode::Add => l + r,
                ArithmeticMode::Sub => l - r,
                ArithmeticMode::Mul => l * r,
                ArithmeticMode::Div => {
                    if r == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    l / r
                }
            };
            Ok(Value::Number(v))
        }

        Formula::Filter { domain, condition } => {
            let elements = as_list(evaluate(domain, context)?);
            let Formula::Lambda { var, body } = &**condition else {
                return Err("filter condition must be a lambda".to_string());
            };
            let mut out = Vec::new();
            for e in elements {
                let applied = lambda_apply(var, body, &Formula::Value(e.clone()));
                if is_truthy(&evaluate(&applied, context)?) {
                    out.push(e);
                }
            }
            Ok(Value::List(out))
        }

        Formula::Not(child) => {
            let excluded = as_list(evaluate(child, context)?);
            let all = graph(context)?.all_entities();
            Ok(Value::List(all.into_iter().filter(|v| !excluded.contains(v)).collect()))
        }

        Formula::Call { func, .. } => Err(format!("call target {func} is not executable here")),
        Formula::Action { .. } => Err("actions execute in an external environment".to_string()),
    }
}

/// Numeric key of `element` under `relation` (a name or a lambda).
fn projection(relation: &Formula, element: &Value, context: &ExContext) -> Result<f64, String> {
    match relation {
        Formula::Value(Value::Name(rel)) => graph(context)?
            .object(element, rel)
            .and_then(|v| v.as_number())
            .ok_or_else(|| format!("no numeric {rel} for {element}")),
        Formula::Lambda { var, body } => {
            let applied = lambda_apply(var, body, &Formula::Value(element.clone()));
            evaluate(&applied, context)?.as_number().ok_or_else(|| "projection is not a number".to_string())
        }
        other => Err(format!("superlative relation must be a name or lambda, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example::ExContext;

    fn city_context() -> ExContext {
        let city = |name: &str, pop: f64, coastal: bool| {
            let e = Value::name(name);
            let mut ts = vec![
                (e.clone(), "type".to_string(), Value::name("city")),
                (e.clone(), "population".to_string(), Value::Number(pop)),
            ];
            if coastal {
                ts.push((e, "coastal".to_string(), Value::Bool(true)));
            }
            ts
        };
        let mut triples = Vec::new();
        triples.extend(city("city.seattle", 750.0, true));
        triples.extend(city("city.spokane", 230.0, false));
        triples.extend(city("city.tacoma", 220.0, true));
        ExContext { graph: Some(Arc::new(KnowledgeGraph::new(triples))) }
    }

    fn run(text: &str, ctx: &ExContext) -> Value {
        GraphExecutor.execute(&Formula::parse(text).unwrap(), ctx).value
    }

    #[test]
    fn join_and_merge_and_count() {
        let ctx = city_context();
        assert_eq!(run("(count (type city))", &ctx), Value::Number(3.0));
        let coastal = run("(and (type city) (coastal (boolean true)))", &ctx);
        assert_eq!(coastal.list_len(), Some(2));
    }

    #[test]
    fn superlative_orders_by_projection() {
        let ctx = city_context();
        let top = run("(argmax (number 1) (number 1) (type city) population)", &ctx);
        assert_eq!(top, Value::list([Value::name("city.seattle")]));
        let second = run("(argmax (number 2) (number 1) (type city) population)", &ctx);
        assert_eq!(second, Value::list([Value::name("city.spokane")]));
        let least = run("(argmin (number 1) (number 1) (type city) population)", &ctx);
        assert_eq!(least, Value::list([Value::name("city.tacoma")]));
    }

    #[test]
    fn errors_become_error_values() {
        let ctx = city_context();
        assert!(run("(lambda x (var x))", &ctx).is_error());
        assert!(run("(div (number 1) (number 0))", &ctx).is_error());
        assert!(run("(sum (type city))", &ctx).is_error());
    }

    #[test]
    fn negation_complements_against_the_graph() {
        let ctx = city_context();
        let inland = run("(not (coastal (boolean true)))", &ctx);
        assert_eq!(inland, Value::list([Value::name("city.spokane")]));
    }
}
