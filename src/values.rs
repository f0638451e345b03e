use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;

/// A denotation: what a formula evaluates to against a knowledge source.
///
/// Values are plain data. They appear in two places: wrapped inside
/// [`Formula::Value`](crate::Formula::Value) as literals, and as the cached
/// execution result on a finished derivation.
#[derive(Debug, Clone)]
pub enum Value {
    /// A named entity or predicate, e.g. `city.seattle` or `person.height`.
    Name(String),
    Number(f64),
    Str(String),
    Date(NaiveDate),
    Bool(bool),
    /// An ordered collection of values (the usual shape of a denotation).
    List(Vec<Value>),
    /// Execution failed; the payload is a short diagnostic.
    Error(String),
}

impl Value {
    pub fn name(id: impl Into<String>) -> Value {
        Value::Name(id.into())
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Value {
        Value::List(values.into_iter().collect())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Number of elements if this is a list, else `None`.
    pub fn list_len(&self) -> Option<usize> {
        match self {
            Value::List(vs) => Some(vs.len()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::List(vs) if vs.len() == 1 => vs[0].as_number(),
            _ => None,
        }
    }
}

// Structural equality; floats compare by bit pattern so that Value can be a
// hash-map key and equality stays reflexive for NaN.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Name(a), Value::Name(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Name(s) | Value::Str(s) | Value::Error(s) => s.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::Date(d) => d.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::List(vs) => vs.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Name(id) => write!(f, "(name {id})"),
            Value::Number(n) => write!(f, "(number {n})"),
            Value::Str(s) => write!(f, "(string {s:?})"),
            Value::Date(d) => write!(f, "(date {} {} {})", d.format("%Y"), d.format("%-m"), d.format("%-d")),
            Value::Bool(b) => write!(f, "(boolean {b})"),
            Value::List(vs) => {
                write!(f, "(list")?;
                for v in vs {
                    write!(f, " {v}")?;
                }
                write!(f, ")")
            }
            Value::Error(msg) => write!(f, "(error {msg:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_equality_uses_bits() {
        assert_eq!(Value::Number(1.5), Value::Number(1.5));
        assert_ne!(Value::Number(1.5), Value::Number(2.5));
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn display_round_shapes() {
        assert_eq!(Value::name("city.seattle").to_string(), "(name city.seattle)");
        assert_eq!(Value::Number(3.0).to_string(), "(number 3)");
        assert_eq!(
            Value::list([Value::Number(1.0), Value::Number(2.0)]).to_string(),
            "(list (number 1) (number 2))"
        );
        let d = NaiveDate::from_ymd_opt(2013, 2, 12).unwrap();
        assert_eq!(Value::Date(d).to_string(), "(date 2013 2 12)");
    }
}
