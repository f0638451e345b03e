//! The type lattice over formulas.
//!
//! Types are used to reject ill-typed partial derivations before they are
//! executed, which is by far the cheapest pruning point in the engine. The
//! lattice has `Top` (anything) and `Bottom` (unsatisfiable) plus atomics,
//! two-slot function types, and unions.
//!
//! `meet` is the unification operator: commutative, `Bottom` absorbing, `Top`
//! the identity. Two different atomics meet to the more *specific* one when
//! the supplied [`TypeHierarchy`] relates them, otherwise to `Bottom`.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

// --- Supertype hierarchy -----------------------------------------------------

/// An externally supplied supertype hierarchy over atomic type names. The
/// graph is directed and acyclic; `meet` consults it to resolve
/// compatible-but-unequal atomics.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    /// Direct supertypes of each atomic name.
    supers: HashMap<String, Vec<String>>,
}

impl TypeHierarchy {
    pub fn new() -> TypeHierarchy {
        TypeHierarchy::default()
    }

    /// Declare `child` to be a subtype of `parent`.
    pub fn add_supertype(&mut self, child: impl Into<String>, parent: impl Into<String>) {
        self.supers.entry(child.into()).or_default().push(parent.into());
    }

    /// Whether `sub` is `sup` or lies below it (transitively).
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let mut stack: Vec<&str> = vec![sub];
        let mut seen: Vec<&str> = Vec::new();
        while let Some(cur) = stack.pop() {
            if seen.contains(&cur) {
                continue;
            }
            seen.push(cur);
            if let Some(parents) = self.supers.get(cur) {
                for p in parents {
                    if p == sup {
                        return true;
                    }
                    stack.push(p);
                }
            }
        }
        false
    }
}

// --- SemType -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SemType {
    /// Identity for `meet`: compatible with everything.
    Top,
    /// The unique unsatisfiable type; absorbing for `meet`.
    Bottom,
    Atomic(String),
    /// Argument type and return type.
    Func(Box<SemType>, Box<SemType>),
    Union(Vec<SemType>),
}

static NUMBER: Lazy<SemType> = Lazy::new(|| SemType::atomic("number"));
static STRING: Lazy<SemType> = Lazy::new(|| SemType::atomic("string"));
static DATE: Lazy<SemType> = Lazy::new(|| SemType::atomic("date"));
static ENTITY: Lazy<SemType> = Lazy::new(|| SemType::atomic("entity"));
static BOOLEAN: Lazy<SemType> = Lazy::new(|| SemType::atomic("boolean"));

impl SemType {
    /// Construct an atomic type. An empty name is a programmer error.
    pub fn atomic(name: impl Into<String>) -> SemType {
        let name = name.into();
        assert!(!name.is_empty(), "atomic type name must be non-empty");
        SemType::Atomic(name)
    }

    pub fn func(arg: SemType, ret: SemType) -> SemType {
        SemType::Func(Box::new(arg), Box::new(ret))
    }

    /// Union of alternatives, simplified: invalid members dropped, an empty
    /// union collapses to `Bottom`, a singleton to its member.
    pub fn union(types: impl IntoIterator<Item = SemType>) -> SemType {
        let mut members: Vec<SemType> = Vec::new();
        for t in types {
            if t.is_valid() && !members.contains(&t) {
                members.push(t);
            }
        }
        match members.len() {
            0 => SemType::Bottom,
            1 => members.pop().unwrap(),
            _ => SemType::Union(members),
        }
    }

    pub fn number() -> SemType {
        NUMBER.clone()
    }
    pub fn string() -> SemType {
        STRING.clone()
    }
    pub fn date() -> SemType {
        DATE.clone()
    }
    pub fn entity() -> SemType {
        ENTITY.clone()
    }
    pub fn boolean() -> SemType {
        BOOLEAN.clone()
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, SemType::Bottom)
    }

    /// Greatest lower bound of `self` and `that` under `hier`. Returns
    /// `Bottom` on incompatibility.
    pub fn meet(&self, that: &SemType, hier: &TypeHierarchy) -> SemType {
        match (self, that) {
            (SemType::Bottom, _) | (_, SemType::Bottom) => SemType::Bottom,
            (SemType::Top, t) => t.clone(),
            (t, SemType::Top) => t.clone(),
            (SemType::Union(members), t) => SemType::union(members.iter().map(|m| m.meet(t, hier))),
            (t, SemType::Union(members)) => SemType::union(members.iter().map(|m| t.meet(m, hier))),
            (SemType::Atomic(a), SemType::Atomic(b)) => {
                if hier.is_subtype(a, b) {
                    self.clone()
                } else if hier.is_subtype(b, a) {
                    that.clone()
                } else {
                    SemType::Bottom
                }
            }
            (SemType::Func(arg1, ret1), SemType::Func(arg2, ret2)) => {
                let arg = arg1.meet(arg2, hier);
                let ret = ret1.meet(ret2, hier);
                if arg.is_valid() && ret.is_valid() { SemType::func(arg, ret) } else { SemType::Bottom }
            }
            _ => SemType::Bottom,
        }
    }

    /// Treat `self` as a function type and apply it to `arg`: the return type
    /// if `arg` unifies with the declared argument type, else `Bottom`.
    pub fn apply(&self, arg: &SemType, hier: &TypeHierarchy) -> SemType {
        match self {
            SemType::Func(declared, ret) => {
                if declared.meet(arg, hier).is_valid() {
                    (**ret).clone()
                } else {
                    SemType::Bottom
                }
            }
            SemType::Union(members) => SemType::union(members.iter().map(|m| m.apply(arg, hier))),
            SemType::Top => SemType::Top,
            _ => SemType::Bottom,
        }
    }
}

impl fmt::Display for SemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemType::Top => write!(f, "top"),
            SemType::Bottom => write!(f, "bottom"),
            SemType::Atomic(name) => write!(f, "{name}"),
            SemType::Func(arg, ret) => write!(f, "(-> {arg} {ret})"),
            SemType::Union(members) => {
                write!(f, "(union")?;
                for m in members {
                    write!(f, " {m}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city_hierarchy() -> TypeHierarchy {
        let mut h = TypeHierarchy::new();
        h.add_supertype("city", "location");
        h.add_supertype("location", "entity");
        h
    }

    #[test]
    fn bottom_absorbs_and_top_is_identity() {
        let h = TypeHierarchy::new();
        let num = SemType::number();
        assert_eq!(num.meet(&SemType::Bottom, &h), SemType::Bottom);
        assert_eq!(SemType::Bottom.meet(&num, &h), SemType::Bottom);
        assert_eq!(SemType::Top.meet(&num, &h), num);
        assert_eq!(num.meet(&SemType::Top, &h), num);
    }

    #[test]
    fn atomic_meet_resolves_through_hierarchy() {
        let h = city_hierarchy();
        let city = SemType::atomic("city");
        let location = SemType::atomic("location");
        // resolves to the more specific side, commutatively
        assert_eq!(city.meet(&location, &h), city);
        assert_eq!(location.meet(&city, &h), city);
        // unrelated atomics are incompatible
        assert_eq!(SemType::number().meet(&SemType::date(), &h), SemType::Bottom);
    }

    #[test]
    fn union_meet_distributes() {
        let h = TypeHierarchy::new();
        let u = SemType::union([SemType::number(), SemType::date()]);
        assert_eq!(u.meet(&SemType::number(), &h), SemType::number());
        assert_eq!(u.meet(&SemType::string(), &h), SemType::Bottom);
    }

    #[test]
    fn apply_checks_argument_via_meet() {
        let h = city_hierarchy();
        let population = SemType::func(SemType::atomic("city"), SemType::number());
        assert_eq!(population.apply(&SemType::atomic("city"), &h), SemType::number());
        // a location *might* be a city, so the meet is valid and apply goes through
        assert_eq!(population.apply(&SemType::atomic("location"), &h), SemType::number());
        assert_eq!(population.apply(&SemType::number(), &h), SemType::Bottom);
        // non-function types never apply
        assert_eq!(SemType::number().apply(&SemType::number(), &h), SemType::Bottom);
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn empty_atomic_name_is_a_programmer_error() {
        let _ = SemType::atomic("");
    }
}
