//! Per-field equivalence functions.
//!
//! The canonicalizer and the differ never compare field values directly; they
//! ask the field's [`Equivalence`] whether two values mean the same thing.
//! This is what keeps server-side normalization (case changes, expanded
//! self-links, omitted zero values) from being reported as drift.

use std::fmt;

use crate::value::Value;

/// A caller-supplied comparison.
pub type EquivalenceFn = fn(&Value, &Value) -> bool;

/// How two values of a field are compared.
#[derive(Clone, Copy, Default)]
pub enum Equivalence {
    /// Structural equality, with integers and floats compared numerically.
    #[default]
    Exact,
    /// Strings compared ignoring surrounding whitespace and ASCII case.
    CaseInsensitive,
    /// A full resource path equals the short name it ends with.
    Reference,
    /// Zero values are equivalent to an absent value.
    ZeroAsAbsent,
    /// A caller-supplied comparison of two present values.
    Custom(EquivalenceFn),
}

impl Equivalence {
    /// Whether `a` and `b` are equivalent. `None` is an absent value.
    pub fn equivalent(&self, a: Option<&Value>, b: Option<&Value>) -> bool {
        let (a, b) = match self {
            Equivalence::ZeroAsAbsent => (a.filter(|v| !v.is_zero()), b.filter(|v| !v.is_zero())),
            _ => (a, b),
        };
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => self.values_equivalent(a, b),
            _ => false,
        }
    }

    fn values_equivalent(&self, a: &Value, b: &Value) -> bool {
        match self {
            Equivalence::Exact | Equivalence::ZeroAsAbsent => exact(a, b),
            Equivalence::CaseInsensitive => match (a, b) {
                (Value::String(a), Value::String(b)) => strings_equivalent(a, b),
                _ => exact(a, b),
            },
            Equivalence::Reference => match (a, b) {
                (Value::String(a), Value::String(b)) => references_equivalent(a, b),
                _ => exact(a, b),
            },
            Equivalence::Custom(f) => f(a, b),
        }
    }
}

impl fmt::Debug for Equivalence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Equivalence::Exact => write!(f, "Exact"),
            Equivalence::CaseInsensitive => write!(f, "CaseInsensitive"),
            Equivalence::Reference => write!(f, "Reference"),
            Equivalence::ZeroAsAbsent => write!(f, "ZeroAsAbsent"),
            Equivalence::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl PartialEq for Equivalence {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Equivalence::Custom(a), Equivalence::Custom(b)) => *a as usize == *b as usize,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

/// Strings equal ignoring surrounding whitespace and ASCII case.
pub fn strings_equivalent(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// A resource path and the short name it ends with are the same reference.
///
/// `projects/p/locations/l/caPools/pool` is equivalent to `pool`, but two
/// different full paths are not.
pub fn references_equivalent(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    !short.is_empty()
        && !short.contains('/')
        && long
            .strip_suffix(short)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

fn exact(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => a.as_f64() == b.as_f64(),
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().zip(b.iter()).all(|((na, va), (nb, vb))| {
                    na == nb
                        && match (va.value(), vb.value()) {
                            (Some(va), Some(vb)) => exact(va, vb),
                            (None, None) => va.is_cleared() == vb.is_cleared(),
                            _ => false,
                        }
                })
        },
        (Value::Set(a), Value::Set(b)) => a.len() == b.len() && sets_match(a, b),
        (
            Value::List(a) | Value::Set(a),
            Value::List(b) | Value::Set(b),
        ) => a.len() == b.len() && a.iter().zip(b).all(|(a, b)| exact(a, b)),
        _ => a == b,
    }
}

// Each element of `a` pairs with the first unused equal element of `b`.
fn sets_match(a: &[Value], b: &[Value]) -> bool {
    let mut used = vec![false; b.len()];
    a.iter().all(|av| {
        match (0..b.len()).find(|&j| !used[j] && exact(av, &b[j])) {
            Some(j) => {
                used[j] = true;
                true
            },
            None => false,
        }
    })
}
