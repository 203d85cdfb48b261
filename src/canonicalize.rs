//! Canonicalization of desired and freshly observed state.
//!
//! Servers normalize what they store: a short name comes back as a full
//! self-link, an enum changes case, a default is filled in. Comparing the
//! caller's document to the server's directly would report all of that as
//! drift. [`canonicalize`] folds equivalent remote values into the desired
//! state before diffing, and [`canonicalize_new`] folds caller-significant
//! values the server does not echo back into the observed state.
//!
//! Both functions walk the schema and recurse through nested objects, ordered
//! lists and set lists. Fields the schema does not declare pass through from
//! the primary input untouched.
//!
//! Set-list elements present only in the initial state are not carried into
//! the canonical desired state, so the differ still reports them as removed.
//! [`canonicalize_new`] does carry unmatched observed elements through.

use crate::diff::values_match;
use crate::equivalence::Equivalence;
use crate::schema::{Block, FieldDescriptor, FieldKind, ResourceSchema};
use crate::value::{Object, Setting, Value};

/// Merge a desired state with the last observed state.
///
/// Per field: an unset desired value takes the initial value, a cleared one
/// stays cleared, and a value equivalent to the initial one is replaced by the
/// initial form. Set-list elements are matched with the differ's zero-diff
/// rule; unmatched desired elements are kept and initial-only elements are
/// dropped.
///
/// Canonicalizing an already canonical state against the same initial state
/// returns it unchanged.
pub fn canonicalize(schema: &ResourceSchema, desired: &Object, initial: Option<&Object>) -> Object {
    match initial {
        Some(initial) => canonicalize_block(&schema.block, desired, initial),
        None => desired.clone(),
    }
}

/// Merge caller-significant values into freshly observed state.
///
/// Input-only fields and identity parameters are copied from desired. A field
/// the server omits is taken from desired when desired is cleared or zero.
/// Equivalent values take the desired form so the convergence check does not
/// report formatting differences.
pub fn canonicalize_new(schema: &ResourceSchema, desired: &Object, new_actual: &Object) -> Object {
    let mut result = canonicalize_new_block(&schema.block, desired, new_actual);
    for param in schema.identity_fields() {
        let setting = desired.get(param);
        if setting.is_value() {
            result.set(param, setting.cloned());
        }
    }
    result
}

fn canonicalize_block(block: &Block, desired: &Object, initial: &Object) -> Object {
    let mut result = desired.clone();
    for (name, descriptor) in block.fields() {
        let merged = canonicalize_setting(
            descriptor,
            &descriptor.kind,
            desired.get(name),
            initial.get(name),
        );
        result.set(name, merged);
    }
    result
}

fn canonicalize_setting(
    descriptor: &FieldDescriptor,
    kind: &FieldKind,
    desired: Setting<&Value>,
    initial: Setting<&Value>,
) -> Setting<Value> {
    let desired = match desired {
        Setting::Unset => return initial.cloned(),
        Setting::Cleared => return Setting::Cleared,
        Setting::Value(v) => v,
    };
    match initial.value() {
        None => Setting::Value(desired.clone()),
        Some(initial) if descriptor.equivalence == Equivalence::ZeroAsAbsent && desired.is_zero() => {
            Setting::Value((*initial).clone())
        },
        Some(initial) => Setting::Value(canonicalize_value(descriptor, kind, desired, initial)),
    }
}

fn canonicalize_value(
    descriptor: &FieldDescriptor,
    kind: &FieldKind,
    desired: &Value,
    initial: &Value,
) -> Value {
    match kind {
        FieldKind::Object(block) => match (desired.as_object(), initial.as_object()) {
            (Some(d), Some(i)) => Value::Object(canonicalize_block(block, d, i)),
            _ => desired.clone(),
        },
        FieldKind::List(element) => match (desired.as_items(), initial.as_items()) {
            (Some(d), Some(i)) if d.len() == i.len() => rebuild(
                desired,
                d.iter()
                    .zip(i)
                    .map(|(d, i)| canonicalize_value(descriptor, element, d, i))
                    .collect(),
            ),
            _ => desired.clone(),
        },
        FieldKind::Set(element) => {
            let (Some(d), Some(i)) = (desired.as_items(), initial.as_items()) else {
                return desired.clone();
            };
            let mut used = vec![false; i.len()];
            let items = d
                .iter()
                .map(|dv| {
                    match first_match(descriptor, element, dv, i, &used, false) {
                        Some(j) => {
                            used[j] = true;
                            canonicalize_value(descriptor, element, dv, &i[j])
                        },
                        None => dv.clone(),
                    }
                })
                .collect();
            rebuild(desired, items)
        },
        _ => {
            if descriptor.equivalence.equivalent(Some(desired), Some(initial)) {
                initial.clone()
            } else {
                desired.clone()
            }
        },
    }
}

fn canonicalize_new_block(block: &Block, desired: &Object, new_actual: &Object) -> Object {
    let mut result = new_actual.clone();
    for (name, descriptor) in block.fields() {
        let merged = canonicalize_new_setting(
            descriptor,
            &descriptor.kind,
            desired.get(name),
            new_actual.get(name),
        );
        result.set(name, merged);
    }
    result
}

fn canonicalize_new_setting(
    descriptor: &FieldDescriptor,
    kind: &FieldKind,
    desired: Setting<&Value>,
    new_actual: Setting<&Value>,
) -> Setting<Value> {
    if desired.is_unset() {
        return new_actual.cloned();
    }
    if descriptor.input_only {
        return desired.cloned();
    }
    match (desired.value(), new_actual.value()) {
        (_, None) if desired.is_cleared() => Setting::Cleared,
        (Some(d), None) if d.is_zero() => Setting::Value((*d).clone()),
        (Some(d), Some(n)) => Setting::Value(canonicalize_new_value(descriptor, kind, d, n)),
        _ => new_actual.cloned(),
    }
}

fn canonicalize_new_value(
    descriptor: &FieldDescriptor,
    kind: &FieldKind,
    desired: &Value,
    new_actual: &Value,
) -> Value {
    match kind {
        FieldKind::Object(block) => match (desired.as_object(), new_actual.as_object()) {
            (Some(d), Some(n)) => Value::Object(canonicalize_new_block(block, d, n)),
            _ => new_actual.clone(),
        },
        FieldKind::List(element) => match (desired.as_items(), new_actual.as_items()) {
            (Some(d), Some(n)) if d.len() == n.len() => rebuild(
                new_actual,
                d.iter()
                    .zip(n)
                    .map(|(d, n)| canonicalize_new_value(descriptor, element, d, n))
                    .collect(),
            ),
            _ => new_actual.clone(),
        },
        FieldKind::Set(element) => {
            let (Some(d), Some(n)) = (desired.as_items(), new_actual.as_items()) else {
                return new_actual.clone();
            };
            let mut used = vec![false; d.len()];
            let items = n
                .iter()
                .map(|nv| {
                    match first_match(descriptor, element, nv, d, &used, true) {
                        Some(j) => {
                            used[j] = true;
                            canonicalize_new_value(descriptor, element, &d[j], nv)
                        },
                        None => nv.clone(),
                    }
                })
                .collect();
            rebuild(new_actual, items)
        },
        _ => {
            if descriptor.equivalence.equivalent(Some(desired), Some(new_actual)) {
                desired.clone()
            } else {
                new_actual.clone()
            }
        },
    }
}

/// Index of the first unused candidate that matches `value` with zero diffs.
///
/// `reversed` means `value` is the actual side and the candidates are desired.
fn first_match(
    descriptor: &FieldDescriptor,
    element: &FieldKind,
    value: &Value,
    candidates: &[Value],
    used: &[bool],
    reversed: bool,
) -> Option<usize> {
    candidates.iter().enumerate().position(|(j, candidate)| {
        !used[j]
            && if reversed {
                values_match(descriptor, element, candidate, value)
            } else {
                values_match(descriptor, element, value, candidate)
            }
    })
}

fn rebuild(like: &Value, items: Vec<Value>) -> Value {
    match like {
        Value::Set(_) => Value::Set(items),
        _ => Value::List(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("Template", "projects/{{project}}/templates/{{name}}")
            .with_field("name", FieldDescriptor::string())
            .with_field("project", FieldDescriptor::reference())
            .with_field(
                "tier",
                FieldDescriptor::enumeration().with_equivalence(Equivalence::CaseInsensitive),
            )
            .with_field(
                "pool",
                FieldDescriptor::reference().updated_by("update_template"),
            )
            .with_field(
                "max_issuer_path_length",
                FieldDescriptor::int()
                    .updated_by("update_template")
                    .with_equivalence(Equivalence::ZeroAsAbsent),
            )
            .with_field(
                "usages",
                FieldDescriptor::set(FieldKind::Enum)
                    .updated_by("update_template")
                    .with_equivalence(Equivalence::CaseInsensitive),
            )
            .with_field(
                "options",
                FieldDescriptor::object(
                    Block::new()
                        .with_field("region", FieldDescriptor::string().with_equivalence(Equivalence::CaseInsensitive))
                        .with_field("enabled", FieldDescriptor::bool()),
                )
                .updated_by("update_template"),
            )
            .with_field(
                "secret",
                FieldDescriptor::string().input_only().updated_by("update_template"),
            )
            .with_field("create_time", FieldDescriptor::string().output_only())
            .with_operation("update_template")
    }

    fn set(items: &[&str]) -> Value {
        Value::Set(items.iter().map(|s| Value::from(*s)).collect())
    }

    #[test]
    fn test_unset_takes_initial() {
        let desired = Object::new().with("name", "t");
        let initial = Object::new().with("name", "t").with("create_time", "t0");

        let canonical = canonicalize(&schema(), &desired, Some(&initial));
        assert_eq!(canonical.get("create_time"), Setting::Value(&Value::from("t0")));
    }

    #[test]
    fn test_cleared_stays_cleared() {
        let desired = Object::new().with_cleared("options");
        let initial = Object::new().with("options", Object::new().with("enabled", true));

        let canonical = canonicalize(&schema(), &desired, Some(&initial));
        assert!(canonical.get("options").is_cleared());
    }

    #[test]
    fn test_no_initial_returns_desired() {
        let desired = Object::new().with("tier", "enterprise").with("extra", 1);
        assert_eq!(canonicalize(&schema(), &desired, None), desired);
    }

    #[test]
    fn test_equivalent_values_take_initial_form() {
        let desired = Object::new().with("tier", "enterprise").with("pool", "pool-1");
        let initial = Object::new()
            .with("tier", "ENTERPRISE")
            .with("pool", "projects/p/locations/l/caPools/pool-1");

        let canonical = canonicalize(&schema(), &desired, Some(&initial));
        assert_eq!(canonical.get("tier"), Setting::Value(&Value::from("ENTERPRISE")));
        assert_eq!(
            canonical.get("pool"),
            Setting::Value(&Value::from("projects/p/locations/l/caPools/pool-1"))
        );
    }

    #[test]
    fn test_different_values_keep_desired() {
        let desired = Object::new().with("tier", "DEVOPS");
        let initial = Object::new().with("tier", "ENTERPRISE");

        let canonical = canonicalize(&schema(), &desired, Some(&initial));
        assert_eq!(canonical.get("tier"), Setting::Value(&Value::from("DEVOPS")));
    }

    #[test]
    fn test_zero_as_absent_takes_initial() {
        let desired = Object::new().with("max_issuer_path_length", 0);
        let initial = Object::new().with("max_issuer_path_length", 3);

        let canonical = canonicalize(&schema(), &desired, Some(&initial));
        assert_eq!(
            canonical.get("max_issuer_path_length"),
            Setting::Value(&Value::Int(3))
        );
    }

    #[test]
    fn test_nested_objects_recurse() {
        let desired = Object::new().with("options", Object::new().with("region", "us-east1"));
        let initial = Object::new().with(
            "options",
            Object::new().with("region", "US-EAST1").with("enabled", true),
        );

        let canonical = canonicalize(&schema(), &desired, Some(&initial));
        let options = canonical.get("options").value().and_then(|v| v.as_object()).unwrap();
        assert_eq!(options.get("region"), Setting::Value(&Value::from("US-EAST1")));
        assert_eq!(options.get("enabled"), Setting::Value(&Value::Bool(true)));
    }

    #[test]
    fn test_set_matching() {
        let desired = Object::new().with("usages", set(&["server_auth", "CLIENT_AUTH"]));
        let initial = Object::new().with("usages", set(&["CODE_SIGNING", "SERVER_AUTH"]));

        let canonical = canonicalize(&schema(), &desired, Some(&initial));
        assert_eq!(
            canonical.get("usages"),
            Setting::Value(&set(&["SERVER_AUTH", "CLIENT_AUTH"]))
        );
    }

    #[test]
    fn test_idempotent() {
        let desired = Object::new()
            .with("tier", "enterprise")
            .with("usages", set(&["server_auth", "CLIENT_AUTH"]))
            .with("options", Object::new().with("region", "us-east1"))
            .with("max_issuer_path_length", 0);
        let initial = Object::new()
            .with("tier", "ENTERPRISE")
            .with("usages", set(&["SERVER_AUTH"]))
            .with("options", Object::new().with("region", "US-EAST1"))
            .with("max_issuer_path_length", 2)
            .with("create_time", "t0");

        let once = canonicalize(&schema(), &desired, Some(&initial));
        let twice = canonicalize(&schema(), &once, Some(&initial));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_canonical_self_diff_is_empty() {
        let desired = Object::new().with("tier", "enterprise").with("pool", "pool-1");
        let initial = Object::new()
            .with("tier", "ENTERPRISE")
            .with("pool", "projects/p/locations/l/caPools/pool-1");

        let canonical = canonicalize(&schema(), &desired, Some(&initial));
        assert!(diff(&schema(), &canonical, &canonical).is_empty());
        assert!(diff(&schema(), &canonical, &initial).is_empty());
    }

    #[test]
    fn test_canonicalize_new_copies_input_only_and_identity() {
        let desired = Object::new()
            .with("name", "t")
            .with("project", "my-proj")
            .with("secret", "hunter2");
        let new_actual = Object::new()
            .with("name", "t")
            .with("create_time", "t0");

        let result = canonicalize_new(&schema(), &desired, &new_actual);
        assert_eq!(result.get("secret"), Setting::Value(&Value::from("hunter2")));
        assert_eq!(result.get("project"), Setting::Value(&Value::from("my-proj")));
        assert_eq!(result.get("create_time"), Setting::Value(&Value::from("t0")));
    }

    #[test]
    fn test_canonicalize_new_prefers_desired_form() {
        let desired = Object::new()
            .with("tier", "enterprise")
            .with("usages", set(&["server_auth"]))
            .with_cleared("options");
        let new_actual = Object::new()
            .with("tier", "ENTERPRISE")
            .with("usages", set(&["CODE_SIGNING", "SERVER_AUTH"]));

        let result = canonicalize_new(&schema(), &desired, &new_actual);
        assert_eq!(result.get("tier"), Setting::Value(&Value::from("enterprise")));
        assert_eq!(
            result.get("usages"),
            Setting::Value(&set(&["CODE_SIGNING", "server_auth"]))
        );
        assert!(result.get("options").is_cleared());
    }

    #[test]
    fn test_canonicalize_new_keeps_server_changes() {
        let desired = Object::new().with("tier", "DEVOPS");
        let new_actual = Object::new().with("tier", "ENTERPRISE");

        let result = canonicalize_new(&schema(), &desired, &new_actual);
        assert_eq!(result.get("tier"), Setting::Value(&Value::from("ENTERPRISE")));
    }
}
