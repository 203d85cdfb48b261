//! Field-level comparison of a canonical desired state against actual state.
//!
//! The differ walks the schema, not the data: fields the schema does not
//! declare are never reported. Each [`FieldDiff`] carries the [`Trigger`]s
//! that would resolve it, which the planner groups into operations.
//!
//! Nested fields that keep the default [`DiffPolicy::RequiresRecreate`] and
//! are not marked immutable inherit the policy of the enclosing field, so a
//! nested block under an updatable field is updatable as a whole.

use serde::Serialize;
use std::fmt;

use crate::schema::{Block, DiffPolicy, FieldDescriptor, FieldKind, ResourceSchema};
use crate::value::{Object, Value, EMPTY_OBJECT};

/// The direction of a difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// Present in desired, absent in actual.
    Added,
    /// Absent (or cleared) in desired, present in actual.
    Removed,
    /// Present on both sides with different values.
    Changed,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKind::Added => write!(f, "added"),
            DiffKind::Removed => write!(f, "removed"),
            DiffKind::Changed => write!(f, "changed"),
        }
    }
}

/// What acting on a diff would take.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Only destroying and recreating the resource resolves the diff.
    Recreate,
    /// The named update operation resolves the diff.
    Operation(String),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Recreate => write!(f, "Recreate"),
            Trigger::Operation(name) => write!(f, "{}", name),
        }
    }
}

/// A single difference between desired and actual state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    /// Dot-separated path of the field. List elements use their index.
    pub path: String,
    /// The direction of the difference.
    pub kind: DiffKind,
    /// The desired value, if any.
    pub desired: Option<Value>,
    /// The actual value, if any.
    pub actual: Option<Value>,
    /// What would resolve the difference. Empty for informational diffs.
    pub triggers: Vec<Trigger>,
}

impl FieldDiff {
    /// A value present in desired but not in actual.
    pub fn added(path: impl Into<String>, desired: Value, triggers: Vec<Trigger>) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Added,
            desired: Some(desired),
            actual: None,
            triggers,
        }
    }

    /// A value present in actual but not wanted in desired.
    pub fn removed(path: impl Into<String>, actual: Value, triggers: Vec<Trigger>) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Removed,
            desired: None,
            actual: Some(actual),
            triggers,
        }
    }

    /// A value present on both sides that differs.
    pub fn changed(
        path: impl Into<String>,
        desired: Value,
        actual: Value,
        triggers: Vec<Trigger>,
    ) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Changed,
            desired: Some(desired),
            actual: Some(actual),
            triggers,
        }
    }

    /// The top-level field this diff belongs to.
    pub fn top_level_field(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }

    /// Whether only recreation resolves this diff.
    pub fn requires_recreate(&self) -> bool {
        self.triggers.contains(&Trigger::Recreate)
    }

    /// Whether this diff is reported without being acted on.
    pub fn is_informational(&self) -> bool {
        self.triggers.is_empty()
    }

    /// The named operations that resolve this diff.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.triggers.iter().filter_map(|t| match t {
            Trigger::Operation(name) => Some(name.as_str()),
            Trigger::Recreate => None,
        })
    }
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.desired, &self.actual) {
            (Some(d), Some(a)) => write!(f, "{}: {} -> {}", self.path, a, d),
            (Some(d), None) => write!(f, "{}: added {}", self.path, d),
            (None, Some(a)) => write!(f, "{}: removed {}", self.path, a),
            (None, None) => write!(f, "{}: {}", self.path, self.kind),
        }
    }
}

/// Compare a canonical desired state against an actual state.
///
/// Diffs are returned in schema declaration order. Unset desired fields are
/// never reported, and a zero value on one side matches an absent value on
/// the other.
pub fn diff(schema: &ResourceSchema, desired: &Object, actual: &Object) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    diff_block(&schema.block, desired, actual, "", None, &mut diffs);
    diffs
}

/// Whether two elements of a field compare with zero diffs.
///
/// This is the matching rule for set lists, shared with the canonicalizer.
pub(crate) fn values_match(
    descriptor: &FieldDescriptor,
    kind: &FieldKind,
    desired: &Value,
    actual: &Value,
) -> bool {
    let field = FieldContext {
        descriptor,
        policy: DiffPolicy::RequiresRecreate,
        triggers: Vec::new(),
    };
    let mut scratch = Vec::new();
    diff_value(&field, kind, "", Some(desired), Some(actual), &mut scratch);
    scratch.is_empty()
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

struct FieldContext<'a> {
    descriptor: &'a FieldDescriptor,
    policy: DiffPolicy,
    triggers: Vec<Trigger>,
}

impl<'a> FieldContext<'a> {
    fn new(descriptor: &'a FieldDescriptor, inherited: Option<&DiffPolicy>) -> Self {
        let policy = match (inherited, &descriptor.policy) {
            (Some(parent), DiffPolicy::RequiresRecreate) if !descriptor.immutable => parent.clone(),
            _ => descriptor.policy.clone(),
        };
        let triggers = if descriptor.immutable {
            vec![Trigger::Recreate]
        } else {
            match &policy {
                DiffPolicy::RequiresRecreate => vec![Trigger::Recreate],
                DiffPolicy::TriggersOperation(name) => vec![Trigger::Operation(name.clone())],
                DiffPolicy::OutputOnly => Vec::new(),
            }
        };
        Self {
            descriptor,
            policy,
            triggers,
        }
    }
}

fn diff_block(
    block: &Block,
    desired: &Object,
    actual: &Object,
    prefix: &str,
    inherited: Option<&DiffPolicy>,
    out: &mut Vec<FieldDiff>,
) {
    for (name, descriptor) in block.fields() {
        let desired_setting = desired.get(name);
        if desired_setting.is_unset() {
            continue;
        }
        let field = FieldContext::new(descriptor, inherited);
        let path = join_path(prefix, name);
        diff_value(
            &field,
            &descriptor.kind,
            &path,
            desired_setting.value().copied(),
            actual.get(name).value().copied(),
            out,
        );
    }
}

fn diff_value(
    field: &FieldContext<'_>,
    kind: &FieldKind,
    path: &str,
    desired: Option<&Value>,
    actual: Option<&Value>,
    out: &mut Vec<FieldDiff>,
) {
    match (desired, actual) {
        (None, None) => return,
        (None, Some(a)) if a.is_zero() => return,
        (Some(d), None) if d.is_zero() => return,
        _ => {},
    }

    match kind {
        FieldKind::Object(block) => match (desired, actual) {
            (None, Some(a)) => out.push(FieldDiff::removed(path, a.clone(), field.triggers.clone())),
            _ => {
                let d = desired.map(Value::as_object);
                let a = actual.map(Value::as_object);
                match (d, a) {
                    (Some(None), _) | (_, Some(None)) => push_scalar(field, path, desired, actual, out),
                    (d, a) => diff_block(
                        block,
                        d.flatten().unwrap_or(&EMPTY_OBJECT),
                        a.flatten().unwrap_or(&EMPTY_OBJECT),
                        path,
                        Some(&field.policy),
                        out,
                    ),
                }
            },
        },
        FieldKind::List(element) => {
            let (Some(d), Some(a)) = (desired, actual) else {
                push_scalar(field, path, desired, actual, out);
                return;
            };
            match (d.as_items(), a.as_items()) {
                (Some(di), Some(ai)) if di.len() == ai.len() => {
                    for (i, (dv, av)) in di.iter().zip(ai).enumerate() {
                        let elem_path = format!("{}.{}", path, i);
                        diff_value(field, element, &elem_path, Some(dv), Some(av), out);
                    }
                },
                _ => out.push(FieldDiff::changed(
                    path,
                    d.clone(),
                    a.clone(),
                    field.triggers.clone(),
                )),
            }
        },
        FieldKind::Set(element) => {
            let empty: &[Value] = &[];
            let di = desired.and_then(Value::as_items).unwrap_or(empty);
            let ai = actual.and_then(Value::as_items).unwrap_or(empty);
            let mut matched = vec![false; ai.len()];
            for dv in di {
                let found = ai
                    .iter()
                    .enumerate()
                    .find(|(j, av)| !matched[*j] && values_match(field.descriptor, element, dv, av))
                    .map(|(j, _)| j);
                match found {
                    Some(j) => matched[j] = true,
                    None => out.push(FieldDiff::added(path, dv.clone(), field.triggers.clone())),
                }
            }
            for (av, _) in ai.iter().zip(&matched).filter(|(_, m)| !**m) {
                out.push(FieldDiff::removed(path, av.clone(), field.triggers.clone()));
            }
        },
        _ => {
            if !field.descriptor.equivalence.equivalent(desired, actual) {
                push_scalar(field, path, desired, actual, out);
            }
        },
    }
}

fn push_scalar(
    field: &FieldContext<'_>,
    path: &str,
    desired: Option<&Value>,
    actual: Option<&Value>,
    out: &mut Vec<FieldDiff>,
) {
    let triggers = field.triggers.clone();
    let diff = match (desired, actual) {
        (Some(d), Some(a)) => FieldDiff::changed(path, d.clone(), a.clone(), triggers),
        (Some(d), None) => FieldDiff::added(path, d.clone(), triggers),
        (None, Some(a)) => FieldDiff::removed(path, a.clone(), triggers),
        (None, None) => return,
    };
    out.push(diff);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equivalence::Equivalence;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("Pool", "pools/{{name}}")
            .with_field("name", FieldDescriptor::string())
            .with_field("tier", FieldDescriptor::enumeration().immutable())
            .with_field(
                "labels",
                FieldDescriptor::map(FieldKind::String).updated_by("update_pool"),
            )
            .with_field(
                "policy",
                FieldDescriptor::object(
                    Block::new()
                        .with_field("allow_csr", FieldDescriptor::bool())
                        .with_field("max_ttl", FieldDescriptor::string())
                        .with_field("key_type", FieldDescriptor::string().immutable()),
                )
                .updated_by("update_pool"),
            )
            .with_field(
                "modes",
                FieldDescriptor::set(FieldKind::String).updated_by("update_pool"),
            )
            .with_field(
                "servers",
                FieldDescriptor::list(FieldKind::String).updated_by("update_pool"),
            )
            .with_field(
                "display",
                FieldDescriptor::string()
                    .updated_by("update_pool")
                    .with_equivalence(Equivalence::CaseInsensitive),
            )
            .with_field("state", FieldDescriptor::enumeration().output_only())
            .with_field(
                "create_time",
                FieldDescriptor::string().output_only().immutable(),
            )
            .with_operation("update_pool")
    }

    fn set(items: &[&str]) -> Value {
        Value::Set(items.iter().map(|s| Value::from(*s)).collect())
    }

    #[test]
    fn test_self_diff_is_empty() {
        let pool = Object::new()
            .with("name", "p")
            .with("tier", "ENTERPRISE")
            .with("labels", Object::new().with("env", "prod"))
            .with("policy", Object::new().with("allow_csr", true))
            .with("modes", set(&["A", "B"]))
            .with("servers", Value::List(vec![Value::from("x")]))
            .with("state", "ENABLED");

        assert!(diff(&schema(), &pool, &pool).is_empty());
    }

    #[test]
    fn test_unset_desired_is_ignored() {
        let desired = Object::new().with("name", "p");
        let actual = Object::new().with("name", "p").with("tier", "DEVOPS");
        assert!(diff(&schema(), &desired, &actual).is_empty());
    }

    #[test]
    fn test_immutable_change_triggers_recreate() {
        let desired = Object::new().with("tier", "ENTERPRISE");
        let actual = Object::new().with("tier", "DEVOPS");

        let diffs = diff(&schema(), &desired, &actual);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "tier");
        assert_eq!(diffs[0].kind, DiffKind::Changed);
        assert!(diffs[0].requires_recreate());
    }

    #[test]
    fn test_update_triggers_named_operation() {
        let desired = Object::new().with("labels", Object::new().with("env", "prod"));
        let actual = Object::new().with("labels", Object::new().with("env", "dev"));

        let diffs = diff(&schema(), &desired, &actual);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "labels");
        assert_eq!(diffs[0].operations().collect::<Vec<_>>(), vec!["update_pool"]);
        assert_eq!(
            diffs[0].to_string(),
            r#"labels: {"env":"dev"} -> {"env":"prod"}"#
        );
    }

    #[test]
    fn test_set_reconciliation() {
        let desired = Object::new().with("modes", set(&["A", "B"]));
        let actual = Object::new().with("modes", set(&["B", "C"]));

        let diffs = diff(&schema(), &desired, &actual);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].kind, DiffKind::Added);
        assert_eq!(diffs[0].desired, Some(Value::from("A")));
        assert_eq!(diffs[1].kind, DiffKind::Removed);
        assert_eq!(diffs[1].actual, Some(Value::from("C")));
        assert!(diffs.iter().all(|d| d.path == "modes"));
    }

    #[test]
    fn test_set_order_is_irrelevant() {
        let desired = Object::new().with("modes", set(&["A", "B"]));
        let actual = Object::new().with("modes", set(&["B", "A"]));
        assert!(diff(&schema(), &desired, &actual).is_empty());
    }

    #[test]
    fn test_ordered_list() {
        let list = |items: &[&str]| Value::List(items.iter().map(|s| Value::from(*s)).collect());

        let reordered = diff(
            &schema(),
            &Object::new().with("servers", list(&["a", "b"])),
            &Object::new().with("servers", list(&["b", "a"])),
        );
        let paths: Vec<&str> = reordered.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["servers.0", "servers.1"]);

        let resized = diff(
            &schema(),
            &Object::new().with("servers", list(&["a"])),
            &Object::new().with("servers", list(&["a", "b"])),
        );
        assert_eq!(resized.len(), 1);
        assert_eq!(resized[0].path, "servers");
        assert_eq!(resized[0].kind, DiffKind::Changed);
    }

    #[test]
    fn test_all_default_nested_block_matches_absent() {
        let desired = Object::new().with(
            "policy",
            Object::new().with("allow_csr", false).with("max_ttl", ""),
        );
        let actual = Object::new();
        assert!(diff(&schema(), &desired, &actual).is_empty());
    }

    #[test]
    fn test_nested_field_inherits_policy() {
        let desired = Object::new().with(
            "policy",
            Object::new().with("allow_csr", true).with("key_type", "RSA"),
        );
        let actual = Object::new().with(
            "policy",
            Object::new().with("allow_csr", false).with("key_type", "EC"),
        );

        let diffs = diff(&schema(), &desired, &actual);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, "policy.allow_csr");
        assert_eq!(diffs[0].triggers, vec![Trigger::Operation("update_pool".into())]);
        assert_eq!(diffs[1].path, "policy.key_type");
        assert!(diffs[1].requires_recreate());
        assert_eq!(diffs[1].top_level_field(), "policy");
    }

    #[test]
    fn test_cleared_nested_block() {
        let desired = Object::new().with_cleared("policy");
        let actual = Object::new().with("policy", Object::new().with("allow_csr", true));

        let diffs = diff(&schema(), &desired, &actual);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "policy");
        assert_eq!(diffs[0].kind, DiffKind::Removed);

        let zero_actual = Object::new().with("policy", Object::new().with("allow_csr", false));
        assert!(diff(&schema(), &desired, &zero_actual).is_empty());
    }

    #[test]
    fn test_equivalence_applies() {
        let desired = Object::new().with("display", "My Pool");
        let actual = Object::new().with("display", "my pool");
        assert!(diff(&schema(), &desired, &actual).is_empty());
    }

    #[test]
    fn test_output_only_diffs() {
        let desired = Object::new().with("state", "ENABLED").with("create_time", "t0");
        let actual = Object::new().with("state", "DISABLED").with("create_time", "t1");

        let diffs = diff(&schema(), &desired, &actual);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].is_informational());
        assert!(diffs[1].requires_recreate());
    }

    #[test]
    fn test_unknown_enum_values_are_compared() {
        let desired = Object::new().with("tier", "TIER_FROM_THE_FUTURE");
        let actual = Object::new().with("tier", "TIER_FROM_THE_FUTURE");
        assert!(diff(&schema(), &desired, &actual).is_empty());
    }
}
