//! Structural diff and patch over JSON values.
//!
//! [`diff`] walks two JSON values in parallel and records, per
//! [`FieldPath`], only the leaves where `target` differs from `base`.
//! [`apply`] interprets such a [`Diff`] against a (possibly different) base.
//! Together they implement late-binding inheritance: a variant stores the
//! leaves it overrides, and everything else is read from whatever its
//! ancestors hold at resolution time.
//!
//! # Matching rules
//!
//! - Objects are matched key by key.
//! - Arrays whose elements are all objects with a unique string `"id"` are
//!   *keyed*: elements are matched by id, never by position. This is how a
//!   single field of a single component is overridden.
//! - Everything else (scalars, plain arrays such as tags or child id lists,
//!   type changes) is a leaf, replaced wholesale when unequal.
//!
//! Item operations alone leave surviving elements in base order and append
//! new ones in id order. When the target orders its elements differently,
//! the diff also records the target's id sequence for that array; [`apply`]
//! reorders to it last. Elements the base gains later and the recorded
//! sequence does not name stay at the end.

use std::collections::{BTreeMap, BTreeSet};

use lineage_core::component::COMPONENT_ID_FIELD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{FieldPath, Segment};

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Per-path overrides and removals relative to a base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Paths whose value is replaced (or inserted) by the given value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<FieldPath, Value>,
    /// Paths that are deleted from the base.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub removed: BTreeSet<FieldPath>,
    /// Keyed arrays whose element order is fixed to the given id sequence.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub order: BTreeMap<FieldPath, Vec<String>>,
}

impl Diff {
    /// An empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if applying this diff changes nothing.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty() && self.order.is_empty()
    }

    /// Total number of set, removed and reordered paths.
    pub fn len(&self) -> usize {
        self.set.len() + self.removed.len() + self.order.len()
    }

    /// Returns `true` if this diff sets, removes or reorders `path` or
    /// anything inside it.
    pub fn touches(&self, path: &FieldPath) -> bool {
        self.set
            .keys()
            .chain(self.removed.iter())
            .chain(self.order.keys())
            .any(|p| path.is_prefix_of(p))
    }
}

/// Outcome counters from [`apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Overrides written into the value.
    pub applied: usize,
    /// Overrides whose container no longer exists in the base.
    pub skipped: usize,
    /// Removals that deleted something.
    pub removed: usize,
    /// Keyed arrays put into their recorded order.
    pub reordered: usize,
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

/// Compute the leaves where `target` differs from `base`.
pub fn diff(base: &Value, target: &Value) -> Diff {
    let mut out = Diff::new();
    diff_into(base, target, &FieldPath::root(), &mut out);
    out
}

fn diff_into(base: &Value, target: &Value, path: &FieldPath, out: &mut Diff) {
    match (base, target) {
        (Value::Object(b), Value::Object(t)) => {
            for (key, t_val) in t {
                let child = path.key(key);
                match b.get(key) {
                    Some(b_val) => diff_into(b_val, t_val, &child, out),
                    None => {
                        out.set.insert(child, t_val.clone());
                    }
                }
            }
            for key in b.keys().filter(|k| !t.contains_key(*k)) {
                out.removed.insert(path.key(key));
            }
        }
        (Value::Array(b), Value::Array(t)) if is_keyed(b) && is_keyed(t) => {
            for t_item in t {
                let Some(id) = item_id(t_item) else { continue };
                let child = path.item(id);
                match find_item(b, id) {
                    Some(b_item) => diff_into(b_item, t_item, &child, out),
                    None => {
                        out.set.insert(child, t_item.clone());
                    }
                }
            }
            for b_item in b {
                if let Some(id) = item_id(b_item) {
                    if find_item(t, id).is_none() {
                        out.removed.insert(path.item(id));
                    }
                }
            }
            let wanted: Vec<&str> = t.iter().filter_map(item_id).collect();
            if implied_order(b, t) != wanted {
                out.order
                    .insert(path.clone(), wanted.into_iter().map(str::to_owned).collect());
            }
        }
        _ => {
            if base != target {
                out.set.insert(path.clone(), target.clone());
            }
        }
    }
}

fn item_id(value: &Value) -> Option<&str> {
    value.get(COMPONENT_ID_FIELD)?.as_str()
}

/// Every element is an object with a string id, and ids are unique.
fn is_keyed(items: &[Value]) -> bool {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .all(|item| item.is_object() && item_id(item).is_some_and(|id| seen.insert(id)))
}

/// The id sequence item operations produce on their own: survivors in base
/// order, then additions in path order.
fn implied_order<'a>(base: &'a [Value], target: &'a [Value]) -> Vec<&'a str> {
    let mut ids: Vec<&str> = base
        .iter()
        .filter_map(item_id)
        .filter(|id| find_item(target, id).is_some())
        .collect();
    let mut added: Vec<&str> = target
        .iter()
        .filter_map(item_id)
        .filter(|id| find_item(base, id).is_none())
        .collect();
    added.sort_unstable();
    ids.extend(added);
    ids
}

fn find_item<'a>(items: &'a [Value], id: &str) -> Option<&'a Value> {
    items.iter().find(|item| item_id(item) == Some(id))
}

fn find_item_mut<'a>(items: &'a mut [Value], id: &str) -> Option<&'a mut Value> {
    items.iter_mut().find(|item| item_id(item) == Some(id))
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Apply `diff` to `base` in place.
///
/// Overrides are applied in path order, then removals, then reorders. An
/// override or reorder whose
/// enclosing container is missing from `base` (an ancestor deleted the
/// component it belongs to) is skipped and logged; removing an absent path
/// does nothing.
pub fn apply(base: &mut Value, diff: &Diff) -> ApplyReport {
    let mut report = ApplyReport::default();

    for (path, value) in &diff.set {
        if set_path(base, path.segments(), value.clone()) {
            report.applied += 1;
        } else {
            report.skipped += 1;
            tracing::warn!(
                path = %path,
                "override target no longer exists in the inherited value -- skipping"
            );
        }
    }

    for path in &diff.removed {
        if remove_path(base, path.segments()) {
            report.removed += 1;
        }
    }

    for (path, ids) in &diff.order {
        match navigate_mut(base, path.segments()) {
            Some(Value::Array(items)) => {
                // Stable, so unlisted elements keep their relative order at the end.
                items.sort_by_key(|item| {
                    item_id(item)
                        .and_then(|id| ids.iter().position(|wanted| wanted == id))
                        .unwrap_or(usize::MAX)
                });
                report.reordered += 1;
            }
            _ => {
                report.skipped += 1;
                tracing::warn!(
                    path = %path,
                    "reorder target no longer exists in the inherited value -- skipping"
                );
            }
        }
    }

    report
}

fn navigate_mut<'a>(mut current: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
            (Segment::Item(id), Value::Array(items)) => find_item_mut(items, id)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(target: &mut Value, segments: &[Segment], value: Value) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        *target = value;
        return true;
    };
    let Some(container) = navigate_mut(target, parents) else {
        return false;
    };
    match (last, container) {
        (Segment::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), value);
            true
        }
        (Segment::Item(id), Value::Array(items)) => {
            match find_item_mut(items, id) {
                Some(slot) => *slot = value,
                None => items.push(value),
            }
            true
        }
        _ => false,
    }
}

fn remove_path(target: &mut Value, segments: &[Segment]) -> bool {
    // The root itself is never removed.
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let Some(container) = navigate_mut(target, parents) else {
        return false;
    };
    match (last, container) {
        (Segment::Key(key), Value::Object(map)) => map.remove(key).is_some(),
        (Segment::Item(id), Value::Array(items)) => {
            let before = items.len();
            items.retain(|item| item_id(item) != Some(id.as_str()));
            items.len() != before
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
