//! Three-way merge of note contents.
//!
//! Pure functions over strings and `serde_json::Value`, so the policy can be
//! tested without a repository. Conventions for every function here:
//! `base` is the common ancestor, `other` the incoming side, `local` the side
//! the ref currently points at. `None` means "no note / field absent".

use serde_json::{Map, Value};

/// Separator between entries of a commit note log.
pub const LOG_SEPARATOR: &str = "\n\n";

/// Merge one note entry.
///
/// Entries that parse as JSON objects on every present side are merged as
/// documents. Other text is merged as an append-only log when either side
/// extends the base log; two plain overwrites resolve to local. Returns
/// `None` when the merged result has no note at all.
pub fn merge_note(base: Option<&str>, other: Option<&str>, local: Option<&str>) -> Option<String> {
    if other == local || base == other {
        return local.map(str::to_string);
    }
    if base == local {
        return other.map(str::to_string);
    }

    let (other, local) = match (other, local) {
        // deleted on one side, modified on the other: keep the modification
        (None, local) => return local.map(str::to_string),
        (other, None) => return other.map(str::to_string),
        (Some(other), Some(local)) => (other, local),
    };

    if let (Some(other_doc), Some(local_doc)) = (parse_object(other), parse_object(local)) {
        let base_doc = match base {
            None => Some(Value::Object(Map::new())),
            Some(text) => parse_object(text),
        };
        if let Some(base_doc) = base_doc {
            let merged = merge_values(Some(&base_doc), Some(&other_doc), Some(&local_doc));
            return merged.map(|value| value.to_string());
        }
    }

    let base = base.unwrap_or("");
    let base_entries = split_entries(base);
    if extends(&base_entries, other) || extends(&base_entries, local) {
        return Some(merge_logs(base, other, local));
    }
    // both sides overwrote the value: a scalar conflict
    Some(local.to_string())
}

/// Whether `log` starts with every entry of `base_entries`, in order.
fn extends(base_entries: &[&str], log: &str) -> bool {
    let entries = split_entries(log);
    entries.len() >= base_entries.len() && entries[..base_entries.len()] == *base_entries
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Schema-agnostic three-way merge of a structured value.
///
/// - one side changed: take the change (including removal)
/// - objects: merged key by key
/// - arrays: merged as sets, see [`merge_sets`]
/// - conflicting scalars: local wins
pub fn merge_values(base: Option<&Value>, other: Option<&Value>, local: Option<&Value>) -> Option<Value> {
    if other == local || base == other {
        return local.cloned();
    }
    if base == local {
        return other.cloned();
    }

    match (other, local) {
        (None, local) => local.cloned(),
        (other, None) => other.cloned(),
        (Some(Value::Object(other)), Some(Value::Object(local))) => {
            let empty = Map::new();
            let base = match base {
                Some(Value::Object(base)) => base,
                _ => &empty,
            };

            let mut merged = Map::new();
            let keys = base.keys().chain(other.keys()).chain(local.keys());
            for key in keys {
                if merged.contains_key(key) {
                    continue;
                }
                if let Some(value) = merge_values(base.get(key), other.get(key), local.get(key)) {
                    merged.insert(key.clone(), value);
                }
            }
            Some(Value::Object(merged))
        }
        (Some(Value::Array(other)), Some(Value::Array(local))) => {
            let empty = Vec::new();
            let base = match base {
                Some(Value::Array(base)) => base,
                _ => &empty,
            };
            Some(Value::Array(merge_sets(base, other, local)))
        }
        (Some(_), Some(local)) => Some(local.clone()),
    }
}

/// Merge two derivations of a set-valued field.
///
/// Result order: elements of `base` kept by both sides (in base order), then
/// elements `other` added, then elements `local` added. An element removed
/// by either side does not come back.
pub fn merge_sets(base: &[Value], other: &[Value], local: &[Value]) -> Vec<Value> {
    let mut merged: Vec<Value> = base
        .iter()
        .filter(|item| other.contains(item) && local.contains(item))
        .cloned()
        .collect();

    for item in other.iter().chain(local.iter()) {
        if !base.contains(item) && !merged.contains(item) {
            merged.push(item.clone());
        }
    }

    merged
}

/// Merge two derivations of an append-only log.
///
/// The result is `base`, then what `other` appended, then what `local`
/// appended. Entries that both sides appended appear once.
pub fn merge_logs(base: &str, other: &str, local: &str) -> String {
    let base_entries = split_entries(base);
    let other_added = appended_entries(&base_entries, other);
    let local_added: Vec<&str> = appended_entries(&base_entries, local)
        .into_iter()
        .filter(|entry| !other_added.contains(entry))
        .collect();

    base_entries
        .iter()
        .copied()
        .chain(other_added)
        .chain(local_added)
        .collect::<Vec<_>>()
        .join(LOG_SEPARATOR)
}

/// The entries of a log, in order. Blank entries are dropped.
pub fn split_entries(log: &str) -> Vec<&str> {
    log.split(LOG_SEPARATOR)
        .map(|entry| entry.trim_matches('\n'))
        .filter(|entry| !entry.trim().is_empty())
        .collect()
}

fn appended_entries<'a>(base_entries: &[&str], log: &'a str) -> Vec<&'a str> {
    let entries = split_entries(log);
    if entries.len() >= base_entries.len() && entries[..base_entries.len()] == *base_entries {
        return entries[base_entries.len()..].to_vec();
    }
    // not a pure extension of base; keep whatever base does not already hold
    entries
        .into_iter()
        .filter(|entry| !base_entries.contains(entry))
        .collect()
}
