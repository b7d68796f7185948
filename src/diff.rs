//! Attribute-level diffing between a desired entity state and a loaded
//! directory entry. The functions are pure: they never mutate their inputs
//! and only return a plan the caller applies, so re-running a diff after
//! applying its own output yields an empty plan.

use crate::ldap::DirectoryEntry;
use ldap3::Mod;
use std::collections::HashSet;

/// One attribute modification. `Remove` with empty `values` drops the whole
/// attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrChange {
    Add { attr: String, values: Vec<String> },
    Replace { attr: String, values: Vec<String> },
    Remove { attr: String, values: Vec<String> },
}

impl AttrChange {
    pub fn add(attr: &str, value: impl Into<String>) -> Self {
        AttrChange::Add {
            attr: attr.to_string(),
            values: vec![value.into()],
        }
    }

    pub fn remove(attr: &str, value: impl Into<String>) -> Self {
        AttrChange::Remove {
            attr: attr.to_string(),
            values: vec![value.into()],
        }
    }

    pub fn into_mod(self) -> Mod<String> {
        fn set(values: Vec<String>) -> HashSet<String> {
            values.into_iter().collect()
        }
        match self {
            AttrChange::Add { attr, values } => Mod::Add(attr, set(values)),
            AttrChange::Replace { attr, values } => Mod::Replace(attr, set(values)),
            AttrChange::Remove { attr, values } => Mod::Delete(attr, set(values)),
        }
    }
}

/// Diff a single-valued attribute. An empty desired value counts as absent.
pub fn diff_scalar(entry: &DirectoryEntry, attr: &str, desired: Option<&str>) -> Option<AttrChange> {
    let current = entry.first(attr);
    let desired = desired.filter(|v| !v.is_empty());

    match (current, desired) {
        (None, None) => None,
        (None, Some(value)) => Some(AttrChange::Add {
            attr: attr.to_string(),
            values: vec![value.to_string()],
        }),
        (Some(_), None) => Some(AttrChange::Remove {
            attr: attr.to_string(),
            values: Vec::new(),
        }),
        (Some(current), Some(value)) if current == value => None,
        (Some(_), Some(value)) => Some(AttrChange::Replace {
            attr: attr.to_string(),
            values: vec![value.to_string()],
        }),
    }
}

/// Diff a multi-valued string attribute as a set. Emits one `Remove` per
/// value only in the current set and one `Add` per value only in the desired
/// set; values present in both are never re-written, because value lists
/// (group members in particular) can be large.
pub fn diff_set(entry: &DirectoryEntry, attr: &str, desired: &[String]) -> Vec<AttrChange> {
    let current: HashSet<&str> = entry.values(attr).iter().map(String::as_str).collect();
    let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();

    let mut removed: Vec<&str> = current.difference(&wanted).copied().collect();
    let mut added: Vec<&str> = wanted.difference(&current).copied().collect();
    removed.sort_unstable();
    added.sort_unstable();

    removed
        .into_iter()
        .map(|v| AttrChange::remove(attr, v))
        .chain(added.into_iter().map(|v| AttrChange::add(attr, v)))
        .collect()
}
