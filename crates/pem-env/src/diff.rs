//! # Environment Diff
//!
//! Pure comparison of two module maps. Names present in only one map, or
//! in both with different versions, go to `diffs`; names with equal
//! versions go to `shared`.
//!
//! Serialized as
//!
//! ```json
//! {"diffs": {"ntp": {"e1": "1.0.0", "e2": "1.0.1"}, "dns": {"e1": false, "e2": "2.0.0"}},
//!  "shared": {}}
//! ```
//!
//! where `false` marks a module absent from that environment.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::index::ModuleMap;

/// Versions of one differing module on each side; `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    /// Version in the first environment.
    pub left: Option<String>,
    /// Version in the second environment.
    pub right: Option<String>,
}

/// Result of comparing two environments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvDiff {
    /// Name of the first environment.
    pub left: String,
    /// Name of the second environment.
    pub right: String,
    /// Modules that differ.
    pub diffs: BTreeMap<String, DiffEntry>,
    /// Modules with the same version on both sides.
    pub shared: ModuleMap,
}

impl EnvDiff {
    /// Whether the two environments hold the same modules at the same
    /// versions.
    pub fn is_identical(&self) -> bool {
        self.diffs.is_empty()
    }
}

/// Compare two module maps.
pub fn compare(left_name: &str, left: &ModuleMap, right_name: &str, right: &ModuleMap) -> EnvDiff {
    let left_keys: BTreeSet<&String> = left.keys().collect();
    let right_keys: BTreeSet<&String> = right.keys().collect();

    let mut diffs = BTreeMap::new();
    let mut shared = ModuleMap::new();

    for name in left_keys.symmetric_difference(&right_keys) {
        diffs.insert(
            (*name).clone(),
            DiffEntry {
                left: left.get(*name).cloned(),
                right: right.get(*name).cloned(),
            },
        );
    }
    for name in left_keys.intersection(&right_keys) {
        let (l, r) = (&left[*name], &right[*name]);
        if l == r {
            shared.insert((*name).clone(), l.clone());
        } else {
            diffs.insert(
                (*name).clone(),
                DiffEntry {
                    left: Some(l.clone()),
                    right: Some(r.clone()),
                },
            );
        }
    }

    EnvDiff {
        left: left_name.to_string(),
        right: right_name.to_string(),
        diffs,
        shared,
    }
}

struct Side<'a>(&'a Option<String>);

impl Serialize for Side<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) => s.serialize_str(v),
            None => s.serialize_bool(false),
        }
    }
}

struct Sides<'a> {
    left_name: &'a str,
    right_name: &'a str,
    entry: &'a DiffEntry,
}

impl Serialize for Sides<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(2))?;
        map.serialize_entry(self.left_name, &Side(&self.entry.left))?;
        map.serialize_entry(self.right_name, &Side(&self.entry.right))?;
        map.end()
    }
}

struct DiffMap<'a>(&'a EnvDiff);

impl Serialize for DiffMap<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.0.diffs.len()))?;
        for (name, entry) in &self.0.diffs {
            map.serialize_entry(
                name,
                &Sides {
                    left_name: &self.0.left,
                    right_name: &self.0.right,
                    entry,
                },
            )?;
        }
        map.end()
    }
}

impl Serialize for EnvDiff {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(2))?;
        map.serialize_entry("diffs", &DiffMap(self))?;
        map.serialize_entry("shared", &self.shared)?;
        map.end()
    }
}
