//! Declared-variable tables.
//!
//! One table per representation (Algorithm Code scope, each manifest). Keys
//! are unique strings; a later insertion for the same key replaces the earlier
//! one and the replaced entry is handed back so callers can report it.
//!
//! Element mode expands arrays of rank 1..=3 into per-element keys next to
//! the aggregate key:
//! - `x[3]`      → `x`, `x[1]`, `x[2]`, `x[3]`
//! - `m[2,3]`    → `m`, `m[1,1]` … `m[2,3]`
//! - `t[2,2,2]`  → `t`, `t[1,1,1]` … `t[2,2,2]`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ast::{Causality, Name, PrimitiveType, ValueRange};

/// Arrays of higher rank are kept as aggregates only.
pub const MAX_EXPANDED_RANK: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableEntry {
    pub ty: PrimitiveType,
    pub causality: Causality,
    /// Declaration line in the source the table was built from.
    pub line: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<usize>,
    /// 1-based position when this entry is an expanded array element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_index: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,
}

impl VariableEntry {
    pub fn new(ty: PrimitiveType, causality: Causality, line: usize) -> Self {
        Self {
            ty,
            causality,
            line,
            dimensions: Vec::new(),
            element_index: None,
            range: None,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Vec<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_range(mut self, range: Option<ValueRange>) -> Self {
        self.range = range;
        self
    }

    pub fn is_element(&self) -> bool {
        self.element_index.is_some()
    }
}

/// How array variables are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMode {
    /// Aggregate key plus one key per element (declaration comparison).
    Element,
    /// Aggregate key only, carrying the dimension sizes (cross-manifest
    /// comparison).
    Aggregate,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableTable {
    entries: BTreeMap<Name, VariableEntry>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one key; returns the entry it replaced.
    pub fn insert(&mut self, name: impl Into<Name>, entry: VariableEntry) -> Option<VariableEntry> {
        self.entries.insert(name.into(), entry)
    }

    /// Declare a variable, expanding it per `mode`.
    ///
    /// Returns the previous aggregate entry when `name` was already declared.
    pub fn declare(&mut self, name: &str, entry: VariableEntry, mode: TableMode) -> Option<VariableEntry> {
        if mode == TableMode::Element {
            for (key, index) in element_keys(name, &entry.dimensions) {
                let mut element = entry.clone();
                element.dimensions = Vec::new();
                element.element_index = Some(index);
                self.entries.insert(key, element);
            }
        }
        self.entries.insert(name.to_string(), entry)
    }

    pub fn get(&self, name: &str) -> Option<&VariableEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &VariableEntry)> {
        self.entries.iter()
    }

    /// Scalar and aggregate entries only (no expanded elements).
    pub fn declared(&self) -> impl Iterator<Item = (&Name, &VariableEntry)> {
        self.entries.iter().filter(|(_, e)| !e.is_element())
    }

    /// Copy every entry of `other` into `self` (last write wins).
    pub fn extend_from(&mut self, other: &VariableTable) {
        for (name, entry) in other.iter() {
            self.entries.insert(name.clone(), entry.clone());
        }
    }
}

/// Whether an array of these sizes gets per-element keys.
pub fn is_expanded(dimensions: &[usize]) -> bool {
    !dimensions.is_empty() && dimensions.len() <= MAX_EXPANDED_RANK && !dimensions.contains(&0)
}

/// Per-element keys for an array of the given sizes, row-major, 1-based.
///
/// Empty for scalars, for zero-sized dimensions and for ranks above
/// [`MAX_EXPANDED_RANK`].
pub fn element_keys(name: &str, dimensions: &[usize]) -> Vec<(Name, Vec<usize>)> {
    if !is_expanded(dimensions) {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut index = vec![1usize; dimensions.len()];
    loop {
        let joined = index
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        out.push((format!("{name}[{joined}]"), index.clone()));

        // Odometer increment, last dimension fastest.
        let mut axis = dimensions.len();
        loop {
            if axis == 0 {
                return out;
            }
            axis -= 1;
            if index[axis] < dimensions[axis] {
                index[axis] += 1;
                break;
            }
            index[axis] = 1;
        }
    }
}
