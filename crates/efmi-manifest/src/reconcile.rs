//! Cross-representation variable reconciliation.
//!
//! Two aggregate tables are compared in both directions. Findings are keyed
//! by `(variable, kind)`: the first finding for a key is kept, later ones for
//! the same key are dropped, and the output follows insertion order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use efmi_alg::{Diagnostic, DiagnosticCode, VariableTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    Missing,
    Type,
    Dimension,
}

impl MismatchKind {
    fn code(self) -> DiagnosticCode {
        match self {
            MismatchKind::Missing => DiagnosticCode::MissingInRepresentation,
            MismatchKind::Type => DiagnosticCode::CrossTypeMismatch,
            MismatchKind::Dimension => DiagnosticCode::CrossDimensionMismatch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub variable: String,
    pub kind: MismatchKind,
    pub message: String,
    pub line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    seen: BTreeSet<(String, MismatchKind)>,
    mismatches: Vec<Mismatch>,
}

impl Reconciliation {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, variable: &str, kind: MismatchKind, message: String, line: usize) {
        if self.seen.insert((variable.to_string(), kind)) {
            self.mismatches.push(Mismatch {
                variable: variable.to_string(),
                kind,
                message,
                line,
            });
        }
    }

    /// One direction: every variable of `first` against `second`.
    pub fn compare(&mut self, first: &VariableTable, first_label: &str, second: &VariableTable, second_label: &str) {
        for (name, entry) in first.iter() {
            let Some(other) = second.get(name) else {
                self.add(
                    name,
                    MismatchKind::Missing,
                    format!(
                        "The {name} variable from the {first_label} manifest (line {}) is not listed in the {second_label} manifest",
                        entry.line
                    ),
                    entry.line,
                );
                continue;
            };
            if entry.ty != other.ty {
                self.add(
                    name,
                    MismatchKind::Type,
                    format!(
                        "The type of the {name} variable from the {first_label} manifest (line {}) does not match the type of the same variable in the {second_label} manifest",
                        entry.line
                    ),
                    entry.line,
                );
            }
            if entry.dimensions != other.dimensions {
                self.add(
                    name,
                    MismatchKind::Dimension,
                    format!(
                        "The Dimensions of the {name} variable from the {first_label} manifest (line {}) do not match the dimensions of the same variable in the {second_label} manifest",
                        entry.line
                    ),
                    entry.line,
                );
            }
        }
    }

    pub fn mismatches(&self) -> &[Mismatch] {
        &self.mismatches
    }

    pub fn into_diagnostics(self, source: &str) -> Vec<Diagnostic> {
        self.mismatches
            .into_iter()
            .map(|m| {
                Diagnostic::error(m.kind.code(), m.message)
                    .at_line(m.line)
                    .in_source(source)
            })
            .collect()
    }
}

/// Both directions, `first` → `second` then `second` → `first`.
pub fn reconcile(first: &VariableTable, first_label: &str, second: &VariableTable, second_label: &str) -> Reconciliation {
    let mut reconciliation = Reconciliation::new();
    reconciliation.compare(first, first_label, second, second_label);
    reconciliation.compare(second, second_label, first, first_label);
    reconciliation
}
