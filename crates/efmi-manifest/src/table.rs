//! Manifest variables → declared-variable tables.
//!
//! Element tables hold every variable with arrays expanded per element and
//! feed the Algorithm Code checks. Aggregate tables hold only interface
//! variables (`input`, `output`, or no causality) with their dimension sizes
//! and feed the cross-representation reconciliation.

use tracing::debug;

use efmi_alg::{TableMode, VariableEntry, VariableTable};

use crate::xml::Manifest;

pub fn variable_table(manifest: &Manifest, mode: TableMode) -> VariableTable {
    let mut table = VariableTable::new();
    for variable in &manifest.variables {
        if mode == TableMode::Aggregate && !variable.causality.is_interface() {
            continue;
        }
        let entry = VariableEntry::new(variable.ty, variable.causality.clone(), variable.line)
            .with_dimensions(variable.dimensions.clone());
        if let Some(previous) = table.declare(&variable.name, entry, mode) {
            debug!(
                variable = %variable.name,
                line = variable.line,
                previous_line = previous.line,
                "manifest lists a variable twice; keeping the later entry"
            );
        }
    }
    table
}
