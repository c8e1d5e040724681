//! Manifest variables against Algorithm Code declarations.
//!
//! Presence is checked both ways (every manifest key declared in the block or
//! its protected section; every block-level entity listed in the manifest),
//! then type and causality for the variables present on both sides. All
//! three passes always run.

use efmi_alg::{AlgorithmCodeModule, Diagnostic, DiagnosticCode, VariableTable};

pub fn compare_declarations(manifest: &VariableTable, module: &AlgorithmCodeModule) -> Vec<Diagnostic> {
    let mut declared = module.block_variables.clone();
    declared.extend_from(&module.protected_variables);
    let mut out = Vec::new();

    for (name, entry) in manifest.iter() {
        if !declared.contains(name) {
            out.push(
                Diagnostic::error(
                    DiagnosticCode::MissingDeclaration,
                    format!(
                        "There is no declaration for the {name} model variable in the Algorithm Code, although it exists under the ModelVariables in the manifest file (line {})",
                        entry.line
                    ),
                )
                .at_line(entry.line),
            );
        }
    }

    for (name, entry) in module.block_variables.iter() {
        if !manifest.contains(name) {
            out.push(
                Diagnostic::error(
                    DiagnosticCode::UnlistedVariable,
                    format!(
                        "The variable {name} is declared in the Algorithm Code (line {}) but it does not exist under the ModelVariables in the manifest file",
                        entry.line
                    ),
                )
                .at_line(entry.line),
            );
        }
    }

    for (name, listed) in manifest.declared() {
        let Some(code) = declared.get(name) else {
            continue;
        };
        if listed.ty != code.ty {
            out.push(
                Diagnostic::error(
                    DiagnosticCode::TypeMismatch,
                    format!(
                        "The {name} variable in the manifest is of type {} and the same variable is of type {} in the algorithm code (line {}): variable types must match",
                        listed.ty, code.ty, code.line
                    ),
                )
                .at_line(code.line),
            );
        }
        if !listed.causality.accepts_declared(&code.causality) {
            out.push(
                Diagnostic::error(
                    DiagnosticCode::CausalityMismatch,
                    format!(
                        "The blockCausality of the {name} variable is {} and the causality of the same variable in the algorithm code is {}: causalities must match (line {} in the Algorithm code)",
                        listed.causality, code.causality, code.line
                    ),
                )
                .at_line(code.line),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use efmi_alg::ast::Causality;
    use efmi_alg::{build_algorithm_code, PrimitiveType, TableMode, VariableEntry};

    fn manifest(vars: &[(&str, PrimitiveType, Causality)]) -> VariableTable {
        let mut table = VariableTable::new();
        for (name, ty, causality) in vars {
            table.declare(name, VariableEntry::new(*ty, causality.clone(), 1), TableMode::Element);
        }
        table
    }

    fn module(block_entities: &str) -> AlgorithmCodeModule {
        let source = format!("block B\n{block_entities}\nprotected\n  Real s;\npublic\nend B;");
        build_algorithm_code(&source).expect("build")
    }

    fn codes(manifest: &VariableTable, module: &AlgorithmCodeModule) -> Vec<DiagnosticCode> {
        compare_declarations(manifest, module).into_iter().map(|d| d.code).collect()
    }

    #[test]
    fn tunable_parameter_needs_parameter() {
        let listed = manifest(&[
            ("k", PrimitiveType::Real, Causality::TunableParameter),
            ("s", PrimitiveType::Real, Causality::State),
        ]);
        assert!(codes(&listed, &module("  parameter Real k;")).is_empty());
        assert_eq!(
            codes(&listed, &module("  input Real k;")),
            vec![DiagnosticCode::CausalityMismatch]
        );
    }

    #[test]
    fn presence_is_checked_both_ways() {
        let listed = manifest(&[
            ("u", PrimitiveType::Real, Causality::Input),
            ("s", PrimitiveType::Real, Causality::State),
        ]);
        let diagnostics = compare_declarations(&listed, &module("  output Real y;"));
        let codes: Vec<DiagnosticCode> = diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![DiagnosticCode::MissingDeclaration, DiagnosticCode::UnlistedVariable]
        );
        assert!(diagnostics[0].message.contains("u model variable"));
        assert!(diagnostics[1].message.contains("variable y"));
    }

    #[test]
    fn types_are_compared_after_presence_failures() {
        let listed = manifest(&[
            ("u", PrimitiveType::Integer, Causality::Input),
            ("s", PrimitiveType::Real, Causality::State),
            ("gone", PrimitiveType::Real, Causality::Output),
        ]);
        assert_eq!(
            codes(&listed, &module("  input Real u;")),
            vec![DiagnosticCode::MissingDeclaration, DiagnosticCode::TypeMismatch]
        );
    }
}
