//! Audit orchestration: files in, diagnostics out.
//!
//! Every input is read, parsed and checked independently. A failure on one
//! input (unreadable file, malformed XML, syntax error) becomes an error
//! diagnostic for that input and the remaining inputs are still audited.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use efmi_alg::{
    build_algorithm_code, check_module, BuildError, Diagnostic, DiagnosticCode, Severity, TableMode,
    VariableTable,
};

use crate::config::AuditConfig;
use crate::container::{parse_content, CONTENT_FILE};
use crate::declarations::compare_declarations;
use crate::reconcile::reconcile;
use crate::references::resolve_references;
use crate::table::variable_table;
use crate::xml::{parse_manifest, Manifest};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOutcome {
    /// Files read, in the order they were audited.
    pub inputs: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl AuditOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `other`; inputs already listed are not repeated.
    pub fn merge(&mut self, other: AuditOutcome) {
        for input in other.inputs {
            if !self.inputs.contains(&input) {
                self.inputs.push(input);
            }
        }
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn has_errors(&self) -> bool {
        efmi_alg::has_errors(&self.diagnostics)
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == severity).count()
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn io_diagnostic(path: &Path, err: anyhow::Error) -> Diagnostic {
    Diagnostic::error(DiagnosticCode::Io, format!("{err:#}")).in_source(path.display().to_string())
}

// ============================================================================
// Algorithm Code
// ============================================================================

/// Build and check one Algorithm Code source against the element table of
/// its manifest.
pub fn check_algorithm_code_source(
    source: &str,
    source_name: &str,
    manifest_table: &VariableTable,
    config: &AuditConfig,
) -> Vec<Diagnostic> {
    let module = match build_algorithm_code(source) {
        Ok(module) => module,
        Err(BuildError::Parse(err)) => {
            warn!(file = source_name, line = err.line, "syntax error; file skipped");
            return vec![Diagnostic::error(DiagnosticCode::SyntaxError, err.to_string())
                .at_line(err.line)
                .in_source(source_name)];
        }
        Err(err) => {
            warn!(file = source_name, line = err.line(), error = %err, "build failed; file skipped");
            return vec![Diagnostic::error(DiagnosticCode::InternalError, err.to_string())
                .at_line(err.line())
                .in_source(source_name)];
        }
    };

    info!(
        file = source_name,
        block = %module.name,
        functions = module.functions.len(),
        "checking algorithm code"
    );
    let mut diagnostics = module.issues.clone();
    diagnostics.extend(compare_declarations(manifest_table, &module));
    diagnostics.extend(check_module(&module, manifest_table));
    config
        .apply_duplicate_policy(diagnostics)
        .into_iter()
        .map(|d| d.in_source(source_name))
        .collect()
}

// ============================================================================
// Manifests
// ============================================================================

/// Read and parse one manifest; failures come back as a single diagnostic.
pub fn load_manifest(path: &Path) -> std::result::Result<Manifest, Diagnostic> {
    let source = read_source(path).map_err(|err| io_diagnostic(path, err))?;
    parse_manifest(&source).map_err(|err| {
        warn!(manifest = %path.display(), error = %err, "manifest skipped");
        Diagnostic::error(DiagnosticCode::InvalidManifest, err.to_string())
            .at_line(err.line())
            .in_source(path.display().to_string())
    })
}

/// Check the Algorithm Code files of an already loaded manifest.
///
/// With no `alg_files` the `.alg` files listed in the manifest are used,
/// resolved against the manifest's directory.
pub fn check_representation(
    manifest_path: &Path,
    manifest: &Manifest,
    alg_files: &[PathBuf],
    config: &AuditConfig,
) -> AuditOutcome {
    let mut outcome = AuditOutcome::new();
    let table = variable_table(manifest, TableMode::Element);
    info!(
        manifest = %manifest_path.display(),
        variables = manifest.variables.len(),
        keys = table.len(),
        "manifest table built"
    );

    let files: Vec<PathBuf> = if alg_files.is_empty() {
        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        manifest
            .algorithm_code_files()
            .map(|f| base.join(&f.name))
            .collect()
    } else {
        alg_files.to_vec()
    };

    if files.is_empty() {
        outcome.diagnostics.push(
            Diagnostic::error(
                DiagnosticCode::MissingFile,
                "The manifest lists no Algorithm Code file (.alg with role Code)",
            )
            .in_source(manifest_path.display().to_string()),
        );
        return outcome;
    }

    for file in &files {
        let name = file.display().to_string();
        if !file.exists() {
            warn!(file = %name, "algorithm code file not found");
            outcome.diagnostics.push(
                Diagnostic::error(
                    DiagnosticCode::MissingFile,
                    format!("The Algorithm Code file {name} does not exist"),
                )
                .in_source(manifest_path.display().to_string()),
            );
            continue;
        }
        match read_source(file) {
            Ok(source) => {
                outcome.inputs.push(name.clone());
                outcome
                    .diagnostics
                    .extend(check_algorithm_code_source(&source, &name, &table, config));
            }
            Err(err) => outcome.diagnostics.push(io_diagnostic(file, err)),
        }
    }
    outcome
}

/// Manifest plus its Algorithm Code files.
pub fn audit_representation(manifest_path: &Path, alg_files: &[PathBuf], config: &AuditConfig) -> AuditOutcome {
    let mut outcome = AuditOutcome::new();
    outcome.inputs.push(manifest_path.display().to_string());
    match load_manifest(manifest_path) {
        Ok(manifest) => outcome.merge(check_representation(manifest_path, &manifest, alg_files, config)),
        Err(diagnostic) => outcome.diagnostics.push(diagnostic),
    }
    outcome
}

fn reconcile_loaded(first: &Manifest, second: &Manifest, config: &AuditConfig) -> Vec<Diagnostic> {
    let first_table = variable_table(first, TableMode::Aggregate);
    let second_table = variable_table(second, TableMode::Aggregate);
    info!(
        first = first_table.len(),
        second = second_table.len(),
        "reconciling interface variables"
    );
    reconcile(
        &first_table,
        &config.algorithm_label,
        &second_table,
        &config.equation_label,
    )
    .into_diagnostics(&format!("{}/{}", config.algorithm_label, config.equation_label))
}

/// Interface variables of two manifests, both directions.
pub fn reconcile_manifests(first: &Path, second: &Path, config: &AuditConfig) -> AuditOutcome {
    let mut outcome = AuditOutcome::new();
    outcome.inputs.push(first.display().to_string());
    outcome.inputs.push(second.display().to_string());
    match (load_manifest(first), load_manifest(second)) {
        (Ok(a), Ok(b)) => outcome.diagnostics.extend(reconcile_loaded(&a, &b, config)),
        (a, b) => {
            outcome.diagnostics.extend(a.err());
            outcome.diagnostics.extend(b.err());
        }
    }
    outcome
}

// ============================================================================
// eFMU directory
// ============================================================================

/// Audit an unpacked eFMU directory through its `__content.xml`.
pub fn audit_container(dir: &Path, config: &AuditConfig) -> AuditOutcome {
    let mut outcome = AuditOutcome::new();
    let content_path = dir.join(CONTENT_FILE);
    outcome.inputs.push(content_path.display().to_string());

    let content = match read_source(&content_path) {
        Ok(source) => match parse_content(&source) {
            Ok(content) => content,
            Err(err) => {
                outcome.diagnostics.push(
                    Diagnostic::error(DiagnosticCode::InvalidManifest, err.to_string())
                        .at_line(err.line())
                        .in_source(CONTENT_FILE),
                );
                return outcome;
            }
        },
        Err(err) => {
            outcome.diagnostics.push(io_diagnostic(&content_path, err));
            return outcome;
        }
    };
    info!(representations = content.representations.len(), "container listing read");
    outcome.diagnostics.extend(content.duplicate_algorithm_code());

    let mut loaded: Vec<(String, PathBuf, Manifest)> = Vec::new();
    for entry in &content.representations {
        let manifest_path = dir.join(&entry.name).join(&entry.manifest);
        outcome.inputs.push(manifest_path.display().to_string());
        let manifest = match load_manifest(&manifest_path) {
            Ok(manifest) => manifest,
            Err(diagnostic) => {
                warn!(kind = %entry.kind, manifest = %manifest_path.display(), "representation skipped");
                outcome.diagnostics.push(diagnostic);
                continue;
            }
        };
        if let Some(expected) = &entry.manifest_ref_id {
            if manifest.id.as_deref() != Some(expected.as_str()) {
                outcome.diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::ManifestIdMismatch,
                        format!(
                            "The manifestRefId ({expected}) of the {} representation does not match the id ({}) of its manifest",
                            entry.kind,
                            manifest.id.as_deref().unwrap_or("none")
                        ),
                    )
                    .at_line(entry.line)
                    .in_source(CONTENT_FILE),
                );
            }
        }
        loaded.push((entry.kind.clone(), manifest_path, manifest));
    }

    let algorithm = loaded.iter().find(|(kind, _, _)| *kind == config.algorithm_label);
    let equation = loaded.iter().find(|(kind, _, _)| *kind == config.equation_label);

    match algorithm {
        Some((_, path, manifest)) => outcome.merge(check_representation(path, manifest, &[], config)),
        None if content.first_of_kind(&config.algorithm_label).is_none() => {
            outcome.diagnostics.push(
                Diagnostic::error(
                    DiagnosticCode::MissingFile,
                    format!("{CONTENT_FILE} lists no {} representation", config.algorithm_label),
                )
                .in_source(CONTENT_FILE),
            );
        }
        // Listed but unreadable; already reported.
        None => {}
    }

    if config.cross_check {
        if let (Some((_, _, alg)), Some((_, _, eq))) = (algorithm, equation) {
            outcome.diagnostics.extend(reconcile_loaded(alg, eq, config));
        }
    }

    let labelled: Vec<(&str, &Manifest)> = loaded
        .iter()
        .map(|(kind, _, manifest)| (kind.as_str(), manifest))
        .collect();
    outcome.diagnostics.extend(resolve_references(&labelled));

    info!(
        errors = outcome.error_count(),
        warnings = outcome.warning_count(),
        "container audited"
    );
    outcome
}
