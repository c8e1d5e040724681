//! Audit configuration.
//!
//! Loaded from JSON; every field is optional in the file and falls back to
//! [`AuditConfig::default`]. Command-line flags override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use efmi_alg::{Diagnostic, DiagnosticCode, Severity};

use crate::container::{ALGORITHM_CODE, EQUATION_CODE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// What to do with a variable declared twice in one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    Ignore,
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Report rendering
    pub format: OutputFormat,
    /// Severity of duplicate declarations
    pub duplicate_declarations: DuplicatePolicy,
    /// Reconcile the Algorithm Code and Equation Code manifests
    pub cross_check: bool,
    /// Representation kind (and message label) of the Algorithm Code side
    pub algorithm_label: String,
    /// Representation kind (and message label) of the other side
    pub equation_label: String,
    /// Warnings fail the run too
    pub fail_on_warnings: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            duplicate_declarations: DuplicatePolicy::Warn,
            cross_check: true,
            algorithm_label: ALGORITHM_CODE.to_string(),
            equation_label: EQUATION_CODE.to_string(),
            fail_on_warnings: false,
        }
    }
}

impl AuditConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Re-grade (or drop) duplicate-declaration diagnostics.
    pub fn apply_duplicate_policy(&self, diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
        diagnostics
            .into_iter()
            .filter_map(|mut d| {
                if d.code != DiagnosticCode::DuplicateDeclaration {
                    return Some(d);
                }
                match self.duplicate_declarations {
                    DuplicatePolicy::Ignore => None,
                    DuplicatePolicy::Warn => {
                        d.severity = Severity::Warning;
                        Some(d)
                    }
                    DuplicatePolicy::Error => {
                        d.severity = Severity::Error;
                        Some(d)
                    }
                }
            })
            .collect()
    }

    /// Whether `diagnostics` should fail the run.
    pub fn fails(&self, diagnostics: &[Diagnostic]) -> bool {
        diagnostics
            .iter()
            .any(|d| d.is_error() || (self.fail_on_warnings && d.severity == Severity::Warning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{"duplicate_declarations": "error", "format": "json"}}"#).expect("write");
        let config = AuditConfig::load(file.path()).expect("load");
        assert_eq!(config.duplicate_declarations, DuplicatePolicy::Error);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.cross_check);
        assert_eq!(config.algorithm_label, "AlgorithmCode");
    }

    #[test]
    fn duplicate_policy_regrades_only_duplicates() {
        let diagnostics = vec![
            Diagnostic::warning(DiagnosticCode::DuplicateDeclaration, "dup"),
            Diagnostic::warning(DiagnosticCode::UnsupportedConstruct, "skipped"),
        ];
        let ignore = AuditConfig {
            duplicate_declarations: DuplicatePolicy::Ignore,
            ..AuditConfig::default()
        };
        assert_eq!(ignore.apply_duplicate_policy(diagnostics.clone()).len(), 1);

        let strict = AuditConfig {
            duplicate_declarations: DuplicatePolicy::Error,
            ..AuditConfig::default()
        };
        let graded = strict.apply_duplicate_policy(diagnostics);
        assert!(graded[0].is_error());
        assert!(!graded[1].is_error());
        assert!(strict.fails(&graded));
    }

    #[test]
    fn warnings_fail_only_when_asked() {
        let warnings = vec![Diagnostic::warning(DiagnosticCode::UnsupportedConstruct, "skipped")];
        assert!(!AuditConfig::default().fails(&warnings));
        let strict = AuditConfig {
            fail_on_warnings: true,
            ..AuditConfig::default()
        };
        assert!(strict.fails(&warnings));
    }
}
