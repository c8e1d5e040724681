//! Diagnostics shared by every checking stage.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCode {
    // Inputs
    Io,
    InvalidManifest,
    MissingFile,
    SyntaxError,
    InternalError,
    // Algorithm Code building
    UnsupportedConstruct,
    DuplicateDeclaration,
    MismatchedEndName,
    // Algorithm Code semantics
    UndeclaredVariable,
    TypeMismatch,
    IllogicalCondition,
    UndeclaredSignal,
    // Manifest vs. Algorithm Code
    MissingDeclaration,
    UnlistedVariable,
    CausalityMismatch,
    // Manifest vs. manifest
    MissingInRepresentation,
    CrossTypeMismatch,
    CrossDimensionMismatch,
    UnresolvedManifestReference,
    ManifestIdMismatch,
    DuplicateRepresentation,
}

impl DiagnosticCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCode::Io => "io",
            DiagnosticCode::InvalidManifest => "invalid-manifest",
            DiagnosticCode::MissingFile => "missing-file",
            DiagnosticCode::SyntaxError => "syntax-error",
            DiagnosticCode::InternalError => "internal-error",
            DiagnosticCode::UnsupportedConstruct => "unsupported-construct",
            DiagnosticCode::DuplicateDeclaration => "duplicate-declaration",
            DiagnosticCode::MismatchedEndName => "mismatched-end-name",
            DiagnosticCode::UndeclaredVariable => "undeclared-variable",
            DiagnosticCode::TypeMismatch => "type-mismatch",
            DiagnosticCode::IllogicalCondition => "illogical-condition",
            DiagnosticCode::UndeclaredSignal => "undeclared-signal",
            DiagnosticCode::MissingDeclaration => "missing-declaration",
            DiagnosticCode::UnlistedVariable => "unlisted-variable",
            DiagnosticCode::CausalityMismatch => "causality-mismatch",
            DiagnosticCode::MissingInRepresentation => "missing-in-representation",
            DiagnosticCode::CrossTypeMismatch => "cross-type-mismatch",
            DiagnosticCode::CrossDimensionMismatch => "cross-dimension-mismatch",
            DiagnosticCode::UnresolvedManifestReference => "unresolved-manifest-reference",
            DiagnosticCode::ManifestIdMismatch => "manifest-id-mismatch",
            DiagnosticCode::DuplicateRepresentation => "duplicate-representation",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A violated contract. Messages name the offending variable or expression and
/// its line; they never suggest a fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// File (or representation) the diagnostic belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            line: None,
            source: None,
        }
    }

    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn in_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{source}: ")?;
        }
        write!(f, "{} [{}]: {}", self.severity.as_str(), self.code, self.message)
    }
}

/// True when any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_count_as_errors() {
        let diagnostics = vec![
            Diagnostic::warning(DiagnosticCode::DuplicateDeclaration, "dup").at_line(3),
        ];
        assert!(!has_errors(&diagnostics));
        let diagnostics = vec![Diagnostic::error(DiagnosticCode::TypeMismatch, "bad")];
        assert!(has_errors(&diagnostics));
    }

    #[test]
    fn display_includes_source_and_code() {
        let d = Diagnostic::error(DiagnosticCode::TypeMismatch, "x is Real")
            .at_line(4)
            .in_source("Controller.alg");
        assert_eq!(d.to_string(), "Controller.alg: error [type-mismatch]: x is Real");
    }
}
