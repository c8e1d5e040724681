//! Audit reports (`efmi_audit_report_v1`).
//!
//! Reports carry no timestamps or absolute ordering noise: auditing the same
//! inputs twice renders byte-identical output.

use anyhow::Result;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use efmi_alg::{Diagnostic, Severity};
use efmi_manifest::AuditOutcome;

pub const REPORT_VERSION: &str = "efmi_audit_report_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReportV1 {
    pub version: String,
    pub command: String,
    pub inputs: Vec<String>,
    pub summary: AuditSummaryV1,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditSummaryV1 {
    pub error_count: usize,
    pub warning_count: usize,
}

impl AuditReportV1 {
    pub fn from_outcome(command: &str, outcome: AuditOutcome) -> Self {
        Self {
            version: REPORT_VERSION.to_string(),
            command: command.to_string(),
            summary: AuditSummaryV1 {
                error_count: outcome.error_count(),
                warning_count: outcome.warning_count(),
            },
            inputs: outcome.inputs,
            diagnostics: outcome.diagnostics,
        }
    }
}

pub fn render_json(r: &AuditReportV1) -> Result<String> {
    Ok(serde_json::to_string_pretty(r)?)
}

pub fn render_text(r: &AuditReportV1) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", r.command.bold()));
    for input in &r.inputs {
        out.push_str(&format!("  input: {input}\n"));
    }
    out.push_str(&format!(
        "  summary: errors={} warnings={}\n",
        r.summary.error_count, r.summary.warning_count
    ));

    if r.diagnostics.is_empty() {
        out.push_str(&format!("  {}\n", "no findings".green()));
        return out;
    }

    let mut by_severity: BTreeMap<Severity, Vec<&Diagnostic>> = BTreeMap::new();
    for d in &r.diagnostics {
        by_severity.entry(d.severity).or_default().push(d);
    }

    for (severity, items) in by_severity {
        let heading = match severity {
            Severity::Error => severity.as_str().red().bold(),
            Severity::Warning => severity.as_str().yellow().bold(),
        };
        out.push_str(&format!("\n{heading}\n"));
        for d in items {
            let mut location = String::new();
            if let Some(source) = &d.source {
                location.push_str(source);
            }
            if let Some(line) = d.line {
                location.push_str(&format!(":{line}"));
            }
            if !location.is_empty() {
                location.push(' ');
            }
            out.push_str(&format!("  - {location}[{}] {}\n", d.code, d.message));
        }
    }

    out
}
