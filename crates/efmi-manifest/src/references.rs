//! Manifest reference resolution.

use efmi_alg::{Diagnostic, DiagnosticCode};

use crate::xml::Manifest;

/// Every `ManifestReference` must point at the `id` of another audited
/// manifest. `manifests` pairs a representation label with its manifest.
pub fn resolve_references(manifests: &[(&str, &Manifest)]) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for (index, (label, manifest)) in manifests.iter().enumerate() {
        for reference in &manifest.references {
            let resolved = manifests.iter().enumerate().any(|(other, (_, candidate))| {
                other != index && candidate.id.as_deref() == Some(reference.manifest_ref_id.as_str())
            });
            if !resolved {
                out.push(
                    Diagnostic::error(
                        DiagnosticCode::UnresolvedManifestReference,
                        format!(
                            "The manifestRefId of the ManifestReference (id = {}) in the {label} representation does not match any of the existing representation manifests",
                            reference.id
                        ),
                    )
                    .at_line(reference.line)
                    .in_source(*label),
                );
            }
        }
    }
    out
}
