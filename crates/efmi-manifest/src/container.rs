//! `__content.xml` listing of an unpacked eFMU directory.

use quick_xml::events::BytesStart;
use serde::{Deserialize, Serialize};

use efmi_alg::{Diagnostic, DiagnosticCode};

use crate::xml::{attribute, required_attribute, walk_elements, ElementVisitor, ManifestError};

pub const CONTENT_FILE: &str = "__content.xml";

pub const ALGORITHM_CODE: &str = "AlgorithmCode";
pub const EQUATION_CODE: &str = "EquationCode";

/// One `ModelRepresentation` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepresentationEntry {
    pub kind: String,
    /// Directory of the representation, relative to the eFMU directory.
    pub name: String,
    /// Manifest file, relative to the representation directory.
    pub manifest: String,
    pub checksum: Option<String>,
    pub manifest_ref_id: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Content {
    pub representations: Vec<RepresentationEntry>,
}

impl Content {
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a RepresentationEntry> + 'a {
        self.representations.iter().filter(move |r| r.kind == kind)
    }

    /// The first representation of `kind`.
    pub fn first_of_kind(&self, kind: &str) -> Option<&RepresentationEntry> {
        self.representations.iter().find(|r| r.kind == kind)
    }

    /// More than one Algorithm Code representation.
    pub fn duplicate_algorithm_code(&self) -> Vec<Diagnostic> {
        self.of_kind(ALGORITHM_CODE)
            .skip(1)
            .map(|r| {
                Diagnostic::error(
                    DiagnosticCode::DuplicateRepresentation,
                    format!(
                        "The eFMU has several Algorithm Code representations ({} on line {})",
                        r.name, r.line
                    ),
                )
                .at_line(r.line)
                .in_source(CONTENT_FILE)
            })
            .collect()
    }
}

pub fn parse_content(source: &str) -> Result<Content, ManifestError> {
    let mut visitor = ContentVisitor::default();
    walk_elements(source, &mut visitor)?;
    Ok(visitor.content)
}

#[derive(Default)]
struct ContentVisitor {
    content: Content,
}

impl ElementVisitor for ContentVisitor {
    fn open(
        &mut self,
        e: &BytesStart<'_>,
        name: &str,
        _parent: Option<&str>,
        _depth: usize,
        line: usize,
    ) -> Result<(), ManifestError> {
        if name != "ModelRepresentation" {
            return Ok(());
        }
        let manifest = required_attribute(e, "manifest", line)?;
        self.content.representations.push(RepresentationEntry {
            kind: required_attribute(e, "kind", line)?,
            name: required_attribute(e, "name", line)?,
            manifest: manifest.trim_start_matches("./").to_string(),
            checksum: attribute(e, "checksum", line)?,
            manifest_ref_id: attribute(e, "manifestRefId", line)?,
            line,
        });
        Ok(())
    }

    fn close(&mut self, _name: &str, _depth: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Content fmiVersion="1.0">
  <ModelRepresentation kind="EquationCode" name="EquationCode" manifest="./manifest.xml" manifestRefId="{eq}"/>
  <ModelRepresentation kind="AlgorithmCode" name="AlgorithmCode" manifest="./manifest.xml" checksum="00ff" manifestRefId="{alg}"/>
</Content>
"#;

    #[test]
    fn representations_are_listed_in_order() {
        let content = parse_content(CONTENT).expect("parse");
        assert_eq!(content.representations.len(), 2);
        let alg = content.first_of_kind(ALGORITHM_CODE).expect("alg");
        assert_eq!(alg.manifest, "manifest.xml");
        assert_eq!(alg.manifest_ref_id.as_deref(), Some("{alg}"));
        assert_eq!(alg.checksum.as_deref(), Some("00ff"));
        assert_eq!(alg.line, 4);
        assert!(content.duplicate_algorithm_code().is_empty());
    }

    #[test]
    fn second_algorithm_code_representation_is_reported() {
        let source = r#"<Content>
  <ModelRepresentation kind="AlgorithmCode" name="A" manifest="m.xml"/>
  <ModelRepresentation kind="AlgorithmCode" name="B" manifest="m.xml"/>
</Content>"#;
        let content = parse_content(source).expect("parse");
        let diagnostics = content.duplicate_algorithm_code();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::DuplicateRepresentation);
        assert_eq!(diagnostics[0].line, Some(3));
    }

    #[test]
    fn missing_manifest_attribute_is_an_error() {
        let err = parse_content(r#"<Content><ModelRepresentation kind="AlgorithmCode" name="A"/></Content>"#)
            .expect_err("missing manifest");
        assert!(matches!(err, ManifestError::MissingAttribute { attribute: "manifest", .. }));
    }
}
