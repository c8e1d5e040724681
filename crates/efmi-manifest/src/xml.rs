//! Manifest XML reading (quick-xml).
//!
//! Only what the checks consume is read:
//! - the root `id`
//! - `Files/File@name,@role`
//! - `ManifestReferences/ManifestReference@id,@manifestRefId,@checksum`
//! - the first `Variables` element directly under the root, with typed
//!   (`RealVariable`, `IntegerVariable`, `BooleanVariable`) or generic
//!   (`Variable@type`) entries and their `Dimensions/Dimension@size`
//!
//! Schema validation is not performed.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use efmi_alg::ast::{Causality, PrimitiveType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("malformed XML near line {line}: {message}")]
    Xml { line: usize, message: String },

    #[error("<{element}> on line {line} has no `{attribute}` attribute")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
        line: usize,
    },

    #[error("invalid dimension size `{value}` on line {line}")]
    InvalidDimension { value: String, line: usize },

    #[error("unknown variable type `{value}` on line {line}")]
    UnknownType { value: String, line: usize },
}

impl ManifestError {
    pub fn line(&self) -> usize {
        match self {
            ManifestError::Xml { line, .. }
            | ManifestError::MissingAttribute { line, .. }
            | ManifestError::InvalidDimension { line, .. }
            | ManifestError::UnknownType { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestVariable {
    pub name: String,
    pub ty: PrimitiveType,
    pub causality: Causality,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<usize>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub role: Option<String>,
    pub line: usize,
}

impl ManifestFile {
    /// `.alg` sources with role `Code`.
    pub fn is_algorithm_code(&self) -> bool {
        self.name.ends_with(".alg") && self.role.as_deref() == Some("Code")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestReference {
    pub id: String,
    pub manifest_ref_id: String,
    pub checksum: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub id: Option<String>,
    pub variables: Vec<ManifestVariable>,
    pub files: Vec<ManifestFile>,
    pub references: Vec<ManifestReference>,
}

impl Manifest {
    pub fn algorithm_code_files(&self) -> impl Iterator<Item = &ManifestFile> {
        self.files.iter().filter(|f| f.is_algorithm_code())
    }
}

// ============================================================================
// Shared reader helpers
// ============================================================================

/// Byte offset → 1-based line.
pub(crate) struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            newlines: text.match_indices('\n').map(|(i, _)| i).collect(),
        }
    }

    pub(crate) fn line(&self, offset: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < offset) + 1
    }
}

pub(crate) fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

pub(crate) fn attribute(
    e: &BytesStart<'_>,
    key: &str,
    line: usize,
) -> Result<Option<String>, ManifestError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ManifestError::Xml {
            line,
            message: err.to_string(),
        })?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr.unescape_value().map_err(|err| ManifestError::Xml {
                line,
                message: err.to_string(),
            })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

pub(crate) fn required_attribute(
    e: &BytesStart<'_>,
    key: &'static str,
    line: usize,
) -> Result<String, ManifestError> {
    attribute(e, key, line)?.ok_or_else(|| ManifestError::MissingAttribute {
        element: element_name(e),
        attribute: key,
        line,
    })
}

pub(crate) trait ElementVisitor {
    /// A start or empty tag at `depth` (root is 0).
    fn open(
        &mut self,
        e: &BytesStart<'_>,
        name: &str,
        parent: Option<&str>,
        depth: usize,
        line: usize,
    ) -> Result<(), ManifestError>;

    fn close(&mut self, name: &str, depth: usize);
}

/// Drive `visitor` over every element of `source`.
pub(crate) fn walk_elements<V: ElementVisitor>(source: &str, visitor: &mut V) -> Result<(), ManifestError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let lines = LineIndex::new(source);
    let mut reader = Reader::from_str(source);
    reader.trim_text(true);
    let mut stack: Vec<String> = Vec::new();

    loop {
        // Trimmed whitespace is consumed with the next event, so skip it here.
        let start = reader.buffer_position();
        let skipped = source
            .get(start..)
            .map_or(0, |rest| rest.len() - rest.trim_start().len());
        let line = lines.line(start + skipped);
        let event = reader.read_event().map_err(|err| ManifestError::Xml {
            line: lines.line(reader.buffer_position()),
            message: err.to_string(),
        })?;
        match event {
            Event::Start(e) => {
                let name = element_name(&e);
                visitor.open(&e, &name, stack.last().map(String::as_str), stack.len(), line)?;
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = element_name(&e);
                visitor.open(&e, &name, stack.last().map(String::as_str), stack.len(), line)?;
                visitor.close(&name, stack.len());
            }
            Event::End(_) => {
                if let Some(name) = stack.pop() {
                    visitor.close(&name, stack.len());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.is_empty() {
        Ok(())
    } else {
        Err(ManifestError::Xml {
            line: lines.line(source.len()),
            message: format!("unclosed element <{}>", stack.join("/")),
        })
    }
}

// ============================================================================
// Manifest
// ============================================================================

pub fn parse_manifest(source: &str) -> Result<Manifest, ManifestError> {
    let mut visitor = ManifestVisitor::default();
    walk_elements(source, &mut visitor)?;
    Ok(visitor.manifest)
}

#[derive(Default)]
struct ManifestVisitor {
    manifest: Manifest,
    variables_read: bool,
    in_variables: bool,
    current: Option<ManifestVariable>,
}

fn variable_type(tag: &str) -> Option<PrimitiveType> {
    match tag {
        "RealVariable" => Some(PrimitiveType::Real),
        "IntegerVariable" => Some(PrimitiveType::Integer),
        "BooleanVariable" => Some(PrimitiveType::Boolean),
        _ => None,
    }
}

impl ElementVisitor for ManifestVisitor {
    fn open(
        &mut self,
        e: &BytesStart<'_>,
        name: &str,
        parent: Option<&str>,
        depth: usize,
        line: usize,
    ) -> Result<(), ManifestError> {
        match (depth, name, parent) {
            (0, _, _) => self.manifest.id = attribute(e, "id", line)?,
            (1, "Variables", _) if !self.variables_read => {
                self.variables_read = true;
                self.in_variables = true;
            }
            (2, tag, _) if self.in_variables => {
                let (ty, causality) = match variable_type(tag) {
                    Some(ty) => {
                        let causality = attribute(e, "blockCausality", line)?.unwrap_or_default();
                        (ty, Causality::parse(&causality))
                    }
                    None if tag == "Variable" => {
                        let value = required_attribute(e, "type", line)?;
                        let ty = value
                            .parse::<PrimitiveType>()
                            .map_err(|_| ManifestError::UnknownType { value, line })?;
                        (ty, Causality::Unspecified)
                    }
                    None => return Ok(()),
                };
                self.current = Some(ManifestVariable {
                    name: required_attribute(e, "name", line)?,
                    ty,
                    causality,
                    dimensions: Vec::new(),
                    line,
                });
            }
            (_, "Dimension", Some("Dimensions")) => {
                if let Some(variable) = self.current.as_mut() {
                    let value = required_attribute(e, "size", line)?;
                    let size = value
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| ManifestError::InvalidDimension { value, line })?;
                    variable.dimensions.push(size);
                }
            }
            (2, "File", Some("Files")) => self.manifest.files.push(ManifestFile {
                name: required_attribute(e, "name", line)?,
                role: attribute(e, "role", line)?,
                line,
            }),
            (2, "ManifestReference", Some("ManifestReferences")) => {
                self.manifest.references.push(ManifestReference {
                    id: attribute(e, "id", line)?.unwrap_or_default(),
                    manifest_ref_id: required_attribute(e, "manifestRefId", line)?,
                    checksum: attribute(e, "checksum", line)?,
                    line,
                })
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str, depth: usize) {
        match depth {
            2 if self.in_variables => {
                if let Some(variable) = self.current.take() {
                    self.manifest.variables.push(variable);
                }
            }
            1 if name == "Variables" => self.in_variables = false,
            _ => {}
        }
    }
}
