//! eFMI manifests and audit orchestration
//!
//! - `xml`: manifest reading (variables, files, manifest references)
//! - `table`: manifest → declared-variable tables
//! - `declarations`: manifest against Algorithm Code declarations
//! - `reconcile`: interface variables across two manifests
//! - `references`: `ManifestReference` resolution
//! - `container`: `__content.xml` listing
//! - `config`: audit configuration
//! - `audit`: file-level pipeline producing diagnostics

pub mod audit;
pub mod config;
pub mod container;
pub mod declarations;
pub mod reconcile;
pub mod references;
pub mod table;
pub mod xml;

pub use audit::{
    audit_container, audit_representation, check_algorithm_code_source, load_manifest,
    reconcile_manifests, AuditOutcome,
};
pub use config::{AuditConfig, DuplicatePolicy, OutputFormat};
pub use container::{parse_content, Content, RepresentationEntry, CONTENT_FILE};
pub use declarations::compare_declarations;
pub use reconcile::{reconcile, Mismatch, MismatchKind, Reconciliation};
pub use references::resolve_references;
pub use table::variable_table;
pub use xml::{parse_manifest, Manifest, ManifestError, ManifestVariable};
