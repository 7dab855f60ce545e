//! Import gene-disease associations from Mondo releases and reconcile them
//! with a previously persisted association set.
//!
//! The crate reads either the Mondo OWL export or the flat Mondo CSV
//! snapshot, extracts one `(disease id, disease name, gene id)` triple per
//! disease and compares the result with what the datastore already holds.
//! The outcome is a list of [`reconcile::ReconciliationOperation`]s plus a
//! [`snapshot::MetaRecord`] describing the run. Applying the operations is
//! left to an [`snapshot::AssociationStore`].
//!
//! Gene annotations from UniProtKB search results are read and attached to
//! the same gene records by the [`annotation`] module.
//!
//! # Examples
//!
//! ```
//! use g2p_import::parser::SourceFormat;
//! use g2p_import::parser::tabular::TabularLayout;
//! use g2p_import::reconcile::Reconciler;
//! use g2p_import::snapshot::{RecordId, Snapshot};
//!
//! let csv = "##2024-06-04\nmondoCURIE,label,predicate,hgnc\n\
//!            MONDO:0011584,IMPDH1-related retinopathy,x,http://identifiers.org/hgnc/6052\n";
//!
//! let associations = g2p_import::extractor::read_associations_from(
//!     csv.as_bytes(),
//!     SourceFormat::Tabular,
//!     &TabularLayout::default(),
//! ).unwrap();
//!
//! let snapshot = Snapshot::from_parts(
//!     Vec::new(),
//!     vec![("HGNC:6052".to_string(), RecordId::from(42u64))],
//! ).unwrap();
//!
//! let reconciliation = Reconciler::new(&snapshot).reconcile(&associations);
//! assert_eq!(reconciliation.operations().len(), 1);
//! ```
use thiserror::Error;

pub mod annotation;
mod association;
pub mod extractor;
mod importer;
pub mod parser;
pub mod reconcile;
pub mod snapshot;
pub mod version;

pub use association::{normalize_cross_ref, Association, AssociationSet};
pub use importer::{DeletionPolicy, ImportConfig, ImportRun, Importer, Outcome, RunMode};
pub use version::ReleaseVersion;

/// The `key` of the meta record that is written for every run
pub const DEFAULT_RUN_KEY: &str = "import_gene_disease";
/// The source of the persisted gene-disease associations
pub const DEFAULT_SOURCE_TAG: &str = "Mondo";
/// The source of the gene identifiers used to resolve cross references
pub const DEFAULT_IDENTIFIER_SOURCE: &str = "HGNC";
/// Resources of relationship targets must contain this to count as a cross reference
pub const CROSS_REF_NAMESPACE: &str = "hgnc";
const OBSOLETE_PREFIX: &str = "obsolete";
const DEFAULT_COMMENT_MARKER: &str = "#";
const DEFAULT_HEADER_MARKER: &str = "mondoCURIE";
const DEFAULT_DESCRIPTION: &str = "Import Mondo gene disease associations";

/// Errors that abort an import run
///
/// Unresolved cross references are not errors. They are reported as
/// [`reconcile::ReconciliationOperation::Skip`] instead.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The source document is malformed or truncated
    #[error("unable to parse document at byte {offset}: {message}")]
    Parse { offset: u64, message: String },
    /// A JSON response body is malformed or truncated
    #[error("unable to parse JSON at line {line}: {message}")]
    Json { line: usize, message: String },
    /// The source document does not contain a release version
    #[error("no release version found in {0}")]
    VersionNotFound(String),
    /// The persisted associations contain the same primary id more than once
    #[error("primary id {0} is present more than once in the persisted associations")]
    DuplicatePersistedKey(String),
    /// The file extension does not map to a known source format
    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),
    /// The source file cannot be opened
    #[error("cannot open file {0}")]
    CannotOpenFile(String),
    /// Reading from the underlying stream failed
    #[error("unable to read input")]
    Io(#[from] std::io::Error),
    /// The datastore could not provide the persisted snapshot
    #[error("unable to load snapshot: {0}")]
    Snapshot(String),
    /// The datastore rejected a batch of operations
    #[error("operations rejected: {0}")]
    Apply(String),
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        let offset = err.position().map_or(0, csv::Position::byte);
        ImportError::Parse {
            offset,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Json {
            line: err.line(),
            message: err.to_string(),
        }
    }
}

/// Shortcut for `Result<T, ImportError>`
pub type ImportResult<T> = Result<T, ImportError>;
