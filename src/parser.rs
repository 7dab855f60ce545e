//! Streaming readers for Mondo releases
//!
//! Mondo is published in two shapes:
//! - the OWL/RDF export (`mondo.owl`), a deeply nested XML document.
//!   [`owl::OwlReader`] turns it into a flat stream of node events.
//! - the gene-disease CSV snapshot. [`tabular::TabularReader`] turns it into
//!   a stream of rows.
//!
//! Neither reader loads the whole document into memory.
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::{ImportError, ImportResult};

pub mod owl;
pub mod tabular;

/// The layout of a source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// OWL/RDF export with nested entity nodes
    Hierarchical,
    /// Delimited snapshot with one association per row
    Tabular,
}

impl SourceFormat {
    /// Detects the format from the file extension
    ///
    /// # Errors
    ///
    /// [`ImportError::UnsupportedFormat`] if the extension is neither `owl` nor `csv`
    ///
    /// # Examples
    ///
    /// ```
    /// use g2p_import::parser::SourceFormat;
    ///
    /// assert_eq!(SourceFormat::from_path("data/mondo.owl").unwrap(), SourceFormat::Hierarchical);
    /// assert_eq!(SourceFormat::from_path("mondo_genes.CSV").unwrap(), SourceFormat::Tabular);
    /// assert!(SourceFormat::from_path("mondo.obo").is_err());
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> ImportResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        match extension.as_deref() {
            Some("owl") => Ok(SourceFormat::Hierarchical),
            Some("csv") => Ok(SourceFormat::Tabular),
            _ => Err(ImportError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Returns `true` if a document of this format always contains the
    /// complete set of associations
    ///
    /// The OWL export is known to omit some associations, so records
    /// that are missing from it are not necessarily obsolete.
    pub fn is_complete_snapshot(&self) -> bool {
        matches!(self, SourceFormat::Tabular)
    }
}

impl Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SourceFormat::Hierarchical => "owl",
                SourceFormat::Tabular => "csv",
            }
        )
    }
}

/// Opens `path` for buffered reading
pub(crate) fn open<P: AsRef<Path>>(path: P) -> ImportResult<BufReader<File>> {
    let filename = path.as_ref().display().to_string();
    let file = File::open(path).map_err(|_| ImportError::CannotOpenFile(filename))?;
    Ok(BufReader::new(file))
}
