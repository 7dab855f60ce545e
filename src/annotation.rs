//! Gene annotations from UniProtKB search results
//!
//! The input is the JSON body of a UniProtKB search that was requested with
//! the fields `accession`, `cc_function`, `xref_mim`, `xref_hgnc` and
//! `gene_primary`. Every page of a paginated search is read on its own.
//!
//! Each entry with a function text and an HGNC cross reference gives one
//! [`GeneAnnotation`] per gene symbol. The annotations are attached to the
//! gene records through the same identifier lookup as the gene-disease
//! associations.
//!
//! # Examples
//!
//! ```
//! use g2p_import::annotation::{propose_annotations, read_annotations, AnnotationOutcome};
//! use g2p_import::snapshot::{AnnotationStore, MemoryStore, RecordId};
//!
//! let body = r#"{"results": [{
//!     "primaryAccession": "P12268",
//!     "genes": [{"geneName": {"value": "IMPDH2"}}],
//!     "comments": [{"commentType": "FUNCTION", "texts": [{"value": "Catalyzes the conversion of IMP to XMP"}]}],
//!     "uniProtKBCrossReferences": [
//!         {"database": "HGNC", "id": "HGNC:6053", "properties": [{"key": "GeneName", "value": "IMPDH2"}]},
//!         {"database": "MIM", "id": "146691", "properties": [{"key": "Type", "value": "gene"}]}
//!     ]
//! }]}"#;
//!
//! let annotations = read_annotations(body.as_bytes()).unwrap();
//! assert_eq!(annotations[0].mim_id(), Some("146691"));
//!
//! let mut store = MemoryStore::new();
//! store.add_identifier("HGNC", "HGNC:6053", RecordId::from(7u64));
//!
//! let outcome = propose_annotations(&annotations, None, &store).unwrap();
//! let AnnotationOutcome::Proposed(run) = outcome else {
//!     panic!("nothing imported yet");
//! };
//! run.apply(&mut store).unwrap();
//! assert_eq!(store.annotations().len(), 1);
//! ```
use std::fmt::Display;
use std::io::Read;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::reconcile::SkipReason;
use crate::snapshot::{
    AnnotationStore, MetaRecord, RecordId, Snapshot, SnapshotSelector, SnapshotSource,
};
use crate::{ImportResult, ReleaseVersion, DEFAULT_IDENTIFIER_SOURCE};

/// The `key` of the meta record of an annotation import
pub const ANNOTATION_RUN_KEY: &str = "import_uniprot";
/// The source of the gene annotations
pub const ANNOTATION_SOURCE_TAG: &str = "UniProt";
const ANNOTATION_DESCRIPTION: &str = "Import UniProt data";

/// The function of the protein product of a gene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneAnnotation {
    accession: String,
    gene_symbol: String,
    hgnc_id: String,
    mim_id: Option<String>,
    function: String,
}

impl GeneAnnotation {
    /// Constructs a new `GeneAnnotation`
    pub fn new(
        accession: &str,
        gene_symbol: &str,
        hgnc_id: &str,
        mim_id: Option<&str>,
        function: &str,
    ) -> Self {
        Self {
            accession: accession.trim().to_string(),
            gene_symbol: gene_symbol.trim().to_string(),
            hgnc_id: hgnc_id.trim().to_string(),
            mim_id: mim_id.map(|id| id.trim().to_string()),
            function: function.trim().to_string(),
        }
    }

    /// The UniProtKB accession, e.g. `P12268`
    pub fn accession(&self) -> &str {
        &self.accession
    }

    pub fn gene_symbol(&self) -> &str {
        &self.gene_symbol
    }

    /// The HGNC identifier, e.g. `HGNC:6053`
    pub fn hgnc_id(&self) -> &str {
        &self.hgnc_id
    }

    /// The OMIM gene entry, if there is one
    pub fn mim_id(&self) -> Option<&str> {
        self.mim_id.as_deref()
    }

    /// The function text of the protein
    pub fn function(&self) -> &str {
        &self.function
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    primary_accession: String,
    #[serde(default)]
    genes: Vec<Gene>,
    #[serde(default)]
    comments: Vec<Comment>,
    #[serde(default, rename = "uniProtKBCrossReferences")]
    cross_references: Vec<CrossReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Gene {
    gene_name: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct Text {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Comment {
    comment_type: Option<String>,
    #[serde(default)]
    texts: Vec<Text>,
}

#[derive(Debug, Deserialize)]
struct CrossReference {
    database: String,
    id: String,
    #[serde(default)]
    properties: Vec<Property>,
}

#[derive(Debug, Deserialize)]
struct Property {
    key: String,
    value: String,
}

impl CrossReference {
    fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|property| property.key == key)
            .map(|property| property.value.as_str())
    }
}

impl Entry {
    fn function(&self) -> Option<&str> {
        self.comments
            .iter()
            .filter(|comment| {
                comment
                    .comment_type
                    .as_deref()
                    .map_or(true, |kind| kind == "FUNCTION")
            })
            .find_map(|comment| comment.texts.first())
            .map(|text| text.value.trim())
            .filter(|text| !text.is_empty())
    }

    fn xrefs<'a>(
        &'a self,
        database: &'a str,
    ) -> impl Iterator<Item = &'a CrossReference> + 'a {
        self.cross_references
            .iter()
            .filter(move |xref| xref.database == database)
    }

    /// The HGNC cross reference that belongs to `symbol`
    fn hgnc(&self, symbol: &str) -> Option<&str> {
        self.xrefs("HGNC")
            .find(|xref| xref.property("GeneName") == Some(symbol))
            .map(|xref| xref.id.as_str())
    }

    /// The first OMIM entry of type `gene`
    fn mim(&self) -> Option<&str> {
        self.xrefs("MIM")
            .find(|xref| xref.property("Type") == Some("gene"))
            .map(|xref| xref.id.as_str())
    }

    fn annotations(&self) -> Vec<GeneAnnotation> {
        let Some(function) = self.function() else {
            debug!(accession = %self.primary_accession, "Ignoring entry without function");
            return Vec::new();
        };
        if self.xrefs("HGNC").next().is_none() {
            debug!(
                accession = %self.primary_accession,
                "Ignoring entry without HGNC cross reference"
            );
            return Vec::new();
        }
        let mim = self.mim();

        self.genes
            .iter()
            .filter_map(|gene| gene.gene_name.as_ref())
            .map(|name| name.value.trim())
            .filter_map(|symbol| match self.hgnc(symbol) {
                Some(hgnc) => Some(GeneAnnotation::new(
                    &self.primary_accession,
                    symbol,
                    hgnc,
                    mim,
                    function,
                )),
                None => {
                    debug!(
                        accession = %self.primary_accession,
                        gene_symbol = symbol,
                        "No HGNC cross reference for gene symbol"
                    );
                    None
                }
            })
            .collect()
    }
}

/// Reads one page of UniProtKB search results
///
/// Entries without a function text or without any HGNC cross reference
/// are ignored. Each gene symbol of an entry gives one annotation with the
/// HGNC cross reference of that symbol. Symbols without their own HGNC
/// cross reference are ignored.
///
/// # Errors
///
/// [`crate::ImportError::Json`] if the body is not a valid search result
pub fn read_annotations<R: Read>(reader: R) -> ImportResult<Vec<GeneAnnotation>> {
    let page: SearchPage = serde_json::from_reader(reader)?;
    let annotations: Vec<GeneAnnotation> =
        page.results.iter().flat_map(Entry::annotations).collect();
    info!(
        entries = page.results.len(),
        annotations = annotations.len(),
        "Read UniProt annotations"
    );
    Ok(annotations)
}

/// The release version from the `X-UniProt-Release` response header
///
/// ```
/// use g2p_import::annotation::uniprot_release;
/// use g2p_import::ReleaseVersion;
///
/// assert_eq!(
///     uniprot_release(" 2024_03 "),
///     Some(ReleaseVersion::Tag("2024_03".to_string()))
/// );
/// assert!(uniprot_release("").is_none());
/// ```
pub fn uniprot_release(header: &str) -> Option<ReleaseVersion> {
    let release = header.trim();
    if release.is_empty() {
        None
    } else {
        Some(ReleaseVersion::Tag(release.to_string()))
    }
}

/// A single change to the gene annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationOperation {
    /// Add the annotation to the record of its gene
    Insert {
        annotation: GeneAnnotation,
        owner_record: RecordId,
    },
    /// Nothing is written for the annotation
    Skip {
        accession: String,
        gene_symbol: String,
        reason: SkipReason,
    },
}

impl AnnotationOperation {
    /// Returns `true` for [`AnnotationOperation::Skip`]
    pub fn is_skip(&self) -> bool {
        matches!(self, AnnotationOperation::Skip { .. })
    }
}

impl Display for AnnotationOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotationOperation::Insert {
                annotation,
                owner_record,
            } => write!(
                f,
                "insert\t{}\t{}\t{}\t{owner_record}",
                annotation.accession(),
                annotation.gene_symbol(),
                annotation.hgnc_id()
            ),
            AnnotationOperation::Skip {
                accession,
                gene_symbol,
                reason,
            } => write!(f, "skip\t{accession}\t{gene_symbol}\t{reason}"),
        }
    }
}

/// The result of [`propose_annotations`]
#[derive(Debug)]
pub enum AnnotationOutcome {
    /// Annotations were already imported by a previous run
    AlreadyImported(MetaRecord),
    /// Annotations that can be inserted
    Proposed(AnnotationRun),
}

/// The proposed annotations of a run, ready to be applied
#[derive(Debug)]
pub struct AnnotationRun {
    operations: Vec<AnnotationOperation>,
    meta: MetaRecord,
}

impl AnnotationRun {
    pub fn operations(&self) -> &[AnnotationOperation] {
        &self.operations
    }

    /// The meta record that is written together with the annotations
    pub fn meta(&self) -> &MetaRecord {
        &self.meta
    }

    /// The number of annotations that are inserted
    pub fn inserted(&self) -> usize {
        self.operations.iter().filter(|op| !op.is_skip()).count()
    }

    /// The number of annotations whose gene is unknown
    pub fn skipped(&self) -> usize {
        self.operations.iter().filter(|op| op.is_skip()).count()
    }

    /// Inserts all annotations and the meta record into `store`
    ///
    /// # Errors
    ///
    /// [`crate::ImportError::Apply`] if the store rejects the annotations
    pub fn apply<S: AnnotationStore + ?Sized>(&self, store: &mut S) -> ImportResult<()> {
        store.apply_annotations(&self.operations, &self.meta)
    }
}

/// Attaches `annotations` to the gene records of the datastore
///
/// Annotations whose HGNC identifier is not known to the datastore are
/// skipped. Annotations are imported only once: if a previous run was
/// recorded, nothing is proposed.
///
/// # Errors
///
/// [`crate::ImportError::Snapshot`] if the datastore cannot be read
pub fn propose_annotations<S: SnapshotSource + ?Sized>(
    annotations: &[GeneAnnotation],
    release: Option<ReleaseVersion>,
    source: &S,
) -> ImportResult<AnnotationOutcome> {
    if let Some(meta) = source.latest_meta(ANNOTATION_RUN_KEY, ANNOTATION_SOURCE_TAG)? {
        info!(run_key = meta.run_key(), "Annotations were already imported");
        return Ok(AnnotationOutcome::AlreadyImported(meta));
    }

    let selector = SnapshotSelector {
        source_tag: ANNOTATION_SOURCE_TAG.to_string(),
        identifier_source: DEFAULT_IDENTIFIER_SOURCE.to_string(),
    };
    let snapshot = Snapshot::load_lookup(source, &selector)?;

    let operations: Vec<AnnotationOperation> = annotations
        .iter()
        .map(|annotation| match snapshot.resolve(annotation.hgnc_id()) {
            Some(owner_record) => AnnotationOperation::Insert {
                annotation: annotation.clone(),
                owner_record,
            },
            None => {
                warn!(
                    accession = annotation.accession(),
                    hgnc_id = annotation.hgnc_id(),
                    "Skipping annotation of unknown gene"
                );
                AnnotationOperation::Skip {
                    accession: annotation.accession().to_string(),
                    gene_symbol: annotation.gene_symbol().to_string(),
                    reason: SkipReason::UnresolvedCrossReference {
                        cross_ref_id: annotation.hgnc_id().to_string(),
                    },
                }
            }
        })
        .collect();

    let run = AnnotationRun {
        operations,
        meta: MetaRecord::new(
            ANNOTATION_RUN_KEY,
            ANNOTATION_DESCRIPTION,
            ANNOTATION_SOURCE_TAG,
            release,
        ),
    };
    info!(
        inserted = run.inserted(),
        skipped = run.skipped(),
        "Annotation run prepared"
    );
    Ok(AnnotationOutcome::Proposed(run))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::snapshot::MemoryStore;
    use crate::ImportError;
    use std::fs::File;

    fn fixture() -> Vec<GeneAnnotation> {
        let file = File::open("tests/fixtures/uniprot_small.json").unwrap();
        read_annotations(file).unwrap()
    }

    #[test]
    fn one_annotation_per_gene_symbol() {
        let annotations = fixture();
        let genes: Vec<(&str, &str, &str)> = annotations
            .iter()
            .map(|a| (a.accession(), a.gene_symbol(), a.hgnc_id()))
            .collect();
        assert_eq!(
            genes,
            vec![
                ("P84243", "H3-3A", "HGNC:4764"),
                ("P84243", "H3-3B", "HGNC:4765"),
                ("P12268", "IMPDH2", "HGNC:6053"),
                ("P78363", "ABCA4", "HGNC:34"),
            ]
        );
    }

    #[test]
    fn mim_of_type_gene() {
        let annotations = fixture();
        assert_eq!(annotations[0].mim_id(), Some("601128"));
        assert_eq!(annotations[1].mim_id(), Some("601128"));
        assert_eq!(annotations[2].mim_id(), Some("146691"));
        assert_eq!(annotations[3].mim_id(), None);
    }

    #[test]
    fn function_text() {
        let annotations = fixture();
        assert!(annotations[2].function().starts_with("Catalyzes the conversion"));
    }

    #[test]
    fn invalid_body() {
        let res = read_annotations("{\"results\": [".as_bytes());
        assert!(matches!(res, Err(ImportError::Json { .. })));
    }

    #[test]
    fn unknown_genes_are_skipped() {
        let mut store = MemoryStore::new();
        store.add_identifier("HGNC", "HGNC:4764", RecordId::from(1u64));
        store.add_identifier("HGNC", "HGNC:6053", RecordId::from(2u64));

        let outcome = propose_annotations(&fixture(), uniprot_release("2024_03"), &store).unwrap();
        let AnnotationOutcome::Proposed(run) = outcome else {
            panic!("expected proposed annotations");
        };
        assert_eq!(run.inserted(), 2);
        assert_eq!(run.skipped(), 2);
        assert_eq!(
            run.operations()[1].to_string(),
            "skip\tP84243\tH3-3B\tunresolved cross reference HGNC:4765"
        );
        assert_eq!(run.meta().run_key(), "import_uniprot");
        assert_eq!(run.meta().source_tag(), "UniProt");
        assert_eq!(
            run.meta().release_version(),
            Some(&ReleaseVersion::Tag("2024_03".to_string()))
        );

        run.apply(&mut store).unwrap();
        let owners: Vec<(&str, RecordId)> = store
            .annotations()
            .iter()
            .map(|(a, owner)| (a.gene_symbol(), *owner))
            .collect();
        assert_eq!(
            owners,
            vec![("H3-3A", RecordId::from(1u64)), ("IMPDH2", RecordId::from(2u64))]
        );
    }

    #[test]
    fn annotations_are_imported_once() {
        let mut store = MemoryStore::new();
        store.add_identifier("HGNC", "HGNC:4764", RecordId::from(1u64));
        let annotations = fixture();

        let outcome = propose_annotations(&annotations, None, &store).unwrap();
        let AnnotationOutcome::Proposed(run) = outcome else {
            panic!("expected proposed annotations");
        };
        run.apply(&mut store).unwrap();

        assert!(matches!(
            propose_annotations(&annotations, None, &store).unwrap(),
            AnnotationOutcome::AlreadyImported(_)
        ));
    }
}
