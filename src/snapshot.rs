//! The persisted state the reconciliation runs against
//!
//! The datastore is only accessed through the [`SnapshotSource`],
//! [`AssociationStore`] and [`AnnotationStore`] traits. [`MemoryStore`] is
//! an implementation that keeps everything in memory.
use std::collections::HashMap;
use std::fmt::Display;

use chrono::{NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::annotation::AnnotationOperation;
use crate::reconcile::ReconciliationOperation;
use crate::{
    normalize_cross_ref, ImportError, ImportResult, ReleaseVersion, DEFAULT_IDENTIFIER_SOURCE,
    DEFAULT_SOURCE_TAG,
};

mod memory;
pub use memory::MemoryStore;

/// The surrogate key of a record in the datastore
#[derive(Clone, Copy, Default, Debug, Hash, PartialEq, PartialOrd, Eq, Ord)]
pub struct RecordId {
    inner: u64,
}

impl RecordId {
    /// The numerical value of the id
    pub fn as_u64(&self) -> u64 {
        self.inner
    }
}

impl From<u64> for RecordId {
    fn from(inner: u64) -> Self {
        RecordId { inner }
    }
}

impl TryFrom<&str> for RecordId {
    type Error = ImportError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value
            .trim()
            .parse::<u64>()
            .map(RecordId::from)
            .map_err(|_| ImportError::Snapshot(format!("invalid record id {value}")))
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// An association as it is stored in the datastore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedAssociation {
    record_id: RecordId,
    primary_id: String,
    display_name: String,
    cross_ref_id: String,
    source_tag: String,
}

impl PersistedAssociation {
    /// Constructs a new `PersistedAssociation`
    ///
    /// The cross reference is normalized with [`normalize_cross_ref`]
    pub fn new(
        record_id: RecordId,
        primary_id: &str,
        display_name: &str,
        cross_ref_id: &str,
        source_tag: &str,
    ) -> Self {
        Self {
            record_id,
            primary_id: primary_id.trim().to_string(),
            display_name: display_name.trim().to_string(),
            cross_ref_id: normalize_cross_ref(cross_ref_id).to_string(),
            source_tag: source_tag.to_string(),
        }
    }

    /// The surrogate key of the record
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// The disease identifier
    pub fn primary_id(&self) -> &str {
        &self.primary_id
    }

    /// The disease name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The bare gene identifier
    pub fn cross_ref_id(&self) -> &str {
        &self.cross_ref_id
    }

    /// The source the association was imported from
    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    pub(crate) fn set_display_name(&mut self, display_name: &str) {
        self.display_name = display_name.to_string();
    }
}

/// Selects which persisted records belong to a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSelector {
    /// Source of the persisted associations
    pub source_tag: String,
    /// Source of the identifiers that resolve cross references
    pub identifier_source: String,
}

impl Default for SnapshotSelector {
    fn default() -> Self {
        Self {
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            identifier_source: DEFAULT_IDENTIFIER_SOURCE.to_string(),
        }
    }
}

/// The audit record of an import run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    run_key: String,
    timestamp: NaiveDateTime,
    description: String,
    source_tag: String,
    release_version: Option<ReleaseVersion>,
}

impl MetaRecord {
    /// Constructs a new `MetaRecord` with the current UTC time
    pub fn new(
        run_key: &str,
        description: &str,
        source_tag: &str,
        release_version: Option<ReleaseVersion>,
    ) -> Self {
        Self {
            run_key: run_key.to_string(),
            timestamp: Utc::now().naive_utc(),
            description: description.to_string(),
            source_tag: source_tag.to_string(),
            release_version,
        }
    }

    /// Returns the record with a different timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The key of the run, e.g. `import_gene_disease`
    pub fn run_key(&self) -> &str {
        &self.run_key
    }

    /// Time of the run (UTC)
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Human readable description of the run
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The source of the imported associations
    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    /// The release version of the imported document
    pub fn release_version(&self) -> Option<&ReleaseVersion> {
        self.release_version.as_ref()
    }
}

/// Read access to the datastore
pub trait SnapshotSource {
    /// All associations of the given source
    ///
    /// # Errors
    ///
    /// [`ImportError::Snapshot`] if the datastore cannot be read
    fn persisted_associations(&self, source_tag: &str) -> ImportResult<Vec<PersistedAssociation>>;

    /// Pairs of external identifier and the record that owns it
    ///
    /// # Errors
    ///
    /// [`ImportError::Snapshot`] if the datastore cannot be read
    fn identifier_lookup(&self, identifier_source: &str) -> ImportResult<Vec<(String, RecordId)>>;

    /// The most recent meta record of a run
    ///
    /// # Errors
    ///
    /// [`ImportError::Snapshot`] if the datastore cannot be read
    fn latest_meta(&self, run_key: &str, source_tag: &str) -> ImportResult<Option<MetaRecord>>;

    /// Pairs of external identifier and the gene symbol of its record
    ///
    /// Datastores without gene symbols return an empty list.
    ///
    /// # Errors
    ///
    /// [`ImportError::Snapshot`] if the datastore cannot be read
    fn gene_symbols(&self, _identifier_source: &str) -> ImportResult<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}

/// Write access to the datastore
pub trait AssociationStore: SnapshotSource {
    /// Applies all operations and records `meta`
    ///
    /// Either all operations are applied or none.
    ///
    /// # Errors
    ///
    /// [`ImportError::Apply`] if any of the operations is rejected
    fn apply(
        &mut self,
        operations: &[ReconciliationOperation],
        meta: &MetaRecord,
    ) -> ImportResult<()>;
}

/// Write access to the gene annotations of the datastore
pub trait AnnotationStore: SnapshotSource {
    /// Inserts all annotations and records `meta`
    ///
    /// Either all annotations are inserted or none.
    ///
    /// # Errors
    ///
    /// [`ImportError::Apply`] if any of the annotations is rejected
    fn apply_annotations(
        &mut self,
        operations: &[AnnotationOperation],
        meta: &MetaRecord,
    ) -> ImportResult<()>;
}

/// The persisted associations and the identifier lookup of one run
///
/// Both are read-only after loading.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    persisted: HashMap<String, PersistedAssociation>,
    lookup: HashMap<String, RecordId>,
    symbols: HashMap<String, String>,
}

impl Snapshot {
    /// Loads the persisted associations and the identifier lookup
    ///
    /// # Errors
    ///
    /// - [`ImportError::DuplicatePersistedKey`] if a primary id is persisted twice
    /// - [`ImportError::Snapshot`] if the datastore cannot be read
    pub fn load<S: SnapshotSource + ?Sized>(
        source: &S,
        selector: &SnapshotSelector,
    ) -> ImportResult<Self> {
        let persisted = source.persisted_associations(&selector.source_tag)?;
        let lookup = source.identifier_lookup(&selector.identifier_source)?;
        let symbols = source.gene_symbols(&selector.identifier_source)?;
        let snapshot = Self::from_parts(persisted, lookup)?.with_gene_symbols(symbols);
        info!(
            persisted = snapshot.len(),
            identifiers = snapshot.lookup.len(),
            source_tag = %selector.source_tag,
            "Loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Loads only the identifier lookup, without any persisted associations
    ///
    /// # Errors
    ///
    /// [`ImportError::Snapshot`] if the datastore cannot be read
    pub fn load_lookup<S: SnapshotSource + ?Sized>(
        source: &S,
        selector: &SnapshotSelector,
    ) -> ImportResult<Self> {
        let lookup = source.identifier_lookup(&selector.identifier_source)?;
        Self::from_parts(Vec::new(), lookup)
    }

    /// Builds a `Snapshot` from already loaded records
    ///
    /// Identifiers are normalized. If an identifier is present more than
    /// once, the first record wins.
    ///
    /// # Errors
    ///
    /// [`ImportError::DuplicatePersistedKey`] if a primary id is present twice
    pub fn from_parts<I, L>(persisted: I, lookup: L) -> ImportResult<Self>
    where
        I: IntoIterator<Item = PersistedAssociation>,
        L: IntoIterator<Item = (String, RecordId)>,
    {
        let mut snapshot = Snapshot::default();
        for association in persisted {
            if snapshot.persisted.contains_key(association.primary_id()) {
                return Err(ImportError::DuplicatePersistedKey(
                    association.primary_id().to_string(),
                ));
            }
            snapshot
                .persisted
                .insert(association.primary_id().to_string(), association);
        }
        for (identifier, record) in lookup {
            let key = normalize_cross_ref(&identifier);
            if key.is_empty() {
                debug!(%identifier, "Ignoring empty identifier");
                continue;
            }
            if let Some(existing) = snapshot.lookup.get(key) {
                warn!(
                    identifier = key,
                    %existing,
                    ignored = %record,
                    "Identifier is owned by more than one record"
                );
                continue;
            }
            snapshot.lookup.insert(key.to_string(), record);
        }
        Ok(snapshot)
    }

    /// Adds the gene symbols of the identifiers
    ///
    /// Identifiers are normalized like the lookup. The first symbol wins.
    #[must_use]
    pub fn with_gene_symbols<G>(mut self, symbols: G) -> Self
    where
        G: IntoIterator<Item = (String, String)>,
    {
        for (identifier, symbol) in symbols {
            let key = normalize_cross_ref(&identifier);
            if key.is_empty() || symbol.trim().is_empty() {
                continue;
            }
            self.symbols
                .entry(key.to_string())
                .or_insert_with(|| symbol.trim().to_string());
        }
        self
    }

    /// Returns the gene symbol of the record that owns the cross reference
    pub fn gene_symbol(&self, cross_ref_id: &str) -> Option<&str> {
        self.symbols
            .get(normalize_cross_ref(cross_ref_id))
            .map(String::as_str)
    }

    /// Returns the persisted association of `primary_id`
    pub fn persisted(&self, primary_id: &str) -> Option<&PersistedAssociation> {
        self.persisted.get(primary_id)
    }

    /// Returns the record that owns the cross reference
    pub fn resolve(&self, cross_ref_id: &str) -> Option<RecordId> {
        self.lookup.get(normalize_cross_ref(cross_ref_id)).copied()
    }

    /// Iterates all persisted associations in arbitrary order
    pub fn associations(&self) -> impl Iterator<Item = &PersistedAssociation> {
        self.persisted.values()
    }

    /// The number of persisted associations
    pub fn len(&self) -> usize {
        self.persisted.len()
    }

    /// Returns `true` if there are no persisted associations
    pub fn is_empty(&self) -> bool {
        self.persisted.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn persisted(record: u64, primary_id: &str, name: &str) -> PersistedAssociation {
        PersistedAssociation::new(RecordId::from(record), primary_id, name, "HGNC:1", "Mondo")
    }

    #[test]
    fn record_id_from_str() {
        assert_eq!(RecordId::try_from("42").unwrap(), RecordId::from(42u64));
        assert_eq!(RecordId::from(42u64).to_string(), "42");
        assert!(matches!(
            RecordId::try_from("x42"),
            Err(ImportError::Snapshot(_))
        ));
    }

    #[test]
    fn persisted_cross_ref_is_normalized() {
        let p = PersistedAssociation::new(
            RecordId::from(1u64),
            "MONDO:1",
            "Foo",
            "http://identifiers.org/hgnc/6052",
            "Mondo",
        );
        assert_eq!(p.cross_ref_id(), "6052");
        assert_eq!(p.source_tag(), "Mondo");
    }

    #[test]
    fn duplicate_persisted_key() {
        let res = Snapshot::from_parts(
            vec![persisted(1, "MONDO:1", "Foo"), persisted(2, "MONDO:1", "Bar")],
            Vec::new(),
        );
        match res {
            Err(ImportError::DuplicatePersistedKey(id)) => assert_eq!(id, "MONDO:1"),
            other => panic!("expected duplicate key error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_lookup_keeps_first() {
        let snapshot = Snapshot::from_parts(
            Vec::new(),
            vec![
                ("HGNC:6052".to_string(), RecordId::from(1u64)),
                ("6052".to_string(), RecordId::from(2u64)),
                ("".to_string(), RecordId::from(3u64)),
            ],
        )
        .unwrap();
        assert_eq!(snapshot.resolve("6052"), Some(RecordId::from(1u64)));
        assert_eq!(
            snapshot.resolve("http://identifiers.org/hgnc/6052"),
            Some(RecordId::from(1u64))
        );
        assert_eq!(snapshot.resolve("1"), None);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn load_from_store() {
        let mut store = MemoryStore::new();
        store.add_identifier("HGNC", "HGNC:6052", RecordId::from(10u64));
        store.add_identifier("Ensembl", "ENSG00000106348", RecordId::from(10u64));
        store.add_association("MONDO:1", "Foo", "6052", "Mondo");
        store.add_association("MONDO:2", "Bar", "6052", "OMIM");

        let snapshot = Snapshot::load(&store, &SnapshotSelector::default()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.persisted("MONDO:1").is_some());
        assert!(snapshot.persisted("MONDO:2").is_none());
        assert_eq!(snapshot.resolve("6052"), Some(RecordId::from(10u64)));
        assert_eq!(snapshot.resolve("ENSG00000106348"), None);

        let lookup_only = Snapshot::load_lookup(&store, &SnapshotSelector::default()).unwrap();
        assert!(lookup_only.is_empty());
        assert_eq!(lookup_only.resolve("6052"), Some(RecordId::from(10u64)));
    }

    #[test]
    fn gene_symbols() {
        let mut store = MemoryStore::new();
        store.add_identifier("HGNC", "HGNC:6052", RecordId::from(10u64));
        store.add_gene_symbol("HGNC", "HGNC:6052", "IMPDH1");
        store.add_gene_symbol("HGNC", "6052", "IMPD1");
        store.add_gene_symbol("Ensembl", "ENSG00000106348", "IMPDH1");

        let snapshot = Snapshot::load(&store, &SnapshotSelector::default()).unwrap();
        assert_eq!(snapshot.gene_symbol("http://identifiers.org/hgnc/6052"), Some("IMPDH1"));
        assert_eq!(snapshot.gene_symbol("ENSG00000106348"), None);
    }

    #[test]
    fn meta_record() {
        let version = ReleaseVersion::parse("2024-06-04");
        let meta = MetaRecord::new("import_gene_disease", "desc", "Mondo", version.clone());
        assert_eq!(meta.run_key(), "import_gene_disease");
        assert_eq!(meta.release_version(), version.as_ref());
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(meta.with_timestamp(ts).timestamp(), ts);
    }
}
