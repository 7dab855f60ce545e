use tracing::{debug, info};

use crate::annotation::{AnnotationOperation, GeneAnnotation};
use crate::reconcile::ReconciliationOperation;
use crate::snapshot::{
    AnnotationStore, AssociationStore, MetaRecord, PersistedAssociation, RecordId, SnapshotSource,
};
use crate::{ImportError, ImportResult};

/// An [`AssociationStore`] that keeps all records in memory
///
/// Besides the associations, the store keeps the external identifiers of
/// the gene records, the meta records of previous runs and references
/// from other entities (e.g. curated entries) to association records.
///
/// # Examples
///
/// ```
/// use g2p_import::reconcile::ReconciliationOperation;
/// use g2p_import::snapshot::{AssociationStore, MemoryStore, MetaRecord, RecordId, SnapshotSource};
///
/// let mut store = MemoryStore::new();
/// store.add_identifier("HGNC", "HGNC:6052", RecordId::from(10u64));
///
/// let insert = ReconciliationOperation::Insert {
///     primary_id: "MONDO:0011584".to_string(),
///     display_name: "IMPDH1-related retinopathy".to_string(),
///     cross_ref_id: "6052".to_string(),
///     owner_record: RecordId::from(10u64),
/// };
/// let meta = MetaRecord::new("import_gene_disease", "first import", "Mondo", None);
/// store.apply(&[insert], &meta).unwrap();
///
/// assert_eq!(store.persisted_associations("Mondo").unwrap().len(), 1);
/// assert!(store.latest_meta("import_gene_disease", "Mondo").unwrap().is_some());
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    rows: Vec<PersistedAssociation>,
    merged: Vec<MergedAssociation>,
    identifiers: Vec<(String, String, RecordId)>,
    symbols: Vec<(String, String, String)>,
    meta: Vec<MetaRecord>,
    references: Vec<(String, RecordId)>,
    annotations: Vec<(GeneAnnotation, RecordId)>,
    next_record: u64,
}

/// A disease identifier whose own record was merged into another record
#[derive(Debug, Clone)]
struct MergedAssociation {
    primary_id: String,
    cross_ref_id: String,
    source_tag: String,
    into_record: RecordId,
}

impl MemoryStore {
    /// Constructs an empty `MemoryStore`
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an external identifier of a gene record
    pub fn add_identifier(&mut self, identifier_source: &str, identifier: &str, record: RecordId) {
        self.identifiers.push((
            identifier_source.to_string(),
            identifier.to_string(),
            record,
        ));
    }

    /// Registers the gene symbol of an external identifier
    pub fn add_gene_symbol(&mut self, identifier_source: &str, identifier: &str, symbol: &str) {
        self.symbols.push((
            identifier_source.to_string(),
            identifier.to_string(),
            symbol.to_string(),
        ));
    }

    /// Adds an association and returns its new [`RecordId`]
    pub fn add_association(
        &mut self,
        primary_id: &str,
        display_name: &str,
        cross_ref_id: &str,
        source_tag: &str,
    ) -> RecordId {
        let record_id = self.next_record_id();
        self.rows.push(PersistedAssociation::new(
            record_id,
            primary_id,
            display_name,
            cross_ref_id,
            source_tag,
        ));
        record_id
    }

    /// Adds the meta record of a previous run
    pub fn add_meta(&mut self, meta: MetaRecord) {
        self.meta.push(meta);
    }

    /// Adds a reference from `referrer` to an association record
    pub fn add_reference(&mut self, referrer: &str, record: RecordId) {
        self.references.push((referrer.to_string(), record));
    }

    /// All referrers that point to `record`
    pub fn references_to(&self, record: RecordId) -> Vec<&str> {
        self.references
            .iter()
            .filter(|(_, target)| *target == record)
            .map(|(referrer, _)| referrer.as_str())
            .collect()
    }

    /// All association records in insertion order
    ///
    /// Identifiers that were merged into another record don't have a
    /// record of their own, see [`MemoryStore::merged_into`].
    pub fn associations(&self) -> &[PersistedAssociation] {
        &self.rows
    }

    /// The record that `primary_id` was merged into
    pub fn merged_into(&self, primary_id: &str) -> Option<RecordId> {
        self.merged
            .iter()
            .find(|merged| merged.primary_id == primary_id)
            .map(|merged| merged.into_record)
    }

    /// All meta records in insertion order
    pub fn meta_records(&self) -> &[MetaRecord] {
        &self.meta
    }

    /// All gene annotations with the record of their gene
    pub fn annotations(&self) -> &[(GeneAnnotation, RecordId)] {
        &self.annotations
    }

    fn next_record_id(&mut self) -> RecordId {
        self.next_record += 1;
        RecordId::from(self.next_record)
    }

    fn owns_identifier(&self, record: RecordId) -> bool {
        self.identifiers.iter().any(|(_, _, owner)| *owner == record)
    }

    fn row_position(&self, record_id: RecordId, primary_id: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.record_id() == record_id && row.primary_id() == primary_id)
    }

    fn merged_position(&self, record_id: RecordId, primary_id: &str) -> Option<usize> {
        self.merged.iter().position(|merged| {
            merged.into_record == record_id && merged.primary_id == primary_id
        })
    }

    fn is_known(&self, primary_id: &str, source_tag: &str) -> bool {
        self.rows
            .iter()
            .any(|row| row.primary_id() == primary_id && row.source_tag() == source_tag)
            || self
                .merged
                .iter()
                .any(|merged| merged.primary_id == primary_id && merged.source_tag == source_tag)
    }

    fn apply_one(&mut self, op: &ReconciliationOperation, source_tag: &str) -> ImportResult<()> {
        match op {
            ReconciliationOperation::Insert {
                primary_id,
                display_name,
                cross_ref_id,
                owner_record,
            } => {
                if self.is_known(primary_id, source_tag) {
                    return Err(ImportError::Apply(format!("{primary_id} already exists")));
                }
                if !self.owns_identifier(*owner_record) {
                    return Err(ImportError::Apply(format!(
                        "unknown owner record {owner_record} for {primary_id}"
                    )));
                }
                self.add_association(primary_id, display_name, cross_ref_id, source_tag);
            }
            ReconciliationOperation::Update {
                record_id,
                primary_id,
                new_display_name,
            } => {
                if let Some(idx) = self.row_position(*record_id, primary_id) {
                    self.rows[idx].set_display_name(new_display_name);
                } else if let Some(idx) = self.merged_position(*record_id, primary_id) {
                    // the shared record keeps its name, the identifier gets its own record again
                    let merged = self.merged.remove(idx);
                    let record = self.add_association(
                        primary_id,
                        new_display_name,
                        &merged.cross_ref_id,
                        &merged.source_tag,
                    );
                    debug!(%primary_id, %record, "Split merged identifier into its own record");
                } else {
                    return Err(missing_record(*record_id, primary_id));
                }
            }
            ReconciliationOperation::Merge {
                primary_id,
                from_record,
                into_record,
                ..
            } => {
                if from_record == into_record
                    || !self.rows.iter().any(|row| row.record_id() == *into_record)
                {
                    return Err(ImportError::Apply(format!(
                        "merge target {into_record} does not exist"
                    )));
                }
                if let Some(idx) = self.row_position(*from_record, primary_id) {
                    let retired = self.rows.remove(idx);
                    for (_, target) in self.references.iter_mut() {
                        if *target == *from_record {
                            *target = *into_record;
                        }
                    }
                    for merged in self.merged.iter_mut() {
                        if merged.into_record == *from_record {
                            merged.into_record = *into_record;
                        }
                    }
                    self.merged.push(MergedAssociation {
                        primary_id: retired.primary_id().to_string(),
                        cross_ref_id: retired.cross_ref_id().to_string(),
                        source_tag: retired.source_tag().to_string(),
                        into_record: *into_record,
                    });
                } else if let Some(idx) = self.merged_position(*from_record, primary_id) {
                    // the old record is still used by other identifiers
                    self.merged[idx].into_record = *into_record;
                } else {
                    return Err(missing_record(*from_record, primary_id));
                }
            }
            ReconciliationOperation::Delete {
                record_id,
                primary_id,
            } => {
                if let Some(idx) = self.row_position(*record_id, primary_id) {
                    match self
                        .merged
                        .iter()
                        .position(|merged| merged.into_record == *record_id)
                    {
                        Some(alias) => {
                            // the record survives with one of the identifiers merged into it
                            let merged = self.merged.remove(alias);
                            let name = self.rows[idx].display_name().to_string();
                            self.rows[idx] = PersistedAssociation::new(
                                *record_id,
                                &merged.primary_id,
                                &name,
                                &merged.cross_ref_id,
                                &merged.source_tag,
                            );
                            info!(
                                %primary_id,
                                %record_id,
                                new_owner = %merged.primary_id,
                                "Record of deleted identifier is kept for merged identifier"
                            );
                        }
                        None => {
                            self.rows.remove(idx);
                        }
                    }
                } else if let Some(idx) = self.merged_position(*record_id, primary_id) {
                    self.merged.remove(idx);
                } else {
                    return Err(missing_record(*record_id, primary_id));
                }
            }
            ReconciliationOperation::Skip { .. } => (),
        }
        Ok(())
    }
}

fn missing_record(record_id: RecordId, primary_id: &str) -> ImportError {
    ImportError::Apply(format!("no record {record_id} for {primary_id}"))
}

impl SnapshotSource for MemoryStore {
    fn persisted_associations(&self, source_tag: &str) -> ImportResult<Vec<PersistedAssociation>> {
        let rows = self
            .rows
            .iter()
            .filter(|row| row.source_tag() == source_tag)
            .cloned();
        let merged = self
            .merged
            .iter()
            .filter(|merged| merged.source_tag == source_tag)
            .filter_map(|merged| {
                self.rows
                    .iter()
                    .find(|row| row.record_id() == merged.into_record)
                    .map(|into| {
                        PersistedAssociation::new(
                            merged.into_record,
                            &merged.primary_id,
                            into.display_name(),
                            &merged.cross_ref_id,
                            &merged.source_tag,
                        )
                    })
            });
        Ok(rows.chain(merged).collect())
    }

    fn identifier_lookup(&self, identifier_source: &str) -> ImportResult<Vec<(String, RecordId)>> {
        Ok(self
            .identifiers
            .iter()
            .filter(|(source, _, _)| source == identifier_source)
            .map(|(_, identifier, record)| (identifier.clone(), *record))
            .collect())
    }

    fn latest_meta(&self, run_key: &str, source_tag: &str) -> ImportResult<Option<MetaRecord>> {
        Ok(self
            .meta
            .iter()
            .filter(|meta| meta.run_key() == run_key && meta.source_tag() == source_tag)
            .max_by_key(|meta| meta.timestamp())
            .cloned())
    }

    fn gene_symbols(&self, identifier_source: &str) -> ImportResult<Vec<(String, String)>> {
        Ok(self
            .symbols
            .iter()
            .filter(|(source, _, _)| source == identifier_source)
            .map(|(_, identifier, symbol)| (identifier.clone(), symbol.clone()))
            .collect())
    }
}

impl AssociationStore for MemoryStore {
    fn apply(
        &mut self,
        operations: &[ReconciliationOperation],
        meta: &MetaRecord,
    ) -> ImportResult<()> {
        let mut staged = self.clone();
        for op in operations {
            debug!(%op, "Applying");
            staged.apply_one(op, meta.source_tag())?;
        }
        staged.meta.push(meta.clone());
        *self = staged;
        info!(
            operations = operations.len(),
            run_key = meta.run_key(),
            "Applied operations"
        );
        Ok(())
    }
}

impl AnnotationStore for MemoryStore {
    fn apply_annotations(
        &mut self,
        operations: &[AnnotationOperation],
        meta: &MetaRecord,
    ) -> ImportResult<()> {
        let mut staged = self.annotations.clone();
        for op in operations {
            let AnnotationOperation::Insert {
                annotation,
                owner_record,
            } = op
            else {
                continue;
            };
            if !self.owns_identifier(*owner_record) {
                return Err(ImportError::Apply(format!(
                    "unknown owner record {owner_record} for {}",
                    annotation.accession()
                )));
            }
            if staged.iter().any(|(existing, _)| {
                existing.accession() == annotation.accession()
                    && existing.gene_symbol() == annotation.gene_symbol()
            }) {
                return Err(ImportError::Apply(format!(
                    "annotation {} of {} already exists",
                    annotation.accession(),
                    annotation.gene_symbol()
                )));
            }
            staged.push((annotation.clone(), *owner_record));
        }
        self.annotations = staged;
        self.meta.push(meta.clone());
        info!(
            operations = operations.len(),
            run_key = meta.run_key(),
            "Applied annotations"
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::normalize_cross_ref;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.add_identifier("HGNC", "HGNC:1", RecordId::from(100u64));
        store
    }

    fn meta() -> MetaRecord {
        MetaRecord::new("import_gene_disease", "test", "Mondo", None)
    }

    #[test]
    fn lookup_by_source() {
        let mut store = store();
        store.add_identifier("Ensembl", "ENSG1", RecordId::from(100u64));
        let lookup = store.identifier_lookup("HGNC").unwrap();
        assert_eq!(lookup, vec![("HGNC:1".to_string(), RecordId::from(100u64))]);
    }

    #[test]
    fn latest_meta_by_timestamp() {
        let mut store = store();
        let day = |d| {
            chrono::NaiveDate::from_ymd_opt(2024, 1, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        };
        store.add_meta(meta().with_timestamp(day(2)));
        store.add_meta(meta().with_timestamp(day(5)));
        store.add_meta(meta().with_timestamp(day(3)));
        store.add_meta(MetaRecord::new("other", "test", "Mondo", None).with_timestamp(day(9)));

        let latest = store
            .latest_meta("import_gene_disease", "Mondo")
            .unwrap()
            .unwrap();
        assert_eq!(latest.timestamp(), day(5));
        assert!(store.latest_meta("import_gene_disease", "OMIM").unwrap().is_none());
    }

    #[test]
    fn merge_moves_references() {
        let mut store = store();
        let foo = store.add_association("MONDO:1", "Foo", "1", "Mondo");
        let bar = store.add_association("MONDO:2", "Bar", "1", "Mondo");
        store.add_reference("G2P00001", foo);
        store.add_reference("G2P00002", bar);

        let merge = ReconciliationOperation::Merge {
            primary_id: "MONDO:1".to_string(),
            from_record: foo,
            into_record: bar,
            display_name: "Bar".to_string(),
        };
        store.apply(&[merge], &meta()).unwrap();

        assert!(store.references_to(foo).is_empty());
        assert_eq!(store.references_to(bar), vec!["G2P00001", "G2P00002"]);
        let named_bar = store
            .associations()
            .iter()
            .filter(|row| row.display_name() == "Bar")
            .count();
        assert_eq!(named_bar, 1);
        assert_eq!(store.associations().len(), 1);
        assert_eq!(store.merged_into("MONDO:1"), Some(bar));
        assert_eq!(store.meta_records().len(), 1);

        let persisted = store.persisted_associations("Mondo").unwrap();
        let merged = persisted
            .iter()
            .find(|p| p.primary_id() == "MONDO:1")
            .unwrap();
        assert_eq!(merged.record_id(), bar);
        assert_eq!(merged.display_name(), "Bar");
    }

    #[test]
    fn merged_identifier_gets_own_record_on_rename() {
        let mut store = store();
        let foo = store.add_association("MONDO:1", "Foo", "1", "Mondo");
        let bar = store.add_association("MONDO:2", "Bar", "1", "Mondo");
        let ops = vec![
            ReconciliationOperation::Merge {
                primary_id: "MONDO:1".to_string(),
                from_record: foo,
                into_record: bar,
                display_name: "Bar".to_string(),
            },
            ReconciliationOperation::Update {
                record_id: bar,
                primary_id: "MONDO:1".to_string(),
                new_display_name: "Baz".to_string(),
            },
        ];
        store.apply(&ops, &meta()).unwrap();

        assert_eq!(store.merged_into("MONDO:1"), None);
        let names: Vec<(&str, &str)> = store
            .associations()
            .iter()
            .map(|row| (row.primary_id(), row.display_name()))
            .collect();
        assert_eq!(names, vec![("MONDO:2", "Bar"), ("MONDO:1", "Baz")]);
    }

    #[test]
    fn deleting_merge_target_keeps_record() {
        let mut store = store();
        let foo = store.add_association("MONDO:1", "Foo", "1", "Mondo");
        let bar = store.add_association("MONDO:2", "Bar", "1", "Mondo");
        store.add_reference("G2P00001", foo);
        let ops = vec![
            ReconciliationOperation::Merge {
                primary_id: "MONDO:1".to_string(),
                from_record: foo,
                into_record: bar,
                display_name: "Bar".to_string(),
            },
            ReconciliationOperation::Delete {
                record_id: bar,
                primary_id: "MONDO:2".to_string(),
            },
        ];
        store.apply(&ops, &meta()).unwrap();

        assert_eq!(store.associations().len(), 1);
        assert_eq!(store.associations()[0].primary_id(), "MONDO:1");
        assert_eq!(store.associations()[0].record_id(), bar);
        assert_eq!(store.references_to(bar), vec!["G2P00001"]);
        assert_eq!(store.merged_into("MONDO:1"), None);
    }

    #[test]
    fn merge_into_missing_record_is_rejected() {
        let mut store = store();
        let foo = store.add_association("MONDO:1", "Foo", "1", "Mondo");
        let merge = ReconciliationOperation::Merge {
            primary_id: "MONDO:1".to_string(),
            from_record: foo,
            into_record: RecordId::from(99u64),
            display_name: "Bar".to_string(),
        };
        assert!(matches!(
            store.apply(&[merge], &meta()),
            Err(ImportError::Apply(_))
        ));
        assert_eq!(store.associations().len(), 1);
    }

    #[test]
    fn failing_batch_changes_nothing() {
        let mut store = store();
        let foo = store.add_association("MONDO:1", "Foo", "1", "Mondo");
        let ops = vec![
            ReconciliationOperation::Update {
                record_id: foo,
                primary_id: "MONDO:1".to_string(),
                new_display_name: "Foo 2".to_string(),
            },
            ReconciliationOperation::Delete {
                record_id: RecordId::from(999u64),
                primary_id: "MONDO:9".to_string(),
            },
        ];
        let res = store.apply(&ops, &meta());
        assert!(matches!(res, Err(ImportError::Apply(_))));
        assert_eq!(store.associations()[0].display_name(), "Foo");
        assert!(store.meta_records().is_empty());
    }

    #[test]
    fn insert_requires_known_owner() {
        let mut store = store();
        let insert = ReconciliationOperation::Insert {
            primary_id: "MONDO:1".to_string(),
            display_name: "Foo".to_string(),
            cross_ref_id: "1".to_string(),
            owner_record: RecordId::from(5u64),
        };
        assert!(store.apply(&[insert], &meta()).is_err());
        assert!(store.associations().is_empty());
    }

    #[test]
    fn insert_rejects_duplicates() {
        let mut store = store();
        store.add_association("MONDO:1", "Foo", "1", "Mondo");
        let insert = ReconciliationOperation::Insert {
            primary_id: "MONDO:1".to_string(),
            display_name: "Foo".to_string(),
            cross_ref_id: "1".to_string(),
            owner_record: RecordId::from(100u64),
        };
        assert!(store.apply(&[insert], &meta()).is_err());
    }

    #[test]
    fn delete_and_skip() {
        let mut store = store();
        let foo = store.add_association("MONDO:1", "Foo", "1", "Mondo");
        let ops = vec![
            ReconciliationOperation::Skip {
                primary_id: "MONDO:3".to_string(),
                reason: crate::reconcile::SkipReason::UnresolvedCrossReference {
                    cross_ref_id: "3".to_string(),
                },
            },
            ReconciliationOperation::Delete {
                record_id: foo,
                primary_id: "MONDO:1".to_string(),
            },
        ];
        store.apply(&ops, &meta()).unwrap();
        assert!(store.persisted_associations("Mondo").unwrap().is_empty());
    }

    #[test]
    fn annotations_are_stored_once() {
        let mut store = store();
        let annotation = GeneAnnotation::new("P84243", "H3-3A", "HGNC:4764", None, "Histone");
        let insert = AnnotationOperation::Insert {
            annotation,
            owner_record: RecordId::from(100u64),
        };
        let meta = MetaRecord::new("import_uniprot", "test", "UniProt", None);
        store
            .apply_annotations(std::slice::from_ref(&insert), &meta)
            .unwrap();
        assert_eq!(store.annotations().len(), 1);
        assert!(store.latest_meta("import_uniprot", "UniProt").unwrap().is_some());

        assert!(store.apply_annotations(&[insert], &meta).is_err());
        assert_eq!(store.annotations().len(), 1);
        assert_eq!(store.meta_records().len(), 1);
    }

    #[test]
    fn cross_ref_is_normalized_on_insert() {
        let mut store = store();
        store.add_association("MONDO:1", "Foo", "http://identifiers.org/hgnc/1", "Mondo");
        assert_eq!(store.associations()[0].cross_ref_id(), normalize_cross_ref("HGNC:1"));
    }
}
