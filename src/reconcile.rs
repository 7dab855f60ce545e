//! Comparison of a new [`AssociationSet`] with the persisted [`Snapshot`]
//!
//! The [`Reconciler`] does not modify anything. It proposes a list of
//! [`ReconciliationOperation`]s that an [`crate::snapshot::AssociationStore`]
//! applies in a single batch.
//!
//! ```text
//! new association       persisted            operation
//! ----------------------------------------------------------
//! MONDO:1 Foo  6052     -                    Insert (gene resolved)
//! MONDO:2 Bar  9999     -                    Skip   (gene unknown)
//! MONDO:3 Baz  1        MONDO:3 Baz          -      (unchanged)
//! MONDO:4 Qux  1        MONDO:4 Quux         Update
//! MONDO:5 Baz  1        MONDO:5 Baaz         Merge  (into MONDO:3)
//! -                     MONDO:6 Old          Delete (strict only)
//! ```
use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use tracing::{debug, info, warn};

use crate::snapshot::{PersistedAssociation, RecordId, Snapshot};
use crate::{Association, AssociationSet};

mod report;
pub use report::{write_not_updated_report, write_unresolved_report};

/// The reason why an association was not imported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The gene is not known to the datastore
    UnresolvedCrossReference { cross_ref_id: String },
    /// The new name of a persisted association does not mention its gene
    GeneNotInName {
        gene_symbol: String,
        display_name: String,
    },
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnresolvedCrossReference { cross_ref_id } => {
                write!(f, "unresolved cross reference {cross_ref_id}")
            }
            SkipReason::GeneNotInName { gene_symbol, .. } => {
                write!(f, "gene {gene_symbol} not found in new disease name")
            }
        }
    }
}

/// A single change to the persisted associations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOperation {
    /// Add a new association, owned by the record of the gene
    Insert {
        primary_id: String,
        display_name: String,
        cross_ref_id: String,
        owner_record: RecordId,
    },
    /// Rename a persisted association
    Update {
        record_id: RecordId,
        primary_id: String,
        new_display_name: String,
    },
    /// The new name already belongs to another record. References to
    /// `from_record` are moved to `into_record`.
    Merge {
        primary_id: String,
        from_record: RecordId,
        into_record: RecordId,
        display_name: String,
    },
    /// Remove a persisted association
    Delete {
        record_id: RecordId,
        primary_id: String,
    },
    /// Nothing is written for the association
    Skip {
        primary_id: String,
        reason: SkipReason,
    },
}

impl ReconciliationOperation {
    /// The disease identifier the operation applies to
    pub fn primary_id(&self) -> &str {
        match self {
            ReconciliationOperation::Insert { primary_id, .. }
            | ReconciliationOperation::Update { primary_id, .. }
            | ReconciliationOperation::Merge { primary_id, .. }
            | ReconciliationOperation::Delete { primary_id, .. }
            | ReconciliationOperation::Skip { primary_id, .. } => primary_id,
        }
    }

    /// A short lowercase name of the operation
    pub fn kind(&self) -> &'static str {
        match self {
            ReconciliationOperation::Insert { .. } => "insert",
            ReconciliationOperation::Update { .. } => "update",
            ReconciliationOperation::Merge { .. } => "merge",
            ReconciliationOperation::Delete { .. } => "delete",
            ReconciliationOperation::Skip { .. } => "skip",
        }
    }

    /// Returns `true` for [`ReconciliationOperation::Delete`]
    pub fn is_delete(&self) -> bool {
        matches!(self, ReconciliationOperation::Delete { .. })
    }

    /// Returns `true` for [`ReconciliationOperation::Skip`]
    pub fn is_skip(&self) -> bool {
        matches!(self, ReconciliationOperation::Skip { .. })
    }
}

impl Display for ReconciliationOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconciliationOperation::Insert {
                primary_id,
                display_name,
                cross_ref_id,
                owner_record,
            } => write!(
                f,
                "insert\t{primary_id}\t{display_name}\t{cross_ref_id}\t{owner_record}"
            ),
            ReconciliationOperation::Update {
                record_id,
                primary_id,
                new_display_name,
            } => write!(f, "update\t{primary_id}\t{new_display_name}\t{record_id}"),
            ReconciliationOperation::Merge {
                primary_id,
                from_record,
                into_record,
                display_name,
            } => write!(
                f,
                "merge\t{primary_id}\t{display_name}\t{from_record}>{into_record}"
            ),
            ReconciliationOperation::Delete {
                record_id,
                primary_id,
            } => write!(f, "delete\t{primary_id}\t{record_id}"),
            ReconciliationOperation::Skip { primary_id, reason } => {
                write!(f, "skip\t{primary_id}\t{reason}")
            }
        }
    }
}

/// Computes the [`ReconciliationOperation`]s for a new [`AssociationSet`]
///
/// # Examples
///
/// ```
/// use g2p_import::reconcile::{ReconciliationOperation, Reconciler};
/// use g2p_import::snapshot::{PersistedAssociation, RecordId, Snapshot};
/// use g2p_import::{Association, AssociationSet};
///
/// let snapshot = Snapshot::from_parts(
///     vec![PersistedAssociation::new(RecordId::from(1u64), "MONDO:9", "Old", "HGNC:1", "Mondo")],
///     vec![("HGNC:1".to_string(), RecordId::from(100u64))],
/// ).unwrap();
///
/// let associations: AssociationSet = vec![
///     Association::new("MONDO:1", "Foo", "HGNC:1").unwrap()
/// ].into_iter().collect();
///
/// let reconciliation = Reconciler::new(&snapshot)
///     .strict_deletions(true)
///     .reconcile(&associations);
///
/// let kinds: Vec<&str> = reconciliation.operations().iter().map(|op| op.kind()).collect();
/// assert_eq!(kinds, vec!["insert", "delete"]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    snapshot: &'a Snapshot,
    strict_deletions: bool,
    gene_in_name: bool,
}

impl<'a> Reconciler<'a> {
    /// Constructs a new `Reconciler` that never deletes
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            strict_deletions: false,
            gene_in_name: false,
        }
    }

    /// Delete persisted associations that are missing from the new set
    ///
    /// Only enable this if the new set is known to be complete.
    #[must_use]
    pub fn strict_deletions(mut self, strict: bool) -> Self {
        self.strict_deletions = strict;
        self
    }

    /// Refuse renames whose new name does not contain the gene symbol
    ///
    /// The symbol is taken from [`Snapshot::gene_symbol`] for the cross
    /// reference of the persisted association. Associations of genes
    /// without a known symbol are renamed as usual. Refused renames are
    /// proposed as [`ReconciliationOperation::Skip`] with
    /// [`SkipReason::GeneNotInName`].
    #[must_use]
    pub fn require_gene_in_name(mut self, required: bool) -> Self {
        self.gene_in_name = required;
        self
    }

    /// Compares `associations` with the snapshot
    pub fn reconcile(&self, associations: &AssociationSet) -> Reconciliation {
        let mut missing: Vec<&PersistedAssociation> = self
            .snapshot
            .associations()
            .filter(|persisted| !associations.contains(persisted.primary_id()))
            .collect();
        missing.sort_by(|a, b| a.primary_id().cmp(b.primary_id()));

        // records deleted in this run can't receive merged references
        let deleted: HashSet<&str> = if self.strict_deletions {
            missing
                .iter()
                .copied()
                .map(PersistedAssociation::primary_id)
                .collect()
        } else {
            HashSet::new()
        };
        let names = self.name_index(&deleted);
        let mut renamed: HashMap<String, RecordId> = HashMap::new();
        let mut reconciliation = Reconciliation::default();

        for association in associations {
            match self.snapshot.persisted(association.primary_id()) {
                None => reconciliation
                    .operations
                    .push(self.insert_or_skip(association)),
                Some(persisted) if persisted.display_name() == association.display_name() => {
                    if persisted.cross_ref_id() != association.cross_ref_id() {
                        debug!(
                            primary_id = association.primary_id(),
                            persisted = persisted.cross_ref_id(),
                            new = association.cross_ref_id(),
                            "Cross reference differs, keeping persisted value"
                        );
                    }
                    reconciliation
                        .unchanged
                        .push(association.primary_id().to_string());
                }
                Some(persisted) => {
                    let op = self.rename(persisted, association, &names, &renamed);
                    if let ReconciliationOperation::Update {
                        record_id,
                        new_display_name,
                        ..
                    } = &op
                    {
                        renamed
                            .entry(new_display_name.clone())
                            .or_insert(*record_id);
                    }
                    reconciliation.operations.push(op);
                }
            }
        }

        if self.strict_deletions {
            reconciliation
                .operations
                .extend(missing.into_iter().map(|persisted| {
                    ReconciliationOperation::Delete {
                        record_id: persisted.record_id(),
                        primary_id: persisted.primary_id().to_string(),
                    }
                }));
        } else {
            if !missing.is_empty() {
                info!(
                    count = missing.len(),
                    "Persisted associations missing from the release are kept"
                );
            }
            reconciliation.retained = missing.into_iter().cloned().collect();
        }

        // stable, keeps the relative order within both groups
        reconciliation.operations.sort_by_key(|op| op.is_delete());

        info!(%reconciliation, "Reconciliation finished");
        reconciliation
    }

    fn insert_or_skip(&self, association: &Association) -> ReconciliationOperation {
        match self.snapshot.resolve(association.cross_ref_id()) {
            Some(owner_record) => ReconciliationOperation::Insert {
                primary_id: association.primary_id().to_string(),
                display_name: association.display_name().to_string(),
                cross_ref_id: association.cross_ref_id().to_string(),
                owner_record,
            },
            None => {
                warn!(
                    primary_id = association.primary_id(),
                    cross_ref_id = association.cross_ref_id(),
                    "Skipping association with unknown cross reference"
                );
                ReconciliationOperation::Skip {
                    primary_id: association.primary_id().to_string(),
                    reason: SkipReason::UnresolvedCrossReference {
                        cross_ref_id: association.cross_ref_id().to_string(),
                    },
                }
            }
        }
    }

    /// Proposes the operation for a persisted association with a new name
    ///
    /// The merge target is the lowest record that already carries the
    /// name. Names given to other records earlier in the same run count
    /// as well.
    fn rename(
        &self,
        persisted: &PersistedAssociation,
        association: &Association,
        names: &HashMap<&str, Vec<&PersistedAssociation>>,
        renamed: &HashMap<String, RecordId>,
    ) -> ReconciliationOperation {
        let name = association.display_name();
        let existing = names
            .get(name)
            .and_then(|records| {
                records.iter().find(|other| {
                    other.primary_id() != persisted.primary_id()
                        && other.record_id() != persisted.record_id()
                })
            })
            .map(|other| other.record_id())
            .or_else(|| {
                renamed
                    .get(name)
                    .copied()
                    .filter(|record| *record != persisted.record_id())
            });

        if let Some(into_record) = existing {
            debug!(
                primary_id = association.primary_id(),
                %into_record,
                "New name already exists, merging"
            );
            return ReconciliationOperation::Merge {
                primary_id: association.primary_id().to_string(),
                from_record: persisted.record_id(),
                into_record,
                display_name: name.to_string(),
            };
        }

        if self.gene_in_name {
            if let Some(symbol) = self.snapshot.gene_symbol(persisted.cross_ref_id()) {
                if !name.contains(symbol) {
                    warn!(
                        primary_id = association.primary_id(),
                        gene_symbol = symbol,
                        display_name = name,
                        "Gene not found in new disease name, not renaming"
                    );
                    return ReconciliationOperation::Skip {
                        primary_id: association.primary_id().to_string(),
                        reason: SkipReason::GeneNotInName {
                            gene_symbol: symbol.to_string(),
                            display_name: name.to_string(),
                        },
                    };
                }
            }
        }

        ReconciliationOperation::Update {
            record_id: persisted.record_id(),
            primary_id: association.primary_id().to_string(),
            new_display_name: name.to_string(),
        }
    }

    /// Persisted associations by name, sorted by `record_id`
    fn name_index(
        &self,
        excluded: &HashSet<&str>,
    ) -> HashMap<&'a str, Vec<&'a PersistedAssociation>> {
        let mut names: HashMap<&str, Vec<&PersistedAssociation>> = HashMap::new();
        for persisted in self
            .snapshot
            .associations()
            .filter(|persisted| !excluded.contains(persisted.primary_id()))
        {
            names
                .entry(persisted.display_name())
                .or_default()
                .push(persisted);
        }
        for records in names.values_mut() {
            records.sort_by_key(|persisted| persisted.record_id());
        }
        names
    }
}

/// The result of [`Reconciler::reconcile`]
#[derive(Debug, Default, Clone)]
pub struct Reconciliation {
    operations: Vec<ReconciliationOperation>,
    unchanged: Vec<String>,
    retained: Vec<PersistedAssociation>,
}

impl Reconciliation {
    /// All proposed operations, deletes last
    pub fn operations(&self) -> &[ReconciliationOperation] {
        &self.operations
    }

    /// Consumes the reconciliation and returns the operations
    pub fn into_operations(self) -> Vec<ReconciliationOperation> {
        self.operations
    }

    /// Primary ids of associations that don't need any change
    pub fn unchanged(&self) -> &[String] {
        &self.unchanged
    }

    /// Persisted associations that are missing from the new set
    /// but are not deleted
    pub fn retained(&self) -> &[PersistedAssociation] {
        &self.retained
    }

    /// The number of operations of the given kind, see [`ReconciliationOperation::kind`]
    pub fn count(&self, kind: &str) -> usize {
        self.operations.iter().filter(|op| op.kind() == kind).count()
    }

    /// Returns `true` if there is nothing to write apart from skips
    pub fn is_noop(&self) -> bool {
        self.operations.iter().all(ReconciliationOperation::is_skip)
    }
}

impl Display for Reconciliation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Inserts: {}, Updates: {}, Merges: {}, Deletes: {}, Skipped: {}, Unchanged: {}, Retained: {}",
            self.count("insert"),
            self.count("update"),
            self.count("merge"),
            self.count("delete"),
            self.count("skip"),
            self.unchanged.len(),
            self.retained.len()
        )
    }
}
