use std::io::Write;

use crate::reconcile::{Reconciliation, ReconciliationOperation, SkipReason};
use crate::ImportResult;

/// Writes the associations with an unknown gene and those left unchanged
///
/// The report is tab separated with a header line:
///
/// ```text
/// primary id	status	detail
/// MONDO:0000002	skipped	unresolved cross reference 99999
/// MONDO:0011584	unchanged
/// ```
///
/// # Errors
///
/// [`crate::ImportError::Io`] if writing fails
pub fn write_unresolved_report<W: Write>(
    reconciliation: &Reconciliation,
    mut writer: W,
) -> ImportResult<()> {
    writeln!(writer, "primary id\tstatus\tdetail")?;
    for op in reconciliation.operations() {
        if let ReconciliationOperation::Skip {
            primary_id,
            reason: reason @ SkipReason::UnresolvedCrossReference { .. },
        } = op
        {
            writeln!(writer, "{primary_id}\tskipped\t{reason}")?;
        }
    }
    for primary_id in reconciliation.unchanged() {
        writeln!(writer, "{primary_id}\tunchanged\t")?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the associations whose change was not applied as such
///
/// These are renames that were resolved by merging into another record,
/// renames that were refused because the new name lacks the gene symbol,
/// and persisted associations that are missing from the release but
/// were not deleted. Each of them needs a manual review.
///
/// # Errors
///
/// [`crate::ImportError::Io`] if writing fails
pub fn write_not_updated_report<W: Write>(
    reconciliation: &Reconciliation,
    mut writer: W,
) -> ImportResult<()> {
    writeln!(writer, "primary id\tdisease name\twarning")?;
    for op in reconciliation.operations() {
        match op {
            ReconciliationOperation::Merge {
                primary_id,
                from_record,
                into_record,
                display_name,
            } => writeln!(
                writer,
                "{primary_id}\t{display_name}\tname already used by record {into_record}, references of record {from_record} are moved"
            )?,
            ReconciliationOperation::Skip {
                primary_id,
                reason: reason @ SkipReason::GeneNotInName { display_name, .. },
            } => writeln!(writer, "{primary_id}\t{display_name}\t{reason}")?,
            _ => (),
        }
    }
    for persisted in reconciliation.retained() {
        writeln!(
            writer,
            "{}\t{}\tnot found in release, not deleted",
            persisted.primary_id(),
            persisted.display_name()
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reconcile::Reconciler;
    use crate::snapshot::{PersistedAssociation, RecordId, Snapshot};
    use crate::{Association, AssociationSet};

    fn reconciliation() -> Reconciliation {
        let snapshot = Snapshot::from_parts(
            vec![
                PersistedAssociation::new(RecordId::from(1u64), "MONDO:1", "Foo", "1", "Mondo"),
                PersistedAssociation::new(RecordId::from(2u64), "MONDO:2", "Bar", "1", "Mondo"),
                PersistedAssociation::new(RecordId::from(3u64), "MONDO:3", "Baz", "1", "Mondo"),
            ],
            vec![("HGNC:1".to_string(), RecordId::from(100u64))],
        )
        .unwrap();
        let new: AssociationSet = vec![
            Association::new("MONDO:1", "Foo", "1").unwrap(),
            Association::new("MONDO:2", "Foo", "1").unwrap(),
            Association::new("MONDO:4", "Qux", "99").unwrap(),
        ]
        .into_iter()
        .collect();
        Reconciler::new(&snapshot).reconcile(&new)
    }

    #[test]
    fn unresolved_report() {
        let mut out = Vec::new();
        write_unresolved_report(&reconciliation(), &mut out).unwrap();
        let report = String::from_utf8(out).unwrap();
        assert_eq!(
            report,
            "primary id\tstatus\tdetail\n\
             MONDO:4\tskipped\tunresolved cross reference 99\n\
             MONDO:1\tunchanged\t\n"
        );
    }

    #[test]
    fn not_updated_report() {
        let mut out = Vec::new();
        write_not_updated_report(&reconciliation(), &mut out).unwrap();
        let report = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("MONDO:2\tFoo\tname already used by record 1"));
        assert_eq!(lines[2], "MONDO:3\tBaz\tnot found in release, not deleted");
    }

    #[test]
    fn refused_rename_is_not_updated() {
        let snapshot = Snapshot::from_parts(
            vec![PersistedAssociation::new(
                RecordId::from(1u64),
                "MONDO:1",
                "IMPDH1-related retinopathy",
                "6052",
                "Mondo",
            )],
            vec![("HGNC:6052".to_string(), RecordId::from(100u64))],
        )
        .unwrap()
        .with_gene_symbols(vec![("HGNC:6052".to_string(), "IMPDH1".to_string())]);
        let new: AssociationSet =
            vec![Association::new("MONDO:1", "retinitis pigmentosa 10", "6052").unwrap()]
                .into_iter()
                .collect();
        let reconciliation = Reconciler::new(&snapshot)
            .require_gene_in_name(true)
            .reconcile(&new);

        let mut out = Vec::new();
        write_not_updated_report(&reconciliation, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "primary id\tdisease name\twarning\n\
             MONDO:1\tretinitis pigmentosa 10\tgene IMPDH1 not found in new disease name\n"
        );

        let mut out = Vec::new();
        write_unresolved_report(&reconciliation, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "primary id\tstatus\tdetail\n");
    }
}
