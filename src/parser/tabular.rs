//! Row reader for the Mondo gene-disease CSV snapshot
//!
//! ```text
//! ##2024-06-04,Mondo gene disease associations
//! mondoCURIE,label,predicate,hgncIRI
//! MONDO:0011584,IMPDH1-related retinopathy,RO:0004003,http://identifiers.org/hgnc/6052
//! ```
use std::io::Read;

use crate::{ImportResult, DEFAULT_COMMENT_MARKER, DEFAULT_HEADER_MARKER};

/// Describes which columns of the snapshot hold which value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularLayout {
    /// Column of the disease identifier
    pub id_column: usize,
    /// Column of the disease name
    pub name_column: usize,
    /// Column of the gene reference (URI)
    pub cross_ref_column: usize,
    /// Rows whose first column starts with this are comments
    pub comment_marker: String,
    /// Rows whose first column starts with this are headers
    pub header_marker: String,
}

impl Default for TabularLayout {
    fn default() -> Self {
        Self {
            id_column: 0,
            name_column: 1,
            cross_ref_column: 3,
            comment_marker: DEFAULT_COMMENT_MARKER.to_string(),
            header_marker: DEFAULT_HEADER_MARKER.to_string(),
        }
    }
}

impl TabularLayout {
    /// Returns `true` if a row starting with `first_column` is a comment
    /// or the header and does not contain data
    pub fn is_marker(&self, first_column: &str) -> bool {
        first_column.starts_with(&self.comment_marker)
            || first_column.starts_with(&self.header_marker)
    }

    /// The number of columns a data row must have
    pub fn min_columns(&self) -> usize {
        self.id_column
            .max(self.name_column)
            .max(self.cross_ref_column)
            + 1
    }
}

/// A single row of the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    fields: Vec<String>,
    offset: u64,
    line: u64,
}

impl Row {
    /// Constructs a new `Row`
    pub fn new(fields: Vec<String>, offset: u64, line: u64) -> Self {
        Self {
            fields,
            offset,
            line,
        }
    }

    /// The value of the column `idx`
    pub fn field(&self, idx: usize) -> Option<&str> {
        self.fields.get(idx).map(String::as_str)
    }

    /// All values of the row
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Byte offset of the row in the document
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Line number of the row, starting at 1
    pub fn line(&self) -> u64 {
        self.line
    }
}

impl From<csv::StringRecord> for Row {
    fn from(record: csv::StringRecord) -> Self {
        let (offset, line) = record
            .position()
            .map_or((0, 0), |pos| (pos.byte(), pos.line()));
        Row::new(record.iter().map(str::to_string).collect(), offset, line)
    }
}

/// Forward-only iterator of [`Row`]s
///
/// The reader does not skip anything, comment and header rows are
/// passed on like data rows. It stops after the first error.
pub struct TabularReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    failed: bool,
}

impl<R: Read> TabularReader<R> {
    /// Constructs a new `TabularReader` for comma separated input
    pub fn new(inner: R) -> Self {
        Self::with_delimiter(inner, b',')
    }

    /// Constructs a new `TabularReader` for input with a custom delimiter
    pub fn with_delimiter(inner: R, delimiter: u8) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(inner);
        Self {
            records: reader.into_records(),
            failed: false,
        }
    }
}

impl<R: Read> Iterator for TabularReader<R> {
    type Item = ImportResult<Row>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.records.next()? {
            Ok(record) => Some(Ok(Row::from(record))),
            Err(err) => {
                self.failed = true;
                Some(Err(err.into()))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ImportError;

    #[test]
    fn default_layout() {
        let layout = TabularLayout::default();
        assert!(layout.is_marker("##2024-06-04"));
        assert!(layout.is_marker("mondoCURIE"));
        assert!(!layout.is_marker("MONDO:0011584"));
        assert_eq!(layout.min_columns(), 4);
    }

    #[test]
    fn reads_all_rows() {
        let data = "##2024-06-04\nmondoCURIE,label\nMONDO:1,\"Foo, type 1\",x,HGNC:1\n";
        let rows: Vec<Row> = TabularReader::new(data.as_bytes())
            .collect::<ImportResult<_>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].field(0), Some("##2024-06-04"));
        assert_eq!(rows[1].fields().len(), 2);
        assert_eq!(rows[2].field(1), Some("Foo, type 1"));
        assert_eq!(rows[2].field(3), Some("HGNC:1"));
        assert_eq!(rows[2].line(), 3);
        assert!(rows[2].offset() > rows[1].offset());
    }

    #[test]
    fn custom_delimiter() {
        let data = "MONDO:1\tFoo\tx\tHGNC:1\n";
        let rows: Vec<Row> = TabularReader::with_delimiter(data.as_bytes(), b'\t')
            .collect::<ImportResult<_>>()
            .unwrap();
        assert_eq!(rows[0].field(3), Some("HGNC:1"));
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let data: &[u8] = b"MONDO:1,Foo\nMONDO:2,\xff\xfe\n";
        let mut reader = TabularReader::new(data);
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next(),
            Some(Err(ImportError::Parse { .. }))
        ));
        assert!(reader.next().is_none());
    }
}
