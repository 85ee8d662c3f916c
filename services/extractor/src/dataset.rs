//! Tabular input.
//!
//! A [`Dataset`] is a header plus rows of loosely typed cells. The pipeline
//! only reads three columns; everything else is carried along untouched.

use crate::payload::RawPayload;
use std::path::Path;
use thiserror::Error;

pub const DATA_COLUMN: &str = "data";
pub const SECS_COLUMN: &str = "header.stamp.secs";
pub const NSECS_COLUMN: &str = "header.stamp.nsecs";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Row {row} has {found} fields, header has {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
}

/// One cell of the input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Bytes(Vec<u8>),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Integer(value)
    }
}

impl From<Vec<u8>> for Cell {
    fn from(value: Vec<u8>) -> Self {
        Cell::Bytes(value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    columns: Vec<String>,
    records: Vec<Vec<Cell>>,
}

impl Dataset {
    /// Build a dataset from in-memory rows. Every row must match the header width.
    pub fn from_records(
        columns: Vec<String>,
        records: Vec<Vec<Cell>>,
    ) -> Result<Self, DatasetError> {
        if let Some((row, record)) = records
            .iter()
            .enumerate()
            .find(|(_, record)| record.len() != columns.len())
        {
            return Err(DatasetError::RaggedRow {
                row,
                found: record.len(),
                expected: columns.len(),
            });
        }

        Ok(Self { columns, records })
    }

    /// Read a headered CSV export. Empty fields become [`Cell::Null`].
    ///
    /// Records shorter than the header are padded with nulls. Longer records
    /// are kept whole and reported through [`Row::extra_fields`], so a single
    /// malformed line only affects its own row.
    pub fn from_csv_path(path: &Path) -> Result<Self, DatasetError> {
        let read_err = |source: csv::Error| DatasetError::Read {
            path: path.display().to_string(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(read_err)?;

        let columns: Vec<String> = reader
            .headers()
            .map_err(read_err)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(read_err)?;
            let mut cells: Vec<Cell> = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Cell::Null
                    } else {
                        Cell::Text(field.to_string())
                    }
                })
                .collect();
            if cells.len() < columns.len() {
                cells.resize(columns.len(), Cell::Null);
            }
            records.push(cells);
        }

        Ok(Self { columns, records })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows in dataset order, each tagged with its zero-based index.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.records.iter().enumerate().map(move |(index, cells)| Row {
            index: index as u64,
            columns: &self.columns,
            cells,
        })
    }
}

/// Borrowed view of one record.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub index: u64,
    columns: &'a [String],
    cells: &'a [Cell],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Cell> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.cells.get(i))
    }

    /// The `data` field as a payload; `None` when absent or empty.
    pub fn payload(&self) -> Option<RawPayload> {
        match self.get(DATA_COLUMN)? {
            Cell::Null => None,
            Cell::Text(text) => Some(RawPayload::TextualLiteral(text.clone())),
            Cell::Bytes(bytes) => Some(RawPayload::RawBytes(bytes.clone())),
            Cell::Integer(value) => Some(RawPayload::TextualLiteral(value.to_string())),
        }
    }

    pub fn secs(&self) -> Option<&'a Cell> {
        self.get(SECS_COLUMN)
    }

    pub fn nsecs(&self) -> Option<&'a Cell> {
        self.get(NSECS_COLUMN)
    }

    /// Fields past the header width; non-zero means the record is malformed
    pub fn extra_fields(&self) -> usize {
        self.cells.len().saturating_sub(self.columns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_csv_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Time,header.stamp.secs,header.stamp.nsecs,format,data").unwrap();
        writeln!(file, "1.5,1700000000,500000,png,\"b'\\x89PNG'\"").unwrap();
        writeln!(file, "1.6,1700000001,,png,\"b'a,b'\"").unwrap();
        file.flush().unwrap();

        let dataset = Dataset::from_csv_path(file.path()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.has_column(DATA_COLUMN));

        let rows: Vec<Row> = dataset.rows().collect();
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[1].index, 1);
        assert_eq!(
            rows[0].payload(),
            Some(RawPayload::TextualLiteral("b'\\x89PNG'".to_string()))
        );
        assert_eq!(rows[0].secs(), Some(&Cell::Text("1700000000".to_string())));
        assert_eq!(rows[1].nsecs(), Some(&Cell::Null));
        assert_eq!(
            rows[1].payload(),
            Some(RawPayload::TextualLiteral("b'a,b'".to_string()))
        );
    }

    #[test]
    fn test_from_csv_path_missing_file() {
        let err = Dataset::from_csv_path(Path::new("/nonexistent/images.csv")).unwrap_err();
        assert!(matches!(err, DatasetError::Read { .. }));
    }

    #[test]
    fn test_from_csv_path_pads_short_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "header.stamp.secs,header.stamp.nsecs,data").unwrap();
        writeln!(file, "1,0,b'a'").unwrap();
        writeln!(file, "2,0").unwrap();
        writeln!(file, "3,0,b'c'").unwrap();
        file.flush().unwrap();

        let dataset = Dataset::from_csv_path(file.path()).unwrap();
        assert_eq!(dataset.len(), 3);

        let rows: Vec<Row> = dataset.rows().collect();
        assert_eq!(rows[1].secs(), Some(&Cell::Text("2".to_string())));
        assert_eq!(rows[1].payload(), None);
        assert_eq!(rows[1].extra_fields(), 0);
        assert_eq!(
            rows[2].payload(),
            Some(RawPayload::TextualLiteral("b'c'".to_string()))
        );
    }

    #[test]
    fn test_from_csv_path_keeps_long_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "data,header.stamp.secs").unwrap();
        writeln!(file, "b'x',1,extra").unwrap();
        writeln!(file, "b'y',2").unwrap();
        file.flush().unwrap();

        let dataset = Dataset::from_csv_path(file.path()).unwrap();
        let rows: Vec<Row> = dataset.rows().collect();

        assert_eq!(rows[0].extra_fields(), 1);
        assert_eq!(rows[0].secs(), Some(&Cell::Text("1".to_string())));
        assert_eq!(rows[1].extra_fields(), 0);
    }

    #[test]
    fn test_from_records_checks_width() {
        let err = Dataset::from_records(
            columns(&["data", "header.stamp.secs"]),
            vec![vec![Cell::from("b''")]],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            DatasetError::RaggedRow {
                row: 0,
                found: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn test_row_payload_variants() {
        let dataset = Dataset::from_records(
            columns(&["data"]),
            vec![
                vec![Cell::from(vec![1u8, 2, 3])],
                vec![Cell::Null],
                vec![Cell::from("[1, 2]")],
            ],
        )
        .unwrap();

        let payloads: Vec<Option<RawPayload>> = dataset.rows().map(|r| r.payload()).collect();
        assert_eq!(
            payloads,
            vec![
                Some(RawPayload::RawBytes(vec![1, 2, 3])),
                None,
                Some(RawPayload::TextualLiteral("[1, 2]".to_string())),
            ]
        );
    }

    #[test]
    fn test_row_without_data_column() {
        let dataset =
            Dataset::from_records(columns(&["header.stamp.secs"]), vec![vec![Cell::from(1i64)]])
                .unwrap();

        assert!(!dataset.has_column(DATA_COLUMN));
        assert_eq!(dataset.rows().next().unwrap().payload(), None);
    }
}
