//! Single-pass column type inference over a row stream.

use super::lattice::{narrow, DateLayout};
use super::{AggregationFn, ColumnSchema, DataType, IngestError};
use crate::source::RowSource;

/// Per-column state of one inference pass.
///
/// A column is `settled` once a non-empty value failed every richer type; it
/// stays `String` for the rest of the pass. Columns start unsettled on every
/// pass, including columns loaded from a previous schema.
#[derive(Debug)]
pub struct SchemaInferencer {
    columns: Vec<ColumnSchema>,
    layouts: Vec<Option<&'static DateLayout>>,
    settled: Vec<bool>,
    rows_scanned: usize,
}

impl SchemaInferencer {
    /// Start a pass from the header row and the dataset's current schema.
    ///
    /// An empty `existing` schema is seeded from the header. Otherwise the
    /// header text is ignored: positions are authoritative, so only the field
    /// count is checked.
    pub fn new(header: &[String], existing: Vec<ColumnSchema>) -> Result<Self, IngestError> {
        let columns = if existing.is_empty() {
            header
                .iter()
                .enumerate()
                .map(|(i, h)| ColumnSchema::seeded(i, h))
                .collect::<Vec<_>>()
        } else if existing.len() != header.len() {
            return Err(IngestError::SchemaMismatch(format!(
                "file has {} columns but the dataset schema has {}",
                header.len(),
                existing.len()
            )));
        } else {
            existing
        };

        let layouts = columns
            .iter()
            .map(|c| match c.data_type {
                DataType::Date => c.date_format.as_deref().and_then(DateLayout::lookup),
                _ => None,
            })
            .collect();
        let settled = vec![false; columns.len()];

        Ok(Self {
            columns,
            layouts,
            settled,
            rows_scanned: 0,
        })
    }

    /// Narrow every column by one data row.
    pub fn observe(&mut self, row: &[String]) -> Result<(), IngestError> {
        self.rows_scanned += 1;
        if row.len() != self.columns.len() {
            return Err(IngestError::SchemaMismatch(format!(
                "record {} has {} fields, expected {}",
                self.rows_scanned,
                row.len(),
                self.columns.len()
            )));
        }

        for (i, value) in row.iter().enumerate() {
            let column = &mut self.columns[i];
            if !self.settled[i] {
                let (data_type, layout) = narrow(value, column.data_type, self.layouts[i]);
                if data_type == DataType::String && !value.is_empty() {
                    self.settled[i] = true;
                }
                column.data_type = data_type;
                column.date_format = layout.map(|l| l.as_str().to_string());
                self.layouts[i] = layout;
            }
            column.aggregation_fn = AggregationFn::for_type(column.data_type);
        }
        Ok(())
    }

    pub fn rows_scanned(&self) -> usize {
        self.rows_scanned
    }

    pub fn finish(self) -> Vec<ColumnSchema> {
        self.columns
    }
}

/// Infer the schema of a whole row stream.
///
/// The stream is consumed to the end unless a row fails. A missing or unreadable header is
/// a `SchemaMismatch`; a failed read after the header is a `ReadError`.
pub fn infer_schema(
    source: &mut dyn RowSource,
    existing: Vec<ColumnSchema>,
) -> Result<(Vec<ColumnSchema>, usize), IngestError> {
    let header = match source.read_header() {
        Ok(Some(header)) => header,
        Ok(None) => {
            return Err(IngestError::SchemaMismatch(
                "end of input reached before the header row".to_string(),
            ))
        }
        Err(e) => {
            return Err(IngestError::SchemaMismatch(format!(
                "header row could not be read: {:#}",
                e
            )))
        }
    };

    let mut inferencer = SchemaInferencer::new(&header, existing)?;
    loop {
        match source.read_row() {
            Ok(Some(row)) => inferencer.observe(&row)?,
            Ok(None) => break,
            Err(e) => {
                return Err(IngestError::ReadError(format!(
                    "record {}: {:#}",
                    inferencer.rows_scanned() + 1,
                    e
                )))
            }
        }
    }

    let rows = inferencer.rows_scanned();
    Ok((inferencer.finish(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryRowSource;

    fn infer(rows: Vec<Vec<&str>>) -> Vec<ColumnSchema> {
        let mut source = MemoryRowSource::new(rows);
        infer_schema(&mut source, vec![]).unwrap().0
    }

    #[test]
    fn test_int_and_string_columns() {
        let cols = infer(vec![vec!["a", "b"], vec!["1", "3.5"], vec!["2", "x"]]);

        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].name, "0");
        assert_eq!(cols[0].raw_sample, "a");
        assert_eq!(cols[0].data_type, DataType::Int);
        assert_eq!(cols[0].aggregation_fn, AggregationFn::Sum);
        assert_eq!(cols[1].name, "1");
        assert_eq!(cols[1].data_type, DataType::String);
        assert_eq!(cols[1].aggregation_fn, AggregationFn::Count);
    }

    #[test]
    fn test_date_column_and_collapse() {
        let cols = infer(vec![vec!["d"], vec!["2006-Jan-02"], vec!["2006-Jan-02"]]);
        assert_eq!(cols[0].data_type, DataType::Date);
        assert_eq!(cols[0].date_format.as_deref(), Some("2006-Jan-02"));
        assert_eq!(cols[0].aggregation_fn, AggregationFn::Count);

        let cols = infer(vec![
            vec!["d"],
            vec!["2006-Jan-02"],
            vec!["2006-Jan-02"],
            vec!["not-a-date"],
        ]);
        assert_eq!(cols[0].data_type, DataType::String);
        assert_eq!(cols[0].date_format, None);
    }

    #[test]
    fn test_collapsed_column_stays_string() {
        let cols = infer(vec![vec!["v"], vec!["1"], vec!["oops"], vec!["2"], vec!["3"]]);
        assert_eq!(cols[0].data_type, DataType::String);
        assert_eq!(cols[0].aggregation_fn, AggregationFn::Count);
    }

    #[test]
    fn test_missing_values_do_not_falsify() {
        let cols = infer(vec![vec!["v", "w"], vec!["", "4"], vec!["5", ""], vec!["6", "4.5"]]);
        assert_eq!(cols[0].data_type, DataType::Int);
        assert_eq!(cols[1].data_type, DataType::Float);
    }

    #[test]
    fn test_header_only_keeps_seeded_schema() {
        let cols = infer(vec![vec!["a", "b", "c"]]);
        assert_eq!(cols.len(), 3);
        assert!(cols.iter().all(|c| c.data_type == DataType::String));
        let uids: std::collections::HashSet<_> = cols.iter().map(|c| &c.uid).collect();
        assert_eq!(uids.len(), 3);
    }

    #[test]
    fn test_existing_schema_keeps_identity() {
        let first = infer(vec![vec!["a", "b"], vec!["1", "x"]]);
        let mut source =
            MemoryRowSource::new(vec![vec!["renamed", "other"], vec!["2.5", "y"]]);
        let (refined, rows) = infer_schema(&mut source, first.clone()).unwrap();

        assert_eq!(rows, 1);
        assert_eq!(refined[0].uid, first[0].uid);
        assert_eq!(refined[1].uid, first[1].uid);
        // Header text is not authoritative once a schema exists.
        assert_eq!(refined[0].raw_sample, "a");
        assert_eq!(refined[0].data_type, DataType::Float);
    }

    #[test]
    fn test_existing_date_layout_is_enforced() {
        let first = infer(vec![vec!["d"], vec!["2006-Jan-02"]]);
        assert_eq!(first[0].date_format.as_deref(), Some("2006-Jan-02"));

        // A valid date in another layout does not satisfy the matched one.
        let mut source = MemoryRowSource::new(vec![vec!["d"], vec!["1/2/2006"]]);
        let (refined, _) = infer_schema(&mut source, first).unwrap();
        assert_eq!(refined[0].data_type, DataType::String);
    }

    #[test]
    fn test_existing_schema_width_mismatch() {
        let first = infer(vec![vec!["a", "b"], vec!["1", "2"]]);
        let mut source = MemoryRowSource::new(vec![vec!["a"], vec!["1"]]);
        let err = infer_schema(&mut source, first).unwrap_err();
        assert!(matches!(err, IngestError::SchemaMismatch(_)));
    }

    #[test]
    fn test_empty_input_is_schema_mismatch() {
        let mut source = MemoryRowSource::new(Vec::<Vec<&str>>::new());
        let err = infer_schema(&mut source, vec![]).unwrap_err();
        assert!(matches!(err, IngestError::SchemaMismatch(_)));
    }

    #[test]
    fn test_unreadable_header_is_schema_mismatch() {
        let mut source = MemoryRowSource::new(vec![vec!["a"]]).fail_at(0);
        let err = infer_schema(&mut source, vec![]).unwrap_err();
        assert!(matches!(err, IngestError::SchemaMismatch(_)));
    }

    #[test]
    fn test_row_read_failure_is_read_error() {
        let mut source =
            MemoryRowSource::new(vec![vec!["a"], vec!["1"], vec!["2"]]).fail_at(2);
        let err = infer_schema(&mut source, vec![]).unwrap_err();
        assert!(matches!(err, IngestError::ReadError(msg) if msg.starts_with("record 2")));
    }

    #[test]
    fn test_ragged_row_is_schema_mismatch() {
        let mut source = MemoryRowSource::new(vec![vec!["a", "b"], vec!["1"]]);
        let err = infer_schema(&mut source, vec![]).unwrap_err();
        assert!(matches!(err, IngestError::SchemaMismatch(_)));
    }
}
