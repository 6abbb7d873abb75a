//! Row sources and file formats the pipeline reads uploads through.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::fs::File;
use std::path::Path;

/// Forward-only, finite sequence of rows of string fields.
///
/// The first record is the header; `read_header` must be called once before
/// `read_row`. Both return `Ok(None)` at end of input.
pub trait RowSource: Send {
    fn read_header(&mut self) -> Result<Option<Vec<String>>>;
    fn read_row(&mut self) -> Result<Option<Vec<String>>>;
}

/// Outcome of a format validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Number of data records inspected (header excluded).
    pub records: usize,
    /// Row-level findings. Findings are reported, never fatal.
    pub findings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// A tabular file format the pipeline can validate and read.
///
/// Methods are blocking; callers on the async runtime run them through
/// `tokio::task::spawn_blocking`.
pub trait TabularFormat: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a file looks like this format, judged by its name.
    fn accepts(&self, path: &Path) -> bool;

    /// Inspect the whole file. `Err` means the validator could not run
    /// (I/O failure, unreadable file), not that the file has findings.
    fn validate(&self, path: &Path) -> Result<ValidationReport>;

    fn open(&self, path: &Path) -> Result<Box<dyn RowSource>>;
}

/// Comma separated files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFormat;

impl CsvFormat {
    pub fn new() -> Self {
        Self
    }

    fn reader(&self, path: &Path) -> Result<csv::Reader<File>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open '{}'", path.display()))
    }
}

impl TabularFormat for CsvFormat {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
    }

    fn validate(&self, path: &Path) -> Result<ValidationReport> {
        let mut reader = self.reader(path)?;
        let mut report = ValidationReport::default();
        let mut record = csv::StringRecord::new();
        let mut expected: Option<usize> = None;

        loop {
            match reader.read_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    let Some(width) = expected else {
                        expected = Some(record.len());
                        continue;
                    };
                    report.records += 1;
                    if record.len() != width {
                        report.findings.push(format!(
                            "Record #{} has error: wrong number of fields (expected {}, got {})",
                            report.records,
                            width,
                            record.len()
                        ));
                    }
                }
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to read '{}'", path.display())));
                }
                Err(e) => {
                    if expected.is_none() {
                        expected = Some(0);
                    } else {
                        report.records += 1;
                    }
                    report
                        .findings
                        .push(format!("Record #{} has error: {}", report.records, e));
                }
            }
        }

        Ok(report)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn RowSource>> {
        Ok(Box::new(CsvRowSource {
            reader: self.reader(path)?,
            record: csv::StringRecord::new(),
        }))
    }
}

/// Row source over a CSV reader.
pub struct CsvRowSource {
    reader: csv::Reader<File>,
    record: csv::StringRecord,
}

impl CsvRowSource {
    fn next_record(&mut self) -> Result<Option<Vec<String>>> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }
        Ok(Some(self.record.iter().map(str::to_string).collect()))
    }
}

impl RowSource for CsvRowSource {
    fn read_header(&mut self) -> Result<Option<Vec<String>>> {
        self.next_record()
    }

    fn read_row(&mut self) -> Result<Option<Vec<String>>> {
        self.next_record()
    }
}

/// In-memory row source. Can be told to fail at a given row.
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    rows: VecDeque<Vec<String>>,
    fail_at: Option<usize>,
    read: usize,
}

impl MemoryRowSource {
    /// The first row is the header.
    pub fn new<I, R, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(Into::into).collect())
                .collect(),
            fail_at: None,
            read: 0,
        }
    }

    /// Fail when the record at `index` (0 = header) is read.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    fn next_record(&mut self) -> Result<Option<Vec<String>>> {
        let index = self.read;
        self.read += 1;
        if self.fail_at == Some(index) {
            anyhow::bail!("simulated read failure at record {}", index);
        }
        Ok(self.rows.pop_front())
    }
}

impl RowSource for MemoryRowSource {
    fn read_header(&mut self) -> Result<Option<Vec<String>>> {
        self.next_record()
    }

    fn read_row(&mut self) -> Result<Option<Vec<String>>> {
        self.next_record()
    }
}
