//! Delimited output table.
//!
//! Values are comma-joined without quoting or escaping. The header line is
//! taken from the first row written; later rows must carry the same field
//! names in the same order.

use std::io::Write;
use thiserror::Error;

use crate::model::MetadataRow;

#[derive(Error, Debug)]
pub enum TableError {
    /// Row does not match the header already written
    #[error("Row schema differs from table header: expected {expected} fields, found {found} (first difference: {detail})")]
    SchemaMismatch {
        expected: usize,
        found: usize,
        detail: String,
    },

    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Single-owner writer for the harvested table.
pub struct TableWriter<W: Write> {
    writer: csv::Writer<W>,
    header: Option<Vec<String>>,
    rows_written: usize,
}

impl<W: Write> TableWriter<W> {
    pub fn new(inner: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(inner);
        Self {
            writer,
            header: None,
            rows_written: 0,
        }
    }

    /// Writes `row`, preceded by the header line if this is the first row,
    /// and flushes.
    ///
    /// # Errors
    ///
    /// [`TableError::SchemaMismatch`] if the row's fields differ from the
    /// header (nothing is written); `Csv`/`Io` if the sink fails.
    pub fn write_row(&mut self, row: &MetadataRow) -> Result<(), TableError> {
        match &self.header {
            Some(header) => Self::check_schema(header, row)?,
            None => {
                let names: Vec<String> = row.names().map(str::to_string).collect();
                self.writer.write_record(&names)?;
                self.header = Some(names);
            }
        }
        self.writer.write_record(row.rendered())?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    fn check_schema(header: &[String], row: &MetadataRow) -> Result<(), TableError> {
        let names: Vec<&str> = row.names().collect();
        if names.len() == header.len() && names.iter().zip(header).all(|(a, b)| *a == b.as_str()) {
            return Ok(());
        }
        let detail = header
            .iter()
            .map(String::as_str)
            .zip(names.iter().copied())
            .find(|(a, b)| a != b)
            .map(|(a, b)| format!("'{a}' vs '{b}'"))
            .unwrap_or_else(|| "length".to_string());
        Err(TableError::SchemaMismatch {
            expected: header.len(),
            found: names.len(),
            detail,
        })
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W, TableError> {
        self.writer
            .into_inner()
            .map_err(|e| TableError::Io(e.into_error()))
    }
}
