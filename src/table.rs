//! Stage-to-stage CSV tables.

use std::fs::File;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::PipelineError;
use crate::utils::primary_value;

/// A record carried between stage 2 and stage 3. `isbn`/`lccn` hold the cell text,
/// which may be delimiter-joined when it came straight from stage 1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedRecord {
    pub record_id: String,
    pub title: String,
    pub isbn: String,
    pub lccn: String,
}

impl ResolvedRecord {
    pub fn primary_isbn(&self) -> &str {
        primary_value(&self.isbn)
    }

    pub fn primary_lccn(&self) -> &str {
        primary_value(&self.lccn)
    }
}

/// A serializable output row with a fixed header.
pub trait TableRow: Serialize {
    const HEADERS: &'static [&'static str];
}

#[derive(Debug, Serialize)]
pub struct ExtractionRow {
    pub bib_id: String,
    pub title: String,
    pub isbn: String,
    pub lccn: String,
    pub error: String,
}

impl TableRow for ExtractionRow {
    const HEADERS: &'static [&'static str] = &["BibID", "Title", "ISBN", "LCCN", "Error"];
}

#[derive(Debug, Serialize)]
pub struct ResolutionRow {
    pub bib_id: String,
    pub title: String,
    pub isbn: String,
    pub lccn: String,
}

impl TableRow for ResolutionRow {
    const HEADERS: &'static [&'static str] = &["BibID", "Title", "ISBN", "LCCN"];
}

impl From<&ResolvedRecord> for ResolutionRow {
    fn from(record: &ResolvedRecord) -> Self {
        ResolutionRow {
            bib_id: record.record_id.clone(),
            title: record.title.clone(),
            isbn: record.isbn.clone(),
            lccn: record.lccn.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NoteRow {
    pub bib_id: String,
    pub title: String,
    pub isbn: String,
    pub lccn: String,
    pub status: &'static str,
    pub content_505: String,
}

impl TableRow for NoteRow {
    const HEADERS: &'static [&'static str] =
        &["BibID", "Title", "ISBN", "LCCN", "Status", "Content_505"];
}

/// Write a header and all rows. The header is written even for an empty table.
pub fn write_rows<T: TableRow>(path: &Path, rows: &[T]) -> Result<(), PipelineError> {
    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.write_record(T::HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    debug!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Read an intermediate table. `required` headers must be present; `BibID`, `ISBN`
/// and `LCCN` default to empty when absent. Rows without a title are dropped.
pub fn read_resolved(path: &Path, required: &[&str]) -> Result<Vec<ResolvedRecord>, PipelineError> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(file);
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    for name in required {
        if column(name).is_none() {
            return Err(PipelineError::Schema(format!(
                "required column '{}' not found in {}",
                name,
                path.display()
            )));
        }
    }

    let bib_col = column("BibID");
    let title_col = column("Title");
    let isbn_col = column("ISBN");
    let lccn_col = column("LCCN");

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let row = row?;
        let cell = |col: Option<usize>| {
            col.and_then(|i| row.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let record = ResolvedRecord {
            record_id: cell(bib_col),
            title: cell(title_col),
            isbn: cell(isbn_col),
            lccn: cell(lccn_col),
        };
        if record.title.is_empty() {
            dropped += 1;
            continue;
        }
        records.push(record);
    }
    if dropped > 0 {
        debug!("Dropped {} rows without a title from {}", dropped, path.display());
    }
    Ok(records)
}
