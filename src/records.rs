//! Input table loader: one `CatalogRecord` per usable row.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::utils::first_digit_run;

/// Header marker of the identifier column (case-sensitive).
pub const ID_COLUMN_MARKER: &str = "BibID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub record_id: String,
    pub title: String,
}

pub fn load_records(path: &Path) -> Result<Vec<CatalogRecord>, PipelineError> {
    info!("Parsing input table: {}", path.display());
    let file = File::open(path)?;
    let records = parse_records(file)?;
    if records.is_empty() {
        return Err(PipelineError::EmptyInput(path.to_path_buf()));
    }
    info!("Found {} records to process", records.len());
    Ok(records)
}

pub fn parse_records<R: Read>(input: R) -> Result<Vec<CatalogRecord>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(input);
    let headers = reader.headers()?.clone();
    let (id_col, title_col) = locate_columns(&headers)?;
    let needed = id_col.max(title_col);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.len() <= needed {
            debug!("Skipping short row: {:?}", row);
            continue;
        }
        let raw_id = row.get(id_col).unwrap_or_default().trim();
        if raw_id.is_empty() {
            continue;
        }
        // No digits: keep the raw identifier text.
        let record_id = first_digit_run(raw_id).unwrap_or(raw_id).to_string();
        let title = row.get(title_col).unwrap_or_default().trim().to_string();
        records.push(CatalogRecord { record_id, title });
    }
    Ok(records)
}

/// Identifier column: header containing the marker. Title column: any other header
/// containing "title" in any case. Later matches win.
fn locate_columns(headers: &StringRecord) -> Result<(usize, usize), PipelineError> {
    let mut id_col = None;
    let mut title_col = None;
    for (i, header) in headers.iter().enumerate() {
        if header.contains(ID_COLUMN_MARKER) {
            id_col = Some(i);
        } else if header.to_lowercase().contains("title") {
            title_col = Some(i);
        }
    }
    match (id_col, title_col) {
        (Some(id), Some(title)) => Ok((id, title)),
        _ => Err(PipelineError::Schema(format!(
            "could not find {} and/or title columns",
            ID_COLUMN_MARKER
        ))),
    }
}
