//! Stage 3: fetch each record's MARCXML and pull out its 505 contents note.

pub mod xml;

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::config::Endpoints;
use crate::error::{ParseError, PipelineError};
use crate::http::HttpClient;
use crate::stats::NoteStats;
use crate::table::{read_resolved, write_rows, NoteRow, ResolvedRecord};
use crate::utils::{file_safe, progress_bar};
use xml::{find_fields, find_subfields, parse_document, MARC21_NS};

const REQUIRED_COLUMNS: &[&str] = &["Title", "LCCN"];
const CONTENTS_TAG: &str = "505";
const CONTENT_CODES: [&str; 4] = ["a", "g", "t", "r"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteStatus {
    NoLccn,
    FetchFailed,
    FieldAbsent,
    FieldEmpty,
    Found,
}

impl NoteStatus {
    pub fn label(self) -> &'static str {
        match self {
            NoteStatus::NoLccn => "No LCCN available",
            NoteStatus::FetchFailed => "Page not found or error",
            NoteStatus::FieldAbsent => "No 505 tag found",
            NoteStatus::FieldEmpty => "Empty 505 tag",
            NoteStatus::Found => "Found",
        }
    }
}

/// Stage-3 outcome. Content is non-empty exactly when the status is `Found`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteResult {
    status: NoteStatus,
    content: String,
}

impl NoteResult {
    fn without_content(status: NoteStatus) -> Self {
        NoteResult {
            status,
            content: String::new(),
        }
    }

    fn from_extracted(extracted: Option<String>) -> Self {
        match extracted {
            None => Self::without_content(NoteStatus::FieldAbsent),
            Some(content) if content.is_empty() => Self::without_content(NoteStatus::FieldEmpty),
            Some(content) => NoteResult {
                status: NoteStatus::Found,
                content,
            },
        }
    }

    pub fn status(&self) -> NoteStatus {
        self.status
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// The 505 contents note of a MARCXML document.
///
/// `None` when no 505 field exists, an empty string when fields exist but carry
/// no `a`/`g`/`t`/`r` text. Fields are joined with newlines, subfields with spaces.
pub fn extract_contents_note(document: &str) -> Result<Option<String>, ParseError> {
    let root = parse_document(document)?;
    let ns = root.namespace.as_deref().unwrap_or(MARC21_NS);
    debug!("Root <{}> in namespace {:?}", root.name, root.namespace);

    let Some((lookup, fields)) = find_fields(&root, CONTENTS_TAG) else {
        return Ok(None);
    };
    debug!("{} field(s) tagged {} via {:?}", fields.len(), CONTENTS_TAG, lookup);

    let notes: Vec<String> = fields
        .into_iter()
        .map(|field| {
            find_subfields(field, ns)
                .into_iter()
                .filter(|sub| sub.attr("code").is_some_and(|c| CONTENT_CODES.contains(&c)))
                .map(|sub| sub.text.trim())
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|note| !note.is_empty())
        .collect();
    Ok(Some(notes.join("\n")))
}

pub struct NoteFetcher<'a> {
    client: &'a HttpClient,
    endpoints: &'a Endpoints,
    timeout: Duration,
    debug_dir: Option<PathBuf>,
}

impl<'a> NoteFetcher<'a> {
    pub fn new(client: &'a HttpClient, endpoints: &'a Endpoints, timeout: Duration) -> Self {
        NoteFetcher {
            client,
            endpoints,
            timeout,
            debug_dir: None,
        }
    }

    /// Save every fetched document under `dir`, named by its LCCN.
    pub fn with_debug_dir(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    async fn fetch_document(&self, lccn: &str) -> Option<String> {
        let url = self.endpoints.marcxml_url(lccn);
        match self.client.get(&url, &[], self.timeout).await {
            Ok((status, body)) if status == StatusCode::OK => Some(body),
            Ok((status, _)) => {
                debug!("HTTP status {} for {}", status, url);
                None
            }
            Err(e) => {
                warn!("Error fetching MARCXML for LCCN {}: {}", lccn, e);
                None
            }
        }
    }

    fn save_debug_copy(&self, lccn: &str, document: &str) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        let path = dir.join(format!("{}.xml", file_safe(lccn)));
        let saved = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, document));
        match saved {
            Ok(()) => debug!("Saved raw XML to {}", path.display()),
            Err(e) => warn!("Could not save raw XML to {}: {}", path.display(), e),
        }
    }

    /// Resolve one record's contents note and count the outcome.
    pub async fn retrieve(&self, record: &ResolvedRecord, stats: &mut NoteStats) -> NoteResult {
        let lccn = record.primary_lccn();
        if lccn.is_empty() {
            stats.no_lccn += 1;
            return NoteResult::without_content(NoteStatus::NoLccn);
        }

        let Some(document) = self.fetch_document(lccn).await else {
            stats.missing += 1;
            return NoteResult::without_content(NoteStatus::FetchFailed);
        };
        debug!("Retrieved MARCXML for {} ({} bytes)", lccn, document.len());
        self.save_debug_copy(lccn, &document);

        let result = match extract_contents_note(&document) {
            Ok(extracted) => NoteResult::from_extracted(extracted),
            Err(e) => {
                warn!("Error extracting 505 field for {}: {}", lccn, e);
                stats.parse_errors += 1;
                NoteResult::without_content(NoteStatus::FieldAbsent)
            }
        };
        match result.status() {
            NoteStatus::Found => stats.found += 1,
            NoteStatus::FieldEmpty => stats.empty += 1,
            _ => stats.missing += 1,
        }
        result
    }
}

pub async fn run_stage(
    fetcher: &NoteFetcher<'_>,
    input: &Path,
    output: &Path,
    stats: &mut NoteStats,
) -> Result<(), PipelineError> {
    let records = read_resolved(input, REQUIRED_COLUMNS)?;
    if records.is_empty() {
        return Err(PipelineError::EmptyInput(input.to_path_buf()));
    }
    stats.total = records.len();
    info!("Found {} entries to process for 505 field retrieval", records.len());

    let pb = progress_bar(records.len(), "Retrieving 505 fields");
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let result = fetcher.retrieve(&record, stats).await;
        let status = result.status().label();
        debug!("{} ({}): {}", record.title, record.lccn, status);
        rows.push(NoteRow {
            bib_id: record.record_id,
            title: record.title,
            isbn: record.isbn,
            lccn: record.lccn,
            status,
            content_505: result.content().to_string(),
        });
        pb.inc(1);
    }
    pb.finish_and_clear();

    write_rows(output, &rows)?;
    info!("Stage 3 results saved to {}", output.display());
    Ok(())
}
