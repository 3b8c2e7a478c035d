//! Stage 2: fill in missing LCCNs from the Library of Congress catalog, searching by
//! ISBN first and falling back to a title search.

pub mod lccn;

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::Endpoints;
use crate::error::{FetchError, PipelineError};
use crate::http::{HttpClient, RetryPolicy};
use crate::stats::ResolutionStats;
use crate::table::{read_resolved, write_rows, ResolutionRow, ResolvedRecord};
use crate::utils::clean_isbn;
use lccn::{classify_search_page, extract_lccn, SearchPage};

const REQUIRED_COLUMNS: &[&str] = &["Title", "ISBN", "LCCN"];

/// What happened to one record in stage 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// LCCN was already known; nothing fetched.
    AlreadyPresent,
    /// No ISBN to search with; nothing fetched.
    NoIsbn,
    FoundByIsbn(String),
    FoundByTitle(String),
    NotFound,
}

impl Resolution {
    pub fn lccn(&self) -> Option<&str> {
        match self {
            Resolution::FoundByIsbn(l) | Resolution::FoundByTitle(l) => Some(l),
            _ => None,
        }
    }

    /// Only records that reached a search are counted.
    fn tally(&self, stats: &mut ResolutionStats) {
        match self {
            Resolution::AlreadyPresent | Resolution::NoIsbn => return,
            Resolution::FoundByIsbn(_) => stats.isbn_hits += 1,
            Resolution::FoundByTitle(_) => stats.title_hits += 1,
            Resolution::NotFound => stats.failures += 1,
        }
        stats.lookups_required += 1;
    }
}

pub struct IdentifierResolver<'a> {
    client: &'a HttpClient,
    endpoints: &'a Endpoints,
    timeout: Duration,
    retry: RetryPolicy,
}

impl<'a> IdentifierResolver<'a> {
    pub fn new(
        client: &'a HttpClient,
        endpoints: &'a Endpoints,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        IdentifierResolver {
            client,
            endpoints,
            timeout,
            retry,
        }
    }

    pub async fn resolve(&self, record: &ResolvedRecord) -> Resolution {
        if !record.lccn.trim().is_empty() {
            return Resolution::AlreadyPresent;
        }
        if record.isbn.trim().is_empty() {
            return Resolution::NoIsbn;
        }

        info!("Searching by ISBN: {}", record.isbn);
        if let Some(lccn) = self.search_by_isbn(record.primary_isbn()).await {
            return Resolution::FoundByIsbn(lccn);
        }

        info!("ISBN search failed, trying title search...");
        match self.search_by_title(&record.title).await {
            Some(lccn) => Resolution::FoundByTitle(lccn),
            None => Resolution::NotFound,
        }
    }

    /// Identifier search keyed on the cleaned ISBN, retried on failure.
    pub async fn search_by_isbn(&self, isbn: &str) -> Option<String> {
        let key = clean_isbn(isbn);
        if key.is_empty() {
            return None;
        }
        let url = self.endpoints.search_url();
        let params = [
            ("searchArg1", key.as_str()),
            ("argType1", "all"),
            ("searchCode1", "KNUM"),
            ("searchType", "2"),
            ("combine2", "and"),
        ];
        let label = format!("ISBN search for {}", key);
        let body = match self
            .retry
            .run(&label, || self.client.get_text(&url, &params, self.timeout))
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!("{} gave up: {}", label, e);
                return None;
            }
        };
        extract_from(&body)
    }

    /// Free-text title search. Follows the first hit of a result list.
    pub async fn search_by_title(&self, title: &str) -> Option<String> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        match self.title_search_page(title).await {
            Ok(Some(body)) => extract_from(&body),
            Ok(None) => {
                debug!("Title search for '{}' listed no results", title);
                None
            }
            Err(e) => {
                warn!("Title search for '{}' failed: {}", title, e);
                None
            }
        }
    }

    /// The page to extract from: the detail page behind the first hit, or the
    /// search response itself when it already is a record.
    async fn title_search_page(&self, title: &str) -> Result<Option<String>, FetchError> {
        let url = self.endpoints.search_url();
        let params = [
            ("searchArg", title),
            ("searchCode", "GKEY^*"),
            ("searchType", "0"),
            ("recCount", "25"),
        ];
        let body = self.client.get_text(&url, &params, self.timeout).await?;

        match classify_search_page(&body) {
            SearchPage::Detail => Ok(Some(body)),
            SearchPage::ResultList(None) => Ok(None),
            SearchPage::ResultList(Some(href)) => {
                let detail_url = Url::parse(&self.endpoints.search_base)?.join(&href)?;
                debug!("Found first result, fetching details: {}", detail_url);
                let detail = self
                    .client
                    .get_text(detail_url.as_str(), &[], self.timeout)
                    .await?;
                Ok(Some(detail))
            }
        }
    }
}

fn extract_from(body: &str) -> Option<String> {
    let (strategy, lccn) = extract_lccn(body)?;
    debug!("LCCN {} extracted via {:?}", lccn, strategy);
    Some(lccn)
}

pub async fn run_stage(
    resolver: &IdentifierResolver<'_>,
    input: &Path,
    output: &Path,
    stats: &mut ResolutionStats,
) -> Result<(), PipelineError> {
    let records = read_resolved(input, REQUIRED_COLUMNS)?;
    let total = records.len();
    let mut rows = Vec::with_capacity(total);

    for (i, mut record) in records.into_iter().enumerate() {
        let resolution = resolver.resolve(&record).await;
        match &resolution {
            Resolution::AlreadyPresent => {
                info!("[{}/{}] Item already has LCCN: {}", i + 1, total, record.lccn)
            }
            Resolution::NoIsbn => info!(
                "[{}/{}] Item has no ISBN, skipping lookup: {}",
                i + 1,
                total,
                record.title
            ),
            Resolution::FoundByIsbn(lccn) | Resolution::FoundByTitle(lccn) => {
                info!("[{}/{}] Found LCCN {} for: {}", i + 1, total, lccn, record.title)
            }
            Resolution::NotFound => {
                warn!("[{}/{}] LCCN not found for: {}", i + 1, total, record.title)
            }
        }
        resolution.tally(stats);
        if let Some(lccn) = resolution.lccn() {
            record.lccn = lccn.to_string();
        }
        rows.push(ResolutionRow::from(&record));
    }

    write_rows(output, &rows)?;
    info!("Stage 2 results saved to {}", output.display());
    Ok(())
}
