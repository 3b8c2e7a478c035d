//! Stage 1: scrape ISBNs (020 $a) and LCCNs (010 $a) from the local catalog's
//! expanded MARC view.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::config::Endpoints;
use crate::error::PipelineError;
use crate::http::HttpClient;
use crate::records::{load_records, CatalogRecord};
use crate::stats::ExtractionStats;
use crate::table::{write_rows, ExtractionRow};
use crate::utils::{clean_isbn, join_values, progress_bar};

static TAG_COL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th.marc_tag_col").unwrap());
static SUBFIELDS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td.marc_subfields").unwrap());
static SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());

const ISBN_TAG: &str = "020";
const LCCN_TAG: &str = "010";

/// Identifiers in document order, duplicates kept.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractedIdentifiers {
    pub isbns: Vec<String>,
    pub lccns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Both,
    IsbnOnly,
    LccnOnly,
    Neither,
}

impl ExtractedIdentifiers {
    pub fn coverage(&self) -> Coverage {
        match (self.isbns.is_empty(), self.lccns.is_empty()) {
            (false, false) => Coverage::Both,
            (false, true) => Coverage::IsbnOnly,
            (true, false) => Coverage::LccnOnly,
            (true, true) => Coverage::Neither,
        }
    }
}

/// Outcome for one catalog record. A failed fetch leaves `ids` empty.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub record: CatalogRecord,
    pub ids: ExtractedIdentifiers,
    pub error: Option<String>,
}

impl From<ExtractionResult> for ExtractionRow {
    fn from(result: ExtractionResult) -> Self {
        ExtractionRow {
            bib_id: result.record.record_id,
            title: result.record.title,
            isbn: join_values(&result.ids.isbns),
            lccn: join_values(&result.ids.lccns),
            error: result.error.unwrap_or_default(),
        }
    }
}

pub fn extract_identifiers(html: &str) -> ExtractedIdentifiers {
    let doc = Html::parse_document(html);
    let mut ids = ExtractedIdentifiers::default();

    for tag_col in doc.select(&TAG_COL) {
        let tag: String = tag_col.text().collect();
        let tag = tag.trim();
        if tag != ISBN_TAG && tag != LCCN_TAG {
            continue;
        }
        let Some(row) = tag_col.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let Some(subfields) = row.select(&SUBFIELDS).next() else {
            continue;
        };

        for value in subfield_a_values(subfields) {
            if tag == ISBN_TAG {
                let isbn = clean_isbn(&value);
                if !isbn.is_empty() {
                    ids.isbns.push(isbn);
                }
            } else if let Some(lccn) = value.split_whitespace().next() {
                // "2017956176 /bsp" -> "2017956176"
                ids.lccns.push(lccn.to_string());
            }
        }
    }
    ids
}

/// Text node following each `$a` marker span.
fn subfield_a_values(subfields: ElementRef) -> Vec<String> {
    subfields
        .select(&SPAN)
        .filter(|span| span.text().collect::<String>().trim().ends_with('a'))
        .filter_map(|span| {
            let sibling = span.next_sibling()?;
            sibling.value().as_text().map(|t| t.trim().to_string())
        })
        .collect()
}

/// Fetch and parse one detail page. Never fails: errors land in `error`.
pub async fn scrape_record(
    client: &HttpClient,
    endpoints: &Endpoints,
    timeout: Duration,
    record: CatalogRecord,
) -> ExtractionResult {
    let url = endpoints.catalog_record_url(&record.record_id);
    match client.get_text(&url, &[], timeout).await {
        Ok(body) => {
            let ids = extract_identifiers(&body);
            debug!(
                "{}: {} ISBN(s), {} LCCN(s)",
                record.record_id,
                ids.isbns.len(),
                ids.lccns.len()
            );
            ExtractionResult {
                record,
                ids,
                error: None,
            }
        }
        Err(e) => {
            warn!("Error scraping {}: {}", record.record_id, e);
            ExtractionResult {
                record,
                ids: ExtractedIdentifiers::default(),
                error: Some(e.to_string()),
            }
        }
    }
}

fn tally(stats: &mut ExtractionStats, result: &ExtractionResult) {
    if result.error.is_some() {
        stats.errors += 1;
        return;
    }
    match result.ids.coverage() {
        Coverage::Both => stats.both += 1,
        Coverage::IsbnOnly => stats.isbn_only += 1,
        Coverage::LccnOnly => stats.lccn_only += 1,
        Coverage::Neither => stats.neither += 1,
    }
}

pub async fn run_stage(
    client: &HttpClient,
    endpoints: &Endpoints,
    timeout: Duration,
    input: &Path,
    output: &Path,
    stats: &mut ExtractionStats,
) -> Result<(), PipelineError> {
    let records = load_records(input)?;
    stats.total = records.len();

    let pb = progress_bar(records.len(), "Scraping catalog records");
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let result = scrape_record(client, endpoints, timeout, record).await;
        tally(stats, &result);
        rows.push(ExtractionRow::from(result));
        pb.inc(1);
    }
    pb.finish_and_clear();

    write_rows(output, &rows)?;
    info!("Stage 1 results saved to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn isbns_and_lccn_from_marc_view() {
        let ids = extract_identifiers(&fixture("catalog_record"));
        assert_eq!(ids.isbns, vec!["9780134685991", "013468599X"]);
        assert_eq!(ids.lccns, vec!["2017956176"]);
        assert_eq!(ids.coverage(), Coverage::Both);
    }

    #[test]
    fn record_without_identifiers() {
        let ids = extract_identifiers(&fixture("catalog_record_bare"));
        assert_eq!(ids, ExtractedIdentifiers::default());
        assert_eq!(ids.coverage(), Coverage::Neither);
    }

    #[test]
    fn marker_followed_by_element_is_ignored() {
        let html = r#"<table><tr><th class="marc_tag_col">020</th>
            <td class="marc_subfields"><span>&Dagger;a</span><b>0000</b></td></tr></table>"#;
        assert!(extract_identifiers(html).isbns.is_empty());
    }

    #[test]
    fn duplicates_are_kept_in_order() {
        let row = r#"<tr><th class="marc_tag_col">020</th><td class="marc_subfields"><span>&Dagger;a</span>111</td></tr>"#;
        let html = format!("<table>{row}{row}</table>");
        assert_eq!(extract_identifiers(&html).isbns, vec!["111", "111"]);
    }

    #[test]
    fn joined_row_values() {
        let result = ExtractionResult {
            record: CatalogRecord {
                record_id: "1".into(),
                title: "T".into(),
            },
            ids: ExtractedIdentifiers {
                isbns: vec!["1".into(), "2".into()],
                lccns: vec![],
            },
            error: None,
        };
        let row = ExtractionRow::from(result);
        assert_eq!(row.isbn, "1; 2");
        assert_eq!(row.lccn, "");
        assert_eq!(row.error, "");
    }

    #[tokio::test]
    async fn stage_records_errors_and_continues() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eg/opac/record/12345"))
            .and(query_param("expand", "marchtml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("catalog_record")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eg/opac/record/555"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("catalog_record_bare")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eg/opac/record/999"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("stage1.csv");
        std::fs::write(
            &input,
            "BibID,Title\n12345 copy 2,Effective Java\n999,Broken\n555,Local pamphlet\n",
        )
        .unwrap();

        let endpoints = Endpoints {
            catalog_base: server.uri(),
            ..Endpoints::default()
        };
        let client = HttpClient::new(Duration::ZERO).unwrap();
        let mut stats = ExtractionStats::default();
        run_stage(&client, &endpoints, Duration::from_secs(5), &input, &output, &mut stats)
            .await
            .unwrap();

        assert_eq!(
            stats,
            ExtractionStats {
                total: 3,
                isbn_only: 0,
                lccn_only: 0,
                both: 1,
                neither: 1,
                errors: 1,
            }
        );

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][0], "12345");
        assert_eq!(&rows[0][2], "9780134685991; 013468599X");
        assert_eq!(&rows[0][3], "2017956176");
        assert_eq!(&rows[1][0], "999");
        assert!(rows[1][4].contains("500"));
        assert_eq!(&rows[2][4], "");
    }
}
