//! LCCN extraction from Library of Congress catalog pages.
//!
//! LC pages come in several layouts, so extraction is an ordered list of
//! strategies; the first one that yields a value wins:
//!   1. labeled item: `h3.item-title` == "LCCN", value in `span[dir=ltr]`
//!   2. permalink: `h3.item-title` containing "LCCN Permalink", digits from the href
//!   3. COinS: `rft.lccn=` inside the `span.Z3988` title attribute
//!   4. text scan: first 8+ digit run in any content `div` mentioning "LCCN"
//!
//! The text scan is a heuristic and can pick up unrelated long numbers.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static ITEMS_WRAPPER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.items-wrapper").unwrap());
static ITEM_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3.item-title").unwrap());
static ITEM_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.item-description").unwrap());
static LTR_SPAN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"span[dir="ltr"]"#).unwrap());
static PERMALINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a#permalink[href]").unwrap());
static COINS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.Z3988").unwrap());
static CONTENT_CONTAINER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.content-container").unwrap());
static DIV: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div").unwrap());
static RESULT_LIST: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.browseList").unwrap());
static FIRST_RESULT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.browse-result[href]").unwrap());

static PERMALINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lccn\.loc\.gov/(\d+)").unwrap());
static COINS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"rft\.lccn=(\d+)").unwrap());
static LONG_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{8,}\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LccnStrategy {
    LabeledItem,
    Permalink,
    Coins,
    TextScan,
}

impl LccnStrategy {
    pub const ORDER: [LccnStrategy; 4] = [
        LccnStrategy::LabeledItem,
        LccnStrategy::Permalink,
        LccnStrategy::Coins,
        LccnStrategy::TextScan,
    ];

    pub fn apply(self, doc: &Html) -> Option<String> {
        match self {
            LccnStrategy::LabeledItem => labeled_item(doc),
            LccnStrategy::Permalink => permalink(doc),
            LccnStrategy::Coins => coins(doc),
            LccnStrategy::TextScan => text_scan(doc),
        }
    }
}

/// Run the strategies in order and report which one matched.
pub fn extract_lccn(html: &str) -> Option<(LccnStrategy, String)> {
    let doc = Html::parse_document(html);
    LccnStrategy::ORDER
        .into_iter()
        .find_map(|strategy| strategy.apply(&doc).map(|lccn| (strategy, lccn)))
}

fn text_of(el: ElementRef) -> String {
    el.text().collect()
}

/// Wrappers whose first heading satisfies `heading`, paired with their description list.
fn labeled_items<'a>(
    doc: &'a Html,
    heading: impl Fn(&str) -> bool + 'a,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    doc.select(&ITEMS_WRAPPER).filter_map(move |wrapper| {
        let title = wrapper.select(&ITEM_TITLE).next()?;
        if !heading(&text_of(title)) {
            return None;
        }
        wrapper.select(&ITEM_DESCRIPTION).next()
    })
}

fn labeled_item(doc: &Html) -> Option<String> {
    labeled_items(doc, |h| h.trim() == "LCCN").find_map(|desc| {
        let span = desc.select(&LTR_SPAN).next()?;
        let value = text_of(span).trim().to_string();
        (!value.is_empty()).then_some(value)
    })
}

fn permalink(doc: &Html) -> Option<String> {
    labeled_items(doc, |h| h.contains("LCCN Permalink")).find_map(|desc| {
        let link = desc.select(&PERMALINK).next()?;
        let href = link.value().attr("href")?;
        PERMALINK_RE.captures(href).map(|c| c[1].to_string())
    })
}

fn coins(doc: &Html) -> Option<String> {
    let span = doc.select(&COINS).next()?;
    let title = span.value().attr("title")?;
    COINS_RE.captures(title).map(|c| c[1].to_string())
}

fn text_scan(doc: &Html) -> Option<String> {
    let container = doc.select(&CONTENT_CONTAINER).next()?;
    container.select(&DIV).find_map(|div| {
        let text = text_of(div);
        if !text.contains("LCCN") {
            return None;
        }
        LONG_DIGITS_RE.find(&text).map(|m| m.as_str().to_string())
    })
}

/// Shape of a title-search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPage {
    /// A result list; carries the first result's href when there is one.
    ResultList(Option<String>),
    /// The search landed directly on a record.
    Detail,
}

pub fn classify_search_page(html: &str) -> SearchPage {
    let doc = Html::parse_document(html);
    match doc.select(&RESULT_LIST).next() {
        Some(table) => SearchPage::ResultList(
            table
                .select(&FIRST_RESULT)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string),
        ),
        None => SearchPage::Detail,
    }
}
