//! Common helpers shared across stages.

use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::sync::LazyLock;

static DIGIT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static NON_ISBN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9X]").unwrap());

/// Delimiter used when a cell carries several identifiers.
pub const VALUE_DELIMITER: &str = "; ";

/// First contiguous run of ASCII digits, if any.
pub fn first_digit_run(text: &str) -> Option<&str> {
    DIGIT_RUN_RE.find(text).map(|m| m.as_str())
}

/// Keep only digits and `X`.
pub fn clean_isbn(raw: &str) -> String {
    NON_ISBN_RE.replace_all(raw, "").into_owned()
}

pub fn join_values(values: &[String]) -> String {
    values.join(VALUE_DELIMITER)
}

/// First non-empty entry of a delimiter-joined cell.
pub fn primary_value(cell: &str) -> &str {
    cell.split(';')
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or("")
}

/// Make a value safe to use as a file name.
pub fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Record-loop progress bar on stderr.
pub fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(message);
    pb
}
