use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Errors that abort a stage. Per-record problems never end up here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input file '{}' not found", .0.display())]
    MissingInput(PathBuf),
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("No valid records found in '{}'", .0.display())]
    EmptyInput(PathBuf),
    #[error("Table error: {0}")]
    Table(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// A single failed request. Recorded on the record it belongs to.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Malformed structured-record markup.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("unclosed element <{0}>")]
    Unclosed(String),
    #[error("document has no root element")]
    NoRoot,
}

/// The stage that halted the run, and why.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}
