use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::PipelineError;

const DEFAULT_CATALOG_BASE: &str = "https://islandpines.roblib.upei.ca";
const DEFAULT_SEARCH_BASE: &str = "https://catalog.loc.gov";
const DEFAULT_RECORD_BASE: &str = "https://lccn.loc.gov";

/// Hosts of the three external sources. Overridable through `TOC_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_catalog_base")]
    pub catalog_base: String,
    #[serde(default = "default_search_base")]
    pub search_base: String,
    #[serde(default = "default_record_base")]
    pub record_base: String,
}

fn default_catalog_base() -> String {
    DEFAULT_CATALOG_BASE.to_string()
}

fn default_search_base() -> String {
    DEFAULT_SEARCH_BASE.to_string()
}

fn default_record_base() -> String {
    DEFAULT_RECORD_BASE.to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            catalog_base: default_catalog_base(),
            search_base: default_search_base(),
            record_base: default_record_base(),
        }
    }
}

impl Endpoints {
    pub fn from_env() -> Result<Self, PipelineError> {
        let endpoints: Endpoints = Config::builder()
            .add_source(Environment::with_prefix("TOC"))
            .build()?
            .try_deserialize()?;
        Ok(endpoints)
    }

    /// Catalog detail page with the expanded MARC view.
    pub fn catalog_record_url(&self, record_id: &str) -> String {
        format!(
            "{}/eg/opac/record/{}?expand=marchtml",
            self.catalog_base.trim_end_matches('/'),
            record_id
        )
    }

    pub fn search_url(&self) -> String {
        format!("{}/vwebv/search", self.search_base.trim_end_matches('/'))
    }

    pub fn marcxml_url(&self, lccn: &str) -> String {
        format!("{}/{}/marcxml", self.record_base.trim_end_matches('/'), lccn)
    }
}

/// Per-fetch-type request timeouts.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub catalog_page: Duration,
    pub search: Duration,
    pub record: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            catalog_page: Duration::from_secs(10),
            search: Duration::from_secs(30),
            record: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageSkips {
    pub stage1: bool,
    pub stage2: bool,
    pub stage3: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub input: PathBuf,
    pub output: PathBuf,
    pub skips: StageSkips,
    pub delay: Duration,
    pub max_retries: u32,
    pub debug: bool,
    pub clean_temp: bool,
    pub endpoints: Endpoints,
    pub timeouts: Timeouts,
}

impl Settings {
    /// Settings with default endpoints and timeouts, nothing skipped.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Settings {
            input: input.into(),
            output: output.into(),
            skips: StageSkips::default(),
            delay: Duration::from_secs(1),
            max_retries: 3,
            debug: false,
            clean_temp: false,
            endpoints: Endpoints::default(),
            timeouts: Timeouts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_templates() {
        let e = Endpoints::default();
        assert_eq!(
            e.catalog_record_url("12345"),
            "https://islandpines.roblib.upei.ca/eg/opac/record/12345?expand=marchtml"
        );
        assert_eq!(e.search_url(), "https://catalog.loc.gov/vwebv/search");
        assert_eq!(e.marcxml_url("2001012345"), "https://lccn.loc.gov/2001012345/marcxml");
    }

    #[test]
    fn trailing_slash_on_base() {
        let e = Endpoints {
            record_base: "http://127.0.0.1:9000/".to_string(),
            ..Endpoints::default()
        };
        assert_eq!(e.marcxml_url("1"), "http://127.0.0.1:9000/1/marcxml");
    }

    #[test]
    fn config_errors_keep_their_source() {
        let err: PipelineError = config::ConfigError::Message("bad TOC_SEARCH_BASE".into()).into();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Invalid configuration: bad TOC_SEARCH_BASE");
    }
}
