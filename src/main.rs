mod catalog;
mod config;
mod error;
mod http;
mod lookup;
mod marc;
mod pipeline;
mod records;
mod stats;
mod table;
mod utils;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error};

use crate::config::{Endpoints, Settings, StageSkips};
use crate::pipeline::{Pipeline, Stage};

#[derive(Parser)]
#[command(
    name = "toc_scraper",
    about = "Resolve ISBNs, LCCNs and 505 contents notes for a catalog export"
)]
struct Cli {
    /// Input CSV exported from the local catalog
    #[arg(short, long)]
    input: PathBuf,

    /// Final CSV with the 505 contents notes
    #[arg(short, long)]
    output: PathBuf,

    /// Skip scraping the local catalog
    #[arg(long)]
    skip_stage1: bool,

    /// Skip the LC lookup of missing LCCNs
    #[arg(long)]
    skip_stage2: bool,

    /// Skip retrieving 505 fields
    #[arg(long)]
    skip_stage3: bool,

    /// Seconds between requests
    #[arg(short, long, default_value = "1.0", value_parser = parse_delay)]
    delay: Duration,

    /// Attempts per ISBN search
    #[arg(short = 'r', long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    max_retries: u32,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Save raw MARCXML under temp/debug_xml
    #[arg(long)]
    debug: bool,

    /// Remove intermediate tables after a successful run
    #[arg(long)]
    clean_temp: bool,
}

fn parse_delay(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("delay must be a non-negative number of seconds, got {}", raw))
}

impl Cli {
    fn into_settings(self, endpoints: Endpoints) -> Settings {
        let mut settings = Settings::new(self.input, self.output);
        settings.skips = StageSkips {
            stage1: self.skip_stage1,
            stage2: self.skip_stage2,
            stage3: self.skip_stage3,
        };
        settings.delay = self.delay;
        settings.max_retries = self.max_retries;
        settings.debug = self.debug;
        settings.clean_temp = self.clean_temp;
        settings.endpoints = endpoints;
        settings
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let endpoints = Endpoints::from_env().context("Failed to read endpoint overrides")?;
    let mut pipeline = Pipeline::new(cli.into_settings(endpoints))?;
    debug!("Intermediate tables under {}", pipeline.paths().temp_dir.display());

    let outcome = pipeline.run().await;
    for stage in Stage::ALL {
        debug!("{}: {:?}", stage, pipeline.stage_state(stage));
    }
    debug!("Run finished as {:?}", pipeline.state());
    outcome?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["toc_scraper", "-i", "in.csv", "-o", "out.csv"]);
        let settings = cli.into_settings(Endpoints::default());
        assert_eq!(settings.delay, Duration::from_secs(1));
        assert_eq!(settings.max_retries, 3);
        assert!(!settings.skips.stage1 && !settings.skips.stage2 && !settings.skips.stage3);
    }

    #[test]
    fn invalid_numbers_rejected() {
        assert!(Cli::try_parse_from(["t", "-i", "a", "-o", "b", "-d", "-1"]).is_err());
        assert!(Cli::try_parse_from(["t", "-i", "a", "-o", "b", "-r", "0"]).is_err());
        assert!(Cli::try_parse_from(["t", "-i", "a", "-o", "b", "-d", "1e20"]).is_err());
        assert!(Cli::try_parse_from(["t", "-i", "a", "-o", "b", "--delay=NaN"]).is_err());
        let cli = Cli::try_parse_from(["t", "-i", "a", "-o", "b", "-d", "0.25", "--skip-stage2"]).unwrap();
        assert_eq!(cli.delay, Duration::from_millis(250));
        assert!(cli.skip_stage2);
    }
}
