//! Runs the three stages in order, threading each stage's output table into the next.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::catalog;
use crate::config::{Settings, StageSkips};
use crate::error::{PipelineError, StageFailure};
use crate::http::{HttpClient, RetryPolicy};
use crate::lookup::{self, IdentifierResolver};
use crate::marc::{self, NoteFetcher};
use crate::stats::RunStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Resolve,
    Notes,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Extract, Stage::Resolve, Stage::Notes];

    pub fn number(self) -> usize {
        match self {
            Stage::Extract => 1,
            Stage::Resolve => 2,
            Stage::Notes => 3,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Stage::Extract => "Extracting ISBNs/LCCNs from catalog",
            Stage::Resolve => "Looking up missing LCCNs from LC",
            Stage::Notes => "Retrieving 505 fields from LC",
        }
    }

    fn is_skipped(self, skips: &StageSkips) -> bool {
        match self {
            Stage::Extract => skips.stage1,
            Stage::Resolve => skips.stage2,
            Stage::Notes => skips.stage3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage {}", self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Done,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Complete,
    Failed(Stage),
}

/// Where a run keeps its intermediate tables.
#[derive(Debug, Clone)]
pub struct StagePaths {
    pub temp_dir: PathBuf,
    pub stage1: PathBuf,
    pub stage2: PathBuf,
    pub debug_dir: PathBuf,
}

impl StagePaths {
    /// `<output dir>/temp/<stem>_stage{1,2}.csv`
    pub fn for_output(output: &Path) -> Self {
        let temp_dir = output.parent().unwrap_or(Path::new("")).join("temp");
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        StagePaths {
            stage1: temp_dir.join(format!("{}_stage1.csv", stem)),
            stage2: temp_dir.join(format!("{}_stage2.csv", stem)),
            debug_dir: temp_dir.join("debug_xml"),
            temp_dir,
        }
    }

    /// Remove the intermediate tables, then the temp dir if it is empty.
    pub fn clean(&self) {
        for file in [&self.stage1, &self.stage2] {
            if file.exists() {
                if let Err(e) = std::fs::remove_file(file) {
                    warn!("Could not remove {}: {}", file.display(), e);
                }
            }
        }
        let _ = std::fs::remove_dir(&self.temp_dir);
    }
}

pub struct Pipeline {
    settings: Settings,
    paths: StagePaths,
    client: HttpClient,
    states: [StageState; 3],
    state: RunState,
    stats: RunStats,
}

impl Pipeline {
    /// Fails when the input table does not exist. Creates the temp directory.
    pub fn new(settings: Settings) -> Result<Self, PipelineError> {
        if !settings.input.exists() {
            return Err(PipelineError::MissingInput(settings.input.clone()));
        }
        let paths = StagePaths::for_output(&settings.output);
        std::fs::create_dir_all(&paths.temp_dir)?;
        let client = HttpClient::new(settings.delay)?;
        Ok(Pipeline {
            settings,
            paths,
            client,
            states: [StageState::Pending; 3],
            state: RunState::Running,
            stats: RunStats::default(),
        })
    }

    #[cfg(test)]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn paths(&self) -> &StagePaths {
        &self.paths
    }

    pub fn stage_state(&self, stage: Stage) -> StageState {
        self.states[stage.number() - 1]
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn output_for(&self, stage: Stage) -> PathBuf {
        match stage {
            Stage::Extract => self.paths.stage1.clone(),
            Stage::Resolve => self.paths.stage2.clone(),
            Stage::Notes => self.settings.output.clone(),
        }
    }

    /// Each stage reads the newest table: the raw input, or the output of the
    /// last stage that ran.
    pub async fn run(&mut self) -> Result<(), StageFailure> {
        let mut current = self.settings.input.clone();

        for stage in Stage::ALL {
            let index = stage.number() - 1;
            if stage.is_skipped(&self.settings.skips) {
                println!("\n===== STAGE {}: Skipped =====", stage.number());
                self.states[index] = StageState::Skipped;
                continue;
            }

            println!("\n===== STAGE {}: {} =====", stage.number(), stage.title());
            let output = self.output_for(stage);
            if let Err(source) = self.run_stage(stage, &current, &output).await {
                self.state = RunState::Failed(stage);
                return Err(StageFailure { stage, source });
            }
            self.states[index] = StageState::Done;
            current = output;
        }

        self.state = RunState::Complete;
        println!("\n{}", self.stats.render_summary(&self.settings.skips));

        if self.settings.clean_temp {
            println!("\nCleaning up temporary files...");
            self.paths.clean();
        }
        println!(
            "\nProcessing complete! Final results saved to: {}",
            self.settings.output.display()
        );
        Ok(())
    }

    async fn run_stage(
        &mut self,
        stage: Stage,
        input: &Path,
        output: &Path,
    ) -> Result<(), PipelineError> {
        let endpoints = &self.settings.endpoints;
        let timeouts = self.settings.timeouts;
        info!("{} reading {}", stage, input.display());

        match stage {
            Stage::Extract => {
                info!(
                    "Processing records with {:.1}s delay between requests",
                    self.settings.delay.as_secs_f64()
                );
                catalog::run_stage(
                    &self.client,
                    endpoints,
                    timeouts.catalog_page,
                    input,
                    output,
                    &mut self.stats.extraction,
                )
                .await
            }
            Stage::Resolve => {
                let retry = RetryPolicy::new(self.settings.max_retries, self.settings.delay);
                let resolver =
                    IdentifierResolver::new(&self.client, endpoints, timeouts.search, retry);
                lookup::run_stage(&resolver, input, output, &mut self.stats.resolution).await
            }
            Stage::Notes => {
                let mut fetcher = NoteFetcher::new(&self.client, endpoints, timeouts.record);
                if self.settings.debug {
                    fetcher = fetcher.with_debug_dir(self.paths.debug_dir.clone());
                }
                marc::run_stage(&fetcher, input, output, &mut self.stats.notes).await
            }
        }
    }
}
