use crate::config::HarvestConfig;
use crate::harvest::pipeline::{HarvestPipeline, PipelineError};
use crate::harvest::table::TableWriter;
use crate::model::{HarvestReport, Record, RunOutcome};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write report: {0}")]
    Report(#[from] serde_json::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExecutorError + '_ {
    move |source| ExecutorError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Runs one harvest batch from an input list to an output table file.
pub struct BatchExecutor {
    config: HarvestConfig,
}

impl BatchExecutor {
    pub fn new(config: HarvestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Reads a newline-delimited locator list, skipping blank lines.
    pub async fn read_records(path: &Path) -> Result<Vec<Record>, ExecutorError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(io_error(path))?;
        Ok(content.lines().filter_map(Record::from_line).collect())
    }

    #[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
    pub async fn run(&self, input: &Path, output: &Path) -> Result<HarvestReport, ExecutorError> {
        let records = Self::read_records(input).await?;
        let pipeline = HarvestPipeline::from_config(&self.config)?;

        let file = tokio::fs::File::create(output)
            .await
            .map_err(io_error(output))?
            .into_std()
            .await;
        let mut table = TableWriter::new(file);

        info!(records = records.len(), "Starting harvest");
        let report = pipeline.assemble(records, &mut table).await?;
        table.into_inner().map_err(PipelineError::Sink)?;

        info!(
            succeeded = report.succeeded,
            failed = report.failed.len(),
            "Finished harvest"
        );
        Ok(report)
    }

    /// Writes `report` as pretty-printed JSON.
    pub async fn write_report(report: &HarvestReport, path: &Path) -> Result<(), ExecutorError> {
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(path, json).await.map_err(io_error(path))
    }
}

/// Process exit status for a finished run.
pub fn exit_code(outcome: RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Clean | RunOutcome::Empty => 0,
        RunOutcome::Partial => 2,
        RunOutcome::AllFailed => 3,
    }
}
