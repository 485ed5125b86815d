//! Streaming table assembler.
//!
//! This module provides the [`HarvestPipeline`] coordinator that runs each
//! record through Fetcher → Extractor → Geometry → Table with:
//! - Strictly sequential, in-order processing on `tokio`
//! - Per-record failure isolation (a failed record is logged and skipped)
//! - Structured logging via `tracing`
//! - Automatic cleanup of temporary downloads via RAII (`Drop` on `FetchedResource`)

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConfigError, HarvestConfig};
use crate::harvest::extract::TpfExtractor;
use crate::harvest::fetch::{ArchiveSource, ResilientFetcher};
use crate::harvest::geometry::{append_geometry, BoundingGeometry};
use crate::harvest::table::{TableError, TableWriter};
use crate::harvest::traits::{BackoffStrategy, ExtractError, FixedDelay, RowExtractor};
use crate::model::{HarvestReport, MetadataRow, Record, RecordFailure};
use crate::traits::{FetchError, ResourceSource};

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that can occur during pipeline execution.
///
/// Only [`PipelineError::Sink`] and [`PipelineError::Config`] abort a batch;
/// everything else costs a single record.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Fetch stage gave up on the record
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Extraction stage failed
    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    /// Row does not fit the table header written earlier
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A blocking worker task panicked or was cancelled
    #[error("Task join error: {0}")]
    Task(String),

    /// The output table can no longer be written
    #[error("Output sink failed: {0}")]
    Sink(TableError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Whether the whole batch must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Sink(_) | PipelineError::Config(_))
    }
}

impl From<TableError> for PipelineError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::SchemaMismatch { .. } => PipelineError::SchemaMismatch(e.to_string()),
            other => PipelineError::Sink(other),
        }
    }
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Sequential harvest pipeline writing one table row per record.
///
/// # Example
///
/// ```ignore
/// use tpf_harvester::config::HarvestConfig;
/// use tpf_harvester::harvest::{HarvestPipeline, TableWriter};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = HarvestConfig::from_env()?.with_geometry(true);
///     let pipeline = HarvestPipeline::from_config(&config)?;
///     let mut table = TableWriter::new(std::fs::File::create("tpf-metadata.csv")?);
///
///     let report = pipeline.assemble(records, &mut table).await?;
///     println!("{} harvested, {} failed", report.succeeded, report.failed.len());
///     Ok(())
/// }
/// ```
pub struct HarvestPipeline<S, X, B>
where
    S: ResourceSource,
    X: RowExtractor + 'static,
    B: BackoffStrategy,
{
    /// Fetch stage with retry policy
    fetcher: ResilientFetcher<S, B>,

    /// Extraction stage implementation
    extractor: Arc<X>,

    /// Whether to append bounding-box columns
    include_geometry: bool,

    /// Locators containing this marker are skipped before fetching
    cadence_filter: Option<String>,
}

impl HarvestPipeline<ArchiveSource, TpfExtractor, FixedDelay> {
    /// Builds the standard pipeline: archive source, fixed-delay retries,
    /// target pixel file extractor.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &HarvestConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let source = ArchiveSource::new(config)?;
        let fetcher = ResilientFetcher::new(source, FixedDelay(config.retry_delay), config.max_attempts)
            .with_attempt_timeout(config.attempt_timeout);

        Ok(Self::new(fetcher, TpfExtractor)
            .with_geometry(config.include_geometry)
            .with_cadence_filter(config.cadence_filter().map(str::to_string)))
    }
}

impl<S, X, B> HarvestPipeline<S, X, B>
where
    S: ResourceSource,
    X: RowExtractor + 'static,
    B: BackoffStrategy,
{
    /// Creates a pipeline without geometry and without a cadence filter.
    pub fn new(fetcher: ResilientFetcher<S, B>, extractor: X) -> Self {
        Self {
            fetcher,
            extractor: Arc::new(extractor),
            include_geometry: false,
            cadence_filter: None,
        }
    }

    pub fn with_geometry(mut self, include: bool) -> Self {
        self.include_geometry = include;
        self
    }

    pub fn with_cadence_filter(mut self, marker: Option<String>) -> Self {
        self.cadence_filter = marker;
        self
    }

    fn is_filtered(&self, record: &Record) -> bool {
        self.cadence_filter
            .as_deref()
            .is_some_and(|marker| record.locator.contains(marker))
    }

    /// Fetches, extracts and (optionally) georeferences one record.
    ///
    /// The fetched resource is released before this returns, on success
    /// and on failure.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if fetching is exhausted or extraction
    /// fails.
    pub async fn harvest_record(&self, record: &Record) -> Result<MetadataRow, PipelineError> {
        let fetch_start = Instant::now();
        let opened = self.fetcher.fetch(record).await?;
        debug!(
            duration_ms = fetch_start.elapsed().as_millis() as u64,
            path = %opened.resource.path.display(),
            "Fetch completed"
        );

        // `opened` moves into the blocking task and is released there; if
        // extraction panics, Drop still removes the temporary file.
        let extract_start = Instant::now();
        let extractor = Arc::clone(&self.extractor);
        let (result, released) = tokio::task::spawn_blocking(move || {
            let result = extractor.extract(&opened);
            let released = opened.resource.release();
            (result, released)
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))?;

        if let Err(e) = released {
            error!(locator = %record.locator, "Could not delete temporary file: {}", e);
        }
        let mut row = result?;
        debug!(
            duration_ms = extract_start.elapsed().as_millis() as u64,
            stage = self.extractor.stage_name(),
            fields = row.len(),
            "Extraction completed"
        );

        if self.include_geometry {
            let geometry = BoundingGeometry::from_row(&row);
            if geometry.is_none() {
                warn!(locator = %record.locator, "Incomplete calibration, geometry left empty");
            }
            append_geometry(&mut row, geometry.as_ref());
        }

        Ok(row)
    }

    /// Harvests `records` in order, writing one row per success to `sink`.
    ///
    /// Failed records are logged with their locator and skipped. Records
    /// matching the cadence filter, or whose filename was already written
    /// in this run, are skipped before any fetch.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Sink`] as soon as the sink fails; rows
    /// written before that point stay in the sink.
    #[instrument(skip_all)]
    pub async fn assemble<I, W>(
        &self,
        records: I,
        sink: &mut TableWriter<W>,
    ) -> Result<HarvestReport, PipelineError>
    where
        I: IntoIterator<Item = Record>,
        W: Write,
    {
        let start = Instant::now();
        let mut report = HarvestReport::default();
        let mut written: HashSet<String> = HashSet::new();

        for record in records {
            if self.is_filtered(&record) {
                debug!(locator = %record.locator, "Skipping cadence variant");
                report.filtered += 1;
                continue;
            }
            if written.contains(record.filename()) {
                warn!(locator = %record.locator, filename = record.filename(), "Duplicate filename, skipping");
                report.duplicates += 1;
                continue;
            }

            info!(locator = %record.locator, "Harvesting record");
            let outcome = match self.harvest_record(&record).await {
                Ok(row) => sink.write_row(&row).map_err(PipelineError::from),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    written.insert(record.filename().to_string());
                    report.succeeded += 1;
                }
                Err(e) if e.is_fatal() => {
                    error!(locator = %record.locator, "Aborting batch: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!(locator = %record.locator, "{}", e);
                    report.failed.push(RecordFailure {
                        locator: record.locator.clone(),
                        cause: e.to_string(),
                    });
                }
            }
        }

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            filtered = report.filtered,
            duplicates = report.duplicates,
            "Batch completed"
        );
        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================
