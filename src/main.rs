//! tpf-harvester - build a metadata table from a list of target pixel files

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tpf_harvester::config::{HarvestConfig, MirrorConfig};
use tpf_harvester::executor::{exit_code, BatchExecutor};
use tpf_harvester::logging::{init_logging, LogLevel};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tpf-harvester")]
#[command(author, version, about = "Harvest target pixel file metadata into a CSV table")]
struct Cli {
    /// File with one URL or path per line
    input: PathBuf,

    /// Output table
    output: PathBuf,

    /// Append sky corner and bounding box columns
    #[arg(long)]
    geometry: bool,

    /// Skip short-cadence files
    #[arg(long)]
    exclude_short_cadence: bool,

    /// Attempts per file before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds to wait between attempts
    #[arg(long)]
    retry_delay_secs: Option<u64>,

    /// Directory for temporary downloads
    #[arg(long)]
    tmpdir: Option<PathBuf>,

    /// Local mirror of the archive tree
    #[arg(long)]
    mirror: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "HARVEST_LOG_LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    /// Applies command-line flags on top of `config`.
    fn apply(&self, mut config: HarvestConfig) -> HarvestConfig {
        if self.geometry {
            config = config.with_geometry(true);
        }
        if self.exclude_short_cadence {
            config = config.with_cadence_exclusion(true);
        }
        if let Some(n) = self.max_attempts {
            config = config.with_max_attempts(n);
        }
        if let Some(secs) = self.retry_delay_secs {
            config = config.with_retry_delay(Duration::from_secs(secs));
        }
        if let Some(dir) = &self.tmpdir {
            config = config.with_temp_dir(dir);
        }
        if let Some(root) = &self.mirror {
            let prefix = config.mirror.take().map(|m| m.remote_prefix);
            let mut mirror = MirrorConfig::new(root);
            if let Some(prefix) = prefix {
                mirror.remote_prefix = prefix;
            }
            config = config.with_mirror(Some(mirror));
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let config = match HarvestConfig::from_env() {
        Ok(config) => cli.apply(config),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let executor = BatchExecutor::new(config);
    let report = match executor.run(&cli.input, &cli.output).await {
        Ok(report) => report,
        Err(e) => {
            error!("Harvest aborted: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = &cli.report {
        if let Err(e) = BatchExecutor::write_report(&report, path).await {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let outcome = report.outcome();
    info!(
        ?outcome,
        succeeded = report.succeeded,
        failed = report.failed.len(),
        filtered = report.filtered,
        duplicates = report.duplicates,
        "Done"
    );
    ExitCode::from(exit_code(outcome))
}
