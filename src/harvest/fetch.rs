//! Resource acquisition with bounded retries.
//!
//! - [`FetchedResource`]: local handle to a record's bytes; temporary copies
//!   are deleted on `Drop`
//! - [`ArchiveSource`]: downloads remote files in fixed-size chunks, opens
//!   local paths in place and serves mirrored URLs from disk
//! - [`ResilientFetcher`]: runs acquire + open through a [`RetryState`]
//!   machine paced by a [`BackoffStrategy`]

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::io::StreamReader;
use tracing::{debug, error, warn};

use crate::config::{HarvestConfig, MirrorConfig};
use crate::harvest::formats::fits::FitsContainer;
use crate::harvest::traits::BackoffStrategy;
use crate::model::Record;
use crate::traits::{FetchError, ResourceSource};

// ============================================================================
// Resource handles
// ============================================================================

/// A record's content available on the local filesystem.
///
/// # RAII Cleanup
///
/// A temporary resource removes its file on [`Drop`], so the copy is gone on
/// every exit path: success, error, panic, or a download future dropped by a
/// timeout. Call [`FetchedResource::release`] to remove it eagerly and see
/// the outcome. Not `Clone` for the same reason.
#[derive(Debug)]
pub struct FetchedResource {
    /// Local file holding the content
    pub path: PathBuf,

    /// Record this resource belongs to
    pub record: Record,

    /// Whether the file is owned by the harvest and deleted on drop
    pub(crate) cleanup_on_drop: bool,
}

impl FetchedResource {
    /// A file that exists independently of the harvest (never deleted).
    pub fn local(path: impl Into<PathBuf>, record: Record) -> Self {
        Self {
            path: path.into(),
            record,
            cleanup_on_drop: false,
        }
    }

    /// A file created for this harvest attempt.
    pub fn temporary(path: impl Into<PathBuf>, record: Record) -> Self {
        Self {
            path: path.into(),
            record,
            cleanup_on_drop: true,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.cleanup_on_drop
    }

    /// Byte length of the file actually on disk.
    pub fn size_bytes(&self) -> std::io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Deletes a temporary file now.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file exists but cannot be removed.
    pub fn release(mut self) -> std::io::Result<()> {
        if !self.cleanup_on_drop {
            return Ok(());
        }
        self.cleanup_on_drop = false;
        debug!(path = %self.path.display(), "Removing temporary file");
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for FetchedResource {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                error!(
                    path = %self.path.display(),
                    locator = %self.record.locator,
                    "Could not delete temporary file: {}",
                    e
                );
            }
        }
    }
}

/// A fetched resource whose container has been opened successfully.
#[derive(Debug)]
pub struct OpenedResource {
    pub resource: FetchedResource,
    pub container: FitsContainer,
}

// ============================================================================
// Archive source
// ============================================================================

/// Where a record's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Remote(String),
    Local(PathBuf),
}

fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Fetches records from HTTP(S) URLs, a local mirror, or plain paths.
pub struct ArchiveSource {
    client: reqwest::Client,
    temp_dir: PathBuf,
    chunk_size: usize,
    mirror: Option<MirrorConfig>,
}

impl ArchiveSource {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &HarvestConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tpf-harvester/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            temp_dir: config.temp_dir.clone(),
            chunk_size: config.chunk_size.max(1),
            mirror: config.mirror.clone(),
        })
    }

    /// Decides where `record` is read from. Mirrored URLs never hit the
    /// network.
    pub fn resolve(&self, record: &Record) -> Location {
        let locator = record.locator.as_str();
        if let Some(path) = self.mirror.as_ref().and_then(|m| m.map(locator)) {
            return Location::Local(path);
        }
        if is_remote(locator) {
            Location::Remote(locator.to_string())
        } else {
            Location::Local(PathBuf::from(locator))
        }
    }

    fn temp_path(&self, record: &Record) -> PathBuf {
        let name = match record.filename() {
            "" => "download",
            name => name,
        };
        let name: String = name
            .chars()
            .map(|c| match c {
                // '[' and ']' open cfitsio's extended filename syntax.
                '?' | '&' | '#' | '[' | ']' => '_',
                c => c,
            })
            .collect();
        self.temp_dir
            .join(format!("{}-{}", std::process::id(), name))
    }

    /// Streams `url` to a temporary file, `chunk_size` bytes at a time.
    async fn download(&self, url: &str, record: &Record) -> Result<FetchedResource, FetchError> {
        let path = self.temp_path(record);
        // Guard first: a failure or cancellation below removes the partial file.
        let resource = FetchedResource::temporary(&path, record.clone());
        debug!(url, path = %path.display(), "Downloading");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        tokio::pin!(reader);

        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            file.write_all(&chunk[..n]).await?;
        }
        file.flush().await?;

        Ok(resource)
    }
}

#[async_trait]
impl ResourceSource for ArchiveSource {
    fn source_name(&self) -> &str {
        "archive"
    }

    async fn acquire(&self, record: &Record) -> Result<FetchedResource, FetchError> {
        match self.resolve(record) {
            Location::Remote(url) => self.download(&url, record).await,
            Location::Local(path) => {
                tokio::fs::metadata(&path).await?;
                debug!(path = %path.display(), "Reading local file");
                Ok(FetchedResource::local(path, record.clone()))
            }
        }
    }
}

// ============================================================================
// Retry loop
// ============================================================================

/// Progress of the retry loop for one record.
#[derive(Debug)]
pub enum RetryState<T> {
    /// About to run attempt `n` (1-based)
    Attempting(u32),
    Succeeded(T),
    Failed(FetchError),
}

/// Acquires and opens a record, retrying failed attempts.
///
/// Network errors and unreadable content are not told apart: both consume
/// an attempt. After `max_attempts` failures the last error is returned
/// inside [`FetchError::Exhausted`].
pub struct ResilientFetcher<S, B>
where
    S: ResourceSource,
    B: BackoffStrategy,
{
    source: S,
    backoff: B,
    max_attempts: u32,
    attempt_timeout: Option<Duration>,
}

impl<S, B> ResilientFetcher<S, B>
where
    S: ResourceSource,
    B: BackoffStrategy,
{
    /// `max_attempts` is clamped to at least 1.
    pub fn new(source: S, backoff: B, max_attempts: u32) -> Self {
        Self {
            source,
            backoff,
            max_attempts: max_attempts.max(1),
            attempt_timeout: None,
        }
    }

    /// Bounds each individual attempt; a timed-out attempt counts as failed.
    pub fn with_attempt_timeout(mut self, limit: Option<Duration>) -> Self {
        self.attempt_timeout = limit;
        self
    }

    /// Fetches `record`, retrying until success or `max_attempts` failures.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Exhausted`] wrapping the last attempt's error.
    pub async fn fetch(&self, record: &Record) -> Result<OpenedResource, FetchError> {
        let mut state = RetryState::Attempting(1);
        loop {
            state = match state {
                RetryState::Attempting(attempt) => match self.attempt(record).await {
                    Ok(opened) => RetryState::Succeeded(opened),
                    Err(e) if attempt >= self.max_attempts => {
                        error!(locator = %record.locator, attempts = attempt, "Max attempts reached");
                        RetryState::Failed(FetchError::Exhausted {
                            locator: record.locator.clone(),
                            attempts: attempt,
                            last: Box::new(e),
                        })
                    }
                    Err(e) => {
                        let delay = self.backoff.delay(attempt);
                        warn!(
                            locator = %record.locator,
                            attempt,
                            source = self.source.source_name(),
                            "Attempt failed: {}",
                            e
                        );
                        warn!("Now sleeping for {:?}", delay);
                        tokio::time::sleep(delay).await;
                        RetryState::Attempting(attempt + 1)
                    }
                },
                RetryState::Succeeded(opened) => return Ok(opened),
                RetryState::Failed(e) => return Err(e),
            };
        }
    }

    async fn attempt(&self, record: &Record) -> Result<OpenedResource, FetchError> {
        let work = async {
            let resource = self.source.acquire(record).await?;
            let container = open_container(&resource.path).await?;
            Ok::<_, FetchError>(OpenedResource {
                resource,
                container,
            })
        };
        match self.attempt_timeout {
            Some(limit) => timeout(limit, work)
                .await
                .map_err(|_| FetchError::Timeout(limit))?,
            None => work.await,
        }
    }
}

async fn open_container(path: &Path) -> Result<FitsContainer, FetchError> {
    let path = path.to_path_buf();
    debug!(path = %path.display(), "Opening container");
    let fits = tokio::task::spawn_blocking(move || FitsContainer::open(&path))
        .await
        .map_err(|e| FetchError::Task(e.to_string()))??;
    Ok(fits)
}

// ============================================================================
// Tests
// ============================================================================
