use crate::harvest::fetch::FetchedResource;
use crate::harvest::formats::fits::ContainerError;
use crate::model::Record;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Container could not be opened: {0}")]
    Container(#[from] ContainerError),
    #[error("Attempt timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Background task failed: {0}")]
    Task(String),
    #[error("Max attempts ({attempts}) reached for {locator}: {last}")]
    Exhausted {
        locator: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Short name used in logs (e.g., "archive", "mirror").
    fn source_name(&self) -> &str;

    /// Makes the record's content available as a local file.
    ///
    /// A temporary copy must be returned as a temporary [`FetchedResource`]
    /// so it is removed when the handle is dropped, including when this
    /// future is cancelled half-way through a download.
    async fn acquire(&self, record: &Record) -> Result<FetchedResource, FetchError>;
}
