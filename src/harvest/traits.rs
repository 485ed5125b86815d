//! Core traits and error types for the harvest stages.
//!
//! - Retry pacing via [`BackoffStrategy`]
//! - Row extraction via [`RowExtractor`]
//! - Extraction errors via [`ExtractError`]

use std::time::Duration;
use thiserror::Error;

use crate::harvest::fetch::OpenedResource;
use crate::harvest::formats::fits::ContainerError;
use crate::model::MetadataRow;

// ============================================================================
// Backoff
// ============================================================================

/// Decides how long to wait after a failed fetch attempt.
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub trait BackoffStrategy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl BackoffStrategy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Doubles the delay after every failure, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Turns an opened container into one metadata row.
///
/// Implementations must be all-or-nothing: either a complete row is
/// returned or an error, never a partially filled row.
pub trait RowExtractor: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ExtractError`] if a structurally required section of the
    /// container is missing or cannot be read. Missing optional keywords
    /// are not errors.
    fn extract(&self, resource: &OpenedResource) -> Result<MetadataRow, ExtractError>;

    /// Returns the name of this stage for logging.
    fn stage_name(&self) -> &'static str;
}

/// Errors that abort the extraction of one record.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A section the schema cannot do without is absent
    #[error("Missing required {section}: {detail}")]
    MissingRequired { section: String, detail: String },

    /// A required section exists but cannot be decoded
    #[error("Malformed container: {0}")]
    Container(#[from] ContainerError),

    /// Resource metadata (e.g. file size) could not be read
    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
}
