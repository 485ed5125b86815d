//! Harvest module - fetch, extract, georeference and tabulate target pixel files.
//!
//! - **Fetch**: [`ResilientFetcher`] retrying an [`ArchiveSource`] under a [`BackoffStrategy`]
//! - **Extract**: [`TpfExtractor`] producing one [`MetadataRow`](crate::model::MetadataRow) per file
//! - **Geometry**: sky corners and bounding box from the aperture WCS
//! - **Pipeline**: in-order assembler via [`pipeline::HarvestPipeline`] writing to a [`TableWriter`]

pub mod extract;
pub mod fetch;
pub mod formats;
pub mod geometry;
pub mod pipeline;
pub mod table;
pub mod traits;

// Re-export commonly used types
pub use traits::{BackoffStrategy, ExponentialBackoff, ExtractError, FixedDelay, RowExtractor};

pub use extract::{schema, TpfExtractor};
pub use fetch::{ArchiveSource, FetchedResource, OpenedResource, ResilientFetcher, RetryState};
pub use geometry::{BoundingGeometry, Calibration, SkyPoint};
pub use pipeline::{HarvestPipeline, PipelineError};
pub use table::{TableError, TableWriter};
