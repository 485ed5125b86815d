//! Container format readers.
//!
//! - `fits` - FITS headers, binary tables and images through cfitsio, plain or gzip

pub mod fits;
