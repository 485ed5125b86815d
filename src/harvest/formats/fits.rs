//! FITS container access through `fitsio` (cfitsio).
//!
//! cfitsio opens gzip-compressed files transparently, applies `TZEROn` to
//! table columns and `BSCALE`/`BZERO` to images. [`FitsContainer`] indexes
//! the HDU layout once at open time and serializes every later read through
//! a [`ThreadsafeFitsFile`], so a container can move onto a blocking worker.

use std::fmt;
use std::path::{Path, PathBuf};

use fitsio::errors::Error as FitsioError;
use fitsio::hdu::HduInfo;
use fitsio::threadsafe_fitsfile::ThreadsafeFitsFile;
use fitsio::FitsFile;
use thiserror::Error;

/// cfitsio status: moved past the last HDU.
const END_OF_FILE: i32 = 107;
/// cfitsio status: keyword not in header.
const KEY_NO_EXIST: i32 = 202;
/// cfitsio status: keyword has an empty value field.
const VALUE_UNDEFINED: i32 = 204;
/// cfitsio status: HDU number out of range.
const BAD_HDU_NUM: i32 = 301;

/// Images above this many pixels are refused before any data is read.
pub const MAX_IMAGE_PIXELS: usize = 1 << 26;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Cannot read FITS file '{path}': {source}")]
    Fits {
        path: PathBuf,
        source: FitsioError,
    },

    #[error("HDU {0} not present")]
    MissingHdu(usize),

    #[error("HDU {0} is not a table")]
    NotATable(usize),

    #[error("HDU {0} is not an image")]
    NotAnImage(usize),

    #[error("Column {column} not found in HDU {hdu}")]
    ColumnNotFound { hdu: usize, column: String },

    #[error("Row {row} out of range ({rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },

    #[error("Image in HDU {hdu} is too large ({shape:?})")]
    ImageTooLarge { hdu: usize, shape: Vec<usize> },
}

/// A header value, classified from its FITS text.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Logical(bool),
    /// Keyword present with an empty value field
    Undefined,
}

fn looks_numeric(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
        && s.contains(|c: char| c.is_ascii_digit())
}

/// Classifies the text cfitsio returns for a keyword.
///
/// Quoted strings arrive without their quotes, so a string holding only
/// digits reads back as a number.
pub fn classify(raw: &str) -> HeaderValue {
    let value = raw.trim();
    if value.is_empty() {
        return HeaderValue::Undefined;
    }
    match value {
        "T" => return HeaderValue::Logical(true),
        "F" => return HeaderValue::Logical(false),
        _ => {}
    }
    if looks_numeric(value) {
        if let Ok(i) = value.parse::<i64>() {
            return HeaderValue::Integer(i);
        }
        if let Ok(f) = value.replace(['D', 'd'], "E").parse::<f64>() {
            return HeaderValue::Float(f);
        }
    }
    HeaderValue::Text(value.to_string())
}

/// Structural kind of one HDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HduKind {
    /// Image (or empty primary array); `shape` is slowest axis first
    Image { shape: Vec<usize> },
    /// ASCII or binary table
    Table { columns: Vec<String>, rows: usize },
    Other,
}

impl From<&HduInfo> for HduKind {
    fn from(info: &HduInfo) -> Self {
        match info {
            HduInfo::ImageInfo { shape, .. } => HduKind::Image {
                shape: shape.clone(),
            },
            HduInfo::TableInfo {
                column_descriptions,
                num_rows,
            } => HduKind::Table {
                columns: column_descriptions.iter().map(|c| c.name.clone()).collect(),
                rows: *num_rows,
            },
            HduInfo::AnyInfo => HduKind::Other,
        }
    }
}

/// Pixel count of `shape` (0 for a data-less HDU), or `None` on overflow.
fn pixel_count(shape: &[usize]) -> Option<usize> {
    if shape.is_empty() {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

fn fits_status(e: &FitsioError) -> Option<i32> {
    match e {
        FitsioError::Fits(inner) => Some(inner.status),
        _ => None,
    }
}

/// An open FITS file with its HDU layout indexed.
pub struct FitsContainer {
    path: PathBuf,
    file: ThreadsafeFitsFile,
    hdus: Vec<HduKind>,
}

impl fmt::Debug for FitsContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FitsContainer")
            .field("path", &self.path)
            .field("hdus", &self.hdus)
            .finish()
    }
}

impl FitsContainer {
    /// Opens `path` (plain or gzip-compressed) and indexes every HDU.
    ///
    /// # Errors
    ///
    /// [`ContainerError::Fits`] if cfitsio rejects the file or one of its
    /// headers.
    pub fn open(path: &Path) -> Result<Self, ContainerError> {
        let fail = |source| ContainerError::Fits {
            path: path.to_path_buf(),
            source,
        };
        let mut file = FitsFile::open(path).map_err(fail)?;

        let mut hdus = Vec::new();
        loop {
            match file.hdu(hdus.len()) {
                Ok(hdu) => hdus.push(HduKind::from(&hdu.info)),
                Err(e) if !hdus.is_empty() && matches!(fits_status(&e), Some(END_OF_FILE | BAD_HDU_NUM)) => {
                    break
                }
                Err(e) => return Err(fail(e)),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: file.threadsafe(),
            hdus,
        })
    }

    fn fits_error(&self, source: FitsioError) -> ContainerError {
        ContainerError::Fits {
            path: self.path.clone(),
            source,
        }
    }

    /// Kind of HDU `index`, if present.
    pub fn kind(&self, index: usize) -> Option<&HduKind> {
        self.hdus.get(index)
    }

    /// Reads `keyword` from HDU `index`.
    ///
    /// Returns `Ok(None)` if the HDU or the keyword does not exist, and
    /// [`HeaderValue::Undefined`] for a keyword with an empty value.
    pub fn header_value(&self, index: usize, keyword: &str) -> Result<Option<HeaderValue>, ContainerError> {
        if index >= self.hdus.len() {
            return Ok(None);
        }
        let mut file = self.file.lock().map_err(|e| self.fits_error(e))?;
        let hdu = file.hdu(index).map_err(|e| self.fits_error(e))?;
        match hdu.read_key::<String>(&mut file, keyword) {
            Ok(raw) => Ok(Some(classify(&raw))),
            Err(e) => match fits_status(&e) {
                Some(KEY_NO_EXIST) => Ok(None),
                Some(VALUE_UNDEFINED) => Ok(Some(HeaderValue::Undefined)),
                _ => Err(self.fits_error(e)),
            },
        }
    }

    fn table(&self, index: usize) -> Result<(&[String], usize), ContainerError> {
        match self.hdus.get(index) {
            Some(HduKind::Table { columns, rows }) => Ok((columns, *rows)),
            Some(_) => Err(ContainerError::NotATable(index)),
            None => Err(ContainerError::MissingHdu(index)),
        }
    }

    pub fn table_rows(&self, index: usize) -> Result<usize, ContainerError> {
        self.table(index).map(|(_, rows)| rows)
    }

    /// Case-insensitive column lookup.
    pub fn has_column(&self, index: usize, column: &str) -> bool {
        self.table(index)
            .map(|(columns, _)| columns.iter().any(|c| c.eq_ignore_ascii_case(column)))
            .unwrap_or(false)
    }

    /// Reads one integer cell (0-based `row`) with `TZEROn` applied.
    pub fn read_integer_cell(&self, index: usize, column: &str, row: usize) -> Result<i64, ContainerError> {
        let (columns, rows) = self.table(index)?;
        let name = columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| ContainerError::ColumnNotFound {
                hdu: index,
                column: column.to_string(),
            })?;
        if row >= rows {
            return Err(ContainerError::RowOutOfRange { row, rows });
        }

        let mut file = self.file.lock().map_err(|e| self.fits_error(e))?;
        let hdu = file.hdu(index).map_err(|e| self.fits_error(e))?;
        hdu.read_cell_value::<i64>(&mut file, name, row)
            .map_err(|e| self.fits_error(e))
    }

    /// Counts image pixels whose physical value is strictly positive.
    pub fn count_positive_pixels(&self, index: usize) -> Result<u64, ContainerError> {
        let shape = match self.hdus.get(index) {
            Some(HduKind::Image { shape }) => shape,
            Some(_) => return Err(ContainerError::NotAnImage(index)),
            None => return Err(ContainerError::MissingHdu(index)),
        };
        match pixel_count(shape) {
            Some(0) => return Ok(0),
            Some(n) if n <= MAX_IMAGE_PIXELS => {}
            _ => {
                return Err(ContainerError::ImageTooLarge {
                    hdu: index,
                    shape: shape.clone(),
                })
            }
        }

        let mut file = self.file.lock().map_err(|e| self.fits_error(e))?;
        let hdu = file.hdu(index).map_err(|e| self.fits_error(e))?;
        let values: Vec<f64> = hdu.read_image(&mut file).map_err(|e| self.fits_error(e))?;
        Ok(values.iter().filter(|v| **v > 0.0).count() as u64)
    }
}
