//! Target pixel file metadata extraction.
//!
//! The row schema is fixed. Keywords are read tolerantly: a keyword missing
//! from its header becomes [`FieldValue::Absent`], one with an empty value
//! becomes [`FieldValue::Undefined`]. Only the cadence table and the
//! aperture mask are structurally required.

use tracing::trace;

use crate::harvest::fetch::OpenedResource;
use crate::harvest::formats::fits::{FitsContainer, HduKind, HeaderValue};
use crate::harvest::traits::{ExtractError, RowExtractor};
use crate::model::{FieldValue, MetadataRow};

/// Primary header keywords, in output order.
pub const PRIMARY_KEYWORDS: [&str; 10] = [
    "OBJECT", "KEPLERID", "OBSMODE", "CAMPAIGN", "CHANNEL", "MODULE", "OUTPUT", "RA_OBJ",
    "DEC_OBJ", "KEPMAG",
];

/// Cadence table header keywords, in output order.
pub const SAMPLE_KEYWORDS: [&str; 8] = [
    "LC_START", "LC_END", "GAIN", "READNOIS", "MEANBLCK", "CDPP3_0", "CDPP6_0", "CDPP12_0",
];

/// Aperture header keywords (mask size and WCS), in output order.
pub const APERTURE_KEYWORDS: [&str; 14] = [
    "NAXIS1", "NAXIS2", "CRPIX1", "CRPIX2", "CRVAL1", "CRVAL2", "CDELT1", "CDELT2", "PC1_1",
    "PC1_2", "PC2_1", "PC2_2", "CRVAL1P", "CRVAL2P",
];

pub const CADENCE_COLUMN: &str = "CADENCENO";

const PRIMARY_HDU: usize = 0;
const SAMPLE_HDU: usize = 1;
const APERTURE_HDU: usize = 2;

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Column names produced by [`TpfExtractor`], in order.
pub fn schema() -> Vec<String> {
    let mut names: Vec<String> = ["filename", "url", "filesize"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    names.extend(PRIMARY_KEYWORDS.iter().map(|k| k.to_lowercase()));
    names.push("cadenceno_start".to_string());
    names.push("cadenceno_end".to_string());
    names.extend(SAMPLE_KEYWORDS.iter().map(|k| k.to_lowercase()));
    names.push("npix".to_string());
    names.extend(APERTURE_KEYWORDS.iter().map(|k| k.to_lowercase()));
    names
}

/// Maps a keyword lookup onto a row value; a missing keyword is `Absent`.
pub fn field_value(value: Option<HeaderValue>) -> FieldValue {
    match value {
        None => FieldValue::Absent,
        Some(HeaderValue::Undefined) => FieldValue::Undefined,
        Some(HeaderValue::Text(s)) => FieldValue::text(s),
        Some(HeaderValue::Integer(i)) => FieldValue::integer(i),
        Some(HeaderValue::Float(f)) => FieldValue::float(f),
        Some(HeaderValue::Logical(b)) => FieldValue::text(if b { "True" } else { "False" }),
    }
}

fn missing(section: &str, detail: impl Into<String>) -> ExtractError {
    ExtractError::MissingRequired {
        section: section.to_string(),
        detail: detail.into(),
    }
}

/// Extractor for K2/Kepler target pixel files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TpfExtractor;

impl TpfExtractor {
    fn push_keywords(
        row: &mut MetadataRow,
        fits: &FitsContainer,
        hdu: usize,
        keywords: &[&str],
    ) -> Result<(), ExtractError> {
        for keyword in keywords {
            let value = field_value(fits.header_value(hdu, keyword)?);
            if !value.is_present() {
                trace!(hdu, keyword, "Keyword missing or undefined");
            }
            row.push(keyword, value);
        }
        Ok(())
    }

    /// First and last entries of the cadence number column.
    fn cadence_range(fits: &FitsContainer) -> Result<(i64, i64), ExtractError> {
        match fits.kind(SAMPLE_HDU) {
            Some(HduKind::Table { .. }) => {}
            Some(_) => return Err(missing("cadence table", "HDU 1 is not a binary table")),
            None => return Err(missing("cadence table", "HDU 1 not present")),
        }
        if !fits.has_column(SAMPLE_HDU, CADENCE_COLUMN) {
            return Err(missing("cadence table", format!("no {CADENCE_COLUMN} column")));
        }
        let rows = fits.table_rows(SAMPLE_HDU)?;
        if rows == 0 {
            return Err(missing("cadence table", "table has no rows"));
        }
        let first = fits.read_integer_cell(SAMPLE_HDU, CADENCE_COLUMN, 0)?;
        let last = fits.read_integer_cell(SAMPLE_HDU, CADENCE_COLUMN, rows - 1)?;
        Ok((first, last))
    }

    /// Number of pixels downlinked, i.e. strictly positive aperture values.
    fn downlinked_pixels(fits: &FitsContainer) -> Result<u64, ExtractError> {
        match fits.kind(APERTURE_HDU) {
            Some(HduKind::Image { .. }) => Ok(fits.count_positive_pixels(APERTURE_HDU)?),
            Some(_) => Err(missing("aperture mask", "HDU 2 is not an image")),
            None => Err(missing("aperture mask", "HDU 2 not present")),
        }
    }
}

impl RowExtractor for TpfExtractor {
    fn extract(&self, opened: &OpenedResource) -> Result<MetadataRow, ExtractError> {
        let fits = &opened.container;
        let record = &opened.resource.record;

        // Structural sections first so no work is wasted on a doomed row.
        let (cadence_start, cadence_end) = Self::cadence_range(fits)?;
        let npix = Self::downlinked_pixels(fits)?;
        let size_mb = opened.resource.size_bytes()? as f64 / BYTES_PER_MB;

        let mut row = MetadataRow::new();
        row.push("filename", FieldValue::text(record.filename()));
        row.push("url", FieldValue::text(record.provenance_url()));
        row.push("filesize", FieldValue::text(format!("{size_mb:.1}")));
        Self::push_keywords(&mut row, fits, PRIMARY_HDU, &PRIMARY_KEYWORDS)?;
        row.push("cadenceno_start", FieldValue::integer(cadence_start));
        row.push("cadenceno_end", FieldValue::integer(cadence_end));
        Self::push_keywords(&mut row, fits, SAMPLE_HDU, &SAMPLE_KEYWORDS)?;
        row.push("npix", FieldValue::integer(npix as i64));
        Self::push_keywords(&mut row, fits, APERTURE_HDU, &APERTURE_KEYWORDS)?;

        Ok(row)
    }

    fn stage_name(&self) -> &'static str {
        "tpf_extractor"
    }
}
