use serde::{Deserialize, Serialize};
use std::fmt;

/// One remote file to be harvested into a metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// URL or filesystem path the content is fetched from.
    pub locator: String,
    /// Public URL stored as provenance (defaults to `locator`).
    pub public_url: Option<String>,
}

impl Record {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into().trim().to_string(),
            public_url: None,
        }
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Parses one line of an input list. Blank lines yield `None`.
    pub fn from_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self::new(trimmed))
        }
    }

    /// URL written to the `url` column.
    pub fn provenance_url(&self) -> &str {
        self.public_url.as_deref().unwrap_or(&self.locator)
    }

    /// Identifying name: the last path segment of the provenance URL.
    pub fn filename(&self) -> &str {
        let url = self.provenance_url().trim_end_matches('/');
        url.rsplit('/').next().unwrap_or(url)
    }
}

/// A scalar value read from a container header or derived from its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Integer(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Float(v) => f.write_str(&format_float(*v)),
        }
    }
}

/// Shortest round-trip representation, keeping a `.0` on integral values
/// so float columns stay recognizable as floats.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let rendered = format!("{value}");
    if value.fract() == 0.0 && !rendered.contains(['.', 'e']) {
        format!("{rendered}.0")
    } else {
        rendered
    }
}

/// Result of a tolerant field lookup.
///
/// `Absent` (keyword not present) and `Undefined` (keyword present with an
/// empty value) are kept apart here and only collapse to the empty
/// placeholder when the row is serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Present(Scalar),
    Absent,
    Undefined,
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Present(Scalar::Text(value.into()))
    }

    pub fn integer(value: i64) -> Self {
        FieldValue::Present(Scalar::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        FieldValue::Present(Scalar::Float(value))
    }

    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Present(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Present(s) => s.as_f64(),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Present(s) => s.fmt(f),
            FieldValue::Absent | FieldValue::Undefined => Ok(()),
        }
    }
}

/// Ordered set of named fields describing one harvested record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    fields: Vec<(String, FieldValue)>,
}

impl MetadataRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field. Names are stored lower-cased.
    pub fn push(&mut self, name: &str, value: FieldValue) {
        self.fields.push((name.to_lowercase(), value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        let name = name.to_lowercase();
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values as they appear in the output table.
    pub fn rendered(&self) -> Vec<String> {
        self.values().map(ToString::to_string).collect()
    }
}

/// A record that could not be harvested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFailure {
    pub locator: String,
    pub cause: String,
}

/// Overall result of a run, used for the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every attempted record produced a row.
    Clean,
    /// Some records were skipped after failures.
    Partial,
    /// No attempted record succeeded.
    AllFailed,
    /// Nothing was attempted.
    Empty,
}

/// Summary of one assembler run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestReport {
    pub succeeded: usize,
    pub failed: Vec<RecordFailure>,
    /// Records excluded by the cadence-variant filter.
    pub filtered: usize,
    /// Records whose filename was already written during this run.
    pub duplicates: usize,
}

impl HarvestReport {
    pub fn outcome(&self) -> RunOutcome {
        match (self.succeeded, self.failed.len()) {
            (0, 0) => RunOutcome::Empty,
            (_, 0) => RunOutcome::Clean,
            (0, _) => RunOutcome::AllFailed,
            _ => RunOutcome::Partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_filename_uses_public_url() {
        let record = Record::new("/tmp/123-ktwo201.fits")
            .with_public_url("http://archive/k2/c01/ktwo201-c01_lpd-targ.fits.gz");
        assert_eq!(record.filename(), "ktwo201-c01_lpd-targ.fits.gz");
        assert_eq!(
            record.provenance_url(),
            "http://archive/k2/c01/ktwo201-c01_lpd-targ.fits.gz"
        );
    }

    #[test]
    fn test_record_from_line_skips_blank() {
        assert!(Record::from_line("   \n").is_none());
        let record = Record::from_line("  http://x/a.fits \n").unwrap();
        assert_eq!(record.locator, "http://x/a.fits");
        assert_eq!(record.filename(), "a.fits");
    }

    #[test]
    fn test_absent_and_undefined_render_empty() {
        assert_eq!(FieldValue::Absent.to_string(), "");
        assert_eq!(FieldValue::Undefined.to_string(), "");
        assert_ne!(FieldValue::Absent, FieldValue::Undefined);
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-3.0), "-3.0");
        assert_eq!(format_float(12.345), "12.345");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn test_report_outcome() {
        let mut report = HarvestReport::default();
        assert_eq!(report.outcome(), RunOutcome::Empty);
        report.succeeded = 2;
        assert_eq!(report.outcome(), RunOutcome::Clean);
        report.failed.push(RecordFailure {
            locator: "x".into(),
            cause: "boom".into(),
        });
        assert_eq!(report.outcome(), RunOutcome::Partial);
        report.succeeded = 0;
        assert_eq!(report.outcome(), RunOutcome::AllFailed);
    }
}
