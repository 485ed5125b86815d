//! Synthetic FITS target pixel files for tests.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;

/// Gzip-compresses `bytes`, as the archive serves its files.
pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Value written into a header card.
#[derive(Debug, Clone)]
pub enum Card {
    Int(i64),
    Float(f64),
    Text(String),
    Logical(bool),
    Undefined,
}

fn card(keyword: &str, value: &Card) -> String {
    let field = match value {
        Card::Int(i) => format!("{i:>20}"),
        Card::Float(f) => format!("{:>20}", format!("{f:E}")),
        Card::Text(s) => format!("'{:<8}'", s.replace('\'', "''")),
        Card::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        Card::Undefined => String::new(),
    };
    let mut line = format!("{keyword:<8}= {field}");
    line.truncate(CARD_SIZE);
    format!("{line:<80}")
}

fn pad(bytes: &mut Vec<u8>, fill: u8) {
    let rem = bytes.len() % BLOCK_SIZE;
    if rem != 0 {
        bytes.resize(bytes.len() + BLOCK_SIZE - rem, fill);
    }
}

fn header_bytes(cards: &[(String, Card)]) -> Vec<u8> {
    let mut out = String::new();
    for (k, v) in cards {
        out.push_str(&card(k, v));
    }
    out.push_str(&format!("{:<80}", "END"));
    let mut bytes = out.into_bytes();
    pad(&mut bytes, b' ');
    bytes
}

/// Assembles FITS byte streams HDU by HDU.
#[derive(Debug, Default)]
pub struct FitsBuilder {
    bytes: Vec<u8>,
}

impl FitsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primary HDU without data.
    pub fn primary(mut self, extra: &[(String, Card)]) -> Self {
        let mut cards = vec![
            ("SIMPLE".to_string(), Card::Logical(true)),
            ("BITPIX".to_string(), Card::Int(8)),
            ("NAXIS".to_string(), Card::Int(0)),
            ("EXTEND".to_string(), Card::Logical(true)),
        ];
        cards.extend_from_slice(extra);
        self.bytes.extend(header_bytes(&cards));
        self
    }

    /// 32-bit integer image extension.
    pub fn image(mut self, width: i64, height: i64, pixels: &[i64], extra: &[(String, Card)]) -> Self {
        let mut cards = vec![
            ("XTENSION".to_string(), Card::Text("IMAGE".into())),
            ("BITPIX".to_string(), Card::Int(32)),
            ("NAXIS".to_string(), Card::Int(2)),
            ("NAXIS1".to_string(), Card::Int(width)),
            ("NAXIS2".to_string(), Card::Int(height)),
            ("PCOUNT".to_string(), Card::Int(0)),
            ("GCOUNT".to_string(), Card::Int(1)),
        ];
        cards.extend_from_slice(extra);
        self.bytes.extend(header_bytes(&cards));
        self.push_pixels((width * height) as usize, pixels);
        self
    }

    /// 32-bit image extension header with no data following it.
    pub fn image_header(mut self, axes: &[i64]) -> Self {
        let mut cards = vec![
            ("XTENSION".to_string(), Card::Text("IMAGE".into())),
            ("BITPIX".to_string(), Card::Int(32)),
            ("NAXIS".to_string(), Card::Int(axes.len() as i64)),
        ];
        for (i, n) in axes.iter().enumerate() {
            cards.push((format!("NAXIS{}", i + 1), Card::Int(*n)));
        }
        cards.push(("PCOUNT".to_string(), Card::Int(0)));
        cards.push(("GCOUNT".to_string(), Card::Int(1)));
        self.bytes.extend(header_bytes(&cards));
        self
    }

    /// Binary table with a `TIME` (D) column followed by an optional
    /// `CADENCENO` (J) column.
    pub fn cadence_table(mut self, cadences: &[i32], with_cadence_column: bool, extra: &[(String, Card)]) -> Self {
        let row_len: i64 = if with_cadence_column { 12 } else { 8 };
        let mut cards = vec![
            ("XTENSION".to_string(), Card::Text("BINTABLE".into())),
            ("BITPIX".to_string(), Card::Int(8)),
            ("NAXIS".to_string(), Card::Int(2)),
            ("NAXIS1".to_string(), Card::Int(row_len)),
            ("NAXIS2".to_string(), Card::Int(cadences.len() as i64)),
            ("PCOUNT".to_string(), Card::Int(0)),
            ("GCOUNT".to_string(), Card::Int(1)),
            ("TFIELDS".to_string(), Card::Int(if with_cadence_column { 2 } else { 1 })),
            ("TTYPE1".to_string(), Card::Text("TIME".into())),
            ("TFORM1".to_string(), Card::Text("D".into())),
        ];
        if with_cadence_column {
            cards.push(("TTYPE2".to_string(), Card::Text("CADENCENO".into())));
            cards.push(("TFORM2".to_string(), Card::Text("J".into())));
        }
        cards.extend_from_slice(extra);
        self.bytes.extend(header_bytes(&cards));

        let mut data = Vec::new();
        for (i, c) in cadences.iter().enumerate() {
            data.extend((2000.0 + i as f64 * 0.02).to_be_bytes());
            if with_cadence_column {
                data.extend(c.to_be_bytes());
            }
        }
        pad(&mut data, 0);
        self.bytes.extend(data);
        self
    }

    /// Big-endian 32-bit pixels; missing ones are zero-filled.
    fn push_pixels(&mut self, count: usize, pixels: &[i64]) {
        let mut data = Vec::new();
        for i in 0..count {
            let v = pixels.get(i).copied().unwrap_or(0) as i32;
            data.extend(v.to_be_bytes());
        }
        pad(&mut data, 0);
        self.bytes.extend(data);
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// A K2-style target pixel file with overridable content.
#[derive(Debug, Clone)]
pub struct TpfFixture {
    pub primary: Vec<(String, Card)>,
    pub sample: Vec<(String, Card)>,
    pub aperture: Vec<(String, Card)>,
    pub cadences: Vec<i32>,
    pub with_cadence_column: bool,
    pub mask: Vec<i64>,
    pub mask_width: i64,
    pub mask_height: i64,
    /// Keywords left out of every header.
    pub omit: Vec<&'static str>,
    /// Keywords written with an empty value.
    pub undefined: Vec<&'static str>,
}

fn kv(k: &str, v: Card) -> (String, Card) {
    (k.to_string(), v)
}

impl Default for TpfFixture {
    fn default() -> Self {
        Self {
            primary: vec![
                kv("OBJECT", Card::Text("EPIC 201000001".into())),
                kv("KEPLERID", Card::Int(201000001)),
                kv("OBSMODE", Card::Text("long cadence".into())),
                kv("CAMPAIGN", Card::Int(1)),
                kv("CHANNEL", Card::Int(24)),
                kv("MODULE", Card::Int(8)),
                kv("OUTPUT", Card::Int(4)),
                kv("RA_OBJ", Card::Float(174.5)),
                kv("DEC_OBJ", Card::Float(1.25)),
                kv("KEPMAG", Card::Float(12.3)),
            ],
            sample: vec![
                kv("LC_START", Card::Float(56808.5)),
                kv("LC_END", Card::Float(56888.25)),
                kv("GAIN", Card::Float(112.7)),
                kv("READNOIS", Card::Float(83.5)),
                kv("MEANBLCK", Card::Int(738)),
                kv("CDPP3_0", Card::Float(45.2)),
                kv("CDPP6_0", Card::Float(33.1)),
                kv("CDPP12_0", Card::Float(25.0)),
            ],
            aperture: vec![
                kv("CRPIX1", Card::Float(2.0)),
                kv("CRPIX2", Card::Float(1.5)),
                kv("CRVAL1", Card::Float(174.5)),
                kv("CRVAL2", Card::Float(1.25)),
                kv("CDELT1", Card::Float(-0.001106)),
                kv("CDELT2", Card::Float(0.001106)),
                kv("PC1_1", Card::Float(1.0)),
                kv("PC1_2", Card::Float(0.0)),
                kv("PC2_1", Card::Float(0.0)),
                kv("PC2_2", Card::Float(1.0)),
                kv("CRVAL1P", Card::Int(512)),
                kv("CRVAL2P", Card::Int(640)),
            ],
            cadences: vec![90000, 90001, 90002],
            with_cadence_column: true,
            mask: vec![0, 3, 3, 1, 3, 0],
            mask_width: 3,
            mask_height: 2,
            omit: Vec::new(),
            undefined: Vec::new(),
        }
    }
}

impl TpfFixture {
    /// Overrides (or adds) a primary header keyword.
    pub fn with_primary(mut self, keyword: &str, value: Card) -> Self {
        self.primary.retain(|(k, _)| k != keyword);
        self.primary.push(kv(keyword, value));
        self
    }

    fn filtered(&self, cards: &[(String, Card)]) -> Vec<(String, Card)> {
        cards
            .iter()
            .filter(|(k, _)| !self.omit.contains(&k.as_str()))
            .map(|(k, v)| {
                if self.undefined.contains(&k.as_str()) {
                    (k.clone(), Card::Undefined)
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }

    pub fn bytes(&self) -> Vec<u8> {
        FitsBuilder::new()
            .primary(&self.filtered(&self.primary))
            .cadence_table(&self.cadences, self.with_cadence_column, &self.filtered(&self.sample))
            .image(self.mask_width, self.mask_height, &self.mask, &self.filtered(&self.aperture))
            .build()
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.bytes()).expect("write fixture");
    }
}
