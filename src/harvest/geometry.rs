//! Pixel-to-sky transform for target masks.
//!
//! The aperture header of each file carries a linear world coordinate
//! system: reference pixel (`CRPIX`), reference sky position (`CRVAL`),
//! pixel scale (`CDELT`) and a 2x2 `PC` matrix, combined with a gnomonic
//! (tangent-plane) projection. Corners are evaluated at pixel edges, i.e.
//! `-0.5` and `dimension - 0.5` in 0-based pixel coordinates.
//!
//! No wrap-around handling is done: bounding boxes straddling RA = 0/360 or
//! a celestial pole come out as plain min/max over the corners.

use crate::model::{format_float, FieldValue, MetadataRow};

/// Supported sky projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Gnomonic projection (`RA---TAN` / `DEC--TAN`).
    #[default]
    Tan,
}

/// Linear calibration of a mask plus its projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Reference pixel, 1-based.
    pub crpix: [f64; 2],
    /// Sky coordinate of the reference pixel, degrees.
    pub crval: [f64; 2],
    /// Degrees per pixel along each axis.
    pub cdelt: [f64; 2],
    /// Rotation/skew matrix.
    pub pc: [[f64; 2]; 2],
    pub projection: Projection,
}

impl Calibration {
    /// Reads the calibration columns of an extracted row.
    ///
    /// Returns `None` if any of the required keywords is not numeric.
    pub fn from_row(row: &MetadataRow) -> Option<Self> {
        let f = |name: &str| row.get(name).and_then(FieldValue::as_f64);
        Some(Self {
            crpix: [f("crpix1")?, f("crpix2")?],
            crval: [f("crval1")?, f("crval2")?],
            cdelt: [f("cdelt1")?, f("cdelt2")?],
            pc: [[f("pc1_1")?, f("pc1_2")?], [f("pc2_1")?, f("pc2_2")?]],
            projection: Projection::Tan,
        })
    }

    /// Maps a 0-based pixel position to (RA, Dec) in degrees.
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> SkyPoint {
        // FITS pixel coordinates are 1-based.
        let dx = x + 1.0 - self.crpix[0];
        let dy = y + 1.0 - self.crpix[1];
        let u = self.cdelt[0] * (self.pc[0][0] * dx + self.pc[0][1] * dy);
        let v = self.cdelt[1] * (self.pc[1][0] * dx + self.pc[1][1] * dy);

        match self.projection {
            Projection::Tan => {
                let xi = u.to_radians();
                let eta = v.to_radians();
                let ra0 = self.crval[0].to_radians();
                let dec0 = self.crval[1].to_radians();

                let denom = dec0.cos() - eta * dec0.sin();
                let ra = ra0 + xi.atan2(denom);
                let dec = (dec0.sin() + eta * dec0.cos()).atan2(xi.hypot(denom));

                SkyPoint {
                    ra: ra.to_degrees().rem_euclid(360.0),
                    dec: dec.to_degrees(),
                }
            }
        }
    }
}

/// A position on the sky, degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPoint {
    pub ra: f64,
    pub dec: f64,
}

/// Corners of a `width` x `height` mask.
///
/// Order: `(-0.5, -0.5)`, `(-0.5, h-0.5)`, `(w-0.5, h-0.5)`, `(w-0.5, -0.5)`.
pub fn corners(calibration: &Calibration, width: f64, height: f64) -> [SkyPoint; 4] {
    let (x0, y0) = (-0.5, -0.5);
    let (x1, y1) = (width - 0.5, height - 0.5);
    [
        calibration.pixel_to_sky(x0, y0),
        calibration.pixel_to_sky(x0, y1),
        calibration.pixel_to_sky(x1, y1),
        calibration.pixel_to_sky(x1, y0),
    ]
}

/// Corners plus their RA/Dec extrema.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingGeometry {
    pub corners: [SkyPoint; 4],
    pub ra_min: f64,
    pub ra_max: f64,
    pub dec_min: f64,
    pub dec_max: f64,
}

impl BoundingGeometry {
    pub fn from_corners(corners: [SkyPoint; 4]) -> Self {
        let ra = corners.map(|c| c.ra);
        let dec = corners.map(|c| c.dec);
        Self {
            corners,
            ra_min: ra.iter().copied().fold(f64::INFINITY, f64::min),
            ra_max: ra.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            dec_min: dec.iter().copied().fold(f64::INFINITY, f64::min),
            dec_max: dec.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// Computes geometry from a row's calibration and `naxis1`/`naxis2`.
    pub fn from_row(row: &MetadataRow) -> Option<Self> {
        let calibration = Calibration::from_row(row)?;
        let width = row.get("naxis1")?.as_f64()?;
        let height = row.get("naxis2")?.as_f64()?;
        Some(Self::from_corners(corners(&calibration, width, height)))
    }
}

/// Names of the geometry columns, in output order.
pub const GEOMETRY_COLUMNS: [&str; 12] = [
    "corner1_ra",
    "corner1_dec",
    "corner2_ra",
    "corner2_dec",
    "corner3_ra",
    "corner3_dec",
    "corner4_ra",
    "corner4_dec",
    "ra_min",
    "ra_max",
    "dec_min",
    "dec_max",
];

fn six_decimals(v: f64) -> FieldValue {
    if v.is_finite() {
        FieldValue::text(format!("{v:.6}"))
    } else {
        FieldValue::text(format_float(v))
    }
}

/// Appends the geometry columns to `row`.
///
/// When the calibration is incomplete the columns are still appended, as
/// absent values, so every row keeps the same shape.
pub fn append_geometry(row: &mut MetadataRow, geometry: Option<&BoundingGeometry>) {
    let values: Vec<FieldValue> = match geometry {
        Some(g) => {
            let mut v = Vec::with_capacity(GEOMETRY_COLUMNS.len());
            for c in &g.corners {
                v.push(six_decimals(c.ra));
                v.push(six_decimals(c.dec));
            }
            v.extend([g.ra_min, g.ra_max, g.dec_min, g.dec_max].map(six_decimals));
            v
        }
        None => vec![FieldValue::Absent; GEOMETRY_COLUMNS.len()],
    };
    for (name, value) in GEOMETRY_COLUMNS.iter().zip(values) {
        row.push(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;
    const SCALE: f64 = 4.0 / 3600.0;

    fn identity(ra0: f64, dec0: f64, crpix: [f64; 2]) -> Calibration {
        Calibration {
            crpix,
            crval: [ra0, dec0],
            cdelt: [SCALE, SCALE],
            pc: [[1.0, 0.0], [0.0, 1.0]],
            projection: Projection::Tan,
        }
    }

    /// Inverse gnomonic projection at dec0 = 0, written out by hand.
    fn expected_equatorial(ra0: f64, dx_pix: f64, dy_pix: f64) -> (f64, f64) {
        let xi = (dx_pix * SCALE).to_radians();
        let eta = (dy_pix * SCALE).to_radians();
        let ra = ra0 + xi.atan().to_degrees();
        let dec = eta.atan2((1.0 + xi * xi).sqrt()).to_degrees();
        (ra, dec)
    }

    #[test]
    fn test_reference_pixel_maps_to_reference_coordinate() {
        let cal = identity(150.0, 30.0, [5.0, 7.0]);
        let p = cal.pixel_to_sky(4.0, 6.0);
        assert!((p.ra - 150.0).abs() < EPS);
        assert!((p.dec - 30.0).abs() < EPS);
    }

    #[test]
    fn test_corners_match_hand_computed_offsets() {
        // Reference pixel at the centre of a 10x6 mask: pixel-edge corners
        // are 5 pixels away along x and 3 along y.
        let cal = identity(10.0, 0.0, [5.5, 3.5]);
        let c = corners(&cal, 10.0, 6.0);

        let expected = [
            expected_equatorial(10.0, -5.0, -3.0),
            expected_equatorial(10.0, -5.0, 3.0),
            expected_equatorial(10.0, 5.0, 3.0),
            expected_equatorial(10.0, 5.0, -3.0),
        ];
        for (got, (ra, dec)) in c.iter().zip(expected) {
            assert!((got.ra - ra).abs() < EPS, "ra {} vs {}", got.ra, ra);
            assert!((got.dec - dec).abs() < EPS, "dec {} vs {}", got.dec, dec);
        }
    }

    #[test]
    fn test_bounding_box_is_corner_extrema() {
        let cal = Calibration {
            pc: [[0.8, -0.6], [0.6, 0.8]],
            ..identity(200.0, -45.0, [1.0, 1.0])
        };
        let g = BoundingGeometry::from_corners(corners(&cal, 12.0, 9.0));
        let ras: Vec<f64> = g.corners.iter().map(|c| c.ra).collect();
        let decs: Vec<f64> = g.corners.iter().map(|c| c.dec).collect();
        assert!(ras.contains(&g.ra_min) && ras.contains(&g.ra_max));
        assert!(decs.contains(&g.dec_min) && decs.contains(&g.dec_max));
        assert!(ras.iter().all(|r| *r >= g.ra_min && *r <= g.ra_max));
        assert!(decs.iter().all(|d| *d >= g.dec_min && *d <= g.dec_max));
    }

    #[test]
    fn test_ra_is_normalized_near_zero() {
        let cal = identity(0.0, 0.0, [1.0, 1.0]);
        let p = cal.pixel_to_sky(-10.0, 0.0);
        assert!(p.ra > 359.0 && p.ra < 360.0);
    }

    #[test]
    fn test_non_finite_calibration_propagates() {
        let cal = identity(f64::NAN, 0.0, [1.0, 1.0]);
        let g = BoundingGeometry::from_corners(corners(&cal, 2.0, 2.0));
        assert!(g.corners.iter().all(|c| c.ra.is_nan()));
    }

    #[test]
    fn test_append_geometry_keeps_row_shape() {
        let mut row = MetadataRow::new();
        append_geometry(&mut row, None);
        assert_eq!(row.len(), GEOMETRY_COLUMNS.len());
        assert!(row.values().all(|v| v.to_string().is_empty()));
    }
}
