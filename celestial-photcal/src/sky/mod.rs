//! Spherical geometry on the celestial sphere.
//!
//! - [`SkyPosition`] and the Vincenty [`angular_separation_deg`]
//! - [`healpix`]: nested pixel indexing and conservative disc coverage
//! - [`region`]: caps, convex polygons, and the bounding region of a point set

pub mod healpix;
pub mod region;

pub use region::{Cap, Polygon, Region};

use serde::{Deserialize, Serialize};

pub(crate) const DEG_TO_RAD: f64 = core::f64::consts::PI / 180.0;
pub(crate) const RAD_TO_DEG: f64 = 180.0 / core::f64::consts::PI;
pub const ARCSEC_PER_DEG: f64 = 3600.0;

/// A position in an ICRS-equivalent frame, both angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub ra: f64,
    pub dec: f64,
}

impl SkyPosition {
    pub const fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// Finite coordinates with `|dec| <= 90`. RA may be any finite value;
    /// it is wrapped by [`SkyPosition::normalized`].
    pub fn is_valid(&self) -> bool {
        self.ra.is_finite() && self.dec.is_finite() && (-90.0..=90.0).contains(&self.dec)
    }

    /// Same position with RA wrapped into `[0, 360)`.
    pub fn normalized(&self) -> Self {
        Self {
            ra: normalize_ra(self.ra),
            dec: self.dec,
        }
    }

    pub fn to_xyz(&self) -> [f64; 3] {
        radec_to_xyz(self.ra, self.dec)
    }

    pub fn from_xyz(xyz: [f64; 3]) -> Self {
        let (ra, dec) = xyz_to_radec(xyz);
        Self { ra, dec }
    }

    pub fn separation_deg(&self, other: &SkyPosition) -> f64 {
        angular_separation_deg(self.ra, self.dec, other.ra, other.dec)
    }

    pub fn separation_arcsec(&self, other: &SkyPosition) -> f64 {
        self.separation_deg(other) * ARCSEC_PER_DEG
    }
}

/// Wrap an RA in degrees into `[0, 360)`.
pub fn normalize_ra(ra: f64) -> f64 {
    let wrapped = ra % 360.0;
    let wrapped = if wrapped < 0.0 { wrapped + 360.0 } else { wrapped };
    // -1e-17 % 360 + 360 rounds to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Angular distance between two points on the sphere using the Vincenty
/// formula, stable at all separations. Inputs and output in degrees.
pub fn angular_separation_deg(ra1_deg: f64, dec1_deg: f64, ra2_deg: f64, dec2_deg: f64) -> f64 {
    let (sin_lat1, cos_lat1) = libm::sincos(dec1_deg * DEG_TO_RAD);
    let (sin_lat2, cos_lat2) = libm::sincos(dec2_deg * DEG_TO_RAD);
    let (sin_dlon, cos_dlon) = libm::sincos((ra2_deg - ra1_deg) * DEG_TO_RAD);

    let num = libm::sqrt(
        (cos_lat2 * sin_dlon).powi(2) + (cos_lat1 * sin_lat2 - sin_lat1 * cos_lat2 * cos_dlon).powi(2),
    );
    let den = sin_lat1 * sin_lat2 + cos_lat1 * cos_lat2 * cos_dlon;

    libm::atan2(num, den) * RAD_TO_DEG
}

/// Unit vector for (RA, Dec) in degrees.
pub fn radec_to_xyz(ra_deg: f64, dec_deg: f64) -> [f64; 3] {
    let (sin_ra, cos_ra) = libm::sincos(ra_deg * DEG_TO_RAD);
    let (sin_dec, cos_dec) = libm::sincos(dec_deg * DEG_TO_RAD);
    [cos_dec * cos_ra, cos_dec * sin_ra, sin_dec]
}

/// (RA, Dec) in degrees for a (not necessarily unit) vector. RA in `[0, 360)`.
pub fn xyz_to_radec(xyz: [f64; 3]) -> (f64, f64) {
    let ra = libm::atan2(xyz[1], xyz[0]) * RAD_TO_DEG;
    let rho = libm::hypot(xyz[0], xyz[1]);
    let dec = libm::atan2(xyz[2], rho) * RAD_TO_DEG;
    (normalize_ra(ra), dec)
}

pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn normalize(v: [f64; 3]) -> Option<[f64; 3]> {
    let norm = libm::sqrt(dot(v, v));
    if norm < 1e-15 || !norm.is_finite() {
        return None;
    }
    Some([v[0] / norm, v[1] / norm, v[2] / norm])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_separation_same_point() {
        assert_abs_diff_eq!(angular_separation_deg(10.0, 20.0, 10.0, 20.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_separation_known_values() {
        assert_abs_diff_eq!(angular_separation_deg(0.0, 0.0, 90.0, 0.0), 90.0, epsilon = 1e-10);
        assert_abs_diff_eq!(angular_separation_deg(0.0, 90.0, 0.0, -90.0), 180.0, epsilon = 1e-10);
        assert_abs_diff_eq!(angular_separation_deg(0.0, 0.0, 180.0, 0.0), 180.0, epsilon = 1e-10);

        let one_arcsec = 1.0 / 3600.0;
        let sep = angular_separation_deg(150.0, 2.0, 150.0, 2.0 + one_arcsec);
        assert_abs_diff_eq!(sep * ARCSEC_PER_DEG, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_separation_across_ra_wrap() {
        let sep = angular_separation_deg(359.9, 0.0, 0.1, 0.0);
        assert_abs_diff_eq!(sep, 0.2, epsilon = 1e-10);
    }

    #[test]
    fn test_normalize_ra() {
        assert_eq!(normalize_ra(0.0), 0.0);
        assert_eq!(normalize_ra(360.0), 0.0);
        assert_abs_diff_eq!(normalize_ra(-10.0), 350.0, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_ra(725.0), 5.0, epsilon = 1e-12);
        assert!(normalize_ra(-1e-17) < 360.0);
    }

    #[test]
    fn test_xyz_round_trip() {
        for &(ra, dec) in &[(0.0, 0.0), (45.0, 30.0), (270.0, -60.0), (123.4, 89.0)] {
            let (ra2, dec2) = xyz_to_radec(radec_to_xyz(ra, dec));
            assert_abs_diff_eq!(ra2, ra, epsilon = 1e-10);
            assert_abs_diff_eq!(dec2, dec, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_position_validity() {
        assert!(SkyPosition::new(10.0, 90.0).is_valid());
        assert!(SkyPosition::new(-10.0, 0.0).is_valid());
        assert!(!SkyPosition::new(10.0, 90.5).is_valid());
        assert!(!SkyPosition::new(f64::NAN, 0.0).is_valid());
        assert!(!SkyPosition::new(0.0, f64::INFINITY).is_valid());
    }
}
