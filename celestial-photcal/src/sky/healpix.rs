//! HEALPix utilities for the catalog cache's spatial index.
//!
//! Provides conversion from sky coordinates to nested pixel indices and a
//! conservative disc coverage used to pick candidate buckets for region
//! queries.

use std::collections::BTreeSet;

use super::{normalize_ra, DEG_TO_RAD, RAD_TO_DEG};

/// Side of an equal-area pixel at nside = 1, in degrees: `sqrt(41253 / 12)`.
const BASE_PIXEL_SIZE_DEG: f64 = 58.63;

/// Highest order the index accepts; pixel ids stay well inside `u64`.
pub const MAX_ORDER: u32 = 20;

pub fn nside(order: u32) -> u64 {
    1u64 << order
}

pub fn pixel_count(order: u32) -> u64 {
    let nside = nside(order);
    12 * nside * nside
}

/// Approximate pixel side in degrees at `order`.
pub fn pixel_size_deg(order: u32) -> f64 {
    BASE_PIXEL_SIZE_DEG / nside(order) as f64
}

/// Convert (RA, Dec) in degrees to a HEALPix nested pixel index.
///
/// Gorski et al. (2005), nested scheme. RA may be any finite value.
pub fn ang2pix_nest(order: u32, ra_deg: f64, dec_deg: f64) -> u64 {
    let nside = nside(order);
    let z = libm::sin(dec_deg.clamp(-90.0, 90.0) * DEG_TO_RAD);
    let tt = normalize_ra(ra_deg) / 90.0;

    let (face, ix, iy) = if libm::fabs(z) <= 2.0 / 3.0 {
        equatorial_face(tt, z, order)
    } else {
        polar_face(tt, z, nside)
    };

    face * nside * nside + xy2pix_nest(ix, iy, order)
}

/// Equatorial belt, `|z| <= 2/3`.
fn equatorial_face(tt: f64, z: f64, order: u32) -> (u64, u64, u64) {
    let nside = nside(order);
    let temp1 = nside as f64 * (0.5 + tt);
    let temp2 = nside as f64 * z * 0.75;
    let jp = (temp1 - temp2) as u64;
    let jm = (temp1 + temp2) as u64;
    let ifp = jp >> order;
    let ifm = jm >> order;

    let face = if ifp == ifm {
        ifp | 4
    } else if ifp < ifm {
        ifp
    } else {
        ifm + 8
    };

    let ix = jm & (nside - 1);
    let iy = nside - (jp & (nside - 1)) - 1;
    (face, ix, iy)
}

/// Polar caps, `|z| > 2/3`.
fn polar_face(tt: f64, z: f64, nside: u64) -> (u64, u64, u64) {
    let ntt = (libm::floor(tt) as u64).min(3);
    let tp = tt - ntt as f64;
    let tmp = nside as f64 * libm::sqrt(3.0 * (1.0 - libm::fabs(z)));

    let jp = ((tp * tmp) as u64).min(nside - 1);
    let jm = (((1.0 - tp) * tmp) as u64).min(nside - 1);

    if z > 0.0 {
        (ntt, nside - jm - 1, nside - jp - 1)
    } else {
        (ntt + 8, jp, jm)
    }
}

/// Interleave `(ix, iy)` bits into the in-face Z-order index.
fn xy2pix_nest(ix: u64, iy: u64, order: u32) -> u64 {
    let mut result: u64 = 0;
    for i in 0..order {
        let bit_x = (ix >> i) & 1;
        let bit_y = (iy >> i) & 1;
        result |= (bit_x << (2 * i)) | (bit_y << (2 * i + 1));
    }
    result
}

/// Expected number of pixels touched by a disc of `radius_deg` once padded,
/// used to decide between a coverage walk and a scan of occupied pixels.
pub fn estimated_disc_pixels(order: u32, radius_deg: f64) -> f64 {
    let padded = (radius_deg + 2.0 * pixel_size_deg(order)).min(180.0);
    let fraction = (1.0 - libm::cos(padded * DEG_TO_RAD)) / 2.0;
    fraction * pixel_count(order) as f64
}

/// All nested pixels that may hold a point within `radius_deg` of the
/// center. Conservative: never misses an overlapping pixel, may include
/// neighbours. Sorted ascending.
///
/// The padded disc is sampled on rows a quarter pixel apart; each row spans
/// the exact RA half-width of the padded cap at that declination.
pub fn disc_pixels(order: u32, ra_deg: f64, dec_deg: f64, radius_deg: f64) -> Vec<u64> {
    let pixel_size = pixel_size_deg(order);
    let step = pixel_size * 0.25;
    let padded = radius_deg.max(0.0) + 2.0 * pixel_size;

    if padded >= 180.0 {
        return (0..pixel_count(order)).collect();
    }

    let (sin_d0, cos_d0) = libm::sincos(dec_deg * DEG_TO_RAD);
    let cos_r = libm::cos(padded * DEG_TO_RAD);

    let dec_min = (dec_deg - padded).max(-90.0);
    let dec_max = (dec_deg + padded).min(90.0);
    let rows = (((dec_max - dec_min) / step).ceil() as u64).max(1);

    let mut pixels = BTreeSet::new();
    for row in 0..=rows {
        let dec = (dec_min + row as f64 * step).min(dec_max);
        let (sin_d, cos_d) = libm::sincos(dec * DEG_TO_RAD);

        let denom = cos_d * cos_d0;
        let half_width = if denom < 1e-12 {
            180.0
        } else {
            let cos_dra = (cos_r - sin_d * sin_d0) / denom;
            if cos_dra <= -1.0 {
                180.0
            } else if cos_dra > 1.0 {
                continue;
            } else {
                libm::acos(cos_dra) * RAD_TO_DEG
            }
        };

        let ra_step = step / cos_d.max(1e-9);
        let samples = ((2.0 * half_width / ra_step).ceil() as u64).clamp(1, 32 * nside(order));
        let ra_start = ra_deg - half_width;
        let ra_span = 2.0 * half_width;
        for i in 0..=samples {
            let ra = ra_start + ra_span * i as f64 / samples as f64;
            pixels.insert(ang2pix_nest(order, ra, dec));
        }
    }

    pixels.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sky::angular_separation_deg;

    #[test]
    fn test_xy2pix_nest() {
        assert_eq!(xy2pix_nest(0, 0, 2), 0);
        assert_eq!(xy2pix_nest(1, 0, 2), 1);
        assert_eq!(xy2pix_nest(0, 1, 2), 2);
        assert_eq!(xy2pix_nest(1, 1, 2), 3);
    }

    #[test]
    fn test_base_faces() {
        assert_eq!(ang2pix_nest(0, 0.0, 0.0), 4);
        assert_eq!(ang2pix_nest(0, 90.0, 0.0), 5);
        assert_eq!(ang2pix_nest(0, 180.0, 0.0), 6);
        assert_eq!(ang2pix_nest(0, 270.0, 0.0), 7);
        assert_eq!(ang2pix_nest(0, 45.0, 60.0), 0);
        assert_eq!(ang2pix_nest(0, 135.0, 60.0), 1);
        assert_eq!(ang2pix_nest(0, 45.0, -60.0), 8);
        assert_eq!(ang2pix_nest(0, 315.0, -60.0), 11);
    }

    #[test]
    fn test_ang2pix_nest_poles() {
        assert!(ang2pix_nest(0, 0.0, 90.0) < 4);
        let south = ang2pix_nest(0, 0.0, -90.0);
        assert!((8..12).contains(&south));
    }

    #[test]
    fn test_ang2pix_nest_order8_bounds() {
        let npix = pixel_count(8);
        for ra in [0.0, 45.0, 90.0, 180.0, 270.0, 359.999] {
            for dec in [-90.0, -89.0, -45.0, -41.8, 0.0, 41.8, 45.0, 89.0, 90.0] {
                let pixel = ang2pix_nest(8, ra, dec);
                assert!(pixel < npix, "pixel {pixel} >= npix {npix} for ({ra}, {dec})");
            }
        }
    }

    #[test]
    fn test_ang2pix_nest_is_hierarchical() {
        for &(ra, dec) in &[(10.0, 10.0), (200.0, -50.0), (300.0, 80.0), (1.1, 1.1)] {
            let fine = ang2pix_nest(8, ra, dec);
            let coarse = ang2pix_nest(4, ra, dec);
            assert_eq!(fine >> 8, coarse, "({ra}, {dec})");
        }
    }

    #[test]
    fn test_ra_wraps() {
        assert_eq!(ang2pix_nest(6, -10.0, 5.0), ang2pix_nest(6, 350.0, 5.0));
        assert_eq!(ang2pix_nest(6, 370.0, 5.0), ang2pix_nest(6, 10.0, 5.0));
    }

    #[test]
    fn test_disc_pixels_contains_center() {
        let pixels = disc_pixels(4, 0.0, 0.0, 10.0);
        assert!(!pixels.is_empty());
        assert!(pixels.binary_search(&ang2pix_nest(4, 0.0, 0.0)).is_ok());
        assert!(pixels.iter().all(|&p| p < pixel_count(4)));
    }

    #[test]
    fn test_disc_pixels_pole() {
        let pixels = disc_pixels(4, 0.0, 90.0, 5.0);
        for ra in [0.0, 90.0, 180.0, 270.0] {
            let p = ang2pix_nest(4, ra, 87.0);
            assert!(pixels.binary_search(&p).is_ok(), "missing pixel at ra={ra}");
        }
    }

    #[test]
    fn test_disc_pixels_covers_dense_sample() {
        let (ra0, dec0, radius) = (359.5, 30.0, 1.3);
        let order = 8;
        let pixels = disc_pixels(order, ra0, dec0, radius);

        for i in 0..60 {
            for j in 0..60 {
                let ra = ra0 - 2.0 + 4.0 * i as f64 / 59.0;
                let dec = dec0 - 2.0 + 4.0 * j as f64 / 59.0;
                if angular_separation_deg(ra0, dec0, ra, dec) <= radius {
                    let p = ang2pix_nest(order, ra, dec);
                    assert!(pixels.binary_search(&p).is_ok(), "missed ({ra}, {dec})");
                }
            }
        }
    }

    #[test]
    fn test_whole_sky_disc() {
        assert_eq!(disc_pixels(1, 0.0, 0.0, 180.0).len() as u64, pixel_count(1));
    }

    #[test]
    fn test_estimated_disc_pixels_grows_with_radius() {
        let small = estimated_disc_pixels(8, 0.01);
        let large = estimated_disc_pixels(8, 10.0);
        assert!(small > 0.0 && small < large);
        assert!(estimated_disc_pixels(8, 180.0) <= pixel_count(8) as f64 + 1e-6);
    }
}
