//! Regions on the sphere: caps, convex polygons, and the bounding region of
//! a set of observed positions.
//!
//! Polygon edges are great-circle arcs. The bounding region of a point set
//! is found in the gnomonic projection about the point centroid, where great
//! circles are straight lines, so a planar convex hull maps back onto a
//! convex spherical polygon.

use crate::error::{Error, Result};

use super::{cross, dot, normalize, SkyPosition};

/// Slack added to derived cap radii so that the defining points stay inside
/// after a round trip through unit vectors.
const RADIUS_SLACK_DEG: f64 = 1e-9;

/// Relative tolerance for vertices lying on the great circle of an edge.
const CONVEXITY_TOLERANCE: f64 = 1e-12;

/// Smallest hull area (tangent plane, rad²) still treated as a polygon.
const MIN_HULL_AREA: f64 = 1e-20;

/// A spherical cap: every position within `radius_deg` of `center`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cap {
    pub center: SkyPosition,
    pub radius_deg: f64,
}

impl Cap {
    pub fn new(center: SkyPosition, radius_deg: f64) -> Result<Self> {
        if !center.is_valid() {
            return Err(Error::InvalidPosition {
                ra: center.ra,
                dec: center.dec,
            });
        }
        if !radius_deg.is_finite() || radius_deg < 0.0 {
            return Err(Error::InvalidRegion(format!(
                "cap radius must be finite and non-negative, got {radius_deg}"
            )));
        }
        Ok(Self {
            center: center.normalized(),
            radius_deg: radius_deg.min(180.0),
        })
    }

    pub fn contains(&self, position: &SkyPosition) -> bool {
        self.center.separation_deg(position) <= self.radius_deg
    }

    /// Cap about the unit vector `center` enclosing every point in `points`.
    fn enclosing(center: [f64; 3], points: &[[f64; 3]]) -> Self {
        let center = SkyPosition::from_xyz(center);
        let radius = points
            .iter()
            .map(|&p| center.separation_deg(&SkyPosition::from_xyz(p)))
            .fold(0.0_f64, f64::max);
        Self {
            center,
            radius_deg: (radius * (1.0 + 1e-9) + RADIUS_SLACK_DEG).min(180.0),
        }
    }
}

/// A convex spherical polygon with great-circle edges. Vertices may be given
/// in either winding order; the polygon must fit within a hemisphere.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<SkyPosition>,
    normals: Vec<[f64; 3]>,
    bound: Cap,
}

impl Polygon {
    pub fn new(vertices: &[SkyPosition]) -> Result<Self> {
        if let Some(bad) = vertices.iter().find(|v| !v.is_valid()) {
            return Err(Error::InvalidPosition {
                ra: bad.ra,
                dec: bad.dec,
            });
        }

        let mut corners: Vec<[f64; 3]> = Vec::with_capacity(vertices.len());
        for v in vertices {
            let xyz = v.to_xyz();
            if corners.last().is_some_and(|&prev| same_point(prev, xyz)) {
                continue;
            }
            corners.push(xyz);
        }
        while corners.len() > 1 && same_point(corners[0], corners[corners.len() - 1]) {
            corners.pop();
        }
        if corners.len() < 3 {
            return Err(Error::InvalidRegion(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                corners.len()
            )));
        }

        let sum = corners.iter().fold([0.0; 3], |acc, c| {
            [acc[0] + c[0], acc[1] + c[1], acc[2] + c[2]]
        });
        let center = normalize(sum)
            .ok_or_else(|| Error::InvalidRegion("polygon vertices have no centroid".into()))?;

        let n = corners.len();
        let mut normals = Vec::with_capacity(n);
        for i in 0..n {
            let normal = normalize(cross(corners[i], corners[(i + 1) % n])).ok_or_else(|| {
                Error::InvalidRegion("polygon has antipodal adjacent vertices".into())
            })?;
            normals.push(normal);
        }

        let positive = normals.iter().filter(|&&nrm| dot(nrm, center) > 0.0).count();
        if positive == 0 {
            for nrm in &mut normals {
                *nrm = [-nrm[0], -nrm[1], -nrm[2]];
            }
        } else if positive != n {
            return Err(Error::InvalidRegion("polygon is not convex".into()));
        }

        for nrm in &normals {
            if corners.iter().any(|&c| dot(*nrm, c) < -CONVEXITY_TOLERANCE) {
                return Err(Error::InvalidRegion("polygon is not convex".into()));
            }
        }

        Ok(Self {
            vertices: corners.iter().map(|&c| SkyPosition::from_xyz(c)).collect(),
            normals,
            bound: Cap::enclosing(center, &corners),
        })
    }

    pub fn vertices(&self) -> &[SkyPosition] {
        &self.vertices
    }

    pub fn contains(&self, position: &SkyPosition) -> bool {
        let p = position.to_xyz();
        self.normals.iter().all(|&nrm| dot(nrm, p) >= 0.0)
    }
}

/// A query region for the entry store.
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Cap(Cap),
    Polygon(Polygon),
}

impl Region {
    pub fn cap(center: SkyPosition, radius_deg: f64) -> Result<Self> {
        Cap::new(center, radius_deg).map(Region::Cap)
    }

    pub fn polygon(vertices: &[SkyPosition]) -> Result<Self> {
        Polygon::new(vertices).map(Region::Polygon)
    }

    /// Convex region enclosing `positions`.
    ///
    /// Three or more non-collinear points give the convex hull as a polygon.
    /// Degenerate sets (one point, collinear points, points spread over more
    /// than a hemisphere) give the smallest cap about the centroid that
    /// contains them all. Invalid positions are skipped.
    pub fn bounding(positions: &[SkyPosition]) -> Result<Self> {
        let points: Vec<[f64; 3]> = positions
            .iter()
            .filter(|p| p.is_valid())
            .map(SkyPosition::to_xyz)
            .collect();

        if points.is_empty() {
            return Err(Error::InvalidRegion("no valid positions".into()));
        }
        if points.len() < positions.len() {
            log::warn!(
                "skipping {} invalid position(s) when bounding the field",
                positions.len() - points.len()
            );
        }

        let sum = points.iter().fold([0.0; 3], |acc, c| {
            [acc[0] + c[0], acc[1] + c[1], acc[2] + c[2]]
        });
        let Some(center) = normalize(sum) else {
            log::warn!("positions have no centroid, bounding with the whole sky");
            return Ok(Region::Cap(Cap {
                center: SkyPosition::new(0.0, 90.0),
                radius_deg: 180.0,
            }));
        };

        if points.len() < 3 || points.iter().any(|&p| dot(p, center) <= 1e-6) {
            return Ok(Region::Cap(Cap::enclosing(center, &points)));
        }

        let (east, north) = tangent_basis(center);
        let projected: Vec<(f64, f64)> = points
            .iter()
            .map(|&p| {
                let w = dot(p, center);
                (dot(p, east) / w, dot(p, north) / w)
            })
            .collect();

        let hull = convex_hull(&projected);
        if hull.len() < 3 || polygon_area(&hull) <= MIN_HULL_AREA {
            return Ok(Region::Cap(Cap::enclosing(center, &points)));
        }

        let vertices: Vec<SkyPosition> = hull
            .iter()
            .filter_map(|&(x, y)| {
                normalize([
                    center[0] + x * east[0] + y * north[0],
                    center[1] + x * east[1] + y * north[1],
                    center[2] + x * east[2] + y * north[2],
                ])
            })
            .map(SkyPosition::from_xyz)
            .collect();

        match Polygon::new(&vertices) {
            Ok(polygon) => Ok(Region::Polygon(polygon)),
            Err(e) => {
                log::debug!("hull rejected ({e}), bounding with a cap");
                Ok(Region::Cap(Cap::enclosing(center, &points)))
            }
        }
    }

    pub fn contains(&self, position: &SkyPosition) -> bool {
        if !position.is_valid() {
            return false;
        }
        match self {
            Region::Cap(cap) => cap.contains(position),
            Region::Polygon(polygon) => polygon.contains(position),
        }
    }

    /// The region grown outward by at least `margin_deg`. A polygon becomes
    /// its bounding cap widened by the margin.
    pub fn expanded(&self, margin_deg: f64) -> Self {
        if !margin_deg.is_finite() || margin_deg <= 0.0 {
            return self.clone();
        }
        let cap = self.bounding_cap();
        Region::Cap(Cap {
            center: cap.center,
            radius_deg: (cap.radius_deg + margin_deg).min(180.0),
        })
    }

    /// A cap enclosing the whole region, used to pick index buckets.
    pub fn bounding_cap(&self) -> Cap {
        match self {
            Region::Cap(cap) => *cap,
            Region::Polygon(polygon) => polygon.bound,
        }
    }
}

fn same_point(a: [f64; 3], b: [f64; 3]) -> bool {
    dot(a, b) > 1.0 - 1e-15
}

/// East and north unit vectors of the tangent plane at `center`.
fn tangent_basis(center: [f64; 3]) -> ([f64; 3], [f64; 3]) {
    let east = normalize(cross([0.0, 0.0, 1.0], center)).unwrap_or([0.0, 1.0, 0.0]);
    let north = cross(center, east);
    (east, north)
}

fn cross_2d(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Andrew's monotone chain. Counter-clockwise, collinear points dropped.
fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut lower: Vec<(f64, f64)> = Vec::with_capacity(sorted.len());
    for &p in &sorted {
        while lower.len() >= 2 && cross_2d(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<(f64, f64)> = Vec::with_capacity(sorted.len());
    for &p in sorted.iter().rev() {
        while upper.len() >= 2 && cross_2d(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn polygon_area(hull: &[(f64, f64)]) -> f64 {
    let n = hull.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let (a, b) = (hull[i], hull[(i + 1) % n]);
            a.0 * b.1 - b.0 * a.1
        })
        .sum();
    twice.abs() / 2.0
}
