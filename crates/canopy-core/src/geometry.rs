//! Plot geometry in geographic coordinates.
//! All coordinate math uses f64 for precision; areas are reported in hectares.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

const SQ_M_PER_HA: f64 = 10_000.0;

/// A closed ring of (lon, lat) vertices. The last vertex does not need to
/// repeat the first; the ring is treated as implicitly closed.
pub type Ring = Vec<(f64, f64)>;

/// Plot geometry: a point or a polygon with optional holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point { lon: f64, lat: f64 },
    Polygon { exterior: Ring, holes: Vec<Ring> },
}

impl Geometry {
    pub fn point(lon: f64, lat: f64) -> Self {
        Geometry::Point { lon, lat }
    }

    pub fn polygon(exterior: Ring) -> Self {
        Geometry::Polygon { exterior, holes: Vec::new() }
    }

    /// Axis-aligned rectangle helper, exterior ring in counter-clockwise order.
    pub fn rect(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Geometry::polygon(vec![
            (min_lon, min_lat),
            (max_lon, min_lat),
            (max_lon, max_lat),
            (min_lon, max_lat),
        ])
    }

    pub fn is_point(&self) -> bool {
        matches!(self, Geometry::Point { .. })
    }

    /// "point" or "polygon", reported as the `Geometry_type` output column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "point",
            Geometry::Polygon { .. } => "polygon",
        }
    }

    /// Geodesic area in hectares. Points have no extent and return exactly 0.
    ///
    /// Uses the spherical excess formula (Chamberlain & Duquette) per ring;
    /// hole areas are subtracted from the exterior.
    pub fn area_ha(&self) -> f64 {
        match self {
            Geometry::Point { .. } => 0.0,
            Geometry::Polygon { exterior, holes } => {
                let mut area = ring_area_sq_m(exterior);
                for hole in holes {
                    area -= ring_area_sq_m(hole);
                }
                area.max(0.0) / SQ_M_PER_HA
            }
        }
    }

    /// Centroid as (lon, lat). For polygons this is the planar centroid of
    /// the exterior ring, which is adequate at plot scale.
    pub fn centroid(&self) -> (f64, f64) {
        match self {
            Geometry::Point { lon, lat } => (*lon, *lat),
            Geometry::Polygon { exterior, .. } => ring_centroid(exterior),
        }
    }

    /// Bounding box as (min_lon, min_lat, max_lon, max_lat).
    pub fn bbox(&self) -> (f64, f64, f64, f64) {
        match self {
            Geometry::Point { lon, lat } => (*lon, *lat, *lon, *lat),
            Geometry::Polygon { exterior, .. } => {
                let mut min_lon = f64::INFINITY;
                let mut min_lat = f64::INFINITY;
                let mut max_lon = f64::NEG_INFINITY;
                let mut max_lat = f64::NEG_INFINITY;
                for &(lon, lat) in exterior {
                    min_lon = min_lon.min(lon);
                    min_lat = min_lat.min(lat);
                    max_lon = max_lon.max(lon);
                    max_lat = max_lat.max(lat);
                }
                (min_lon, min_lat, max_lon, max_lat)
            }
        }
    }

    /// Point-in-polygon test by ray casting. Points contain nothing.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        match self {
            Geometry::Point { .. } => false,
            Geometry::Polygon { exterior, holes } => {
                if !ring_contains(exterior, lon, lat) {
                    return false;
                }
                !holes.iter().any(|h| ring_contains(h, lon, lat))
            }
        }
    }
}

/// A land plot submitted for analysis. Geometry is immutable input; validity
/// (ring closure, self-intersection) is the ingestion layer's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plot {
    pub id: String,
    /// External identifier (e.g. a geoid) carried through to the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub geometry: Geometry,
}

impl Plot {
    pub fn new(id: impl Into<String>, geometry: Geometry) -> Self {
        Self { id: id.into(), external_id: None, geometry }
    }

    pub fn with_external_id(mut self, geoid: impl Into<String>) -> Self {
        self.external_id = Some(geoid.into());
        self
    }
}

/// Unsigned spherical area of a ring in square metres.
fn ring_area_sq_m(ring: &Ring) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let (lon1, lat1) = ring[i];
        let (lon2, lat2) = ring[(i + 1) % ring.len()];
        sum += (lon2 - lon1).to_radians() * (2.0 + lat1.to_radians().sin() + lat2.to_radians().sin());
    }
    (sum * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs()
}

/// Planar (shoelace) centroid of a ring; falls back to the vertex mean for
/// degenerate rings.
fn ring_centroid(ring: &Ring) -> (f64, f64) {
    if ring.is_empty() {
        return (0.0, 0.0);
    }
    let mut twice_area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..ring.len() {
        let (x1, y1) = ring[i];
        let (x2, y2) = ring[(i + 1) % ring.len()];
        let cross = x1 * y2 - x2 * y1;
        twice_area += cross;
        cx += (x1 + x2) * cross;
        cy += (y1 + y2) * cross;
    }
    if twice_area.abs() < 1e-12 {
        let n = ring.len() as f64;
        let (sx, sy) = ring.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        return (sx / n, sy / n);
    }
    (cx / (3.0 * twice_area), cy / (3.0 * twice_area))
}

fn ring_contains(ring: &Ring, lon: f64, lat: f64) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if ((yi > lat) != (yj > lat))
            && (lon < (xj - xi) * (lat - yi) / (yj - yi) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_has_zero_area() {
        let p = Geometry::point(12.5, -3.1);
        assert_eq!(p.area_ha(), 0.0);
        assert_eq!(p.centroid(), (12.5, -3.1));
        assert_eq!(p.type_name(), "point");
    }

    #[test]
    fn equatorial_square_area_close_to_planar() {
        // 0.01° × 0.01° at the equator ≈ 1.112 km per side ≈ 123.6 ha.
        let g = Geometry::rect(10.0, 0.0, 10.01, 0.01);
        let area = g.area_ha();
        assert!((area - 123.6).abs() < 1.0, "got {area:.2} ha");
    }

    #[test]
    fn hole_reduces_area() {
        let outer = vec![(0.0, 0.0), (0.02, 0.0), (0.02, 0.02), (0.0, 0.02)];
        let hole = vec![(0.005, 0.005), (0.015, 0.005), (0.015, 0.015), (0.005, 0.015)];
        let solid = Geometry::polygon(outer.clone()).area_ha();
        let holed = Geometry::Polygon { exterior: outer, holes: vec![hole] }.area_ha();
        assert!(holed < solid);
        // Hole is a quarter of the outer square.
        assert!((holed / solid - 0.75).abs() < 0.01);
    }

    #[test]
    fn contains_respects_holes() {
        let outer = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let hole = vec![(0.4, 0.4), (0.6, 0.4), (0.6, 0.6), (0.4, 0.6)];
        let g = Geometry::Polygon { exterior: outer, holes: vec![hole] };
        assert!(g.contains(0.2, 0.2));
        assert!(!g.contains(0.5, 0.5), "point inside the hole must be outside");
        assert!(!g.contains(1.5, 0.5));
    }

    #[test]
    fn centroid_of_square() {
        let g = Geometry::rect(10.0, 20.0, 12.0, 22.0);
        let (lon, lat) = g.centroid();
        assert!((lon - 11.0).abs() < 1e-9);
        assert!((lat - 21.0).abs() < 1e-9);
    }
}
