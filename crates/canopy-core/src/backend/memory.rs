//! Deterministic in-memory backend over synthetic rasters.
//!
//! Used by unit/integration tests and offline tooling. Rasters are addressed
//! as `dataset/band`; reduction walks a regular grid over each plot at the
//! requested resolution, in parallel across plots. The backend counts calls
//! per operation (cache-hit properties are asserted against these counters)
//! and can inject transient failures to exercise the retry path.

use super::{BackendError, BackendResult, BandSums, GeoBackend, PointInfo, ReduceRequest};
use crate::expr::{BinaryOp, FoldOp, LayerExpr, Surface, SurfaceBand, UnaryOp};
use crate::geometry::Geometry;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Metres per degree of latitude (and of longitude at the equator).
const M_PER_DEG: f64 = 111_320.0;

/// Cell-count ceiling for one plot's reduction grid.
const MAX_CELLS_PER_PLOT: usize = 25_000_000;

/// A 2D raster storing per-pixel values as f32, row-major, with geographic
/// bounds. Row 0 is the southern edge.
#[derive(Debug, Clone)]
pub struct Raster {
    data: Vec<f32>,
    width: usize,
    height: usize,
    min_lon: f64,
    max_lon: f64,
    min_lat: f64,
    max_lat: f64,
}

impl Raster {
    pub fn new(
        width: usize,
        height: usize,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        fill: f32,
    ) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        }
    }

    /// A 1×1 raster covering the whole globe with one value.
    pub fn constant(value: f32) -> Self {
        Self::new(1, 1, -180.0, -90.0, 180.0, 90.0, value)
    }

    /// Build a raster by evaluating `f` at every cell center.
    pub fn from_fn(
        width: usize,
        height: usize,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        f: impl Fn(f64, f64) -> f32,
    ) -> Self {
        let mut r = Self::new(width, height, min_lon, min_lat, max_lon, max_lat, 0.0);
        for row in 0..height {
            for col in 0..width {
                let (lon, lat) = r.cell_center(row, col);
                r.data[row * width + col] = f(lon, lat);
            }
        }
        r
    }

    fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let lon = self.min_lon
            + (col as f64 + 0.5) / self.width as f64 * (self.max_lon - self.min_lon);
        let lat = self.min_lat
            + (row as f64 + 0.5) / self.height as f64 * (self.max_lat - self.min_lat);
        (lon, lat)
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.width + col] = value;
    }

    /// Nearest-neighbour sample; None outside the raster bounds. Indicator
    /// rasters are categorical, so no interpolation.
    pub fn sample(&self, lon: f64, lat: f64) -> Option<f32> {
        if lon < self.min_lon || lon > self.max_lon || lat < self.min_lat || lat > self.max_lat {
            return None;
        }
        let fx = (lon - self.min_lon) / (self.max_lon - self.min_lon) * self.width as f64;
        let fy = (lat - self.min_lat) / (self.max_lat - self.min_lat) * self.height as f64;
        let col = (fx.floor() as usize).min(self.width - 1);
        let row = (fy.floor() as usize).min(self.height - 1);
        Some(self.data[row * self.width + col])
    }
}

struct AdminRegion {
    country: String,
    admin1: String,
    geometry: Geometry,
}

#[derive(Default)]
struct CallCounters {
    register: AtomicUsize,
    merge: AtomicUsize,
    reduce: AtomicUsize,
    resolve: AtomicUsize,
}

/// In-memory [`GeoBackend`] implementation.
pub struct MemoryBackend {
    bands: Mutex<HashMap<String, Raster>>,
    admin: Mutex<Vec<AdminRegion>>,
    calls: CallCounters,
    fail_reduces: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            bands: Mutex::new(HashMap::new()),
            admin: Mutex::new(Vec::new()),
            calls: CallCounters::default(),
            fail_reduces: AtomicUsize::new(0),
        }
    }

    /// Host a raster as `dataset/band`.
    pub fn insert_band(&self, dataset: &str, band: &str, raster: Raster) {
        self.bands
            .lock()
            .expect("band table poisoned")
            .insert(format!("{dataset}/{band}"), raster);
    }

    /// Add an administrative region for `resolve_point`.
    pub fn insert_admin(&self, country: &str, admin1: &str, geometry: Geometry) {
        self.admin.lock().expect("admin table poisoned").push(AdminRegion {
            country: country.to_string(),
            admin1: admin1.to_string(),
            geometry,
        });
    }

    /// Make the next `n` reduce calls fail with a transient error.
    pub fn fail_next_reduces(&self, n: usize) {
        self.fail_reduces.store(n, Ordering::SeqCst);
    }

    pub fn register_calls(&self) -> usize {
        self.calls.register.load(Ordering::SeqCst)
    }

    pub fn merge_calls(&self) -> usize {
        self.calls.merge.load(Ordering::SeqCst)
    }

    pub fn reduce_calls(&self) -> usize {
        self.calls.reduce.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> usize {
        self.calls.resolve.load(Ordering::SeqCst)
    }

    fn dataset_hosted(&self, bands: &HashMap<String, Raster>, dataset: &str) -> bool {
        let prefix = format!("{dataset}/");
        bands.keys().any(|k| k.starts_with(&prefix))
    }

    fn eval(
        bands: &HashMap<String, Raster>,
        expr: &LayerExpr,
        lon: f64,
        lat: f64,
        cell_area_ha: f64,
    ) -> f64 {
        match expr {
            LayerExpr::Source { dataset, band } => bands
                .get(&format!("{dataset}/{band}"))
                .and_then(|r| r.sample(lon, lat))
                .unwrap_or(0.0) as f64,
            LayerExpr::Constant { value } => *value,
            LayerExpr::PixelArea => cell_area_ha,
            LayerExpr::Unary { op, threshold, input } => {
                let v = Self::eval(bands, input, lon, lat, cell_area_ha);
                let hit = match op {
                    UnaryOp::Gt => v > *threshold,
                    UnaryOp::Gte => v >= *threshold,
                    UnaryOp::Eq => v == *threshold,
                    UnaryOp::Not => v == 0.0,
                };
                if hit { 1.0 } else { 0.0 }
            }
            LayerExpr::Binary { op, lhs, rhs } => {
                let a = Self::eval(bands, lhs, lon, lat, cell_area_ha);
                let b = Self::eval(bands, rhs, lon, lat, cell_area_ha);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Min => a.min(b),
                    BinaryOp::Max => a.max(b),
                }
            }
            LayerExpr::YearFold { dataset, band_template, start_year, end_year, op } => {
                let mut acc: Option<f64> = None;
                for year in *start_year..=*end_year {
                    let band = band_template.replace("{year}", &year.to_string());
                    let Some(v) = bands
                        .get(&format!("{dataset}/{band}"))
                        .and_then(|r| r.sample(lon, lat))
                    else {
                        continue;
                    };
                    let v = v as f64;
                    acc = Some(match (acc, op) {
                        (None, _) => v,
                        (Some(a), FoldOp::Max) => a.max(v),
                        (Some(a), FoldOp::Min) => a.min(v),
                        (Some(a), FoldOp::Sum) => a + v,
                    });
                }
                acc.unwrap_or(0.0)
            }
        }
    }

    fn reduce_plot(
        bands: &HashMap<String, Raster>,
        surface: &Surface,
        geometry: &Geometry,
        resolution_m: f64,
    ) -> BackendResult<BandSums> {
        let cell_area_ha = resolution_m * resolution_m / 10_000.0;
        let mut sums: BandSums = surface
            .bands
            .iter()
            .map(|b| (b.name.clone(), 0.0))
            .collect();

        match geometry {
            Geometry::Point { lon, lat } => {
                for SurfaceBand { name, expr } in &surface.bands {
                    *sums.get_mut(name).expect("band pre-inserted") =
                        Self::eval(bands, expr, *lon, *lat, cell_area_ha);
                }
            }
            Geometry::Polygon { .. } => {
                let (min_lon, min_lat, max_lon, max_lat) = geometry.bbox();
                let (_, lat_c) = geometry.centroid();
                let dlat = resolution_m / M_PER_DEG;
                let dlon = resolution_m / (M_PER_DEG * lat_c.to_radians().cos().max(1e-6));
                let rows = ((max_lat - min_lat) / dlat).ceil() as usize + 1;
                let cols = ((max_lon - min_lon) / dlon).ceil() as usize + 1;
                if rows.saturating_mul(cols) > MAX_CELLS_PER_PLOT {
                    return Err(BackendError::permanent(format!(
                        "geometry exceeds reduction grid limit ({rows}×{cols} cells)"
                    )));
                }
                for row in 0..rows {
                    let lat = min_lat + (row as f64 + 0.5) * dlat;
                    for col in 0..cols {
                        let lon = min_lon + (col as f64 + 0.5) * dlon;
                        if !geometry.contains(lon, lat) {
                            continue;
                        }
                        for SurfaceBand { name, expr } in &surface.bands {
                            *sums.get_mut(name).expect("band pre-inserted") +=
                                Self::eval(bands, expr, lon, lat, cell_area_ha);
                        }
                    }
                }
            }
        }
        Ok(sums)
    }
}

impl GeoBackend for MemoryBackend {
    fn register_layer(&self, key: &str, expr: LayerExpr) -> BackendResult<Arc<LayerExpr>> {
        self.calls.register.fetch_add(1, Ordering::SeqCst);
        let bands = self.bands.lock().expect("band table poisoned");
        for dataset in expr.datasets() {
            if !self.dataset_hosted(&bands, dataset) {
                return Err(BackendError::permanent(format!(
                    "layer `{key}`: dataset `{dataset}` is not hosted"
                )));
            }
        }
        Ok(Arc::new(expr))
    }

    fn merge(&self, bands: Vec<(String, Arc<LayerExpr>)>) -> BackendResult<Arc<Surface>> {
        self.calls.merge.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Surface {
            bands: bands
                .into_iter()
                .map(|(name, expr)| SurfaceBand { name, expr })
                .collect(),
        }))
    }

    fn reduce_batch(&self, request: &ReduceRequest<'_>) -> BackendResult<Vec<BandSums>> {
        self.calls.reduce.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_reduces
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::transient("simulated reduction timeout"));
        }

        let bands = self.bands.lock().expect("band table poisoned");
        request
            .plots
            .par_iter()
            .map(|plot| Self::reduce_plot(&bands, request.surface, &plot.geometry, request.resolution_m))
            .collect()
    }

    fn resolve_point(&self, lon: f64, lat: f64) -> BackendResult<PointInfo> {
        self.calls.resolve.fetch_add(1, Ordering::SeqCst);
        let admin = self.admin.lock().expect("admin table poisoned");
        let region = admin.iter().find(|r| r.geometry.contains(lon, lat));
        Ok(PointInfo {
            country: region.map(|r| r.country.clone()),
            admin1: region.map(|r| r.admin1.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Plot;

    fn square(min_lon: f64, min_lat: f64, side_deg: f64) -> Geometry {
        Geometry::rect(min_lon, min_lat, min_lon + side_deg, min_lat + side_deg)
    }

    #[test]
    fn raster_sample_nearest() {
        let mut r = Raster::new(2, 2, 0.0, 0.0, 1.0, 1.0, 0.0);
        r.set(0, 0, 1.0);
        r.set(1, 1, 2.0);
        assert_eq!(r.sample(0.25, 0.25), Some(1.0));
        assert_eq!(r.sample(0.75, 0.75), Some(2.0));
        assert_eq!(r.sample(5.0, 0.5), None);
    }

    #[test]
    fn reduce_recovers_full_coverage_area() {
        let backend = MemoryBackend::new();
        backend.insert_band("forest", "cover", Raster::constant(1.0));
        let expr = Arc::new(LayerExpr::source("forest", "cover").scale_by_area());
        let surface = Surface {
            bands: vec![SurfaceBand { name: "F".into(), expr }],
        };

        // ~0.001° square at the equator: ≈ 111.3 m per side ≈ 1.24 ha.
        let plot = Plot::new("p1", square(10.0, 0.0, 0.001));
        let sums = backend
            .reduce_batch(&ReduceRequest {
                surface: &surface,
                plots: std::slice::from_ref(&plot),
                resolution_m: 10.0,
                tile_scale: 4.0,
            })
            .unwrap();

        let got = sums[0]["F"];
        let expected = plot.geometry.area_ha();
        let rel = (got - expected).abs() / expected;
        assert!(rel < 0.15, "raster sum {got:.3} ha vs geometric {expected:.3} ha");
    }

    #[test]
    fn register_rejects_unhosted_dataset() {
        let backend = MemoryBackend::new();
        let err = backend
            .register_layer("X", LayerExpr::source("nowhere", "band"))
            .unwrap_err();
        assert!(!err.transient);
    }

    #[test]
    fn fail_next_reduces_injects_transient_errors() {
        let backend = MemoryBackend::new();
        backend.insert_band("forest", "cover", Raster::constant(1.0));
        let surface = Surface { bands: vec![] };
        let plots = [Plot::new("p", Geometry::point(0.0, 0.0))];
        let req = ReduceRequest {
            surface: &surface,
            plots: &plots,
            resolution_m: 10.0,
            tile_scale: 1.0,
        };

        backend.fail_next_reduces(1);
        let err = backend.reduce_batch(&req).unwrap_err();
        assert!(err.transient);
        assert!(backend.reduce_batch(&req).is_ok(), "second call must succeed");
        assert_eq!(backend.reduce_calls(), 2);
    }

    #[test]
    fn resolve_point_finds_containing_region() {
        let backend = MemoryBackend::new();
        backend.insert_admin("Ghana", "Ashanti", square(0.0, 0.0, 1.0));

        let info = backend.resolve_point(0.2, 0.2).unwrap();
        assert_eq!(info.country.as_deref(), Some("Ghana"));
        assert_eq!(info.admin1.as_deref(), Some("Ashanti"));

        let nowhere = backend.resolve_point(50.0, 50.0).unwrap();
        assert!(nowhere.country.is_none());
    }

    #[test]
    fn year_fold_uses_only_hosted_years() {
        let backend = MemoryBackend::new();
        backend.insert_band("radd", "alert_2021", Raster::constant(1.0));
        // 2022-2024 not hosted; fold must still see the 2021 alert.
        let expr = backend
            .register_layer(
                "RADD_after_2020",
                LayerExpr::year_fold("radd", "alert_{year}", 2021, 2024, FoldOp::Max),
            )
            .unwrap();
        let surface = Surface {
            bands: vec![SurfaceBand { name: "R".into(), expr }],
        };
        let plots = [Plot::new("p", Geometry::point(0.0, 0.0))];
        let sums = backend
            .reduce_batch(&ReduceRequest {
                surface: &surface,
                plots: &plots,
                resolution_m: 10.0,
                tile_scale: 1.0,
            })
            .unwrap();
        assert_eq!(sums[0]["R"], 1.0);
    }

    fn fold_round_trip(start_year: i32, end_year: i32) -> (usize, usize) {
        let backend = MemoryBackend::new();
        for year in start_year..=end_year {
            backend.insert_band("umd_gfc", &format!("loss_{year}"), Raster::constant(1.0));
        }
        let expr = backend
            .register_layer(
                "loss",
                LayerExpr::year_fold("umd_gfc", "loss_{year}", start_year, end_year, FoldOp::Max),
            )
            .unwrap();
        let surface = Surface {
            bands: vec![SurfaceBand { name: "loss".into(), expr }],
        };
        let plots = [Plot::new("p", Geometry::point(0.0, 0.0))];
        backend
            .reduce_batch(&ReduceRequest {
                surface: &surface,
                plots: &plots,
                resolution_m: 10.0,
                tile_scale: 1.0,
            })
            .unwrap();
        (backend.register_calls(), backend.reduce_calls())
    }

    #[test]
    fn fold_year_span_does_not_change_call_count() {
        // The fold iterates years inside the expression graph: a 20-year
        // layer costs exactly the round trips of a 1-year layer.
        assert_eq!(fold_round_trip(2020, 2020), fold_round_trip(2001, 2020));
        assert_eq!(fold_round_trip(2001, 2020), (1, 1));
    }
}
