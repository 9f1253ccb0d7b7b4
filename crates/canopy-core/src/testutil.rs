//! Shared helpers for unit tests: a backend hosting every dataset the
//! builtin registry references, with all-zero rasters that individual tests
//! override via `insert_band`.

use crate::backend::{MemoryBackend, Raster};
use crate::compose::builders;
use crate::expr::LayerExpr;
use crate::geometry::Geometry;
use crate::registry::LayerRegistry;
use std::sync::Arc;

/// Host every dataset referenced by the builtin registry (plus the water
/// dataset) as a constant-zero raster.
pub(crate) fn full_backend() -> Arc<MemoryBackend> {
    let backend = MemoryBackend::new();
    let reg = LayerRegistry::builtin().expect("builtin registry");
    for d in reg.iter() {
        if let Some(expr) = builders::build(&d.key) {
            host_expr_datasets(&backend, &expr);
        }
    }
    host_expr_datasets(&backend, &builders::water_flag());
    Arc::new(backend)
}

pub(crate) fn host_expr_datasets(backend: &MemoryBackend, expr: &LayerExpr) {
    match expr {
        LayerExpr::Source { dataset, band } => {
            backend.insert_band(dataset, band, Raster::constant(0.0));
        }
        LayerExpr::YearFold { dataset, band_template, start_year, end_year, .. } => {
            for year in *start_year..=*end_year {
                let band = band_template.replace("{year}", &year.to_string());
                backend.insert_band(dataset, &band, Raster::constant(0.0));
            }
        }
        LayerExpr::Unary { input, .. } => host_expr_datasets(backend, input),
        LayerExpr::Binary { lhs, rhs, .. } => {
            host_expr_datasets(backend, lhs);
            host_expr_datasets(backend, rhs);
        }
        LayerExpr::Constant { .. } | LayerExpr::PixelArea => {}
    }
}

/// A ~1.2 ha square plot at the equator.
pub(crate) fn unit_square() -> Geometry {
    Geometry::rect(10.0, 0.0, 10.001, 0.001)
}
