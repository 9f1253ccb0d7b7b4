//! The remote geospatial computation platform, reduced to the four operation
//! shapes the core requires. Any service implementing [`GeoBackend`] is
//! substitutable; [`MemoryBackend`] is the deterministic in-memory
//! implementation used by tests and offline tooling.

mod memory;

pub use memory::{MemoryBackend, Raster};

use crate::expr::{LayerExpr, Surface};
use crate::geometry::Plot;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A failure reported by the remote platform. `transient` marks conditions
/// worth retrying (timeout, quota); everything else propagates immediately.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    pub transient: bool,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), transient: true }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), transient: false }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Administrative region for a point, from the platform's point-in-polygon
/// lookup.
#[derive(Debug, Clone, Default)]
pub struct PointInfo {
    pub country: Option<String>,
    pub admin1: Option<String>,
}

/// One batched reduction: per-geometry per-band weighted sums over the whole
/// plot batch at a fixed resolution. `tile_scale` is a parallelism hint to
/// the platform, never honoured locally.
#[derive(Debug, Clone)]
pub struct ReduceRequest<'a> {
    pub surface: &'a Surface,
    pub plots: &'a [Plot],
    pub resolution_m: f64,
    pub tile_scale: f64,
}

/// Per-plot reduction result: band name → weighted sum (hectares, since
/// every band is area-weighted at composition time).
pub type BandSums = BTreeMap<String, f64>;

/// Capability interface to the remote computation platform.
///
/// Calls may block for seconds; callers apply bounded retry rather than
/// blocking indefinitely. Timeouts are the implementation's concern.
pub trait GeoBackend: Send + Sync {
    /// Register an expression describing one layer and return a shared
    /// handle to it. Fails permanently if the expression references
    /// datasets the platform does not host.
    fn register_layer(&self, key: &str, expr: LayerExpr) -> BackendResult<Arc<LayerExpr>>;

    /// Merge a named list of registered expressions into one multiband
    /// expression.
    fn merge(&self, bands: Vec<(String, Arc<LayerExpr>)>) -> BackendResult<Arc<Surface>>;

    /// Reduce a multiband expression over a batch of geometries, returning
    /// one [`BandSums`] per plot, in plot order.
    fn reduce_batch(&self, request: &ReduceRequest<'_>) -> BackendResult<Vec<BandSums>>;

    /// Resolve the administrative region containing a point.
    fn resolve_point(&self, lon: f64, lat: f64) -> BackendResult<PointInfo>;
}
