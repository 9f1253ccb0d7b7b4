//! Plot-level deforestation and commodity risk assessment.
//!
//! The crate combines ~150 independent geospatial indicator layers into one
//! addressable multiband surface, extracts per-plot zonal statistics from it
//! in batched remote queries, and folds the statistics into theme-level
//! indicators feeding a commodity-specific decision tree.
//!
//! Pipeline order:
//!   1. [`registry::LayerRegistry`]: which layers exist, in what order,
//!      and which of them feed the risk classifier.
//!   2. [`compose::LayerComposer`]: builds and caches layer expressions,
//!      merges them into one area-weighted multiband surface.
//!   3. [`stats::StatsAggregator`]: one batched reduction per plot batch,
//!      unit conversion, geographic metadata, export routing.
//!   4. [`risk::RiskClassifier`]: indicator booleans and the decision tree.
//!
//! The remote computation platform is abstracted behind
//! [`backend::GeoBackend`]; [`backend::MemoryBackend`] is a deterministic
//! in-memory implementation used by tests and offline tooling.

pub mod analysis;
pub mod backend;
pub mod compose;
pub mod config;
pub mod error;
pub mod expr;
pub mod geometry;
pub mod registry;
pub mod risk;
pub mod stats;

#[cfg(test)]
pub(crate) mod testutil;

pub use analysis::analyze;
pub use backend::{GeoBackend, MemoryBackend};
pub use compose::LayerComposer;
pub use config::AnalysisConfig;
pub use error::{Error, Result};
pub use geometry::{Geometry, Plot};
pub use registry::{LayerDescriptor, LayerRegistry, Theme};
pub use risk::{IndicatorThresholds, RiskClassifier, RiskLabel, RiskPolicy};
pub use stats::{AggregationOutcome, OutputUnit, PlotStats, StatsAggregator};

/// Sentinel value for geographic metadata that could not be resolved.
pub const UNKNOWN: &str = "unknown";
