//! Batched zonal statistics over the composed surface.
//!
//! One aggregation issues one batched remote reduction for the whole plot
//! batch, never one request per plot. Batches above the configured export
//! threshold are not aggregated at all; the caller receives an
//! [`ExportDirective`] routing them to the asynchronous bulk-export
//! workflow. Both outcomes are ordinary values of [`AggregationOutcome`], so
//! callers handle the routing path at the type level.

use crate::backend::{BandSums, ReduceRequest};
use crate::compose::LayerComposer;
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::expr::WATER_FLAG_BAND;
use crate::geometry::Plot;
use crate::risk::RiskCell;
use crate::UNKNOWN;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Below this weighted area (ha) a presence-only layer reports "no".
const PRESENCE_EPSILON_HA: f64 = 1e-6;

/// Output unit for per-layer statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputUnit {
    #[serde(rename = "ha")]
    Hectares,
    #[serde(rename = "percent")]
    Percent,
}

impl fmt::Display for OutputUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputUnit::Hectares => f.write_str("ha"),
            OutputUnit::Percent => f.write_str("percent"),
        }
    }
}

/// One per-layer statistic value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    /// Area (ha) or percentage, per the row's unit.
    Number(f64),
    /// Presence-only layers report a yes/no flag.
    Flag(bool),
}

/// One row of the statistics table. Created by the aggregator; the risk
/// classifier appends to `risk` and never rewrites existing fields.
#[derive(Debug, Clone, Serialize)]
pub struct PlotStats {
    #[serde(rename = "Plot_ID")]
    pub plot_id: String,
    #[serde(rename = "geoid", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(rename = "Geometry_type")]
    pub geometry_type: String,
    #[serde(rename = "Plot_area_ha")]
    pub plot_area_ha: f64,
    #[serde(rename = "Unit")]
    pub unit: OutputUnit,
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Admin_Level_1")]
    pub admin_level_1: String,
    #[serde(rename = "Centroid_lon")]
    pub centroid_lon: f64,
    #[serde(rename = "Centroid_lat")]
    pub centroid_lat: f64,
    #[serde(rename = "In_waterbody")]
    pub in_waterbody: bool,
    /// Per-layer statistics in registry output order.
    pub stats: Vec<(String, StatValue)>,
    /// Risk columns appended by the classifier, in evaluation order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub risk: Vec<(String, RiskCell)>,
}

impl PlotStats {
    pub fn stat(&self, key: &str) -> Option<&StatValue> {
        self.stats.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Numeric statistic for `key` expressed as a percentage of plot area,
    /// regardless of the row's output unit. None for flags or missing keys.
    pub fn stat_percent(&self, key: &str) -> Option<f64> {
        match self.stat(key)? {
            StatValue::Flag(_) => None,
            StatValue::Number(v) => Some(match self.unit {
                OutputUnit::Percent => *v,
                OutputUnit::Hectares => {
                    if self.plot_area_ha > 0.0 {
                        (v / self.plot_area_ha * 100.0).clamp(0.0, 100.0)
                    } else {
                        0.0
                    }
                }
            }),
        }
    }

    /// Flatten the row into one JSON object: metadata, then statistics in
    /// registry order, then any risk columns.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("Plot_ID".into(), self.plot_id.clone().into());
        if let Some(geoid) = &self.external_id {
            map.insert("geoid".into(), geoid.clone().into());
        }
        map.insert("Geometry_type".into(), self.geometry_type.clone().into());
        map.insert("Plot_area_ha".into(), self.plot_area_ha.into());
        map.insert("Unit".into(), self.unit.to_string().into());
        map.insert("Country".into(), self.country.clone().into());
        map.insert("Admin_Level_1".into(), self.admin_level_1.clone().into());
        map.insert("Centroid_lon".into(), self.centroid_lon.into());
        map.insert("Centroid_lat".into(), self.centroid_lat.into());
        map.insert("In_waterbody".into(), self.in_waterbody.into());
        for (key, value) in &self.stats {
            map.insert(key.clone(), serde_json::json!(value));
        }
        for (key, value) in &self.risk {
            map.insert(key.clone(), serde_json::json!(value));
        }
        serde_json::Value::Object(map)
    }
}

/// Routing directive for batches too large for synchronous aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDirective {
    pub feature_count: usize,
    pub limit: usize,
    /// Name of the asynchronous channel the caller should use. The core
    /// does not implement that channel.
    pub channel: String,
    pub message: String,
}

impl ExportDirective {
    fn new(feature_count: usize, limit: usize) -> Self {
        Self {
            feature_count,
            limit,
            channel: "bulk-export".to_string(),
            message: format!(
                "Batch has {feature_count} plots, exceeding the synchronous limit of {limit}. \
                 Use the bulk-export workflow or reduce the batch."
            ),
        }
    }
}

/// The two outcomes of an aggregation. Oversized batches are routed, not
/// failed; callers must handle both variants.
#[derive(Debug)]
pub enum AggregationOutcome {
    Table(Vec<PlotStats>),
    Export(ExportDirective),
}

impl AggregationOutcome {
    pub fn into_table(self) -> Option<Vec<PlotStats>> {
        match self {
            AggregationOutcome::Table(rows) => Some(rows),
            AggregationOutcome::Export(_) => None,
        }
    }

    pub fn is_export(&self) -> bool {
        matches!(self, AggregationOutcome::Export(_))
    }
}

/// Batched statistics extraction over a composed surface.
pub struct StatsAggregator {
    composer: Arc<LayerComposer>,
    config: AnalysisConfig,
}

impl StatsAggregator {
    pub fn new(composer: Arc<LayerComposer>, config: AnalysisConfig) -> Self {
        Self { composer, config }
    }

    /// Compute one statistics row per plot, or an export directive when the
    /// batch exceeds the configured threshold.
    ///
    /// Plot geometries are assumed valid (ingestion's responsibility). Any
    /// fatal condition fails the whole batch; per-plot metadata failures
    /// degrade that plot's fields to the "unknown" sentinel instead.
    pub fn compute(&self, plots: &[Plot], unit: OutputUnit) -> Result<AggregationOutcome> {
        if plots.is_empty() {
            return Err(Error::Configuration("empty plot batch".to_string()));
        }
        if plots.len() > self.config.threshold_to_export {
            info!(
                plots = plots.len(),
                limit = self.config.threshold_to_export,
                "batch exceeds synchronous limit; routing to export"
            );
            return Ok(AggregationOutcome::Export(ExportDirective::new(
                plots.len(),
                self.config.threshold_to_export,
            )));
        }

        let surface = self.composer.get_surface()?;
        let request = ReduceRequest {
            surface: &surface,
            plots,
            resolution_m: self.config.resolution_m,
            tile_scale: self.config.tile_scale,
        };
        let sums = self.reduce_with_retry(&request)?;

        let rows = plots
            .iter()
            .zip(sums.iter())
            .map(|(plot, band_sums)| self.build_row(plot, band_sums, unit))
            .collect();
        Ok(AggregationOutcome::Table(rows))
    }

    /// One batched reduction with bounded exponential backoff on transient
    /// failures.
    fn reduce_with_retry(&self, request: &ReduceRequest<'_>) -> Result<Vec<BandSums>> {
        let backend = self.composer.backend();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match backend.reduce_batch(request) {
                Ok(sums) => return Ok(sums),
                Err(e) if e.transient && attempt < self.config.max_attempts => {
                    let delay = backoff_delay(attempt, self.config.base_backoff_ms);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient reduction failure; backing off"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(Error::remote(attempt, e)),
            }
        }
    }

    fn build_row(&self, plot: &Plot, sums: &BandSums, unit: OutputUnit) -> PlotStats {
        let is_point = plot.geometry.is_point();
        // Points have no extent: area and all area statistics are exactly 0,
        // regardless of computed pixel weight.
        let area_ha = if is_point { 0.0 } else { plot.geometry.area_ha() };
        let (centroid_lon, centroid_lat) = plot.geometry.centroid();

        let mut stats = Vec::with_capacity(self.composer.registry().len());
        for descriptor in self.composer.registry().active() {
            let raw_ha = if is_point {
                0.0
            } else {
                sums.get(&descriptor.key).copied().unwrap_or(0.0)
            };
            let value = if descriptor.presence_only {
                StatValue::Flag(raw_ha > PRESENCE_EPSILON_HA)
            } else {
                StatValue::Number(convert(raw_ha, area_ha, unit))
            };
            stats.push((descriptor.key.clone(), value));
        }
        debug_assert_eq!(
            stats.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            self.composer.registry().output_keys(),
        );

        // The water flag comes from the surface's own water band, reduced
        // with the rest of the batch. A polygon is flagged when the majority
        // of its area is water; a point when it sits on a water pixel.
        let water_ha = sums.get(WATER_FLAG_BAND).copied().unwrap_or(0.0);
        let in_waterbody = if is_point {
            water_ha > 0.0
        } else {
            area_ha > 0.0 && water_ha / area_ha >= 0.5
        };

        let info = match self.composer.backend().resolve_point(centroid_lon, centroid_lat) {
            Ok(info) => info,
            Err(e) => {
                warn!(plot = %plot.id, error = %e, "admin lookup failed; using unknown");
                Default::default()
            }
        };

        PlotStats {
            plot_id: plot.id.clone(),
            external_id: plot.external_id.clone(),
            geometry_type: plot.geometry.type_name().to_string(),
            plot_area_ha: area_ha,
            unit,
            country: info.country.unwrap_or_else(|| UNKNOWN.to_string()),
            admin_level_1: info.admin1.unwrap_or_else(|| UNKNOWN.to_string()),
            centroid_lon,
            centroid_lat,
            in_waterbody,
            stats,
            risk: Vec::new(),
        }
    }
}

/// Convert a raw weighted-area sum (ha) to the requested unit.
fn convert(raw_ha: f64, area_ha: f64, unit: OutputUnit) -> f64 {
    match unit {
        OutputUnit::Hectares => raw_ha,
        OutputUnit::Percent => {
            if area_ha > 0.0 {
                (raw_ha / area_ha * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            }
        }
    }
}

fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
    let jitter = rand::thread_rng().gen_range(0..=base_ms.max(1) / 2 + 1);
    Duration::from_millis(exp + jitter)
}
