//! Analysis configuration.

use crate::stats::OutputUnit;
use serde::{Deserialize, Serialize};

/// Tunables for one analysis run. Defaults mirror the production service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub output_unit: OutputUnit,
    /// Batches larger than this are routed to the asynchronous bulk-export
    /// workflow instead of being aggregated in-process.
    pub threshold_to_export: usize,
    /// Spatial resolution of the batched reduction, in metres.
    pub resolution_m: f64,
    /// Parallelism hint forwarded to the remote platform.
    pub tile_scale: f64,
    /// Total attempts for a remote reduction (1 initial + retries).
    pub max_attempts: u32,
    /// Base delay of the exponential backoff between retries.
    pub base_backoff_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            output_unit: OutputUnit::Hectares,
            threshold_to_export: 500,
            resolution_m: 10.0,
            tile_scale: 4.0,
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_settings() {
        let c = AnalysisConfig::default();
        assert_eq!(c.threshold_to_export, 500);
        assert_eq!(c.resolution_m, 10.0);
        assert_eq!(c.max_attempts, 3);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: AnalysisConfig = serde_json::from_str(r#"{"threshold_to_export": 50}"#).unwrap();
        assert_eq!(c.threshold_to_export, 50);
        assert_eq!(c.max_attempts, 3);
    }
}
