//! End-to-end analysis: statistics, then optional risk classification.

use crate::compose::LayerComposer;
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::geometry::Plot;
use crate::risk::{RiskClassifier, RiskPolicy};
use crate::stats::{AggregationOutcome, StatsAggregator};
use std::sync::Arc;
use tracing::info;

/// Analyze a plot batch against the composer's surface.
///
/// Returns one statistics row per plot (with risk columns appended when a
/// policy is supplied), or an export directive when the batch exceeds the
/// configured synchronous limit. Any fatal condition fails the whole batch;
/// partial tables are never returned.
pub fn analyze(
    plots: &[Plot],
    composer: &Arc<LayerComposer>,
    config: &AnalysisConfig,
    risk: Option<&RiskPolicy>,
) -> Result<AggregationOutcome> {
    let aggregator = StatsAggregator::new(composer.clone(), config.clone());
    let outcome = aggregator.compute(plots, config.output_unit)?;

    match outcome {
        AggregationOutcome::Export(directive) => Ok(AggregationOutcome::Export(directive)),
        AggregationOutcome::Table(mut rows) => {
            if let Some(policy) = risk {
                RiskClassifier::new(composer.registry().clone(), policy.clone())
                    .classify(&mut rows)?;
            }
            info!(rows = rows.len(), unit = %config.output_unit, "analysis complete");
            Ok(AggregationOutcome::Table(rows))
        }
    }
}
