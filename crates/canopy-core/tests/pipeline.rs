//! Full-pipeline integration test: registry → composed surface → batched
//! statistics → risk classification, against the in-memory backend.

use canopy_core::backend::{MemoryBackend, Raster};
use canopy_core::compose::{builders, LayerComposer};
use canopy_core::expr::LayerExpr;
use canopy_core::registry::LayerRegistry;
use canopy_core::risk::{RiskCell, RiskLabel, RiskPolicy};
use canopy_core::stats::{AggregationOutcome, OutputUnit, StatValue};
use canopy_core::{analyze, AnalysisConfig, Geometry, Plot, UNKNOWN};
use std::sync::Arc;

fn host_expr_datasets(backend: &MemoryBackend, expr: &LayerExpr) {
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

/// A 1°×1° world: forest in the southern half, palm in the south-west
/// corner, a 2021 deforestation alert across the south, a lake in the
/// north-east, all inside one administrative region.
fn world() -> Arc<MemoryBackend> {
    let backend = MemoryBackend::new();
    let registry = LayerRegistry::builtin().unwrap();
    for d in registry.iter() {
        if let Some(expr) = builders::build(&d.key) {
            host_expr_datasets(&backend, &expr);
        }
    }
    host_expr_datasets(&backend, &builders::water_flag());

    backend.insert_band(
        "jrc_gfc_2020",
        "forest",
        Raster::from_fn(100, 100, 0.0, 0.0, 1.0, 1.0, |_, lat| if lat < 0.5 { 1.0 } else { 0.0 }),
    );
    backend.insert_band(
        "descals_palm",
        "palm_class",
        Raster::from_fn(100, 100, 0.0, 0.0, 1.0, 1.0, |lon, lat| {
            if lon < 0.25 && lat < 0.25 { 1.0 } else { 0.0 }
        }),
    );
    backend.insert_band(
        "wur_radd",
        "alert_2021",
        Raster::from_fn(100, 100, 0.0, 0.0, 1.0, 1.0, |_, lat| if lat < 0.5 { 1.0 } else { 0.0 }),
    );
    backend.insert_band(
        "jrc_gsw",
        "occurrence",
        Raster::from_fn(100, 100, 0.0, 0.0, 1.0, 1.0, |lon, lat| {
            if lon > 0.7 && lat > 0.7 { 95.0 } else { 0.0 }
        }),
    );
    backend.insert_admin("Ghana", "Ashanti", Geometry::rect(0.0, 0.0, 1.0, 1.0));
    Arc::new(backend)
}

fn composer(backend: Arc<MemoryBackend>) -> Arc<LayerComposer> {
    Arc::new(LayerComposer::new(
        Arc::new(LayerRegistry::builtin().unwrap()),
        backend,
    ))
}

fn config() -> AnalysisConfig {
    AnalysisConfig { base_backoff_ms: 1, ..Default::default() }
}

fn square(min_lon: f64, min_lat: f64, side: f64) -> Geometry {
    Geometry::rect(min_lon, min_lat, min_lon + side, min_lat + side)
}

fn label(row: &canopy_core::PlotStats, column: &str) -> RiskLabel {
    match row.risk.iter().find(|(k, _)| k == column) {
        Some((_, RiskCell::Label(l))) => *l,
        other => panic!("no `{column}` label: {other:?}"),
    }
}

#[test]
fn end_to_end_statistics_and_risk() {
    let backend = world();
    let composer = composer(backend);
    let plots = vec![
        // Forested, alerted, no commodities → high.
        Plot::new("forest_plot", square(0.4, 0.1, 0.002)),
        // Forested, alerted, palm present → commodities short-circuit → low.
        Plot::new("palm_plot", square(0.1, 0.1, 0.002)).with_external_id("GH-001"),
        // Bare northern plot, no tree cover → low.
        Plot::new("bare_plot", square(0.6, 0.8, 0.002)),
        // Point: zero-area invariant.
        Plot::new("point_plot", Geometry::point(0.4, 0.1)),
    ];

    let outcome = analyze(&plots, &composer, &config(), Some(&RiskPolicy::eudr())).unwrap();
    let rows = outcome.into_table().unwrap();
    assert_eq!(rows.len(), 4);

    let registry = LayerRegistry::builtin().unwrap();
    for row in &rows {
        let keys: Vec<&str> = row.stats.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, registry.output_keys(), "column drift on `{}`", row.plot_id);
        assert_eq!(row.country, "Ghana");
        assert_eq!(row.admin_level_1, "Ashanti");
        assert!(!row.in_waterbody);
    }

    assert_eq!(label(&rows[0], "EUDR_risk"), RiskLabel::High);
    assert_eq!(label(&rows[1], "EUDR_risk"), RiskLabel::Low);
    assert_eq!(rows[1].external_id.as_deref(), Some("GH-001"));
    assert_eq!(label(&rows[2], "EUDR_risk"), RiskLabel::Low);

    let point = &rows[3];
    assert_eq!(point.plot_area_ha, 0.0);
    for (key, value) in &point.stats {
        if let StatValue::Number(v) = value {
            assert_eq!(*v, 0.0, "point stat `{key}` must be zero");
        }
    }
    assert_eq!(label(point, "EUDR_risk"), RiskLabel::Low, "zero-area plot has no tree cover");
}

#[test]
fn second_analysis_reuses_the_cached_surface() {
    let backend = world();
    let composer = composer(backend.clone());
    let plots = [Plot::new("p", square(0.4, 0.1, 0.002))];

    analyze(&plots, &composer, &config(), None).unwrap();
    let registers = backend.register_calls();
    let merges = backend.merge_calls();
    let reduces = backend.reduce_calls();

    analyze(&plots, &composer, &config(), None).unwrap();
    assert_eq!(backend.register_calls(), registers, "no re-registration on cache hit");
    assert_eq!(backend.merge_calls(), merges, "no re-merge on cache hit");
    assert_eq!(backend.reduce_calls(), reduces + 1, "exactly one reduction per batch");
}

#[test]
fn oversized_batch_yields_directive_not_table() {
    let backend = world();
    let composer = composer(backend);
    let plots: Vec<Plot> = (0..600)
        .map(|i| Plot::new(format!("p{i}"), Geometry::point(0.5, 0.5)))
        .collect();

    match analyze(&plots, &composer, &config(), Some(&RiskPolicy::eudr())).unwrap() {
        AggregationOutcome::Export(d) => {
            assert_eq!(d.feature_count, 600);
            assert_eq!(d.limit, 500);
        }
        AggregationOutcome::Table(_) => panic!("expected export directive"),
    }
}

#[test]
fn plot_inside_lake_sets_water_flag() {
    let backend = world();
    let composer = composer(backend);
    let plots = [Plot::new("lake_plot", square(0.8, 0.8, 0.002))];

    let rows = analyze(&plots, &composer, &config(), None)
        .unwrap()
        .into_table()
        .unwrap();
    assert!(rows[0].in_waterbody);
}

#[test]
fn percent_rows_convert_back_to_hectares() {
    let backend = world();
    let composer = composer(backend.clone());
    let plots = [Plot::new("p", square(0.4, 0.1, 0.002))];

    let ha_rows = analyze(&plots, &composer, &config(), None)
        .unwrap()
        .into_table()
        .unwrap();
    let pct_config = AnalysisConfig { output_unit: OutputUnit::Percent, ..config() };
    let pct_rows = analyze(&plots, &composer, &pct_config, None)
        .unwrap()
        .into_table()
        .unwrap();

    let area = ha_rows[0].plot_area_ha;
    for ((key, ha), (_, pct)) in ha_rows[0].stats.iter().zip(pct_rows[0].stats.iter()) {
        if let (StatValue::Number(ha), StatValue::Number(pct)) = (ha, pct) {
            let recovered = pct / 100.0 * area;
            // Clamping caps coverage at the geometric area.
            let expected = ha.min(area);
            assert!(
                (recovered - expected).abs() < 1e-6,
                "`{key}`: {pct}% of {area} ha = {recovered}, expected {expected}"
            );
        }
    }
}

#[test]
fn metadata_failure_is_isolated_to_unknown_fields() {
    // A world with no admin regions: metadata degrades, stats still flow.
    let backend = MemoryBackend::new();
    let registry = LayerRegistry::builtin().unwrap();
    for d in registry.iter() {
        if let Some(expr) = builders::build(&d.key) {
            host_expr_datasets(&backend, &expr);
        }
    }
    host_expr_datasets(&backend, &builders::water_flag());
    let composer = Arc::new(LayerComposer::new(
        Arc::new(LayerRegistry::builtin().unwrap()),
        Arc::new(backend),
    ));

    let plots = [Plot::new("p", square(0.4, 0.1, 0.002))];
    let rows = analyze(&plots, &composer, &config(), None)
        .unwrap()
        .into_table()
        .unwrap();
    assert_eq!(rows[0].country, UNKNOWN);
    assert_eq!(rows[0].admin_level_1, UNKNOWN);
}
