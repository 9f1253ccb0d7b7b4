/// Offline assessment harness: reads a GeoJSON FeatureCollection of plots,
/// runs the statistics/risk pipeline against a seeded synthetic world on the
/// in-memory backend, and prints the result table as JSON.

use anyhow::{bail, Context, Result};
use canopy_core::backend::{MemoryBackend, Raster};
use canopy_core::compose::{builders, LayerComposer};
use canopy_core::expr::LayerExpr;
use canopy_core::registry::LayerRegistry;
use canopy_core::risk::{IndicatorThresholds, RiskPolicy};
use canopy_core::stats::{AggregationOutcome, OutputUnit};
use canopy_core::{analyze, AnalysisConfig, Geometry, Plot};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "assess", about = "Plot statistics and risk assessment on a synthetic world")]
struct Args {
    /// Input GeoJSON FeatureCollection of plot geometries.
    #[arg(short, long)]
    input: String,

    /// Output unit: "ha" or "percent".
    #[arg(short, long, default_value = "ha")]
    unit: String,

    /// Append EUDR risk indicator and classification columns.
    #[arg(long)]
    risk: bool,

    /// Run one decision tree per commodity class instead of the EUDR tree.
    #[arg(long)]
    multi_commodity: bool,

    /// Indicator 1 (treecover) threshold, percent of plot area.
    #[arg(long, default_value_t = 10.0)]
    ind_1_threshold: f64,

    /// Indicator 2 (commodities) threshold.
    #[arg(long, default_value_t = 10.0)]
    ind_2_threshold: f64,

    /// Indicator 3 (disturbance before 2020) threshold.
    #[arg(long, default_value_t = 0.0)]
    ind_3_threshold: f64,

    /// Indicator 4 (disturbance after 2020) threshold.
    #[arg(long, default_value_t = 0.0)]
    ind_4_threshold: f64,

    /// Synchronous batch limit before routing to bulk export.
    #[arg(long, default_value_t = 500)]
    export_threshold: usize,

    /// Seed for the synthetic world's rasters.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Validate the composed surface's band set against the registry.
    #[arg(long)]
    validate_surface: bool,

    /// Output JSON file; stdout when omitted.
    #[arg(short, long)]
    output: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let unit = match args.unit.as_str() {
        "ha" => OutputUnit::Hectares,
        "percent" => OutputUnit::Percent,
        other => bail!("unknown unit `{other}` (expected `ha` or `percent`)"),
    };

    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input))?;
    let geojson: Value = serde_json::from_str(&raw).context("parsing GeoJSON")?;
    let plots = parse_plots(&geojson)?;
    if plots.is_empty() {
        bail!("input contains no features");
    }

    let config = AnalysisConfig {
        output_unit: unit,
        threshold_to_export: args.export_threshold,
        ..Default::default()
    };

    let registry = Arc::new(LayerRegistry::builtin()?);
    let backend = synthetic_world(args.seed, &plots, &registry);
    let composer = Arc::new(
        LayerComposer::new(registry, backend).with_validation(args.validate_surface),
    );
    let policy = if args.multi_commodity {
        Some(RiskPolicy::multi_commodity())
    } else if args.risk {
        Some(RiskPolicy::eudr_with(IndicatorThresholds {
            treecover: args.ind_1_threshold,
            commodities: args.ind_2_threshold,
            disturbance_before: args.ind_3_threshold,
            disturbance_after: args.ind_4_threshold,
        }))
    } else {
        None
    };

    let num_features = plots.len();
    let outcome = analyze(&plots, &composer, &config, policy.as_ref())?;
    let response = match outcome {
        AggregationOutcome::Table(rows) => json!({
            "status": "success",
            "num_features": num_features,
            "unit": unit.to_string(),
            "risk_calculated": policy.is_some(),
            "results": rows.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
        }),
        AggregationOutcome::Export(d) => json!({
            "status": "too_large",
            "num_features": d.feature_count,
            "limit": d.limit,
            "channel": d.channel,
            "message": d.message,
        }),
    };

    let rendered = serde_json::to_string_pretty(&response)?;
    match &args.output {
        Some(path) => std::fs::write(path, rendered).with_context(|| format!("writing {path}"))?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn parse_plots(geojson: &Value) -> Result<Vec<Plot>> {
    let features = geojson
        .get("features")
        .and_then(Value::as_array)
        .context("input is not a FeatureCollection")?;

    let mut plots = Vec::with_capacity(features.len());
    for (index, feature) in features.iter().enumerate() {
        let geometry = feature.get("geometry").context("feature without geometry")?;
        let props = feature.get("properties").cloned().unwrap_or(Value::Null);
        let id = props
            .get("Plot_ID")
            .or_else(|| props.get("id"))
            .and_then(value_as_string)
            .unwrap_or_else(|| (index + 1).to_string());

        let mut plot = Plot::new(id, parse_geometry(geometry)?);
        if let Some(geoid) = props.get("geoid").and_then(value_as_string) {
            plot = plot.with_external_id(geoid);
        }
        plots.push(plot);
    }
    Ok(plots)
}

fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_geometry(geometry: &Value) -> Result<Geometry> {
    let kind = geometry.get("type").and_then(Value::as_str).context("geometry without type")?;
    let coords = geometry.get("coordinates").context("geometry without coordinates")?;
    match kind {
        "Point" => {
            let pair = parse_position(coords)?;
            Ok(Geometry::point(pair.0, pair.1))
        }
        "Polygon" => {
            let rings = coords.as_array().context("polygon coordinates must be an array")?;
            let mut parsed: Vec<Vec<(f64, f64)>> = rings
                .iter()
                .map(parse_ring)
                .collect::<Result<_>>()?;
            if parsed.is_empty() {
                bail!("polygon with no rings");
            }
            let exterior = parsed.remove(0);
            Ok(Geometry::Polygon { exterior, holes: parsed })
        }
        other => bail!("unsupported geometry type `{other}` (expected Point or Polygon)"),
    }
}

fn parse_ring(ring: &Value) -> Result<Vec<(f64, f64)>> {
    let positions = ring.as_array().context("ring must be an array")?;
    let mut out: Vec<(f64, f64)> = positions
        .iter()
        .map(parse_position)
        .collect::<Result<_>>()?;
    // GeoJSON rings repeat the first position; our rings are implicitly closed.
    if out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    Ok(out)
}

fn parse_position(position: &Value) -> Result<(f64, f64)> {
    let pair = position.as_array().context("position must be an array")?;
    if pair.len() < 2 {
        bail!("position with fewer than 2 coordinates");
    }
    let lon = pair[0].as_f64().context("longitude must be a number")?;
    let lat = pair[1].as_f64().context("latitude must be a number")?;
    Ok((lon, lat))
}

/// Host every registry dataset over the plots' padded bounding box: zero
/// rasters for most, seeded random cover for the headline datasets, and one
/// demo administrative region.
fn synthetic_world(seed: u64, plots: &[Plot], registry: &LayerRegistry) -> Arc<MemoryBackend> {
    let backend = MemoryBackend::new();
    for d in registry.iter() {
        if let Some(expr) = builders::build(&d.key) {
            host_expr_datasets(&backend, &expr);
        }
    }
    host_expr_datasets(&backend, &builders::water_flag());

    let (min_lon, min_lat, max_lon, max_lat) = padded_bbox(plots);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut random_field = |p_one: f64, one_value: f32| {
        let mut r = Raster::new(128, 128, min_lon, min_lat, max_lon, max_lat, 0.0);
        for row in 0..128 {
            for col in 0..128 {
                if rng.gen_bool(p_one) {
                    r.set(row, col, one_value);
                }
            }
        }
        r
    };

    backend.insert_band("jrc_gfc_2020", "forest", random_field(0.6, 1.0));
    backend.insert_band("umd_gfc", "treecover2000", random_field(0.6, 80.0));
    backend.insert_band("descals_palm", "palm_class", random_field(0.1, 1.0));
    backend.insert_band("wur_radd", "alert_2021", random_field(0.15, 1.0));
    backend.insert_band("umd_gfc", "loss_2019", random_field(0.05, 1.0));
    backend.insert_band("jrc_gsw", "occurrence", random_field(0.03, 95.0));
    backend.insert_admin(
        "Demoland",
        "District 1",
        Geometry::rect(min_lon, min_lat, max_lon, max_lat),
    );
    Arc::new(backend)
}

fn padded_bbox(plots: &[Plot]) -> (f64, f64, f64, f64) {
    let mut min_lon = f64::INFINITY;
    let mut min_lat = f64::INFINITY;
    let mut max_lon = f64::NEG_INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    for plot in plots {
        let (lo, la, mo, ma) = plot.geometry.bbox();
        min_lon = min_lon.min(lo);
        min_lat = min_lat.min(la);
        max_lon = max_lon.max(mo);
        max_lat = max_lat.max(ma);
    }
    let pad = 0.05;
    (min_lon - pad, min_lat - pad, max_lon + pad, max_lat + pad)
}

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
