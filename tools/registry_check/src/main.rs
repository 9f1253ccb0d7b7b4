/// Registry validation tool: loads an external versioned layer table (or the
/// builtin one), reports schema errors, and prints a per-theme summary.

use anyhow::{Context, Result};
use canopy_core::registry::{LayerRegistry, Theme};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "registry_check", about = "Validate a layer registry table")]
struct Args {
    /// Path to a registry table JSON file; the builtin table when omitted.
    #[arg(short, long)]
    registry: Option<String>,

    /// Dump the loaded table as JSON to stdout.
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let registry = match &args.registry {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            LayerRegistry::from_json(&raw).with_context(|| format!("validating {path}"))?
        }
        None => LayerRegistry::builtin().context("loading builtin table")?,
    };

    if args.dump {
        println!("{}", serde_json::to_string_pretty(registry.descriptors())?);
        return Ok(());
    }

    let themes = [
        (Theme::Treecover, "treecover"),
        (Theme::Commodities, "commodities"),
        (Theme::DisturbanceBefore, "disturbance_before"),
        (Theme::DisturbanceAfter, "disturbance_after"),
        (Theme::Ancillary, "ancillary"),
    ];

    println!("layers: {}", registry.len());
    for (theme, name) in themes {
        let total = registry.iter().filter(|d| d.theme == theme).count();
        let eligible = registry.iter().filter(|d| d.theme == theme && d.risk_eligible).count();
        println!("  {name:<20} {total:>3} ({eligible} risk-eligible)");
    }

    let excluded: Vec<&str> = registry
        .iter()
        .filter(|d| d.exclude)
        .map(|d| d.key.as_str())
        .collect();
    if !excluded.is_empty() {
        println!("excluded: {}", excluded.join(", "));
    }

    // Excluded-but-risk-eligible layers will fail risk runs at classify time.
    let drifted: Vec<&str> = registry
        .iter()
        .filter(|d| d.exclude && d.risk_eligible)
        .map(|d| d.key.as_str())
        .collect();
    if !drifted.is_empty() {
        println!("warning: excluded layers still marked risk-eligible: {}", drifted.join(", "));
    }

    println!("ok");
    Ok(())
}
