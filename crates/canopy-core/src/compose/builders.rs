//! Build functions for every registry layer key.
//!
//! Each function returns the remote expression graph for one layer, mapping
//! the hosted dataset's native encoding to a 0/1 (or [0,1] fractional)
//! per-pixel value. Time-series datasets are folded over their year range
//! inside the expression graph; see [`crate::expr::LayerExpr::YearFold`].

use crate::expr::{FoldOp, LayerExpr};

/// Dataset and band sampled for the derived water flag.
pub const WATER_DATASET: &str = "jrc_gsw";
pub const WATER_BAND: &str = "occurrence";

/// Surface-water occurrence (%) at or above which a pixel counts as water.
const WATER_OCCURRENCE_PCT: f64 = 50.0;

/// Whether a build function exists for `key`. Registry load fails for keys
/// without one.
pub fn has(key: &str) -> bool {
    build(key).is_some()
}

/// The derived water-flag band appended to every composed surface.
pub fn water_flag() -> LayerExpr {
    LayerExpr::source(WATER_DATASET, WATER_BAND).gte(WATER_OCCURRENCE_PCT)
}

/// Build the expression for one layer key, or None for unknown keys.
pub fn build(key: &str) -> Option<LayerExpr> {
    use FoldOp::Max;
    use LayerExpr as E;

    let expr = match key {
        // Tree cover 2020. Each dataset has its own native encoding.
        "EUFO_2020" => E::source("jrc_gfc_2020", "forest").gt(0.0),
        "GFC_TC_2020" => E::source("umd_gfc", "treecover2000").gt(10.0),
        "ESA_TC_2020" => E::source("esa_worldcover_2020", "tree").gt(0.0),
        "JAXA_FNF_2020" => E::source("jaxa_fnf", "fnf_2020").eq(1.0),
        "GLAD_Primary" => E::source("glad_primary", "primary").gt(0.0),
        "TMF_undist_2020" => E::source("jrc_tmf", "undisturbed_2020").gt(0.0),
        "ESRI_TC_2020" => E::source("esri_lulc_2020", "class").eq(2.0),

        // Commodities.
        "Oil_palm_Descals" => E::source("descals_palm", "palm_class").gte(1.0),
        // Fractional probability layer, passed through unthresholded.
        "Oil_palm_FDaP" => E::source("fdap_palm", "palm_fraction"),
        "Cocoa_ETH" => E::source("eth_cocoa", "cocoa_prob").gt(0.65),
        "Cocoa_bnetd" => E::source("bnetd_cocoa", "cocoa").gt(0.0),
        "Soy_Song_2020" => E::source("song_soy", "soy_2020").gt(0.0),
        "Rubber_RBGE" => E::source("rbge_rubber", "rubber").gt(0.0),
        "TMF_plant_2020" => E::source("jrc_tmf", "plantation_2020").gt(0.0),

        // Disturbance up to and including 2020. Folded server side: one
        // round trip regardless of the year span.
        "GFC_loss_before_2020" => E::year_fold("umd_gfc", "loss_{year}", 2001, 2020, Max),
        "TMF_def_before_2020" => E::year_fold("jrc_tmf", "deforestation_{year}", 2000, 2020, Max),
        "TMF_deg_before_2020" => E::year_fold("jrc_tmf", "degradation_{year}", 2000, 2020, Max),
        "RADD_before_2020" => E::year_fold("wur_radd", "alert_{year}", 2019, 2020, Max),
        "GLAD_alert_before_2020" => E::year_fold("glad_alert", "alert_{year}", 2018, 2020, Max),
        "MODIS_fire_before_2020" => E::year_fold("modis_fire", "burn_{year}", 2000, 2020, Max),
        "ESA_fire_before_2020" => E::year_fold("esa_fire", "burn_{year}", 2001, 2020, Max),

        // Disturbance after 2020.
        "GFC_loss_after_2020" => E::year_fold("umd_gfc", "loss_{year}", 2021, 2024, Max),
        "TMF_def_after_2020" => E::year_fold("jrc_tmf", "deforestation_{year}", 2021, 2023, Max),
        "TMF_deg_after_2020" => E::year_fold("jrc_tmf", "degradation_{year}", 2021, 2023, Max),
        "RADD_after_2020" => E::year_fold("wur_radd", "alert_{year}", 2021, 2024, Max),
        "GLAD_alert_after_2020" => E::year_fold("glad_alert", "alert_{year}", 2021, 2024, Max),
        "MODIS_fire_after_2020" => E::year_fold("modis_fire", "burn_{year}", 2021, 2024, Max),

        // Ancillary context.
        "WDPA_protected" => E::source("wdpa", "protected").gt(0.0),
        "KBA_2023" => E::source("kba", "kba").gt(0.0),
        "OECM" => E::source("oecm", "oecm").gt(0.0),
        "IFL_2020" => E::source("ifl", "ifl_2020").gt(0.0),
        "Peat_GPD" => E::source("global_peat", "peat").gt(0.0),

        _ => return None,
    };
    Some(expr)
}
