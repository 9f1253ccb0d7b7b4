//! Built-in versioned layer table.
//!
//! A representative subset of the global dataset catalogue; the production
//! table (~150 layers) ships as an external JSON file loaded through
//! [`super::LayerRegistry::from_json`]. Column names follow the upstream
//! dataset naming convention and are stable across versions.

use super::{LayerDescriptor, Theme, ValueType};

fn layer(
    order: u32,
    key: &str,
    theme: Theme,
    value_type: ValueType,
    risk_eligible: bool,
) -> LayerDescriptor {
    LayerDescriptor {
        key: key.to_string(),
        theme,
        value_type,
        presence_only: false,
        exclude: false,
        risk_eligible,
        order,
    }
}

fn presence(order: u32, key: &str) -> LayerDescriptor {
    LayerDescriptor {
        key: key.to_string(),
        theme: Theme::Ancillary,
        value_type: ValueType::Binary,
        presence_only: true,
        exclude: false,
        risk_eligible: false,
        order,
    }
}

pub(super) fn descriptors() -> Vec<LayerDescriptor> {
    use Theme::*;
    use ValueType::*;

    let mut t = vec![
        // Tree cover at end of 2020.
        layer(10, "EUFO_2020", Treecover, Binary, true),
        layer(11, "GFC_TC_2020", Treecover, Binary, true),
        layer(12, "ESA_TC_2020", Treecover, Binary, true),
        layer(13, "JAXA_FNF_2020", Treecover, Binary, true),
        layer(14, "GLAD_Primary", Treecover, Binary, true),
        layer(15, "TMF_undist_2020", Treecover, Binary, true),
        layer(16, "ESRI_TC_2020", Treecover, Binary, true),
        // Agricultural commodities present by end of 2020.
        layer(30, "Oil_palm_Descals", Commodities, Binary, true),
        layer(31, "Oil_palm_FDaP", Commodities, Fraction, true),
        layer(32, "Cocoa_ETH", Commodities, Binary, true),
        // Risk eligibility withheld until the licensing exclusion below is
        // lifted; flagging it eligible while excluded would fail every risk
        // run at classify time.
        layer(33, "Cocoa_bnetd", Commodities, Binary, false),
        layer(34, "Soy_Song_2020", Commodities, Binary, true),
        layer(35, "Rubber_RBGE", Commodities, Binary, true),
        layer(36, "TMF_plant_2020", Commodities, Binary, true),
        // Disturbance observed up to and including 2020.
        layer(50, "GFC_loss_before_2020", DisturbanceBefore, Binary, true),
        layer(51, "TMF_def_before_2020", DisturbanceBefore, Binary, true),
        layer(52, "TMF_deg_before_2020", DisturbanceBefore, Binary, true),
        layer(53, "RADD_before_2020", DisturbanceBefore, Binary, true),
        layer(54, "GLAD_alert_before_2020", DisturbanceBefore, Binary, true),
        layer(55, "MODIS_fire_before_2020", DisturbanceBefore, Binary, true),
        layer(56, "ESA_fire_before_2020", DisturbanceBefore, Binary, true),
        // Disturbance observed after 2020.
        layer(70, "GFC_loss_after_2020", DisturbanceAfter, Binary, true),
        layer(71, "TMF_def_after_2020", DisturbanceAfter, Binary, true),
        layer(72, "TMF_deg_after_2020", DisturbanceAfter, Binary, true),
        layer(73, "RADD_after_2020", DisturbanceAfter, Binary, true),
        layer(74, "GLAD_alert_after_2020", DisturbanceAfter, Binary, true),
        layer(75, "MODIS_fire_after_2020", DisturbanceAfter, Binary, true),
        // Ancillary context layers; never feed an indicator.
        presence(90, "WDPA_protected"),
        presence(91, "KBA_2023"),
        presence(92, "OECM"),
        layer(93, "IFL_2020", Ancillary, Binary, false),
        presence(94, "Peat_GPD"),
    ];

    // National cocoa map: distribution pending licensing agreement with the
    // provider. Kept in the table so ordering is stable once it lands.
    if let Some(d) = t.iter_mut().find(|d| d.key == "Cocoa_bnetd") {
        d.exclude = true;
    }

    t
}
