//! Indicator derivation and the commodity risk decision tree.
//!
//! Step A folds per-layer statistics into one boolean indicator per theme by
//! summing the theme's risk-eligible layers and comparing against a
//! percentage threshold. Step B evaluates the decision tree in strict
//! left-to-right precedence:
//!
//!   low   if no tree cover, OR commodities present, OR disturbance before
//!         the cutoff (the "low" conditions short-circuit everything else);
//!   high  if disturbance after the cutoff;
//!   more-info-needed otherwise.
//!
//! The precedence is a policy decision with regulatory consequences: a plot
//! with both commodities and post-cutoff disturbance classifies *low*.

use crate::error::{Error, Result};
use crate::registry::{LayerRegistry, Theme};
use crate::stats::{PlotStats, StatValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Final ordinal risk label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLabel {
    Low,
    High,
    MoreInfoNeeded,
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLabel::Low => f.write_str("low"),
            RiskLabel::High => f.write_str("high"),
            RiskLabel::MoreInfoNeeded => f.write_str("more_info_needed"),
        }
    }
}

/// One appended risk column value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RiskCell {
    Indicator(bool),
    Label(RiskLabel),
}

/// Per-theme indicator thresholds, as a percentage of plot area (0–100).
/// Thresholds are always percentage-based even when the statistics table is
/// in hectares; the comparison converts using the row's total area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorThresholds {
    pub treecover: f64,
    pub commodities: f64,
    pub disturbance_before: f64,
    pub disturbance_after: f64,
}

impl Default for IndicatorThresholds {
    fn default() -> Self {
        Self {
            treecover: 10.0,
            commodities: 10.0,
            disturbance_before: 0.0,
            disturbance_after: 0.0,
        }
    }
}

impl IndicatorThresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("treecover", self.treecover),
            ("commodities", self.commodities),
            ("disturbance_before", self.disturbance_before),
            ("disturbance_after", self.disturbance_after),
        ] {
            if !(0.0..=100.0).contains(&v) {
                return Err(Error::Configuration(format!(
                    "{name} threshold {v} outside [0, 100]"
                )));
            }
        }
        Ok(())
    }

    fn for_theme(&self, theme: Theme) -> f64 {
        match theme {
            Theme::Treecover => self.treecover,
            Theme::Commodities => self.commodities,
            Theme::DisturbanceBefore => self.disturbance_before,
            Theme::DisturbanceAfter => self.disturbance_after,
            Theme::Ancillary => 0.0,
        }
    }
}

/// The four theme indicators for one row under one threshold set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicators {
    pub treecover: bool,
    pub commodities: bool,
    pub disturbance_before: bool,
    pub disturbance_after: bool,
}

/// The decision tree, stated once for every commodity class.
pub fn decision_tree(ind: &Indicators) -> RiskLabel {
    if !ind.treecover || ind.commodities || ind.disturbance_before {
        RiskLabel::Low
    } else if ind.disturbance_after {
        RiskLabel::High
    } else {
        RiskLabel::MoreInfoNeeded
    }
}

/// Commodity classes for the multi-commodity policy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommodityClass {
    PerennialCrop,
    AnnualCrop,
    Livestock,
    Timber,
}

impl CommodityClass {
    pub const ALL: [CommodityClass; 4] = [
        CommodityClass::PerennialCrop,
        CommodityClass::AnnualCrop,
        CommodityClass::Livestock,
        CommodityClass::Timber,
    ];

    /// Output column carrying this class's risk label.
    pub fn column(&self) -> &'static str {
        match self {
            CommodityClass::PerennialCrop => "Risk_pcrop",
            CommodityClass::AnnualCrop => "Risk_acrop",
            CommodityClass::Livestock => "Risk_livestock",
            CommodityClass::Timber => "Risk_timber",
        }
    }
}

/// One decision-tree run: a risk column name, its threshold set, and whether
/// the per-theme indicator columns are emitted alongside the label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommodityProfile {
    pub column: String,
    pub thresholds: IndicatorThresholds,
    pub emit_indicators: bool,
}

/// The set of decision trees evaluated per row. Each profile runs the same
/// tree independently against its own thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub profiles: Vec<CommodityProfile>,
}

impl RiskPolicy {
    /// The 4-indicator EUDR policy with default thresholds.
    pub fn eudr() -> Self {
        Self::eudr_with(IndicatorThresholds::default())
    }

    /// EUDR policy with caller-supplied threshold overrides.
    pub fn eudr_with(thresholds: IndicatorThresholds) -> Self {
        Self {
            profiles: vec![CommodityProfile {
                column: "EUDR_risk".to_string(),
                thresholds,
                emit_indicators: true,
            }],
        }
    }

    /// One decision tree per commodity class, default thresholds each.
    pub fn multi_commodity() -> Self {
        Self {
            profiles: CommodityClass::ALL
                .iter()
                .map(|class| CommodityProfile {
                    column: class.column().to_string(),
                    thresholds: IndicatorThresholds::default(),
                    emit_indicators: false,
                })
                .collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(Error::Configuration("risk policy has no profiles".to_string()));
        }
        for profile in &self.profiles {
            profile.thresholds.validate()?;
        }
        Ok(())
    }
}

/// Indicator column names for the EUDR profile, one per risk theme.
const INDICATOR_COLUMNS: [(Theme, &str); 4] = [
    (Theme::Treecover, "Indicator_1_treecover"),
    (Theme::Commodities, "Indicator_2_commodities"),
    (Theme::DisturbanceBefore, "Indicator_3_disturbance_before_2020"),
    (Theme::DisturbanceAfter, "Indicator_4_disturbance_after_2020"),
];

pub struct RiskClassifier {
    registry: Arc<LayerRegistry>,
    policy: RiskPolicy,
}

impl RiskClassifier {
    pub fn new(registry: Arc<LayerRegistry>, policy: RiskPolicy) -> Self {
        Self { registry, policy }
    }

    /// Append indicator and risk-label columns to every row.
    ///
    /// All-or-nothing: thresholds and required inputs are checked for every
    /// row before any row is mutated, so a configuration error leaves the
    /// table untouched.
    pub fn classify(&self, rows: &mut [PlotStats]) -> Result<()> {
        self.policy.validate()?;
        self.preflight(rows)?;

        let mut appended: Vec<Vec<(String, RiskCell)>> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let mut cols = Vec::new();
            for profile in &self.policy.profiles {
                let ind = self.derive_indicators(row, &profile.thresholds)?;
                if profile.emit_indicators {
                    for (theme, name) in INDICATOR_COLUMNS {
                        let value = match theme {
                            Theme::Treecover => ind.treecover,
                            Theme::Commodities => ind.commodities,
                            Theme::DisturbanceBefore => ind.disturbance_before,
                            Theme::DisturbanceAfter => ind.disturbance_after,
                            Theme::Ancillary => unreachable!("ancillary has no indicator"),
                        };
                        cols.push((name.to_string(), RiskCell::Indicator(value)));
                    }
                }
                cols.push((profile.column.clone(), RiskCell::Label(decision_tree(&ind))));
            }
            appended.push(cols);
        }

        for (row, cols) in rows.iter_mut().zip(appended) {
            row.risk.extend(cols);
        }
        Ok(())
    }

    /// Every risk-eligible registry layer must be present as a statistics
    /// column on every row. A miss means the registry and the composed
    /// surface have drifted apart; fatal, before any row is classified.
    fn preflight(&self, rows: &[PlotStats]) -> Result<()> {
        for theme in Theme::RISK {
            for descriptor in self.registry.risk_eligible(theme) {
                for row in rows {
                    if row.stat(&descriptor.key).is_none() {
                        return Err(Error::Configuration(format!(
                            "risk-eligible layer `{}` is missing from the statistics columns \
                             (registry/composer drift)",
                            descriptor.key
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn derive_indicators(
        &self,
        row: &PlotStats,
        thresholds: &IndicatorThresholds,
    ) -> Result<Indicators> {
        let value = |theme: Theme| -> Result<bool> {
            let mut sum_pct = 0.0;
            for descriptor in self.registry.risk_eligible(theme) {
                match row.stat(&descriptor.key) {
                    Some(StatValue::Number(_)) => {
                        // stat_percent handles unit conversion via row area.
                        sum_pct += row.stat_percent(&descriptor.key).unwrap_or(0.0);
                    }
                    Some(StatValue::Flag(_)) => {
                        return Err(Error::Configuration(format!(
                            "risk-eligible layer `{}` reports a flag, not an area",
                            descriptor.key
                        )));
                    }
                    None => {
                        return Err(Error::Configuration(format!(
                            "risk-eligible layer `{}` missing from row `{}`",
                            descriptor.key, row.plot_id
                        )));
                    }
                }
            }
            Ok(sum_pct > thresholds.for_theme(theme))
        };

        Ok(Indicators {
            treecover: value(Theme::Treecover)?,
            commodities: value(Theme::Commodities)?,
            disturbance_before: value(Theme::DisturbanceBefore)?,
            disturbance_after: value(Theme::DisturbanceAfter)?,
        })
    }
}
