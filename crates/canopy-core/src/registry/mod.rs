//! The layer registry: the single source of truth for which indicator layers
//! exist, their output ordering, and which of them feed the risk classifier.
//! Read-only after load; every other component consults it rather than
//! hardcoding layer names.

mod builtin;

use crate::compose::builders;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Semantic theme of a layer. Closed set; risk indicators are derived per
/// theme (ancillary layers never feed an indicator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Treecover,
    Commodities,
    DisturbanceBefore,
    DisturbanceAfter,
    Ancillary,
}

impl Theme {
    /// Themes that produce risk indicators, in indicator order.
    pub const RISK: [Theme; 4] = [
        Theme::Treecover,
        Theme::Commodities,
        Theme::DisturbanceBefore,
        Theme::DisturbanceAfter,
    ];
}

/// Expected per-pixel value shape of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// 0/1 per pixel.
    Binary,
    /// [0, 1] per pixel.
    Fraction,
}

/// One row of the versioned layer table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Band name on the composed surface and column name in the output.
    pub key: String,
    pub theme: Theme,
    pub value_type: ValueType,
    /// Presence-only layers are reported as a yes/no flag, not an area.
    #[serde(default)]
    pub presence_only: bool,
    /// Excluded layers (e.g. pending licensing) build as the empty layer and
    /// are dropped from the output column set.
    #[serde(default)]
    pub exclude: bool,
    /// Whether the layer's statistic feeds its theme's risk indicator.
    #[serde(default)]
    pub risk_eligible: bool,
    /// Output ordering key; columns are emitted in ascending order.
    pub order: u32,
}

/// Result of checking a surface's band set against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BandDiff {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl BandDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Ordered, validated table of layer descriptors.
#[derive(Debug, Clone)]
pub struct LayerRegistry {
    layers: Vec<LayerDescriptor>,
}

impl LayerRegistry {
    /// The built-in versioned table of global datasets. The full
    /// production table is loaded with [`LayerRegistry::from_json`].
    pub fn builtin() -> Result<Self> {
        Self::from_descriptors(builtin::descriptors())
    }

    /// Load an external versioned table serialized as a JSON array of
    /// descriptors.
    pub fn from_json(json: &str) -> Result<Self> {
        let descriptors: Vec<LayerDescriptor> = serde_json::from_str(json)
            .map_err(|e| Error::Schema(format!("malformed registry table: {e}")))?;
        Self::from_descriptors(descriptors)
    }

    /// Validate and order a descriptor list. Fails with [`Error::Schema`] on
    /// duplicate keys, presence-only layers marked risk-eligible, or layers
    /// with no registered build function.
    pub fn from_descriptors(mut descriptors: Vec<LayerDescriptor>) -> Result<Self> {
        descriptors.sort_by_key(|d| d.order);
        let mut seen = std::collections::HashSet::new();
        for d in &descriptors {
            if !seen.insert(d.key.clone()) {
                return Err(Error::Schema(format!("duplicate layer key `{}`", d.key)));
            }
            if d.presence_only && d.risk_eligible {
                return Err(Error::Schema(format!(
                    "layer `{}` is presence-only and cannot be risk-eligible",
                    d.key
                )));
            }
            if !builders::has(&d.key) {
                return Err(Error::Schema(format!(
                    "no build function registered for layer `{}`",
                    d.key
                )));
            }
        }
        Ok(Self { layers: descriptors })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The full descriptor table in output order.
    pub fn descriptors(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    pub fn get(&self, key: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|d| d.key == key)
    }

    /// All descriptors in output order.
    pub fn iter(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter()
    }

    /// Non-excluded descriptors in output order: the layers that appear on
    /// the composed surface and in the statistics table.
    pub fn active(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter().filter(|d| !d.exclude)
    }

    /// Output column keys, in declared order.
    pub fn output_keys(&self) -> Vec<&str> {
        self.active().map(|d| d.key.as_str()).collect()
    }

    /// Risk-eligible descriptors for a theme, *including* excluded ones.
    /// An excluded-but-risk-eligible layer is registry/composer drift and is
    /// surfaced by the classifier as a configuration error.
    pub fn risk_eligible(&self, theme: Theme) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers
            .iter()
            .filter(move |d| d.risk_eligible && d.theme == theme)
    }

    /// Diff a surface's band set (water flag already removed) against the
    /// active layer set.
    pub fn validate(&self, band_names: &[&str]) -> BandDiff {
        let expected = self.output_keys();
        let missing = expected
            .iter()
            .filter(|k| !band_names.contains(k))
            .map(|k| k.to_string())
            .collect();
        let unexpected = band_names
            .iter()
            .filter(|b| !expected.contains(b))
            .map(|b| b.to_string())
            .collect();
        BandDiff { missing, unexpected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_loads_and_is_ordered() {
        let reg = LayerRegistry::builtin().unwrap();
        assert!(reg.len() > 25, "builtin table unexpectedly small: {}", reg.len());
        let orders: Vec<u32> = reg.iter().map(|d| d.order).collect();
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        assert_eq!(orders, sorted);
    }

    #[test]
    fn duplicate_key_is_a_schema_error() {
        let mut descriptors = builtin::descriptors();
        let dup = descriptors[0].clone();
        descriptors.push(dup);
        let err = LayerRegistry::from_descriptors(descriptors).unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "got {err:?}");
    }

    #[test]
    fn unknown_build_function_is_a_schema_error() {
        let descriptors = vec![LayerDescriptor {
            key: "No_such_layer".into(),
            theme: Theme::Ancillary,
            value_type: ValueType::Binary,
            presence_only: false,
            exclude: false,
            risk_eligible: false,
            order: 1,
        }];
        let err = LayerRegistry::from_descriptors(descriptors).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn presence_only_layers_cannot_be_risk_eligible() {
        let mut descriptors = builtin::descriptors();
        let d = descriptors
            .iter_mut()
            .find(|d| d.presence_only)
            .expect("builtin table has presence-only layers");
        d.risk_eligible = true;
        let err = LayerRegistry::from_descriptors(descriptors).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn excluded_layers_are_dropped_from_output_keys() {
        let reg = LayerRegistry::builtin().unwrap();
        let excluded: Vec<&str> = reg
            .iter()
            .filter(|d| d.exclude)
            .map(|d| d.key.as_str())
            .collect();
        assert!(!excluded.is_empty(), "builtin table should carry an excluded layer");
        for key in excluded {
            assert!(!reg.output_keys().contains(&key));
        }
    }

    #[test]
    fn validate_reports_missing_and_unexpected() {
        let reg = LayerRegistry::builtin().unwrap();
        let mut bands = reg.output_keys();
        let dropped = bands.pop().unwrap();
        bands.push("Rogue_band");
        let diff = reg.validate(&bands);
        assert_eq!(diff.missing, vec![dropped.to_string()]);
        assert_eq!(diff.unexpected, vec!["Rogue_band".to_string()]);
    }

    #[test]
    fn json_round_trip() {
        let reg = LayerRegistry::builtin().unwrap();
        let json = serde_json::to_string(&reg.layers).unwrap();
        let back = LayerRegistry::from_json(&json).unwrap();
        assert_eq!(back.output_keys(), reg.output_keys());
    }
}
