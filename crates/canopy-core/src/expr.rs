//! The remote platform's expression language.
//!
//! A [`LayerExpr`] describes one indicator layer as a computation graph that
//! the remote platform evaluates per pixel. Nothing in this module touches
//! pixel data locally; the graph is shipped to the backend whole.
//!
//! Time-series layers use [`LayerExpr::YearFold`], which iterates a year
//! range *inside* the remote expression graph. A layer spanning 20 years
//! therefore costs the same number of round trips as a layer spanning one;
//! this is a contract, not an optimisation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// 1 where input > threshold, else 0.
    Gt,
    /// 1 where input >= threshold, else 0.
    Gte,
    /// 1 where input == threshold (exact), else 0.
    Eq,
    /// Logical negation of a 0/1 input.
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Mul,
    Min,
    Max,
}

/// Reducer applied across years by [`LayerExpr::YearFold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldOp {
    Max,
    Min,
    Sum,
}

/// One node of a remote layer expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum LayerExpr {
    /// A band of a remote dataset.
    Source { dataset: String, band: String },
    /// A constant-valued layer. `Constant(0.0)` is the empty layer the
    /// composer substitutes for excluded or unavailable layers.
    Constant { value: f64 },
    /// Per-pixel area in hectares, supplied by the platform.
    PixelArea,
    Unary {
        op: UnaryOp,
        /// Comparison threshold; ignored by `Not`.
        threshold: f64,
        input: Box<LayerExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<LayerExpr>,
        rhs: Box<LayerExpr>,
    },
    /// Fold one band template over an inclusive year range, server side.
    /// `band_template` contains the literal `{year}` placeholder.
    YearFold {
        dataset: String,
        band_template: String,
        start_year: i32,
        end_year: i32,
        op: FoldOp,
    },
}

impl LayerExpr {
    pub fn source(dataset: impl Into<String>, band: impl Into<String>) -> Self {
        LayerExpr::Source { dataset: dataset.into(), band: band.into() }
    }

    pub fn constant(value: f64) -> Self {
        LayerExpr::Constant { value }
    }

    /// The empty layer: zero everywhere.
    pub fn empty() -> Self {
        LayerExpr::Constant { value: 0.0 }
    }

    pub fn year_fold(
        dataset: impl Into<String>,
        band_template: impl Into<String>,
        start_year: i32,
        end_year: i32,
        op: FoldOp,
    ) -> Self {
        LayerExpr::YearFold {
            dataset: dataset.into(),
            band_template: band_template.into(),
            start_year,
            end_year,
            op,
        }
    }

    pub fn gt(self, threshold: f64) -> Self {
        LayerExpr::Unary { op: UnaryOp::Gt, threshold, input: Box::new(self) }
    }

    pub fn gte(self, threshold: f64) -> Self {
        LayerExpr::Unary { op: UnaryOp::Gte, threshold, input: Box::new(self) }
    }

    pub fn eq(self, threshold: f64) -> Self {
        LayerExpr::Unary { op: UnaryOp::Eq, threshold, input: Box::new(self) }
    }

    pub fn max(self, other: LayerExpr) -> Self {
        LayerExpr::Binary { op: BinaryOp::Max, lhs: Box::new(self), rhs: Box::new(other) }
    }

    pub fn mul(self, other: LayerExpr) -> Self {
        LayerExpr::Binary { op: BinaryOp::Mul, lhs: Box::new(self), rhs: Box::new(other) }
    }

    /// Weight the layer by per-pixel area so that reducing with a plain sum
    /// yields hectares directly.
    pub fn scale_by_area(self) -> Self {
        self.mul(LayerExpr::PixelArea)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, LayerExpr::Constant { value } if *value == 0.0)
    }

    /// Datasets referenced anywhere in the graph, depth first.
    pub fn datasets(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_datasets(&mut out);
        out
    }

    fn collect_datasets<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            LayerExpr::Source { dataset, .. } | LayerExpr::YearFold { dataset, .. } => {
                out.push(dataset.as_str());
            }
            LayerExpr::Unary { input, .. } => input.collect_datasets(out),
            LayerExpr::Binary { lhs, rhs, .. } => {
                lhs.collect_datasets(out);
                rhs.collect_datasets(out);
            }
            LayerExpr::Constant { .. } | LayerExpr::PixelArea => {}
        }
    }
}

/// Band name of the derived water flag appended by the composer.
pub const WATER_FLAG_BAND: &str = "water_flag";

/// One named band of a composed surface.
#[derive(Debug, Clone)]
pub struct SurfaceBand {
    pub name: String,
    pub expr: Arc<LayerExpr>,
}

/// The merged multiband surface: every registered layer plus the derived
/// water flag, each band area-weighted. Immutable once published; shared
/// read-only by all aggregations in the process.
#[derive(Debug, Clone)]
pub struct Surface {
    pub bands: Vec<SurfaceBand>,
}

impl Surface {
    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_expected_graph() {
        let e = LayerExpr::source("gfc", "treecover2000").gt(10.0).scale_by_area();
        match &e {
            LayerExpr::Binary { op: BinaryOp::Mul, lhs, rhs } => {
                assert!(matches!(**rhs, LayerExpr::PixelArea));
                assert!(matches!(**lhs, LayerExpr::Unary { op: UnaryOp::Gt, .. }));
            }
            other => panic!("unexpected graph: {other:?}"),
        }
    }

    #[test]
    fn empty_layer_is_empty() {
        assert!(LayerExpr::empty().is_empty());
        assert!(!LayerExpr::constant(1.0).is_empty());
    }

    #[test]
    fn datasets_are_collected_from_nested_nodes() {
        let e = LayerExpr::source("tmf", "undisturbed")
            .max(LayerExpr::year_fold("radd", "alert_{year}", 2021, 2024, FoldOp::Max))
            .scale_by_area();
        assert_eq!(e.datasets(), vec!["tmf", "radd"]);
    }
}
