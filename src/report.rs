//! Views over an [`AnalysisResult`] for display: outlier tables and ranked loadings.
//!
//! The engine never thresholds anything; these helpers take the threshold from the caller.

use crate::engine::{AnalysisResult, ComponentResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Mahalanobis distance above which a record is listed as an outlier by default.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportOptions {
    pub outlier_threshold: f64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self { outlier_threshold: DEFAULT_OUTLIER_THRESHOLD }
    }
}

/// One row of the outlier table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierEntry {
    pub identifier: String,
    pub pc1: f64,
    /// `None` when only one component was retained.
    pub pc2: Option<f64>,
    pub distance: f64,
    pub p_value: f64,
}

/// Records whose Mahalanobis distance is strictly above `threshold`, farthest first.
/// NaN distances never qualify.
pub fn select_outliers(result: &AnalysisResult, threshold: f64) -> Vec<OutlierEntry> {
    let pc1 = result.results.first().map(|c| c.scores.as_slice());
    let pc2 = result.results.get(1).map(|c| c.scores.as_slice());

    let mut entries: Vec<OutlierEntry> = result
        .mahalanobis_dist
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d > threshold)
        .map(|(i, &distance)| OutlierEntry {
            identifier: result.residue_nos[i].clone(),
            pc1: pc1.map_or(f64::NAN, |s| s[i]),
            pc2: pc2.map(|s| s[i]),
            distance,
            p_value: result.p_values[i],
        })
        .collect();
    entries.sort_by(|a, b| b.distance.partial_cmp(&a.distance).unwrap_or(Ordering::Equal));
    entries
}

/// Loadings of one component ordered by absolute weight, largest first.
pub fn ranked_loadings(component: &ComponentResult) -> Vec<(&str, f64)> {
    let mut ranked: Vec<(&str, f64)> = component.loadings.iter().map(|(k, &v)| (k.as_str(), v)).collect();
    ranked.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap_or(Ordering::Equal));
    ranked
}

/// Everything a display layer needs, precomputed for one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report<'a> {
    pub outlier_threshold: f64,
    pub variance_percent: Vec<f64>,
    pub outliers: Vec<OutlierEntry>,
    pub ranked_loadings: Vec<Vec<(&'a str, f64)>>,
}

impl<'a> Report<'a> {
    pub fn new(result: &'a AnalysisResult, options: &ReportOptions) -> Self {
        Self {
            outlier_threshold: options.outlier_threshold,
            variance_percent: result.variance_percent(),
            outliers: select_outliers(result, options.outlier_threshold),
            ranked_loadings: result.results.iter().map(ranked_loadings).collect(),
        }
    }
}
