//! The statistical engine: records in, [`AnalysisResult`] out.
//!
//! Each call is a pure, single-pass transform. Nothing is cached between calls; callers
//! that re-render a result hold on to the returned value themselves.

use crate::error::AnalysisError;
use crate::normalizer::Record;
use crate::outlier::score_outliers;
use crate::pca::{DEFAULT_ZERO_VARIANCE_RELATIVE_FLOOR, PCA};
use indexmap::IndexMap;
use log::{debug, info, warn};
use ndarray::{s, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

/// Upper bound on retained components. Three matches the 3-D score view downstream.
pub const DEFAULT_MAX_COMPONENTS: usize = 3;

/// Tunables of the statistical engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retained components are `min(max_components, n_features, n_rows)`.
    pub max_components: usize,
    /// See [`crate::pca::Standardization::from_data`].
    pub zero_variance_relative_floor: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_components: DEFAULT_MAX_COMPONENTS,
            zero_variance_relative_floor: DEFAULT_ZERO_VARIANCE_RELATIVE_FLOOR,
        }
    }
}

impl EngineConfig {
    pub fn with_max_components(mut self, max_components: usize) -> Self {
        self.max_components = max_components;
        self
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        if self.max_components == 0 {
            return Err(AnalysisError::InvalidConfig("max_components must be at least 1".to_string()));
        }
        if !self.zero_variance_relative_floor.is_finite() || self.zero_variance_relative_floor < 0.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "zero_variance_relative_floor must be finite and non-negative, got {}",
                self.zero_variance_relative_floor
            )));
        }
        Ok(())
    }
}

/// One retained principal component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResult {
    /// 1-based component index.
    pub pc_index: usize,
    /// Score of every record, in input order.
    pub scores: Vec<f64>,
    /// Unit-norm loading vector keyed by feature name, in feature order.
    pub loadings: IndexMap<String, f64>,
}

/// Complete output of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub results: Vec<ComponentResult>,
    /// Fraction of total variance per retained component.
    pub variance_ratio: Vec<f64>,
    /// Variance (covariance eigenvalue) per retained component.
    pub explained_variance: Vec<f64>,
    /// Record identifiers, in input order.
    pub residue_nos: Vec<String>,
    pub feature_names: Vec<String>,
    /// Mahalanobis distance of each record in PC space.
    pub mahalanobis_dist: Vec<f64>,
    /// `P(χ²_k >= D²)` of each record.
    pub p_values: Vec<f64>,
    pub n_components: usize,
}

impl AnalysisResult {
    /// Record identifiers, in input order.
    pub fn identifiers(&self) -> &[String] {
        &self.residue_nos
    }

    pub fn n_records(&self) -> usize {
        self.residue_nos.len()
    }

    /// Explained variance ratios scaled to percent.
    pub fn variance_percent(&self) -> Vec<f64> {
        self.variance_ratio.iter().map(|v| v * 100.0).collect()
    }

    /// `(identifier, [pc1, pc2, pc3])` per record, or `None` with fewer than three components.
    pub fn coordinates(&self) -> Option<Vec<(&str, [f64; 3])>> {
        if self.results.len() < 3 {
            return None;
        }
        let (pc1, pc2, pc3) = (&self.results[0].scores, &self.results[1].scores, &self.results[2].scores);
        Some(
            self.residue_nos
                .iter()
                .enumerate()
                .map(|(i, id)| (id.as_str(), [pc1[i], pc2[i], pc3[i]]))
                .collect(),
        )
    }
}

/// Input of one analysis in a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub records: Vec<Record>,
    pub feature_names: Option<Vec<String>>,
}

/// Synthesizes `Col_1 .. Col_n`, used when supplied names do not fit the matrix.
pub fn column_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Col_{}", i)).collect()
}

/// Makes names unique by suffixing repeats with `_2`, `_3`, ... in order of appearance.
/// A suffix that collides with another name is bumped until it is free.
pub fn disambiguate_feature_names(names: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if seen.insert(name.as_str()) {
            out.push(name.clone());
            continue;
        }
        let mut n = 2;
        let mut candidate = format!("{}_{}", name, n);
        while taken.contains(&candidate) {
            n += 1;
            candidate = format!("{}_{}", name, n);
        }
        taken.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

fn align_feature_names(feature_names: Option<&[String]>, n_features: usize) -> Vec<String> {
    match feature_names {
        Some(names) if names.len() == n_features => {
            let unique = disambiguate_feature_names(names);
            if unique.as_slice() != names {
                warn!("Duplicate feature names were suffixed to keep loadings keys unique: {:?}", unique);
            }
            unique
        }
        Some(names) => {
            warn!(
                "{} feature name(s) supplied for {} feature column(s); using Col_1..Col_{}.",
                names.len(),
                n_features,
                n_features
            );
            column_names(n_features)
        }
        None => column_names(n_features),
    }
}

fn build_matrix(records: &[Record]) -> Result<Array2<f64>, AnalysisError> {
    let n_rows = records.len();
    let n_features = records.first().map_or(0, |r| r.values.len());
    if n_rows == 0 || n_features == 0 {
        return Err(AnalysisError::InsufficientData {
            rows: n_rows,
            columns: if n_rows == 0 { 0 } else { 1 + n_features },
        });
    }
    let mut matrix = Array2::<f64>::zeros((n_rows, n_features));
    for (index, (record, mut row)) in records.iter().zip(matrix.axis_iter_mut(Axis(0))).enumerate() {
        if record.values.len() != n_features {
            return Err(AnalysisError::InconsistentRecord {
                index,
                expected: n_features,
                found: record.values.len(),
            });
        }
        for (cell, &v) in row.iter_mut().zip(record.values.iter()) {
            *cell = v;
        }
    }
    Ok(matrix)
}

/// Runs the analysis with the default [`EngineConfig`].
pub fn analyze(records: &[Record], feature_names: Option<&[String]>) -> Result<AnalysisResult, AnalysisError> {
    analyze_with_config(records, feature_names, &EngineConfig::default())
}

/// Standardizes the records, computes up to `config.max_components` principal components
/// and scores every record for multivariate outlyingness.
///
/// # Errors
/// `InsufficientData` when there are no rows or no feature columns, `InconsistentRecord`
/// for ragged input, `InvalidConfig` for an unusable config, `Decomposition` when the
/// linear algebra backend fails. No partial result is ever returned.
pub fn analyze_with_config(
    records: &[Record],
    feature_names: Option<&[String]>,
    config: &EngineConfig,
) -> Result<AnalysisResult, AnalysisError> {
    config.validate()?;
    let start_time = Instant::now();

    let matrix = build_matrix(records)?;
    let (n_rows, n_features) = matrix.dim();
    info!("Analyzing {} record(s) x {} feature(s).", n_rows, n_features);

    let feature_names = align_feature_names(feature_names, n_features);
    let n_components = config.max_components.min(n_features).min(n_rows);
    debug!("Retaining {} principal component(s).", n_components);

    let mut pca = PCA::new();
    pca.fit(matrix.clone(), n_components, config.zero_variance_relative_floor)
        .map_err(|e| AnalysisError::Decomposition(e.to_string()))?;
    let scores = pca
        .transform(matrix)
        .map_err(|e| AnalysisError::Decomposition(e.to_string()))?;
    let rotation = pca
        .rotation()
        .ok_or_else(|| AnalysisError::Decomposition("rotation missing after fit".to_string()))?;
    let variances = pca
        .explained_variance()
        .ok_or_else(|| AnalysisError::Decomposition("component variances missing after fit".to_string()))?;
    let variance_ratio = pca
        .explained_variance_ratio()
        .ok_or_else(|| AnalysisError::Decomposition("total variance missing after fit".to_string()))?;

    let outliers = score_outliers(scores.view(), variances.view())
        .map_err(|e| AnalysisError::Decomposition(e.to_string()))?;

    let results = (0..n_components)
        .map(|i| ComponentResult {
            pc_index: i + 1,
            scores: scores.slice(s![.., i]).to_vec(),
            loadings: feature_names
                .iter()
                .cloned()
                .zip(rotation.slice(s![.., i]).iter().copied())
                .collect(),
        })
        .collect();

    info!("Analysis finished in {:?}.", start_time.elapsed());

    Ok(AnalysisResult {
        results,
        variance_ratio: variance_ratio.to_vec(),
        explained_variance: variances.to_vec(),
        residue_nos: records.iter().map(|r| r.identifier.clone()).collect(),
        feature_names,
        mahalanobis_dist: outliers.distances,
        p_values: outliers.p_values,
        n_components,
    })
}

/// Runs independent analyses in parallel; results are in request order.
pub fn analyze_batch(requests: &[AnalysisRequest], config: &EngineConfig) -> Vec<Result<AnalysisResult, AnalysisError>> {
    requests
        .par_iter()
        .map(|req| analyze_with_config(&req.records, req.feature_names.as_deref(), config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn records(rows: &[(&str, &[f64])]) -> Vec<Record> {
        rows.iter().map(|(id, v)| Record::new(*id, v.to_vec())).collect()
    }

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn perfectly_correlated_features_collapse_onto_one_component() {
        let recs = records(&[("1", &[1.0, 2.0]), ("2", &[2.0, 4.0]), ("3", &[3.0, 6.0]), ("4", &[4.0, 8.0])]);
        let res = analyze(&recs, Some(names(&["A", "B"]).as_slice())).unwrap();

        assert_eq!(res.n_components, 2);
        assert_abs_diff_eq!(res.variance_ratio[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(res.variance_ratio[1], 0.0, epsilon = 1e-10);
        // n/(n-1) * 2 for two unit-variance, fully correlated columns
        assert_abs_diff_eq!(res.explained_variance[0], 8.0 / 3.0, epsilon = 1e-10);

        let inv_sqrt2 = 1.0 / 2.0_f64.sqrt();
        assert_abs_diff_eq!(res.results[0].loadings["A"], inv_sqrt2, epsilon = 1e-10);
        assert_abs_diff_eq!(res.results[0].loadings["B"], inv_sqrt2, epsilon = 1e-10);
        let keys: Vec<&String> = res.results[0].loadings.keys().collect();
        assert_eq!(keys, vec!["A", "B"]);

        // Positive loadings make PC1 increase with the raw values.
        let pc1 = &res.results[0].scores;
        assert!(pc1.windows(2).all(|w| w[0] < w[1]));
        assert_abs_diff_eq!(pc1.iter().sum::<f64>(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn component_count_is_capped_by_config_rows_and_features() {
        let recs = records(&[
            ("a", &[1.0, 5.0, 2.0, 8.0]),
            ("b", &[2.0, 3.0, 9.0, 1.0]),
            ("c", &[7.0, 1.0, 4.0, 4.0]),
            ("d", &[3.0, 8.0, 1.0, 6.0]),
            ("e", &[5.0, 2.0, 6.0, 3.0]),
        ]);
        assert_eq!(analyze(&recs, None).unwrap().results.len(), 3);
        let cfg = EngineConfig::default().with_max_components(10);
        assert_eq!(analyze_with_config(&recs, None, &cfg).unwrap().results.len(), 4);
        assert_eq!(analyze_with_config(&recs[..2], None, &cfg).unwrap().results.len(), 2);
    }

    #[test]
    fn mismatched_names_fall_back_to_column_names() {
        let recs = records(&[("1", &[1.0, 2.0]), ("2", &[3.0, 1.0]), ("3", &[0.0, 5.0])]);
        let res = analyze(&recs, Some(names(&["only_one"]).as_slice())).unwrap();
        assert_eq!(res.feature_names, names(&["Col_1", "Col_2"]));
        let res = analyze(&recs, None).unwrap();
        assert_eq!(res.feature_names, names(&["Col_1", "Col_2"]));
    }

    #[test]
    fn duplicate_names_are_suffixed() {
        assert_eq!(
            disambiguate_feature_names(&names(&["A", "B", "A", "A_2", "A"])),
            names(&["A", "B", "A_3", "A_2", "A_4"])
        );
        let recs = records(&[("1", &[1.0, 2.0]), ("2", &[3.0, 1.0]), ("3", &[0.0, 5.0])]);
        let res = analyze(&recs, Some(names(&["X", "X"]).as_slice())).unwrap();
        assert_eq!(res.feature_names, names(&["X", "X_2"]));
        assert_eq!(res.results[0].loadings.len(), 2);
    }

    #[test]
    fn identifier_only_input_is_insufficient() {
        let recs = records(&[("1", &[]), ("2", &[])]);
        assert_eq!(analyze(&recs, None), Err(AnalysisError::InsufficientData { rows: 2, columns: 1 }));
        assert_eq!(analyze(&[], None), Err(AnalysisError::InsufficientData { rows: 0, columns: 0 }));
    }

    #[test]
    fn ragged_records_are_rejected() {
        let recs = records(&[("1", &[1.0, 2.0]), ("2", &[3.0])]);
        assert_eq!(
            analyze(&recs, None),
            Err(AnalysisError::InconsistentRecord { index: 1, expected: 2, found: 1 })
        );
    }

    #[test]
    fn zero_max_components_is_invalid() {
        let recs = records(&[("1", &[1.0]), ("2", &[3.0])]);
        let cfg = EngineConfig::default().with_max_components(0);
        assert!(matches!(analyze_with_config(&recs, None, &cfg), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn zero_variance_column_stays_finite() {
        let recs = records(&[
            ("1", &[1.0, 0.1, 4.0]),
            ("2", &[2.0, 0.1, 1.0]),
            ("3", &[4.0, 0.1, 3.0]),
            ("4", &[3.0, 0.1, 7.0]),
        ]);
        let res = analyze(&recs, None).unwrap();
        for comp in &res.results {
            assert!(comp.loadings.values().all(|w| w.is_finite()));
            assert!(comp.scores.iter().all(|s| s.is_finite()));
        }
        // The constant column carries no weight on the informative components.
        assert_abs_diff_eq!(res.results[0].loadings["Col_2"], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(res.results[1].loadings["Col_2"], 0.0, epsilon = 1e-9);
        let total: f64 = res.variance_ratio.iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn fewer_rows_than_features_leaves_a_null_last_component() {
        let recs = records(&[
            ("1", &[1.0, 2.0, 3.0, 4.0]),
            ("2", &[2.0, 1.0, 5.0, 3.0]),
            ("3", &[4.0, 4.0, 1.0, 2.0]),
        ]);
        let res = analyze(&recs, None).unwrap();
        assert_eq!(res.n_components, 3);
        assert_eq!(res.explained_variance[2], 0.0);
        assert_eq!(res.variance_ratio[2], 0.0);
        assert!(res.results[2].scores.iter().all(|&s| s == 0.0));
        assert!(res.mahalanobis_dist.iter().all(|d| d.is_nan()));
        assert!(res.p_values.iter().all(|p| p.is_nan()));
        assert!(crate::report::select_outliers(&res, 0.0).is_empty());
    }

    #[test]
    fn large_offset_columns_are_standardized_like_any_other() {
        let recs = records(&[
            ("1", &[1.0e12 + 50.0, 1.0]),
            ("2", &[1.0e12 - 50.0, 1.0]),
            ("3", &[1.0e12 + 50.0, 3.0]),
            ("4", &[1.0e12 - 50.0, 3.0]),
        ]);
        let res = analyze(&recs, None).unwrap();
        assert_abs_diff_eq!(res.variance_ratio[0], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(res.variance_ratio[1], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn batch_matches_sequential_runs() {
        let a = AnalysisRequest {
            records: records(&[("1", &[1.0, 2.0]), ("2", &[2.0, 1.0]), ("3", &[5.0, 5.0])]),
            feature_names: Some(names(&["p", "q"])),
        };
        let b = AnalysisRequest { records: vec![], feature_names: None };
        let out = analyze_batch(&[a.clone(), b], &EngineConfig::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], analyze(&a.records, a.feature_names.as_deref()));
        assert!(out[1].is_err());
    }

    #[test]
    fn coordinates_need_three_components() {
        let recs = records(&[("1", &[1.0, 2.0]), ("2", &[2.0, 1.0]), ("3", &[5.0, 5.0])]);
        assert!(analyze(&recs, None).unwrap().coordinates().is_none());

        let recs = records(&[
            ("x", &[1.0, 2.0, 0.0]),
            ("y", &[2.0, 1.0, 3.0]),
            ("z", &[5.0, 5.0, 1.0]),
            ("w", &[0.0, 4.0, 2.0]),
        ]);
        let res = analyze(&recs, None).unwrap();
        let coords = res.coordinates().unwrap();
        assert_eq!(coords.len(), 4);
        assert_eq!(coords[2].0, "z");
        assert_eq!(coords[2].1[1], res.results[1].scores[2]);
        assert_abs_diff_eq!(res.variance_percent().iter().sum::<f64>(), 100.0, epsilon = 1e-8);
    }
}
