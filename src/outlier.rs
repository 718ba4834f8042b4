//! Multivariate outlier scores in principal-component space.
//!
//! Component scores are uncorrelated with variances equal to the component eigenvalues, so
//! the covariance in PC space is `diag(λ_1..λ_k)` and the squared Mahalanobis distance of a
//! row is `Σ s_i² / λ_i`. No covariance matrix is inverted.

use crate::linalg_backends::ThreadSafeStdError;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Per-row outlier statistics, parallel to the input rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierScores {
    /// `D²` for each row.
    pub squared_distances: Vec<f64>,
    /// `D = sqrt(D²)` for each row.
    pub distances: Vec<f64>,
    /// `P(χ²_k >= D²)` with `k` the number of components.
    pub p_values: Vec<f64>,
}

/// Squared Mahalanobis distance of every row of `scores` (n_rows x k) given the component
/// variances (length k).
///
/// A zero variance yields NaN or infinity for rows touching that component; this is not
/// guarded.
pub fn squared_mahalanobis(
    scores: ArrayView2<f64>,
    variances: ArrayView1<f64>,
) -> Result<Array1<f64>, ThreadSafeStdError> {
    if scores.ncols() != variances.len() {
        return Err(format!(
            "Scores have {} component column(s) but {} variance(s) were given.",
            scores.ncols(),
            variances.len()
        )
        .into());
    }
    Ok(scores.map_axis(Axis(1), |row| {
        row.iter().zip(variances.iter()).map(|(s, lambda)| s * s / lambda).sum()
    }))
}

/// Right-tailed chi-squared p-value of `d_squared` with `degrees_of_freedom` degrees of freedom.
///
/// NaN input gives a NaN p-value.
pub fn chi_squared_p_value(d_squared: f64, degrees_of_freedom: usize) -> Result<f64, ThreadSafeStdError> {
    let dist = ChiSquared::new(degrees_of_freedom as f64)
        .map_err(|e| format!("Invalid chi-squared degrees of freedom ({}): {}", degrees_of_freedom, e))?;
    if d_squared.is_nan() {
        return Ok(f64::NAN);
    }
    if d_squared <= 0.0 {
        return Ok(1.0);
    }
    if d_squared.is_infinite() {
        return Ok(0.0);
    }
    Ok(dist.sf(d_squared))
}

/// Scores every row and tests it against `χ²_k`, `k = variances.len()`.
///
/// Fed from [`crate::pca::PCA`], a null component arrives with variance `0.0` and all
/// scores `0.0`, so every row gets `D² = NaN` and a NaN p-value. That happens whenever
/// `n_rows <= min(max_components, n_features)`: centering costs one dimension, so the
/// last retained component has no spread. Such rows are never reported as outliers.
pub fn score_outliers(
    scores: ArrayView2<f64>,
    variances: ArrayView1<f64>,
) -> Result<OutlierScores, ThreadSafeStdError> {
    let squared = squared_mahalanobis(scores, variances)?;
    let dof = variances.len();
    let p_values = squared
        .iter()
        .map(|&d2| chi_squared_p_value(d2, dof))
        .collect::<Result<Vec<f64>, _>>()?;
    Ok(OutlierScores {
        distances: squared.iter().map(|d2| d2.sqrt()).collect(),
        squared_distances: squared.to_vec(),
        p_values,
    })
}
