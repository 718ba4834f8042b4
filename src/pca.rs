// Principal component analysis (PCA) on z-scored feature tables

use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider, ThreadSafeStdError};
use log::debug;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Standard deviations at or below `n_rows * floor * |mean|` are treated as zero. Summing
/// `n` copies of a value rounds its mean by up to about `n * EPSILON * |mean|`, so a
/// constant column can show spread of that size and no more.
pub const DEFAULT_ZERO_VARIANCE_RELATIVE_FLOOR: f64 = f64::EPSILON;

/// Components whose variance is at or below this fraction of the largest are null.
pub const NULL_COMPONENT_RELATIVE_TOLERANCE: f64 = 1e-12;

/// Column statistics used to z-score a feature matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    /// Per-column mean. Shape: (n_features)
    pub mean: Array1<f64>,
    /// Sanitized per-column divisor. Degenerate columns carry `1.0`.
    /// Shape: (n_features)
    pub scale: Array1<f64>,
    /// Indices of columns whose standard deviation was treated as zero.
    pub degenerate_columns: Vec<usize>,
}

impl Standardization {
    /// Computes column means and population standard deviations (`ddof = 0`).
    ///
    /// A column whose standard deviation is `0.0`, or no larger than
    /// `relative_floor * n_rows * |mean|`, gets a divisor of `1.0`; after centering it is
    /// (numerically) all zeros and contributes no variance. Any spread above rounding
    /// level is scaled to unit variance, however large the mean.
    pub fn from_data(data: ArrayView2<f64>, relative_floor: f64) -> Result<Self, ThreadSafeStdError> {
        let mean = data
            .mean_axis(Axis(0))
            .ok_or("Failed to compute column means of an empty matrix.")?;
        let std_dev = data.std_axis(Axis(0), 0.0);
        let floor = relative_floor * data.nrows() as f64;

        let mut degenerate_columns = Vec::new();
        let scale = Array1::from_shape_fn(std_dev.len(), |j| {
            let sd = std_dev[j];
            if sd == 0.0 || sd <= floor * mean[j].abs() {
                degenerate_columns.push(j);
                1.0
            } else {
                sd
            }
        });

        Ok(Self { mean, scale, degenerate_columns })
    }

    /// Centers and scales `data` in place.
    pub fn apply(&self, data: &mut Array2<f64>) -> Result<(), ThreadSafeStdError> {
        if data.ncols() != self.mean.len() {
            return Err(format!(
                "Input data feature dimension ({}) does not match standardization dimension ({}).",
                data.ncols(),
                self.mean.len()
            )
            .into());
        }
        for mut row in data.axis_iter_mut(Axis(0)) {
            ndarray::Zip::from(row.view_mut())
                .and(&self.mean)
                .and(&self.scale)
                .for_each(|val, &m, &s| *val = (*val - m) / s);
        }
        Ok(())
    }
}

/// Principal component analysis (PCA) structure.
///
/// Holds the standardization and the leading principal axes of a fitted table.
/// Fitting always z-scores the input first.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PCA {
    /// The rotation matrix (principal axes as unit-norm columns).
    /// Shape: (n_features, k_components)
    rotation: Option<Array2<f64>>,
    /// Column statistics of the training data.
    standardization: Option<Standardization>,
    /// Variance along each retained component (covariance eigenvalues, `n - 1` denominator).
    /// Shape: (k_components)
    explained_variance: Option<Array1<f64>>,
    /// Sum of all covariance eigenvalues, i.e. the trace of the covariance matrix.
    total_variance: Option<f64>,
}

impl Default for PCA {
    fn default() -> Self {
        Self::new()
    }
}

impl PCA {
    /// Creates a new, unfitted PCA struct.
    ///
    /// ```
    /// use residue_pca::pca::PCA;
    /// let pca = PCA::new();
    /// assert!(pca.rotation().is_none());
    /// ```
    pub fn new() -> Self {
        Self {
            rotation: None,
            standardization: None,
            explained_variance: None,
            total_variance: None,
        }
    }

    pub fn rotation(&self) -> Option<&Array2<f64>> {
        self.rotation.as_ref()
    }

    pub fn standardization(&self) -> Option<&Standardization> {
        self.standardization.as_ref()
    }

    /// Eigenvalues of the covariance matrix of the scaled data for the retained
    /// components, largest first. Null components read exactly `0.0`.
    pub fn explained_variance(&self) -> Option<&Array1<f64>> {
        self.explained_variance.as_ref()
    }

    /// Fraction of the total variance captured by each retained component.
    ///
    /// Returns NaN entries when the total variance is zero (every column degenerate).
    pub fn explained_variance_ratio(&self) -> Option<Array1<f64>> {
        let variances = self.explained_variance.as_ref()?;
        let total = self.total_variance?;
        Some(variances.mapv(|v| v / total))
    }

    /// Fits the model using an exact eigendecomposition.
    ///
    /// The data is z-scored, then the covariance matrix (if n_features <= n_samples) or
    /// the Gram matrix (if n_features > n_samples) is eigendecomposed and the
    /// `n_components` leading axes are kept. Each axis is normalized to unit length and its
    /// sign is fixed so that its largest-magnitude entry is positive.
    ///
    /// * `data_matrix` - Input data, shape (n_samples, n_features).
    /// * `n_components` - Number of components to keep, at most `min(n_samples, n_features)`.
    /// * `zero_variance_relative_floor` - See [`Standardization::from_data`].
    ///
    /// # Errors
    /// Returns an error if the matrix is empty, `n_components` is zero or exceeds the rank
    /// bound, or if the eigendecomposition fails.
    pub fn fit(
        &mut self,
        mut data_matrix: Array2<f64>,
        n_components: usize,
        zero_variance_relative_floor: f64,
    ) -> Result<(), ThreadSafeStdError> {
        let n_samples = data_matrix.nrows();
        let n_features = data_matrix.ncols();

        if n_samples == 0 || n_features == 0 {
            return Err("Input data_matrix has zero samples or zero features.".into());
        }
        if n_components == 0 || n_components > n_samples.min(n_features) {
            return Err(format!(
                "Requested {} components, but a {}x{} matrix supports between 1 and {}.",
                n_components,
                n_samples,
                n_features,
                n_samples.min(n_features)
            )
            .into());
        }

        let standardization = Standardization::from_data(data_matrix.view(), zero_variance_relative_floor)?;
        if !standardization.degenerate_columns.is_empty() {
            debug!(
                "Columns {:?} have zero variance; their divisor is 1.0.",
                standardization.degenerate_columns
            );
        }
        standardization.apply(&mut data_matrix)?;
        let scaled = data_matrix;

        // A single sample has no spread; keep the divisor at 1 and let 0/0 ratios surface as NaN.
        let denom = (n_samples.saturating_sub(1)).max(1) as f64;
        let total_variance = scaled.iter().map(|x| x * x).sum::<f64>() / denom;

        let backend = LinAlgBackendProvider::new();
        let mut rotation = Array2::<f64>::zeros((n_features, n_components));
        let mut variances = Vec::with_capacity(n_components);

        if n_features <= n_samples {
            let mut cov_matrix = scaled.t().dot(&scaled);
            cov_matrix /= denom;

            let eig = backend
                .eigh_upper(&cov_matrix)
                .map_err(|e| format!("Eigen decomposition of covariance matrix failed: {}", e))?;

            let pairs = sorted_eigenpairs(&eig.eigenvalues, &eig.eigenvectors);
            let null_floor = null_component_floor(&pairs);
            for (i, (eig_val, eig_vec)) in pairs.into_iter().take(n_components).enumerate() {
                variances.push(snap_null(eig_val, null_floor));
                rotation.slice_mut(s![.., i]).assign(&eig_vec);
            }
        } else {
            // Gram trick: eigenvectors u of X X^T / (n-1) map to axes X^T u.
            let mut gram_matrix = scaled.dot(&scaled.t());
            gram_matrix /= denom;

            let eig = backend
                .eigh_upper(&gram_matrix)
                .map_err(|e| format!("Eigen decomposition of Gram matrix failed: {}", e))?;

            let pairs = sorted_eigenpairs(&eig.eigenvalues, &eig.eigenvectors);
            let null_floor = null_component_floor(&pairs);
            for (i, (eig_val, u_col)) in pairs.into_iter().take(n_components).enumerate() {
                variances.push(snap_null(eig_val, null_floor));
                let axis = scaled.t().dot(&u_col);
                rotation.slice_mut(s![.., i]).assign(&axis);
            }
        }

        for mut column in rotation.columns_mut() {
            let norm = column.dot(&column).sqrt();
            if norm > 1e-12 {
                column.mapv_inplace(|x| x / norm);
            } else {
                column.fill(0.0);
            }
            let pivot = column
                .iter()
                .copied()
                .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
            if pivot < 0.0 {
                column.mapv_inplace(|x| -x);
            }
        }

        self.rotation = Some(rotation);
        self.standardization = Some(standardization);
        self.explained_variance = Some(Array1::from(variances));
        self.total_variance = Some(total_variance);
        Ok(())
    }

    /// Applies the fitted standardization and projects onto the principal axes.
    ///
    /// Scores on a null component (variance exactly `0.0`) are pinned to zero: the training
    /// data has no spread along it, and its axis is only defined up to rounding.
    ///
    /// * `x` - Input data, shape (m_samples, n_features). Modified in place.
    ///
    /// # Errors
    /// Returns an error if the model is not fitted or the feature dimension differs.
    pub fn transform(&self, mut x: Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        let rotation = self
            .rotation
            .as_ref()
            .ok_or("PCA model: Rotation matrix not set. Fit a model first.")?;
        let standardization = self
            .standardization
            .as_ref()
            .ok_or("PCA model: Standardization not set. Fit a model first.")?;

        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, rotation.ncols())));
        }
        standardization.apply(&mut x)?;
        let mut scores = x.dot(rotation);
        if let Some(variances) = self.explained_variance.as_ref() {
            for (mut column, &variance) in scores.columns_mut().into_iter().zip(variances.iter()) {
                if variance == 0.0 {
                    column.fill(0.0);
                }
            }
        }
        Ok(scores)
    }
}

/// Eigenvalues at or below this are null: rounding residue of a rank-deficient matrix,
/// including tiny negatives. Snapped to exactly `0.0` so every backend agrees.
fn null_component_floor(pairs: &[(f64, Array1<f64>)]) -> f64 {
    let largest = pairs.first().map_or(0.0, |(v, _)| *v).max(0.0);
    NULL_COMPONENT_RELATIVE_TOLERANCE * largest
}

fn snap_null(eig_val: f64, null_floor: f64) -> f64 {
    if eig_val.is_nan() || eig_val > null_floor {
        eig_val
    } else {
        0.0
    }
}

/// Pairs eigenvalues with their eigenvector columns, largest eigenvalue first.
fn sorted_eigenpairs(values: &Array1<f64>, vectors: &Array2<f64>) -> Vec<(f64, Array1<f64>)> {
    let mut pairs: Vec<(f64, Array1<f64>)> = values
        .iter()
        .copied()
        .zip(vectors.columns().into_iter().map(|col| col.to_owned()))
        .collect();
    pairs.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    pairs
}
