// Residue-level PCA with multivariate outlier scoring

#![doc = include_str!("../README.md")]

pub mod engine;
pub mod error;
pub mod linalg_backends;
pub mod normalizer;
pub mod outlier;
pub mod pca;
pub mod report;


pub use engine::{
    analyze, analyze_batch, analyze_with_config, AnalysisRequest, AnalysisResult, ComponentResult, EngineConfig,
    DEFAULT_MAX_COMPONENTS,
};
pub use error::{AnalysisError, AnalysisResponse};
pub use normalizer::{
    normalize_lines, normalize_table, normalize_text, HeaderMode, IdentifierPolicy, NormalizedTable,
    NormalizerOptions, Record, Table,
};
pub use report::{Report, ReportOptions, DEFAULT_OUTLIER_THRESHOLD};

/// Normalizes pasted text and analyzes the surviving records.
///
/// An input with no parseable data line yields [`AnalysisError::InsufficientData`].
///
/// ```
/// use residue_pca::{analyze_text, EngineConfig, IdentifierPolicy, HeaderMode, NormalizerOptions};
///
/// let text = "Res I1 I2 I3\nA10 1 2 3\nA11 2 4 7\nA12 3 5 5\nA13 9 1 2";
/// let opts = NormalizerOptions::new(IdentifierPolicy::DigitsOnly, HeaderMode::Detect);
/// let result = analyze_text(text, &opts, &EngineConfig::default()).unwrap();
/// assert_eq!(result.residue_nos, vec!["10", "11", "12", "13"]);
/// assert_eq!(result.results.len(), 3);
/// ```
pub fn analyze_text(
    text: &str,
    options: &NormalizerOptions,
    config: &EngineConfig,
) -> Result<AnalysisResult, AnalysisError> {
    let table = normalize_text(text, options);
    analyze_with_config(&table.records, table.feature_names.as_deref(), config)
}
