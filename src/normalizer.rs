//! Tolerant conversion of free-form tabular text into numeric records.
//!
//! Input is one identifier column followed by feature columns. Cells are separated by any
//! run of commas and whitespace, so `"A10, 1.5\t2"` and `"A10 1.5 2"` tokenize identically.
//! Lines that cannot be read as numbers are dropped silently; only an empty outcome is an
//! error, and that is reported by the engine.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,\s]+").expect("separator pattern is valid"));

/// One entity: an opaque identifier and its feature values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identifier: String,
    pub values: Vec<f64>,
}

impl Record {
    pub fn new(identifier: impl Into<String>, values: Vec<f64>) -> Self {
        Self { identifier: identifier.into(), values }
    }
}

/// How the first cell of a line becomes a record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPolicy {
    /// Keep the first token as written.
    #[default]
    Verbatim,
    /// Keep only the ASCII digits of the first token (`"A10"` becomes `"10"`).
    /// Lines whose first token has no digits are dropped.
    DigitsOnly,
}

/// How the first non-empty line is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMode {
    /// The line is a header when it has at least two tokens and one of its feature tokens
    /// is not a number.
    #[default]
    Detect,
    /// The line is always a header (delimited file uploads).
    FirstRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizerOptions {
    pub identifier_policy: IdentifierPolicy,
    pub header_mode: HeaderMode,
}

impl NormalizerOptions {
    pub fn new(identifier_policy: IdentifierPolicy, header_mode: HeaderMode) -> Self {
        Self { identifier_policy, header_mode }
    }
}

/// A pre-parsed spreadsheet: a header row and cell rows, first column is the identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Output of the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedTable {
    pub records: Vec<Record>,
    /// Header names, or `Feature_1..Feature_n` synthesized from the first parsed record.
    /// `None` when there was no header and no record survived.
    pub feature_names: Option<Vec<String>>,
    /// Number of non-empty data lines that were discarded.
    pub dropped_lines: usize,
}

impl NormalizedTable {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Splits a line on runs of commas and whitespace after trimming the ends.
///
/// A leading comma yields an empty first token, so `",1,2"` has an empty identifier.
pub fn tokenize(line: &str) -> Vec<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    SEPARATOR.split(trimmed).collect()
}

/// Parses every token as `f64`, failing if any one does not parse.
pub fn parse_features(tokens: &[&str]) -> Option<Vec<f64>> {
    tokens.iter().map(|t| t.trim().parse::<f64>().ok()).collect()
}

/// Applies the identifier policy; `None` means the line must be dropped.
pub fn extract_identifier(raw: &str, policy: IdentifierPolicy) -> Option<String> {
    match policy {
        IdentifierPolicy::Verbatim => Some(raw.to_string()),
        IdentifierPolicy::DigitsOnly => {
            let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                None
            } else {
                Some(digits)
            }
        }
    }
}

/// Returns the feature names if `tokens` form a header line under [`HeaderMode::Detect`].
pub fn detect_header(tokens: &[&str]) -> Option<Vec<String>> {
    if tokens.len() < 2 {
        return None;
    }
    match parse_features(&tokens[1..]) {
        Some(_) => None,
        None => Some(tokens[1..].iter().map(|t| t.to_string()).collect()),
    }
}

/// Synthesizes `Feature_1 .. Feature_n`.
pub fn synthesized_feature_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Feature_{}", i)).collect()
}

fn parse_data_tokens(tokens: &[&str], policy: IdentifierPolicy) -> Option<Record> {
    if tokens.len() < 2 {
        return None;
    }
    let identifier = extract_identifier(tokens[0], policy)?;
    let values = parse_features(&tokens[1..])?;
    Some(Record { identifier, values })
}

/// Normalizes free-form text lines.
///
/// Each item may itself hold several lines (a pasted block); carriage returns are ignored
/// and blank lines are skipped before header classification.
pub fn normalize_lines<I, S>(lines: I, options: &NormalizerOptions) -> NormalizedTable
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut all_lines: Vec<String> = Vec::new();
    for item in lines {
        all_lines.extend(
            item.as_ref()
                .replace('\r', "")
                .split('\n')
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string),
        );
    }

    let mut feature_names: Option<Vec<String>> = None;
    let mut data_start = 0;
    if let Some(first) = all_lines.first() {
        let tokens = tokenize(first);
        let header = match options.header_mode {
            HeaderMode::Detect => detect_header(&tokens),
            HeaderMode::FirstRow => Some(tokens.iter().skip(1).map(|t| t.to_string()).collect()),
        };
        if let Some(names) = header {
            debug!("Header detected with {} feature name(s): {:?}", names.len(), names);
            feature_names = Some(names);
            data_start = 1;
        }
    }

    let mut records = Vec::new();
    let mut dropped_lines = 0;
    for line in &all_lines[data_start..] {
        match parse_data_tokens(&tokenize(line), options.identifier_policy) {
            Some(record) => {
                if feature_names.is_none() {
                    feature_names = Some(synthesized_feature_names(record.values.len()));
                }
                records.push(record);
            }
            None => dropped_lines += 1,
        }
    }

    finish(records, feature_names, dropped_lines)
}

/// Normalizes a whole pasted text block.
pub fn normalize_text(text: &str, options: &NormalizerOptions) -> NormalizedTable {
    normalize_lines(std::iter::once(text), options)
}

/// Normalizes a pre-parsed table. The header row is authoritative: its cells after the
/// first become the feature names regardless of their content. A header with no feature
/// cells counts as missing and names are synthesized from the first parsed record.
///
/// [`NormalizerOptions::header_mode`] is ignored here.
pub fn normalize_table(table: &Table, options: &NormalizerOptions) -> NormalizedTable {
    let mut feature_names: Option<Vec<String>> = if table.header.len() > 1 {
        Some(table.header.iter().skip(1).map(|h| h.trim().to_string()).collect())
    } else {
        None
    };

    let mut records = Vec::new();
    let mut dropped_lines = 0;
    for row in &table.rows {
        let cells: Vec<&str> = row.iter().map(|c| c.trim()).collect();
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        match parse_data_tokens(&cells, options.identifier_policy) {
            Some(record) => {
                if feature_names.is_none() {
                    feature_names = Some(synthesized_feature_names(record.values.len()));
                }
                records.push(record);
            }
            None => dropped_lines += 1,
        }
    }

    finish(records, feature_names, dropped_lines)
}

fn finish(records: Vec<Record>, feature_names: Option<Vec<String>>, dropped_lines: usize) -> NormalizedTable {
    if dropped_lines > 0 {
        debug!("Dropped {} malformed or non-numeric line(s).", dropped_lines);
    }
    if records.is_empty() {
        warn!("No valid records survived normalization.");
    }
    NormalizedTable { records, feature_names, dropped_lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(policy: IdentifierPolicy) -> NormalizerOptions {
        NormalizerOptions::new(policy, HeaderMode::Detect)
    }

    #[test]
    fn tokenize_collapses_mixed_separator_runs() {
        assert_eq!(tokenize("  A10 ,\t 1.5,,2  "), vec!["A10", "1.5", "2"]);
        assert!(tokenize("   ").is_empty());
        assert_eq!(tokenize(",1,2"), vec!["", "1", "2"]);
    }

    #[test]
    fn header_is_detected_from_non_numeric_feature_tokens() {
        let out = normalize_text("ID A B\n1 10 20\n2 30 40", &detect(IdentifierPolicy::Verbatim));
        assert_eq!(out.feature_names, Some(vec!["A".to_string(), "B".to_string()]));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[1], Record::new("2", vec![30.0, 40.0]));
    }

    #[test]
    fn missing_header_synthesizes_feature_names() {
        let out = normalize_text("1 10 20\n2 30 40", &detect(IdentifierPolicy::Verbatim));
        assert_eq!(out.feature_names, Some(vec!["Feature_1".to_string(), "Feature_2".to_string()]));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].identifier, "1");
    }

    #[test]
    fn non_numeric_data_line_is_dropped() {
        // The first line has a non-numeric feature token, so it is classified as a header.
        let out = normalize_text("1 10 abc\n2 30 40", &detect(IdentifierPolicy::Verbatim));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0], Record::new("2", vec![30.0, 40.0]));

        let out = normalize_text("ID A B\n1 10 abc\n2 30 40", &detect(IdentifierPolicy::Verbatim));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.dropped_lines, 1);
    }

    #[test]
    fn short_lines_are_skipped_and_single_token_first_line_is_not_a_header() {
        let out = normalize_text("lonely\n1 2 3\n7", &detect(IdentifierPolicy::Verbatim));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.dropped_lines, 2);
        assert_eq!(out.feature_names, Some(synthesized_feature_names(2)));
    }

    #[test]
    fn digit_policy_strips_identifier_and_drops_digitless_ones() {
        let out = normalize_text("A10 1 2\nXYZ 3 4\nB-2x 5 6", &detect(IdentifierPolicy::DigitsOnly));
        let ids: Vec<&str> = out.records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["10", "2"]);
        assert_eq!(out.dropped_lines, 1);

        assert_eq!(extract_identifier("A10", IdentifierPolicy::DigitsOnly), Some("10".to_string()));
        assert_eq!(extract_identifier("XYZ", IdentifierPolicy::DigitsOnly), None);
        assert_eq!(extract_identifier("A10", IdentifierPolicy::Verbatim), Some("A10".to_string()));
    }

    #[test]
    fn embedded_newlines_and_carriage_returns_are_split() {
        let parts = vec!["ResID I1 I2\r\n10 1 2\r\n", "\r\n11 3 4"];
        let out = normalize_lines(parts, &detect(IdentifierPolicy::Verbatim));
        assert_eq!(out.feature_names, Some(vec!["I1".to_string(), "I2".to_string()]));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.dropped_lines, 0);
    }

    #[test]
    fn first_row_mode_treats_numeric_first_line_as_header() {
        let opts = NormalizerOptions::new(IdentifierPolicy::Verbatim, HeaderMode::FirstRow);
        let out = normalize_text("0,5,6\n1,10,20", &opts);
        assert_eq!(out.feature_names, Some(vec!["5".to_string(), "6".to_string()]));
        assert_eq!(out.records, vec![Record::new("1", vec![10.0, 20.0])]);
    }

    #[test]
    fn empty_input_has_no_records_and_no_names() {
        let out = normalize_text("\n  \n", &detect(IdentifierPolicy::Verbatim));
        assert!(out.is_empty());
        assert_eq!(out.feature_names, None);
    }

    #[test]
    fn table_header_is_authoritative_and_bad_rows_are_skipped() {
        let table = Table {
            header: vec!["Residue".into(), "T1".into(), "T2".into()],
            rows: vec![
                vec!["A5".into(), "1.0".into(), "2.0".into()],
                vec!["A6".into(), "".into(), "2.0".into()],
                vec!["A7".into(), " 3.5 ".into(), "4".into()],
                vec!["".into(), "".into(), "".into()],
            ],
        };
        let out = normalize_table(&table, &NormalizerOptions::default());
        assert_eq!(out.feature_names, Some(vec!["T1".to_string(), "T2".to_string()]));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[1], Record::new("A7", vec![3.5, 4.0]));
        assert_eq!(out.dropped_lines, 1);
    }

    #[test]
    fn table_without_header_cells_synthesizes_feature_names() {
        let rows = vec![vec!["A5".to_string(), "1.0".to_string(), "2.0".to_string()]];
        let out = normalize_table(&Table { header: vec![], rows: rows.clone() }, &NormalizerOptions::default());
        assert_eq!(out.feature_names, Some(synthesized_feature_names(2)));
        assert_eq!(out.records.len(), 1);

        let out = normalize_table(&Table { header: vec!["Residue".into()], rows }, &NormalizerOptions::default());
        assert_eq!(out.feature_names, Some(synthesized_feature_names(2)));

        let out = normalize_table(&Table::default(), &NormalizerOptions::default());
        assert_eq!(out.feature_names, None);
    }
}
