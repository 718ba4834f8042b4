use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use residue_pca::{
    analyze_with_config, normalize_text, AnalysisResponse, EngineConfig, HeaderMode, IdentifierPolicy,
    NormalizerOptions, Report, ReportOptions, DEFAULT_MAX_COMPONENTS, DEFAULT_OUTLIER_THRESHOLD,
};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IdsArg {
    /// Keep the first column as written
    Verbatim,
    /// Keep only the digits of the first column ("A10" -> "10")
    Digits,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HeaderArg {
    /// Header if a feature cell of the first line is not a number
    Detect,
    /// The first line is always the header
    FirstRow,
}

/// PCA of a residue x measurement table with Mahalanobis outlier scoring.
#[derive(Debug, Parser)]
#[command(name = "residue-pca", version, about)]
struct Cli {
    /// Input table; reads stdin when omitted or "-"
    input: Option<PathBuf>,

    /// Identifier policy for the first column
    #[arg(long, value_enum)]
    ids: IdsArg,

    /// Header handling for the first non-empty line
    #[arg(long, value_enum, default_value = "detect")]
    header: HeaderArg,

    /// Maximum number of principal components to keep
    #[arg(long, default_value_t = DEFAULT_MAX_COMPONENTS)]
    max_components: usize,

    /// Mahalanobis distance above which records are listed as outliers (with --report)
    #[arg(long, default_value_t = DEFAULT_OUTLIER_THRESHOLD)]
    threshold: f64,

    /// Also emit outlier table and ranked loadings
    #[arg(long)]
    report: bool,

    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    let mut text = String::new();
    match path {
        Some(p) if p.as_os_str() != "-" => {
            text = std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))?;
        }
        _ => {
            std::io::stdin().read_to_string(&mut text).context("failed to read stdin")?;
        }
    }
    Ok(text)
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    Ok(if pretty { serde_json::to_string_pretty(value)? } else { serde_json::to_string(value)? })
}

fn run(cli: &Cli) -> Result<bool> {
    let options = NormalizerOptions::new(
        match cli.ids {
            IdsArg::Verbatim => IdentifierPolicy::Verbatim,
            IdsArg::Digits => IdentifierPolicy::DigitsOnly,
        },
        match cli.header {
            HeaderArg::Detect => HeaderMode::Detect,
            HeaderArg::FirstRow => HeaderMode::FirstRow,
        },
    );
    let config = EngineConfig::default().with_max_components(cli.max_components);

    let text = read_input(cli.input.as_ref())?;
    let table = normalize_text(&text, &options);
    let outcome = analyze_with_config(&table.records, table.feature_names.as_deref(), &config);
    let ok = outcome.is_ok();

    let json = match outcome {
        Ok(ref result) if cli.report => {
            let report = Report::new(result, &ReportOptions { outlier_threshold: cli.threshold });
            to_json(&serde_json::json!({ "analysis": result, "report": report }), cli.pretty)?
        }
        other => to_json(&AnalysisResponse::from(other), cli.pretty)?,
    };
    println!("{}", json);
    Ok(ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
