use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use driftwatch::detector::{self, DetectorConfig};
use driftwatch::explainer::{self, ExplainerConfig};
use driftwatch::loader::cache::TileCache;
use driftwatch::loader::reader::{BadRowPolicy, ColumnMap};
use driftwatch::loader::{self, LoadStrategy, LoaderConfig};
use driftwatch::report;

/// Scan folders of metric CSV exports for abrupt drops and spikes, and
/// write an HTML report with optional LLM explanations.
#[derive(Parser)]
#[command(name = "driftwatch", version)]
#[command(about = "Detect metric drops in CSV exports and report them")]
struct Cli {
    /// Path to the metrics folder.
    #[arg(long, default_value = "metrics")]
    metrics: PathBuf,

    /// Limit total rows to read. The current file is finished rather
    /// than cut mid-record, so the total may overshoot.
    #[arg(long)]
    sample: Option<usize>,

    /// Limit number of files to process.
    #[arg(long)]
    max_files: Option<usize>,

    /// Skip files that fail to parse instead of aborting.
    #[arg(long)]
    skip_bad_files: bool,

    /// Drop malformed rows instead of failing the whole file.
    #[arg(long)]
    lenient_rows: bool,

    /// Do not call the LLM for explanations (safe when no API key).
    #[arg(long)]
    no_llm: bool,

    /// Maximum anomalies to send for LLM explanation. Negative = no limit.
    #[arg(long, default_value_t = 100)]
    max_anomalies: i64,

    /// Force the load strategy instead of the size heuristic.
    #[arg(long, value_enum, default_value_t = StrategyArg::Auto)]
    strategy: StrategyArg,

    /// Reuse parsed per-file tiles between runs.
    #[arg(long)]
    cache: bool,

    /// Tile cache location (default: ~/.driftwatch/cache/tiles.sqlite).
    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Absolute change-rate threshold for flagging a point.
    #[arg(long, default_value_t = detector::DEFAULT_CHANGE_THRESHOLD)]
    threshold: f64,

    /// Column holding the timestamp.
    #[arg(long, default_value = "timestamp")]
    timestamp_column: String,

    /// Column holding the series identifier.
    #[arg(long, default_value = "series")]
    series_column: String,

    /// Column holding the metric value.
    #[arg(long, default_value = "value")]
    value_column: String,

    /// Context line woven into every explanation prompt.
    #[arg(long, default_value = "metric export validation")]
    context: String,

    /// Chat-completions model for explanations.
    #[arg(long, default_value = explainer::DEFAULT_MODEL)]
    model: String,

    /// Chat-completions endpoint.
    #[arg(long, default_value = explainer::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Per-call timeout for explanation requests, in seconds.
    #[arg(long, default_value_t = 30)]
    llm_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Auto,
    Eager,
    Streaming,
}

impl From<StrategyArg> for LoadStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Auto => LoadStrategy::Auto,
            StrategyArg::Eager => LoadStrategy::Eager,
            StrategyArg::Streaming => LoadStrategy::Streaming,
        }
    }
}

fn explanation_cap(max_anomalies: i64) -> Option<usize> {
    if max_anomalies < 0 {
        None
    } else {
        Some(max_anomalies as usize)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env before anything reads the environment
    dotenvy::dotenv().ok();
    driftwatch::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let cache = if cli.cache {
        let path = cli
            .cache_path
            .clone()
            .unwrap_or_else(TileCache::default_path);
        match TileCache::open(&path) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(
                    "tile cache unavailable at {}: {e}; parsing without it",
                    path.display()
                );
                None
            }
        }
    } else {
        None
    };

    info!("loading metrics from {}", cli.metrics.display());
    let config = LoaderConfig {
        folder: cli.metrics.clone(),
        sample: cli.sample,
        max_files: cli.max_files,
        skip_bad_files: cli.skip_bad_files,
        bad_row_policy: if cli.lenient_rows {
            BadRowPolicy::Skip
        } else {
            BadRowPolicy::Fail
        },
        strategy: cli.strategy.into(),
        columns: ColumnMap {
            timestamp: cli.timestamp_column.clone(),
            series: cli.series_column.clone(),
            value: cli.value_column.clone(),
        },
        cache,
    };

    let dataset = loader::load_metrics(config).map_err(|e| format!("loading failed: {e}"))?;
    let (records, summary) = dataset
        .materialize()
        .map_err(|e| format!("loading failed: {e}"))?;

    info!("running checks over {} rows", records.len());
    let detector_config = DetectorConfig {
        threshold: cli.threshold,
    };
    let anomalies = detector::detect_drops(&records, &detector_config);
    if anomalies.is_empty() {
        info!("no anomalies detected");
    } else {
        info!(
            "detected {} anomalies; attaching explanations",
            anomalies.len()
        );
    }

    let explainer_config = ExplainerConfig {
        disabled: cli.no_llm,
        max_anomalies: explanation_cap(cli.max_anomalies),
        model: cli.model.clone(),
        endpoint: cli.endpoint.clone(),
        timeout: Duration::from_secs(cli.llm_timeout_secs),
        context: cli.context.clone(),
    };
    let (explanations, stats) = explainer::explain_anomalies(&anomalies, &explainer_config).await;
    if stats.placeholders > 0 {
        info!(
            "{} explanation(s) fell back to placeholders",
            stats.placeholders
        );
    }

    let html = report::render_report(&summary, &anomalies, &explanations, &stats);
    let out_path = PathBuf::from(report::REPORT_RELATIVE_PATH);
    report::write_report(&out_path, &html).map_err(|e| format!("writing report failed: {e}"))?;
    info!("report saved to {}", out_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_parse() {
        let cli = Cli::try_parse_from(["driftwatch"]).unwrap();
        assert_eq!(cli.metrics, PathBuf::from("metrics"));
        assert_eq!(cli.max_anomalies, 100);
        assert!(!cli.no_llm);
        assert!(!cli.skip_bad_files);
        assert_eq!(cli.threshold, detector::DEFAULT_CHANGE_THRESHOLD);
    }

    #[test]
    fn cli_accepts_pipeline_flags() {
        let cli = Cli::try_parse_from([
            "driftwatch",
            "--metrics",
            "/data/metrics",
            "--sample",
            "1000",
            "--max-files",
            "5",
            "--skip-bad-files",
            "--lenient-rows",
            "--no-llm",
            "--strategy",
            "streaming",
            "--cache",
        ])
        .unwrap();
        assert_eq!(cli.sample, Some(1000));
        assert_eq!(cli.max_files, Some(5));
        assert!(cli.skip_bad_files);
        assert!(cli.lenient_rows);
        assert!(cli.no_llm);
        assert!(matches!(cli.strategy, StrategyArg::Streaming));
        assert!(cli.cache);
    }

    #[test]
    fn negative_max_anomalies_means_no_limit() {
        assert_eq!(explanation_cap(-1), None);
        assert_eq!(explanation_cap(0), Some(0));
        assert_eq!(explanation_cap(7), Some(7));
    }
}
