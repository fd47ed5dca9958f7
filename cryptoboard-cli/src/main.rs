//! Cryptoboard CLI — crypto top-N extract, enrich, and publish.
//!
//! Commands:
//! - `run` (default): full pipeline, CoinGecko → enrich → BigQuery replace
//! - `extract`: fetch one snapshot and write the raw CSV checkpoint
//! - `transform`: enrich a raw CSV checkpoint into an enriched checkpoint
//! - `load`: publish an enriched CSV checkpoint
//! - `watch`: repeat the full pipeline on a fixed interval

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cryptoboard_core::data::checkpoint::{
    read_enriched, read_meta, read_raw_frame, write_enriched, write_raw_snapshot,
};
use cryptoboard_core::data::provider::content_hash;
use cryptoboard_core::data::CoinGeckoProvider;
use cryptoboard_core::domain::EnrichedAssetRecord;
use cryptoboard_core::enrich::enrich_frame;
use cryptoboard_runner::pipeline::log_report;
use cryptoboard_runner::{
    extract_snapshot, publish, BigQuerySink, Credential, InMemorySink, Pipeline, PipelineConfig,
    RetryPolicy, RunResult,
};

const DEFAULT_CONFIG: &str = "cryptoboard.toml";

#[derive(Parser)]
#[command(
    name = "cryptoboard",
    version,
    about = "Cryptoboard: top-20 crypto market snapshot to BigQuery"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./cryptoboard.toml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Service-account key file (overrides warehouse.credentials_path).
    #[arg(long, global = true, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Pre-issued OAuth access token (takes precedence over key files).
    #[arg(long, global = true, env = "CRYPTOBOARD_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Debug-level logging unless RUST_LOG says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline once.
    Run {
        /// Publish to an in-memory table and print it instead of BigQuery.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Print the run summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Fetch one snapshot and write it as raw CSV.
    Extract {
        #[arg(long, default_value = "data/raw_crypto.csv")]
        output: PathBuf,
    },
    /// Enrich a raw CSV checkpoint.
    Transform {
        #[arg(long, default_value = "data/raw_crypto.csv")]
        input: PathBuf,

        /// `.parquet` writes Parquet, anything else CSV.
        #[arg(long, default_value = "data/clean_crypto.csv")]
        output: PathBuf,
    },
    /// Publish an enriched CSV checkpoint, replacing the destination table.
    Load {
        #[arg(long, default_value = "data/clean_crypto.csv")]
        input: PathBuf,
    },
    /// Repeat the full pipeline every `interval_secs`.
    Watch {
        #[arg(long)]
        interval_secs: u64,

        /// Stop after this many runs. Runs forever when omitted.
        #[arg(long)]
        max_runs: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let credential = resolve_credential(&cli, &config);

    match cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        json: false,
    }) {
        Commands::Run { dry_run, json } => run_once(&config, credential, dry_run, json),
        Commands::Extract { output } => run_extract(&config, &output),
        Commands::Transform { input, output } => run_transform(&input, &output),
        Commands::Load { input } => run_load(&config, credential, &input),
        Commands::Watch {
            interval_secs,
            max_runs,
        } => run_watch(&config, credential, interval_secs, max_runs),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            PipelineConfig::from_file(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("loading config {DEFAULT_CONFIG}"))
        }
        None => Ok(PipelineConfig::default()),
    }
}

/// Access token beats an explicit key file, which beats the configured one.
fn resolve_credential(cli: &Cli, config: &PipelineConfig) -> Credential {
    if let Some(token) = cli.access_token.as_ref().filter(|t| !t.is_empty()) {
        return Credential::AccessToken(token.clone());
    }
    Credential::ServiceAccountFile(
        cli.credentials
            .clone()
            .unwrap_or_else(|| config.warehouse.credentials_path.clone()),
    )
}

fn run_once(
    config: &PipelineConfig,
    credential: Credential,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let source = CoinGeckoProvider::new(config.source.clone())?;

    if dry_run {
        let sink = InMemorySink::new();
        let pipeline = Pipeline::from_config(config, &source, &sink, credential)?;
        let result = pipeline.run().context("pipeline run failed")?;
        print_result(&result, json)?;
        if !json {
            print_table(&sink.table(pipeline.table()).unwrap_or_default());
        }
    } else {
        let sink = BigQuerySink::new(&config.warehouse)?;
        let pipeline = Pipeline::from_config(config, &source, &sink, credential)?;
        let result = pipeline.run().context("pipeline run failed")?;
        print_result(&result, json)?;
    }
    Ok(())
}

/// Extract only. `--output` is the one file written; the configured raw
/// checkpoint belongs to full runs.
fn run_extract(config: &PipelineConfig, output: &Path) -> Result<()> {
    let source = CoinGeckoProvider::new(config.source.clone())?;
    let retry = RetryPolicy::from_config(&config.retry);

    let snapshot = extract_snapshot(&source, &retry).context("extract failed")?;
    let meta = write_raw_snapshot(output, &snapshot)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Extracted {} rows to {}", meta.rows, output.display());
    Ok(())
}

fn run_transform(input: &Path, output: &Path) -> Result<()> {
    let df = read_raw_frame(input).with_context(|| format!("reading {}", input.display()))?;
    let (records, report) = enrich_frame(&df).context("transform failed")?;
    log_report(&report);

    let meta = write_enriched(output, &records)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Enriched {} of {} rows to {} ({} dropped)",
        meta.rows,
        report.input_rows,
        output.display(),
        report.dropped()
    );
    Ok(())
}

fn run_load(config: &PipelineConfig, credential: Credential, input: &Path) -> Result<()> {
    let records = read_enriched(input).with_context(|| format!("reading {}", input.display()))?;
    if let Some(meta) = read_meta(input) {
        if meta.data_hash != content_hash(&records) {
            bail!(
                "{} does not match the data hash in its sidecar; refusing to publish",
                input.display()
            );
        }
    }

    let table = config.warehouse.table_ref()?;
    let sink = BigQuerySink::new(&config.warehouse)?;
    let retry = RetryPolicy::from_config(&config.retry);

    let written =
        publish(&sink, &table, &credential, &records, &retry).context("load failed")?;
    println!("Replaced {table} with {written} rows");
    Ok(())
}

fn run_watch(
    config: &PipelineConfig,
    credential: Credential,
    interval_secs: u64,
    max_runs: Option<u64>,
) -> Result<()> {
    let source = CoinGeckoProvider::new(config.source.clone())?;
    let sink = BigQuerySink::new(&config.warehouse)?;
    let pipeline = Pipeline::from_config(config, &source, &sink, credential)?;
    let interval = Duration::from_secs(interval_secs);

    let mut runs = 0u64;
    loop {
        runs += 1;
        match pipeline.run() {
            Ok(result) => info!(run = runs, rows_written = result.rows_written, "scheduled run succeeded"),
            Err(e) => error!(run = runs, stage = %e.stage(), error = %e, "scheduled run failed"),
        }
        if max_runs.is_some_and(|max| runs >= max) {
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}

fn print_result(result: &RunResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("Destination:    {}", result.destination);
    println!("Fetched at:     {}", result.fetched_at.to_rfc3339());
    println!("Rows extracted: {}", result.rows_extracted);
    println!("Rows written:   {}", result.rows_written);
    println!("Rows dropped:   {}", result.rows_dropped);
    println!("Snapshot hash:  {}", &result.snapshot_hash[..16.min(result.snapshot_hash.len())]);
    Ok(())
}

fn print_table(rows: &[EnrichedAssetRecord]) {
    fn label<T: std::fmt::Display>(v: &Option<T>) -> String {
        v.as_ref().map(|x| x.to_string()).unwrap_or_else(|| "-".into())
    }

    println!();
    println!(
        "{:<16} {:<8} {:>14} {:>18} {:>9} {:<10} {:<10} {:<13}",
        "Id", "Symbol", "Price", "Market Cap", "ATH Gap%", "Cap", "24h", "ATH Status"
    );
    println!("{}", "-".repeat(105));
    for r in rows {
        println!(
            "{:<16} {:<8} {:>14.4} {:>18.0} {:>9} {:<10} {:<10} {:<13}",
            r.id,
            r.symbol,
            r.current_price,
            r.market_cap,
            r.ath_gap_pct
                .map(|g| format!("{g:.2}"))
                .unwrap_or_else(|| "-".into()),
            label(&r.cap_category),
            r.change_direction,
            label(&r.ath_status),
        );
    }
}
