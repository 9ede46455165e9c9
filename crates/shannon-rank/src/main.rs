//! CLI entry point for ranking the columns of a CSV file.

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use shannon_rank::{
    ClosureProgressReporter, DataSource, DataTable, DependencyTestKind, ProgressUpdate, Range,
    RankingConfig, RankingEngine, RankingStage, RowFilter, VariableId,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// CLI-compatible dependency test enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliDependencyTest {
    /// Only require the MI to exceed the independence threshold
    #[value(name = "none")]
    Threshold,
    /// Compare against the Gaussian fit of shuffled surrogates
    SurrogateGauss,
    /// Rank against shuffled surrogates
    SurrogateGeneral,
    /// Gamma approximation of the MI null distribution
    Gamma,
}

impl From<CliDependencyTest> for DependencyTestKind {
    fn from(cli: CliDependencyTest) -> Self {
        match cli {
            CliDependencyTest::Threshold => DependencyTestKind::NoTest,
            CliDependencyTest::SurrogateGauss => DependencyTestKind::SurrogateGauss,
            CliDependencyTest::SurrogateGeneral => DependencyTestKind::SurrogateGeneral,
            CliDependencyTest::Gamma => DependencyTestKind::GammaTest,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Rank dataset columns by dependency on a reference column",
    long_about = "Scores every column of a CSV file by its normalized mutual information with a\n\
                  reference column and prints the columns from most to least dependent.\n\n\
                  EXAMPLES:\n  \
                  # Rank against the 'income' column\n  \
                  shannon-rank -i data.csv -r income\n\n  \
                  # Only rows with 20 <= age <= 40, gamma test at p = 0.01\n  \
                  shannon-rank -i data.csv -r income --filter age=20:40 \
                  --p-value 0.01 --test gamma\n\n  \
                  # Machine-readable output\n  \
                  shannon-rank -i data.csv -r income --json | jq '.[0]'"
)]
struct Args {
    /// Path to the CSV file to rank
    #[arg(short, long)]
    input: PathBuf,

    /// Name of the reference column
    #[arg(short, long)]
    reference: String,

    /// Significance level of the dependency test, in (0, 1]
    #[arg(short, long, default_value = "0.05")]
    p_value: f32,

    /// Slices with at least this fraction of missing rows score 0
    #[arg(short, long, default_value = "0.8")]
    missing_threshold: f32,

    /// Dependency test deciding whether a score is significant
    #[arg(short, long, value_enum, default_value = "gamma")]
    test: CliDependencyTest,

    /// Number of shuffled surrogates for the Gaussian surrogate test
    #[arg(long, default_value = "100")]
    surrogates: usize,

    /// Mutual information below which a pair counts as independent
    /// (with `--test none` or `--p-value 1`)
    #[arg(long, default_value = "0.001")]
    threshold: f32,

    /// Size of the scoring worker pool (default: cores minus one)
    #[arg(long)]
    threads: Option<usize>,

    /// Seed for surrogate generation, for reproducible rankings
    #[arg(long)]
    seed: Option<u64>,

    /// Restrict the rows to `column=min:max` (repeatable)
    #[arg(short, long)]
    filter: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,

    /// Output the ranking as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Write the filtered rows of the ranked columns to this CSV file, and
    /// their data dictionary next to it
    #[arg(long)]
    export: Option<PathBuf>,
}

/// Initialize the tracing subscriber for logging.
///
/// With `--json` logging is disabled so stdout only carries the ranking.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    if !args.input.exists() {
        return Err(anyhow!("Input file not found: {}", args.input.display()));
    }

    info!("Loading dataset from: {}", args.input.display());
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10000))
        .try_into_reader_with_file_path(Some(args.input.clone()))?
        .finish()?;
    info!("Dataset loaded successfully: {:?}", df.shape());

    let table = DataTable::from_dataframe(&df)?;
    let reference = table
        .variable_by_name(&args.reference)
        .map(|v| v.id)
        .ok_or_else(|| anyhow!("Reference column '{}' not found", args.reference))?;
    let filter = parse_filter(&table, &args.filter)?;

    let mut config = RankingConfig::builder()
        .dependency_test(args.test.into())
        .surrogate_count(args.surrogates)
        .independence_threshold(args.threshold);
    if let Some(threads) = args.threads {
        config = config.worker_threads(threads);
    }
    if let Some(seed) = args.seed {
        config = config.surrogate_seed(seed);
    }
    let config = config.build()?;
    debug!("Ranking configuration: {:?}", config);

    let mut engine = RankingEngine::new(table, config)?;
    if !args.quiet && !args.json {
        engine = engine.with_reporter(ClosureProgressReporter::new(|update: ProgressUpdate| {
            if update.stage == RankingStage::Scoring {
                debug!("[{:.0}%] {}", update.progress * 100.0, update.message);
            } else {
                info!("[{}] {}", update.stage.display_name(), update.message);
            }
        }));
    }

    engine.set_sort_key(reference, filter, args.p_value, args.missing_threshold)?;
    drop(engine.wait());

    let columns: Vec<VariableId> = engine.columns();
    if let Some(path) = &args.export {
        export_csv(&engine, &columns, path)?;
    }
    if args.json {
        println!("{}", engine.profile_json(&columns)?);
        return Ok(());
    }
    let profile = engine.profile(&columns);

    println!("\n{}", "=".repeat(60));
    println!("COLUMNS RANKED BY DEPENDENCY ON '{}'", args.reference);
    println!("{}\n", "=".repeat(60));
    println!("{:<6} {:<30} {:>10}", "Rank", "Column", "Score");
    println!("{}", "-".repeat(48));
    for (rank, row) in profile.iter().enumerate() {
        let score = row.score.map_or_else(|| "-".to_string(), |s| format!("{:.4}", s));
        println!("{:<6} {:<30} {:>10}", rank + 1, truncate_str(&row.alias, 29), score);
    }
    println!();

    Ok(())
}

/// Write the exported rows to `path` and the dictionary to
/// `<stem>.dictionary.csv` beside it.
fn export_csv(
    engine: &RankingEngine<DataTable>,
    columns: &[VariableId],
    path: &Path,
) -> Result<()> {
    let (mut data, mut dictionary) = engine.export_table(columns)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    let dictionary_path = path.with_file_name(format!("{}.dictionary.csv", stem));

    CsvWriter::new(File::create(path)?)
        .include_header(true)
        .finish(&mut data)?;
    CsvWriter::new(File::create(&dictionary_path)?)
        .include_header(true)
        .finish(&mut dictionary)?;
    info!(
        "Exported {} rows to {} (dictionary: {})",
        data.height(),
        path.display(),
        dictionary_path.display()
    );
    Ok(())
}

/// Parse `column=min:max` expressions into a row filter.
fn parse_filter(table: &DataTable, expressions: &[String]) -> Result<RowFilter> {
    let mut filter = RowFilter::new();
    for expr in expressions {
        let (name, bounds) = expr
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid filter '{}', expected column=min:max", expr))?;
        let (min, max) = bounds
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid filter bounds '{}', expected min:max", bounds))?;
        let var = table
            .variable_by_name(name.trim())
            .ok_or_else(|| anyhow!("Filter column '{}' not found", name))?;
        if var.categorical() {
            warn!("Filter on categorical column '{}' uses category codes", var.name);
        }
        let range = Range::interval(min.trim().parse()?, max.trim().parse()?);
        filter.set(var.id, range);
    }
    Ok(filter)
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
