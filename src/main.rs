use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use risk_view_maintenance::config::StoreConfig;
use risk_view_maintenance::cost::CostModel;
use risk_view_maintenance::db::{self, PgStore};
use risk_view_maintenance::harness::{
    BenchmarkHarness, DefinitionChangeScenario, HarnessConfig, DEFAULT_ITERATIONS, DEFAULT_TOP_K,
};
use risk_view_maintenance::report::{self, BenchmarkReport};
use risk_view_maintenance::store::{MemoryStore, RecordStore};
use risk_view_maintenance::StrategyKind;

#[derive(Parser)]
#[command(name = "risk-bench")]
#[command(about = "Benchmark risk score maintenance strategies under definition drift", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Replace the record table with a small fixed record set
    Seed,
    /// Replace the record table with a survey CSV export
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Apply a definition change and time subsequent top-k reads
    Bench {
        /// Strategy slug or id; repeat for several, omit for all four
        #[arg(long = "strategy")]
        strategies: Vec<StrategyKind>,
        /// full-reweight, single-dimension or window-width; defaults per strategy
        #[arg(long)]
        scenario: Option<String>,
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: usize,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        k: usize,
        /// Reads expected between two definition changes
        #[arg(long, default_value_t = 100)]
        reads_per_window: u64,
        /// Per-operation deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Run strategies concurrently, one session each
        #[arg(long)]
        parallel: bool,
        /// Benchmark an in-memory copy of this CSV instead of Postgres
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Also write a markdown report here
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

async fn pg_store() -> anyhow::Result<PgStore> {
    let config = StoreConfig::from_env()?;
    let pool = db::connect(&config).await?;
    Ok(PgStore::new(pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("risk_view_maintenance=info,risk_bench=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let config = StoreConfig::from_env()?;
            let pool = db::connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let config = StoreConfig::from_env()?;
            let pool = db::connect(&config).await?;
            let inserted = db::seed(&pool).await?;
            println!("Seeded {inserted} records.");
        }
        Commands::Import { csv } => {
            let config = StoreConfig::from_env()?;
            let pool = db::connect(&config).await?;
            let (inserted, skipped) = db::import_csv(&pool, &csv).await?;
            println!(
                "Inserted {inserted} records from {} ({skipped} incomplete rows skipped).",
                csv.display()
            );
        }
        Commands::Bench {
            strategies,
            scenario,
            iterations,
            k,
            reads_per_window,
            deadline_ms,
            parallel,
            csv,
            json,
            out,
        } => {
            let store: Arc<dyn RecordStore> = match csv {
                Some(path) => Arc::new(MemoryStore::from_csv(&path)?),
                None => Arc::new(pg_store().await?),
            };

            let kinds = if strategies.is_empty() {
                StrategyKind::ALL.to_vec()
            } else {
                strategies
            };

            let fixed_scenario = match scenario.as_deref() {
                Some(name) => Some(
                    DefinitionChangeScenario::by_name(name)
                        .with_context(|| format!("unknown scenario '{name}'"))?,
                ),
                None => None,
            };

            let plan = kinds
                .into_iter()
                .map(|kind| {
                    let scenario = fixed_scenario
                        .clone()
                        .unwrap_or_else(|| DefinitionChangeScenario::default_for(kind));
                    (kind, scenario)
                })
                .collect();

            let harness = BenchmarkHarness::new(HarnessConfig {
                iterations,
                k,
                deadline: deadline_ms.map(Duration::from_millis),
            });
            let samples = harness.run_all(store, plan, parallel).await;
            let recommendation = CostModel::new(reads_per_window).recommend(&samples);
            let bench_report = BenchmarkReport::new(&samples, recommendation);

            if json {
                println!("{}", bench_report.to_json()?);
            } else {
                print!("{}", report::build_report(&bench_report));
            }

            if let Some(path) = out {
                std::fs::write(&path, report::build_report(&bench_report))?;
                eprintln!("Report written to {}.", path.display());
            }
        }
    }

    Ok(())
}
