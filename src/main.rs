//! Packwatch CLI
//!
//! Line monitoring and seal-leakage prediction for a packaging machine.

use clap::{Parser, Subcommand};
use packwatch::{
    config::{Config, DbConfig},
    core::machine_status,
    db::{self, DataLoader, TimeRange},
    model::{batch_infer, summarize_predictions, PredictionCache, Predictor},
    poller::{self, PollStats},
    server::{run, ServerState},
    VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "packwatch")]
#[command(version = VERSION)]
#[command(about = "Line monitoring and seal-leakage prediction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dashboard API and background poller
    Serve {
        /// Port to bind (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show the current machine status
    Status,

    /// Run the leakage classifier over a historical window
    Predict {
        /// Time range to classify (1h, 6h, 24h, 7d, 30d)
        #[arg(long, default_value = "24h")]
        range: TimeRange,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => cmd_serve(port).await,
        Commands::Status => cmd_status().await,
        Commands::Predict { range } => cmd_predict(range).await,
        Commands::Config => cmd_config(),
    }
}

async fn cmd_serve(port: Option<u16>) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "packwatch=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load()?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Err(e) = config.ensure_directories() {
        tracing::warn!("could not create data directories: {e}");
    }

    let db_config = DbConfig::from_env()?;
    tracing::info!("packwatch v{VERSION}");
    tracing::info!("datalog: {} table {}", db_config.redacted_url(), db_config.table);

    let pool = db::create_pool(&db_config.url())?;
    let loader = Arc::new(DataLoader::new(pool, db_config.table, &config));
    let predictor = Predictor::from_config(config.model_path.as_deref(), &config.thresholds);

    let poll_stats = Arc::new(PollStats::new());
    let poll_handle = poller::spawn(loader.clone(), poll_stats.clone(), config.poll_interval);

    let state = Arc::new(ServerState::new(loader, predictor, poll_stats, &config));
    let (addr, shutdown_tx) = run(state, config.port).await?;
    tracing::info!("serving dashboard data on http://{addr} (poll every {:?})", config.poll_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(());
    poll_handle.abort();

    Ok(())
}

async fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load()?;
    let db_config = DbConfig::from_env()?;
    let pool = db::create_pool(&db_config.url())?;

    println!("Packwatch Status");
    println!("================");
    println!();

    let rows = match db::latest_readings(&pool, &db_config.table, config.latest_rows).await {
        Ok(rows) => {
            println!("Database: connected ({})", db_config.redacted_url());
            rows
        }
        Err(e) => {
            eprintln!("Database: connection failed ({e})");
            std::process::exit(1);
        }
    };

    let report = machine_status(&rows);
    println!("Machine: {} {}", report.state.symbol(), report.state);
    if let Some(at) = report.latest_at {
        println!("Latest sample: {at}");
    }
    println!();

    if let Some(newest) = rows.first() {
        println!("Availability: {:.1}%", newest.availability);
        println!("Performance:  {:.1}%", newest.performance);
        println!("Quality:      {:.1}%", newest.quality);
        println!("OEE:          {:.1}%", newest.oee);
        println!("Speed:        {:.1} rpm", newest.speed_rpm);
        println!(
            "Output:       {} packs ({} rejects)",
            newest.counter_output, newest.counter_reject
        );
    } else {
        println!("No recent data in table {}", db_config.table);
    }

    Ok(())
}

async fn cmd_predict(range: TimeRange) -> anyhow::Result<()> {
    let config = Config::load()?;
    let db_config = DbConfig::from_env()?;
    let pool = db::create_pool(&db_config.url())?;

    let rows = db::historical_readings(&pool, &db_config.table, range).await?;
    if rows.is_empty() {
        println!("No data in the selected window ({range})");
        return Ok(());
    }

    let predictor = Predictor::from_config(config.model_path.as_deref(), &config.thresholds);
    let cache = PredictionCache::new(
        Duration::from_secs(config.prediction_cache_ttl_secs),
        config.prediction_cache_capacity,
    );

    let batch = batch_infer(&predictor, &cache, &rows)?;
    let counts = summarize_predictions(&batch);

    println!("Leakage Predictions - {range}");
    println!("==============================");
    println!();
    println!("Predictor: {}", predictor.kind());
    println!("Samples:   {}", counts.total);
    println!(
        "Normal:    {} ({:.1}% of total)",
        counts.normal, counts.normal_pct
    );
    println!(
        "Warning:   {} ({:.1}% of total)",
        counts.warning, counts.warning_pct
    );
    println!(
        "Leak:      {} ({:.1}% of total)",
        counts.leak, counts.leak_pct
    );
    println!();

    println!("Most recent:");
    for prediction in batch.iter().rev().take(10) {
        println!(
            "  [{}] {:<7} {:.1}%",
            prediction.at,
            prediction.class.label(),
            prediction.probability * 100.0
        );
    }

    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    match DbConfig::from_env() {
        Ok(db) => println!("Database:    {} table {}", db.redacted_url(), db.table),
        Err(e) => println!("Database:    not configured ({e})"),
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );

    Ok(())
}
