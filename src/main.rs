use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stoploss_notifier::config::{self, AppConfig};
use stoploss_notifier::notifier::Notifier;
use stoploss_notifier::notifier::terminal::TerminalNotifier;
use stoploss_notifier::source::PriceSource;
use stoploss_notifier::source::binance::BinanceSource;
use stoploss_notifier::source::krx::KrxSource;
use stoploss_notifier::source::upbit::UpbitSource;
use stoploss_notifier::stoploss::StopLossPolicy;
use stoploss_notifier::storage::Storage;
use stoploss_notifier::storage::sqlite::SqliteStorage;
use stoploss_notifier::watch::{PositionReport, Watcher, log_reports, watch_loop};

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(
    name = "stoploss-notifier",
    about = "Trailing-high stop-loss watcher for a price watchlist"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Run a single cycle, print the report as JSON lines and exit
    #[arg(long)]
    once: bool,

    /// Keep highs and alert state in memory only
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    // ── Storage ───────────────────────────────────────────────────────────────
    let storage: Arc<dyn Storage> = if cli.ephemeral {
        Arc::new(
            SqliteStorage::open_in_memory()
                .await
                .change_context(AppError::Storage)?,
        )
    } else {
        let db_path = format!("{}/stoploss-notifier.db", config.general.data_dir);
        Arc::new(
            SqliteStorage::open(Path::new(&db_path))
                .await
                .change_context(AppError::Storage)?,
        )
    };

    // ── Price sources ─────────────────────────────────────────────────────────
    let sources = build_sources(&config);
    let positions = config.watchlist();

    if positions.is_empty() {
        tracing::warn!("no positions with an enabled price source; nothing to do");
        return Ok(());
    }

    // ── Watcher ───────────────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = Arc::new(TerminalNotifier);
    let mut watcher = Watcher::new(
        positions,
        sources,
        storage,
        notifier,
        StopLossPolicy::from_config(&config),
    )
    .await
    .change_context(AppError::Storage)?;

    if cli.once {
        let reports = watcher.run_cycle().await;
        log_reports(&reports);
        return print_reports(&reports);
    }

    let cancel = CancellationToken::new();
    let interval = Duration::from_secs(config.general.poll_interval_secs);
    let handle = tokio::spawn(watch_loop(watcher, interval, cancel.clone()));

    info!(interval_secs = interval.as_secs(), "watching positions");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .change_context(AppError::Runtime)?;

    info!("ctrl+c received, shutting down");
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn build_sources(config: &AppConfig) -> Vec<Arc<dyn PriceSource>> {
    config
        .sources
        .iter()
        .filter(|s| s.enabled)
        .filter_map(|s| match s.name.as_str() {
            "upbit" => Some(Arc::new(UpbitSource::new()) as Arc<dyn PriceSource>),
            "binance" => Some(Arc::new(BinanceSource::new()) as Arc<dyn PriceSource>),
            "krx" => Some(Arc::new(KrxSource::new()) as Arc<dyn PriceSource>),
            other => {
                tracing::warn!(name = other, "unknown price source in config, skipping");
                None
            }
        })
        .collect()
}

fn print_reports(reports: &[PositionReport]) -> Result<(), Report<AppError>> {
    let mut stdout = std::io::stdout().lock();
    for report in reports {
        let line = serde_json::to_string(report).change_context(AppError::Runtime)?;
        writeln!(stdout, "{line}").change_context(AppError::Runtime)?;
    }
    Ok(())
}
