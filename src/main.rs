//! Options Scalper - Main Entry Point
//!
//! Runs a paper-trading scalping session against the simulated gateway and
//! manages the shared client id pool.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use options_scalper::config::Config;
use options_scalper::engine::{ScalpingEngine, SessionState};
use options_scalper::gateway::{GatewayClient, PaperGateway};
use options_scalper::identity::{ClientIdAllocator, ResolvedId};
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Options Scalper CLI
#[derive(Parser)]
#[command(name = "options-scalper")]
#[command(version, about = "Momentum scalping of futures options")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a paper-trading scalping session (default)
    Run,

    /// Manage the shared broker client id pool
    Ids {
        #[command(subcommand)]
        action: IdsAction,
    },
}

#[derive(Subcommand)]
enum IdsAction {
    /// Allocate the next dynamic client id
    Allocate,

    /// Return a client id to the pool
    Release {
        /// Client id to release
        id: u32,
    },

    /// Delete all allocator state (use with caution)
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Ids { action }) => manage_ids(action),
        Some(Commands::Run) | None => run_session().await,
    }
}

async fn run_session() -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║        Options Scalper v{} - Paper Trading                ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let allocator = Arc::new(id_allocator(&config));
    let client = match config.gateway.client_id {
        Some(id) => ResolvedId { id, dynamic: false },
        None => {
            let allocator = allocator.clone();
            let script = config.gateway.script_name.clone();
            tokio::task::spawn_blocking(move || allocator.resolve(&script))
                .await
                .context("Client id allocation task failed")??
        }
    };
    info!(client_id = client.id, dynamic = client.dynamic, "🔑 Client id resolved");

    let state = Arc::new(SessionState::new(&config, Utc::now().date_naive()));
    let gateway: Arc<dyn GatewayClient> = Arc::new(PaperGateway::new(
        config.paper.clone(),
        config.scalper.strike_intervals.clone(),
        config.scalper.default_strike_interval,
        state.clone(),
    ));

    // Shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let mut engine = ScalpingEngine::new(config.clone(), gateway.clone(), state, shutdown);

    let result = match engine.start(client.id).await {
        Ok(()) => engine.run().await,
        Err(e) => {
            error!(error = %e, "Session start failed");
            gateway.disconnect().await;
            Err(e)
        }
    };

    if client.dynamic {
        let id = client.id;
        let released = tokio::task::spawn_blocking(move || allocator.release(id)).await;
        match released {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(client_id = id, error = %e, "Failed to release client id"),
            Err(e) => warn!(client_id = id, error = %e, "Client id release task failed"),
        }
    }

    info!("👋 Options Scalper shutdown complete");
    result
}

fn manage_ids(action: IdsAction) -> Result<()> {
    let config = Config::load()?;
    let allocator = id_allocator(&config);

    match action {
        IdsAction::Allocate => {
            let id = allocator.allocate()?;
            println!("{}", id);
        }
        IdsAction::Release { id } => {
            allocator.release(id)?;
            println!("Released client id {}", id);
        }
        IdsAction::Reset => {
            allocator.reset()?;
            println!("All client ids reset");
        }
    }

    Ok(())
}

fn id_allocator(config: &Config) -> ClientIdAllocator {
    ClientIdAllocator::new(
        &config.gateway.client_id_dir,
        Duration::from_secs(config.gateway.client_id_lock_timeout_secs),
    )
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "options-scalper.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("options_scalper=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Symbols: {}", config.scalper.symbols.join(", "));
    info!("   Options Expiry: {}", config.scalper.options_expiry);
    info!(
        "   Stop / Target Multipliers: {}x / {}x",
        config.stops.stop_loss_multiplier, config.stops.profit_target_multiplier
    );
    info!(
        "   Trailing Stop: {:.0}%",
        config.stops.trailing_pct * dec!(100)
    );
    info!("   Max Trades/Day: {}", config.risk.max_trades_per_day);
    info!(
        "   Max Daily Loss: {:.0}% of ${}",
        config.risk.max_daily_loss_pct * dec!(100),
        config.risk.account_balance
    );
    info!("   Cooldown: {}s", config.risk.cooldown_seconds);
    info!("   Reversals Allowed: {}", config.scalper.allow_reversals);
    info!(
        "   Order Ack Timeout: {}s",
        config.execution.order_ack_timeout_secs
    );
}
