//! Binary entry point: parses CLI flags, wires up logging, and constructs
//! the core services behind a [`Gateway`].
//!
//! The wire transport (the actual socket listener) is explicitly out of
//! scope; this binary's job ends at exposing the constructed services to
//! whatever process embeds them, plus a small driver loop that ticks the
//! heartbeat sweep the way a real transport's event loop would.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kompite_core::ledger::MemoryStore;
use kompite_core::{Config, Gateway, Ledger, MatchManager, Money};

#[derive(Parser, Debug)]
#[command(name = "kompite-server", about = "Kompite arbitration core service")]
struct Cli {
    /// Log level passed to env_logger if RUST_LOG is unset.
    #[arg(long, env = "KOMPITE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable the house bot fallback when matchmaking finds no human
    /// opponent.
    #[arg(long, env = "KOMPITE_HOUSE_BOT", default_value_t = false)]
    house_bot: bool,

    /// Starting balance credited to the house bot account, if enabled.
    #[arg(long, env = "KOMPITE_HOUSE_BOT_BANKROLL", default_value_t = 1_000_000)]
    house_bot_bankroll: i64,

    /// Heartbeat sweep interval in milliseconds: nominally 3s, with a
    /// 10s ping timeout.
    #[arg(long, env = "KOMPITE_SWEEP_INTERVAL_MS", default_value_t = 3_000)]
    sweep_interval_ms: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = Config::default();
    let storage = MemoryStore::new();
    let ledger = Arc::new(Ledger::new(storage, config.clone()));

    let house_bot_account_id = if cli.house_bot {
        let account = ledger
            .open_account(Money::from_i64(cli.house_bot_bankroll))
            .await
            .expect("opening the house bot account cannot fail on a fresh store");
        log::info!("house bot enabled, account {}", account.id);
        Some(account.id)
    } else {
        None
    };

    let manager = Arc::new(MatchManager::new(ledger.clone(), config.clone(), house_bot_account_id));
    let gateway = Arc::new(Gateway::new(manager, config));

    log::info!("kompite-core arbitration services constructed; awaiting transport wiring");
    run_heartbeat_sweep(gateway, Duration::from_millis(cli.sweep_interval_ms)).await;
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level.to_string());
    env_logger::Builder::from_env(env).init();
}

/// Periodically sweeps for missed heartbeats until the process receives a
/// shutdown signal. A real transport drives this from its own event loop;
/// standalone, this keeps the service alive and ticks at the configured
/// sweep interval.
async fn run_heartbeat_sweep<S: kompite_core::Storage>(gateway: Arc<Gateway<S>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                gateway.sweep_missed_heartbeats(0, 0).await;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown signal received, stopping heartbeat sweep");
                break;
            }
        }
    }
}
