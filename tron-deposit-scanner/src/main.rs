//! TRON Deposit Scanner CLI
//!
//! Incoming TRC20 deposit detection for a fixed set of wallets.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tron_deposit_scanner::{
    config::ScannerConfig,
    deposit::DepositStatus,
    ledger::LmdbLedger,
    lock::RunLock,
    output::create_notifier,
    pipeline::{IngestionPipeline, PassOutcome},
    sync::ScanState,
    TronscanClient,
};

#[derive(Parser)]
#[command(name = "tron-deposit-scanner")]
#[command(about = "Incoming TRC20 deposit scanner for TRON wallets")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "scanner.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scan passes on the configured interval
    Scan {
        /// Run a single pass and exit (don't poll)
        #[arg(long)]
        once: bool,
    },

    /// Show per-wallet watermarks and dedup set sizes
    Status,

    /// List recorded deposits, newest first
    Deposits {
        /// Only show deposits for this wallet
        #[arg(short, long)]
        wallet: Option<String>,

        /// Maximum number of deposits to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Change the processing status of a recorded deposit
    SetStatus {
        /// Receiving wallet
        #[arg(short, long)]
        wallet: String,

        /// Transaction id
        #[arg(short, long)]
        txid: String,

        /// New status
        #[arg(short, long, value_enum)]
        status: StatusArg,
    },

    /// Remove the run lock left behind by a crashed pass
    Unlock,

    /// Validate configuration file
    ValidateConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Detected,
    Credited,
    Ignored,
    Failed,
}

impl From<StatusArg> for DepositStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Detected => DepositStatus::Detected,
            StatusArg::Credited => DepositStatus::Credited,
            StatusArg::Ignored => DepositStatus::Ignored,
            StatusArg::Failed => DepositStatus::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    // Load configuration
    let config = match ScannerConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            if matches!(cli.command, Commands::ValidateConfig) {
                eprintln!("Configuration validation failed: {:#}", e);
                std::process::exit(1);
            }
            anyhow::bail!("Failed to load config from {:?}: {:#}", cli.config, e);
        }
    };

    match cli.command {
        Commands::Scan { once } => run_scanner(config, once).await,
        Commands::Status => show_status(&config),
        Commands::Deposits { wallet, limit } => list_deposits(&config, wallet.as_deref(), limit),
        Commands::SetStatus {
            wallet,
            txid,
            status,
        } => set_status(&config, &wallet, &txid, status.into()),
        Commands::Unlock => unlock(&config),
        Commands::ValidateConfig => {
            println!("Configuration is valid.");
            println!("  Wallets: {}", config.wallets.len());
            for wallet in &config.wallets {
                println!("    {} ({})", wallet.address, wallet.display_name());
            }
            println!("  Token contract: {}", config.token_contract);
            println!(
                "  Paging: {} per page, {} pages per wallet",
                config.page_size, config.max_pages
            );
            println!("  Poll interval: {}s", config.poll_interval_secs);
            println!("  Notifier: {:?}", config.notifier);
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn run_scanner(config: ScannerConfig, once: bool) -> Result<()> {
    tracing::info!(
        "Starting deposit scanner for {} wallets (state: {:?})",
        config.wallets.len(),
        config.state_file
    );

    let client = TronscanClient::from_config(&config)?;
    let ledger = LmdbLedger::open(&config.ledger_path)?;
    let notifier = create_notifier(&config)?;
    let poll_interval = Duration::from_secs(config.poll_interval_secs);

    let pipeline = IngestionPipeline::new(config, client, Box::new(ledger), notifier);

    // The first pass runs right away, later ones on every tick.
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }

        if let PassOutcome::Completed(summary) = pipeline.run_pass().await {
            if summary.deposits_recorded > 0 {
                tracing::info!("Recorded {} new deposits", summary.deposits_recorded);
            }
        }

        if once {
            tracing::info!("Single pass complete, exiting");
            break;
        }
    }

    Ok(())
}

fn show_status(config: &ScannerConfig) -> Result<()> {
    let mut state = ScanState::load(&config.state_file);
    state.ensure_wallets(&config.wallets);
    println!("{}", state.summary());

    let lock = RunLock::new(&config.lock_file, None);
    if lock.path().exists() {
        println!("Run lock present: {:?}", lock.path());
    }
    Ok(())
}

fn list_deposits(config: &ScannerConfig, wallet: Option<&str>, limit: usize) -> Result<()> {
    let ledger = LmdbLedger::open(&config.ledger_path)?;
    let deposits = ledger.recent(wallet, limit)?;

    if deposits.is_empty() {
        println!("No deposits recorded.");
        return Ok(());
    }

    for deposit in deposits {
        let name = config
            .wallet(&deposit.wallet)
            .map(|w| w.display_name().to_string())
            .unwrap_or_else(|| deposit.wallet.clone());
        println!(
            "{}  {:>18} {}  {:?}  {}  from {}  tx {}",
            tron_deposit_scanner::output::format_local_time(
                deposit.block_ts,
                config.display_utc_offset_hours
            ),
            deposit.amount,
            deposit.token_symbol,
            deposit.status,
            name,
            deposit.from_address,
            deposit.txid
        );
    }

    Ok(())
}

fn set_status(config: &ScannerConfig, wallet: &str, txid: &str, status: DepositStatus) -> Result<()> {
    let ledger = LmdbLedger::open(&config.ledger_path)?;
    if !ledger.set_status(wallet, txid, status)? {
        anyhow::bail!("No deposit recorded for wallet {} and txid {}", wallet, txid);
    }
    println!("Deposit {}:{} is now {:?}", wallet, txid, status);
    Ok(())
}

fn unlock(config: &ScannerConfig) -> Result<()> {
    let lock = RunLock::new(&config.lock_file, None);
    if lock.force_release()? {
        println!("Removed run lock {:?}", lock.path());
    } else {
        println!("No run lock at {:?}", lock.path());
    }
    Ok(())
}
