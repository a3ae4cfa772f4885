use anyhow::{Context, Result};
use citycoin_autominer::chain::ChainReader;
use citycoin_autominer::config::{MiningOverrides, Settings};
use citycoin_autominer::history::account_history;
use citycoin_autominer::mining::commit::{ClampLimits, clamp_commit, estimate_commit};
use citycoin_autominer::mining::{
    CommitMode, ConsoleOperator, FeeMode, MiningRunner, Operator, PresetOperator, estimate_fee,
};
use citycoin_autominer::report::{ConsoleSink, EventSink, LogSink};
use citycoin_autominer::units::{format_stx, shorten_address};
use citycoin_autominer::{HttpChainReader, MinerError, SignerSubmitter};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

/// CityCoins autominer - schedule and submit mine-many transactions
#[derive(Parser, Debug)]
#[command(name = "autominer")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Settings file
    #[arg(short, long, default_value = "autominer.toml", global = true)]
    config: PathBuf,

    /// Stacks API URL (overrides network.api_url)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// How status events are shown
    #[arg(long, value_enum, default_value_t = Output::Console, global = true)]
    output: Output,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    /// Styled terminal output
    Console,
    /// One tracing record per event
    Log,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the mining loop
    Mine {
        /// Block height to mine at (disables start-now)
        #[arg(long, conflicts_with = "start_now")]
        target_height: Option<u64>,

        /// Mine at the current block height
        #[arg(long)]
        start_now: bool,

        /// Number of mining transactions to send
        #[arg(long, conflicts_with = "continuous")]
        runs: Option<u32>,

        /// Keep mining with the full balance until something fails
        #[arg(long)]
        continuous: bool,

        /// Approve every confirmation without prompting
        #[arg(short, long)]
        yes: bool,

        /// Build the first transaction but do not broadcast it
        #[arg(long)]
        dry_run: bool,
    },
    /// Show block height, balance, nonce and mempool size
    Status {
        /// Address to inspect (default: mining.stx_address)
        #[arg(short, long)]
        address: Option<String>,
    },
    /// List an address's transactions
    History {
        /// Address to list (default: mining.stx_address)
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Estimate commit and fee for the configured contract without submitting
    Estimate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("{} {:#}", style("error:").red().bold(), e);
        return ExitCode::from(1);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let graceful = e
                .downcast_ref::<MinerError>()
                .is_some_and(MinerError::is_graceful);
            if graceful {
                eprintln!("{}", style(format!("⛔ {:#}", e)).yellow());
                ExitCode::from(130)
            } else {
                eprintln!("{} {:#}", style("error:").red().bold(), e);
                ExitCode::from(1)
            }
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => anyhow::bail!("unknown log level {:?}", other),
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let mut settings = Settings::load(&args.config)?;
    if let Some(url) = args.api_url {
        settings.network.api_url = url;
    }
    info!(
        "autominer v{} using {}",
        env!("CARGO_PKG_VERSION"),
        settings.network.api_url
    );
    let reader = HttpChainReader::new(&settings.network.api_url, settings.network.request_timeout())?;

    match args.command {
        Commands::Mine {
            target_height,
            start_now,
            runs,
            continuous,
            yes,
            dry_run,
        } => {
            let overrides = MiningOverrides {
                target_height,
                start_now,
                runs,
                continuous,
            };
            mine(&settings, &reader, args.output, overrides, yes, dry_run).await
        }
        Commands::Status { address } => {
            let address = resolve_address(&settings, address)?;
            status(&reader, &address).await
        }
        Commands::History { address } => {
            let address = resolve_address(&settings, address)?;
            history(&reader, &address).await
        }
        Commands::Estimate => estimate(&settings, &reader).await,
    }
}

fn resolve_address(settings: &Settings, address: Option<String>) -> Result<String> {
    match address {
        Some(address) => Ok(address),
        None => Ok(settings
            .mining()
            .context("pass --address or set mining.stx_address")?
            .stx_address
            .clone()),
    }
}

/// First Ctrl+C stops before the next cycle, a second one exits.
fn install_interrupt() -> Arc<AtomicBool> {
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    let installed = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            eprintln!("\n⛔ Cancelled by user");
            std::process::exit(130);
        }
        eprintln!("\n⛔ Stopping before the next cycle, press Ctrl+C again to exit now");
    });
    if let Err(e) = installed {
        warn!("could not install Ctrl+C handler: {}", e);
    }
    interrupt
}

async fn mine(
    settings: &Settings,
    reader: &HttpChainReader,
    output: Output,
    overrides: MiningOverrides,
    yes: bool,
    dry_run: bool,
) -> Result<()> {
    let mut mining = settings.mining()?.clone();
    mining.apply(&overrides);
    let config = mining.to_config()?;

    let signer_url = match settings.network.signer_url.as_deref() {
        Some(url) => url,
        None if dry_run => "",
        None => settings.signer_url()?,
    };
    let submitter = SignerSubmitter::new(signer_url, settings.network.request_timeout())?;

    let sink: Box<dyn EventSink> = match output {
        Output::Console => {
            let sink = ConsoleSink::new();
            sink.banner();
            Box::new(sink)
        }
        Output::Log => Box::new(LogSink),
    };
    let operator: Box<dyn Operator> = if yes {
        Box::new(PresetOperator::new(settings.strategy))
    } else {
        Box::new(ConsoleOperator::new(settings.strategy))
    };

    let summary = MiningRunner::new(
        reader,
        &submitter,
        operator.as_ref(),
        sink.as_ref(),
        config,
        settings.timing,
    )
    .with_interrupt(install_interrupt())
    .with_dry_run(dry_run)
    .run()
    .await?;

    info!(cycles = summary.cycles.len(), "mining finished");
    Ok(())
}

async fn status(reader: &HttpChainReader, address: &str) -> Result<()> {
    let height = reader.current_height().await?;
    let balance = reader.balance(address).await?;
    let nonce = reader.nonce(address).await?;
    let mempool = reader.mempool_size().await?;

    println!("{}", style("STATUS").bold().blue());
    println!("address: {}", shorten_address(address));
    println!("block height: {}", height);
    println!("balance: {}", format_stx(balance));
    println!("nonce: {}", nonce);
    println!("mempool: {} txs", mempool);
    Ok(())
}

async fn history(reader: &HttpChainReader, address: &str) -> Result<()> {
    let transactions = account_history(reader, address, |count, total| {
        eprintln!("fetched {} of {} transactions", count, total);
    })
    .await?;

    for tx in &transactions {
        let height = tx
            .block_height
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:>8} {:<24} {:<14} {}", height, tx.tx_status, tx.tx_type, tx.tx_id);
    }
    println!("{} transactions", transactions.len());
    Ok(())
}

async fn estimate(settings: &Settings, reader: &HttpChainReader) -> Result<()> {
    let config = settings.mining()?.to_config()?;
    let height = reader.current_height().await?;
    let balance = reader.balance(&config.stx_address).await?;

    let (commit, max_per_block) = match config.commit_mode {
        CommitMode::Custom(commit) => (commit, None),
        CommitMode::Strategy => {
            let strategy = settings
                .strategy
                .context("commit = \"strategy\" needs a [strategy] section")?;
            let estimate = estimate_commit(reader, height, &strategy, &config.contract).await?;
            println!(
                "past {} blocks avg {:.0} uSTX, next {} blocks avg {:.0} uSTX, target {}%",
                estimate.past.blocks,
                estimate.past.average(),
                estimate.future.blocks,
                estimate.future.average(),
                estimate.target_percentage
            );
            (estimate.commit, Some(strategy.max_commit_per_block))
        }
    };
    let fee = match config.fee_mode {
        FeeMode::Custom(fee) => fee,
        FeeMode::Multiplier(multiplier) => {
            let estimate = estimate_fee(reader, multiplier).await?;
            println!(
                "avg fee over {} pending txs: {} (x{})",
                estimate.sample_size,
                format_stx(estimate.average),
                multiplier
            );
            estimate.fee
        }
    };

    println!("block height: {}", height);
    println!("balance: {}", format_stx(balance));
    println!("estimated commit: {} per block", format_stx(commit));
    println!("fee: {}", format_stx(fee));

    let clamped = clamp_commit(
        commit,
        &ClampLimits {
            max_per_block,
            balance,
            blocks_per_tx: config.blocks_per_tx,
            fee,
        },
    )?;
    for warning in &clamped.warnings {
        println!("{}", style(format!("clamped: {:?}", warning)).yellow());
    }
    println!(
        "commit: {} x {} blocks = {}",
        format_stx(clamped.commit),
        config.blocks_per_tx,
        format_stx(clamped.total_commit(config.blocks_per_tx))
    );
    Ok(())
}
