use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use rust_decimal::Decimal;
use xmf_history::cli::record::{RecordRequest, parse_time};
use xmf_history::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch missing price and exchange rate history
    Sync,
    /// Thin out history the retention policy no longer needs
    Compact,
    /// Detect, apply and roll back stock splits
    Splits {
        #[command(subcommand)]
        command: SplitsCommands,
    },
    /// Record a buy (positive amount) or sell (negative amount)
    Record {
        /// Portfolio holding the instrument
        #[arg(long)]
        portfolio: String,
        /// Instrument symbol as configured
        #[arg(long)]
        symbol: String,
        /// Trade time, YYYY-MM-DD or RFC 3339
        #[arg(long, value_parser = parse_time)]
        time: DateTime<Utc>,
        #[arg(long, allow_hyphen_values = true)]
        amount: Decimal,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        fee: Option<Decimal>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show sample counts and tracking state per instrument and rate
    Status,
    /// Run all jobs periodically until Ctrl-C
    Daemon,
}

#[derive(Subcommand)]
enum SplitsCommands {
    /// List known splits
    List,
    /// Look for new splits of tracked instruments
    Detect,
    /// Apply pending splits and rollbacks to stored history
    Adjust,
    /// Roll back a split
    Rollback {
        /// Split id as shown by `splits list`
        id: u64,
    },
}

impl From<SplitsCommands> for xmf_history::SplitsCommand {
    fn from(cmd: SplitsCommands) -> xmf_history::SplitsCommand {
        match cmd {
            SplitsCommands::List => xmf_history::SplitsCommand::List,
            SplitsCommands::Detect => xmf_history::SplitsCommand::Detect,
            SplitsCommands::Adjust => xmf_history::SplitsCommand::Adjust,
            SplitsCommands::Rollback { id } => xmf_history::SplitsCommand::Rollback { id },
        }
    }
}

impl From<Commands> for xmf_history::AppCommand {
    fn from(cmd: Commands) -> xmf_history::AppCommand {
        match cmd {
            Commands::Sync => xmf_history::AppCommand::Sync,
            Commands::Compact => xmf_history::AppCommand::Compact,
            Commands::Splits { command } => xmf_history::AppCommand::Splits(command.into()),
            Commands::Record {
                portfolio,
                symbol,
                time,
                amount,
                price,
                fee,
                note,
            } => xmf_history::AppCommand::Record(RecordRequest {
                portfolio,
                symbol,
                time,
                amount,
                price,
                fee,
                note,
            }),
            Commands::Status => xmf_history::AppCommand::Status,
            Commands::Daemon => xmf_history::AppCommand::Daemon,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => xmf_history::cli::setup::setup(),
        Some(cmd) => xmf_history::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
