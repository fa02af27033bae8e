use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use xrate::core::asset::AssetClass;
use xrate::core::history::Resolution;
use xrate::core::log::init_logging;

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

impl From<Commands> for xrate::AppCommand {
    fn from(cmd: Commands) -> xrate::AppCommand {
        match cmd {
            Commands::Rates { base, asset_type } => xrate::AppCommand::Rates {
                base,
                asset_class: asset_type,
            },
            Commands::Serve => xrate::AppCommand::Serve,
            Commands::History {
                symbol,
                asset_type,
                resolution,
                currency,
            } => xrate::AppCommand::History {
                symbol,
                asset_class: asset_type,
                resolution,
                currency,
            },
            Commands::Aggregate { backfill } => xrate::AppCommand::Aggregate { backfill },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch current prices once and show rates from one asset
    Rates {
        /// Asset the rates are expressed against
        #[arg(default_value = "USD")]
        base: String,
        /// Only show assets of this type (currency, metal, crypto, stock)
        #[arg(short = 't', long)]
        asset_type: Option<AssetClass>,
    },
    /// Keep prices current and record history until interrupted
    Serve,
    /// Show recorded price history for one asset
    History {
        symbol: String,
        /// Asset type (currency, metal, crypto, stock)
        #[arg(short = 't', long, default_value = "crypto")]
        asset_type: AssetClass,
        /// raw, hourly or daily
        #[arg(short, long, default_value = "hourly")]
        resolution: Resolution,
        /// Currency to express prices in
        #[arg(long, default_value = "USD")]
        currency: String,
    },
    /// Run one history aggregation pass
    Aggregate {
        /// Roll every day still in the hourly tier, not only recent ones
        #[arg(long)]
        backfill: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, matches!(cli.command, Some(Commands::Serve)));

    let result = match cli.command {
        Some(Commands::Setup) => xrate::cli::setup::setup(),
        Some(cmd) => xrate::run_command(cmd.into(), cli.config_path.as_deref()).await,
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
