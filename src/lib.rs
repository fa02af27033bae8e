pub mod aggregation;
pub mod cli;
pub mod core;
pub mod exchange;
pub mod providers;
pub mod query;
pub mod recorder;
pub mod store;

use crate::core::asset::AssetClass;
use crate::core::config::AppConfig;
use crate::core::history::Resolution;
use crate::exchange::Exchange;
use crate::query::HistoryQueryService;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Rates {
        base: String,
        asset_class: Option<AssetClass>,
    },
    Serve,
    History {
        symbol: String,
        asset_class: AssetClass,
        resolution: Resolution,
        currency: String,
    },
    Aggregate {
        backfill: bool,
    },
}

/// Builds the exchange over every source enabled in `config`.
pub fn build_exchange(config: &AppConfig) -> Result<Arc<Exchange>> {
    let sources = providers::build_sources(config)?;
    let exchange = Exchange::new(
        sources,
        config.consensus.outlier_band,
        config.consensus.source_timeout(),
    )
    .with_crypto_allow_list(config.assets.crypto.as_deref());
    Ok(Arc::new(exchange))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("xrate starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let exchange = build_exchange(&config)?;

    match command {
        AppCommand::Rates { base, asset_class } => {
            cli::rates::run(&exchange, &base, asset_class).await
        }
        AppCommand::Serve => {
            let store = store::open_store(&config)?;
            cli::serve::run(&config, exchange, store).await
        }
        AppCommand::History {
            symbol,
            asset_class,
            resolution,
            currency,
        } => {
            let store = store::open_store(&config)?;
            let service = HistoryQueryService::new(Arc::clone(&exchange), store, &config.history);
            cli::history::run(
                &exchange,
                &service,
                &symbol,
                asset_class,
                resolution,
                &currency,
            )
            .await
        }
        AppCommand::Aggregate { backfill } => {
            let store = store::open_store(&config)?;
            cli::aggregate::run(store, &config.history, backfill).await
        }
    }
}
