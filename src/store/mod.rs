pub mod disk;
pub mod memory;

use crate::core::config::{AppConfig, StorageKind};
use crate::core::store::PriceStore;
use anyhow::{Context, Result};
use disk::DiskStore;
use memory::MemoryStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Opens the history store selected in `config`, or `None` when history is
/// disabled.
pub fn open_store(config: &AppConfig) -> Result<Option<Arc<dyn PriceStore>>> {
    if !config.history.enabled {
        info!("Price history disabled");
        return Ok(None);
    }

    let store: Arc<dyn PriceStore> = match config.history.storage {
        StorageKind::Memory => {
            debug!("Using in-memory history store");
            Arc::new(MemoryStore::new())
        }
        StorageKind::Disk => {
            let path = config.default_data_path()?.join("history");
            let store = DiskStore::open(&path).with_context(|| {
                format!("Failed to open history store at {}", path.display())
            })?;
            Arc::new(store)
        }
    };
    Ok(Some(store))
}
