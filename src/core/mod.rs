//! Core domain types and the seams between sources, rates and storage

pub mod asset;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod error;
pub mod history;
pub mod log;
pub mod rates;
pub mod source;
pub mod store;

// Re-export main types for cleaner imports
pub use asset::{AssetClass, ConsensusPrice, Quote};
pub use error::{HistoryError, SourceError, StoreError};
pub use source::PriceSource;
pub use store::PriceStore;
