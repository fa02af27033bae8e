use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use async_trait::async_trait;

/// One upstream venue or data provider for a single asset class.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    fn asset_class(&self) -> AssetClass;

    /// Fetches every quote the source currently offers, already normalized to
    /// canonical asset codes.
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError>;
}
