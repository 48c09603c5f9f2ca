use async_trait::async_trait;
use common::models::Signal;

use crate::StoreError;

/// Whole-collection persistence. `save` replaces everything previously stored.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Signal>, StoreError>;

    async fn save(&self, signals: &[Signal]) -> Result<(), StoreError>;
}
