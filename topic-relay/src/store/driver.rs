use std::collections::HashMap;

use async_trait::async_trait;

use crate::store::StoreError;

/// Opens connections to a hash store.
#[async_trait]
pub trait StoreDriver: Send + Sync + 'static {
    type Connection: HashConnection;

    /// Make a single connection attempt. Retrying is the connector's job.
    async fn connect(&self) -> Result<Self::Connection, StoreError>;

    /// Human readable address for logs. Must not contain secrets.
    fn endpoint(&self) -> String;
}

/// One live connection. Keys passed in are already namespaced.
///
/// Errors which mean the connection is gone must be reported as
/// [StoreError::Connection]; everything else as [StoreError::Command].
#[async_trait]
pub trait HashConnection: Send + 'static {
    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Round trip used to notice a dead connection while idle.
    async fn ping(&mut self) -> Result<(), StoreError>;

    /// Close the connection gracefully.
    async fn quit(self) -> Result<(), StoreError>;
}
