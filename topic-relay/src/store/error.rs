use std::{error::Error, time::Duration};

use thiserror::Error;

/// Type-erased error from a driver.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store client is not connected")]
    NotConnected,
    /// The connection itself failed. The connector treats this as a lost
    /// connection.
    #[error("store connection error: {0}")]
    Connection(#[source] BoxError),
    /// The store rejected a command on a healthy connection.
    #[error("store command error: {0}")]
    Command(#[source] BoxError),
    /// The store did not answer in time. Treated like a lost connection.
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),
    #[error("max reconnection attempts reached after {0} attempts")]
    ReconnectExhausted(u32),
}

impl StoreError {
    pub fn connection(error: impl Into<BoxError>) -> Self {
        Self::Connection(error.into())
    }

    pub fn command(error: impl Into<BoxError>) -> Self {
        Self::Command(error.into())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }
}
