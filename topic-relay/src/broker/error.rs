use thiserror::Error;
use tokio::task::JoinError;

use crate::store::BoxError;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection failed or dropped.
    #[error("broker connection error: {0}")]
    Connection(#[source] BoxError),
    #[error("subscription error: {0}")]
    Subscribe(#[source] BoxError),
    #[error("error disconnecting from broker: {0}")]
    Disconnect(#[source] BoxError),
    #[error("broker did not confirm the disconnect in time")]
    DisconnectTimeout,
    #[error("gave up reconnecting to the broker after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("broker task failed: {0}")]
    Task(#[from] JoinError),
}

impl BrokerError {
    pub fn connection(error: impl Into<BoxError>) -> Self {
        Self::Connection(error.into())
    }

    pub fn subscribe(error: impl Into<BoxError>) -> Self {
        Self::Subscribe(error.into())
    }

    pub fn disconnect(error: impl Into<BoxError>) -> Self {
        Self::Disconnect(error.into())
    }
}
