//! # The hash store side of the bridge
//!
//! Every relayed message ends up as two fields of a hash in the store. The
//! [StoreConnector] owns the single connection to the store and guards it:
//!
//! - Writes never connect implicitly. A write issued while the connection is
//! down fails with [StoreError::NotConnected] and is lost.
//! - A write which fails because the connection broke hands the connection
//! over to a background reconnect loop governed by a bounded
//! [ReconnectPolicy](crate::ReconnectPolicy). Once that loop gives up the
//! connector is [Terminated](crate::ConnectionState::Terminated) and the
//! owning process is expected to shut down.
//!
//! How a connection is actually made is left to a [StoreDriver]. The
//! `redis` feature provides one backed by Redis.

mod connector;
mod driver;
mod error;
#[cfg(feature = "redis")]
pub mod redis;

pub use connector::StoreConnector;
pub use driver::{HashConnection, StoreDriver};
pub use error::{BoxError, StoreError};
