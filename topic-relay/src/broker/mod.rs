//! # The message bus side of the bridge
//!
//! [BrokerConnector::initialize] starts a background task which owns the
//! broker connection for the lifetime of the process:
//!
//! - On every successful connect it subscribes to all configured topics in
//! one batched request at QoS 0.
//! - Every message received is handed to the [MessageRelay](crate::MessageRelay)
//! before the next one is read.
//! - A lost connection is retried forever at a fixed interval, one attempt
//! per loss.
//!
//! The transport itself sits behind [BrokerDialer] and [BrokerLink]; the
//! `mqtt` feature provides an implementation backed by `rumqttc`.

mod connector;
mod error;
mod link;
#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use connector::{BrokerConnector, BrokerHandle};
pub use error::BrokerError;
pub use link::{BrokerDialer, BrokerEvent, BrokerLink, SubscriptionGrant};
