//! # Topic Relay
//!
//! Topic Relay bridges a publish/subscribe message broker into a key/value
//! hash store. It subscribes to a fixed set of topics and, for every message
//! received, records the payload and its arrival time in a hash named after
//! the topic:
//!
//! ```text
//! HSET mqtt:sensors/kitchen/temp latest    "21.5"
//! HSET mqtt:sensors/kitchen/temp timestamp "2024-05-01T12:00:07.042Z"
//! ```
//!
//! Only the last value per topic is kept. There is no history, no
//! acknowledgement beyond QoS 0 and no buffering while the store is down.
//!
//! ## Getting Started
//!
//! A bridge is a [StoreDriver](store::StoreDriver), a
//! [BrokerDialer](broker::BrokerDialer) and a [BridgeConfig] handed to a
//! [Supervisor]. The supervisor connects the store first, starts the broker
//! once the store is usable, and runs until told to stop or until either
//! side fails for good.
//!
//! ``` no_run
//! use topic_relay::{
//!     broker::mqtt::MqttDialer, store::redis::RedisDriver, BridgeConfig, Supervisor, Topics,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig {
//!     topics: Topics::parse("sensors/+/temp,sensors/+/humidity"),
//!     ..Default::default()
//! };
//! let store = RedisDriver::new(&config.store)?;
//! let dialer = MqttDialer::new(config.broker.clone())?;
//!
//! let cause = Supervisor::new(config, store, dialer)
//!     .run(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//! std::process::exit(cause.exit_code().into());
//! # }
//! ```
//!
//! ## Connection handling
//!
//! The two sides recover differently:
//!
//! - The broker is retried forever at a fixed interval, and topics are
//! subscribed again after every reconnect.
//! - The store is retried a bounded number of times with a growing delay.
//! Once it gives up the bridge shuts down.
//!
//! Both are described by a [ReconnectPolicy] and expose their
//! [ConnectionState] through a `watch` channel.
//!
//! ## Crate feature flags
//!
//! - `mqtt`: A broker link backed by `rumqttc`. Enabled by default.
//! - `redis`: A store driver backed by Redis. Enabled by default.
//! - `mocks`: In-memory broker and store for testing.

pub(crate) mod constants;

pub mod broker;
pub mod config;
mod message;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;
mod policy;
mod relay;
mod state;
pub mod store;
mod supervisor;
mod util;

pub use config::{BridgeConfig, BrokerOptions, ConfigError, StoreOptions, Topics};
pub use message::InboundMessage;
pub use policy::{Backoff, ReconnectPolicy};
pub use relay::{MessageRelay, RelayError};
pub use state::{ConnectionState, ConnectionTracker};
pub use store::{StoreConnector, StoreError};
pub use supervisor::{RunningBridge, ShutdownCause, StartupError, Supervisor};
