//! Lifecycle of the whole bridge: connect the store, then the broker, then
//! wait for a reason to stop.

use std::future::Future;

use thiserror::Error;
use tokio::{pin, select};
use tracing::{error, info};

use crate::{
    broker::{BrokerConnector, BrokerDialer, BrokerHandle},
    config::{BridgeConfig, ConfigError},
    relay::MessageRelay,
    store::{StoreConnector, StoreDriver, StoreError},
};

/// Why a bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The process was asked to stop.
    Signal,
    StartupFailure,
    /// The store could not be reached again after losing the connection.
    StoreExhausted,
    /// The broker task stopped by itself.
    BrokerFailure,
}

impl ShutdownCause {
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownCause::Signal => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

pub struct Supervisor<S: StoreDriver, B> {
    config: BridgeConfig,
    store: StoreConnector<S>,
    dialer: B,
}

impl<S: StoreDriver, B: BrokerDialer> Supervisor<S, B> {
    pub fn new(config: BridgeConfig, store_driver: S, dialer: B) -> Self {
        let store = StoreConnector::new(
            store_driver,
            config.store.key_prefix.clone(),
            config.store.reconnect,
        );
        Self {
            config,
            store,
            dialer,
        }
    }

    pub fn store(&self) -> &StoreConnector<S> {
        &self.store
    }

    /// Connect the store and start the broker. The broker is only started
    /// once the store is usable, so no message can arrive before there is
    /// somewhere to put it.
    pub async fn start(self) -> Result<RunningBridge<S>, StartupError> {
        info!("Starting MQTT-Redis bridge...");
        self.config.validate()?;
        self.store.connect().await?;
        let broker = BrokerConnector::initialize(
            self.dialer,
            &self.config.broker,
            self.config.topics.clone(),
            MessageRelay::new(self.store.clone()),
        );
        info!("MQTT-Redis bridge started successfully");
        info!("Monitoring topics: {}", broker.monitored_topics().join(", "));
        Ok(RunningBridge {
            store: self.store,
            broker,
        })
    }

    /// Run until `shutdown` resolves or the bridge fails, then tear
    /// everything down.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> ShutdownCause {
        pin!(shutdown);
        let store = self.store.clone();
        let mut bridge = select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutting down...");
                if let Err(e) = store.disconnect().await {
                    error!("Error disconnecting store: {}", e);
                }
                return ShutdownCause::Signal;
            }
            started = self.start() => match started {
                Ok(bridge) => bridge,
                Err(e) => {
                    error!("Failed to start MQTT-Redis bridge: {}", e);
                    return ShutdownCause::StartupFailure;
                }
            },
        };
        let cause = bridge.wait(shutdown).await;
        bridge.shutdown().await;
        cause
    }
}

/// A started bridge.
pub struct RunningBridge<S: StoreDriver> {
    store: StoreConnector<S>,
    broker: BrokerHandle,
}

impl<S: StoreDriver> RunningBridge<S> {
    pub fn store(&self) -> &StoreConnector<S> {
        &self.store
    }

    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }

    /// Resolves with the first reason to stop.
    pub async fn wait(&mut self, shutdown: impl Future<Output = ()>) -> ShutdownCause {
        select! {
            _ = shutdown => {
                info!("Shutting down...");
                ShutdownCause::Signal
            }
            _ = self.store.terminated() => {
                error!("Store connection lost and could not be re-established");
                ShutdownCause::StoreExhausted
            }
            result = self.broker.join() => {
                match result {
                    Ok(()) => error!("MQTT client stopped unexpectedly"),
                    Err(e) => error!("MQTT client failed: {}", e),
                }
                ShutdownCause::BrokerFailure
            }
        }
    }

    /// Disconnect the broker, then the store. A failure on one side never
    /// stops the other from being closed.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.broker.disconnect().await {
            error!("Error disconnecting MQTT client: {}", e);
        }
        if let Err(e) = self.store.disconnect().await {
            error!("Error disconnecting store: {}", e);
        }
        info!("MQTT-Redis bridge stopped");
    }
}
