mod config;
mod logging;
mod signals;

use std::process::ExitCode;

use clap::Parser;
use topic_relay::{
    broker::mqtt::MqttDialer, store::redis::RedisDriver, ShutdownCause, Supervisor,
};
use tokio::task::JoinHandle;
use tracing::error;

use crate::config::Args;

async fn shutdown_signal() {
    if let Err(e) = signals::wait_for_shutdown_signal().await {
        error!("Unable to listen for shutdown signals: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // a missing .env file is fine, the environment may be set already
    let _ = dotenv::dotenv();
    let args = Args::parse();
    logging::init(args.logging_enabled);

    let config = args.bridge_config();
    let store = match RedisDriver::new(&config.store) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to start MQTT-Redis bridge: {}", e);
            return ExitCode::from(ShutdownCause::StartupFailure.exit_code());
        }
    };
    let dialer = match MqttDialer::new(config.broker.clone()) {
        Ok(dialer) => dialer,
        Err(e) => {
            error!("Failed to start MQTT-Redis bridge: {}", e);
            return ExitCode::from(ShutdownCause::StartupFailure.exit_code());
        }
    };

    let bridge = tokio::spawn(Supervisor::new(config, store, dialer).run(shutdown_signal()));
    ExitCode::from(exit_code(bridge).await)
}

/// Exit status of the bridge task. A panic counts as a failure.
async fn exit_code(bridge: JoinHandle<ShutdownCause>) -> u8 {
    match bridge.await {
        Ok(cause) => cause.exit_code(),
        Err(e) => {
            error!("MQTT-Redis bridge crashed: {}", e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_stop_exits_zero() {
        let bridge = tokio::spawn(async { ShutdownCause::Signal });
        assert_eq!(exit_code(bridge).await, 0);
    }

    #[tokio::test]
    async fn failure_exits_one() {
        let bridge = tokio::spawn(async { ShutdownCause::StoreExhausted });
        assert_eq!(exit_code(bridge).await, 1);
    }

    async fn crash() -> ShutdownCause {
        panic!("boom")
    }

    #[tokio::test]
    async fn panic_exits_one() {
        let bridge = tokio::spawn(crash());
        assert_eq!(exit_code(bridge).await, 1);
    }
}
