use std::convert::Infallible;

use clap::{ArgAction, Parser};
use topic_relay::{BridgeConfig, BrokerOptions, StoreOptions, Topics};

/// Relay MQTT topics into Redis hashes.
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
pub struct Args {
    /// Broker URL. `mqtt://`, `tcp://`, `mqtts://` and `ssl://` are accepted.
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "mqtt://localhost:1883")]
    pub broker_url: String,

    /// Comma separated list of topics to subscribe to.
    #[arg(long, env = "MQTT_TOPICS", default_value = "")]
    pub topics: String,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "mqtt-redis-bridge")]
    pub client_id: String,

    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Prepended to every topic to form the hash key.
    #[arg(long, env = "REDIS_KEY_PREFIX", default_value = "mqtt:")]
    pub redis_key_prefix: String,

    /// Anything but `false` keeps logging on.
    #[arg(
        long,
        env = "LOGGING_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = parse_enabled
    )]
    pub logging_enabled: bool,
}

fn parse_enabled(value: &str) -> Result<bool, Infallible> {
    Ok(value != "false")
}

impl Args {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            broker: BrokerOptions {
                url: self.broker_url.clone(),
                client_id: self.client_id.clone(),
                ..Default::default()
            },
            topics: Topics::parse(&self.topics),
            store: StoreOptions {
                host: self.redis_host.clone(),
                port: self.redis_port,
                password: self.redis_password.clone().filter(|p| !p.is_empty()),
                key_prefix: self.redis_key_prefix.clone(),
                ..Default::default()
            },
        }
    }
}
