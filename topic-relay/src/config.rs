//! Typed configuration for the bridge. Where the values come from (env,
//! flags, files) is the binary's business; this module only describes and
//! validates them.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{
    constants::{
        BROKER_CONNECT_TIMEOUT, BROKER_KEEP_ALIVE, DEFAULT_BROKER_URL, DEFAULT_CLIENT_ID,
        DEFAULT_KEY_PREFIX, DEFAULT_STORE_HOST, DEFAULT_STORE_PORT,
    },
    policy::ReconnectPolicy,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one MQTT topic must be configured")]
    NoTopics,
    #[error("invalid broker url {url}: {reason}")]
    BrokerUrl { url: String, reason: String },
}

/// The fixed set of topics a bridge subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topics(Vec<String>);

impl Topics {
    /// Split a comma-separated list, dropping blank entries.
    pub fn parse(list: &str) -> Self {
        list.split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for Topics {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<String>> for Topics {
    fn from(topics: Vec<String>) -> Self {
        Self(topics)
    }
}

/// Where and how the broker connection is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOptions {
    pub url: String,
    pub client_id: String,
    pub clean_session: bool,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_owned(),
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            clean_session: true,
            connect_timeout: BROKER_CONNECT_TIMEOUT,
            keep_alive: BROKER_KEEP_ALIVE,
            reconnect: ReconnectPolicy::broker(),
        }
    }
}

/// A broker address split out of [BrokerOptions::url].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerOptions {
    /// Parse `url` into a host/port pair. `mqtt://` and `tcp://` are plain
    /// TCP, `mqtts://` and `ssl://` use TLS.
    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        let invalid = |reason: String| ConfigError::BrokerUrl {
            url: self.url.clone(),
            reason,
        };
        let url = Url::parse(&self.url).map_err(|e| invalid(e.to_string()))?;
        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host".to_owned()))?
            .to_owned();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });
        Ok(BrokerEndpoint { host, port, tls })
    }
}

/// Where and how the store connection is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Prepended to every topic to form the hash key.
    pub key_prefix: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_STORE_HOST.to_owned(),
            port: DEFAULT_STORE_PORT,
            password: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            reconnect: ReconnectPolicy::store(),
        }
    }
}

impl StoreOptions {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }

    /// [url](Self::url) with the password masked, for logging.
    pub fn redacted_url(&self) -> String {
        crate::util::mask_password(&self.url())
    }
}

/// Everything a [Supervisor](crate::Supervisor) needs to run a bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    pub broker: BrokerOptions,
    pub topics: Topics,
    pub store: StoreOptions,
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }
        self.broker.endpoint()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_topics() {
        let topics = Topics::parse("shellies/a/status, shellies/b/status,,");
        assert_eq!(
            topics.as_slice(),
            &["shellies/a/status".to_owned(), "shellies/b/status".to_owned()]
        );
        assert!(Topics::parse("").is_empty());
        assert!(Topics::parse(" , ").is_empty());
    }

    #[test]
    fn empty_topics_are_rejected() {
        let config = BridgeConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::NoTopics));
    }

    #[test]
    fn default_endpoint() {
        let endpoint = BrokerOptions::default().endpoint().unwrap();
        assert_eq!(
            endpoint,
            BrokerEndpoint {
                host: "localhost".to_owned(),
                port: 1883,
                tls: false
            }
        );
    }

    #[test]
    fn tls_endpoint_default_port() {
        let options = BrokerOptions {
            url: "mqtts://broker.example.com".to_owned(),
            ..Default::default()
        };
        let endpoint = options.endpoint().unwrap();
        assert!(endpoint.tls);
        assert_eq!(endpoint.port, 8883);
    }

    #[test]
    fn bad_scheme() {
        let options = BrokerOptions {
            url: "http://localhost:1883".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            options.endpoint(),
            Err(ConfigError::BrokerUrl { .. })
        ));
    }

    #[test]
    fn store_url_masks_password() {
        let options = StoreOptions {
            password: Some("hunter2".to_owned()),
            ..Default::default()
        };
        assert_eq!(options.url(), "redis://:hunter2@localhost:6379");
        assert_eq!(options.redacted_url(), "redis://:***@localhost:6379");
        assert_eq!(
            StoreOptions::default().redacted_url(),
            "redis://localhost:6379"
        );
    }
}
