use std::time::Duration;

/// Hash field holding the last payload received on a topic.
pub const LATEST_FIELD: &str = "latest";
/// Hash field holding the arrival instant of the last payload.
pub const TIMESTAMP_FIELD: &str = "timestamp";

pub const DEFAULT_BROKER_URL: &str = "mqtt://localhost:1883";
pub const DEFAULT_CLIENT_ID: &str = "mqtt-redis-bridge";
pub const DEFAULT_STORE_HOST: &str = "localhost";
pub const DEFAULT_STORE_PORT: u16 = 6379;
pub const DEFAULT_KEY_PREFIX: &str = "mqtt:";

/// Delay before a lost broker connection is re-established.
pub const BROKER_RECONNECT_DELAY: Duration = Duration::from_millis(5000);
pub const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const BROKER_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Store retries grow by this step per attempt...
pub const STORE_RECONNECT_STEP: Duration = Duration::from_millis(1000);
/// ...up to this ceiling.
pub const STORE_RECONNECT_CEILING: Duration = Duration::from_millis(5000);
pub const STORE_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Separator between topic levels.
pub const TOPIC_SEPARATOR: char = '/';

/// MQTT 3.1.1, as reported in the connect log.
pub const MQTT_PROTOCOL_VERSION: u8 = 4;

/// Longest a single store command may take before the connection is
/// considered lost.
pub const STORE_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Interval between `PING`s on an otherwise idle store connection.
pub const STORE_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
