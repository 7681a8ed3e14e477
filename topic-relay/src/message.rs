use std::str::Utf8Error;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::{constants::TOPIC_SEPARATOR, util::iso_timestamp};

/// A message as delivered by the broker. Lives for one handling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    /// According to our process, not the publisher.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Stamp a message as received now.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::with_received_at(topic, payload, Utc::now())
    }

    pub fn with_received_at(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at,
        }
    }

    /// The payload as UTF-8 text.
    pub fn text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    pub fn timestamp(&self) -> String {
        iso_timestamp(&self.received_at)
    }

    /// Devices conventionally publish under `/<vendor>/<device-id>/...`, so
    /// the third segment (counting the empty one before the leading
    /// separator) names the device.
    pub fn device_id(&self) -> Option<&str> {
        self.topic
            .split(TOPIC_SEPARATOR)
            .nth(2)
            .filter(|segment| !segment.is_empty())
    }
}

#[cfg(test)]
pub mod test_utils {
    use chrono::{TimeZone, Utc};

    use super::InboundMessage;

    /// A message received at a fixed instant, `seconds` past 2024-01-01.
    pub fn message_at(topic: &str, payload: &str, seconds: i64) -> InboundMessage {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        InboundMessage::with_received_at(
            topic,
            payload.to_owned(),
            base + chrono::Duration::seconds(seconds),
        )
    }
}
