//! Turns one broker message into one stored record.

use std::str::Utf8Error;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    constants::{LATEST_FIELD, TIMESTAMP_FIELD},
    message::InboundMessage,
    store::{StoreConnector, StoreDriver, StoreError},
};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("payload is not valid UTF-8: {0}")]
    Decode(#[from] Utf8Error),
    #[error("failed to store field '{field}': {source}")]
    Store {
        field: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Writes messages into the store as `latest` + `timestamp` under the topic.
///
/// The two fields are written one after the other, not atomically. A caller
/// running several [relay](Self::relay)s concurrently for the same topic may
/// end up with `latest` from one message and `timestamp` from the next.
pub struct MessageRelay<D: StoreDriver> {
    store: StoreConnector<D>,
}

impl<D: StoreDriver> Clone for MessageRelay<D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<D: StoreDriver> MessageRelay<D> {
    pub fn new(store: StoreConnector<D>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StoreConnector<D> {
        &self.store
    }

    /// Stamp and relay a message just received from the broker. Failures are
    /// logged and swallowed; a bad message must never take the connection
    /// down with it.
    pub async fn handle_message(&self, topic: &str, payload: Bytes) {
        let message = InboundMessage::new(topic, payload);
        if let Err(e) = self.relay(&message).await {
            error!("Error processing message on {}: {}", message.topic, e);
        }
    }

    /// Store `message`. If `latest` can't be written, `timestamp` is left
    /// alone.
    pub async fn relay(&self, message: &InboundMessage) -> Result<(), RelayError> {
        let text = message.text()?;
        let timestamp = message.timestamp();
        debug!(
            topic = %message.topic,
            message = text,
            timestamp = %timestamp,
            device_id = message.device_id(),
            "New MQTT message"
        );

        self.store
            .set_hash(&message.topic, LATEST_FIELD, text)
            .await
            .map_err(|source| RelayError::Store {
                field: LATEST_FIELD,
                source,
            })?;
        self.store
            .set_hash(&message.topic, TIMESTAMP_FIELD, &timestamp)
            .await
            .map_err(|source| RelayError::Store {
                field: TIMESTAMP_FIELD,
                source,
            })?;

        debug!("Message on {} stored", message.topic);
        Ok(())
    }
}
