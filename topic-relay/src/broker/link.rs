use async_trait::async_trait;
use bytes::Bytes;

use crate::broker::BrokerError;

/// The broker's answer for one topic of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionGrant {
    pub topic: String,
    /// Granted QoS, `None` if the broker refused the subscription.
    pub qos: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The broker accepted the connection.
    Connected,
    Subscribed(Vec<SubscriptionGrant>),
    Publish { topic: String, payload: Bytes },
    /// The connection was closed without an error.
    Closed,
    /// Anything the bridge has no interest in (pings, acks of our own
    /// requests...).
    Other,
}

/// Constructs links. Every link dialed by the same dialer uses identical
/// options.
pub trait BrokerDialer: Send + Sync + 'static {
    type Link: BrokerLink;

    /// Build a new, not yet connected link. Connecting happens as the link is
    /// polled, so this never blocks.
    fn dial(&self) -> Self::Link;

    /// Human readable address for logs.
    fn endpoint(&self) -> String;
}

/// One connection to the broker, driven by [poll](BrokerLink::poll).
#[async_trait]
pub trait BrokerLink: Send + 'static {
    /// Drive the connection until the next event. An error means the
    /// connection is gone.
    async fn poll(&mut self) -> Result<BrokerEvent, BrokerError>;

    /// Request a subscription to all `topics` in a single QoS 0 request. The
    /// outcome arrives later as [BrokerEvent::Subscribed].
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Whether polling a lost link again reconnects it in place. Links which
    /// can't are replaced by a freshly dialed one.
    fn can_resume(&self) -> bool;

    /// Send a clean disconnect and wait for the transport to confirm it.
    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}
