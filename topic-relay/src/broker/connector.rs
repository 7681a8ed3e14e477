use tokio::{
    select,
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    broker::{BrokerDialer, BrokerError, BrokerEvent, BrokerLink, SubscriptionGrant},
    config::{BrokerOptions, Topics},
    constants::MQTT_PROTOCOL_VERSION,
    relay::MessageRelay,
    state::{ConnectionState, ConnectionTracker},
    store::StoreDriver,
};

/// Entry point for the broker side of the bridge.
pub struct BrokerConnector;

impl BrokerConnector {
    /// Start connecting to the broker in the background and return
    /// immediately. The returned [BrokerHandle] is the only way to stop it.
    pub fn initialize<B, S>(
        dialer: B,
        options: &BrokerOptions,
        topics: Topics,
        relay: MessageRelay<S>,
    ) -> BrokerHandle
    where
        B: BrokerDialer,
        S: StoreDriver,
    {
        info!(
            "Initializing MQTT client with broker URL: {}",
            dialer.endpoint()
        );
        info!(
            "Will subscribe to topics: {}",
            topics.as_slice().join(", ")
        );
        let tracker = ConnectionTracker::new("broker");
        let state = tracker.subscribe();
        let cancel = CancellationToken::new();
        let event_loop = BrokerLoop {
            dialer,
            options: options.clone(),
            topics: topics.clone(),
            relay,
            tracker,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(event_loop.run());
        BrokerHandle {
            topics,
            cancel,
            state,
            task: Some(task),
        }
    }
}

/// A running broker connection.
pub struct BrokerHandle {
    topics: Topics,
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<Result<(), BrokerError>>>,
}

impl BrokerHandle {
    /// The configured topics. Changing the returned list has no effect on the
    /// subscription.
    pub fn monitored_topics(&self) -> Vec<String> {
        self.topics.as_slice().to_vec()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Resolves if the background task stops by itself, which only happens
    /// on failure. Pending forever once the task has been joined.
    pub async fn join(&mut self) -> Result<(), BrokerError> {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let result = task.await;
        self.task = None;
        result?
    }

    /// Stop the connection. If connected, resolves once the broker has
    /// confirmed the disconnect; otherwise resolves straight away.
    pub async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

/// State owned by the background task.
struct BrokerLoop<B, S: StoreDriver> {
    dialer: B,
    options: BrokerOptions,
    topics: Topics,
    relay: MessageRelay<S>,
    tracker: ConnectionTracker,
    cancel: CancellationToken,
}

impl<B: BrokerDialer, S: StoreDriver> BrokerLoop<B, S> {
    async fn run(mut self) -> Result<(), BrokerError> {
        let mut link = self.dialer.dial();
        self.tracker.connecting();
        let cancel = self.cancel.clone();
        let mut attempt = 0;
        loop {
            let event = select! {
                biased;
                _ = cancel.cancelled() => break,
                event = link.poll() => event,
            };
            let reconnect = match event {
                // handling may wait on the store, which must not hold up a
                // disconnect
                Ok(event) => select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    reconnect = self.on_event(&mut link, event) => reconnect,
                },
                Err(e) => {
                    error!("MQTT error: {}", e);
                    self.tracker.errored()
                }
            };
            if self.tracker.state().is_connected() {
                attempt = 0;
            }
            if !reconnect {
                continue;
            }

            attempt += 1;
            let Some(delay) = self.options.reconnect.delay_for(attempt) else {
                error!("Giving up on the MQTT broker after {} attempts", attempt - 1);
                self.tracker.terminate();
                return Err(BrokerError::ReconnectExhausted(attempt - 1));
            };
            info!("Will attempt to reconnect in {}ms...", delay.as_millis());
            select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
            self.tracker.reconnecting();
            info!("Attempting to reconnect to MQTT broker...");
            if !link.can_resume() {
                info!("Recreating MQTT client...");
                // assigning drops the previous link, closing its transport
                link = self.dialer.dial();
            }
        }
        self.shutdown(link).await
    }

    /// Returns whether a reconnect should be scheduled.
    async fn on_event(&mut self, link: &mut B::Link, event: BrokerEvent) -> bool {
        match event {
            BrokerEvent::Connected => {
                self.tracker.connected();
                info!("Connected to MQTT broker");
                info!(
                    client_id = %self.options.client_id,
                    protocol_version = MQTT_PROTOCOL_VERSION,
                    clean = self.options.clean_session,
                    "Connection details"
                );
                self.subscribe(link).await;
                false
            }
            BrokerEvent::Subscribed(grants) => {
                log_grants(&grants);
                false
            }
            BrokerEvent::Publish { topic, payload } => {
                self.relay.handle_message(&topic, payload).await;
                false
            }
            BrokerEvent::Closed => {
                info!("MQTT connection closed");
                self.tracker.closed()
            }
            BrokerEvent::Other => false,
        }
    }

    async fn subscribe(&self, link: &mut B::Link) {
        if self.topics.is_empty() {
            warn!("No topics to subscribe to");
            return;
        }
        if let Err(e) = link.subscribe(self.topics.as_slice()).await {
            error!("Subscription error: {}", e);
        }
    }

    async fn shutdown(&mut self, mut link: B::Link) -> Result<(), BrokerError> {
        if !self.tracker.state().is_connected() {
            self.tracker.disconnected();
            return Ok(());
        }
        let result = match timeout(self.options.connect_timeout, link.disconnect()).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::DisconnectTimeout),
        };
        self.tracker.disconnected();
        if result.is_ok() {
            info!("Disconnected from MQTT broker");
        }
        result
    }
}

fn log_grants(grants: &[SubscriptionGrant]) {
    let (granted, refused): (Vec<_>, Vec<_>) = grants.iter().partition(|g| g.qos.is_some());
    if !granted.is_empty() {
        let granted: Vec<_> = granted
            .iter()
            .filter_map(|g| g.qos.map(|qos| format!("{} (QoS: {})", g.topic, qos)))
            .collect();
        info!("Successfully subscribed to topics: {}", granted.join(", "));
    }
    for grant in refused {
        warn!("Broker refused subscription to {}", grant.topic);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        mock::{MockBroker, MockHashStore},
        ReconnectPolicy, StoreConnector,
    };

    async fn relay(store: &MockHashStore) -> MessageRelay<MockHashStore> {
        let connector = StoreConnector::new(store.clone(), "mqtt:", ReconnectPolicy::store());
        connector.connect().await.unwrap();
        MessageRelay::new(connector)
    }

    fn topics() -> Topics {
        Topics::parse("a/b/c,d/e")
    }

    #[tokio::test]
    async fn monitored_topics_are_a_copy() {
        let store = MockHashStore::new();
        let mut handle = BrokerConnector::initialize(
            MockBroker::new(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        let mut copy = handle.monitored_topics();
        copy.push("x".to_owned());
        copy[0].push_str("/mutated");
        assert_eq!(handle.monitored_topics(), vec!["a/b/c", "d/e"]);
        handle.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn subscribes_once_per_connect_and_relays() {
        let store = MockHashStore::new();
        let broker = MockBroker::new();
        let mut handle = BrokerConnector::initialize(
            broker.clone(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        broker.wait_for_subscriptions(1).await;
        assert_eq!(broker.subscriptions(), vec![vec!["a/b/c", "d/e"]]);
        assert!(handle.state().is_connected());

        broker.publish("a/b/c", Bytes::from_static(b"37.5"));
        store.wait_for_writes(2).await;
        assert_eq!(store.field("mqtt:a/b/c", "latest").await.as_deref(), Some("37.5"));

        handle.disconnect().await.unwrap();
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn bad_message_keeps_connection() {
        let store = MockHashStore::new();
        let broker = MockBroker::new();
        let mut handle = BrokerConnector::initialize(
            broker.clone(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        broker.wait_for_subscriptions(1).await;
        broker.publish("a/b/c", Bytes::from_static(&[0xff]));
        broker.publish("d/e", Bytes::from_static(b"ok"));
        store.wait_for_writes(2).await;
        assert!(store.hash("mqtt:a/b/c").await.is_none());
        assert_eq!(store.field("mqtt:d/e", "latest").await.as_deref(), Some("ok"));
        assert_eq!(broker.dials(), 1);
        assert!(handle.state().is_connected());
        handle.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_resubscribes_once_after_delay() {
        let store = MockHashStore::new();
        let broker = MockBroker::new();
        let mut handle = BrokerConnector::initialize(
            broker.clone(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        broker.wait_for_subscriptions(1).await;

        let lost_at = Instant::now();
        broker.fail();
        broker.wait_for_subscriptions(2).await;
        let elapsed = lost_at.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        // resumable links are reconnected in place
        assert_eq!(broker.dials(), 1);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(broker.subscriptions().len(), 2);
        assert!(handle.state().is_connected());
        handle.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn non_resumable_link_is_replaced() {
        let store = MockHashStore::new();
        let broker = MockBroker::non_resumable();
        let mut handle = BrokerConnector::initialize(
            broker.clone(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        broker.wait_for_subscriptions(1).await;
        broker.close();
        broker.wait_for_subscriptions(2).await;
        assert_eq!(broker.dials(), 2);
        assert_eq!(broker.live_links(), 1);
        handle.disconnect().await.unwrap();
        assert_eq!(broker.live_links(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_retries_forever() {
        let store = MockHashStore::new();
        let broker = MockBroker::new();
        broker.refuse_connections();
        let mut handle = BrokerConnector::initialize(
            broker.clone(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        sleep(Duration::from_secs(5 * 20 + 1)).await;
        assert!(broker.polls_refused() > 20);
        broker.accept_connections();
        broker.wait_for_subscriptions(1).await;
        assert!(handle.state().is_connected());
        handle.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_when_not_connected_is_immediate() {
        let store = MockHashStore::new();
        let broker = MockBroker::new();
        broker.refuse_connections();
        let mut handle = BrokerConnector::initialize(
            broker.clone(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        handle.disconnect().await.unwrap();
        assert_eq!(broker.disconnects(), 0);
        // a second call is a no-op
        handle.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn stalled_write_does_not_block_disconnect() {
        let store = MockHashStore::new();
        let broker = MockBroker::new();
        let mut handle = BrokerConnector::initialize(
            broker.clone(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        broker.wait_for_subscriptions(1).await;
        store.set_write_delay(Duration::from_secs(3600)).await;
        broker.publish("a/b/c", Bytes::from_static(b"37.5"));
        sleep(Duration::from_millis(100)).await;

        let disconnect = timeout(Duration::from_secs(3), handle.disconnect()).await;
        assert!(matches!(disconnect, Ok(Ok(()))));
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_disconnect_is_reported() {
        let store = MockHashStore::new();
        let broker = MockBroker::new();
        broker.fail_disconnects();
        let mut handle = BrokerConnector::initialize(
            broker.clone(),
            &BrokerOptions::default(),
            topics(),
            relay(&store).await,
        );
        broker.wait_for_subscriptions(1).await;
        assert!(matches!(
            handle.disconnect().await,
            Err(BrokerError::Disconnect(_))
        ));
    }
}
