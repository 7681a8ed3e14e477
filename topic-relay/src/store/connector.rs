use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::Duration,
};

use tokio::{
    select,
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    constants::{STORE_COMMAND_TIMEOUT, STORE_HEALTH_CHECK_INTERVAL},
    policy::ReconnectPolicy,
    state::{ConnectionState, ConnectionTracker},
    store::{HashConnection, StoreDriver, StoreError},
};

/// Owns the one connection to a hash store. Cheap to clone; clones share the
/// connection.
///
/// Every command is bounded by a timeout, and an idle connection is pinged
/// periodically, so a dead store is noticed even without traffic.
pub struct StoreConnector<D: StoreDriver> {
    shared: Arc<Shared<D>>,
}

impl<D: StoreDriver> Clone for StoreConnector<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<D: StoreDriver> {
    driver: D,
    key_prefix: String,
    policy: ReconnectPolicy,
    command_timeout: Duration,
    health_check_interval: Duration,
    /// `None` whenever there is no usable connection.
    slot: Mutex<Option<D::Connection>>,
    tracker: Mutex<ConnectionTracker>,
    state: watch::Receiver<ConnectionState>,
    reconnect_task: Mutex<Option<BackgroundTask>>,
    health_task: Mutex<Option<BackgroundTask>>,
}

struct BackgroundTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Cancel and wait for the task to finish.
    async fn stop(self, name: &str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Store {} task ended abnormally: {}", name, e);
        }
    }
}

/// Run a command against the store, giving up after `limit`.
async fn bounded<T>(
    limit: Duration,
    command: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    timeout(limit, command)
        .await
        .unwrap_or(Err(StoreError::Timeout(limit)))
}

impl<D: StoreDriver> StoreConnector<D> {
    pub fn new(driver: D, key_prefix: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let tracker = ConnectionTracker::new("store");
        let state = tracker.subscribe();
        Self {
            shared: Arc::new(Shared {
                driver,
                key_prefix: key_prefix.into(),
                policy,
                command_timeout: STORE_COMMAND_TIMEOUT,
                health_check_interval: STORE_HEALTH_CHECK_INTERVAL,
                slot: Mutex::new(None),
                tracker: Mutex::new(tracker),
                state,
                reconnect_task: Mutex::new(None),
                health_task: Mutex::new(None),
            }),
        }
    }

    pub fn driver(&self) -> &D {
        &self.shared.driver
    }

    pub fn key_prefix(&self) -> &str {
        &self.shared.key_prefix
    }

    /// The namespaced key for `key`.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.shared.key_prefix, key)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.clone()
    }

    /// Resolves once the connector has given up reconnecting for good.
    pub async fn terminated(&self) {
        let mut state = self.watch_state();
        // The sender lives as long as `self`, so this can't fail while we
        // hold a reference.
        let _ = state
            .wait_for(|state| *state == ConnectionState::Terminated)
            .await;
    }

    /// Connect if not already connected. A failed first attempt is retried
    /// according to the reconnect policy, and exhausting it is fatal.
    pub async fn connect(&self) -> Result<(), StoreError> {
        if self.shared.slot.lock().await.is_some() {
            return Ok(());
        }
        info!("Connecting to store at {}", self.shared.driver.endpoint());
        self.shared.tracker.lock().await.connecting();
        if let Err(e) = self.shared.attempt().await {
            error!("Store client error: {}", e);
            self.shared.tracker.lock().await.errored();
            self.shared.reconnect(&CancellationToken::new()).await?;
        }
        self.start_health_check().await;
        Ok(())
    }

    /// Close the connection if there is one, and stop any reconnect in
    /// progress. Calling this while disconnected does nothing.
    pub async fn disconnect(&self) -> Result<(), StoreError> {
        let health_task = self.shared.health_task.lock().await.take();
        if let Some(task) = health_task {
            task.stop("health check").await;
        }
        let reconnect_task = self.shared.reconnect_task.lock().await.take();
        if let Some(task) = reconnect_task {
            task.stop("reconnect").await;
            self.shared.tracker.lock().await.disconnected();
        }
        let Some(connection) = self.shared.slot.lock().await.take() else {
            return Ok(());
        };
        let result = bounded(self.shared.command_timeout, connection.quit()).await;
        self.shared.tracker.lock().await.disconnected();
        info!("Store connection closed");
        result
    }

    /// Write `value` into `field` of the hash at `prefix + key`.
    pub async fn set_hash(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let full_key = self.full_key(key);
        let mut slot = self.shared.slot.lock().await;
        let connection = slot.as_mut().ok_or(StoreError::NotConnected)?;
        let result = bounded(
            self.shared.command_timeout,
            connection.hset(&full_key, field, value),
        )
        .await;
        match result {
            Ok(()) => {
                debug!("Updated store hash {} field {}", full_key, field);
                Ok(())
            }
            Err(e) => {
                if e.is_connection() {
                    slot.take();
                    drop(slot);
                    self.shared.connection_lost().await;
                }
                Err(e)
            }
        }
    }

    pub async fn get_hash(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let full_key = self.full_key(key);
        let mut slot = self.shared.slot.lock().await;
        let connection = slot.as_mut().ok_or(StoreError::NotConnected)?;
        let result = bounded(self.shared.command_timeout, connection.hget(&full_key, field)).await;
        if matches!(&result, Err(e) if e.is_connection()) {
            slot.take();
            drop(slot);
            self.shared.connection_lost().await;
        }
        result
    }

    pub async fn get_all_hash_fields(
        &self,
        key: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        let full_key = self.full_key(key);
        let mut slot = self.shared.slot.lock().await;
        let connection = slot.as_mut().ok_or(StoreError::NotConnected)?;
        let result = bounded(self.shared.command_timeout, connection.hgetall(&full_key)).await;
        if matches!(&result, Err(e) if e.is_connection()) {
            slot.take();
            drop(slot);
            self.shared.connection_lost().await;
        }
        result
    }

    /// Ping the store every interval for as long as the connector lives,
    /// until disconnected or terminated.
    async fn start_health_check(&self) {
        let mut health_task = self.shared.health_task.lock().await;
        if health_task.is_some() {
            return;
        }
        let shared = Arc::downgrade(&self.shared);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = self.shared.health_check_interval;
        let handle = tokio::spawn(async move {
            loop {
                select! {
                    _ = token.cancelled() => return,
                    _ = sleep(interval) => {}
                }
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                if *shared.state.borrow() == ConnectionState::Terminated {
                    return;
                }
                select! {
                    _ = token.cancelled() => return,
                    _ = shared.health_check() => {}
                }
            }
        });
        *health_task = Some(BackgroundTask { cancel, handle });
    }
}

impl<D: StoreDriver> Shared<D> {
    /// One connection attempt, installing the connection on success.
    async fn attempt(&self) -> Result<(), StoreError> {
        let connection = self.driver.connect().await?;
        let mut slot = self.slot.lock().await;
        if slot.is_none() {
            *slot = Some(connection);
        }
        drop(slot);
        self.tracker.lock().await.connected();
        info!("Connected to store");
        Ok(())
    }

    /// `PING` the current connection, if any. A connection-level failure is
    /// handled exactly like one during a command.
    async fn health_check(self: &Arc<Self>) {
        let mut slot = self.slot.lock().await;
        let Some(connection) = slot.as_mut() else {
            return;
        };
        match bounded(self.command_timeout, connection.ping()).await {
            Ok(()) => {}
            Err(e) if e.is_connection() => {
                warn!("Store health check failed: {}", e);
                slot.take();
                drop(slot);
                self.connection_lost().await;
            }
            Err(e) => warn!("Store health check failed: {}", e),
        }
    }

    /// The connection broke underneath a command. Start reconnecting in the
    /// background unless that's already happening.
    async fn connection_lost(self: &Arc<Self>) {
        if !self.tracker.lock().await.errored() {
            return;
        }
        warn!("Store connection lost");
        let shared = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            match shared.reconnect(&token).await {
                Err(e) if !token.is_cancelled() => error!("Store reconnect stopped: {}", e),
                _ => {}
            }
        });
        *self.reconnect_task.lock().await = Some(BackgroundTask { cancel, handle });
    }

    async fn reconnect(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            let Some(delay) = self.policy.delay_for(attempt) else {
                error!("Max store reconnection attempts reached. Giving up.");
                self.tracker.lock().await.terminate();
                return Err(StoreError::ReconnectExhausted(attempt - 1));
            };
            match self.policy.max_attempts {
                Some(max) => info!(
                    "Attempting to reconnect to store in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    attempt,
                    max
                ),
                None => info!(
                    "Attempting to reconnect to store in {}ms (attempt {})",
                    delay.as_millis(),
                    attempt
                ),
            }
            select! {
                _ = cancel.cancelled() => return Err(StoreError::NotConnected),
                _ = sleep(delay) => {}
            }
            self.tracker.lock().await.reconnecting();
            info!("Reconnecting to store...");
            let result = select! {
                _ = cancel.cancelled() => return Err(StoreError::NotConnected),
                result = self.attempt() => result,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("Store client error: {}", e);
                    self.tracker.lock().await.errored();
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::mock::MockHashStore;

    fn connector(store: &MockHashStore) -> StoreConnector<MockHashStore> {
        StoreConnector::new(store.clone(), "mqtt:", ReconnectPolicy::store())
    }

    #[tokio::test]
    async fn write_requires_connection() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        let res = connector.set_hash("a/b", "latest", "1").await;
        assert!(matches!(res, Err(StoreError::NotConnected)));
        assert_eq!(store.connect_attempts(), 0);
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn write_is_namespaced() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();
        connector.set_hash("a/b", "latest", "1").await.unwrap();
        assert_eq!(
            store.field("mqtt:a/b", "latest").await.as_deref(),
            Some("1")
        );
        assert_eq!(
            connector.get_hash("a/b", "latest").await.unwrap().as_deref(),
            Some("1")
        );
        let all = connector.get_all_hash_fields("a/b").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn connect_and_disconnect_are_idempotent() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();
        connector.connect().await.unwrap();
        assert_eq!(store.connect_attempts(), 1);
        assert!(connector.state().is_connected());

        connector.disconnect().await.unwrap();
        connector.disconnect().await.unwrap();
        assert_eq!(store.quits(), 1);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert!(matches!(
            connector.set_hash("a", "b", "c").await,
            Err(StoreError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_connect_gives_up_after_five_retries() {
        let store = MockHashStore::new();
        store.refuse_connections();
        let connector = connector(&store);
        let start = Instant::now();
        let res = connector.connect().await;
        assert!(matches!(res, Err(StoreError::ReconnectExhausted(5))));
        // the first attempt plus five retries, never a sixth
        assert_eq!(store.connect_attempts(), 6);
        // 1s + 2s + 3s + 4s + 5s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16));
        assert_eq!(connector.state(), ConnectionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_use_linear_delays() {
        let store = MockHashStore::new();
        store.fail_connects(3);
        let connector = connector(&store);
        let start = Instant::now();
        connector.connect().await.unwrap();
        assert_eq!(store.connect_attempts(), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
        assert!(connector.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn broken_connection_reconnects_in_background() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();

        store.break_connections();
        let res = connector.set_hash("t", "latest", "1").await;
        assert!(matches!(res, Err(StoreError::Connection(_))));
        assert_eq!(connector.state(), ConnectionState::Error);
        // nothing is buffered while the connection is down
        assert!(matches!(
            connector.set_hash("t", "latest", "2").await,
            Err(StoreError::NotConnected)
        ));

        let mut state = connector.watch_state();
        state.wait_for(|s| s.is_connected()).await.unwrap();
        assert_eq!(store.connect_attempts(), 2);
        connector.set_hash("t", "latest", "3").await.unwrap();
        assert_eq!(store.field("mqtt:t", "latest").await.as_deref(), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn background_reconnect_exhaustion_terminates() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();

        store.break_connections();
        store.refuse_connections();
        let _ = connector.set_hash("t", "latest", "1").await;
        connector.terminated().await;
        // one initial connect plus five retries
        assert_eq!(store.connect_attempts(), 6);
        assert_eq!(connector.state(), ConnectionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_reconnect() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();
        store.break_connections();
        store.refuse_connections();
        let _ = connector.set_hash("t", "latest", "1").await;

        connector.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.connect_attempts(), 1);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out_and_reconnects() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();
        store.set_write_delay(Duration::from_secs(3600)).await;

        let start = Instant::now();
        let res = connector.set_hash("t", "latest", "1").await;
        assert!(matches!(res, Err(StoreError::Timeout(_))));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        assert_eq!(connector.state(), ConnectionState::Error);

        store.set_write_delay(Duration::ZERO).await;
        let mut state = connector.watch_state();
        state.wait_for(|s| s.is_connected()).await.unwrap();
        assert_eq!(store.connect_attempts(), 2);
        connector.set_hash("t", "latest", "2").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_pinged() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(store.pings(), 3);
        assert!(connector.state().is_connected());

        connector.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.pings(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_loss_is_noticed() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();

        store.break_connections();
        let mut state = connector.watch_state();
        state
            .wait_for(|s| *s == ConnectionState::Error)
            .await
            .unwrap();
        state.wait_for(|s| s.is_connected()).await.unwrap();
        assert_eq!(store.connect_attempts(), 2);
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_store_exhaustion_terminates() {
        let store = MockHashStore::new();
        let connector = connector(&store);
        connector.connect().await.unwrap();

        store.break_connections();
        store.refuse_connections();
        connector.terminated().await;
        assert_eq!(store.connect_attempts(), 6);
        assert!(store.writes().await.is_empty());
    }
}
