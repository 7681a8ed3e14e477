use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{watch, Mutex},
    time::sleep,
};

use crate::{
    mock::MockError,
    store::{HashConnection, StoreDriver, StoreError},
};

/// One `HSET` as seen by the mock, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub key: String,
    pub field: String,
    pub value: String,
}

#[derive(Debug)]
struct MockStoreState {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    writes: Mutex<Vec<MockWrite>>,
    write_count: watch::Sender<usize>,
    write_delay: Mutex<Duration>,
    connect_attempts: AtomicU32,
    /// Number of upcoming connects to refuse.
    failing_connects: AtomicU32,
    refuse_all: AtomicBool,
    /// Connections opened under an older generation are broken.
    generation: AtomicU64,
    quits: AtomicU32,
    pings: AtomicU32,
}

/// An in-memory hash store. Clones share their contents, so a test can keep
/// one to inspect while a connector owns another.
#[derive(Debug, Clone)]
pub struct MockHashStore {
    state: Arc<MockStoreState>,
}

impl Default for MockHashStore {
    fn default() -> Self {
        let (write_count, _) = watch::channel(0);
        Self {
            state: Arc::new(MockStoreState {
                hashes: Default::default(),
                writes: Default::default(),
                write_count,
                write_delay: Default::default(),
                connect_attempts: Default::default(),
                failing_connects: Default::default(),
                refuse_all: Default::default(),
                generation: Default::default(),
                quits: Default::default(),
                pings: Default::default(),
            }),
        }
    }
}

impl MockHashStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_connects(&self, n: u32) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Refuse every connection attempt until [accept_connections](Self::accept_connections).
    pub fn refuse_connections(&self) {
        self.state.refuse_all.store(true, Ordering::SeqCst);
    }

    pub fn accept_connections(&self) {
        self.state.refuse_all.store(false, Ordering::SeqCst);
    }

    /// Every connection opened so far fails its next command.
    pub fn break_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Delay applied before each write lands.
    pub async fn set_write_delay(&self, delay: Duration) {
        *self.state.write_delay.lock().await = delay;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> u32 {
        self.state.quits.load(Ordering::SeqCst)
    }

    /// Health check round trips answered so far.
    pub fn pings(&self) -> u32 {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub async fn writes(&self) -> Vec<MockWrite> {
        self.state.writes.lock().await.clone()
    }

    /// Wait until at least `n` writes have landed.
    pub async fn wait_for_writes(&self, n: usize) {
        let mut count = self.state.write_count.subscribe();
        // the sender is owned by `self`, it can't be dropped while we wait
        let _ = count.wait_for(|count| *count >= n).await;
    }

    pub async fn hash(&self, key: &str) -> Option<HashMap<String, String>> {
        self.state.hashes.lock().await.get(key).cloned()
    }

    pub async fn field(&self, key: &str, field: &str) -> Option<String> {
        self.state
            .hashes
            .lock()
            .await
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned()
    }
}

#[async_trait::async_trait]
impl StoreDriver for MockHashStore {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<Self::Connection, StoreError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .state
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || self.state.refuse_all.load(Ordering::SeqCst) {
            return Err(StoreError::connection(MockError::ConnectionRefused));
        }
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
        })
    }

    fn endpoint(&self) -> String {
        "mock://store".to_owned()
    }
}

#[derive(Debug)]
pub struct MockConnection {
    state: Arc<MockStoreState>,
    generation: u64,
}

impl MockConnection {
    fn check(&self) -> Result<(), StoreError> {
        if self.generation != self.state.generation.load(Ordering::SeqCst) {
            return Err(StoreError::connection(MockError::ConnectionBroken));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HashConnection for MockConnection {
    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        let delay = *self.state.write_delay.lock().await;
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.state
            .hashes
            .lock()
            .await
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        let mut writes = self.state.writes.lock().await;
        writes.push(MockWrite {
            key: key.to_owned(),
            field: field.to_owned(),
            value: value.to_owned(),
        });
        self.state.write_count.send_replace(writes.len());
        Ok(())
    }

    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self
            .state
            .hashes
            .lock()
            .await
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        Ok(self
            .state
            .hashes
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.check()?;
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn quit(self) -> Result<(), StoreError> {
        self.state.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
