use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::{
    broker::{BrokerDialer, BrokerError, BrokerEvent, BrokerLink, SubscriptionGrant},
    mock::MockError,
};

#[derive(Debug)]
enum Injected {
    Event(BrokerEvent),
    Close,
    Fail,
}

#[derive(Debug)]
struct MockBrokerState {
    resumable: bool,
    refuse_all: AtomicBool,
    fail_disconnects: AtomicBool,
    /// Inbox of the most recently dialed link.
    current: Mutex<Option<mpsc::UnboundedSender<Injected>>>,
    subscriptions: Mutex<Vec<Vec<String>>>,
    subscription_count: watch::Sender<usize>,
    dial_count: watch::Sender<u32>,
    polls_refused: AtomicU32,
    disconnects: AtomicU32,
    live_links: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A broker living in memory. Each dialed link connects on its first poll
/// unless connections are refused; events injected through the broker go to
/// the most recently dialed link.
#[derive(Debug, Clone)]
pub struct MockBroker {
    state: Arc<MockBrokerState>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::with_resume(true)
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Default::default()
    }

    /// A broker whose links must be re-dialed after every loss.
    pub fn non_resumable() -> Self {
        Self::with_resume(false)
    }

    fn with_resume(resumable: bool) -> Self {
        let (subscription_count, _) = watch::channel(0);
        let (dial_count, _) = watch::channel(0);
        Self {
            state: Arc::new(MockBrokerState {
                resumable,
                refuse_all: Default::default(),
                fail_disconnects: Default::default(),
                current: Default::default(),
                subscriptions: Default::default(),
                subscription_count,
                dial_count,
                polls_refused: Default::default(),
                disconnects: Default::default(),
                live_links: Default::default(),
            }),
        }
    }

    pub fn refuse_connections(&self) {
        self.state.refuse_all.store(true, Ordering::SeqCst);
    }

    pub fn accept_connections(&self) {
        self.state.refuse_all.store(false, Ordering::SeqCst);
    }

    /// Make every disconnect request fail.
    pub fn fail_disconnects(&self) {
        self.state.fail_disconnects.store(true, Ordering::SeqCst);
    }

    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) {
        self.inject(Injected::Event(BrokerEvent::Publish {
            topic: topic.to_owned(),
            payload: payload.into(),
        }));
    }

    /// Close the current connection cleanly.
    pub fn close(&self) {
        self.inject(Injected::Close);
    }

    /// Break the current connection.
    pub fn fail(&self) {
        self.inject(Injected::Fail);
    }

    fn inject(&self, injected: Injected) {
        if let Some(inbox) = lock(&self.state.current).as_ref() {
            let _ = inbox.send(injected);
        }
    }

    pub fn dials(&self) -> u32 {
        *self.state.dial_count.borrow()
    }

    pub async fn wait_for_dials(&self, n: u32) {
        let mut count = self.state.dial_count.subscribe();
        let _ = count.wait_for(|count| *count >= n).await;
    }

    /// Every subscribe request received, in order.
    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        lock(&self.state.subscriptions).clone()
    }

    pub async fn wait_for_subscriptions(&self, n: usize) {
        let mut count = self.state.subscription_count.subscribe();
        let _ = count.wait_for(|count| *count >= n).await;
    }

    pub fn polls_refused(&self) -> u32 {
        self.state.polls_refused.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Links dialed and not yet dropped.
    pub fn live_links(&self) -> u32 {
        self.state.live_links.load(Ordering::SeqCst)
    }
}

impl BrokerDialer for MockBroker {
    type Link = MockLink;

    fn dial(&self) -> MockLink {
        let (inbox, events) = mpsc::unbounded_channel();
        *lock(&self.state.current) = Some(inbox.clone());
        self.state.dial_count.send_modify(|count| *count += 1);
        self.state.live_links.fetch_add(1, Ordering::SeqCst);
        MockLink {
            state: Arc::clone(&self.state),
            inbox,
            events,
            connected: false,
        }
    }

    fn endpoint(&self) -> String {
        "mock://broker".to_owned()
    }
}

#[derive(Debug)]
pub struct MockLink {
    state: Arc<MockBrokerState>,
    inbox: mpsc::UnboundedSender<Injected>,
    events: mpsc::UnboundedReceiver<Injected>,
    connected: bool,
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn poll(&mut self) -> Result<BrokerEvent, BrokerError> {
        if !self.connected {
            if self.state.refuse_all.load(Ordering::SeqCst) {
                self.state.polls_refused.fetch_add(1, Ordering::SeqCst);
                return Err(BrokerError::connection(MockError::ConnectionRefused));
            }
            self.connected = true;
            return Ok(BrokerEvent::Connected);
        }
        match self.events.recv().await {
            Some(Injected::Event(event)) => Ok(event),
            Some(Injected::Close) => {
                self.connected = false;
                Ok(BrokerEvent::Closed)
            }
            Some(Injected::Fail) => {
                self.connected = false;
                Err(BrokerError::connection(MockError::ConnectionBroken))
            }
            None => Err(BrokerError::connection(MockError::LinkClosed)),
        }
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::subscribe(MockError::LinkClosed));
        }
        let count = {
            let mut subscriptions = lock(&self.state.subscriptions);
            subscriptions.push(topics.to_vec());
            subscriptions.len()
        };
        let grants = topics
            .iter()
            .map(|topic| SubscriptionGrant {
                topic: topic.clone(),
                qos: Some(0),
            })
            .collect();
        let _ = self
            .inbox
            .send(Injected::Event(BrokerEvent::Subscribed(grants)));
        self.state.subscription_count.send_replace(count);
        Ok(())
    }

    fn can_resume(&self) -> bool {
        self.state.resumable
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_disconnects.load(Ordering::SeqCst) {
            return Err(BrokerError::disconnect(MockError::DisconnectFailed));
        }
        self.connected = false;
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.state.live_links.fetch_sub(1, Ordering::SeqCst);
    }
}
