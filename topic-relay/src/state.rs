//! Connection lifecycle shared by both connectors.
//!
//! A transport can report the same loss more than once (an `error` closely
//! followed by a `close`). [ConnectionTracker] folds these into a single
//! episode so that exactly one reconnect is scheduled per loss.

use std::fmt;

use tokio::sync::watch;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The transport reported a failure.
    Error,
    /// The transport closed cleanly or was closed by the peer.
    Closed,
    Reconnecting,
    /// No further attempts will be made.
    Terminated,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Finite state machine over [ConnectionState] with a "reconnect pending"
/// guard. Observers can follow transitions through [subscribe](Self::subscribe).
#[derive(Debug)]
pub struct ConnectionTracker {
    name: &'static str,
    state: watch::Sender<ConnectionState>,
    reconnect_pending: bool,
}

impl ConnectionTracker {
    pub fn new(name: &'static str) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name,
            state,
            reconnect_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    fn set(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            trace!("{} connection {} -> {}", self.name, prev, next);
        }
    }

    pub fn connecting(&mut self) {
        self.set(ConnectionState::Connecting);
    }

    pub fn connected(&mut self) {
        self.reconnect_pending = false;
        self.set(ConnectionState::Connected);
    }

    /// Record a transport failure. Returns `true` if the caller should
    /// schedule a reconnect, i.e. this is the first signal of the episode.
    pub fn errored(&mut self) -> bool {
        self.lost(ConnectionState::Error)
    }

    /// Record a closed transport. Same contract as [errored](Self::errored).
    pub fn closed(&mut self) -> bool {
        self.lost(ConnectionState::Closed)
    }

    fn lost(&mut self, next: ConnectionState) -> bool {
        if self.state() == ConnectionState::Terminated {
            return false;
        }
        self.set(next);
        if self.reconnect_pending {
            false
        } else {
            self.reconnect_pending = true;
            true
        }
    }

    /// The scheduled attempt is firing; the episode is over.
    pub fn reconnecting(&mut self) {
        self.reconnect_pending = false;
        self.set(ConnectionState::Reconnecting);
    }

    /// Deliberately disconnected by the owner. A terminated connection stays
    /// terminated.
    pub fn disconnected(&mut self) {
        self.reconnect_pending = false;
        if self.state() != ConnectionState::Terminated {
            self.set(ConnectionState::Disconnected);
        }
    }

    pub fn terminate(&mut self) {
        self.reconnect_pending = false;
        self.set(ConnectionState::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_reconnect_per_episode() {
        let mut tracker = ConnectionTracker::new("test");
        tracker.connecting();
        tracker.connected();
        assert!(tracker.errored());
        assert!(!tracker.closed());
        assert!(!tracker.errored());
        assert_eq!(tracker.state(), ConnectionState::Error);
        assert!(tracker.is_reconnect_pending());
    }

    #[test]
    fn new_episode_after_attempt() {
        let mut tracker = ConnectionTracker::new("test");
        assert!(tracker.closed());
        tracker.reconnecting();
        assert!(tracker.errored());
        tracker.reconnecting();
        tracker.connected();
        assert!(tracker.closed());
    }

    #[test]
    fn terminated_never_reschedules() {
        let mut tracker = ConnectionTracker::new("test");
        tracker.terminate();
        assert!(!tracker.errored());
        assert!(!tracker.closed());
        assert_eq!(tracker.state(), ConnectionState::Terminated);
    }

    #[tokio::test]
    async fn observers_see_transitions() {
        let mut tracker = ConnectionTracker::new("test");
        let mut rx = tracker.subscribe();
        tracker.connected();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_connected());
        tracker.closed();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Closed);
    }
}
