//! Lifecycle states of connections and channels.
//!
//! Both follow `Opening → Open → Closing → Closed`, with `Open → Closed` directly on
//! fatal errors. No transition leaves `Closed`.
use std::fmt;

use tokio::sync::watch;

/// A lifecycle whose legal transitions are known.
pub trait Lifecycle: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    fn can_transition_to(self, next: Self) -> bool;

    fn is_closed(self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl Lifecycle for ConnectionState {
    fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closed) | (Open, Closing) | (Open, Closed) | (Closing, Closed)
        )
    }

    fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Open => f.write_str("open"),
            ConnectionState::Closing => f.write_str("closing"),
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Open,
    Closing,
    Closed,
}

impl Lifecycle for ChannelState {
    fn can_transition_to(self, next: Self) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Opening, Open) | (Opening, Closed) | (Open, Closing) | (Open, Closed) | (Closing, Closed)
        )
    }

    fn is_closed(self) -> bool {
        self == ChannelState::Closed
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChannelState::Opening => f.write_str("opening"),
            ChannelState::Open => f.write_str("open"),
            ChannelState::Closing => f.write_str("closing"),
            ChannelState::Closed => f.write_str("closed"),
        }
    }
}

/// Observable state that only moves along legal transitions.
pub(crate) struct StateCell<S> {
    tx: watch::Sender<S>,
}

impl<S: Lifecycle> StateCell<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> S {
        *self.tx.borrow()
    }

    /// Move to `next`. Return false and leave the state unchanged if the transition is illegal.
    pub fn transition(&self, next: S) -> bool {
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Wait until the state is closed.
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        loop {
            if rx.borrow_and_update().is_closed() {
                return;
            }
            // sender is `self`, can not be dropped while waiting
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl<S: Lifecycle> fmt::Debug for StateCell<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("StateCell").field(&self.get()).finish()
    }
}
