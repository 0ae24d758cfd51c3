//! Non-blocking outbound bus for normalized market data
//!
//! Producers on the synchronization hot path hand messages to a bounded
//! crossbeam channel and never wait. A forwarding task owned by the external
//! message-bus client drains the other end and takes care of delivery and
//! retries.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

use crossbeam::channel;
use std::time::Duration;
use thiserror::Error;

/// Marker for payloads carried by the bus
pub trait Message: Send + Sync + 'static {}

/// Errors returned by bus operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// Bus is at capacity, message was not enqueued
    #[error("Bus capacity exceeded")]
    Full,

    /// All receivers (or all senders) are gone
    #[error("Bus disconnected")]
    Disconnected,
}

impl<T> From<channel::TrySendError<T>> for BusError {
    fn from(err: channel::TrySendError<T>) -> Self {
        match err {
            channel::TrySendError::Full(_) => Self::Full,
            channel::TrySendError::Disconnected(_) => Self::Disconnected,
        }
    }
}

impl From<channel::RecvError> for BusError {
    fn from(_: channel::RecvError) -> Self {
        Self::Disconnected
    }
}

/// Producer side of the bus
pub trait Publisher<T: Message>: Send + Sync {
    /// Enqueue `msg` if there is room, otherwise fail immediately
    ///
    /// # Errors
    /// Returns `BusError::Full` if the bus is at capacity and
    /// `BusError::Disconnected` if nobody is listening any more
    fn publish(&self, msg: T) -> Result<(), BusError>;
}

/// Consumer side of the bus
pub trait Subscriber<T: Message> {
    /// Open a receiving handle
    ///
    /// # Errors
    /// Returns an error if the bus can no longer deliver
    fn subscribe(&self) -> Result<Receiver<T>, BusError>;
}

/// Handle that pulls queued messages off the bus
pub struct Receiver<T> {
    rx: channel::Receiver<T>,
}

impl<T> Receiver<T> {
    /// Wait for the next message
    ///
    /// # Errors
    /// Returns an error if the channel is disconnected
    #[must_use = "ignoring received messages defeats the purpose"]
    pub fn recv(&self) -> Result<T, BusError> {
        Ok(self.rx.recv()?)
    }

    /// Receive a message, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when the timeout elapses with nothing queued.
    ///
    /// # Errors
    /// Returns an error if the channel is disconnected
    #[must_use = "ignoring received messages defeats the purpose"]
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, BusError> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(channel::RecvTimeoutError::Disconnected) => Err(BusError::Disconnected),
        }
    }

    /// Next message if one is already queued
    ///
    /// # Errors
    /// Returns an error if the channel is disconnected
    #[must_use = "ignoring received messages defeats the purpose"]
    pub fn try_recv(&self) -> Result<Option<T>, BusError> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(channel::TryRecvError::Empty) => Ok(None),
            Err(channel::TryRecvError::Disconnected) => Err(BusError::Disconnected),
        }
    }

    /// Take everything currently queued
    #[must_use]
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// Number of queued messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Shared queue between orchestrators and the bus forwarder
pub struct Bus<T: Message> {
    tx: channel::Sender<T>,
    rx: channel::Receiver<T>,
}

impl<T: Message> Bus<T> {
    /// Bounded bus; publishing beyond `capacity` fails with `BusError::Full`
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self { tx, rx }
    }

    /// Bus without a capacity limit
    #[must_use]
    pub fn unbounded() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Producer handle, one per orchestrator
    #[must_use]
    pub fn publisher(&self) -> BusPublisher<T> {
        BusPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Consumer handle for the forwarder
    #[must_use]
    pub fn subscriber(&self) -> BusSubscriber<T> {
        BusSubscriber {
            rx: self.rx.clone(),
        }
    }
}

/// Cloneable producer handle
pub struct BusPublisher<T> {
    tx: channel::Sender<T>,
}

impl<T> Clone for BusPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Message> Publisher<T> for BusPublisher<T> {
    fn publish(&self, msg: T) -> Result<(), BusError> {
        self.tx.try_send(msg)?;
        Ok(())
    }
}

/// Cloneable consumer handle
pub struct BusSubscriber<T> {
    rx: channel::Receiver<T>,
}

impl<T> Clone for BusSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T: Message> Subscriber<T> for BusSubscriber<T> {
    fn subscribe(&self) -> Result<Receiver<T>, BusError> {
        Ok(Receiver {
            rx: self.rx.clone(),
        })
    }
}
