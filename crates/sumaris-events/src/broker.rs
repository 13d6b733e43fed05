//! # Message Broker
//!
//! The port producers send to and consumers subscribe through, plus the
//! in-process implementation used for single-node deployments and tests.
//! Persistence, redelivery and cross-process ordering belong to whatever
//! broker sits behind the port.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sumaris_types::BrokerMessage;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::selector::MessageSelector;
use crate::subscription::BrokerSubscription;
use crate::DEFAULT_CHANNEL_CAPACITY;

/// Errors from broker operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker was closed.
    #[error("Broker closed")]
    Closed,

    /// The destination name is blank.
    #[error("Invalid destination: {0:?}")]
    InvalidDestination(String),

    /// The underlying transport rejected the message.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Trait for sending messages to, and subscribing on, broker destinations.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Send a message to its destination.
    ///
    /// # Returns
    ///
    /// The number of active subscriptions the message was handed to.
    async fn send(&self, message: BrokerMessage) -> Result<usize, BrokerError>;

    /// Subscribe to messages on `destination` matching `selector`.
    fn subscribe(&self, destination: &str, selector: MessageSelector) -> BrokerSubscription;

    /// Get the total number of messages sent.
    fn messages_sent(&self) -> u64;
}

/// In-memory implementation of the broker.
///
/// Uses one `tokio::sync::broadcast` channel per destination, created on
/// first use. Suitable for single-node operation; distributed deployments
/// plug a networked broker behind the same trait.
pub struct InMemoryBroker {
    /// Broadcast sender per destination.
    channels: DashMap<String, broadcast::Sender<Arc<BrokerMessage>>>,

    /// Total messages sent.
    messages_sent: AtomicU64,

    /// Set once `close` was called.
    closed: AtomicBool,

    /// Channel capacity.
    capacity: usize,
}

impl InMemoryBroker {
    /// Create a new in-memory broker with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory broker with specified capacity.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            messages_sent: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, destination: &str) -> broadcast::Sender<Arc<BrokerMessage>> {
        self.channels
            .entry(destination.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Get the number of active subscriptions on a destination.
    #[must_use]
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.channels
            .get(destination)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Close every destination. Open subscriptions drain and then end;
    /// later sends fail with [`BrokerError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.clear();
        debug!("In-memory broker closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send(&self, message: BrokerMessage) -> Result<usize, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if message.destination.trim().is_empty() {
            return Err(BrokerError::InvalidDestination(message.destination));
        }

        self.messages_sent.fetch_add(1, Ordering::Relaxed);

        let destination = message.destination.clone();
        let message_id = message.message_id;
        match self.sender(&destination).send(Arc::new(message)) {
            Ok(receiver_count) => {
                debug!(
                    destination = %destination,
                    message_id = %message_id,
                    receivers = receiver_count,
                    "Message sent"
                );
                Ok(receiver_count)
            }
            Err(_) => {
                // No receivers - message is dropped
                warn!(
                    destination = %destination,
                    message_id = %message_id,
                    "Message dropped (no subscribers)"
                );
                Ok(0)
            }
        }
    }

    fn subscribe(&self, destination: &str, selector: MessageSelector) -> BrokerSubscription {
        let receiver = if self.is_closed() {
            // Sender dropped immediately: the subscription starts closed
            broadcast::channel(1).0.subscribe()
        } else {
            self.sender(destination).subscribe()
        };

        debug!(destination = %destination, selector = ?selector, "New subscription created");

        BrokerSubscription::new(receiver, destination, selector)
    }

    fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}
