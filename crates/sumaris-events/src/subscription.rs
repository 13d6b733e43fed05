//! # Broker Subscriptions
//!
//! The receiving side of a broker destination.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use sumaris_telemetry::EVENTS_DROPPED;
use sumaris_types::BrokerMessage;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::selector::MessageSelector;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The broker was closed.
    #[error("Broker closed")]
    Closed,
}

/// Log and count messages a slow subscriber lost to channel overflow.
fn record_lag(destination: &str, count: u64) {
    warn!(
        destination = %destination,
        lagged = count,
        "Subscriber lagged, messages dropped"
    );
    EVENTS_DROPPED
        .with_label_values(&[destination, "lagged"])
        .inc_by(count as f64);
}

/// A subscription handle for receiving messages from one destination.
///
/// When dropped, the subscription is automatically cleaned up.
pub struct BrokerSubscription {
    /// The broadcast receiver. Taken by [`BrokerSubscription::into_stream`].
    receiver: Option<broadcast::Receiver<Arc<BrokerMessage>>>,

    /// Destination this subscription listens to.
    destination: String,

    /// Selector for this subscription.
    selector: MessageSelector,
}

impl BrokerSubscription {
    /// Wrap a broadcast receiver fed by a broker adapter.
    #[must_use]
    pub fn new(
        receiver: broadcast::Receiver<Arc<BrokerMessage>>,
        destination: impl Into<String>,
        selector: MessageSelector,
    ) -> Self {
        Self {
            receiver: Some(receiver),
            destination: destination.into(),
            selector,
        }
    }

    /// Receive the next message that matches the selector.
    ///
    /// # Returns
    ///
    /// - `Some(message)` - The next matching message
    /// - `None` - The channel was closed (broker dropped or closed)
    pub async fn recv(&mut self) -> Option<Arc<BrokerMessage>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            let message = match receiver.recv().await {
                Ok(m) => m,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    record_lag(&self.destination, count);
                    continue;
                }
            };

            if self.selector.matches(&message.properties) {
                return Some(message);
            }
        }
    }

    /// Try to receive the next message without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(message))` - A message was available and matched
    /// - `Ok(None)` - No message available (would block)
    /// - `Err(SubscriptionError::Closed)` - The channel was closed
    pub fn try_recv(&mut self) -> Result<Option<Arc<BrokerMessage>>, SubscriptionError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(SubscriptionError::Closed);
        };
        loop {
            let message = match receiver.try_recv() {
                Ok(m) => m,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    record_lag(&self.destination, count);
                    continue;
                }
            };

            if self.selector.matches(&message.properties) {
                return Ok(Some(message));
            }
        }
    }

    /// Get the selector for this subscription.
    #[must_use]
    pub fn selector(&self) -> &MessageSelector {
        &self.selector
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Convert into a `Stream` of matching messages.
    #[must_use]
    pub fn into_stream(self) -> MessageStream {
        MessageStream::new(self)
    }
}

impl Drop for BrokerSubscription {
    fn drop(&mut self) {
        // None once handed over to a stream
        if self.receiver.is_some() {
            debug!(destination = %self.destination, "Subscription dropped");
        }
    }
}

/// A stream wrapper for subscriptions.
///
/// Implements `tokio_stream::Stream` for use with stream combinators.
pub struct MessageStream {
    inner: BroadcastStream<Arc<BrokerMessage>>,
    destination: String,
    selector: MessageSelector,
}

impl MessageStream {
    fn new(mut subscription: BrokerSubscription) -> Self {
        // Only `into_stream` takes the receiver, so it is always present here
        let receiver = subscription
            .receiver
            .take()
            .unwrap_or_else(|| broadcast::channel(1).1);
        Self {
            inner: BroadcastStream::new(receiver),
            destination: std::mem::take(&mut subscription.destination),
            selector: std::mem::take(&mut subscription.selector),
        }
    }

    /// Get the selector for this stream.
    #[must_use]
    pub fn selector(&self) -> &MessageSelector {
        &self.selector
    }
}

impl Stream for MessageStream {
    type Item = Arc<BrokerMessage>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(message))) => {
                    if this.selector.matches(&message.properties) {
                        return Poll::Ready(Some(message));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
                    record_lag(&this.destination, count);
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
