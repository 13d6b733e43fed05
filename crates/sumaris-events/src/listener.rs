//! # Entity Event Listeners
//!
//! Callbacks invoked by the consumer for every matching event, plus the
//! isolation wrapper that keeps one failing listener from starving the
//! others.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use sumaris_telemetry::{metric_inc, LISTENER_FAILURES};
use sumaris_types::{EntityEvent, EntityOperation};
use tracing::error;

/// Receives entity events dispatched by the consumer.
///
/// Every callback defaults to a no-op, so listeners only implement the
/// operations they care about. Callbacks run synchronously on the consumer
/// task: keep them short and hand heavy work to a spawned task.
pub trait EntityEventListener: Send + Sync {
    fn on_insert(&self, event: &EntityEvent) -> anyhow::Result<()> {
        let _ = event;
        Ok(())
    }

    fn on_update(&self, event: &EntityEvent) -> anyhow::Result<()> {
        let _ = event;
        Ok(())
    }

    fn on_delete(&self, event: &EntityEvent) -> anyhow::Result<()> {
        let _ = event;
        Ok(())
    }
}

/// Invoke the callback of `listener` that matches the event operation.
pub fn notify(listener: &dyn EntityEventListener, event: &EntityEvent) -> anyhow::Result<()> {
    match event.operation() {
        EntityOperation::Insert => listener.on_insert(event),
        EntityOperation::Update => listener.on_update(event),
        EntityOperation::Delete => listener.on_delete(event),
    }
}

/// Listener built from a closure that receives every event.
pub struct FnListener<F> {
    callback: F,
}

impl<F> FnListener<F>
where
    F: Fn(&EntityEvent) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EntityEventListener for FnListener<F>
where
    F: Fn(&EntityEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_insert(&self, event: &EntityEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn on_update(&self, event: &EntityEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn on_delete(&self, event: &EntityEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }
}

/// Run one listener callback, turning errors and panics into a log line.
///
/// Returns `true` when the callback succeeded.
pub(crate) fn invoke_isolated<F>(key: &str, subject: &dyn std::fmt::Display, callback: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(key = %key, event = %subject, error = %e, "Listener failed");
            metric_inc!(LISTENER_FAILURES, &[key]);
            false
        }
        Err(panic) => {
            error!(
                key = %key,
                event = %subject,
                panic = %panic_message(panic.as_ref()),
                "Listener panicked"
            );
            metric_inc!(LISTENER_FAILURES, &[key]);
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
