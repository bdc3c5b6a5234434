//! Cancellable timers for retry scheduling
//!
//! The client never sleeps itself. It asks a [`Scheduler`] to deliver an
//! [`InboundEvent`] back onto its own queue after a delay, which lets tests
//! swap in a manually driven scheduler.

use crate::events::{InboundEvent, InboundSender};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle for a pending timer
pub trait ScheduledTask: Send {
    /// Prevent the event from being delivered; no-op once it has fired
    fn cancel(&mut self);

    /// True until the event is delivered or the task is cancelled
    fn is_pending(&self) -> bool;
}

/// Deferred delivery of events onto the client's queue
pub trait Scheduler: Send {
    fn schedule(
        &mut self,
        delay: Duration,
        event: InboundEvent,
        deliver: InboundSender,
    ) -> Box<dyn ScheduledTask>;
}

/// Scheduler backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

struct TokioTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask for TokioTask {
    fn cancel(&mut self) {
        self.handle.abort();
    }

    fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for TokioTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &mut self,
        delay: Duration,
        event: InboundEvent,
        deliver: InboundSender,
    ) -> Box<dyn ScheduledTask> {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if deliver.send(event).is_err() {
                debug!("Timer fired after the client went away");
            }
        });
        Box::new(TokioTask { handle })
    }
}
