//! Timers and transport sinks that feed the event loop.
//!
//! Everything here holds only a weak sender, so pending timers and live
//! transports never keep the event loop alive on their own.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::identifiers::EndpointId;
use crate::transport::EventSink;

use super::core::Command;

// ============================================================================
// Scheduler
// ============================================================================

/// Posts delayed commands and transport events to the event loop.
#[derive(Debug, Clone)]
pub(crate) struct Scheduler {
    tx: WeakUnboundedSender<Command>,
}

impl Scheduler {
    pub(crate) fn new(tx: WeakUnboundedSender<Command>) -> Self {
        Self { tx }
    }

    /// Delivers `command` after `after`. Dropping the handle cancels it.
    pub(crate) fn schedule(&self, after: Duration, command: Command) -> TimerHandle {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            sleep(after).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(command);
            }
        });

        TimerHandle(handle)
    }

    /// Sink that tags events with their connection generation.
    pub(crate) fn sink(&self, endpoint: EndpointId, generation: u64) -> EventSink {
        let tx = self.tx.clone();
        EventSink::new(move |event| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Transport {
                    endpoint,
                    generation,
                    event,
                });
            }
        })
    }
}

// ============================================================================
// TimerHandle
// ============================================================================

/// Aborts the timer task when dropped.
#[derive(Debug)]
pub(crate) struct TimerHandle(JoinHandle<()>);

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
