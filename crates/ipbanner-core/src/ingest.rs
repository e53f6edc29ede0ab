//! Failure ingestion: many reporters, one consumer.
//!
//! Reporters push onto an unbounded channel and never block; reports are
//! small and rare compared to request volume. A single consumer task applies
//! them to the tracker one at a time, which is the only writer of bucket
//! counters.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::metrics::Metrics;

/// Queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// `address` failed authentication.
    Failure(String),
    /// Drain everything queued before this entry, then exit.
    Stop,
}

/// Sending half of the ingestion queue.
pub struct FailureQueue {
    sender: UnboundedSender<Report>,
    metrics: Arc<Metrics>,
}

impl FailureQueue {
    /// Creates the queue and the receiver its consumer will drain.
    pub fn new(metrics: Arc<Metrics>) -> (Self, UnboundedReceiver<Report>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender, metrics }, receiver)
    }

    /// Enqueues a failure for `address`. Never blocks.
    ///
    /// Reports sent after the consumer stopped are counted as dropped.
    pub fn report_failure(&self, address: &str) {
        self.metrics.record_enqueued();
        if self
            .sender
            .send(Report::Failure(address.to_owned()))
            .is_err()
        {
            self.metrics.record_dropped();
            tracing::debug!(address, "Failure report dropped, consumer stopped");
        }
    }

    /// Asks the consumer to exit once earlier reports are drained.
    /// Returns `false` if the consumer is already gone.
    pub(crate) fn send_stop(&self) -> bool {
        self.sender.send(Report::Stop).is_ok()
    }
}

/// Consumer loop. Applies `evaluate` to each reported address until the stop
/// sentinel arrives or every sender is dropped.
///
/// A panic while evaluating one report is logged and the loop carries on.
pub async fn run_consumer<F>(
    mut receiver: UnboundedReceiver<Report>,
    metrics: Arc<Metrics>,
    evaluate: F,
) where
    F: Fn(&str),
{
    while let Some(report) = receiver.recv().await {
        let address = match report {
            Report::Stop => break,
            Report::Failure(address) => address,
        };
        metrics.record_dequeued();

        if catch_unwind(AssertUnwindSafe(|| evaluate(&address))).is_err() {
            metrics.record_task_panic();
            tracing::error!(address, "Panic evaluating failure report");
        }
    }

    // Anything that raced in behind the sentinel is discarded.
    receiver.close();
    while receiver.try_recv().is_ok() {
        metrics.record_dropped();
    }
    tracing::debug!("Failure consumer stopped");
}
