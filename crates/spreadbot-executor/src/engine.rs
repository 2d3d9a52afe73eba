//! Candidate queue consumer.
//!
//! One candidate at a time, each run to completion before the next `recv`.
//! A panic inside a candidate is caught here, logged, and followed by the
//! error sleep; only cancellation or a closed queue ends the loop.

use crate::error::{ExecutorError, ExecutorResult};
use crate::processor::{Outcome, OrderProcessor};
use futures_util::FutureExt;
use spreadbot_core::OrderCandidate;
use spreadbot_telemetry::Metrics;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

/// Drains the candidate queue through an [`OrderProcessor`].
pub struct OrderEngine {
    processor: Arc<OrderProcessor>,
}

impl OrderEngine {
    pub fn new(processor: Arc<OrderProcessor>) -> Self {
        Self { processor }
    }

    /// Run until cancelled or until every sender is gone.
    pub async fn run(
        &self,
        mut rx: mpsc::UnboundedReceiver<OrderCandidate>,
        cancel: CancellationToken,
    ) -> ExecutorResult<()> {
        info!("Order engine started");
        loop {
            let candidate = tokio::select! {
                () = cancel.cancelled() => {
                    info!("Order engine stopping");
                    return Ok(());
                }
                next = rx.recv() => match next {
                    Some(candidate) => candidate,
                    None => {
                        error!("Candidate queue closed");
                        return Err(ExecutorError::QueueClosed);
                    }
                },
            };

            if self.handle(candidate).await.is_none() {
                let pause = self.processor.settings().error_sleep();
                tokio::select! {
                    () = tokio::time::sleep(pause) => {}
                    () = cancel.cancelled() => return Ok(()),
                }
            }
        }
    }

    /// Process one candidate, containing any panic. `None` means it panicked.
    pub async fn handle(&self, candidate: OrderCandidate) -> Option<Outcome> {
        let span = info_span!("candidate", id = %candidate.id, symbol = %candidate.symbol);
        let processor = self.processor.clone();
        let result = AssertUnwindSafe(async move { processor.process(&candidate).await })
            .catch_unwind()
            .instrument(span.clone())
            .await;

        match result {
            Ok(outcome) => {
                Metrics::candidate(outcome.label());
                span.in_scope(|| info!(outcome = outcome.label(), "Candidate done"));
                Some(outcome)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Metrics::candidate("panicked");
                span.in_scope(|| error!(%message, "Candidate processing panicked"));
                None
            }
        }
    }
}
