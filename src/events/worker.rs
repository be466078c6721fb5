//! Bounded background worker owning every detached dispatch.
//!
//! The webhook path only enqueues; the worker drains the queue and runs up
//! to `concurrency` envelopes at once. Nothing is persisted: envelopes still
//! queued when the process stops are lost and recovered only by platform
//! re-delivery.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EventDispatcher, Envelope};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("event queue is full")]
    Full,
    #[error("event worker has stopped")]
    Closed,
}

#[derive(Clone)]
pub struct EventWorker {
    tx: mpsc::Sender<Envelope>,
}

impl EventWorker {
    /// Start the worker loop. It runs until every `EventWorker` clone is
    /// dropped and the queue is drained.
    pub fn spawn(
        dispatcher: Arc<EventDispatcher>,
        capacity: usize,
        concurrency: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(capacity.max(1));
        let limiter = Arc::new(Semaphore::new(concurrency.max(1)));

        let handle = tokio::spawn(async move {
            info!(
                "Event worker started (queue {}, concurrency {})",
                capacity.max(1),
                concurrency.max(1)
            );
            let mut tasks = tokio::task::JoinSet::new();

            while let Some(envelope) = rx.recv().await {
                let Ok(permit) = limiter.clone().acquire_owned().await else {
                    break;
                };
                let dispatcher = dispatcher.clone();
                tasks.spawn(async move {
                    let report = dispatcher.dispatch(envelope).await;
                    if report.failed > 0 {
                        warn!(
                            event = %report.event,
                            trace_id = %report.trace_id,
                            failed = report.failed,
                            "Envelope completed with failures"
                        );
                    } else {
                        debug!(
                            event = %report.event,
                            trace_id = %report.trace_id,
                            "Envelope completed"
                        );
                    }
                    drop(permit);
                });

                // Reap finished tasks so the set does not grow unbounded.
                while let Some(result) = tasks.try_join_next() {
                    if let Err(e) = result {
                        warn!("Dispatch task panicked: {}", e);
                    }
                }
            }

            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!("Dispatch task panicked: {}", e);
                }
            }
            info!("Event worker stopped");
        });

        (Self { tx }, handle)
    }

    /// Enqueue without waiting.
    pub fn submit(&self, envelope: Envelope) -> Result<(), SubmitError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }
}
