//! Durability merger
//!
//! The only writer of the durable log. A single OS thread takes pending ids
//! off the merge queue in arrival order and, for each, reads the staged
//! file, appends its record, broadcasts the raw payload, and deletes the
//! file, all before taking the next id. That sequencing is what keeps the
//! log totally ordered and free of interleaved writes.

use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, oneshot};

use super::config::MergeFailurePolicy;
use super::errors::{BrokerError, BrokerResult};
use super::registry::SubscriberRegistry;
use crate::log::LogWriter;
use crate::observability::{BrokerMetrics, Event, Logger};
use crate::pending::PendingStore;

/// Result reported back to a producer waiting on its merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The record starts at `offset` in the log
    Committed { offset: u64 },
    Failed,
}

/// One entry of the merge queue
#[derive(Debug)]
pub struct MergeRequest {
    pub id: String,
    pub done: Option<oneshot::Sender<MergeOutcome>>,
}

/// Producer side of the bounded merge queue
#[derive(Debug, Clone)]
pub struct MergeQueue {
    tx: mpsc::Sender<MergeRequest>,
}

/// Create the merge queue. `capacity` must be at least 1.
pub fn merge_queue(capacity: usize) -> (MergeQueue, mpsc::Receiver<MergeRequest>) {
    let (tx, rx) = mpsc::channel(capacity);
    (MergeQueue { tx }, rx)
}

impl MergeQueue {
    /// Queue a staged id. Waits while the queue is full.
    pub async fn enqueue(&self, id: String) -> BrokerResult<()> {
        self.tx
            .send(MergeRequest { id, done: None })
            .await
            .map_err(|_| BrokerError::MergeQueueClosed)
    }

    /// Queue a staged id and wait until the merger has committed it.
    pub async fn enqueue_and_wait(&self, id: String) -> BrokerResult<u64> {
        let (done, committed) = oneshot::channel();
        self.tx
            .send(MergeRequest {
                id: id.clone(),
                done: Some(done),
            })
            .await
            .map_err(|_| BrokerError::MergeQueueClosed)?;

        match committed.await {
            Ok(MergeOutcome::Committed { offset }) => Ok(offset),
            Ok(MergeOutcome::Failed) => Err(BrokerError::MergeFailed(id)),
            Err(_) => Err(BrokerError::MergeQueueClosed),
        }
    }

    /// Returns true once the merger has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// How the merger thread ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerExit {
    /// Every queue sender was dropped and the queue drained
    Drained,
    /// A merge failed under the halt policy, or the log failed fatally
    Halted,
}

/// The sequential merge worker
pub struct Merger {
    store: PendingStore,
    writer: LogWriter,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<BrokerMetrics>,
    policy: MergeFailurePolicy,
}

impl Merger {
    pub fn new(
        store: PendingStore,
        writer: LogWriter,
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<BrokerMetrics>,
        policy: MergeFailurePolicy,
    ) -> Self {
        Self {
            store,
            writer,
            registry,
            metrics,
            policy,
        }
    }

    /// Merge one staged record. Returns its offset in the log.
    ///
    /// Nothing is broadcast unless the append succeeded. If only the final
    /// delete fails the record is still committed; the error is logged and
    /// the stale file would be merged again by the next startup recovery.
    pub fn merge_one(&mut self, id: &str) -> BrokerResult<u64> {
        let payload = self.store.read(id)?;
        let offset = self.writer.append(&payload)?;
        self.metrics.record_merged(payload.len() as u64);

        self.registry.broadcast(&payload);

        if let Err(e) = self.store.remove(id) {
            self.metrics.increment_merge_failures();
            let error = e.to_string();
            Logger::event(
                Event::MergeFailed,
                &[("id", id), ("stage", "cleanup"), ("error", error.as_str())],
            );
        }

        Ok(offset)
    }

    /// Process the queue until it is closed and drained, or until a failure
    /// stops the worker.
    pub fn run(mut self, mut queue: mpsc::Receiver<MergeRequest>) -> MergerExit {
        while let Some(request) = queue.blocking_recv() {
            match self.merge_one(&request.id) {
                Ok(offset) => {
                    if let Some(done) = request.done {
                        let _ = done.send(MergeOutcome::Committed { offset });
                    }
                    let offset = offset.to_string();
                    Logger::event(
                        Event::MergeComplete,
                        &[("id", request.id.as_str()), ("offset", offset.as_str())],
                    );
                }
                Err(e) => {
                    self.metrics.increment_merge_failures();
                    if let Some(done) = request.done {
                        let _ = done.send(MergeOutcome::Failed);
                    }

                    let error = e.to_string();
                    let fatal = matches!(&e, BrokerError::Log(log_err) if log_err.is_fatal());
                    if fatal || self.policy == MergeFailurePolicy::Halt {
                        Logger::event(
                            Event::MergerHalted,
                            &[("id", request.id.as_str()), ("error", error.as_str())],
                        );
                        return MergerExit::Halted;
                    }
                    Logger::event(
                        Event::MergeFailed,
                        &[("id", request.id.as_str()), ("error", error.as_str())],
                    );
                }
            }
        }
        MergerExit::Drained
    }

    /// Run the merger on its own detached thread.
    pub fn spawn(self, queue: mpsc::Receiver<MergeRequest>) -> BrokerResult<MergerHandle> {
        let (exit_tx, exit_rx) = oneshot::channel();
        thread::Builder::new()
            .name("blobcast-merger".to_string())
            .spawn(move || {
                let exit = self.run(queue);
                let _ = exit_tx.send(exit);
            })?;

        Ok(MergerHandle { exit_rx })
    }
}

/// Handle to a running merger thread
#[derive(Debug)]
pub struct MergerHandle {
    exit_rx: oneshot::Receiver<MergerExit>,
}

impl MergerHandle {
    /// Resolves when the merger thread has finished its loop.
    ///
    /// Cancel safe. Must not be awaited again once it has resolved.
    pub async fn exited(&mut self) -> MergerExit {
        (&mut self.exit_rx).await.unwrap_or(MergerExit::Halted)
    }
}
