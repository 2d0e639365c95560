//! Single-writer task for the job log.
//!
//! This module provides the `RecordRequest` struct, the `WriterHandle` that HTTP
//! handlers use to submit events to the writer task via a bounded `tokio::mpsc`
//! channel, and the task loop itself. The task owns the [`Store`] for the whole
//! `Serving` phase, so every (append, index) unit is applied strictly one at a
//! time. When the last handle is dropped, or any handle calls
//! [`WriterHandle::close`], the task performs the shutdown flush.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::error::Error;
use crate::reader::ReadIndex;
use crate::store::Store;
use crate::types::EventRecord;

/// A request to record one event, sent to the writer task via the mpsc channel.
pub struct RecordRequest {
    /// The validated event to record.
    pub event: EventRecord,
    /// Oneshot channel for sending the result back to the caller.
    pub response_tx: oneshot::Sender<Result<(), Error>>,
}

/// Cloneable handle for submitting events to the writer task.
///
/// Cloning a `WriterHandle` produces a second sender into the same channel,
/// allowing multiple handlers to submit requests concurrently. The writer task
/// keeps running until every clone has been dropped.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<RecordRequest>,
    close: Arc<Notify>,
}

impl WriterHandle {
    /// Create a new `WriterHandle` from the sender half of an mpsc channel.
    pub fn new(tx: mpsc::Sender<RecordRequest>) -> Self {
        Self {
            tx,
            close: Arc::new(Notify::new()),
        }
    }

    /// Ask the writer task to stop accepting events and flush.
    ///
    /// Requests already queued are still recorded; anything submitted after the
    /// channel closes fails with [`Error::StoreClosed`]. Outstanding clones of
    /// this handle do not keep the task alive once this is called.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Submit an event to the writer task and await the result.
    ///
    /// Returns once the event is durably appended and indexed.
    ///
    /// # Errors
    ///
    /// - Returns the store's error if recording fails (`Io` is fatal).
    /// - Returns [`Error::StoreClosed`] if the writer task has shut down or
    ///   dropped the request without answering.
    pub async fn record(&self, event: EventRecord) -> Result<(), Error> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(RecordRequest { event, response_tx })
            .await
            .map_err(|_| Error::StoreClosed)?;

        response_rx.await.map_err(|_| Error::StoreClosed)?
    }
}

/// Run the writer task loop.
///
/// Receives `RecordRequest`s, records each through the store and answers on the
/// request's oneshot. The first request of an iteration is awaited; any others
/// already queued are drained with `try_recv()` and processed in order.
///
/// On a fatal store error the caller is answered with that error, the channel
/// is closed, every queued request is failed with [`Error::StoreClosed`] and
/// the task resolves to [`Error::StoreFailed`] without flushing.
///
/// When every sender is dropped, or `close` is notified and the queue has
/// drained, the loop exits and the store is flushed; the task resolves to the
/// flush result.
pub(crate) async fn run_writer(
    mut store: Store,
    mut rx: mpsc::Receiver<RecordRequest>,
    close: Arc<Notify>,
) -> Result<(), Error> {
    loop {
        let first = tokio::select! {
            req = rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
            _ = close.notified() => {
                tracing::info!("writer: close requested, draining queue");
                rx.close();
                continue;
            }
        };

        let mut batch = vec![first];
        while let Ok(req) = rx.try_recv() {
            batch.push(req);
        }

        let mut pending = batch.into_iter();
        while let Some(req) = pending.next() {
            let result = store.record(req.event);

            let failure = match &result {
                Ok(()) => {
                    counter!("jataka_events_recorded_total").increment(1);
                    None
                }
                Err(e) => {
                    counter!("jataka_record_failures_total").increment(1);
                    e.is_fatal().then(|| e.to_string())
                }
            };

            if req.response_tx.send(result).is_err() {
                tracing::warn!("writer: response receiver dropped");
            }

            if let Some(detail) = failure {
                tracing::error!(error = %detail, "writer: unrecoverable store error, stopping");
                rx.close();
                for req in pending.by_ref() {
                    let _ = req.response_tx.send(Err(Error::StoreClosed));
                }
                while let Ok(req) = rx.try_recv() {
                    let _ = req.response_tx.send(Err(Error::StoreClosed));
                }
                return Err(Error::StoreFailed(detail));
            }
        }

        store.publish_gauges();
    }

    tracing::info!("writer: channel closed, flushing job log");
    store.flush()
}

/// Spawn the writer task on the tokio runtime.
///
/// Takes a read handle from the store before moving it into the task.
///
/// # Arguments
///
/// * `store` - A `Serving` store to move into the writer task.
/// * `channel_capacity` - Bound on the mpsc channel. Controls backpressure.
///
/// # Returns
///
/// - `WriterHandle` -- cloneable sender for submitting events.
/// - `ReadIndex` -- shared, read-only view of the in-memory job log.
/// - `JoinHandle` -- resolves when the task exits, with the flush result or the
///   fatal error that stopped it.
///
/// # Panics
///
/// Panics if `channel_capacity` is zero.
pub fn spawn_writer(
    store: Store,
    channel_capacity: usize,
) -> (
    WriterHandle,
    ReadIndex,
    tokio::task::JoinHandle<Result<(), Error>>,
) {
    let read_index = store.read_index();

    let (tx, rx) = mpsc::channel(channel_capacity);
    let writer_handle = WriterHandle::new(tx);

    let join_handle = tokio::spawn(run_writer(
        store,
        rx,
        Arc::clone(&writer_handle.close),
    ));

    (writer_handle, read_index, join_handle)
}
