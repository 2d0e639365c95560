//! Storage engine for the job event log.
//!
//! This module owns the durable log and the in-memory index. It provides methods
//! for opening (or creating) the store and replaying the log, recording events,
//! querying jobs, and the final rewrite of the log at shutdown.

use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::codec;
use crate::durable::DurableLog;
use crate::error::Error;
use crate::index::JobIndex;
use crate::reader::ReadIndex;
use crate::types::{EventRecord, JobInfo, StorePhase};

/// In-memory view of everything recorded since recovery.
///
/// `records` is the flat arrival-ordered list the shutdown flush writes back;
/// `index` groups the same `Arc`s by job. Both are only ever mutated together,
/// under the write half of the `RwLock` that wraps this struct, so the index's
/// record count always equals `records.len()`.
#[derive(Debug, Default)]
pub struct JobLog {
    /// Every record, in arrival order.
    pub records: Vec<Arc<EventRecord>>,
    /// Per-job index over `records`.
    pub index: JobIndex,
}

impl JobLog {
    fn push(&mut self, record: EventRecord) {
        let record = Arc::new(record);
        self.index.insert(Arc::clone(&record));
        self.records.push(record);
    }
}

/// Output of replaying the durable log.
#[derive(Debug, Default)]
pub struct Recovered {
    /// Decoded records plus their index, built in one pass.
    pub log: JobLog,
    /// Number of non-blank lines that failed to decode and were skipped.
    pub skipped: usize,
    /// `true` if an unterminated final segment was cut from the file.
    pub truncated_tail: bool,
}

/// Replay the durable log into a fresh [`JobLog`].
///
/// Every decodable line is appended to the flat record list and inserted into
/// the index in the same step. Lines that fail to decode (bad JSON, not an
/// object, missing or invalid `job_id` / `time`) are skipped with a
/// `tracing::warn!` naming the line, so a damaged record never prevents
/// startup. An unterminated final segment is truncated from the file so the next
/// append starts on a fresh line.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read or truncated.
pub fn recover(log: &DurableLog) -> Result<Recovered, Error> {
    let contents = log.read_all()?;
    let mut recovered = Recovered::default();

    for (i, line) in contents.lines.iter().enumerate() {
        match codec::decode_line(line, i + 1) {
            Ok(Some(record)) => recovered.log.push(record),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    path = %log.path().display(),
                    error = %e,
                    "skipping undecodable log line"
                );
                recovered.skipped += 1;
            }
        }
    }

    if contents.has_torn_tail() {
        tracing::warn!(
            path = %log.path().display(),
            offset = contents.complete_len,
            dropped_bytes = contents.total_len - contents.complete_len,
            "truncating unterminated trailing record"
        );
        log.truncate(contents.complete_len)?;
        recovered.truncated_tail = true;
    }

    if recovered.skipped > 0 {
        metrics::counter!("jataka_replay_skipped_lines_total").increment(recovered.skipped as u64);
    }

    Ok(recovered)
}

/// Core storage engine that manages the durable log and the in-memory index.
///
/// The `Store` owns the [`DurableLog`] and a shared `Arc<RwLock<JobLog>>`.
/// All writes go through [`Store::record`], which appends to disk first and
/// only then takes the write lock to update memory. Reads take the read lock
/// and never touch the disk. [`Store::read_index`] hands out cloneable read
/// handles over the same lock for concurrent query handlers.
pub struct Store {
    /// The on-disk log.
    durable: DurableLog,
    /// Shared in-memory state, protected by a read-write lock.
    log: Arc<RwLock<JobLog>>,
    /// Current lifecycle phase.
    phase: StorePhase,
}

impl Store {
    /// Open or create the store at the given file path and replay it.
    ///
    /// Moves through `Recovering` to `Serving`. A missing directory or file is
    /// created and yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory or file cannot be created, opened,
    /// read, or have a torn tail truncated.
    pub fn open(path: &Path) -> Result<Store, Error> {
        let mut store = Store {
            durable: DurableLog::open(path)?,
            log: Arc::new(RwLock::new(JobLog::default())),
            phase: StorePhase::Uninitialized,
        };

        store.phase = StorePhase::Recovering;
        let recovered = recover(&store.durable)?;
        tracing::info!(
            records = recovered.log.records.len(),
            jobs = recovered.log.index.job_count(),
            skipped = recovered.skipped,
            truncated_tail = recovered.truncated_tail,
            "Recovered job log"
        );
        *store.log.write().expect("JobLog RwLock poisoned") = recovered.log;

        store.phase = StorePhase::Serving;
        store.publish_gauges();
        Ok(store)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    /// Record one event: durably append it, then index it.
    ///
    /// If the append fails nothing is indexed, so the index never holds a
    /// record the log does not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreClosed`] unless the store is `Serving`.
    /// Returns [`Error::Serialization`] if the record cannot be encoded.
    /// Returns [`Error::Io`] if the append fails; this is fatal.
    pub fn record(&mut self, event: EventRecord) -> Result<(), Error> {
        if self.phase != StorePhase::Serving {
            return Err(Error::StoreClosed);
        }

        self.durable.append_record(&event)?;

        self.log
            .write()
            .expect("JobLog RwLock poisoned")
            .push(event);
        Ok(())
    }

    /// Known job identifiers, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let log = self.log.read().expect("JobLog RwLock poisoned");
        log.index.job_ids()
    }

    /// Records of `job_id` in arrival order; empty for an unknown job.
    pub fn records_for(&self, job_id: &str) -> Vec<EventRecord> {
        let log = self.log.read().expect("JobLog RwLock poisoned");
        log.index
            .records_for(job_id)
            .iter()
            .map(|r| EventRecord::clone(r))
            .collect()
    }

    /// Per-job summaries, sorted by job identifier.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let log = self.log.read().expect("JobLog RwLock poisoned");
        log.index.list_jobs()
    }

    /// Total number of records held in memory.
    pub fn record_count(&self) -> usize {
        let log = self.log.read().expect("JobLog RwLock poisoned");
        log.records.len()
    }

    /// Rewrite the durable log from the in-memory record list.
    ///
    /// Moves through `Flushing` to `Terminated`; no write is accepted after this
    /// is called, whether or not the rewrite succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreClosed`] if the store is not `Serving`.
    /// Returns [`Error::Io`] or [`Error::Serialization`] if the rewrite fails.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.phase != StorePhase::Serving {
            return Err(Error::StoreClosed);
        }
        self.phase = StorePhase::Flushing;

        let count = {
            let log = self.log.read().expect("JobLog RwLock poisoned");
            self.durable
                .rewrite_all(log.records.iter().map(|r| r.as_ref()))?;
            log.records.len()
        };

        self.phase = StorePhase::Terminated;
        tracing::info!(
            path = %self.durable.path().display(),
            records = count,
            "Flushed job log"
        );
        Ok(())
    }

    /// Returns a read handle sharing this store's in-memory state.
    pub fn read_index(&self) -> ReadIndex {
        ReadIndex::new(Arc::clone(&self.log))
    }

    /// Update the size gauges after a change to the in-memory state.
    pub(crate) fn publish_gauges(&self) {
        {
            let log = self.log.read().expect("JobLog RwLock poisoned");
            metrics::gauge!("jataka_jobs").set(log.index.job_count() as f64);
            metrics::gauge!("jataka_records").set(log.records.len() as f64);
        }
        match self.durable.len_bytes() {
            Ok(bytes) => metrics::gauge!("jataka_log_bytes").set(bytes as f64),
            Err(e) => tracing::warn!(error = %e, "Failed to stat log file"),
        }
    }
}
