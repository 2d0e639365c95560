//! Read-only handle to the in-memory job log.
//!
//! `ReadIndex` provides concurrent, read-only access to the job index without
//! going through the writer task. It wraps an `Arc<RwLock<JobLog>>` and exposes
//! read methods that acquire a read lock for the duration of the operation.

use std::sync::{Arc, RwLock};

use crate::store::JobLog;
use crate::types::{EventRecord, JobInfo};

/// Shared, read-only handle to the in-memory job log.
///
/// Multiple `ReadIndex` clones share the same underlying data -- cloning
/// produces a new handle, not a copy of the data. This is the handle HTTP query
/// handlers hold.
#[derive(Clone, Debug)]
pub struct ReadIndex {
    log: Arc<RwLock<JobLog>>,
}

impl ReadIndex {
    /// Create a new `ReadIndex` backed by the given shared job log.
    pub fn new(log: Arc<RwLock<JobLog>>) -> ReadIndex {
        ReadIndex { log }
    }

    /// Known job identifiers, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let log = self.log.read().expect("JobLog RwLock poisoned");
        log.index.job_ids()
    }

    /// Records of `job_id` in arrival order, cloned out from under the lock.
    ///
    /// Returns an empty `Vec` for an unknown job; that is not an error.
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

    /// Number of distinct jobs.
    pub fn job_count(&self) -> usize {
        let log = self.log.read().expect("JobLog RwLock poisoned");
        log.index.job_count()
    }

    /// Total number of records.
    pub fn record_count(&self) -> usize {
        let log = self.log.read().expect("JobLog RwLock poisoned");
        log.records.len()
    }
}
