//! In-memory secondary index from job identifier to that job's records.
//!
//! The index is a derived cache over the durable log: it can always be rebuilt by
//! replaying the log from the start. Records are shared with the store's flat
//! record list through `Arc`, so indexing a record never deep-copies its payload.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{EventRecord, JobInfo};

/// Mapping `job_id -> records of that job, in arrival order`.
#[derive(Debug, Default, Clone)]
pub struct JobIndex {
    jobs: HashMap<String, Vec<Arc<EventRecord>>>,
    record_count: usize,
}

impl JobIndex {
    /// Create an empty index.
    pub fn new() -> JobIndex {
        JobIndex::default()
    }

    /// Append `record` to its job's sequence, creating the sequence on first sight.
    pub fn insert(&mut self, record: Arc<EventRecord>) {
        // Look up by &str first so an existing job does not allocate a key.
        match self.jobs.get_mut(record.job_id()) {
            Some(records) => records.push(record),
            None => {
                self.jobs.insert(record.job_id().to_owned(), vec![record]);
            }
        }
        self.record_count += 1;
    }

    /// Known job identifiers, sorted lexicographically.
    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Records of `job_id` in arrival order; empty for an unknown job.
    pub fn records_for(&self, job_id: &str) -> &[Arc<EventRecord>] {
        self.jobs.get(job_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Per-job summaries, sorted by job identifier.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .jobs
            .iter()
            .map(|(job_id, records)| JobInfo {
                job_id: job_id.clone(),
                record_count: records.len() as u64,
            })
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }

    /// Number of distinct jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Total number of records across all jobs.
    pub fn record_count(&self) -> usize {
        self.record_count
    }
}
