//! Core domain types for the job event store.
//!
//! This module defines the event record submitted by workers, the per-job
//! summary returned by listing queries, and the store lifecycle phases.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Field name that groups records into jobs.
pub const JOB_ID_FIELD: &str = "job_id";

/// Field name carrying the record's logical timestamp.
pub const TIME_FIELD: &str = "time";

/// One job event as submitted by a worker.
///
/// The two required fields are typed; everything else the worker sent is kept
/// verbatim in `fields` and never examined by the store. The `time` value is
/// opaque: any JSON value other than `null` is accepted.
///
/// Decoding from a JSON object goes through [`TryFrom<Map<String, Value>>`],
/// which is the single place the two required fields are validated. Encoding
/// emits `job_id`, `time`, then the remaining fields as one flat object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct EventRecord {
    job_id: String,
    time: Value,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl EventRecord {
    /// Build a record from its parts.
    ///
    /// Any `job_id` or `time` keys inside `fields` are dropped so the typed
    /// values are the only source of truth for those names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] if `job_id` is empty or `time` is `null`.
    pub fn new(
        job_id: impl Into<String>,
        time: Value,
        mut fields: Map<String, Value>,
    ) -> Result<EventRecord, Error> {
        let job_id = job_id.into();
        if job_id.is_empty() {
            return Err(Error::InvalidRecord("job_id must not be empty".into()));
        }
        if time.is_null() {
            return Err(Error::InvalidRecord("time must not be null".into()));
        }
        fields.remove(JOB_ID_FIELD);
        fields.remove(TIME_FIELD);
        Ok(EventRecord {
            job_id,
            time,
            fields,
        })
    }

    /// The job this record belongs to.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The record's logical timestamp, exactly as submitted.
    pub fn time(&self) -> &Value {
        &self.time
    }

    /// Every field other than `job_id` and `time`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Look up an additional field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl TryFrom<Map<String, Value>> for EventRecord {
    type Error = Error;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, Self::Error> {
        let job_id = match map.remove(JOB_ID_FIELD) {
            None | Some(Value::Null) => {
                return Err(Error::InvalidRecord("missing job_id".into()));
            }
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(Error::InvalidRecord(format!(
                    "job_id must be a string, got {other}"
                )));
            }
        };
        let time = match map.remove(TIME_FIELD) {
            None | Some(Value::Null) => {
                return Err(Error::InvalidRecord("missing time".into()));
            }
            Some(value) => value,
        };
        EventRecord::new(job_id, time, map)
    }
}

impl TryFrom<Value> for EventRecord {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => EventRecord::try_from(map),
            other => Err(Error::InvalidRecord(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Short name of a JSON value's kind, for error messages.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Summary of a single job returned by `list_jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    /// Identifier shared by every record of the job.
    pub job_id: String,
    /// Number of records currently indexed for the job.
    pub record_count: u64,
}

/// Lifecycle phase of a [`Store`](crate::store::Store).
///
/// Phases only move forward:
/// `Uninitialized -> Recovering -> Serving -> Flushing -> Terminated`.
/// Writes are accepted only while `Serving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    /// No log has been opened yet.
    Uninitialized,
    /// The log is being replayed into the index.
    Recovering,
    /// Steady state: records and queries are accepted.
    Serving,
    /// The shutdown rewrite is in progress; writes are refused.
    Flushing,
    /// The final flush has completed.
    Terminated,
}
