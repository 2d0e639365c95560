//! jataka-log: a durable event log for long-running training jobs.
//!
//! Workers post small JSON records tagged with a `job_id` and a `time`. Every
//! record is appended to a newline-delimited JSON file before it becomes
//! visible in the in-memory per-job index, so the index can always be rebuilt
//! by replaying the file at startup.

pub mod codec;
pub mod durable;
pub mod error;
pub mod index;
pub mod metrics;
pub mod reader;
pub mod service;
pub mod store;
pub mod types;
pub mod writer;

pub use durable::DurableLog;
pub use error::Error;
pub use index::JobIndex;
pub use reader::ReadIndex;
pub use service::{AppState, build_router};
pub use store::{JobLog, Recovered, Store, recover};
pub use types::{EventRecord, JobInfo, StorePhase};
pub use writer::{RecordRequest, WriterHandle, spawn_writer};
