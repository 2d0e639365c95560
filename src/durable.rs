//! Append-only durable log file.
//!
//! The log is a single newline-delimited JSON file and is the only durability
//! guarantee the store makes. Appends open the file in append mode for the
//! duration of one write and sync it before returning; the shutdown rewrite goes
//! through a sibling temporary file and an atomic rename so a crash mid-flush
//! never leaves a half-written log behind.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::Error;
use crate::types::EventRecord;

/// Contents of the log file as read at recovery time.
#[derive(Debug, Default, PartialEq)]
pub struct LogContents {
    /// Terminated lines, without terminators, in file order.
    pub lines: Vec<Vec<u8>>,
    /// Byte length of the fully terminated prefix of the file.
    pub complete_len: u64,
    /// Total byte length of the file.
    pub total_len: u64,
}

impl LogContents {
    /// Returns `true` if the file ends with an unterminated segment.
    pub fn has_torn_tail(&self) -> bool {
        self.total_len > self.complete_len
    }
}

/// Handle to the on-disk log at a fixed path.
///
/// Holds no open file descriptor between operations: each call acquires the
/// file, performs its I/O and releases it.
#[derive(Debug, Clone)]
pub struct DurableLog {
    path: PathBuf,
}

impl DurableLog {
    /// Open the log at `path`, creating the containing directory and an empty
    /// file if either is missing.
    ///
    /// A newly created file is synced together with its directory entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory or file cannot be created or the
    /// file cannot be opened for reading and writing.
    pub fn open(path: &Path) -> Result<DurableLog, Error> {
        let path = path.to_path_buf();
        let parent = parent_dir(&path);

        if !parent.exists() {
            tracing::info!(dir = %parent.display(), "Creating data directory");
            fs::create_dir_all(&parent)?;
        }

        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                tracing::info!(path = %path.display(), "Creating log file");
                file.sync_all()?;
                fsync_dir(&parent)?;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Existing log: make sure it is usable before replay starts.
                OpenOptions::new().read(true).write(true).open(&path)?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(DurableLog { path })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole file and split it into terminated lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub fn read_all(&self) -> Result<LogContents, Error> {
        let data = fs::read(&self.path)?;
        let framed = codec::split_lines(&data);
        Ok(LogContents {
            lines: framed.lines.into_iter().map(<[u8]>::to_vec).collect(),
            complete_len: framed.complete_len as u64,
            total_len: data.len() as u64,
        })
    }

    /// Append one record followed by the terminator and sync it to disk.
    ///
    /// The record is encoded before the file is touched, so an encoding failure
    /// leaves the log unchanged.
    ///
    /// # Returns
    ///
    /// The number of bytes appended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the record cannot be encoded, or
    /// [`Error::Io`] if the file cannot be opened, written or synced.
    pub fn append_record(&self, record: &EventRecord) -> Result<u64, Error> {
        let line = codec::encode_record(record)?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(line.len() as u64)
    }

    /// Replace the whole log with `records`, in order.
    ///
    /// Writes to `<path>.tmp`, syncs it, renames it over the log and syncs the
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if a record cannot be encoded, or
    /// [`Error::Io`] on any file system failure.
    pub fn rewrite_all<'a, I>(&self, records: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'a EventRecord>,
    {
        let buf = codec::encode_records(records)?;
        let tmp_path = self.tmp_path();

        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&buf)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        fsync_dir(&parent_dir(&self.path))?;
        Ok(())
    }

    /// Cut the file down to `len` bytes and sync it.
    ///
    /// Used at recovery to drop an unterminated tail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or truncated.
    pub fn truncate(&self, len: u64) -> Result<(), Error> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    /// Current byte length of the log file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the metadata syscall fails.
    pub fn len_bytes(&self) -> Result<u64, Error> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

/// Directory containing `path`; the current directory for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Sync a directory so entries created or renamed in it survive a crash.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
