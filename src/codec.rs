//! Line codec for the durable job log.
//!
//! This module handles serialization and deserialization of individual event
//! records. It is pure data transformation -- no file I/O, no locking, no index
//! management.
//!
//! Each record is one JSON object followed by a single `\n` terminator. There is
//! no header, footer or length prefix: a log is valid exactly when every line is
//! terminated.

use crate::error::Error;
use crate::types::EventRecord;

/// Record terminator byte.
pub const TERMINATOR: u8 = b'\n';

/// Result of splitting a raw log buffer into terminated lines.
///
/// `complete_len` is the byte length of the prefix made of whole lines
/// (terminators included). Anything after it is a torn tail: the remains of a
/// write that never reached its terminator.
#[derive(Debug, PartialEq)]
pub struct FramedLines<'a> {
    /// Terminated lines, without their terminators, in file order.
    pub lines: Vec<&'a [u8]>,
    /// Length of the valid, fully terminated prefix of the buffer.
    pub complete_len: usize,
}

/// Encode a record as one JSON line, terminator included.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the record cannot be encoded.
pub fn encode_record(record: &EventRecord) -> Result<Vec<u8>, Error> {
    let mut buf = serde_json::to_vec(record)?;
    buf.push(TERMINATOR);
    Ok(buf)
}

/// Encode a sequence of records into one contiguous buffer of JSON lines.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if any record cannot be encoded.
pub fn encode_records<'a, I>(records: I) -> Result<Vec<u8>, Error>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(TERMINATOR);
    }
    Ok(buf)
}

/// Split a raw log buffer on the terminator.
///
/// The empty segment that follows a final terminator is not a line. A final
/// segment with no terminator is excluded from `lines` and reported through
/// `complete_len` instead.
pub fn split_lines(data: &[u8]) -> FramedLines<'_> {
    let complete_len = data
        .iter()
        .rposition(|&b| b == TERMINATOR)
        .map_or(0, |idx| idx + 1);

    let lines = if complete_len == 0 {
        Vec::new()
    } else {
        data[..complete_len - 1].split(|&b| b == TERMINATOR).collect()
    };

    FramedLines {
        lines,
        complete_len,
    }
}

/// Decode a single line (without terminator) into a record.
///
/// Lines holding only whitespace decode to `Ok(None)`.
///
/// # Arguments
///
/// * `line` - Raw line bytes.
/// * `line_number` - 1-based position of the line, used in error reports.
///
/// # Errors
///
/// Returns [`Error::CorruptRecord`] if the line is not valid JSON, is not an
/// object, or lacks a valid `job_id` / `time`.
pub fn decode_line(line: &[u8], line_number: usize) -> Result<Option<EventRecord>, Error> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<EventRecord>(line)
        .map(Some)
        .map_err(|e| Error::CorruptRecord {
            line: line_number,
            detail: e.to_string(),
        })
}
