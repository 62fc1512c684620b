use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde::Serialize;

use iotrace_types::{Result, Status};

use crate::record::{decode_record, Decoded, TensorAccessEvent};
use crate::schema::SchemaVersion;

/// Counters describing how much of a trace file was usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaderStats {
    pub records_read: u64,
    pub malformed: u64,
    /// Bytes of a final record that was cut short.
    pub trailing_bytes: u64,
    pub unknown_memory_source: u64,
    pub ended_by_sentinel: bool,
}

/// Iterates over the fixed-length records of a tensor trace.
///
/// Iteration stops at a zero-timestamp record or at a short final read.
/// Records that fail structural checks are skipped and counted.
pub struct RecordReader<R> {
    inner: R,
    version: SchemaVersion,
    buf: Vec<u8>,
    stats: ReaderStats,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R, version: SchemaVersion) -> Self {
        Self {
            inner,
            version,
            buf: vec![0u8; version.record_len()],
            stats: ReaderStats::default(),
            done: false,
        }
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Fills the record buffer, returning how many bytes were read before EOF.
    fn fill(&mut self) -> io::Result<usize> {
        let mut filled = 0;
        while filled < self.buf.len() {
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<TensorAccessEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let n = match self.fill() {
                Ok(n) => n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            if n < self.buf.len() {
                self.done = true;
                if n > 0 {
                    self.stats.trailing_bytes = n as u64;
                    tracing::warn!(
                        bytes = n,
                        record_len = self.buf.len(),
                        "trace ends with a partial record"
                    );
                }
                return None;
            }

            match decode_record(self.version, &self.buf) {
                Ok(Decoded::End) => {
                    self.done = true;
                    self.stats.ended_by_sentinel = true;
                }
                Ok(Decoded::Event(event)) => {
                    self.stats.records_read += 1;
                    let unknown = event.sources.iter().filter(|s| s.residency.is_none()).count();
                    if unknown > 0 {
                        self.stats.unknown_memory_source += unknown as u64;
                        tracing::debug!(
                            timestamp_ns = event.timestamp_ns,
                            sources = unknown,
                            "unknown memory source byte"
                        );
                    }
                    return Some(Ok(event));
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::warn!(
                        record = self.stats.records_read + self.stats.malformed - 1,
                        error = %e,
                        "skipping malformed record"
                    );
                }
            }
        }
        None
    }
}

/// Decodes a whole trace file.
pub fn read_trace_file(
    path: &Path,
    version: SchemaVersion,
) -> Result<(Vec<TensorAccessEvent>, ReaderStats)> {
    let file = File::open(path).map_err(|e| Status::input_not_found(path, e))?;
    let mut reader = RecordReader::new(BufReader::new(file), version);
    let events = reader.by_ref().collect::<Result<Vec<_>>>()?;
    let stats = *reader.stats();
    tracing::info!(
        path = %path.display(),
        schema = %version,
        records = stats.records_read,
        malformed = stats.malformed,
        "decoded tensor trace"
    );
    Ok((events, stats))
}
