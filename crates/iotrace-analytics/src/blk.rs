//! Decoding of `blkparse` text output.
//!
//! Event lines look like
//! `259,1  7  1  0.000000000  137  D  R  1747855872 + 8 [llama-cli]`.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use iotrace_types::units::{sectors_to_bytes, MAX_SECTOR};
use iotrace_types::{SectorNo, Status};

/// One block-layer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoEvent {
    pub device: String,
    pub cpu: u32,
    pub sequence: u64,
    /// Seconds since trace start.
    pub timestamp: f64,
    pub pid: u32,
    pub action: String,
    pub rwbs: String,
    pub start_sector: SectorNo,
    pub length_sectors: u64,
    pub process_name: Option<String>,
}

impl IoEvent {
    pub fn is_read(&self) -> bool {
        self.rwbs.contains('R')
    }

    /// Issued to the device driver; only these carry the final position.
    pub fn is_dispatch(&self) -> bool {
        self.action == "D"
    }

    pub fn byte_len(&self) -> u64 {
        sectors_to_bytes(self.length_sectors)
    }

    /// First sector past the event (exclusive).
    pub fn end_sector(&self) -> SectorNo {
        self.start_sector.offset(self.length_sectors)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {field} field '{value}'")]
pub struct MalformedLine {
    pub field: &'static str,
    pub value: String,
}

fn parse_field<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, MalformedLine> {
    raw.parse().map_err(|_| MalformedLine {
        field,
        value: raw.to_string(),
    })
}

/// `major,minor` device column; anything else is a header or summary row.
fn is_device_column(s: &str) -> bool {
    match s.split_once(',') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Parses one line of blkparse output.
///
/// Returns `Ok(None)` for lines that are not events (short lines, per-CPU and
/// total summaries, headers) and `Err` for event lines whose numeric fields do
/// not parse or whose sector range ends past `MAX_SECTOR`.
pub fn parse_blk_line(line: &str) -> Result<Option<IoEvent>, MalformedLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 10 {
        return Ok(None);
    }
    if parts[0].starts_with("CPU") || parts[0].starts_with("Total") || !is_device_column(parts[0])
    {
        return Ok(None);
    }

    let process_name = parts[10..]
        .iter()
        .find(|p| p.len() >= 2 && p.starts_with('[') && p.ends_with(']'))
        .map(|p| p[1..p.len() - 1].to_string());

    let cpu = parse_field("cpu", parts[1])?;
    let sequence = parse_field("sequence", parts[2])?;
    let timestamp = parse_field("timestamp", parts[3])?;
    let pid = parse_field("pid", parts[4])?;
    let start: u64 = parse_field("sector", parts[7])?;
    let length: u64 = parse_field("length", parts[9])?;
    if start > MAX_SECTOR {
        return Err(MalformedLine {
            field: "sector",
            value: parts[7].to_string(),
        });
    }
    if start.checked_add(length).map_or(true, |end| end > MAX_SECTOR) {
        return Err(MalformedLine {
            field: "length",
            value: parts[9].to_string(),
        });
    }

    Ok(Some(IoEvent {
        device: parts[0].to_string(),
        cpu,
        sequence,
        timestamp,
        pid,
        action: parts[5].to_string(),
        rwbs: parts[6].to_string(),
        start_sector: SectorNo(start),
        length_sectors: length,
        process_name,
    }))
}

/// Line counters for one pass over a block trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub lines: u64,
    pub events: u64,
    pub skipped: u64,
    pub malformed: u64,
}

/// Streams events out of blkparse text one line at a time.
pub struct BlkTraceReader<R> {
    inner: R,
    line: Vec<u8>,
    stats: IngestStats,
}

impl<R: BufRead> BlkTraceReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::new(),
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }
}

impl<R: BufRead> Iterator for BlkTraceReader<R> {
    type Item = Result<IoEvent, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.inner.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.stats.lines += 1;

            let Ok(line) = std::str::from_utf8(&self.line) else {
                self.stats.malformed += 1;
                tracing::debug!(line = self.stats.lines, "skipping non-UTF-8 blkparse line");
                continue;
            };
            match parse_blk_line(line) {
                Ok(Some(event)) => {
                    self.stats.events += 1;
                    return Some(Ok(event));
                }
                Ok(None) => self.stats.skipped += 1,
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::debug!(line = self.stats.lines, error = %e, "skipping malformed blkparse line");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_dispatch_read() {
        let ev = parse_blk_line("259,1    7        1     0.000125000   137  D   R 1747855872 + 8 [llama-cli]")
            .unwrap()
            .unwrap();
        assert_eq!(ev.device, "259,1");
        assert_eq!(ev.cpu, 7);
        assert_eq!(ev.sequence, 1);
        assert_eq!(ev.timestamp, 0.000125);
        assert_eq!(ev.pid, 137);
        assert!(ev.is_dispatch());
        assert!(ev.is_read());
        assert_eq!(ev.start_sector, SectorNo(1747855872));
        assert_eq!(ev.length_sectors, 8);
        assert_eq!(ev.byte_len(), 4096);
        assert_eq!(ev.end_sector(), SectorNo(1747855880));
        assert_eq!(ev.process_name.as_deref(), Some("llama-cli"));
    }

    #[test]
    fn test_process_name_optional() {
        let ev = parse_blk_line("8,0 0 5 1.5 99 C RA 2048 + 16 (  123) [0]")
            .unwrap()
            .unwrap();
        assert_eq!(ev.process_name.as_deref(), Some("0"));
        assert!(ev.is_read());
        assert!(!ev.is_dispatch());

        let ev = parse_blk_line("8,0 0 5 1.5 99 Q WS 2048 + 16").unwrap().unwrap();
        assert_eq!(ev.process_name, None);
        assert!(!ev.is_read());
    }

    #[test]
    fn test_skips_short_and_summary_lines() {
        assert_eq!(parse_blk_line("").unwrap(), None);
        assert_eq!(parse_blk_line("CPU0 (8,0):").unwrap(), None);
        assert_eq!(
            parse_blk_line("Total (8,0): Reads Queued: 5, 20KiB Writes Queued: 0, 0KiB").unwrap(),
            None
        );
        assert_eq!(
            parse_blk_line(" Reads Queued:           5,       20KiB  Writes Queued:           0,        0KiB")
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_malformed_numeric_field() {
        let err = parse_blk_line("8,0 0 5 1.5 99 D R notasector + 8 [x]").unwrap_err();
        assert_eq!(err.field, "sector");
        let err = parse_blk_line("8,0 0 5 later 99 D R 10 + 8 [x]").unwrap_err();
        assert_eq!(err.field, "timestamp");
    }

    #[test]
    fn test_rejects_sector_range_past_limit() {
        let err = parse_blk_line("8,0 0 5 1.5 99 D R 100 + 36028797018963968 [x]").unwrap_err();
        assert_eq!(err.field, "length");
        assert_eq!(err.value, "36028797018963968");

        let err = parse_blk_line("8,0 0 5 1.5 99 D R 18446744073709551610 + 8 [x]").unwrap_err();
        assert_eq!(err.field, "sector");

        let line = format!("8,0 0 5 1.5 99 D R {} + 0 [x]", MAX_SECTOR);
        let ev = parse_blk_line(&line).unwrap().unwrap();
        assert!(i64::try_from(ev.end_sector().to_bytes()).is_ok());
    }

    #[test]
    fn test_reader_counts_out_of_range_and_non_utf8() {
        let mut input = b"8,0 0 1 0.1 10 D R 100 + 8 [a]\n".to_vec();
        input.extend_from_slice(b"8,0 0 2 0.2 10 D R 18446744073709551610 + 8 [a]\n");
        input.extend_from_slice(&[0xFF, 0xFE, b'\n']);
        input.extend_from_slice(b"8,0 0 3 0.3 10 D R 108 + 8 [a]\n");

        let mut reader = BlkTraceReader::new(Cursor::new(input));
        let events: Vec<_> = reader.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(
            reader.stats(),
            IngestStats {
                lines: 4,
                events: 2,
                skipped: 0,
                malformed: 2,
            }
        );
    }

    #[test]
    fn test_reader_counts_lines() {
        let text = "\
8,0 0 1 0.1 10 D R 100 + 8 [a]
8,0 0 2 0.2 10 D R bad + 8 [a]
CPU0 (8,0):
8,0 0 3 0.3 10 D R 108 + 8 [a]
";
        let mut reader = BlkTraceReader::new(Cursor::new(text));
        let events: Vec<_> = reader.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].start_sector, SectorNo(108));
        assert_eq!(
            reader.stats(),
            IngestStats {
                lines: 4,
                events: 2,
                skipped: 1,
                malformed: 1,
            }
        );
    }
}
