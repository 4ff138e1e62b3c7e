//! Trace ingestion: the `TraceSource` contract and its two concrete
//! readers, a newline-delimited JSON stream and a length-prefixed
//! binary framing of the same record shape.

use std::io::{BufRead, Read};

use serde::Deserialize;

use crate::common::TraceError;

/// One decoded trace record, as read from the input stream. Register
/// names are raw (not yet ABI-normalized — [`crate::disasm::normalize`]
/// runs at decode time, not here) and loads/stores are byte addresses
/// the instruction touches.
#[derive(Clone, Debug, Deserialize)]
pub struct TraceRecord {
    pub addr: u64,
    pub mnemonic: String,
    #[serde(default)]
    pub operands: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub loads: Vec<u64>,
    #[serde(default)]
    pub stores: Vec<u64>,
    /// `vlmul` field of a `vsetvli`-controlled region, as a ratio
    /// string (`"1"`, `"1/4"`, `"8"`, ...). `None` for scalar records.
    #[serde(default)]
    pub lmul: Option<String>,
    /// Present when this instruction redirects control flow to a
    /// non-sequential address outside the normal branch-resolution
    /// path (traps, interrupts) — `FetchUnit` treats it identically to
    /// a taken branch's redirect.
    #[serde(default)]
    pub exception_redirect: Option<u64>,
}

/// A stream of trace records. `next_record` returns `Ok(None)` at
/// end of stream, never an empty-but-more-to-come state — callers see
/// exhaustion unambiguously.
pub trait TraceSource {
    fn next_record(&mut self) -> Result<Option<TraceRecord>, TraceError>;
}

/// One JSON object per line.
pub struct JsonLineTraceSource<R> {
    reader: R,
    line_no: u64,
}

impl<R: BufRead> JsonLineTraceSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }
}

impl<R: BufRead> TraceSource for JsonLineTraceSource<R> {
    fn next_record(&mut self) -> Result<Option<TraceRecord>, TraceError> {
        loop {
            let mut line = String::new();
            let bytes = self.reader.read_line(&mut line)?;
            if bytes == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = serde_json::from_str(trimmed).map_err(|source| TraceError::Malformed {
                line: self.line_no,
                source,
            })?;
            return Ok(Some(record));
        }
    }
}

/// Each record framed as a little-endian `u32` byte length followed by
/// that many bytes of the same JSON object `JsonLineTraceSource` reads.
/// This keeps one record shape for both formats; only the delimiter
/// differs (newline vs. length prefix), which is what callers actually
/// choose between when they pick a trace format.
pub struct BinaryFrameTraceSource<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> BinaryFrameTraceSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }
}

impl<R: Read> TraceSource for BinaryFrameTraceSource<R> {
    fn next_record(&mut self) -> Result<Option<TraceRecord>, TraceError> {
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(_) => {
                return Err(TraceError::TruncatedFrame {
                    offset: self.offset,
                })
            }
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut buf = vec![0u8; len];
        self.reader
            .read_exact(&mut buf)
            .map_err(|_| TraceError::TruncatedFrame {
                offset: self.offset,
            })?;
        self.offset += 4 + len as u64;
        let record = serde_json::from_slice(&buf).map_err(|source| TraceError::Malformed {
            line: self.offset,
            source,
        })?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn json_line_source_skips_blank_lines() {
        let data = "\n{\"addr\":4,\"mnemonic\":\"add\"}\n\n";
        let mut src = JsonLineTraceSource::new(Cursor::new(data));
        let rec = src.next_record().unwrap().unwrap();
        assert_eq!(rec.addr, 4);
        assert_eq!(rec.mnemonic, "add");
        assert!(src.next_record().unwrap().is_none());
    }

    #[test]
    fn json_line_source_reports_malformed_line() {
        let mut src = JsonLineTraceSource::new(Cursor::new("not json\n"));
        assert!(matches!(
            src.next_record(),
            Err(TraceError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn binary_frame_source_round_trips_a_record() {
        let payload = br#"{"addr":8,"mnemonic":"sub"}"#;
        let mut bytes = (payload.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(payload);
        let mut src = BinaryFrameTraceSource::new(Cursor::new(bytes));
        let rec = src.next_record().unwrap().unwrap();
        assert_eq!(rec.addr, 8);
        assert!(src.next_record().unwrap().is_none());
    }
}
