//! candump log format
//!
//! One frame per line:
//!
//! ```text
//! (1609459200.123456) can0 18FFE103#0000133F00000000
//! ```
//!
//! Blank lines and lines starting with `#` carry no frame and are skipped.
//! Only classic data frames are accepted; CAN-FD (`##`) and remote (`#R`)
//! frames are reported as unparseable.

use crate::types::{MonitorError, RawFrame, Result, MAX_DATA_LEN};
use std::fmt::Write as _;
use std::io::BufRead;

/// Largest 29-bit identifier
const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A frame together with the interface it was captured on
#[derive(Debug, Clone, PartialEq)]
pub struct CandumpRecord {
    pub interface: String,
    pub frame: RawFrame,
}

fn parse_error(line: usize, reason: impl Into<String>) -> MonitorError {
    MonitorError::TraceParse {
        line,
        reason: reason.into(),
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Parse a single log line
///
/// # Arguments
/// * `line` - Raw text of the line, trailing whitespace allowed
/// * `line_no` - 1-based line number, used in error reports
///
/// # Returns
/// * `Ok(None)` for blank and comment lines
/// * `Ok(Some(record))` for a frame line
/// * `Err(MonitorError::TraceParse)` if the line cannot be parsed
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<CandumpRecord>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let rest = line
        .strip_prefix('(')
        .ok_or_else(|| parse_error(line_no, "missing '(' before timestamp"))?;
    let close = rest
        .find(')')
        .ok_or_else(|| parse_error(line_no, "missing ')' after timestamp"))?;

    let timestamp: f64 = rest[..close]
        .trim()
        .parse()
        .map_err(|_| parse_error(line_no, format!("invalid timestamp {:?}", &rest[..close])))?;
    if !timestamp.is_finite() {
        return Err(parse_error(line_no, "timestamp is not finite"));
    }

    let mut parts = rest[close + 1..].split_whitespace();
    let interface = parts
        .next()
        .ok_or_else(|| parse_error(line_no, "missing interface name"))?;
    let message = parts
        .next()
        .ok_or_else(|| parse_error(line_no, "missing ID#DATA field"))?;

    let (id_hex, data_hex) = message
        .split_once('#')
        .ok_or_else(|| parse_error(line_no, format!("no '#' in {:?}", message)))?;
    if data_hex.starts_with('#') {
        return Err(parse_error(line_no, "CAN-FD frames are not supported"));
    }
    if data_hex.starts_with('R') || data_hex.starts_with('r') {
        return Err(parse_error(line_no, "remote frames carry no data"));
    }

    let id = u32::from_str_radix(id_hex, 16)
        .map_err(|_| parse_error(line_no, format!("invalid CAN ID {:?}", id_hex)))?;
    if id > MAX_EXTENDED_ID {
        return Err(parse_error(line_no, format!("CAN ID 0x{:X} exceeds 29 bits", id)));
    }

    let data = decode_hex(data_hex)
        .ok_or_else(|| parse_error(line_no, format!("invalid data bytes {:?}", data_hex)))?;
    if data.len() > MAX_DATA_LEN {
        return Err(parse_error(
            line_no,
            format!("{} data bytes exceed classic CAN payload", data.len()),
        ));
    }

    Ok(Some(CandumpRecord {
        interface: interface.to_string(),
        frame: RawFrame {
            id,
            data,
            timestamp,
        },
    }))
}

/// Render a frame as a candump log line (without newline)
pub fn format_line(frame: &RawFrame, interface: &str) -> String {
    let mut line = String::with_capacity(48);
    let _ = write!(line, "({:.6}) {} ", frame.timestamp, interface);
    if frame.is_extended() {
        let _ = write!(line, "{:08X}#", frame.id);
    } else {
        let _ = write!(line, "{:03X}#", frame.id);
    }
    for byte in &frame.data {
        let _ = write!(line, "{:02X}", byte);
    }
    line
}

/// Iterator over the frame lines of a candump log
///
/// Yields `(line_no, record)` pairs. Unparseable lines are yielded as
/// errors so the caller decides whether to skip them; IO errors end the
/// iteration after being reported once.
pub struct CandumpReader<R> {
    reader: R,
    line_no: usize,
    buf: String,
    done: bool,
}

impl<R: BufRead> CandumpReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
            done: false,
        }
    }

    /// Number of lines consumed so far
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for CandumpReader<R> {
    type Item = Result<(usize, CandumpRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    match parse_line(&self.buf, self.line_no) {
                        Ok(Some(record)) => return Some(Ok((self.line_no, record))),
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}
