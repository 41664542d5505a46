//! Trace file formats
//!
//! Only the text log format written by `candump -L` is supported. The reader
//! yields one record per frame line and the writer produces the same grammar.

pub mod candump;

// Re-export parser types
pub use candump::{format_line, parse_line, CandumpReader, CandumpRecord};
