//! Frame transports
//!
//! The monitor and the replayer only see these two traits. Hardware drivers
//! live outside this crate; the backends here are an in-process loopback and
//! candump text streams.

use crate::formats::candump::{format_line, CandumpReader};
use crate::types::{RawFrame, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

/// Something frames can be received from
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame
    ///
    /// Returns `Ok(None)` if nothing arrived in time and
    /// `Err(TransportError::EndOfStream)` once a finite source is exhausted.
    fn receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError>;
}

/// Something frames can be sent to
pub trait FrameSink: Send {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
        (**self).receive(timeout)
    }
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        (**self).send(frame)
    }
}

/// Frames a loopback end holds before `send` blocks
pub const DEFAULT_LOOPBACK_DEPTH: usize = 1024;

/// One end of an in-process CAN bus
///
/// Frames sent on one end are received on the other. Each direction is a
/// bounded queue, so a sender faster than its peer blocks instead of growing
/// memory. Dropping an end closes the stream for its peer.
pub struct LoopbackTransport {
    tx: Sender<RawFrame>,
    rx: Receiver<RawFrame>,
}

impl LoopbackTransport {
    /// Create two connected ends with the default queue depth
    pub fn pair() -> (Self, Self) {
        Self::with_capacity(DEFAULT_LOOPBACK_DEPTH)
    }

    /// Create two connected ends holding at most `depth` frames per direction
    ///
    /// A depth of 0 makes every send wait for the peer to receive.
    pub fn with_capacity(depth: usize) -> (Self, Self) {
        let (a_tx, b_rx) = crossbeam_channel::bounded(depth);
        let (b_tx, a_rx) = crossbeam_channel::bounded(depth);
        (Self { tx: a_tx, rx: a_rx }, Self { tx: b_tx, rx: b_rx })
    }

    /// Frames waiting to be received on this end
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl FrameSource for LoopbackTransport {
    fn receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::EndOfStream),
        }
    }
}

impl FrameSink for LoopbackTransport {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame.clone())
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Writes every sent frame as a candump log line
pub struct CandumpSink<W> {
    writer: W,
    interface: String,
    written: u64,
}

impl<W: Write + Send> CandumpSink<W> {
    pub fn new(writer: W, interface: impl Into<String>) -> Self {
        Self {
            writer,
            interface: interface.into(),
            written: 0,
        }
    }

    /// Frames written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> FrameSink for CandumpSink<W> {
    fn send(&mut self, frame: &RawFrame) -> Result<(), TransportError> {
        writeln!(self.writer, "{}", format_line(frame, &self.interface))?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

/// Live frame source reading a candump stream on a worker thread
///
/// Timestamps are rebased so the first frame arrives at 0.0 s. Unparseable
/// lines are logged and skipped.
pub struct CandumpSource {
    rx: Receiver<Result<RawFrame, TransportError>>,
}

impl CandumpSource {
    /// Start reading `reader` (e.g. locked stdin) in the background
    ///
    /// Fails if the reader thread cannot be started.
    pub fn spawn<R>(reader: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(DEFAULT_LOOPBACK_DEPTH);
        thread::Builder::new()
            .name("candump-reader".to_string())
            .spawn(move || Self::pump(reader, tx))?;
        Ok(Self { rx })
    }

    fn pump<R: BufRead>(reader: R, tx: Sender<Result<RawFrame, TransportError>>) {
        let mut origin: Option<f64> = None;
        for item in CandumpReader::new(reader) {
            let message = match item {
                Ok((_, record)) => {
                    let t0 = *origin.get_or_insert(record.frame.timestamp);
                    Ok(record.frame.with_timestamp(record.frame.timestamp - t0))
                }
                Err(crate::types::MonitorError::Io(e)) => Err(TransportError::Io(e)),
                Err(e) => {
                    log::warn!("Skipping input line: {}", e);
                    continue;
                }
            };
            if tx.send(message).is_err() {
                // Receiver dropped, session is over
                return;
            }
        }
        log::debug!("candump input exhausted");
    }
}

impl FrameSource for CandumpSource {
    fn receive(&mut self, timeout: Duration) -> Result<Option<RawFrame>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::EndOfStream),
        }
    }
}
