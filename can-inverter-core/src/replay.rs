//! Trace replay
//!
//! A trace is parsed once into entries carrying the delay since the previous
//! valid frame. The scheduler then re-emits those frames through a sink,
//! preserving the relative spacing (scaled by the speed factor) but not the
//! original wall-clock time.
//!
//! Every wait goes through [`StopSignal::wait`], so a stop request wakes the
//! scheduler in the middle of a delay rather than at the next frame.

use crate::config::ReplayConfig;
use crate::formats::candump::CandumpReader;
use crate::transport::FrameSink;
use crate::types::{MonitorError, RawFrame, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress is logged every this many frames
const PROGRESS_INTERVAL: u64 = 100;

/// A frame and the recorded gap before it
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEntry {
    /// Seconds since the previous entry (0 for the first)
    pub delay: f64,
    pub frame: RawFrame,
}

/// A skipped trace line
#[derive(Debug, Clone, PartialEq)]
pub struct TraceWarning {
    pub line: usize,
    pub reason: String,
}

/// Parsed trace, ready to be replayed any number of times
#[derive(Debug, Clone)]
pub struct ReplayTrace {
    entries: Vec<ReplayEntry>,
    warnings: Vec<TraceWarning>,
    /// Absolute timestamps of the first and last entry
    span: (f64, f64),
}

impl ReplayTrace {
    /// Parse a candump trace from any buffered reader
    ///
    /// Unparseable lines are skipped and reported; a trace without a single
    /// valid frame is an error.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut entries: Vec<ReplayEntry> = Vec::new();
        let mut warnings = Vec::new();
        let mut previous: Option<f64> = None;
        let mut first = 0.0;

        for item in CandumpReader::new(reader) {
            match item {
                Ok((_, record)) => {
                    let ts = record.frame.timestamp;
                    let delay = match previous {
                        Some(prev) => (ts - prev).max(0.0),
                        None => {
                            first = ts;
                            0.0
                        }
                    };
                    previous = Some(ts);
                    entries.push(ReplayEntry {
                        delay,
                        frame: record.frame,
                    });
                }
                Err(MonitorError::TraceParse { line, reason }) => {
                    log::warn!("Line {} ignored: {}", line, reason);
                    warnings.push(TraceWarning { line, reason });
                }
                Err(e) => return Err(e),
            }
        }

        let last = match previous {
            Some(last) => last,
            None => {
                return Err(MonitorError::EmptyTrace(format!(
                    "{} line(s) rejected",
                    warnings.len()
                )))
            }
        };

        log::info!(
            "Loaded {} frames ({} line(s) skipped)",
            entries.len(),
            warnings.len()
        );

        Ok(Self {
            entries,
            warnings,
            span: (first, last),
        })
    }

    /// Parse a candump trace file
    pub fn from_path(path: &Path) -> Result<Self> {
        log::info!("Loading trace file: {:?}", path);

        if !path.exists() {
            return Err(MonitorError::Config(format!(
                "trace file not found: {:?}",
                path
            )));
        }

        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file)).map_err(|e| match e {
            MonitorError::EmptyTrace(reason) => {
                MonitorError::EmptyTrace(format!("{:?}: {}", path, reason))
            }
            other => other,
        })
    }

    /// Build a trace directly from entries
    pub fn from_entries(entries: Vec<ReplayEntry>) -> Result<Self> {
        let first = entries
            .first()
            .ok_or_else(|| MonitorError::EmptyTrace("no entries".to_string()))?
            .frame
            .timestamp;
        let duration: f64 = entries.iter().skip(1).map(|e| e.delay.max(0.0)).sum();
        Ok(Self {
            entries,
            warnings: Vec::new(),
            span: (first, first + duration),
        })
    }

    pub fn entries(&self) -> &[ReplayEntry] {
        &self.entries
    }

    pub fn warnings(&self) -> &[TraceWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded duration from the first to the last frame
    ///
    /// Saturates at `Duration::MAX` for spans a `Duration` cannot hold.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64((self.span.1 - self.span.0).max(0.0))
            .unwrap_or(Duration::MAX)
    }
}

/// Cooperative stop request shared between a task and its controller
///
/// Waiters block on a channel whose only sender is dropped by [`stop`],
/// which wakes all of them at once.
///
/// [`stop`]: StopSignal::stop
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug)]
struct StopInner {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(StopInner {
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Request a stop; idempotent
    pub fn stop(&self) {
        self.inner.sender.lock().take();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Block for `timeout` or until stopped
    ///
    /// Returns `true` if the wait ended because of a stop request.
    pub fn wait(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.is_stopped();
        }
        match self.inner.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Block until `deadline` or until stopped
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.wait(deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a replay run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayStats {
    pub frames_sent: u64,
    /// Passes started over the trace
    pub passes: u64,
    pub elapsed: Duration,
    /// True if the run ended on a stop request
    pub cancelled: bool,
}

/// Re-emits a parsed trace with its original spacing
pub struct ReplayScheduler {
    config: ReplayConfig,
    stop: StopSignal,
}

impl ReplayScheduler {
    /// Create a scheduler, validating the configuration
    pub fn new(config: ReplayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stop: StopSignal::new(),
        })
    }

    /// Use an externally owned stop signal
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that cancels a running replay
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replay `trace` into `sink` until it ends or a stop is requested
    ///
    /// Deadlines are accumulated from the start of each pass, so per-frame
    /// send latency does not drift the schedule. A failing sink aborts the
    /// run, and so does a deadline too far out to be represented.
    ///
    /// Looping a trace whose frames all share one timestamp is rejected:
    /// every pass would be sent without any wait.
    pub fn run<S: FrameSink + ?Sized>(&self, trace: &ReplayTrace, sink: &mut S) -> Result<ReplayStats> {
        if self.config.loop_playback && trace.duration().is_zero() {
            return Err(MonitorError::Config(format!(
                "cannot loop a trace of {} frame(s) with no recorded time span",
                trace.len()
            )));
        }

        let started = Instant::now();
        let mut stats = ReplayStats::default();
        let total = trace.len() as u64;

        log::info!(
            "Replaying {} frames ({:.1} s recorded) at {}x{}",
            total,
            trace.duration().as_secs_f64(),
            self.config.speed_factor,
            if self.config.loop_playback { ", looping" } else { "" }
        );

        'passes: loop {
            stats.passes += 1;
            if self.config.loop_playback {
                log::debug!("Replay pass {}", stats.passes);
            }

            let pass_start = Instant::now();
            let mut offset = Duration::ZERO;

            for (i, entry) in trace.entries().iter().enumerate() {
                offset = offset.saturating_add(self.config.scaled(entry.delay));
                let deadline = pass_start.checked_add(offset).ok_or_else(|| {
                    MonitorError::Config(format!(
                        "frame {} is scheduled {:.0} s out, beyond the clock's range",
                        i + 1,
                        offset.as_secs_f64()
                    ))
                })?;
                if self.stop.wait_until(deadline) {
                    stats.cancelled = true;
                    break 'passes;
                }

                sink.send(&entry.frame)?;
                stats.frames_sent += 1;

                let sent_in_pass = i as u64 + 1;
                if sent_in_pass % PROGRESS_INTERVAL == 0 || sent_in_pass == total {
                    log::debug!(
                        "Progress: {}/{} ({:.1}%)",
                        sent_in_pass,
                        total,
                        sent_in_pass as f64 / total as f64 * 100.0
                    );
                }
            }

            if !self.config.loop_playback {
                break;
            }
        }

        stats.elapsed = started.elapsed();
        if stats.cancelled {
            log::info!("Replay stopped after {} frames", stats.frames_sent);
        } else {
            log::info!(
                "Replay complete: {} frames in {:.2} s",
                stats.frames_sent,
                stats.elapsed.as_secs_f64()
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FrameSource, LoopbackTransport};
    use crate::types::TransportError;
    use std::io::Cursor;

    fn frame_line(ts: f64, id: u32) -> String {
        format!("({:.6}) vcan0 {:08X}#0000133F00000000", ts, id)
    }

    #[test]
    fn test_delays_are_relative_and_clamped() {
        let text = [
            frame_line(100.0, 0x18FFE103),
            frame_line(101.5, 0x18FFE203),
            frame_line(101.0, 0x18FFA120),
            frame_line(102.0, 0x18FFB120),
        ]
        .join("\n");
        let trace = ReplayTrace::from_reader(Cursor::new(text)).unwrap();
        let delays: Vec<f64> = trace.entries().iter().map(|e| e.delay).collect();

        assert_eq!(delays, vec![0.0, 1.5, 0.0, 1.0]);
        assert_eq!(trace.duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_one_malformed_line_among_ten() {
        let mut lines: Vec<String> = (0..10).map(|i| frame_line(1.0 + i as f64 * 0.01, 0x18FFF3FE)).collect();
        lines[4] = "(1.04) vcan0 18FFF3FE-0000".to_string();
        lines.push(String::new());
        lines.push("   ".to_string());

        let trace = ReplayTrace::from_reader(Cursor::new(lines.join("\n"))).unwrap();
        assert_eq!(trace.len(), 9);
        assert_eq!(trace.warnings().len(), 1);
        assert_eq!(trace.warnings()[0].line, 5);
    }

    #[test]
    fn test_trace_without_frames_is_an_error() {
        let text = "# nothing here\n\nbroken line\n";
        match ReplayTrace::from_reader(Cursor::new(text)) {
            Err(MonitorError::EmptyTrace(reason)) => assert!(reason.contains("1 line")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ReplayTrace::from_path(Path::new("/nonexistent/trace.log")).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        std::fs::write(
            &path,
            format!("{}\n{}\n", frame_line(5.0, 0x18FFA120), frame_line(5.25, 0x18FFB120)),
        )
        .unwrap();

        let trace = ReplayTrace::from_path(&path).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.entries()[1].delay, 0.25);
    }

    #[test]
    fn test_scheduler_rejects_bad_speed() {
        assert!(ReplayScheduler::new(ReplayConfig::new().with_speed_factor(0.0)).is_err());
        assert!(ReplayScheduler::new(ReplayConfig::new().with_speed_factor(-2.0)).is_err());
    }

    #[test]
    fn test_stop_signal_wakes_waiters() {
        let stop = StopSignal::new();
        assert!(!stop.wait(Duration::from_millis(5)));

        let waiter = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let stopped = stop.wait(Duration::from_secs(10));
                (stopped, start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        stop.stop();
        stop.stop();

        let (stopped, waited) = waiter.join().unwrap();
        assert!(stopped);
        assert!(waited < Duration::from_secs(2));
        assert!(stop.is_stopped());
        assert!(stop.wait(Duration::ZERO));
    }

    #[test]
    fn test_replay_sends_every_frame_in_order() {
        let text = (0..5)
            .map(|i| frame_line(10.0 + i as f64 * 0.001, 0x18FFE103 + i))
            .collect::<Vec<_>>()
            .join("\n");
        let trace = ReplayTrace::from_reader(Cursor::new(text)).unwrap();
        let scheduler = ReplayScheduler::new(ReplayConfig::new()).unwrap();
        let (mut tx, mut rx) = LoopbackTransport::pair();

        let stats = scheduler.run(&trace, &mut tx).unwrap();
        assert_eq!(stats.frames_sent, 5);
        assert_eq!(stats.passes, 1);
        assert!(!stats.cancelled);

        for i in 0..5 {
            let frame = rx.receive(Duration::from_millis(10)).unwrap().unwrap();
            assert_eq!(frame.id, 0x18FFE103 + i);
        }
    }

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn send(&mut self, _frame: &RawFrame) -> std::result::Result<(), TransportError> {
            Err(TransportError::Unavailable("bus off".to_string()))
        }
    }

    #[test]
    fn test_huge_gap_is_rejected_without_panicking() {
        let text = format!(
            "{}\n(99999999999999999999.0) vcan0 18FFE103#0000133F00000000\n",
            frame_line(1.0, 0x18FFE103)
        );
        let trace = ReplayTrace::from_reader(Cursor::new(text)).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.duration(), Duration::MAX);

        let scheduler = ReplayScheduler::new(ReplayConfig::new()).unwrap();
        let (mut tx, mut rx) = LoopbackTransport::pair();
        let err = scheduler.run(&trace, &mut tx).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)), "{}", err);

        // the first frame went out before the unreachable deadline
        assert!(rx.receive(Duration::from_millis(10)).unwrap().is_some());
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_tiny_speed_factor_is_rejected_without_panicking() {
        let text = [frame_line(1.0, 0x18FFE103), frame_line(3.0, 0x18FFE203)].join("\n");
        let trace = ReplayTrace::from_reader(Cursor::new(text)).unwrap();
        let scheduler = ReplayScheduler::new(ReplayConfig::new().with_speed_factor(1e-19)).unwrap();
        let (mut tx, rx) = LoopbackTransport::pair();

        let err = scheduler.run(&trace, &mut tx).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)), "{}", err);
        assert_eq!(rx.pending(), 1);
    }

    #[test]
    fn test_looping_a_zero_span_trace_is_rejected() {
        let trace = ReplayTrace::from_reader(Cursor::new(frame_line(7.0, 0x18FFA120))).unwrap();
        assert_eq!(trace.duration(), Duration::ZERO);

        let looping = ReplayScheduler::new(ReplayConfig::new().with_loop(true)).unwrap();
        let (mut tx, rx) = LoopbackTransport::pair();
        let err = looping.run(&trace, &mut tx).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)), "{}", err);
        assert_eq!(rx.pending(), 0);

        // a single pass is still fine
        let once = ReplayScheduler::new(ReplayConfig::new()).unwrap();
        assert_eq!(once.run(&trace, &mut tx).unwrap().frames_sent, 1);
        assert_eq!(rx.pending(), 1);
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let trace = ReplayTrace::from_reader(Cursor::new(frame_line(1.0, 0x100))).unwrap();
        let scheduler = ReplayScheduler::new(ReplayConfig::new()).unwrap();
        let err = scheduler.run(&trace, &mut FailingSink).unwrap_err();
        assert!(matches!(err, MonitorError::Transport(TransportError::Unavailable(_))));
    }
}
