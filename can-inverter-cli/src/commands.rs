//! Subcommand implementations

use crate::config::AppConfig;
use crate::csv_log::{local_datetime, CsvLogger};
use crate::status::{status_line, StatusThrottle};
use anyhow::{bail, Context, Result};
use can_inverter_core::{
    CandumpSink, CandumpSource, FrameCodec, FrameOutcome, FrameSink, FrameSource, Inverter,
    InverterSimulator, LoopbackTransport, MonitorLoop, MonitorSnapshot, ReplayScheduler,
    ReplayStats, ReplayTrace, SimulatedSource, TransportKind,
};
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long the consumer waits for a snapshot before re-checking its deadline
const CONSUMER_POLL: Duration = Duration::from_millis(200);

fn session_duration(seconds: Option<f64>) -> Result<Option<Duration>> {
    seconds
        .map(|s| {
            Duration::try_from_secs_f64(s)
                .ok()
                .filter(|d| !d.is_zero())
                .with_context(|| format!("Invalid duration: {} s", s))
        })
        .transpose()
}

fn open_trace(path: &Path) -> Result<ReplayTrace> {
    let trace = ReplayTrace::from_path(path)
        .with_context(|| format!("Failed to load trace: {:?}", path))?;
    log::info!(
        "Trace: {} frames over {:.1} s",
        trace.len(),
        trace.duration().as_secs_f64()
    );
    Ok(trace)
}

/// Live monitor session
pub fn monitor(config: &AppConfig, trace: Option<&Path>, seconds: Option<f64>) -> Result<()> {
    let duration = session_duration(seconds)?;
    let monitor_config = config.monitor.clone();

    // Load the trace first so a bad trace leaves no CSV file behind
    let replay_input = match monitor_config.transport {
        TransportKind::Trace => {
            let path = trace.context("Trace transport selected but no trace file given")?;
            let trace = open_trace(path)?;
            Some((ReplayScheduler::new(config.replay.clone())?, trace))
        }
        _ => None,
    };

    // Then the CSV, before any transport is opened
    let mut csv = match &config.output.csv {
        Some(path) => Some(CsvLogger::create(path)?),
        None => None,
    };

    let mut replayer: Option<ReplayThread> = None;
    let source: Box<dyn FrameSource> = match monitor_config.transport {
        TransportKind::Simulated => {
            log::info!(
                "Source: simulator ({} ms period)",
                monitor_config.simulation_period_ms
            );
            Box::new(SimulatedSource::new(
                InverterSimulator::new(FrameCodec::default()),
                monitor_config.simulation_period(),
            ))
        }
        TransportKind::Stdin => {
            log::info!("Source: candump stream on stdin");
            Box::new(
                CandumpSource::spawn(BufReader::new(io::stdin()))
                    .context("Failed to start stdin reader")?,
            )
        }
        TransportKind::Trace => {
            let (scheduler, trace) =
                replay_input.context("Trace transport selected but no trace loaded")?;
            let (bus, monitor_end) = LoopbackTransport::pair();
            replayer = Some(ReplayThread::spawn(scheduler, trace, bus)?);
            Box::new(monitor_end)
        }
    };

    let handle = MonitorLoop::new(monitor_config)?.spawn(source)?;
    let started = Instant::now();
    let mut throttle = StatusThrottle::new(config.output.status_interval_ms as f64 / 1000.0);
    let mut last: Option<MonitorSnapshot> = None;

    loop {
        match handle.snapshots().recv_timeout(CONSUMER_POLL) {
            Ok(snapshot) => {
                if let Some(csv) = csv.as_mut() {
                    csv.log_snapshot(&snapshot)?;
                }
                if throttle.due(snapshot.elapsed) {
                    log::info!("{}", status_line(&snapshot));
                }
                last = Some(snapshot);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if duration.map_or(false, |d| started.elapsed() >= d) {
            log::debug!("Session duration reached");
            handle.stop();
        }
    }

    let final_snapshot = last.unwrap_or_else(|| handle.snapshot());
    let outcome = handle.join();

    if let Some(replayer) = replayer {
        replayer.finish()?;
    }
    if let Some(csv) = csv {
        let rows = csv.rows();
        csv.finish()?;
        log::info!("Wrote {} CSV rows", rows);
    }

    let stats = outcome.context("Monitor session failed")?;
    log::info!("{}", status_line(&final_snapshot));
    log::info!(
        "Session ended: {} frames ({} ignored, {} malformed)",
        stats.frames_total,
        stats.frames_ignored,
        stats.frames_malformed
    );
    Ok(())
}

/// Replay thread feeding the in-process bus
struct ReplayThread {
    stop: can_inverter_core::StopSignal,
    thread: JoinHandle<can_inverter_core::Result<ReplayStats>>,
}

impl ReplayThread {
    fn spawn(scheduler: ReplayScheduler, trace: ReplayTrace, mut bus: LoopbackTransport) -> Result<Self> {
        let stop = scheduler.stop_signal();
        let thread = thread::Builder::new()
            .name("replay".to_string())
            .spawn(move || scheduler.run(&trace, &mut bus))
            .context("Failed to start replay thread")?;
        Ok(Self { stop, thread })
    }

    /// Stop the replay if still running and report how it ended
    fn finish(self) -> Result<()> {
        self.stop.stop();
        let stats = self
            .thread
            .join()
            .map_err(|_| anyhow::anyhow!("Replay thread panicked"))?;
        match stats {
            Ok(stats) => {
                log::info!("Replayed {} frames in {} pass(es)", stats.frames_sent, stats.passes);
                Ok(())
            }
            // the monitor closed its end first; not a replay failure
            Err(can_inverter_core::MonitorError::Transport(_)) => Ok(()),
            Err(e) => Err(e).context("Replay failed"),
        }
    }
}

/// Replay a trace, writing the emitted frames as candump lines
pub fn replay(config: &AppConfig, path: &Path, output: Option<&PathBuf>) -> Result<()> {
    let trace = open_trace(path)?;
    let scheduler = ReplayScheduler::new(config.replay.clone())?;
    let interface = config.replay.interface.clone();

    let mut sink: Box<dyn FrameSink> = match output {
        Some(out) => {
            let file = File::create(out)
                .with_context(|| format!("Failed to create output file: {:?}", out))?;
            Box::new(CandumpSink::new(BufWriter::new(file), interface))
        }
        None => Box::new(CandumpSink::new(io::stdout(), interface)),
    };

    let stats = scheduler.run(&trace, &mut sink).context("Replay failed")?;
    log::info!(
        "Sent {} frames in {:.2} s ({} pass(es))",
        stats.frames_sent,
        stats.elapsed.as_secs_f64(),
        stats.passes
    );
    Ok(())
}

#[derive(Serialize)]
struct DecodedLine<'a> {
    id: String,
    kind: String,
    timestamp: f64,
    #[serde(flatten)]
    update: &'a can_inverter_core::FieldUpdate,
}

/// Decode a trace without timing: JSON lines to stdout, or carry-forward rows to CSV
pub fn decode(config: &AppConfig, path: &Path) -> Result<()> {
    let trace = open_trace(path)?;

    match &config.output.csv {
        Some(csv_path) => decode_to_csv(config, &trace, csv_path),
        None => decode_to_json(&trace),
    }
}

fn decode_to_json(trace: &ReplayTrace) -> Result<()> {
    let codec = FrameCodec::default();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut decoded = 0usize;

    for entry in trace.entries() {
        match codec.decode(&entry.frame) {
            Ok(Some(message)) => {
                let line = DecodedLine {
                    id: format!("0x{:08X}", entry.frame.id),
                    kind: message.kind.to_string(),
                    timestamp: entry.frame.timestamp,
                    update: &message.update,
                };
                writeln!(out, "{}", serde_json::to_string(&line)?)?;
                decoded += 1;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Dropping frame: {}", e),
        }
    }
    out.flush()?;

    log::info!("Decoded {} of {} frames", decoded, trace.len());
    Ok(())
}

fn decode_to_csv(config: &AppConfig, trace: &ReplayTrace, csv_path: &Path) -> Result<()> {
    let monitor = MonitorLoop::new(config.monitor.clone())?;
    let mut csv = CsvLogger::create(csv_path)?;
    let start = trace
        .entries()
        .first()
        .map_or(0.0, |entry| entry.frame.timestamp);

    for entry in trace.entries() {
        let timestamp = entry.frame.timestamp;
        if let FrameOutcome::Decoded(_) = monitor.process_frame_at(&entry.frame, timestamp) {
            let a = monitor.buffer().latest(Inverter::A);
            let b = monitor.buffer().latest(Inverter::B);
            csv.write_row(
                timestamp - start,
                local_datetime(timestamp),
                a.as_ref(),
                b.as_ref(),
            )?;
        }
    }

    let rows = csv.rows();
    csv.finish()?;
    let stats = monitor.stats();
    log::info!(
        "Wrote {} CSV rows ({} ignored, {} malformed frames)",
        rows,
        stats.frames_ignored,
        stats.frames_malformed
    );
    Ok(())
}

/// Record simulated traffic as a candump trace
pub fn simulate(config: &AppConfig, seconds: f64, output: &Path) -> Result<()> {
    let duration = session_duration(Some(seconds))?.context("A duration is required")?;
    let period = config.monitor.simulation_period();
    if duration < period {
        bail!(
            "Duration {:.3} s is shorter than one simulation period ({} ms)",
            seconds,
            config.monitor.simulation_period_ms
        );
    }

    let start = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    let frames = InverterSimulator::new(FrameCodec::default())
        .record(duration, period, start)
        .context("Simulation failed")?;

    let file = File::create(output)
        .with_context(|| format!("Failed to create output file: {:?}", output))?;
    let mut sink = CandumpSink::new(BufWriter::new(file), config.monitor.interface_name());
    for frame in &frames {
        sink.send(frame)
            .with_context(|| format!("Failed to write {:?}", output))?;
    }

    log::info!(
        "Recorded {} frames ({:.1} s) to {:?}",
        sink.written(),
        duration.as_secs_f64(),
        output
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Overrides;

    #[test]
    fn test_session_duration() {
        assert_eq!(session_duration(None).unwrap(), None);
        assert_eq!(
            session_duration(Some(1.5)).unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert!(session_duration(Some(0.0)).is_err());
        assert!(session_duration(Some(-2.0)).is_err());
        assert!(session_duration(Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_simulate_then_decode_to_csv() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("sim.log");
        let csv_path = dir.path().join("decoded.csv");

        let mut config = AppConfig::default();
        simulate(&config, 1.0, &trace_path).unwrap();

        let trace = ReplayTrace::from_path(&trace_path).unwrap();
        assert_eq!(trace.len(), 100);

        config.apply(&Overrides {
            csv: Some(csv_path.clone()),
            ..Overrides::default()
        });
        decode(&config, &trace_path).unwrap();

        let text = std::fs::read_to_string(&csv_path).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 101);
        assert!(rows[0].starts_with("timestamp,datetime,inv_a_act_speed_rpm"));

        // first row: only the shared setpoint is known so far
        let first: Vec<&str> = rows[1].split(',').collect();
        assert_eq!(first[2], "");
        assert!(!first[3].is_empty());
        assert_eq!(first[7], first[3]);

        // after a full burst every cell is filled
        let fifth: Vec<&str> = rows[5].split(',').collect();
        assert!(fifth.iter().all(|cell| !cell.is_empty()));

        // session time starts at zero, wall-clock time comes from the trace
        assert_eq!(first[0], "0.000");
        assert_eq!(first[1].len(), "2023-11-14 22:13:20.250".len());
        let last: Vec<&str> = rows[100].split(',').collect();
        let last_elapsed: f64 = last[0].parse().unwrap();
        assert!((0.9..1.0).contains(&last_elapsed), "{}", last_elapsed);
    }

    #[test]
    fn test_simulate_rejects_tiny_duration() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default();
        assert!(simulate(&config, 0.01, &dir.path().join("x.log")).is_err());
    }

    #[test]
    fn test_monitor_requires_trace_path() {
        let mut config = AppConfig::default();
        config.monitor.transport = TransportKind::Trace;
        assert!(monitor(&config, None, Some(0.1)).is_err());
    }

    #[test]
    fn test_monitor_bad_trace_leaves_no_csv() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("never.csv");

        let mut config = AppConfig::default();
        config.monitor.transport = TransportKind::Trace;
        config.apply(&Overrides {
            csv: Some(csv_path.clone()),
            ..Overrides::default()
        });

        let missing = dir.path().join("missing.log");
        assert!(monitor(&config, Some(&missing), Some(0.1)).is_err());
        assert!(!csv_path.exists());

        let empty = dir.path().join("empty.log");
        std::fs::write(&empty, "no frames here\n").unwrap();
        assert!(monitor(&config, Some(&empty), Some(0.1)).is_err());
        assert!(!csv_path.exists());
    }

    #[test]
    fn test_monitor_replays_trace_for_bounded_duration() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("sim.log");
        let csv_path = dir.path().join("live.csv");

        let mut config = AppConfig::default();
        simulate(&config, 0.5, &trace_path).unwrap();

        config.monitor.transport = TransportKind::Trace;
        config.apply(&Overrides {
            csv: Some(csv_path.clone()),
            speed: Some(5.0),
            loop_playback: true,
            ..Overrides::default()
        });
        monitor(&config, Some(&trace_path), Some(0.4)).unwrap();

        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(text.lines().count() > 1);
    }
}
