//! Live monitor
//!
//! Connects a frame source to the codec and the shared sample buffer.
//! Two threads run per session:
//! - the producer blocks on the source, decodes each frame and pushes the
//!   updates into the buffer;
//! - the publisher wakes every refresh interval and hands a snapshot to
//!   consumers over a bounded channel, dropping it if they fall behind.
//!
//! Neither thread ever waits on a consumer.

use crate::buffer::{BufferSnapshot, SharedSampleBuffer};
use crate::codec::FrameCodec;
use crate::config::MonitorConfig;
use crate::replay::StopSignal;
use crate::signals::MessageKind;
use crate::transport::FrameSource;
use crate::types::{Inverter, InverterSample, MonitorError, RawFrame, Result, TransportError};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Snapshots buffered for slow consumers before new ones are dropped
const SNAPSHOT_QUEUE_DEPTH: usize = 4;

/// What happened to a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A known message, merged into the buffer
    Decoded(MessageKind),
    /// Other traffic on the bus
    Ignored,
    /// A known ID with too few bytes; dropped
    Malformed,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    per_inverter: [AtomicU64; 2],
    ignored: AtomicU64,
    malformed: AtomicU64,
}

/// Frame counters since the monitor started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Every frame received, known or not
    pub frames_total: u64,
    /// Inverter-specific frames (torque setpoint and status) for A and B
    pub frames_per_inverter: [u64; 2],
    /// Frames with IDs outside the known table
    pub frames_ignored: u64,
    /// Known frames dropped for being too short
    pub frames_malformed: u64,
}

impl MonitorStats {
    pub fn frames_for(&self, inverter: Inverter) -> u64 {
        self.frames_per_inverter[inverter.index()]
    }
}

/// State of both inverters handed to consumers
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    /// Wall-clock seconds since the monitor started
    pub elapsed: f64,
    /// Sample history of both inverters
    pub buffer: BufferSnapshot,
    pub stats: MonitorStats,
    /// Per-inverter update rate over the configured window
    pub inverter_rates: [Option<f64>; 2],
}

impl MonitorSnapshot {
    pub fn latest(&self, inverter: Inverter) -> Option<&InverterSample> {
        self.buffer.latest(inverter)
    }

    pub fn speed_error(&self, inverter: Inverter) -> Option<f64> {
        self.buffer.speed_error(inverter)
    }

    pub fn torque_error(&self, inverter: Inverter) -> Option<f64> {
        self.buffer.torque_error(inverter)
    }

    /// Shared speed setpoint as last seen by either inverter
    pub fn shared_speed_setpoint(&self) -> Option<f64> {
        Inverter::ALL
            .iter()
            .filter_map(|&inv| self.latest(inv))
            .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
            .and_then(|sample| sample.speed_setpoint_rpm)
    }

    /// Frames per second over the whole session
    pub fn message_rate(&self) -> f64 {
        if self.elapsed > 0.0 {
            self.stats.frames_total as f64 / self.elapsed
        } else {
            0.0
        }
    }
}

/// Decode-and-buffer engine shared by the producer and publisher threads
pub struct MonitorLoop {
    codec: FrameCodec,
    buffer: SharedSampleBuffer,
    config: MonitorConfig,
    counters: Counters,
    stop: StopSignal,
    started: Instant,
}

impl MonitorLoop {
    /// Create a monitor, validating the configuration first
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            codec: FrameCodec::default(),
            buffer: SharedSampleBuffer::new(config.buffer_capacity)?,
            config,
            counters: Counters::default(),
            stop: StopSignal::new(),
            started: Instant::now(),
        })
    }

    /// Builder method: use a specific codec
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn buffer(&self) -> &SharedSampleBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Seconds since the monitor was created
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Process a frame stamped with the time it was received
    pub fn process_frame(&self, frame: &RawFrame) -> FrameOutcome {
        self.process_frame_at(frame, self.elapsed())
    }

    /// Process a frame stamped with an explicit timestamp
    pub fn process_frame_at(&self, frame: &RawFrame, timestamp: f64) -> FrameOutcome {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        match self.codec.decode(frame) {
            Ok(Some(message)) => {
                let targets = message.kind.targets();
                if let [inverter] = targets {
                    self.counters.per_inverter[inverter.index()].fetch_add(1, Ordering::Relaxed);
                }
                if message.kind == MessageKind::SharedSpeedSetpoint {
                    log::trace!(
                        "Speed setpoint: {:.0} rpm",
                        message.update.speed_setpoint_rpm.unwrap_or_default()
                    );
                }
                self.buffer.push_all(&message.updates(), timestamp);
                FrameOutcome::Decoded(message.kind)
            }
            Ok(None) => {
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Ignored
            }
            Err(e) => {
                log::warn!("Dropping frame: {}", e);
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Malformed
            }
        }
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            frames_total: self.counters.total.load(Ordering::Relaxed),
            frames_per_inverter: [
                self.counters.per_inverter[0].load(Ordering::Relaxed),
                self.counters.per_inverter[1].load(Ordering::Relaxed),
            ],
            frames_ignored: self.counters.ignored.load(Ordering::Relaxed),
            frames_malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let buffer = self.buffer.snapshot();
        let window = self.config.rate_window;
        MonitorSnapshot {
            elapsed: self.elapsed(),
            inverter_rates: [
                buffer.message_rate(Inverter::A, window),
                buffer.message_rate(Inverter::B, window),
            ],
            buffer,
            stats: self.stats(),
        }
    }

    /// Receive and process frames on the current thread
    ///
    /// Returns when a stop is requested or the source is exhausted. Any
    /// other transport failure ends the session with an error.
    pub fn run<S: FrameSource + ?Sized>(&self, source: &mut S) -> Result<()> {
        let poll = self.config.poll_interval();
        log::info!("Monitor started (buffer {} samples)", self.config.buffer_capacity);

        while !self.stop.is_stopped() {
            match source.receive(poll) {
                Ok(Some(frame)) => {
                    self.process_frame(&frame);
                }
                Ok(None) => {}
                Err(TransportError::EndOfStream) => {
                    log::info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    log::error!("Transport failure: {}", e);
                    return Err(e.into());
                }
            }
        }

        log::info!("Monitor stopped after {} frames", self.stats().frames_total);
        Ok(())
    }

    /// Start the producer and publisher threads
    pub fn spawn<S: FrameSource + 'static>(self, mut source: S) -> Result<MonitorHandle> {
        let monitor = Arc::new(self);
        let stop = monitor.stop_signal();
        let (tx, rx) = crossbeam_channel::bounded(SNAPSHOT_QUEUE_DEPTH);

        let producer = {
            let monitor = Arc::clone(&monitor);
            thread::Builder::new()
                .name("monitor-producer".to_string())
                .spawn(move || {
                    let result = monitor.run(&mut source);
                    monitor.stop.stop();
                    result
                })?
        };

        let publisher = {
            let monitor = Arc::clone(&monitor);
            thread::Builder::new()
                .name("monitor-publisher".to_string())
                .spawn(move || monitor.publish(tx))
        };
        let publisher = match publisher {
            Ok(handle) => handle,
            Err(e) => {
                stop.stop();
                return Err(e.into());
            }
        };

        Ok(MonitorHandle {
            monitor,
            snapshots: rx,
            stop,
            producer,
            publisher,
        })
    }

    fn publish(&self, tx: Sender<MonitorSnapshot>) {
        let interval = self.config.refresh_interval();
        loop {
            let stopped = self.stop.wait(interval);
            match tx.try_send(self.snapshot()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => log::trace!("Consumer behind, snapshot dropped"),
                Err(TrySendError::Disconnected(_)) => break,
            }
            if stopped {
                break;
            }
        }
    }
}

/// Running monitor session
pub struct MonitorHandle {
    monitor: Arc<MonitorLoop>,
    snapshots: Receiver<MonitorSnapshot>,
    stop: StopSignal,
    producer: JoinHandle<Result<()>>,
    publisher: JoinHandle<()>,
}

impl MonitorHandle {
    /// Periodic snapshots
    ///
    /// A final snapshot is queued when the session stops if the consumer has
    /// room for it; the channel disconnects afterwards.
    pub fn snapshots(&self) -> &Receiver<MonitorSnapshot> {
        &self.snapshots
    }

    /// Snapshot taken right now, outside the publishing cadence
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.monitor.snapshot()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.producer.is_finished()
    }

    /// Stop both threads and return the producer's outcome
    pub fn join(self) -> Result<MonitorStats> {
        self.stop.stop();
        let outcome = self
            .producer
            .join()
            .map_err(|_| MonitorError::Worker("monitor producer panicked".to_string()))?;
        self.publisher
            .join()
            .map_err(|_| MonitorError::Worker("monitor publisher panicked".to_string()))?;
        outcome.map(|()| self.monitor.stats())
    }
}
