//! Simulated inverter traffic
//!
//! Generates plausible setpoint and status values for both inverters and
//! encodes them with the regular codec, so simulated frames go through
//! exactly the same decode path as real ones.
//!
//! The shared speed setpoint swings around 3000 rpm; each inverter tracks it
//! with its own ripple, and the torques follow slow sinusoids with a small
//! random jitter.

use crate::codec::{FrameCodec, InverterMessage};
use crate::transport::FrameSource;
use crate::types::{Inverter, RawFrame, Result, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

/// Peak random jitter on actual speeds (rpm)
const SPEED_JITTER_RPM: f64 = 5.0;
/// Peak random jitter on actual torques (Nm)
const TORQUE_JITTER_NM: f64 = 0.2;

/// Generator of one five-frame burst per call
pub struct InverterSimulator {
    codec: FrameCodec,
    rng: StdRng,
}

impl InverterSimulator {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic simulator for tests and reproducible traces
    pub fn with_seed(codec: FrameCodec, seed: u64) -> Self {
        Self {
            codec,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn jitter(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-1.0..=1.0) * amplitude
    }

    /// Physical values at `t` seconds into the simulation
    ///
    /// Order: shared speed setpoint, then torque setpoint and status for A,
    /// then for B.
    pub fn messages_at(&mut self, t: f64) -> Vec<InverterMessage> {
        let speed_setpoint = 3000.0 + 500.0 * (t * 0.5).sin();

        let speed_a = speed_setpoint + 50.0 * (t * 2.0).sin() + self.jitter(SPEED_JITTER_RPM);
        let torque_sp_a = 30.0 + 10.0 * (t * 0.3).sin();
        let torque_a = torque_sp_a + 2.0 * (t * 1.5).sin() + self.jitter(TORQUE_JITTER_NM);

        let speed_b = speed_setpoint + 60.0 * (t * 1.8).sin() + self.jitter(SPEED_JITTER_RPM);
        let torque_sp_b = 35.0 + 12.0 * (t * 0.35 + 0.3).sin();
        let torque_b = torque_sp_b + 3.0 * (t * 1.3 + PI / 7.0).sin() + self.jitter(TORQUE_JITTER_NM);

        vec![
            InverterMessage::shared_speed_setpoint(speed_setpoint, t),
            InverterMessage::torque_setpoint(Inverter::A, torque_sp_a, t),
            InverterMessage::status(Inverter::A, speed_a, torque_a, t),
            InverterMessage::torque_setpoint(Inverter::B, torque_sp_b, t),
            InverterMessage::status(Inverter::B, speed_b, torque_b, t),
        ]
    }

    /// Encoded frames at `t` seconds into the simulation
    pub fn frames_at(&mut self, t: f64) -> Result<Vec<RawFrame>> {
        self.messages_at(t)
            .iter()
            .map(|message| self.codec.encode(message))
            .collect()
    }

    /// A whole recording: one burst every `period` for `duration`
    ///
    /// Timestamps start at `start` (e.g. the current UNIX time).
    pub fn record(&mut self, duration: Duration, period: Duration, start: f64) -> Result<Vec<RawFrame>> {
        let bursts = (duration.as_secs_f64() / period.as_secs_f64()).floor() as u64;
        let mut frames = Vec::with_capacity(bursts as usize * 5);
        for k in 0..bursts {
            let t = k as f64 * period.as_secs_f64();
            for frame in self.frames_at(t)? {
                frames.push(frame.with_timestamp(start + t));
            }
        }
        Ok(frames)
    }
}

/// Frame source emitting one simulated burst per period
pub struct SimulatedSource {
    simulator: InverterSimulator,
    ticker: Receiver<Instant>,
    started: Instant,
    pending: VecDeque<RawFrame>,
}

impl SimulatedSource {
    pub fn new(simulator: InverterSimulator, period: Duration) -> Self {
        Self {
            simulator,
            ticker: crossbeam_channel::tick(period),
            started: Instant::now(),
            pending: VecDeque::new(),
        }
    }
}

impl FrameSource for SimulatedSource {
    fn receive(&mut self, timeout: Duration) -> std::result::Result<Option<RawFrame>, TransportError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        match self.ticker.recv_timeout(timeout) {
            Ok(at) => {
                let t = at.saturating_duration_since(self.started).as_secs_f64();
                let frames = self
                    .simulator
                    .frames_at(t)
                    .map_err(|e| TransportError::Unavailable(format!("simulator: {}", e)))?;
                self.pending.extend(frames);
                Ok(self.pending.pop_front())
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::EndOfStream),
        }
    }
}
