//! Bounded sample history for both inverters
//!
//! Every push merges a partial update into the inverter's carry-forward
//! state and appends a full copy of the result to that inverter's ring.
//! When a ring is full the oldest sample is evicted.
//!
//! Rings are reference counted. A snapshot shares them with the buffer, and
//! the next push after a snapshot copies the ring it writes to.

use crate::types::{FieldUpdate, Inverter, InverterSample, MonitorError, Result};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Number of trailing samples used for the message rate
pub const DEFAULT_RATE_WINDOW: usize = 50;

/// Messages per second over the last `window` samples
///
/// Needs at least two samples spanning a positive time interval.
fn rate_over(samples: &VecDeque<InverterSample>, window: usize) -> Option<f64> {
    let n = window.min(samples.len());
    if n < 2 {
        return None;
    }
    let first = samples.get(samples.len() - n)?;
    let last = samples.back()?;
    let span = last.timestamp - first.timestamp;
    if span > 0.0 {
        Some((n - 1) as f64 / span)
    } else {
        None
    }
}

/// Fixed-capacity ring buffers of inverter samples
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    capacity: usize,
    rings: [Arc<VecDeque<InverterSample>>; 2],
    /// Carry-forward state, survives eviction
    current: [InverterSample; 2],
    pushed: [u64; 2],
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples per inverter
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(MonitorError::Config(
                "sample buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            rings: [
                Arc::new(VecDeque::with_capacity(capacity)),
                Arc::new(VecDeque::with_capacity(capacity)),
            ],
            current: [InverterSample::default(); 2],
            pushed: [0; 2],
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Merge an update and append the resulting sample
    ///
    /// Returns the new carry-forward sample.
    pub fn push(&mut self, inverter: Inverter, update: &FieldUpdate, timestamp: f64) -> InverterSample {
        let idx = inverter.index();
        let sample = update.merge_into(&self.current[idx], timestamp);
        self.current[idx] = sample;

        let ring = Arc::make_mut(&mut self.rings[idx]);
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
        self.pushed[idx] += 1;

        sample
    }

    /// Number of samples currently held for an inverter
    pub fn len(&self, inverter: Inverter) -> usize {
        self.rings[inverter.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(|ring| ring.is_empty())
    }

    /// Total pushes for an inverter, including evicted samples
    pub fn total_pushed(&self, inverter: Inverter) -> u64 {
        self.pushed[inverter.index()]
    }

    /// Most recent sample, if any was pushed
    pub fn latest(&self, inverter: Inverter) -> Option<InverterSample> {
        self.rings[inverter.index()].back().copied()
    }

    /// Samples of one inverter, oldest first
    pub fn samples(&self, inverter: Inverter) -> impl Iterator<Item = &InverterSample> {
        self.rings[inverter.index()].iter()
    }

    pub fn speed_error(&self, inverter: Inverter) -> Option<f64> {
        self.latest(inverter)?.speed_error()
    }

    pub fn torque_error(&self, inverter: Inverter) -> Option<f64> {
        self.latest(inverter)?.torque_error()
    }

    /// Update rate of one inverter over its last `window` samples
    pub fn message_rate(&self, inverter: Inverter, window: usize) -> Option<f64> {
        rate_over(&self.rings[inverter.index()], window)
    }

    /// Share both rings with a snapshot; O(1)
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            rings: [Arc::clone(&self.rings[0]), Arc::clone(&self.rings[1])],
        }
    }

    /// Drop all samples and the carry-forward state
    pub fn clear(&mut self) {
        for ring in &mut self.rings {
            *ring = Arc::new(VecDeque::with_capacity(self.capacity));
        }
        self.current = [InverterSample::default(); 2];
        self.pushed = [0; 2];
    }
}

/// Frozen view of both rings, oldest sample first
///
/// Later pushes to the buffer never show up here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferSnapshot {
    rings: [Arc<VecDeque<InverterSample>>; 2],
}

impl BufferSnapshot {
    pub fn samples(&self, inverter: Inverter) -> &VecDeque<InverterSample> {
        &self.rings[inverter.index()]
    }

    pub fn latest(&self, inverter: Inverter) -> Option<&InverterSample> {
        self.samples(inverter).back()
    }

    pub fn speed_error(&self, inverter: Inverter) -> Option<f64> {
        self.latest(inverter)?.speed_error()
    }

    pub fn torque_error(&self, inverter: Inverter) -> Option<f64> {
        self.latest(inverter)?.torque_error()
    }

    pub fn message_rate(&self, inverter: Inverter, window: usize) -> Option<f64> {
        rate_over(self.samples(inverter), window)
    }

    /// Timestamp of the newest sample across both inverters
    pub fn last_timestamp(&self) -> Option<f64> {
        Inverter::ALL
            .iter()
            .filter_map(|&inv| self.latest(inv).map(|s| s.timestamp))
            .reduce(f64::max)
    }
}

/// Thread-safe handle to a sample buffer
///
/// One producer pushes while any number of consumers take snapshots. Each
/// push runs under a single write guard, so readers never see a partially
/// merged sample.
#[derive(Debug, Clone)]
pub struct SharedSampleBuffer {
    inner: Arc<RwLock<SampleBuffer>>,
}

impl SharedSampleBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self::from_buffer(SampleBuffer::new(capacity)?))
    }

    pub fn from_buffer(buffer: SampleBuffer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(buffer)),
        }
    }

    /// Push several updates under one lock
    pub fn push_all(&self, updates: &[(Inverter, FieldUpdate)], timestamp: f64) {
        let mut buffer = self.inner.write();
        for (inverter, update) in updates {
            buffer.push(*inverter, update, timestamp);
        }
    }

    pub fn push(&self, inverter: Inverter, update: &FieldUpdate, timestamp: f64) -> InverterSample {
        self.inner.write().push(inverter, update, timestamp)
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        self.inner.read().snapshot()
    }

    pub fn latest(&self, inverter: Inverter) -> Option<InverterSample> {
        self.inner.read().latest(inverter)
    }

    /// Run a read-only closure against the buffer without copying it
    pub fn with_buffer<R>(&self, f: impl FnOnce(&SampleBuffer) -> R) -> R {
        f(&self.inner.read())
    }
}
