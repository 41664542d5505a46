//! Monitor and replay configuration types
//!
//! Everything here is validated once at startup; nothing is re-checked
//! while a session runs.

use crate::types::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the monitor reads frames from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Synthetic traffic from the built-in simulator
    #[default]
    Simulated,
    /// A candump-format stream on standard input
    Stdin,
    /// A trace file replayed through an in-process loopback
    Trace,
}

/// Configuration for the live monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Frame source
    #[serde(default)]
    pub transport: TransportKind,

    /// CAN channel index, used to name the interface (`can0`, `can1`, ...)
    #[serde(default)]
    pub channel: u8,

    /// Samples kept per inverter
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// How often a snapshot is published to consumers (milliseconds)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,

    /// Receive timeout; bounds how long a stop request can go unnoticed (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Number of trailing samples used for per-inverter message rates
    #[serde(default = "default_rate_window")]
    pub rate_window: usize,

    /// Period of the simulated frame burst (milliseconds)
    #[serde(default = "default_simulation_period")]
    pub simulation_period_ms: u64,
}

fn default_buffer_capacity() -> usize {
    8000
}

fn default_refresh_interval() -> u64 {
    50
}

fn default_poll_interval() -> u64 {
    100
}

fn default_rate_window() -> usize {
    crate::buffer::DEFAULT_RATE_WINDOW
}

fn default_simulation_period() -> u64 {
    50
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            channel: 0,
            buffer_capacity: default_buffer_capacity(),
            refresh_interval_ms: default_refresh_interval(),
            poll_interval_ms: default_poll_interval(),
            rate_window: default_rate_window(),
            simulation_period_ms: default_simulation_period(),
        }
    }
}

impl MonitorConfig {
    /// Create a new monitor configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: select the frame source
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Builder method: set the CAN channel index
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Builder method: set the per-inverter buffer capacity
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Builder method: set the snapshot refresh interval
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the receive poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the simulated burst period
    pub fn with_simulation_period(mut self, period: Duration) -> Self {
        self.simulation_period_ms = period.as_millis() as u64;
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn simulation_period(&self) -> Duration {
        Duration::from_millis(self.simulation_period_ms)
    }

    /// Interface name derived from the channel index
    pub fn interface_name(&self) -> String {
        format!("can{}", self.channel)
    }

    /// Reject values the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(MonitorError::Config(
                "buffer_capacity must be a positive integer".to_string(),
            ));
        }
        if self.refresh_interval_ms == 0 {
            return Err(MonitorError::Config(
                "refresh_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(MonitorError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.rate_window < 2 {
            return Err(MonitorError::Config(
                "rate_window must cover at least 2 samples".to_string(),
            ));
        }
        if self.simulation_period_ms == 0 {
            return Err(MonitorError::Config(
                "simulation_period_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for trace replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Time compression: 2.0 plays twice as fast, 0.5 half as fast
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f64,

    /// Restart from the first frame after the last one
    #[serde(default, rename = "loop")]
    pub loop_playback: bool,

    /// Interface name written into replayed candump lines
    #[serde(default = "default_interface")]
    pub interface: String,
}

fn default_speed_factor() -> f64 {
    1.0
}

fn default_interface() -> String {
    "can0".to_string()
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed_factor: default_speed_factor(),
            loop_playback: false,
            interface: default_interface(),
        }
    }
}

impl ReplayConfig {
    /// Create a new replay configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the speed factor
    pub fn with_speed_factor(mut self, speed_factor: f64) -> Self {
        self.speed_factor = speed_factor;
        self
    }

    /// Builder method: enable or disable looping
    pub fn with_loop(mut self, enabled: bool) -> Self {
        self.loop_playback = enabled;
        self
    }

    /// Builder method: set the interface name
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Scale a recorded delay to wall-clock time
    ///
    /// Negative delays become zero; delays too long for a `Duration`
    /// saturate at `Duration::MAX`.
    pub fn scaled(&self, delay_secs: f64) -> Duration {
        Duration::try_from_secs_f64((delay_secs / self.speed_factor).max(0.0))
            .unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.speed_factor.is_finite() && self.speed_factor > 0.0) {
            return Err(MonitorError::Config(format!(
                "speed factor must be a positive number, got {}",
                self.speed_factor
            )));
        }
        if self.interface.trim().is_empty() || self.interface.contains(char::is_whitespace) {
            return Err(MonitorError::Config(format!(
                "invalid interface name {:?}",
                self.interface
            )));
        }
        Ok(())
    }
}
