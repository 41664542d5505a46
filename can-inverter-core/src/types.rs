//! Core types for the inverter monitor library
//!
//! This module defines the raw frame type shared by every transport, the
//! per-inverter sample record and the error taxonomy used across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Largest 11-bit identifier; anything above is an extended (29-bit) ID
const MAX_STANDARD_ID: u32 = 0x7FF;

/// Raw CAN frame as received from a transport or parsed from a trace
///
/// This represents a single classic CAN frame before any signal decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// CAN message ID (11-bit or 29-bit)
    pub id: u32,
    /// Frame data bytes (0-8 bytes)
    pub data: Vec<u8>,
    /// Timestamp in seconds (session-relative for live traffic, absolute for traces)
    pub timestamp: f64,
}

impl RawFrame {
    /// Create a new frame, rejecting payloads longer than 8 bytes
    pub fn new(id: u32, data: &[u8], timestamp: f64) -> Result<Self> {
        if data.len() > MAX_DATA_LEN {
            return Err(MonitorError::InvalidData(format!(
                "frame 0x{:X} carries {} bytes, classic CAN allows at most {}",
                id,
                data.len(),
                MAX_DATA_LEN
            )));
        }
        Ok(Self {
            id,
            data: data.to_vec(),
            timestamp,
        })
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// True if this frame uses a 29-bit identifier
    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }

    /// Copy of this frame carrying a different timestamp
    pub fn with_timestamp(&self, timestamp: f64) -> Self {
        Self {
            id: self.id,
            data: self.data.clone(),
            timestamp,
        }
    }
}

/// One of the two logical inverters on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Inverter {
    A,
    B,
}

impl Inverter {
    /// Both inverters, in display order
    pub const ALL: [Inverter; 2] = [Inverter::A, Inverter::B];

    /// Zero-based index, used for per-inverter arrays
    pub fn index(self) -> usize {
        match self {
            Inverter::A => 0,
            Inverter::B => 1,
        }
    }
}

impl fmt::Display for Inverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inverter::A => write!(f, "Inverter A"),
            Inverter::B => write!(f, "Inverter B"),
        }
    }
}

/// Decoded physical state of one inverter at one instant
///
/// Fields that have not been observed yet are `None`. Once a field has been
/// seen it keeps its last value until a newer message replaces it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InverterSample {
    /// Time of the update that produced this sample (seconds)
    pub timestamp: f64,
    /// Measured shaft speed (rpm)
    pub actual_speed_rpm: Option<f64>,
    /// Commanded speed (rpm), shared by both inverters
    pub speed_setpoint_rpm: Option<f64>,
    /// Measured torque (Nm)
    pub actual_torque_nm: Option<f64>,
    /// Commanded torque (Nm)
    pub torque_setpoint_nm: Option<f64>,
}

impl InverterSample {
    /// Setpoint minus actual speed, once both are known
    pub fn speed_error(&self) -> Option<f64> {
        Some(self.speed_setpoint_rpm? - self.actual_speed_rpm?)
    }

    /// Setpoint minus actual torque, once both are known
    pub fn torque_error(&self) -> Option<f64> {
        Some(self.torque_setpoint_nm? - self.actual_torque_nm?)
    }
}

/// Partial update produced by decoding a single frame
///
/// Each CAN message only carries a subset of the sample fields; the rest
/// stay `None` and are carried forward from the previous sample on merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub actual_speed_rpm: Option<f64>,
    pub speed_setpoint_rpm: Option<f64>,
    pub actual_torque_nm: Option<f64>,
    pub torque_setpoint_nm: Option<f64>,
}

impl FieldUpdate {
    pub fn speed_setpoint(rpm: f64) -> Self {
        Self {
            speed_setpoint_rpm: Some(rpm),
            ..Self::default()
        }
    }

    pub fn torque_setpoint(nm: f64) -> Self {
        Self {
            torque_setpoint_nm: Some(nm),
            ..Self::default()
        }
    }

    pub fn status(actual_speed_rpm: f64, actual_torque_nm: f64) -> Self {
        Self {
            actual_speed_rpm: Some(actual_speed_rpm),
            actual_torque_nm: Some(actual_torque_nm),
            ..Self::default()
        }
    }

    /// True if the update carries no field at all
    pub fn is_empty(&self) -> bool {
        self.actual_speed_rpm.is_none()
            && self.speed_setpoint_rpm.is_none()
            && self.actual_torque_nm.is_none()
            && self.torque_setpoint_nm.is_none()
    }

    /// Merge this update over `previous`, producing the next carry-forward sample
    pub fn merge_into(&self, previous: &InverterSample, timestamp: f64) -> InverterSample {
        InverterSample {
            timestamp,
            actual_speed_rpm: self.actual_speed_rpm.or(previous.actual_speed_rpm),
            speed_setpoint_rpm: self.speed_setpoint_rpm.or(previous.speed_setpoint_rpm),
            actual_torque_nm: self.actual_torque_nm.or(previous.actual_torque_nm),
            torque_setpoint_nm: self.torque_setpoint_nm.or(previous.torque_setpoint_nm),
        }
    }
}

/// Errors raised by a frame transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport disconnected")]
    Disconnected,

    #[error("End of frame stream")]
    EndOfStream,

    #[error("Transport IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while decoding, buffering or replaying
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed frame 0x{id:X}: expected at least {expected} bytes, got {actual}")]
    MalformedFrame {
        id: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to parse trace line {line}: {reason}")]
    TraceParse { line: usize, reason: String },

    #[error("Trace contains no valid frames: {0}")]
    EmptyTrace(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signal {signal} value {value} outside encodable range [{min}, {max}]")]
    SignalOutOfRange {
        signal: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Worker thread failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
