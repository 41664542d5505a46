//! Signal table for the five known inverter messages
//!
//! The table is built once at startup and handed to the codec by value; it
//! is never mutated afterwards.

use crate::types::{FieldUpdate, Inverter, MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

/// Speed setpoint shared by both inverters
pub const SHARED_SPEED_SETPOINT_ID: u32 = 0x18FF_F3FE;
/// Inverter A torque setpoint
pub const INVERTER_A_TORQUE_SETPOINT_ID: u32 = 0x18FF_E103;
/// Inverter A status (actual speed and torque)
pub const INVERTER_A_STATUS_ID: u32 = 0x18FF_A120;
/// Inverter B torque setpoint
pub const INVERTER_B_TORQUE_SETPOINT_ID: u32 = 0x18FF_E203;
/// Inverter B status (actual speed and torque)
pub const INVERTER_B_STATUS_ID: u32 = 0x18FF_B120;

/// Speed fields are raw counts shifted by this offset (rpm)
const SPEED_OFFSET_RPM: f64 = -32000.0;
/// Torque fields are divided by this factor...
const TORQUE_SCALE: f64 = 526.3157;
/// ...and then shifted by this offset (Nm)
const TORQUE_OFFSET_NM: f64 = -60.0;

/// Every signal is a 16-bit little-endian field
pub(crate) const SIGNAL_WIDTH: usize = 2;

/// Largest raw value a 16-bit field can hold
const RAW_MAX: f64 = u16::MAX as f64;

/// Which of the five known messages a frame is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    SharedSpeedSetpoint,
    TorqueSetpointA,
    TorqueSetpointB,
    StatusA,
    StatusB,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::SharedSpeedSetpoint,
        MessageKind::TorqueSetpointA,
        MessageKind::TorqueSetpointB,
        MessageKind::StatusA,
        MessageKind::StatusB,
    ];

    /// Inverters whose sample a message of this kind updates
    pub fn targets(self) -> &'static [Inverter] {
        match self {
            MessageKind::SharedSpeedSetpoint => &Inverter::ALL,
            MessageKind::TorqueSetpointA | MessageKind::StatusA => &[Inverter::A],
            MessageKind::TorqueSetpointB | MessageKind::StatusB => &[Inverter::B],
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::SharedSpeedSetpoint => write!(f, "MotorSetpointsAB_Speed"),
            MessageKind::TorqueSetpointA => write!(f, "MotorSetpointsA_Torque"),
            MessageKind::TorqueSetpointB => write!(f, "MotorSetpointsB_Torque"),
            MessageKind::StatusA => write!(f, "MotorStatusA"),
            MessageKind::StatusB => write!(f, "MotorStatusB"),
        }
    }
}

/// Physical quantity carried by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    ActualSpeed,
    SpeedSetpoint,
    ActualTorque,
    TorqueSetpoint,
}

impl Quantity {
    /// Read the matching field of an update
    pub fn read(self, update: &FieldUpdate) -> Option<f64> {
        match self {
            Quantity::ActualSpeed => update.actual_speed_rpm,
            Quantity::SpeedSetpoint => update.speed_setpoint_rpm,
            Quantity::ActualTorque => update.actual_torque_nm,
            Quantity::TorqueSetpoint => update.torque_setpoint_nm,
        }
    }

    /// Set the matching field of an update
    pub fn write(self, update: &mut FieldUpdate, value: f64) {
        let slot = match self {
            Quantity::ActualSpeed => &mut update.actual_speed_rpm,
            Quantity::SpeedSetpoint => &mut update.speed_setpoint_rpm,
            Quantity::ActualTorque => &mut update.actual_torque_nm,
            Quantity::TorqueSetpoint => &mut update.torque_setpoint_nm,
        };
        *slot = Some(value);
    }
}

/// Raw-to-physical conversion of a 16-bit field
///
/// Only two families exist on this bus: integer speeds with an offset and
/// fixed-point torques with a divisor and an offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    /// `value = raw + offset`
    Linear { offset: f64 },
    /// `value = raw / scale + offset`
    Scaled { scale: f64, offset: f64 },
}

impl Transform {
    /// Convert a raw field to its physical value
    pub fn decode(&self, raw: u16) -> f64 {
        let raw = raw as f64;
        match *self {
            Transform::Linear { offset } => raw + offset,
            Transform::Scaled { scale, offset } => raw / scale + offset,
        }
    }

    /// Convert a physical value to the nearest raw field value
    ///
    /// Returns `None` if the value does not fit in 16 bits.
    pub fn encode(&self, value: f64) -> Option<u16> {
        let raw = match *self {
            Transform::Linear { offset } => value - offset,
            Transform::Scaled { scale, offset } => (value - offset) * scale,
        }
        .round();

        if raw.is_finite() && (0.0..=RAW_MAX).contains(&raw) {
            Some(raw as u16)
        } else {
            None
        }
    }

    /// Smallest and largest physical value this transform can express
    pub fn physical_range(&self) -> (f64, f64) {
        (self.decode(0), self.decode(u16::MAX))
    }
}

/// A single signal inside a message
#[derive(Debug, Clone)]
pub struct SignalSpec {
    /// Signal name
    pub name: &'static str,
    /// Quantity this signal updates
    pub quantity: Quantity,
    /// Offset of the low byte in the frame
    pub start_byte: usize,
    /// Scaling from raw to physical value
    pub transform: Transform,
    /// Engineering unit
    pub unit: &'static str,
}

impl SignalSpec {
    /// Byte range occupied by this signal
    pub fn byte_range(&self) -> Range<usize> {
        self.start_byte..self.start_byte + SIGNAL_WIDTH
    }

    /// Encode a value for this signal, reporting out-of-range values
    pub fn encode(&self, value: f64) -> Result<u16> {
        self.transform.encode(value).ok_or_else(|| {
            let (min, max) = self.transform.physical_range();
            MonitorError::SignalOutOfRange {
                signal: self.name.to_string(),
                value,
                min,
                max,
            }
        })
    }
}

/// A complete message definition
#[derive(Debug, Clone)]
pub struct MessageSpec {
    /// CAN message ID
    pub id: u32,
    /// Which known message this is
    pub kind: MessageKind,
    /// All signals in this message
    pub signals: Vec<SignalSpec>,
}

impl MessageSpec {
    /// Minimum payload length needed to read every signal
    pub fn required_len(&self) -> usize {
        self.signals
            .iter()
            .map(|s| s.byte_range().end)
            .max()
            .unwrap_or(0)
    }
}

/// Immutable lookup of the known messages, keyed by CAN ID
#[derive(Debug, Clone)]
pub struct SignalTable {
    messages: HashMap<u32, MessageSpec>,
}

impl SignalTable {
    /// The dual-inverter layout
    pub fn inverter_default() -> Self {
        let speed = Transform::Linear {
            offset: SPEED_OFFSET_RPM,
        };
        let torque = Transform::Scaled {
            scale: TORQUE_SCALE,
            offset: TORQUE_OFFSET_NM,
        };

        let speed_setpoint = SignalSpec {
            name: "SpeedSetpoint",
            quantity: Quantity::SpeedSetpoint,
            start_byte: 0,
            transform: speed,
            unit: "rpm",
        };
        let torque_setpoint = SignalSpec {
            name: "TorqueSetpoint",
            quantity: Quantity::TorqueSetpoint,
            start_byte: 3,
            transform: torque,
            unit: "Nm",
        };
        let status = vec![
            SignalSpec {
                name: "ActualSpeed",
                quantity: Quantity::ActualSpeed,
                start_byte: 0,
                transform: speed,
                unit: "rpm",
            },
            SignalSpec {
                name: "ActualTorque",
                quantity: Quantity::ActualTorque,
                start_byte: 4,
                transform: torque,
                unit: "Nm",
            },
        ];

        let specs = [
            MessageSpec {
                id: SHARED_SPEED_SETPOINT_ID,
                kind: MessageKind::SharedSpeedSetpoint,
                signals: vec![speed_setpoint],
            },
            MessageSpec {
                id: INVERTER_A_TORQUE_SETPOINT_ID,
                kind: MessageKind::TorqueSetpointA,
                signals: vec![torque_setpoint.clone()],
            },
            MessageSpec {
                id: INVERTER_B_TORQUE_SETPOINT_ID,
                kind: MessageKind::TorqueSetpointB,
                signals: vec![torque_setpoint],
            },
            MessageSpec {
                id: INVERTER_A_STATUS_ID,
                kind: MessageKind::StatusA,
                signals: status.clone(),
            },
            MessageSpec {
                id: INVERTER_B_STATUS_ID,
                kind: MessageKind::StatusB,
                signals: status,
            },
        ];

        Self {
            messages: specs.into_iter().map(|spec| (spec.id, spec)).collect(),
        }
    }

    /// Look up a message by CAN ID
    pub fn get(&self, id: u32) -> Option<&MessageSpec> {
        self.messages.get(&id)
    }

    /// Look up a message by kind
    pub fn by_kind(&self, kind: MessageKind) -> Option<&MessageSpec> {
        self.messages.values().find(|spec| spec.kind == kind)
    }

    /// Check whether an ID belongs to a known message
    pub fn contains(&self, id: u32) -> bool {
        self.messages.contains_key(&id)
    }

    /// Known IDs in ascending order
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.messages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of known messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::inverter_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_exactly_five_ids() {
        let table = SignalTable::inverter_default();
        assert_eq!(table.len(), 5);
        assert_eq!(
            table.ids(),
            vec![
                INVERTER_A_STATUS_ID,
                INVERTER_B_STATUS_ID,
                INVERTER_A_TORQUE_SETPOINT_ID,
                INVERTER_B_TORQUE_SETPOINT_ID,
                SHARED_SPEED_SETPOINT_ID,
            ]
        );
        for kind in MessageKind::ALL {
            assert!(table.by_kind(kind).is_some(), "missing {}", kind);
        }
    }

    #[test]
    fn test_required_lengths() {
        let table = SignalTable::inverter_default();
        assert_eq!(table.get(SHARED_SPEED_SETPOINT_ID).unwrap().required_len(), 2);
        assert_eq!(table.get(INVERTER_A_TORQUE_SETPOINT_ID).unwrap().required_len(), 5);
        assert_eq!(table.get(INVERTER_B_TORQUE_SETPOINT_ID).unwrap().required_len(), 5);
        assert_eq!(table.get(INVERTER_B_STATUS_ID).unwrap().required_len(), 6);
    }

    #[test]
    fn test_speed_transform() {
        let speed = Transform::Linear { offset: -32000.0 };
        assert_eq!(speed.decode(32000), 0.0);
        assert_eq!(speed.decode(35000), 3000.0);
        assert_eq!(speed.encode(-1500.0), Some(30500));
        assert_eq!(speed.physical_range(), (-32000.0, 33535.0));
        assert_eq!(speed.encode(40000.0), None);
    }

    #[test]
    fn test_torque_transform() {
        let torque = Transform::Scaled {
            scale: 526.3157,
            offset: -60.0,
        };
        assert!((torque.decode(0x3F13) - (-29.807_094_867)).abs() < 1e-6);
        assert_eq!(torque.encode(-60.0), Some(0));
        assert_eq!(torque.encode(30.0), Some(47368));
        assert_eq!(torque.encode(-60.5), None);
        assert_eq!(torque.encode(f64::NAN), None);
    }

    #[test]
    fn test_shared_setpoint_targets_both() {
        assert_eq!(MessageKind::SharedSpeedSetpoint.targets(), &[Inverter::A, Inverter::B]);
        assert_eq!(MessageKind::StatusB.targets(), &[Inverter::B]);
    }

    #[test]
    fn test_quantity_read_write() {
        let mut update = FieldUpdate::default();
        Quantity::ActualTorque.write(&mut update, 4.5);
        assert_eq!(Quantity::ActualTorque.read(&update), Some(4.5));
        assert_eq!(Quantity::ActualSpeed.read(&update), None);
    }
}
