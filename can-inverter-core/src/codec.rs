//! Frame Codec
//!
//! Extracts physical values from raw inverter frames using the signal table,
//! and builds frames from physical values for the simulator and tests.
//! All fields are unsigned 16-bit little-endian.

use crate::signals::{MessageKind, MessageSpec, SignalTable};
use crate::types::{FieldUpdate, Inverter, MonitorError, RawFrame, Result, MAX_DATA_LEN};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// A decoded inverter message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InverterMessage {
    /// Which known message this was
    pub kind: MessageKind,
    /// Physical values carried by the message
    pub update: FieldUpdate,
    /// Timestamp of the frame (seconds)
    pub timestamp: f64,
}

impl InverterMessage {
    pub fn shared_speed_setpoint(rpm: f64, timestamp: f64) -> Self {
        Self {
            kind: MessageKind::SharedSpeedSetpoint,
            update: FieldUpdate::speed_setpoint(rpm),
            timestamp,
        }
    }

    pub fn torque_setpoint(inverter: Inverter, nm: f64, timestamp: f64) -> Self {
        let kind = match inverter {
            Inverter::A => MessageKind::TorqueSetpointA,
            Inverter::B => MessageKind::TorqueSetpointB,
        };
        Self {
            kind,
            update: FieldUpdate::torque_setpoint(nm),
            timestamp,
        }
    }

    pub fn status(inverter: Inverter, speed_rpm: f64, torque_nm: f64, timestamp: f64) -> Self {
        let kind = match inverter {
            Inverter::A => MessageKind::StatusA,
            Inverter::B => MessageKind::StatusB,
        };
        Self {
            kind,
            update: FieldUpdate::status(speed_rpm, torque_nm),
            timestamp,
        }
    }

    /// Fan the message out to the inverters it concerns
    ///
    /// The shared speed setpoint yields one identical update per inverter.
    pub fn updates(&self) -> Vec<(Inverter, FieldUpdate)> {
        self.kind
            .targets()
            .iter()
            .map(|&inverter| (inverter, self.update))
            .collect()
    }
}

/// Bidirectional mapping between raw frames and inverter messages
#[derive(Debug, Clone)]
pub struct FrameCodec {
    table: SignalTable,
}

impl FrameCodec {
    /// Create a codec over a signal table
    pub fn new(table: SignalTable) -> Self {
        Self { table }
    }

    /// Signal table used by this codec
    pub fn table(&self) -> &SignalTable {
        &self.table
    }

    /// Decode a frame into an inverter message
    ///
    /// # Returns
    /// * `Ok(Some(message))` for one of the known IDs
    /// * `Ok(None)` for any other traffic on the bus
    /// * `Err(MonitorError::MalformedFrame)` if a known frame is too short
    pub fn decode(&self, frame: &RawFrame) -> Result<Option<InverterMessage>> {
        let spec = match self.table.get(frame.id) {
            Some(spec) => spec,
            None => {
                log::trace!("Ignoring unknown CAN ID 0x{:X}", frame.id);
                return Ok(None);
            }
        };

        let required = spec.required_len();
        if frame.data.len() < required {
            return Err(MonitorError::MalformedFrame {
                id: frame.id,
                expected: required,
                actual: frame.data.len(),
            });
        }

        let mut update = FieldUpdate::default();
        for signal in &spec.signals {
            let raw = LittleEndian::read_u16(&frame.data[signal.byte_range()]);
            signal.quantity.write(&mut update, signal.transform.decode(raw));
        }

        Ok(Some(InverterMessage {
            kind: spec.kind,
            update,
            timestamp: frame.timestamp,
        }))
    }

    /// Decode a frame straight into per-inverter updates
    ///
    /// Unknown IDs produce an empty list.
    pub fn decode_updates(&self, frame: &RawFrame) -> Result<Vec<(Inverter, FieldUpdate)>> {
        Ok(self
            .decode(frame)?
            .map(|message| message.updates())
            .unwrap_or_default())
    }

    /// Encode a message into a full 8-byte frame
    ///
    /// Fields of the update that do not belong to the message are ignored;
    /// a missing field or a value outside the 16-bit range is an error.
    pub fn encode(&self, message: &InverterMessage) -> Result<RawFrame> {
        let spec = self.spec_for(message.kind)?;

        let mut data = [0u8; MAX_DATA_LEN];
        for signal in &spec.signals {
            let value = signal.quantity.read(&message.update).ok_or_else(|| {
                MonitorError::InvalidData(format!(
                    "{} requires signal {}",
                    message.kind, signal.name
                ))
            })?;
            let raw = signal.encode(value)?;
            LittleEndian::write_u16(&mut data[signal.byte_range()], raw);
        }

        RawFrame::new(spec.id, &data, message.timestamp)
    }

    fn spec_for(&self, kind: MessageKind) -> Result<&MessageSpec> {
        self.table.by_kind(kind).ok_or_else(|| {
            MonitorError::InvalidData(format!("no layout defined for {}", kind))
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(SignalTable::inverter_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{
        INVERTER_A_STATUS_ID, INVERTER_A_TORQUE_SETPOINT_ID, INVERTER_B_TORQUE_SETPOINT_ID,
        SHARED_SPEED_SETPOINT_ID,
    };

    /// One raw count of torque
    const TORQUE_STEP: f64 = 1.0 / 526.3157;

    fn frame(id: u32, data: &[u8]) -> RawFrame {
        RawFrame::new(id, data, 0.5).unwrap()
    }

    #[test]
    fn test_decode_torque_setpoint() {
        let codec = FrameCodec::default();
        let message = codec
            .decode(&frame(INVERTER_A_TORQUE_SETPOINT_ID, &[0xAA, 0xAA, 0xAA, 0x13, 0x3F, 0, 0, 0]))
            .unwrap()
            .unwrap();

        // bytes 3..5: 0x3F13 = 15891 -> 15891 / 526.3157 - 60
        assert_eq!(message.kind, MessageKind::TorqueSetpointA);
        let torque = message.update.torque_setpoint_nm.unwrap();
        assert!((torque - (-29.807_094_867)).abs() < 1e-6, "got {}", torque);
        assert_eq!(message.update.actual_speed_rpm, None);
        assert_eq!(message.timestamp, 0.5);
    }

    #[test]
    fn test_torque_setpoint_ignores_bytes_before_offset_three() {
        let codec = FrameCodec::default();
        // 47368 = 0xB908 -> 30 Nm
        let message = codec
            .decode(&frame(INVERTER_B_TORQUE_SETPOINT_ID, &[0x13, 0x3F, 0xFF, 0x08, 0xB9]))
            .unwrap()
            .unwrap();
        let torque = message.update.torque_setpoint_nm.unwrap();
        assert!((torque - 30.0).abs() < TORQUE_STEP, "got {}", torque);

        let err = codec
            .decode(&frame(INVERTER_B_TORQUE_SETPOINT_ID, &[0x00, 0x00, 0x08, 0xB9]))
            .unwrap_err();
        assert!(matches!(
            err,
            MonitorError::MalformedFrame { expected: 5, actual: 4, .. }
        ));
    }

    #[test]
    fn test_decode_status() {
        let codec = FrameCodec::default();
        // speed raw 0x88B8 = 35000, torque raw 0x7B3A = 31546
        let message = codec
            .decode(&frame(INVERTER_A_STATUS_ID, &[0xB8, 0x88, 0x00, 0x00, 0x3A, 0x7B]))
            .unwrap()
            .unwrap();

        assert_eq!(message.update.actual_speed_rpm, Some(3000.0));
        let torque = message.update.actual_torque_nm.unwrap();
        assert!((torque - (31546.0 / 526.3157 - 60.0)).abs() < 1e-9);
    }

    #[test]
    fn test_shared_setpoint_fans_out() {
        let codec = FrameCodec::default();
        let updates = codec
            .decode_updates(&frame(SHARED_SPEED_SETPOINT_ID, &[0xB8, 0x88]))
            .unwrap();

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].0, Inverter::A);
        assert_eq!(updates[1].0, Inverter::B);
        assert_eq!(updates[0].1, updates[1].1);
        assert_eq!(updates[0].1.speed_setpoint_rpm, Some(3000.0));
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let codec = FrameCodec::default();
        assert!(codec.decode(&frame(0x0CF00400, &[0xFF; 8])).unwrap().is_none());
        assert!(codec.decode_updates(&frame(0x123, &[])).unwrap().is_empty());
    }

    #[test]
    fn test_short_known_frame_is_malformed() {
        let codec = FrameCodec::default();
        let err = codec
            .decode(&frame(INVERTER_A_STATUS_ID, &[0xB8, 0x88, 0x00, 0x00, 0x3A]))
            .unwrap_err();

        match err {
            MonitorError::MalformedFrame { id, expected, actual } => {
                assert_eq!(id, INVERTER_A_STATUS_ID);
                assert_eq!(expected, 6);
                assert_eq!(actual, 5);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_encode_layout() {
        let codec = FrameCodec::default();
        let frame = codec
            .encode(&InverterMessage::shared_speed_setpoint(3000.0, 1.0))
            .unwrap();

        assert_eq!(frame.id, SHARED_SPEED_SETPOINT_ID);
        assert_eq!(frame.data, vec![0xB8, 0x88, 0, 0, 0, 0, 0, 0]);
        assert_eq!(frame.timestamp, 1.0);

        let frame = codec
            .encode(&InverterMessage::torque_setpoint(Inverter::A, 30.0, 1.0))
            .unwrap();
        assert_eq!(frame.id, INVERTER_A_TORQUE_SETPOINT_ID);
        assert_eq!(frame.data, vec![0, 0, 0, 0x08, 0xB9, 0, 0, 0]);
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let codec = FrameCodec::default();
        let messages = [
            InverterMessage::shared_speed_setpoint(-1234.0, 0.0),
            InverterMessage::torque_setpoint(Inverter::A, 42.123, 0.1),
            InverterMessage::torque_setpoint(Inverter::B, -59.9, 0.2),
            InverterMessage::status(Inverter::A, 3210.0, 12.75, 0.3),
            InverterMessage::status(Inverter::B, 33535.0, 64.5, 0.4),
        ];

        for message in messages {
            let decoded = codec.decode(&codec.encode(&message).unwrap()).unwrap().unwrap();
            assert_eq!(decoded.kind, message.kind);
            for (got, want) in [
                (decoded.update.actual_speed_rpm, message.update.actual_speed_rpm),
                (decoded.update.speed_setpoint_rpm, message.update.speed_setpoint_rpm),
                (decoded.update.actual_torque_nm, message.update.actual_torque_nm),
                (decoded.update.torque_setpoint_nm, message.update.torque_setpoint_nm),
            ] {
                match (got, want) {
                    (Some(g), Some(w)) => assert!((g - w).abs() <= TORQUE_STEP / 2.0 + 1e-9),
                    (None, None) => {}
                    _ => panic!("field mismatch for {}: {:?} vs {:?}", message.kind, got, want),
                }
            }
        }
    }

    #[test]
    fn test_round_trip_torque_sweep() {
        let codec = FrameCodec::default();
        let mut torque = -60.0;
        while torque <= 64.5 {
            let message = InverterMessage::torque_setpoint(Inverter::B, torque, 0.0);
            let decoded = codec.decode(&codec.encode(&message).unwrap()).unwrap().unwrap();
            let got = decoded.update.torque_setpoint_nm.unwrap();
            assert!((got - torque).abs() <= TORQUE_STEP / 2.0 + 1e-9, "{} -> {}", torque, got);
            torque += 0.37;
        }
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let codec = FrameCodec::default();
        let err = codec
            .encode(&InverterMessage::torque_setpoint(Inverter::A, 100.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, MonitorError::SignalOutOfRange { .. }));

        let err = codec
            .encode(&InverterMessage::shared_speed_setpoint(-40000.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, MonitorError::SignalOutOfRange { .. }));
    }

    #[test]
    fn test_encode_requires_message_fields() {
        let codec = FrameCodec::default();
        let message = InverterMessage {
            kind: MessageKind::StatusA,
            update: FieldUpdate::torque_setpoint(10.0),
            timestamp: 0.0,
        };
        assert!(matches!(codec.encode(&message), Err(MonitorError::InvalidData(_))));
    }
}
