//! Known inverter message layouts
//!
//! This module contains the fixed table of the five CAN messages exchanged
//! with the two inverters and the numeric transforms used to scale them.

pub mod table;

// Re-export key types for convenience
pub use table::{
    MessageKind, MessageSpec, Quantity, SignalSpec, SignalTable, Transform,
    INVERTER_A_STATUS_ID, INVERTER_A_TORQUE_SETPOINT_ID, INVERTER_B_STATUS_ID,
    INVERTER_B_TORQUE_SETPOINT_ID, SHARED_SPEED_SETPOINT_ID,
};
