//! One-line session status, logged in place of a live plot

use can_inverter_core::{Inverter, MonitorSnapshot};
use std::fmt::Write as _;

/// Rate-limits status lines to one per interval of session time
pub struct StatusThrottle {
    interval: f64,
    last: Option<f64>,
}

impl StatusThrottle {
    pub fn new(interval_secs: f64) -> Self {
        Self {
            interval: interval_secs,
            last: None,
        }
    }

    /// True if a status line is due for a snapshot taken at `elapsed`
    pub fn due(&mut self, elapsed: f64) -> bool {
        match self.last {
            Some(last) if elapsed - last < self.interval => false,
            _ => {
                self.last = Some(elapsed);
                true
            }
        }
    }
}

fn value(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(v) => format!("{:.*}", decimals, v),
        None => "--".to_string(),
    }
}

pub fn status_line(snapshot: &MonitorSnapshot) -> String {
    let mut line = format!(
        "{:.1}s | {} msgs ({:.1}/s)",
        snapshot.elapsed,
        snapshot.stats.frames_total,
        snapshot.message_rate()
    );

    for inverter in Inverter::ALL {
        let sample = snapshot.latest(inverter).copied().unwrap_or_default();
        let _ = write!(
            line,
            " | {}: {} rpm, {} Nm (sp {} Nm, {} msgs)",
            inverter,
            value(sample.actual_speed_rpm, 0),
            value(sample.actual_torque_nm, 1),
            value(sample.torque_setpoint_nm, 1),
            snapshot.stats.frames_for(inverter)
        );
    }

    let _ = write!(
        line,
        " | speed sp {} rpm",
        value(snapshot.shared_speed_setpoint(), 0)
    );
    if snapshot.stats.frames_malformed > 0 {
        let _ = write!(line, " | {} malformed", snapshot.stats.frames_malformed);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_inverter_core::{FrameCodec, InverterMessage, MonitorConfig, MonitorLoop};

    #[test]
    fn test_throttle() {
        let mut throttle = StatusThrottle::new(1.0);
        assert!(throttle.due(0.05));
        assert!(!throttle.due(0.5));
        assert!(throttle.due(1.1));
        assert!(!throttle.due(2.0));
        assert!(throttle.due(2.2));
    }

    #[test]
    fn test_status_line_before_and_after_traffic() {
        let monitor = MonitorLoop::new(MonitorConfig::new()).unwrap();
        let empty = status_line(&monitor.snapshot());
        assert!(empty.contains("0 msgs"));
        assert!(empty.contains("Inverter A: -- rpm"));
        assert!(empty.ends_with("speed sp -- rpm"));

        let codec = FrameCodec::default();
        let frame = codec
            .encode(&InverterMessage::status(Inverter::B, 1234.0, 12.5, 0.0))
            .unwrap();
        monitor.process_frame_at(&frame, 0.1);
        let frame = codec
            .encode(&InverterMessage::shared_speed_setpoint(1500.0, 0.0))
            .unwrap();
        monitor.process_frame_at(&frame, 0.2);

        let line = status_line(&monitor.snapshot());
        assert!(line.contains("2 msgs"));
        assert!(line.contains("Inverter B: 1234 rpm, 12.5 Nm (sp -- Nm, 1 msgs)"));
        assert!(line.ends_with("speed sp 1500 rpm"));
    }
}
