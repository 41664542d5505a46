//! CSV session log
//!
//! One row per snapshot with the latest sample of both inverters. The
//! `timestamp` column counts seconds from the start of the session; the
//! `datetime` column is local wall-clock time. Values that have not been
//! observed yet are written as empty cells. Every cell is numeric or a
//! fixed-format date, so nothing needs quoting.

use anyhow::{Context, Result};
use can_inverter_core::{Inverter, InverterSample, MonitorSnapshot};
use chrono::{DateTime, Local, TimeZone};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const HEADER: [&str; 10] = [
    "timestamp",
    "datetime",
    "inv_a_act_speed_rpm",
    "inv_a_speed_setpoint_rpm",
    "inv_a_act_torque_nm",
    "inv_a_torque_setpoint_nm",
    "inv_b_act_speed_rpm",
    "inv_b_speed_setpoint_rpm",
    "inv_b_act_torque_nm",
    "inv_b_torque_setpoint_nm",
];

/// Rows written between flushes
const FLUSH_EVERY: u64 = 10;

pub struct CsvLogger<W: Write> {
    writer: BufWriter<W>,
    rows: u64,
}

impl CsvLogger<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create CSV file: {:?}", path))?;
        log::info!("Logging to {:?}", path);
        Self::new(file)
    }
}

impl<W: Write> CsvLogger<W> {
    /// Wrap a writer and emit the header row
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = BufWriter::new(inner);
        writeln!(writer, "{}", HEADER.join(",")).context("Failed to write CSV header")?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Log the latest samples of a live snapshot
    ///
    /// The row carries the snapshot's session time and the current local time.
    pub fn log_snapshot(&mut self, snapshot: &MonitorSnapshot) -> Result<()> {
        self.write_row(
            snapshot.elapsed,
            Some(Local::now()),
            snapshot.latest(Inverter::A),
            snapshot.latest(Inverter::B),
        )
    }

    /// Write one row
    ///
    /// `elapsed` is seconds since the session started; a missing `datetime`
    /// leaves that cell empty.
    pub fn write_row(
        &mut self,
        elapsed: f64,
        datetime: Option<DateTime<Local>>,
        a: Option<&InverterSample>,
        b: Option<&InverterSample>,
    ) -> Result<()> {
        let mut record = Vec::with_capacity(HEADER.len());
        record.push(format!("{:.3}", elapsed));
        record.push(
            datetime
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_default(),
        );
        for sample in [a, b] {
            let sample = sample.copied().unwrap_or_default();
            record.push(cell(sample.actual_speed_rpm));
            record.push(cell(sample.speed_setpoint_rpm));
            record.push(cell(sample.actual_torque_nm));
            record.push(cell(sample.torque_setpoint_nm));
        }

        writeln!(self.writer, "{}", record.join(",")).context("Failed to write CSV row")?;
        self.rows += 1;
        if self.rows % FLUSH_EVERY == 0 {
            self.writer.flush()?;
        }
        Ok(())
    }

    /// Flush outstanding rows and hand back the writer
    pub fn finish(self) -> Result<W> {
        let rows = self.rows;
        let inner = self
            .writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV output: {}", e.error()))?;
        log::debug!("CSV log closed after {} rows", rows);
        Ok(inner)
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Local time of a UNIX timestamp in seconds, if representable
pub fn local_datetime(unix_secs: f64) -> Option<DateTime<Local>> {
    if !unix_secs.is_finite() {
        return None;
    }
    let millis = (unix_secs * 1000.0).round() as i64;
    Local.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_inverter_core::{FieldUpdate, MonitorStats, SampleBuffer};

    fn lines(logger: CsvLogger<Vec<u8>>) -> Vec<String> {
        let bytes = logger.finish().unwrap();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_header_only() {
        let logger = CsvLogger::new(Vec::new()).unwrap();
        assert_eq!(lines(logger), vec![HEADER.join(",")]);
    }

    #[test]
    fn test_unknown_values_are_empty_cells() {
        let mut logger = CsvLogger::new(Vec::new()).unwrap();
        let a = InverterSample {
            timestamp: 1.0,
            actual_speed_rpm: Some(2999.456),
            speed_setpoint_rpm: Some(3000.0),
            actual_torque_nm: None,
            torque_setpoint_nm: Some(-29.80709486720613),
        };
        logger
            .write_row(1.25, local_datetime(1_700_000_000.25), Some(&a), None)
            .unwrap();
        assert_eq!(logger.rows(), 1);

        let rows = lines(logger);
        let cells: Vec<&str> = rows[1].split(',').collect();
        assert_eq!(cells.len(), 10);
        assert_eq!(cells[0], "1.250");
        assert_eq!(cells[1].len(), "2023-11-14 22:13:20.250".len());
        assert!(cells[1].ends_with(".250"));
        assert_eq!(&cells[2..6], &["2999.46", "3000.00", "", "-29.81"]);
        assert_eq!(&cells[6..], &["", "", "", ""]);
    }

    #[test]
    fn test_snapshot_rows_use_session_time() {
        let mut buffer = SampleBuffer::new(8).unwrap();
        buffer.push(Inverter::B, &FieldUpdate::status(1500.0, 12.5), 12.3);
        let snapshot = MonitorSnapshot {
            elapsed: 12.3456,
            buffer: buffer.snapshot(),
            stats: MonitorStats::default(),
            inverter_rates: [None, None],
        };

        let mut logger = CsvLogger::new(Vec::new()).unwrap();
        let before = Local::now().timestamp();
        logger.log_snapshot(&snapshot).unwrap();

        let rows = lines(logger);
        let cells: Vec<&str> = rows[1].split(',').collect();
        assert_eq!(cells[0], "12.346");
        let logged = chrono::NaiveDateTime::parse_from_str(cells[1], "%Y-%m-%d %H:%M:%S%.3f")
            .unwrap()
            .and_local_timezone(Local)
            .earliest()
            .unwrap();
        assert!((logged.timestamp() - before).abs() <= 5, "{}", cells[1]);
        assert_eq!(&cells[2..6], &["", "", "", ""]);
        assert_eq!(&cells[6..], &["1500.00", "", "12.50", ""]);
    }

    #[test]
    fn test_datetime_out_of_range_is_empty() {
        assert!(local_datetime(f64::NAN).is_none());
        assert!(local_datetime(1e300).is_none());
        assert!(local_datetime(0.0).is_some());
    }

    #[test]
    fn test_flushes_every_ten_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");
        let mut logger = CsvLogger::create(&path).unwrap();
        for i in 0..10 {
            logger.write_row(i as f64, None, None, None).unwrap();
        }

        // the tenth row forces a flush while the logger is still open
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 11);
        logger.finish().unwrap();
    }
}
