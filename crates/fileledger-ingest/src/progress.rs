//! Byte progress logging while a file is read
//!
//! The number of report steps grows logarithmically with file size: anything
//! up to 5 KB reports once, 5 MB about 1.6 times, and 50 MB or more 100 times.

use tracing::info;

const MIN_SCALE: f64 = 0.0;
const MAX_SCALE: f64 = 2.0;
const LOCAL_MIN: f64 = 5_000.0;
const LOCAL_MAX: f64 = 50_000_000.0;

const SUFFIXES: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// Number of progress steps for a file of `total` bytes
pub fn calculate_steps(total: u64) -> f64 {
    let clamped = (total as f64).clamp(LOCAL_MIN, LOCAL_MAX);
    10f64.powf((MAX_SCALE - MIN_SCALE) * (clamped - LOCAL_MIN) / (LOCAL_MAX - LOCAL_MIN) + MIN_SCALE)
}

/// Render a byte count using 1024-based units
pub fn friendly_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut exp = 0;
    while value > 1024.0 && exp < SUFFIXES.len() {
        exp += 1;
        value /= 1024.0;
    }

    if exp == 0 {
        format!("{} bytes", bytes)
    } else {
        format!("{:.2} {}", value, SUFFIXES[exp - 1])
    }
}

#[derive(Debug, Clone)]
pub struct ProgressReporter {
    total: u64,
    interval: f64,
    last_step: u64,
    complete_reported: bool,
}

impl ProgressReporter {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            interval: total as f64 / calculate_steps(total),
            last_step: 0,
            complete_reported: false,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Record that `value` bytes are done. Returns true when a line was logged.
    pub fn report(&mut self, value: u64) -> bool {
        if self.complete_reported {
            return false;
        }

        let step = if self.interval > 0.0 {
            (value as f64 / self.interval) as u64
        } else {
            0
        };
        let complete = value == self.total;
        if step == self.last_step && !complete {
            return false;
        }

        let percent = if self.total == 0 {
            100.0
        } else {
            value as f64 * 100.0 / self.total as f64
        };
        info!(
            "{} / {} ({:.2}%)",
            friendly_bytes(value),
            friendly_bytes(self.total),
            percent
        );

        self.last_step = step;
        self.complete_reported = complete;
        true
    }
}
