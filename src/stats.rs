/// Per-connection operation statistics and formatting helpers
///
/// Every data operation issued through a [`Connection`](crate::Connection)
/// is timed and counted here, whichever calling convention carried it.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::protocol::ModbusFunction;

/// Operation counters for one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub avg_duration: Duration,
    /// Engine code of the most recent failure
    pub last_error_code: Option<i32>,
}

impl OperationStats {
    /// Create new empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful operation
    pub fn record_success(&mut self, duration: Duration) {
        self.successful_operations += 1;
        self.record(duration);
    }

    /// Record a failed operation and the code it failed with
    pub fn record_failure(&mut self, duration: Duration, code: i32) {
        self.failed_operations += 1;
        self.last_error_code = Some(code);
        self.record(duration);
    }

    fn record(&mut self, duration: Duration) {
        self.total_operations += 1;
        self.total_duration += duration;
        self.min_duration = Some(self.min_duration.map_or(duration, |min| min.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |max| max.max(duration)));
        self.avg_duration = self.total_duration / self.total_operations.min(u32::MAX as u64) as u32;
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        (self.successful_operations as f64 / self.total_operations as f64) * 100.0
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for OperationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Operation Statistics:\n\
             ├─ Total: {}\n\
             ├─ Successful: {} ({:.1}%)\n\
             ├─ Failed: {}\n\
             ├─ Average Duration: {}\n\
             ├─ Min Duration: {}\n\
             └─ Max Duration: {}",
            self.total_operations,
            self.successful_operations,
            self.success_rate(),
            self.failed_operations,
            format::format_duration(self.avg_duration),
            self.min_duration.map_or("N/A".to_string(), format::format_duration),
            self.max_duration.map_or("N/A".to_string(), format::format_duration),
        )
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    function: ModbusFunction,
}

impl OperationTimer {
    /// Start a new timer
    pub fn start(function: ModbusFunction) -> Self {
        trace!("starting {}", function);
        Self {
            start: Instant::now(),
            function,
        }
    }

    /// Function being timed
    pub fn function(&self) -> ModbusFunction {
        self.function
    }

    /// Time elapsed since the timer started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Formatting and display utilities
pub mod format {
    use std::time::Duration;

    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format register values as hex
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers
            .iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }
}
