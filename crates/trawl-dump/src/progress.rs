//! Progress accounting and reporting
//!
//! Counters are atomic and always maintained; the human-readable report is a
//! diagnostic, not a correctness contract, so a worker that cannot take the
//! display lock simply skips the update.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use crate::writer::WriteResult;

/// Minimum interval between progress lines.
const REPORT_EVERY: Duration = Duration::from_secs(2);

struct Display {
    last_report: Instant,
    last_data_bytes: u64,
    last_bytes_written: u64,
}

/// Job-wide progress state shared by the coordinator and all workers.
pub struct Progress {
    rows_written: AtomicU64,
    bytes_written: AtomicU64,
    data_bytes: AtomicU64,
    total_rows: AtomicU64,
    threads_chunking: AtomicUsize,
    threads_dumping: AtomicUsize,
    display: Mutex<Display>,
    enabled: bool,
}

impl Progress {
    /// Create progress state; `enabled` controls the periodic report lines.
    pub fn new(enabled: bool) -> Self {
        Self {
            rows_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            data_bytes: AtomicU64::new(0),
            total_rows: AtomicU64::new(0),
            threads_chunking: AtomicUsize::new(0),
            threads_dumping: AtomicUsize::new(0),
            display: Mutex::new(Display {
                last_report: Instant::now(),
                last_data_bytes: 0,
                last_bytes_written: 0,
            }),
            enabled,
        }
    }

    /// Set the estimated total row count.
    pub fn set_total_rows(&self, total: u64) {
        self.total_rows.store(total, Ordering::Relaxed);
    }

    /// A worker entered chunk discovery.
    pub fn chunking_started(&self) {
        self.threads_chunking.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker left chunk discovery.
    pub fn chunking_finished(&self) {
        self.threads_chunking.fetch_sub(1, Ordering::Relaxed);
    }

    /// A worker entered data extraction.
    pub fn dumping_started(&self) {
        self.threads_dumping.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker left data extraction.
    pub fn dumping_finished(&self) {
        self.threads_dumping.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record written rows and bytes, and maybe emit a report line. The
    /// display lock is try-acquired; contention skips the line.
    pub fn update(&self, rows: u64, bytes: WriteResult) {
        let rows_total = self.rows_written.fetch_add(rows, Ordering::Relaxed) + rows;
        let bytes_total = self
            .bytes_written
            .fetch_add(bytes.bytes_written, Ordering::Relaxed)
            + bytes.bytes_written;
        let data_total = self.data_bytes.fetch_add(bytes.data_bytes, Ordering::Relaxed)
            + bytes.data_bytes;

        if !self.enabled {
            return;
        }

        let Some(mut display) = self.display.try_lock() else {
            return;
        };
        let elapsed = display.last_report.elapsed();
        if elapsed < REPORT_EVERY {
            return;
        }

        let data_rate = (data_total - display.last_data_bytes) as f64 / elapsed.as_secs_f64();
        let byte_rate =
            (bytes_total - display.last_bytes_written) as f64 / elapsed.as_secs_f64();
        display.last_report = Instant::now();
        display.last_data_bytes = data_total;
        display.last_bytes_written = bytes_total;

        let chunking = self.threads_chunking.load(Ordering::Relaxed);
        let dumping = self.threads_dumping.load(Ordering::Relaxed);
        let total = self.total_rows.load(Ordering::Relaxed);

        if chunking == 0 {
            info!(
                "{} thds dumping - {} / ~{} rows, {}/s uncompressed, {}/s compressed",
                dumping,
                rows_total,
                total,
                format_bytes(data_rate as u64),
                format_bytes(byte_rate as u64),
            );
        } else {
            info!(
                "{} thds chunking, {} dumping - {} / ~{} rows, {}/s uncompressed, {}/s compressed",
                chunking,
                dumping,
                rows_total,
                total,
                format_bytes(data_rate as u64),
                format_bytes(byte_rate as u64),
            );
        }
    }

    /// Rows written so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Post-compression bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Pre-compression bytes written so far.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes.load(Ordering::Relaxed)
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["bytes", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Human-readable throughput.
pub fn format_throughput(bytes: u64, seconds: f64) -> String {
    let rate = if seconds > 0.0 {
        (bytes as f64 / seconds) as u64
    } else {
        bytes
    };
    format!("{}/s", format_bytes(rate))
}

/// `HH:MM:SSs` rendering of a duration.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}s",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let progress = Progress::new(false);

        progress.update(
            10,
            WriteResult {
                bytes_written: 100,
                data_bytes: 300,
            },
        );
        progress.update(
            5,
            WriteResult {
                bytes_written: 50,
                data_bytes: 150,
            },
        );

        assert_eq!(progress.rows_written(), 15);
        assert_eq!(progress.bytes_written(), 150);
        assert_eq!(progress.data_bytes(), 450);
    }

    #[test]
    fn test_thread_gauges() {
        let progress = Progress::new(false);
        progress.chunking_started();
        progress.dumping_started();
        progress.dumping_started();
        progress.chunking_finished();
        progress.dumping_finished();

        assert_eq!(progress.threads_chunking.load(Ordering::Relaxed), 0);
        assert_eq!(progress.threads_dumping.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 bytes");
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1024), "1.00 KiB");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn test_format_throughput() {
        assert_eq!(format_throughput(1024 * 1024, 1.0), "1.00 MiB/s");
        assert_eq!(format_throughput(2048, 2.0), "1.00 KiB/s");
        assert_eq!(format_throughput(100, 0.0), "100 bytes/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00:00s");
        assert_eq!(format_duration(Duration::from_secs(65)), "00:01:05s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "01:01:01s");
    }
}
