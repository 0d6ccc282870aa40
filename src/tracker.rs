//! Operation tracker
//!
//! One tracker per process, shared by every request. All counters live behind
//! a single short-held lock so a snapshot never shows a half-applied update
//! (e.g. an upload counted but its bytes not yet added).

use std::time::Duration;

use parking_lot::Mutex;

/// Provider operations whose latency is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Save,
    Get,
    Delete,
    List,
}

impl Operation {
    pub const ALL: [Operation; 4] = [Operation::Save, Operation::Get, Operation::Delete, Operation::List];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Save => "save",
            Operation::Get => "get",
            Operation::Delete => "delete",
            Operation::List => "list",
        }
    }
}

/// Cumulative latency and call count of one operation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OperationTiming {
    pub total: Duration,
    pub count: u64,
}

impl OperationTiming {
    /// Average latency in whole milliseconds, 0 when never called
    pub fn average_ms(&self) -> u64 {
        if self.count == 0 {
            return 0;
        }
        (self.total.as_secs_f64() * 1000.0 / self.count as f64).round() as u64
    }
}

/// Point-in-time copy of every tracked counter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerSnapshot {
    pub save: OperationTiming,
    pub get: OperationTiming,
    pub delete: OperationTiming,
    pub list: OperationTiming,
    pub hits: u64,
    pub misses: u64,
    /// Successful uploads
    pub uploads: u64,
    /// Successful downloads (cache hits)
    pub downloads: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

impl TrackerSnapshot {
    /// Hit rate as a percentage, 0 when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        (self.hits as f64 / total as f64) * 100.0
    }

    pub fn timing(&self, operation: Operation) -> OperationTiming {
        match operation {
            Operation::Save => self.save,
            Operation::Get => self.get,
            Operation::Delete => self.delete,
            Operation::List => self.list,
        }
    }

    fn timing_mut(&mut self, operation: Operation) -> &mut OperationTiming {
        match operation {
            Operation::Save => &mut self.save,
            Operation::Get => &mut self.get,
            Operation::Delete => &mut self.delete,
            Operation::List => &mut self.list,
        }
    }
}

/// Process-wide metrics record
#[derive(Debug, Default)]
pub struct Tracker {
    counters: Mutex<TrackerSnapshot>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one call of `operation` taking `elapsed`
    pub fn record_timing(&self, operation: Operation, elapsed: Duration) {
        let mut counters = self.counters.lock();
        let timing = counters.timing_mut(operation);
        timing.total += elapsed;
        timing.count += 1;
    }

    /// Count a successful upload of `bytes` declared bytes
    pub fn record_upload(&self, bytes: u64) {
        let mut counters = self.counters.lock();
        counters.uploads += 1;
        counters.bytes_uploaded += bytes;
    }

    /// Count a cache hit, adding `size` to the downloaded bytes when known
    pub fn record_hit(&self, size: Option<u64>) {
        let mut counters = self.counters.lock();
        counters.hits += 1;
        counters.downloads += 1;
        counters.bytes_downloaded += size.unwrap_or(0);
    }

    pub fn record_miss(&self) {
        self.counters.lock().misses += 1;
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.counters.lock().clone()
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    }
}

/// Render the end-of-run statistics box printed on shutdown
pub fn format_summary(snapshot: &TrackerSnapshot) -> String {
    let hit_rate = format!("{:.1}", snapshot.hit_rate());
    let avg_save = format!("{}ms", snapshot.save.average_ms());
    let avg_get = format!("{}ms", snapshot.get.average_ms());

    [
        String::new(),
        "╔══════════════════════════════════════════╗".to_string(),
        "║           TurboGHA Statistics            ║".to_string(),
        "╠══════════════════════════════════════════╣".to_string(),
        format!("║  Cache Hit Rate: {:>6}%                 ║", hit_rate),
        format!(
            "║  Hits: {:>6} | Misses: {:>6}       ║",
            snapshot.hits, snapshot.misses
        ),
        "╠══════════════════════════════════════════╣".to_string(),
        format!(
            "║  Uploads:   {:>4} ({:>8})       ║",
            snapshot.uploads,
            format_bytes(snapshot.bytes_uploaded)
        ),
        format!(
            "║  Downloads: {:>4} ({:>8})       ║",
            snapshot.downloads,
            format_bytes(snapshot.bytes_downloaded)
        ),
        "╠══════════════════════════════════════════╣".to_string(),
        format!("║  Avg Save: {:>7}                    ║", avg_save),
        format!("║  Avg Get:  {:>7}                    ║", avg_get),
        "╚══════════════════════════════════════════╝".to_string(),
    ]
    .join("\n")
}
