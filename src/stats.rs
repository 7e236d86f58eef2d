//! Request counters and connection timings collected by the dispatcher.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::protocol::RequestKind;

/// Process-wide statistics, shared by every worker.
///
/// Counters are bumped once per request. The time from a connection being accepted to it being
/// closed is appended to a series behind its own lock, independent of the store and queue locks.
/// Nothing is ever cleared except through [`Stats::reset`].
#[derive(Debug, Default)]
pub struct Stats {
    lookups: AtomicU64,
    inserts: AtomicU64,
    deletes: AtomicU64,
    connection_times: Mutex<Vec<Duration>>,
}

/// A point-in-time summary of [`Stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsReport {
    /// number of POST requests handled
    pub inserts: u64,
    /// number of DELETE requests handled
    pub deletes: u64,
    /// number of GET requests handled
    pub lookups: u64,
    /// number of connections closed
    pub connections: usize,
    /// shortest connection, in milliseconds
    pub min_ms: f64,
    /// mean connection time, in milliseconds
    pub mean_ms: f64,
    /// longest connection, in milliseconds
    pub max_ms: f64,
    /// median connection time, in milliseconds
    pub median_ms: f64,
}

impl Stats {
    /// creates a set of zeroed statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// counts one request of the given kind
    pub fn record_request(&self, kind: RequestKind) {
        let counter = match kind {
            RequestKind::Get => &self.lookups,
            RequestKind::Post => &self.inserts,
            RequestKind::Delete => &self.deletes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// records how long a connection lived, from being accepted to being closed
    pub fn record_connection(&self, elapsed: Duration) {
        self.connection_times.lock().push(elapsed);
    }

    /// summarizes the statistics collected so far
    pub fn report(&self) -> StatsReport {
        let mut times: Vec<f64> = self
            .connection_times
            .lock()
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        times.sort_by(|a, b| a.total_cmp(b));

        let mut report = StatsReport {
            inserts: self.inserts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            connections: times.len(),
            ..StatsReport::default()
        };
        if let (Some(&min), Some(&max)) = (times.first(), times.last()) {
            let mid = times.len() / 2;
            report.min_ms = min;
            report.max_ms = max;
            report.mean_ms = times.iter().sum::<f64>() / times.len() as f64;
            report.median_ms = if times.len() % 2 == 1 {
                times[mid]
            } else {
                (times[mid - 1] + times[mid]) / 2.0
            };
        }
        report
    }

    /// zeroes every counter and forgets all recorded connection times
    pub fn reset(&self) {
        let mut times = self.connection_times.lock();
        times.clear();
        self.lookups.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total number of inserts = {}", self.inserts)?;
        writeln!(f, "Total number of deletes = {}", self.deletes)?;
        writeln!(f, "Total number of lookups = {}", self.lookups)?;
        write!(
            f,
            "Request time (ms) over {} connections: min = {:.3}, avg = {:.3}, max = {:.3}, median = {:.3}",
            self.connections, self.min_ms, self.mean_ms, self.max_ms, self.median_ms
        )
    }
}
