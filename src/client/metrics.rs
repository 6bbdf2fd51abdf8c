//! Round-trip metrics for workers and the fleet.

use std::fmt;
use std::io;
use std::time::Duration;

/// How a worker's cycle loop ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// Ran every configured cycle.
    Completed,
    /// Stopped on a response timeout under the stop policy.
    TimedOut,
    /// Hit an unrecoverable error: setup, send, receive or peer disconnect.
    Failed(io::Error),
}

impl WorkerExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, WorkerExit::Failed(_))
    }
}

/// Metrics accumulated by one worker.
///
/// Written only by the owning worker, then handed to the orchestrator when
/// the worker thread is joined.
#[derive(Debug)]
pub struct WorkerMetrics {
    pub worker_id: usize,
    /// Accumulated round-trip time in microseconds.
    pub total_rtt_us: u64,
    /// Completed round trips.
    pub round_trips: u64,
    /// Cycles abandoned because the response did not arrive in time.
    pub timeouts: u64,
    pub exit: WorkerExit,
}

impl WorkerMetrics {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            total_rtt_us: 0,
            round_trips: 0,
            timeouts: 0,
            exit: WorkerExit::Completed,
        }
    }

    /// Metrics for a worker that failed before completing any cycle.
    pub fn failed(worker_id: usize, error: io::Error) -> Self {
        Self {
            exit: WorkerExit::Failed(error),
            ..Self::new(worker_id)
        }
    }

    /// Record one completed round trip.
    ///
    /// Stored at microsecond resolution, rounded up to at least 1us so a
    /// completed cycle always contributes a positive time.
    pub fn record(&mut self, rtt: Duration) -> u64 {
        let us = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX).max(1);
        self.total_rtt_us = self.total_rtt_us.saturating_add(us);
        self.round_trips += 1;
        us
    }

    /// Mean RTT in whole microseconds, if any cycle completed.
    pub fn mean_rtt_us(&self) -> Option<u64> {
        (self.round_trips > 0).then(|| self.total_rtt_us / self.round_trips)
    }

    /// Completed round trips per second of accumulated round-trip time.
    pub fn request_rate(&self) -> f64 {
        if self.round_trips == 0 || self.total_rtt_us == 0 {
            return 0.0;
        }
        self.round_trips as f64 / (self.total_rtt_us as f64 / 1_000_000.0)
    }
}

impl fmt::Display for WorkerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Client thread finished. Avg RTT: {} us, Request rate: {:.2} req/s",
            self.mean_rtt_us().unwrap_or(0),
            self.request_rate()
        )
    }
}

/// Sums of every worker's metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub workers: usize,
    pub failed_workers: usize,
    pub total_rtt_us: u64,
    pub round_trips: u64,
    pub timeouts: u64,
    /// Sum of each worker's own request rate.
    pub total_request_rate: f64,
}

impl AggregateReport {
    /// Merge the metrics of every terminated worker.
    pub fn from_workers<'a>(workers: impl IntoIterator<Item = &'a WorkerMetrics>) -> Self {
        workers
            .into_iter()
            .fold(AggregateReport::default(), |mut report, worker| {
                report.workers += 1;
                if worker.exit.is_failure() {
                    report.failed_workers += 1;
                }
                report.total_rtt_us = report.total_rtt_us.saturating_add(worker.total_rtt_us);
                report.round_trips += worker.round_trips;
                report.timeouts += worker.timeouts;
                report.total_request_rate += worker.request_rate();
                report
            })
    }

    /// Fleet mean RTT: total time over total round trips.
    pub fn mean_rtt_us(&self) -> Option<u64> {
        (self.round_trips > 0).then(|| self.total_rtt_us / self.round_trips)
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mean_rtt_us() {
            Some(mean) => writeln!(f, "Average RTT: {mean} us")?,
            None => writeln!(f, "Average RTT: No messages sent")?,
        }
        write!(f, "Total Request Rate: {:.6} messages/s", self.total_request_rate)
    }
}
