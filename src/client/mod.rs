//! Benchmark client: fan out workers, then fan in their metrics.
//!
//! Every worker runs on its own OS thread and owns its connection for its
//! whole life. The orchestrator joins every thread before reading any
//! metrics; the join is the only synchronisation needed.

mod metrics;
mod worker;

pub use metrics::{AggregateReport, WorkerMetrics};
pub use worker::Worker;

use crate::config::ClientSettings;
use std::io::{self, Write};
use std::thread;
use tracing::{debug, error, info, warn};

/// Run `settings.workers` workers against the configured target.
pub fn run(settings: &ClientSettings) -> AggregateReport {
    info!(
        host = %settings.host,
        port = settings.port,
        workers = settings.workers,
        requests = settings.requests,
        timeout_ms = settings.response_timeout.as_millis() as u64,
        on_timeout = ?settings.on_timeout,
        "Starting client"
    );

    let workers = (0..settings.workers)
        .map(|id| Worker::new(id, settings.clone()))
        .collect();
    run_fleet(workers)
}

/// Start every worker concurrently, wait for all of them, then merge.
pub fn run_fleet(workers: Vec<Worker>) -> AggregateReport {
    let mut handles = Vec::with_capacity(workers.len());

    for worker in workers {
        let id = worker.id();
        let spawned = thread::Builder::new()
            .name(format!("client-{id}"))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => handles.push((id, Ok(handle))),
            Err(e) => {
                error!(worker = id, error = %e, "Failed to spawn worker");
                handles.push((id, Err(e)));
            }
        }
    }

    // Join before reading anything.
    let finished: Vec<WorkerMetrics> = handles
        .into_iter()
        .map(|(id, handle)| match handle {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                error!(worker = id, "Worker panicked");
                WorkerMetrics::failed(id, io::Error::new(io::ErrorKind::Other, "worker panicked"))
            }),
            Err(e) => WorkerMetrics::failed(id, e),
        })
        .collect();

    for metrics in &finished {
        debug!(
            worker = metrics.worker_id,
            round_trips = metrics.round_trips,
            timeouts = metrics.timeouts,
            exit = ?metrics.exit,
            "Worker joined"
        );
    }
    print_summaries(&mut io::stdout().lock(), &finished);

    let report = AggregateReport::from_workers(&finished);
    info!(
        workers = report.workers,
        failed = report.failed_workers,
        round_trips = report.round_trips,
        timeouts = report.timeouts,
        "Client finished"
    );
    report
}

/// One summary line per worker. Output failures are logged, not fatal.
fn print_summaries<W: Write>(out: &mut W, finished: &[WorkerMetrics]) {
    for metrics in finished {
        if let Err(e) = writeln!(out, "{metrics}") {
            warn!(error = %e, "Cannot print worker summaries");
            return;
        }
    }
}
