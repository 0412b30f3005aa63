//! # Tasklog Demo Service
//!
//! Wires the event sink and the shutdown coordinator together the way a task service
//! does at startup, with a heartbeat producer standing in for request handlers.
//!
//! ## Usage
//!
//! ```bash
//! # Events on stdout, diagnostics on stderr
//! cargo run --bin tasklog-demo
//!
//! # Events to a file, JSON diagnostics, custom budgets
//! TASKLOG_DESTINATION=/tmp/tasks.jsonl TASKLOG_LOG_FORMAT=json \
//!   TASKLOG_SHUTDOWN_TIMEOUT_MS=2000 cargo run --bin tasklog-demo
//! ```

use crossbeam::channel::{self, RecvTimeoutError};
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

use tasklog_core::logging::{self, log_shutdown_operation};
use tasklog_core::{Event, EventSink, ShutdownCoordinator, ShutdownTrigger, TasklogConfig};

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_structured_logging();

    let config_path = env::var("TASKLOG_CONFIG").ok();
    let config = TasklogConfig::load(config_path.as_deref())?;

    info!(
        queue_capacity = config.queue_capacity,
        close_timeout_ms = config.close_timeout_ms,
        shutdown_timeout_ms = config.shutdown_timeout_ms,
        destination = ?config.destination,
        "Starting tasklog demo service"
    );

    let sink = Arc::new(EventSink::from_config(&config)?);

    let trigger = ShutdownTrigger::new();
    trigger.install_signal_handlers()?;
    let coordinator = ShutdownCoordinator::new(config.shutdown_timeout(), trigger);

    // Registered first so it is closed last, after everything that emits into it
    let close_timeout = config.close_timeout();
    let sink_for_shutdown = sink.clone();
    coordinator.register("event_sink", move |ctx| {
        let started = Instant::now();
        sink_for_shutdown.close(close_timeout.min(ctx.remaining()))?;
        log_shutdown_operation(
            "close",
            "event_sink",
            "completed",
            Some(started.elapsed().as_millis() as u64),
            None,
        );
        Ok(())
    });

    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let producer_sink = sink.clone();
    let producer = std::thread::Builder::new()
        .name("tasklog-heartbeat".to_string())
        .spawn(move || {
            let session = Uuid::new_v4().to_string();
            let mut sequence: u64 = 0;
            loop {
                match stop_rx.recv_timeout(HEARTBEAT_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {
                        sequence += 1;
                        producer_sink.log(
                            Event::new("service.heartbeat")
                                .with_task_id(session.as_str())
                                .with_meta("sequence", sequence),
                        );
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            sequence
        })?;

    coordinator.register("heartbeat_producer", move |_ctx| {
        drop(stop_tx);
        let beats = producer
            .join()
            .map_err(|_| anyhow::anyhow!("heartbeat producer panicked"))?;
        log_shutdown_operation(
            "stop",
            "heartbeat_producer",
            "completed",
            None,
            Some(&format!("{beats} heartbeats emitted")),
        );
        Ok(())
    });

    sink.log(
        Event::new("service.started")
            .with_meta("pid", std::process::id())
            .with_meta("version", env!("CARGO_PKG_VERSION")),
    );
    info!("Press Ctrl+C to shutdown gracefully");

    let report = coordinator.wait();

    let stats = sink.stats();
    info!(
        events_written = stats.events_written,
        events_dropped = stats.events_dropped,
        write_failures = stats.write_failures,
        "Event sink totals"
    );

    for failure in report.failures() {
        error!(
            callback = %failure.name,
            error = failure.error.as_deref().unwrap_or("unknown"),
            "Resource did not shut down cleanly"
        );
    }

    info!(
        clean = report.all_succeeded(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "All resources closed. Bye!"
    );

    Ok(())
}
