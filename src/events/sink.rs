//! # Event Sink
//!
//! Bounded, non-blocking event pipeline with a single background writer thread.
//!
//! ## Architecture
//!
//! ```text
//! request handlers / storage layer (any thread)
//!       |
//!       | log(event)  <-- try_send, never blocks, drops when full
//!       v
//! bounded crossbeam channel (capacity fixed at construction)
//!       |
//!       v
//! worker thread: serialize -> write -> flush, one JSON line per event
//! ```
//!
//! ## Key Design Decisions
//!
//! 1. **Availability over durability**: a full queue drops the newest event and emits a
//!    `tracing` warning. Producers never stall on the observability path.
//!
//! 2. **Sealing instead of signalling**: closing drops the only producer handle. The
//!    worker drains whatever is still queued and exits when the channel reports
//!    disconnection, so no event accepted before the seal is lost.
//!
//! 3. **Deadline without cancellation**: `close` waits for the worker up to a deadline.
//!    On timeout the worker keeps draining in the background and marks the sink
//!    closed when it finishes.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::Event;
use crate::config::{check_queue_capacity, TasklogConfig};
use crate::error::{Result, TasklogError};

const WORKER_THREAD_NAME: &str = "tasklog-event-sink";

/// Lifecycle of an [`EventSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkState {
    /// Accepting events
    Open = 0,
    /// Queue sealed, worker still draining
    Closing = 1,
    /// Worker drained everything and exited
    Closed = 2,
}

impl From<u8> for SinkState {
    fn from(value: u8) -> Self {
        match value {
            0 => SinkState::Open,
            1 => SinkState::Closing,
            _ => SinkState::Closed,
        }
    }
}

/// Point-in-time counters for an [`EventSink`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSinkStats {
    /// Events accepted into the queue
    pub events_logged: u64,
    /// Events serialized and written to the destination
    pub events_written: u64,
    /// Events dropped because the queue was full
    pub events_dropped: u64,
    /// Events discarded because the sink was already closing or closed
    pub events_rejected: u64,
    /// Events that failed to serialize or write
    pub write_failures: u64,
    /// Accepted events not yet handled by the worker
    pub pending: u64,
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct SinkCounters {
    logged: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

impl SinkCounters {
    fn pending(&self) -> u64 {
        let handled = self.written.load(Ordering::Acquire) + self.failed.load(Ordering::Acquire);
        self.logged.load(Ordering::Acquire).saturating_sub(handled)
    }
}

/// Asynchronous, bounded event logger
///
/// Cheap to share behind an [`Arc`]; every method takes `&self`.
///
/// ```rust
/// use tasklog_core::events::{Event, EventSink};
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = EventSink::new(std::io::sink(), 64)?;
/// sink.log(Event::new("task.created").with_task_id("42"));
/// sink.close(Duration::from_secs(1))?;
/// assert_eq!(sink.stats().events_written, 1);
/// # Ok(())
/// # }
/// ```
pub struct EventSink {
    /// Producer half of the queue; `None` once the queue is sealed
    sender: RwLock<Option<Sender<Event>>>,
    state: Arc<AtomicU8>,
    capacity: usize,
    counters: Arc<SinkCounters>,
    /// Signalled (or disconnected) when the worker exits
    worker_done: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("state", &self.state())
            .field("capacity", &self.capacity)
            .field("pending", &self.counters.pending())
            .finish()
    }
}

impl EventSink {
    /// Create a sink writing newline-delimited JSON to `writer` and start its worker
    ///
    /// A capacity of zero is a rendezvous queue: an event is only accepted while the
    /// worker is idle and waiting for the next one. Capacities above
    /// [`MAX_QUEUE_CAPACITY`](crate::config::MAX_QUEUE_CAPACITY) are rejected.
    pub fn new<W>(writer: W, capacity: usize) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        check_queue_capacity(capacity)?;

        let (sender, receiver) = channel::bounded::<Event>(capacity);
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let state = Arc::new(AtomicU8::new(SinkState::Open as u8));
        let counters = Arc::new(SinkCounters::default());

        let worker = SinkWorker {
            receiver,
            writer: Box::new(writer),
            counters: counters.clone(),
            exit: WorkerExit {
                state: state.clone(),
                done: done_tx,
            },
        };

        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(|e| TasklogError::WorkerSpawnError(e.to_string()))?;

        debug!(capacity = capacity, "Event sink started");

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            state,
            capacity,
            counters,
            worker_done: done_rx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Open the configured destination and create a sink with the configured capacity
    pub fn from_config(config: &TasklogConfig) -> Result<Self> {
        config.validate()?;
        let writer = config.destination.open_writer()?;
        Self::new(writer, config.queue_capacity)
    }

    /// Enqueue an event without blocking
    ///
    /// When the queue is full the event is dropped and a warning is emitted through
    /// `tracing`. After `close` has begun the event is discarded.
    pub fn log(&self, event: Event) {
        let sender = self.sender.read();
        let Some(tx) = sender.as_ref() else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(
                action = %event.action,
                task_id = ?event.task_id,
                "Event sink closed, discarding event"
            );
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {
                self.counters.logged.fetch_add(1, Ordering::AcqRel);
            }
            Err(TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    action = %event.action,
                    task_id = ?event.task_id,
                    capacity = self.capacity,
                    "Event queue full, dropping event"
                );
            }
            Err(TrySendError::Disconnected(event)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    action = %event.action,
                    task_id = ?event.task_id,
                    "Event sink worker is gone, discarding event"
                );
            }
        }
    }

    /// Seal the queue and wait up to `deadline` for the worker to drain it
    ///
    /// Only the first call does any work. Later calls, including ones racing with the
    /// first, return `Ok(())` immediately. On timeout the worker is left running and
    /// finishes the drain on its own.
    pub fn close(&self, deadline: Duration) -> Result<()> {
        {
            let mut sender = self.sender.write();
            if self
                .state
                .compare_exchange(
                    SinkState::Open as u8,
                    SinkState::Closing as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                debug!(state = ?self.state(), "Event sink already closing, nothing to do");
                return Ok(());
            }
            sender.take();
        }

        let pending = self.counters.pending();
        info!(pending = pending, deadline_ms = deadline.as_millis() as u64, "Closing event sink");
        let started = Instant::now();

        match self.worker_done.recv_timeout(deadline) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.worker.lock().take() {
                    if handle.join().is_err() {
                        error!("Event sink worker panicked while draining");
                    }
                }
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    events_written = self.counters.written.load(Ordering::Acquire),
                    "Event sink closed"
                );
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    pending = self.counters.pending(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Event sink did not drain before the deadline, worker continues in background"
                );
                Err(TasklogError::CloseTimeout { waited: deadline })
            }
        }
    }

    pub fn state(&self) -> SinkState {
        SinkState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SinkState::Open
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Accepted events not yet written (or failed) by the worker
    pub fn pending(&self) -> u64 {
        self.counters.pending()
    }

    pub fn stats(&self) -> EventSinkStats {
        EventSinkStats {
            events_logged: self.counters.logged.load(Ordering::Acquire),
            events_written: self.counters.written.load(Ordering::Acquire),
            events_dropped: self.counters.dropped.load(Ordering::Acquire),
            events_rejected: self.counters.rejected.load(Ordering::Acquire),
            write_failures: self.counters.failed.load(Ordering::Acquire),
            pending: self.counters.pending(),
            capacity: self.capacity,
        }
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        // Never closed: seal so the worker drains and exits by itself
        if self.sender.get_mut().take().is_some() {
            let _ = self.state.compare_exchange(
                SinkState::Open as u8,
                SinkState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            debug!("Event sink dropped without close, worker draining in background");
        }
    }
}

struct SinkWorker {
    receiver: Receiver<Event>,
    writer: Box<dyn Write + Send>,
    counters: Arc<SinkCounters>,
    exit: WorkerExit,
}

impl SinkWorker {
    fn run(mut self) {
        let mut line = Vec::with_capacity(256);

        // Yields queued events until the queue is sealed and empty
        for event in self.receiver.iter() {
            line.clear();
            if let Err(e) = serde_json::to_writer(&mut line, &event) {
                self.counters.failed.fetch_add(1, Ordering::AcqRel);
                error!(
                    action = %event.action,
                    task_id = ?event.task_id,
                    error = %e,
                    "Failed to serialize event"
                );
                continue;
            }
            line.push(b'\n');

            match write_record(&mut self.writer, &line) {
                Ok(()) => {
                    self.counters.written.fetch_add(1, Ordering::AcqRel);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::AcqRel);
                    error!(
                        action = %event.action,
                        task_id = ?event.task_id,
                        error = %e,
                        "Failed to write event"
                    );
                }
            }
        }

        debug!("Event sink worker drained queue and is exiting");
        drop(self.exit);
    }
}

/// Write one newline-terminated record and flush it
///
/// When a write fails after part of the record reached the destination, a bare newline
/// is attempted so the next record starts on its own line.
fn write_record(writer: &mut dyn Write, line: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < line.len() {
        match writer.write(&line[written..]) {
            Ok(0) => {
                return Err(terminate_partial(
                    writer,
                    written,
                    io::Error::new(io::ErrorKind::WriteZero, "event destination accepted no bytes"),
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(terminate_partial(writer, written, e)),
        }
    }
    writer.flush()
}

fn terminate_partial(writer: &mut dyn Write, written: usize, error: io::Error) -> io::Error {
    if written > 0 {
        let _ = writer.write_all(b"\n").and_then(|()| writer.flush());
    }
    error
}

/// Marks the sink closed and wakes `close` when the worker leaves, including on unwind
struct WorkerExit {
    state: Arc<AtomicU8>,
    done: Sender<()>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        self.state.store(SinkState::Closed as u8, Ordering::Release);
        let _ = self.done.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct MemoryWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for MemoryWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(SinkState::from(0), SinkState::Open);
        assert_eq!(SinkState::from(1), SinkState::Closing);
        assert_eq!(SinkState::from(2), SinkState::Closed);
        assert_eq!(SinkState::from(200), SinkState::Closed);
    }

    #[test]
    fn test_close_transitions_to_closed() {
        let sink = EventSink::new(io::sink(), 4).unwrap();
        assert_eq!(sink.state(), SinkState::Open);
        assert!(sink.is_open());

        sink.close(Duration::from_secs(2)).unwrap();
        assert_eq!(sink.state(), SinkState::Closed);
        assert!(!sink.is_open());
    }

    #[test]
    fn test_writes_one_line_per_event() {
        let buffer = MemoryWriter::default();
        let sink = EventSink::new(buffer.clone(), 8).unwrap();

        sink.log(Event::new("task.created").with_task_id("1"));
        sink.log(Event::new("task.deleted").with_task_id("1"));
        sink.close(Duration::from_secs(2)).unwrap();

        let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"action\":\"task.created\""));
        assert!(lines[1].contains("\"action\":\"task.deleted\""));

        let stats = sink.stats();
        assert_eq!(stats.events_logged, 2);
        assert_eq!(stats.events_written, 2);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.capacity, 8);
    }

    #[test]
    fn test_log_after_close_is_counted_as_rejected() {
        let sink = EventSink::new(io::sink(), 4).unwrap();
        sink.close(Duration::from_secs(2)).unwrap();

        sink.log(Event::new("late"));

        let stats = sink.stats();
        assert_eq!(stats.events_rejected, 1);
        assert_eq!(stats.events_logged, 0);
    }

    #[test]
    fn test_drop_without_close_lets_worker_exit() {
        let buffer = MemoryWriter::default();
        let sink = EventSink::new(buffer.clone(), 8).unwrap();
        sink.log(Event::new("task.created"));
        let state = sink.state.clone();
        drop(sink);

        let deadline = Instant::now() + Duration::from_secs(2);
        while SinkState::from(state.load(Ordering::Acquire)) != SinkState::Closed {
            assert!(Instant::now() < deadline, "worker did not exit after drop");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(String::from_utf8(buffer.0.lock().clone()).unwrap().lines().count(), 1);
    }
}
