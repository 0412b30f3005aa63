//! Shared writers for sink tests.
#![allow(dead_code)]

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tasklog_core::{EventSink, SinkState};
use tracing_subscriber::fmt::MakeWriter;

/// In-memory destination that can be inspected while the sink owns a clone
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.bytes.lock().clone()).expect("sink output is utf-8")
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn records(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is one JSON record"))
            .collect()
    }

    pub fn actions(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|record| record["action"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = SharedBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a thread-local subscriber and return what it logged at debug and above
///
/// Only diagnostics emitted on the calling thread are captured, which covers everything
/// `EventSink::log` reports.
pub fn capture_diagnostics<T>(f: impl FnOnce() -> T) -> (T, SharedBuffer) {
    let diagnostics = SharedBuffer::new();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(diagnostics.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, diagnostics)
}

/// Open/closed gate shared between a test and a [`GatedWriter`]
#[derive(Clone)]
pub struct Gate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn closed() -> Self {
        Self {
            state: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn open(&self) {
        let (open, cond) = &*self.state;
        *open.lock() = true;
        cond.notify_all();
    }

    fn pass(&self) {
        let (open, cond) = &*self.state;
        let mut open = open.lock();
        while !*open {
            cond.wait(&mut open);
        }
    }
}

/// Writer that parks the sink worker inside `write` until its gate opens
pub struct GatedWriter {
    inner: SharedBuffer,
    gate: Gate,
    entered: Sender<()>,
}

impl GatedWriter {
    /// Returns the writer, the gate controlling it and a receiver that gets one message
    /// each time the worker starts a write
    pub fn new(inner: SharedBuffer) -> (Self, Gate, Receiver<()>) {
        let gate = Gate::closed();
        let (entered_tx, entered_rx) = channel::unbounded();
        (
            Self {
                inner,
                gate: gate.clone(),
                entered: entered_tx,
            },
            gate,
            entered_rx,
        )
    }
}

impl Write for GatedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.entered.send(());
        self.gate.pass();
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writer that fails any record containing `needle`
pub struct FailingWriter {
    inner: SharedBuffer,
    needle: &'static str,
}

impl FailingWriter {
    pub fn new(inner: SharedBuffer, needle: &'static str) -> Self {
        Self { inner, needle }
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if String::from_utf8_lossy(buf).contains(self.needle) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "destination rejected record"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writer that accepts the first half of any record containing `needle`, then fails
pub struct TearingWriter {
    inner: SharedBuffer,
    needle: &'static str,
    torn: bool,
}

impl TearingWriter {
    pub fn new(inner: SharedBuffer, needle: &'static str) -> Self {
        Self {
            inner,
            needle,
            torn: false,
        }
    }
}

impl Write for TearingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.torn {
            self.torn = false;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "destination went away"));
        }
        if buf.len() > 1 && String::from_utf8_lossy(buf).contains(self.needle) {
            self.torn = true;
            return self.inner.write(&buf[..buf.len() / 2]);
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wait until the worker reports it has entered a write
pub fn await_worker_entered(entered: &Receiver<()>) {
    entered
        .recv_timeout(Duration::from_secs(5))
        .expect("sink worker should start writing");
}

/// Poll until the sink reaches `Closed`
pub fn await_closed(sink: &EventSink, within: Duration) {
    let deadline = Instant::now() + within;
    while sink.state() != SinkState::Closed {
        assert!(Instant::now() < deadline, "sink did not reach Closed in {within:?}");
        std::thread::sleep(Duration::from_millis(5));
    }
}
