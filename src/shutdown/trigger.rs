//! Oneshot, origin-agnostic shutdown trigger.
//!
//! A [`ShutdownTrigger`] fires at most once. It can be fired programmatically (tests,
//! admin endpoints) or by the OS signal listener installed with
//! [`ShutdownTrigger::install_signal_handlers`]. Waiters can block a thread or await it.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{Result, TasklogError};

/// Why shutdown was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Explicit call to [`ShutdownTrigger::trigger`]
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "interrupt"),
            ShutdownReason::Terminate => write!(f, "terminate"),
            ShutdownReason::Requested => write!(f, "requested"),
        }
    }
}

struct TriggerInner {
    reason: Mutex<Option<ShutdownReason>>,
    fired: Condvar,
    /// Mirror of `reason.is_some()` for async waiters
    watch: watch::Sender<bool>,
}

/// Clonable handle to a process-wide, fire-once shutdown token
#[derive(Clone)]
pub struct ShutdownTrigger {
    inner: Arc<TriggerInner>,
}

impl fmt::Debug for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownTrigger")
            .field("reason", &self.reason())
            .finish()
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(false);
        Self {
            inner: Arc::new(TriggerInner {
                reason: Mutex::new(None),
                fired: Condvar::new(),
                watch,
            }),
        }
    }

    /// Request shutdown; returns `false` if the trigger had already fired
    pub fn trigger(&self) -> bool {
        self.fire(ShutdownReason::Requested)
    }

    /// Fire with an explicit reason; only the first reason is kept
    pub fn fire(&self, reason: ShutdownReason) -> bool {
        let mut current = self.inner.reason.lock();
        if current.is_some() {
            debug!(reason = %reason, "Shutdown trigger already fired, ignoring");
            return false;
        }
        *current = Some(reason);
        self.inner.fired.notify_all();
        self.inner.watch.send_replace(true);
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.reason.lock().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.inner.reason.lock()
    }

    /// Block the calling thread until the trigger fires
    pub fn wait(&self) -> ShutdownReason {
        let mut reason = self.inner.reason.lock();
        loop {
            if let Some(fired) = *reason {
                return fired;
            }
            self.inner.fired.wait(&mut reason);
        }
    }

    /// Block for at most `timeout`; `None` if the trigger did not fire in time
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ShutdownReason> {
        let mut reason = self.inner.reason.lock();
        if reason.is_none() {
            let _ = self
                .inner
                .fired
                .wait_while_for(&mut reason, |r| r.is_none(), timeout);
        }
        *reason
    }

    /// Await the trigger from async code
    pub async fn triggered(&self) -> ShutdownReason {
        let mut rx = self.inner.watch.subscribe();
        // The sender lives as long as `self`, so this only returns once fired
        let _ = rx.wait_for(|fired| *fired).await;
        self.reason().unwrap_or(ShutdownReason::Requested)
    }

    /// Fire this trigger on SIGINT (Ctrl-C) or SIGTERM
    ///
    /// Signal handlers are registered before this returns, so registration failures are
    /// reported here. Listening happens on a dedicated thread with a single-threaded
    /// runtime; the thread exits once the trigger fires from any source.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let listener = {
            let _guard = runtime.enter();
            SignalListener::register()?
        };

        let trigger = self.clone();
        std::thread::Builder::new()
            .name("tasklog-signal".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    tokio::select! {
                        reason = listener.recv() => {
                            match reason {
                                Some(reason) => {
                                    info!(reason = %reason, "Received shutdown signal");
                                    trigger.fire(reason);
                                }
                                None => error!("Signal stream closed unexpectedly"),
                            }
                        }
                        _ = trigger.triggered() => {
                            debug!("Shutdown triggered elsewhere, signal listener exiting");
                        }
                    }
                });
            })
            .map_err(|e| TasklogError::WorkerSpawnError(e.to_string()))?;

        debug!("Signal handlers installed for SIGINT and SIGTERM");
        Ok(())
    }
}

#[cfg(unix)]
struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn register() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) -> Option<ShutdownReason> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|()| ShutdownReason::Interrupt),
            received = self.terminate.recv() => received.map(|()| ShutdownReason::Terminate),
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn register() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> Option<ShutdownReason> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| ShutdownReason::Interrupt)
    }
}
