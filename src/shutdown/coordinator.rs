//! # Shutdown Coordinator
//!
//! Registry of teardown callbacks run in reverse registration order once a
//! [`ShutdownTrigger`] fires.
//!
//! Resources registered later usually depend on resources registered earlier (an HTTP
//! listener that emits into the event sink is registered after the sink), so the last
//! registered callback runs first. All callbacks share one [`ShutdownContext`] whose
//! deadline covers the whole sequence. The deadline is advisory: the coordinator never
//! interrupts a running callback.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::trigger::{ShutdownReason, ShutdownTrigger};

/// Teardown logic for one resource
pub type ShutdownCallback =
    Box<dyn FnOnce(&ShutdownContext) -> anyhow::Result<()> + Send + 'static>;

/// Deadline shared by every callback of one shutdown sequence
///
/// A budget too large to represent as an [`Instant`] (for example `Duration::MAX`)
/// means the sequence has no deadline.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownContext {
    started_at: Instant,
    /// `None` when unbounded
    deadline: Option<Instant>,
    budget: Duration,
}

impl ShutdownContext {
    pub fn new(budget: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            started_at,
            deadline: started_at.checked_add(budget),
            budget,
        }
    }

    /// The shared deadline, or `None` when the budget is unbounded
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before the shared deadline, zero once it has passed
    ///
    /// Unbounded contexts report `Duration::MAX`.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShutdownPhase {
    Waiting = 0,
    Draining = 1,
    Done = 2,
}

impl From<u8> for ShutdownPhase {
    fn from(value: u8) -> Self {
        match value {
            0 => ShutdownPhase::Waiting,
            1 => ShutdownPhase::Draining,
            _ => ShutdownPhase::Done,
        }
    }
}

/// Result of running one callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackOutcome {
    pub name: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// What happened during [`ShutdownCoordinator::wait`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub reason: Option<ShutdownReason>,
    /// Outcomes in execution order (reverse of registration order)
    pub outcomes: Vec<CallbackOutcome>,
    pub elapsed: Duration,
    /// Whether the sequence as a whole ran past the shared deadline
    pub deadline_exceeded: bool,
}

impl ShutdownReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.succeeded)
    }

    pub fn failures(&self) -> Vec<&CallbackOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.succeeded)
            .collect()
    }

    pub fn executed_names(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .map(|outcome| outcome.name.as_str())
            .collect()
    }
}

struct RegisteredCallback {
    name: String,
    callback: ShutdownCallback,
}

/// LIFO teardown manager driven by a [`ShutdownTrigger`]
///
/// ```rust
/// use tasklog_core::shutdown::{ShutdownCoordinator, ShutdownTrigger};
/// use std::time::Duration;
///
/// let trigger = ShutdownTrigger::new();
/// let coordinator = ShutdownCoordinator::new(Duration::from_secs(5), trigger.clone());
/// coordinator.register("event_sink", |_ctx| Ok(()));
/// coordinator.register("http_listener", |_ctx| Ok(()));
///
/// trigger.trigger();
/// let report = coordinator.wait();
/// assert_eq!(report.executed_names(), vec!["http_listener", "event_sink"]);
/// ```
pub struct ShutdownCoordinator {
    deadline: Duration,
    trigger: ShutdownTrigger,
    /// Registration order; drained in reverse by `wait`
    callbacks: Mutex<Vec<RegisteredCallback>>,
    phase: AtomicU8,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("deadline", &self.deadline)
            .field("phase", &self.phase())
            .field("registered", &self.registered_names())
            .finish()
    }
}

impl ShutdownCoordinator {
    pub fn new(deadline: Duration, trigger: ShutdownTrigger) -> Self {
        Self {
            deadline,
            trigger,
            callbacks: Mutex::new(Vec::new()),
            phase: AtomicU8::new(ShutdownPhase::Waiting as u8),
        }
    }

    /// Append a callback to the teardown sequence
    ///
    /// Safe to call from any thread until draining starts. Callbacks registered after
    /// that are not run; a warning is emitted instead.
    pub fn register<F>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce(&ShutdownContext) -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let mut callbacks = self.callbacks.lock();
        if self.phase() != ShutdownPhase::Waiting {
            warn!(callback = %name, "Shutdown already in progress, callback not registered");
            return;
        }
        callbacks.push(RegisteredCallback {
            name,
            callback: Box::new(callback),
        });
    }

    /// Names in registration order
    pub fn registered_names(&self) -> Vec<String> {
        self.callbacks
            .lock()
            .iter()
            .map(|registered| registered.name.clone())
            .collect()
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from(self.phase.load(Ordering::Acquire))
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Handle that fires this coordinator
    pub fn trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Block until the trigger fires, then run every callback, last registered first
    ///
    /// Each callback is attempted exactly once, sequentially, with the same context.
    /// Failures and panics are logged and recorded but never stop the sequence. Only
    /// the first call drains; any other call returns an empty report.
    pub fn wait(&self) -> ShutdownReport {
        let reason = self.trigger.wait();

        let callbacks = {
            let mut callbacks = self.callbacks.lock();
            if self
                .phase
                .compare_exchange(
                    ShutdownPhase::Waiting as u8,
                    ShutdownPhase::Draining as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                warn!("Shutdown coordinator already drained, nothing to do");
                return ShutdownReport {
                    reason: Some(reason),
                    ..ShutdownReport::default()
                };
            }
            std::mem::take(&mut *callbacks)
        };

        info!(
            reason = %reason,
            callbacks = callbacks.len(),
            deadline_ms = self.deadline.as_millis() as u64,
            "Shutdown signal received, closing resources"
        );

        let context = ShutdownContext::new(self.deadline);
        let mut outcomes = Vec::with_capacity(callbacks.len());

        // LIFO: dependents registered later are torn down before their dependencies
        for registered in callbacks.into_iter().rev() {
            outcomes.push(run_callback(registered, &context));
        }

        self.phase.store(ShutdownPhase::Done as u8, Ordering::Release);

        let report = ShutdownReport {
            reason: Some(reason),
            outcomes,
            elapsed: context.elapsed(),
            deadline_exceeded: context.is_expired(),
        };

        if report.all_succeeded() {
            info!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                "All resources closed"
            );
        } else {
            warn!(
                failed = report.failures().len(),
                total = report.outcomes.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Shutdown finished with failures"
            );
        }

        report
    }
}

fn run_callback(registered: RegisteredCallback, context: &ShutdownContext) -> CallbackOutcome {
    let RegisteredCallback { name, callback } = registered;
    let started = Instant::now();

    let result = panic::catch_unwind(AssertUnwindSafe(move || callback(context)));
    let elapsed = started.elapsed();

    let error = match result {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
    };

    match &error {
        None => info!(
            callback = %name,
            elapsed_ms = elapsed.as_millis() as u64,
            "Shutdown callback completed"
        ),
        Some(message) => error!(
            callback = %name,
            error = %message,
            elapsed_ms = elapsed.as_millis() as u64,
            "Shutdown callback failed"
        ),
    }

    if context.is_expired() {
        warn!(
            callback = %name,
            overrun_ms = context.elapsed().saturating_sub(context.budget()).as_millis() as u64,
            "Shutdown callback finished past the shared deadline"
        );
    }

    CallbackOutcome {
        name,
        succeeded: error.is_none(),
        error,
        elapsed,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
