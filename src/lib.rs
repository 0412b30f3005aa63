#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasklog Core
//!
//! Non-blocking event logging and coordinated graceful shutdown for task services.
//!
//! ## Overview
//!
//! Request handlers and storage code emit small structured [`Event`]s from any thread.
//! The [`EventSink`] accepts them without ever blocking, serializes them on a single
//! background worker and writes them as newline-delimited JSON. When the queue is full
//! the newest event is dropped and a diagnostic is emitted instead: producers are never
//! slowed down by the observability path.
//!
//! The [`ShutdownCoordinator`] collects teardown callbacks during startup and, when the
//! [`ShutdownTrigger`] fires (SIGINT, SIGTERM or a programmatic call), runs them in
//! reverse registration order under one shared deadline.
//!
//! ## Module Organization
//!
//! - [`events`] - Event type and the bounded asynchronous sink
//! - [`shutdown`] - Trigger, LIFO teardown coordinator and shutdown reports
//! - [`config`] - Queue capacity, deadlines and event destination
//! - [`logging`] - Diagnostic channel setup (`tracing`)
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasklog_core::{Event, EventSink, ShutdownCoordinator, ShutdownTrigger, TasklogConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TasklogConfig::from_env()?;
//! let sink = Arc::new(EventSink::from_config(&config)?);
//!
//! let trigger = ShutdownTrigger::new();
//! trigger.install_signal_handlers()?;
//! let coordinator = ShutdownCoordinator::new(config.shutdown_timeout(), trigger);
//!
//! let close_timeout = config.close_timeout();
//! let sink_for_shutdown = sink.clone();
//! coordinator.register("event_sink", move |ctx| {
//!     sink_for_shutdown.close(close_timeout.min(ctx.remaining()))?;
//!     Ok(())
//! });
//!
//! sink.log(Event::new("service.started"));
//! let report = coordinator.wait();
//! println!("shutdown clean: {}", report.all_succeeded());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod shutdown;

pub use crate::config::{EventDestination, TasklogConfig};
pub use error::{Result, TasklogError};
pub use events::{Event, EventSink, EventSinkStats, SinkState};
pub use shutdown::{
    CallbackOutcome, ShutdownContext, ShutdownCoordinator, ShutdownPhase, ShutdownReason,
    ShutdownReport, ShutdownTrigger,
};
