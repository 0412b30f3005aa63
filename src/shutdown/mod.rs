//! # Graceful Shutdown
//!
//! A fire-once [`ShutdownTrigger`] and the [`ShutdownCoordinator`] that tears resources
//! down in reverse registration order when it fires.

pub mod coordinator;
pub mod trigger;

pub use coordinator::{
    CallbackOutcome, ShutdownCallback, ShutdownContext, ShutdownCoordinator, ShutdownPhase,
    ShutdownReport,
};
pub use trigger::{ShutdownReason, ShutdownTrigger};
