//! Error types for the tasklog core.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TasklogError {
    #[error("Event sink did not finish draining within {waited:?}")]
    CloseTimeout { waited: Duration },
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawnError(String),
}

impl TasklogError {
    /// Whether this error is a close deadline expiring while the worker was still draining
    pub fn is_timeout(&self) -> bool {
        matches!(self, TasklogError::CloseTimeout { .. })
    }
}

impl From<std::io::Error> for TasklogError {
    fn from(error: std::io::Error) -> Self {
        TasklogError::IoError(error.to_string())
    }
}

impl From<::config::ConfigError> for TasklogError {
    fn from(error: ::config::ConfigError) -> Self {
        TasklogError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TasklogError>;
