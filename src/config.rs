//! # Tasklog Configuration
//!
//! Runtime settings for the event sink and the shutdown coordinator.
//!
//! Values are resolved in layers: built-in defaults, then an optional configuration
//! file, then `TASKLOG_`-prefixed environment variables.
//!
//! ```rust,no_run
//! use tasklog_core::config::TasklogConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TasklogConfig::load(Some("config/tasklog.toml"))?;
//! println!("queue capacity: {}", config.queue_capacity);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TasklogError};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;
/// Largest queue the sink preallocates; larger values are configuration errors
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Where serialized events are written
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDestination {
    Stdout,
    Stderr,
    File {
        path: PathBuf,
        #[serde(default = "default_append")]
        append: bool,
    },
}

fn default_append() -> bool {
    true
}

impl Default for EventDestination {
    fn default() -> Self {
        EventDestination::Stdout
    }
}

impl EventDestination {
    /// Open the destination as a writer owned by the sink worker
    pub fn open_writer(&self) -> Result<Box<dyn Write + Send>> {
        match self {
            EventDestination::Stdout => Ok(Box::new(std::io::stdout())),
            EventDestination::Stderr => Ok(Box::new(std::io::stderr())),
            EventDestination::File { path, append } => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(*append)
                    .truncate(!*append)
                    .open(path)
                    .map_err(|e| {
                        TasklogError::IoError(format!(
                            "Cannot open event destination {}: {e}",
                            path.display()
                        ))
                    })?;
                Ok(Box::new(file))
            }
        }
    }

    /// Parse the `TASKLOG_DESTINATION` shorthand: `stdout`, `stderr` or a file path
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "" => Err(TasklogError::ConfigurationError(
                "Event destination must not be empty".to_string(),
            )),
            "stdout" | "-" => Ok(EventDestination::Stdout),
            "stderr" => Ok(EventDestination::Stderr),
            path => Ok(EventDestination::File {
                path: PathBuf::from(path),
                append: true,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TasklogConfig {
    /// Bounded queue size of the event sink; events beyond it are dropped
    pub queue_capacity: usize,
    /// Budget for draining the event sink when it is closed
    pub close_timeout_ms: u64,
    /// Budget shared by all shutdown callbacks
    pub shutdown_timeout_ms: u64,
    #[serde(deserialize_with = "deserialize_destination")]
    pub destination: EventDestination,
}

/// Accepts either the shorthand string form (`"stderr"`, `"/var/log/tasks.jsonl"`)
/// or the tagged table form (`{ kind = "file", path = "...", append = false }`)
fn deserialize_destination<'de, D>(
    deserializer: D,
) -> std::result::Result<EventDestination, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value: Value = Deserialize::deserialize(deserializer)?;

    match value {
        Value::String(s) => EventDestination::parse(&s).map_err(D::Error::custom),
        Value::Object(_) => serde_json::from_value(value).map_err(D::Error::custom),
        _ => Err(D::Error::custom(
            "destination must be a string or a table with a `kind` field",
        )),
    }
}

impl Default for TasklogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            destination: EventDestination::default(),
        }
    }
}

impl TasklogConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Defaults overridden by individual `TASKLOG_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(capacity) = std::env::var("TASKLOG_QUEUE_CAPACITY") {
            config.queue_capacity = capacity.parse().map_err(|e| {
                TasklogError::ConfigurationError(format!("Invalid queue_capacity: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("TASKLOG_CLOSE_TIMEOUT_MS") {
            config.close_timeout_ms = timeout.parse().map_err(|e| {
                TasklogError::ConfigurationError(format!("Invalid close_timeout_ms: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("TASKLOG_SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout_ms = timeout.parse().map_err(|e| {
                TasklogError::ConfigurationError(format!("Invalid shutdown_timeout_ms: {e}"))
            })?;
        }

        if let Ok(destination) = std::env::var("TASKLOG_DESTINATION") {
            config.destination = EventDestination::parse(&destination)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, an optional file (TOML/YAML/JSON by extension) and the environment
    pub fn load<P: AsRef<Path>>(file: Option<P>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = ::config::Config::builder()
            .set_default("queue_capacity", defaults.queue_capacity as u64)?
            .set_default("close_timeout_ms", defaults.close_timeout_ms)?
            .set_default("shutdown_timeout_ms", defaults.shutdown_timeout_ms)?
            .set_default("destination.kind", "stdout")?;

        if let Some(path) = file {
            let path = path.as_ref();
            debug!(path = %path.display(), "Loading tasklog configuration file");
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        let config: TasklogConfig = builder
            .add_source(
                ::config::Environment::with_prefix("TASKLOG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_queue_capacity(self.queue_capacity)?;
        if self.close_timeout_ms == 0 {
            return Err(TasklogError::ConfigurationError(
                "close_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(TasklogError::ConfigurationError(
                "shutdown_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let EventDestination::File { path, .. } = &self.destination {
            if path.as_os_str().is_empty() {
                return Err(TasklogError::ConfigurationError(
                    "destination file path must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Reject capacities the bounded queue cannot allocate
pub(crate) fn check_queue_capacity(capacity: usize) -> Result<()> {
    if capacity > MAX_QUEUE_CAPACITY {
        return Err(TasklogError::ConfigurationError(format!(
            "queue_capacity {capacity} exceeds the maximum of {MAX_QUEUE_CAPACITY}"
        )));
    }
    Ok(())
}
