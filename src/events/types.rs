use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single structured record handed to the [`EventSink`](super::EventSink)
///
/// Built once and never mutated afterwards; the builder methods consume `self`.
/// Serialized as one JSON object per line:
///
/// ```json
/// {"time":"2026-01-01T00:00:00Z","action":"task.created","task_id":"42","meta":{"title":"x"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl Event {
    /// Create an event stamped with the current UTC time
    pub fn new(action: impl Into<String>) -> Self {
        Self::at(Utc::now(), action)
    }

    /// Create an event with an explicit timestamp
    pub fn at(time: DateTime<Utc>, action: impl Into<String>) -> Self {
        Self {
            time,
            action: action.into(),
            task_id: None,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Attach one metadata entry; a repeated key replaces the earlier value
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_meta_map(mut self, meta: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.meta.extend(meta);
        self
    }
}
