pub mod sink;
pub mod types;

// Re-export key types for convenience
pub use sink::{EventSink, EventSinkStats, SinkState};
pub use types::Event;
