//! Structured logging with engine correlation ids.
//!
//! Complements the `tracing` macros used throughout the workspace with a
//! queryable in-process event buffer, so the facade and remote inspectors
//! can read back what happened to a token.

mod collector;
mod event;

pub use collector::{BufferedCollector, LogCollector, NullCollector, DEFAULT_BUFFER_CAPACITY};
pub use event::{LogCategory, LogEvent, LogLevel};
