//! # Log bridge
//!
//! Carries a session's log lines from the chaos task to the HTTP response.
//!
//! ```text
//! ChaosRunner --LogSink--> [bounded channel] --LoggerLease--> event_stream --> client
//! ```
//!
//! The channel is lossy: producers never wait, overflow is dropped. Channels
//! are pooled and handed out as [`LoggerLease`]s that drain and return them
//! on drop.

pub mod entry;
pub mod pool;
pub mod sink;
pub mod stream;

pub use entry::{LogEntry, LogLevel};
pub use pool::{LoggerLease, LoggerPool, DEFAULT_LOG_BUFFER};
pub use sink::LogSink;
pub use stream::{event_stream, single_frame, DISCONNECT_MESSAGE};
