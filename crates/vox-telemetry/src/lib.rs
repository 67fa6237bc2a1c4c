//! Telemetry fanout, call-log persistence, and call notification
//! (components E and K).

pub mod call_log;
pub mod document_memory;
pub mod kv_memory;
pub mod notify;
pub mod relational_sqlite;
pub mod sinks;
pub mod telemetry;

pub use sinks::{CallEnd, CallStart, DocumentSink, KvSink, PipelineStep, RelationalSink, Segment, SessionState};
pub use telemetry::Telemetry;
