//! Shared types, layered configuration, and error taxonomy for the
//! telephony voice-dialog server.

pub mod config;
pub mod error;
pub mod types;
