use thiserror::Error;

/// Error taxonomy for the voice-dialog server (see §7 of the design doc).
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("config error: {0}")]
    Config(String),

    /// Provider transport errors: non-OK HTTP, network failures, timeouts.
    #[error("provider transport error ({provider}): {message}")]
    ProviderTransport { provider: String, message: String },

    /// Provider semantic errors: OK response with an empty/invalid payload.
    #[error("provider semantic error ({provider}): {message}")]
    ProviderSemantic { provider: String, message: String },

    #[error("playback error: {0}")]
    Playback(String),

    #[error("telemetry error ({sink}): {message}")]
    Telemetry { sink: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxError>;
