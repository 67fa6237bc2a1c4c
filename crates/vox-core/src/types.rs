//! Data model shared across the voice-dialog server (§3 of the design doc).

use serde::{Deserialize, Serialize};

/// One entry in the dialog context passed to the LLM adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Turn { role: Role::System, text: text.into() }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Turn { role: Role::User, text: text.into() }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Turn { role: Role::Assistant, text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single pre-loaded track in script mode: its PCM16 payload and native rate.
#[derive(Debug, Clone)]
pub struct Track {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

/// Per-call track catalog, keyed case-sensitively by file name. `greeting.wav`
/// is excluded from the catalog at load time.
pub type TrackCatalog = std::collections::HashMap<String, Track>;
