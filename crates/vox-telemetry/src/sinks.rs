//! Sink contracts and the data shapes carried across them (§4.E).
//!
//! Three independent backends: a relational store for call metadata and
//! scenarios, a document store for dialog segments and a pipeline-step
//! log, and an ephemeral key/value store for active-session state and
//! pub/sub call events. Each is a narrow trait so the facade in
//! [`crate::telemetry`] can isolate one backend's failure from the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row written to the relational sink when a call begins.
#[derive(Debug, Clone)]
pub struct CallStart {
    pub call_id: String,
    pub uuid: String,
    pub caller: String,
    pub mode: String,
    pub robot_name: String,
    pub language: String,
    pub scenario_id: Option<String>,
}

/// Fields applied to the relational sink's call row at call end.
#[derive(Debug, Clone)]
pub struct CallEnd {
    pub duration_sec: f64,
    pub turns: u32,
    pub barge_ins: u32,
    pub status: String,
}

/// One dialog turn recorded to the document sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub asr_provider: String,
    #[serde(default)]
    pub asr_latency_ms: u64,
    #[serde(default)]
    pub llm_provider: String,
    #[serde(default)]
    pub llm_latency_ms: u64,
    #[serde(default)]
    pub tts_provider: String,
    #[serde(default)]
    pub tts_latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// One step of the ASR/LLM/TTS/barge-in pipeline, recorded to the document
/// sink alongside the segment it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub step: String,
    pub duration_ms: u64,
    pub provider: String,
    pub result: String,
}

/// Active-session snapshot carried in the ephemeral KV sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub mode: String,
    pub robot_name: String,
    pub language: String,
    pub scenario_id: String,
    pub caller: String,
    pub turns: u32,
    pub barge_ins: u32,
    pub history: Vec<(String, String)>,
    pub ended: bool,
}

#[async_trait]
pub trait RelationalSink: Send + Sync {
    async fn insert_call(&self, call: &CallStart) -> anyhow::Result<()>;
    async fn finish_call(&self, call_id: &str, summary: &CallEnd) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn create_transcription(&self, call_id: &str, language: &str) -> anyhow::Result<()>;
    async fn add_segment(&self, call_id: &str, segment: Segment) -> anyhow::Result<()>;
    async fn add_pipeline_step(&self, call_id: &str, step: PipelineStep) -> anyhow::Result<()>;
    async fn finish_transcription(&self, call_id: &str, total_duration_ms: u64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait KvSink: Send + Sync {
    async fn create_session(&self, call_id: &str, state: SessionState) -> anyhow::Result<()>;
    async fn update_session_turns(&self, call_id: &str, turns: u32) -> anyhow::Result<()>;
    async fn update_session_barge_ins(&self, call_id: &str, barge_ins: u32) -> anyhow::Result<()>;
    async fn get_session(&self, call_id: &str) -> anyhow::Result<Option<SessionState>>;
    async fn push_message(&self, call_id: &str, role: &str, text: &str) -> anyhow::Result<()>;
    async fn end_session(&self, call_id: &str) -> anyhow::Result<()>;
    async fn publish_event(&self, channel: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}
