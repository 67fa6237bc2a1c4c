//! In-process document sink.
//!
//! Stands in for the original platform's MongoDB client: one document per
//! call, keyed on `call_id` (unique), with segments and pipeline steps
//! appended to ordered arrays and `updated_at` bumped on every write.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::sinks::{DocumentSink, PipelineStep, Segment};

#[derive(Debug, Clone)]
pub struct Transcription {
    pub call_id: String,
    pub language: String,
    pub segments: Vec<Segment>,
    pub pipeline_steps: Vec<PipelineStep>,
    pub total_duration_ms: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

pub struct InMemoryDocumentSink {
    docs: Mutex<HashMap<String, Transcription>>,
}

impl InMemoryDocumentSink {
    pub fn new() -> Self {
        InMemoryDocumentSink { docs: Mutex::new(HashMap::new()) }
    }

    pub fn snapshot(&self, call_id: &str) -> Option<Transcription> {
        self.docs.lock().unwrap().get(call_id).cloned()
    }
}

impl Default for InMemoryDocumentSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentSink for InMemoryDocumentSink {
    async fn create_transcription(&self, call_id: &str, language: &str) -> anyhow::Result<()> {
        let mut docs = self.docs.lock().unwrap();
        docs.insert(
            call_id.to_string(),
            Transcription {
                call_id: call_id.to_string(),
                language: language.to_string(),
                segments: Vec::new(),
                pipeline_steps: Vec::new(),
                total_duration_ms: None,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn add_segment(&self, call_id: &str, segment: Segment) -> anyhow::Result<()> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(call_id)
            .ok_or_else(|| anyhow::anyhow!("no transcription document for {call_id}"))?;
        doc.segments.push(segment);
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn add_pipeline_step(&self, call_id: &str, step: PipelineStep) -> anyhow::Result<()> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(call_id)
            .ok_or_else(|| anyhow::anyhow!("no transcription document for {call_id}"))?;
        doc.pipeline_steps.push(step);
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_transcription(&self, call_id: &str, total_duration_ms: u64) -> anyhow::Result<()> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(call_id)
            .ok_or_else(|| anyhow::anyhow!("no transcription document for {call_id}"))?;
        doc.total_duration_ms = Some(total_duration_ms);
        doc.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_segment_before_create_fails() {
        let sink = InMemoryDocumentSink::new();
        let err = sink
            .add_segment(
                "call-0001",
                Segment {
                    role: "user".into(),
                    text: "hi".into(),
                    confidence: 0.0,
                    asr_provider: String::new(),
                    asr_latency_ms: 0,
                    llm_provider: String::new(),
                    llm_latency_ms: 0,
                    tts_provider: String::new(),
                    tts_latency_ms: 0,
                    timestamp: Utc::now(),
                },
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn segments_and_steps_append_in_order() {
        let sink = InMemoryDocumentSink::new();
        sink.create_transcription("call-0001", "ru").await.unwrap();
        sink.add_segment(
            "call-0001",
            Segment {
                role: "user".into(),
                text: "one".into(),
                confidence: 0.9,
                asr_provider: "yandex".into(),
                asr_latency_ms: 120,
                llm_provider: String::new(),
                llm_latency_ms: 0,
                tts_provider: String::new(),
                tts_latency_ms: 0,
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();
        sink.add_segment(
            "call-0001",
            Segment {
                role: "assistant".into(),
                text: "two".into(),
                confidence: 0.0,
                asr_provider: String::new(),
                asr_latency_ms: 0,
                llm_provider: "yandexgpt".into(),
                llm_latency_ms: 300,
                tts_provider: "zvukogram".into(),
                tts_latency_ms: 200,
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();
        sink.add_pipeline_step(
            "call-0001",
            PipelineStep { step: "asr".into(), duration_ms: 120, provider: "yandex".into(), result: "ok".into() },
        )
        .await
        .unwrap();

        let doc = sink.snapshot("call-0001").unwrap();
        assert_eq!(doc.segments.len(), 2);
        assert_eq!(doc.segments[0].text, "one");
        assert_eq!(doc.pipeline_steps.len(), 1);
    }

    #[tokio::test]
    async fn finish_transcription_sets_duration() {
        let sink = InMemoryDocumentSink::new();
        sink.create_transcription("call-0001", "ru").await.unwrap();
        sink.finish_transcription("call-0001", 4200).await.unwrap();
        assert_eq!(sink.snapshot("call-0001").unwrap().total_duration_ms, Some(4200));
    }
}
