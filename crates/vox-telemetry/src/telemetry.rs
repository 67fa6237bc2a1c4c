//! Telemetry fanout facade (§4.E).
//!
//! Five public operations, each writing to all three sinks independently.
//! A failure in one sink is logged and swallowed — the dialog must never
//! block on telemetry.

use std::sync::Arc;

use chrono::Utc;
use tracing::error;

use crate::sinks::{CallEnd, CallStart, DocumentSink, KvSink, PipelineStep, RelationalSink, Segment, SessionState};

pub struct Telemetry {
    relational: Arc<dyn RelationalSink>,
    document: Arc<dyn DocumentSink>,
    kv: Arc<dyn KvSink>,
}

impl Telemetry {
    pub fn new(relational: Arc<dyn RelationalSink>, document: Arc<dyn DocumentSink>, kv: Arc<dyn KvSink>) -> Self {
        Telemetry { relational, document, kv }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn on_call_start(
        &self,
        call_id: &str,
        uuid: &str,
        caller: &str,
        mode: &str,
        robot_name: &str,
        language: &str,
        scenario_id: Option<&str>,
    ) {
        let call = CallStart {
            call_id: call_id.to_string(),
            uuid: uuid.to_string(),
            caller: caller.to_string(),
            mode: mode.to_string(),
            robot_name: robot_name.to_string(),
            language: language.to_string(),
            scenario_id: scenario_id.map(str::to_string),
        };
        if let Err(e) = self.relational.insert_call(&call).await {
            error!("[{call_id}] Relational insert_call: {e}");
        }
        if let Err(e) = self.document.create_transcription(call_id, language).await {
            error!("[{call_id}] Document create_transcription: {e}");
        }
        let state = SessionState {
            mode: mode.to_string(),
            robot_name: robot_name.to_string(),
            language: language.to_string(),
            scenario_id: scenario_id.unwrap_or_default().to_string(),
            caller: caller.to_string(),
            ..Default::default()
        };
        if let Err(e) = self.kv.create_session(call_id, state).await {
            error!("[{call_id}] KV create_session: {e}");
        }
        if let Err(e) = self
            .kv
            .publish_event(
                "call_started",
                serde_json::json!({"call_id": call_id, "caller": caller, "mode": mode, "robot_name": robot_name}),
            )
            .await
        {
            error!("[{call_id}] KV publish_event(call_started): {e}");
        }
    }

    pub async fn on_user_speech(&self, call_id: &str, text: &str, confidence: f64, asr_provider: &str, asr_latency_ms: u64) {
        let segment = Segment {
            role: "user".into(),
            text: text.to_string(),
            confidence,
            asr_provider: asr_provider.to_string(),
            asr_latency_ms,
            llm_provider: String::new(),
            llm_latency_ms: 0,
            tts_provider: String::new(),
            tts_latency_ms: 0,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.document.add_segment(call_id, segment).await {
            error!("[{call_id}] Document add_segment(user): {e}");
        }
        let step = PipelineStep {
            step: "asr".into(),
            duration_ms: asr_latency_ms,
            provider: asr_provider.to_string(),
            result: if text.is_empty() { "empty".into() } else { "ok".into() },
        };
        if let Err(e) = self.document.add_pipeline_step(call_id, step).await {
            error!("[{call_id}] Document add_pipeline_step(asr): {e}");
        }
        if let Err(e) = self.kv.push_message(call_id, "user", text).await {
            error!("[{call_id}] KV push_message(user): {e}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn on_bot_response(
        &self,
        call_id: &str,
        text: &str,
        llm_provider: &str,
        llm_latency_ms: u64,
        tts_provider: Option<&str>,
        tts_latency_ms: Option<u64>,
    ) {
        let segment = Segment {
            role: "assistant".into(),
            text: text.to_string(),
            confidence: 0.0,
            asr_provider: String::new(),
            asr_latency_ms: 0,
            llm_provider: llm_provider.to_string(),
            llm_latency_ms,
            tts_provider: tts_provider.unwrap_or_default().to_string(),
            tts_latency_ms: tts_latency_ms.unwrap_or(0),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.document.add_segment(call_id, segment).await {
            error!("[{call_id}] Document add_segment(assistant): {e}");
        }
        let step = PipelineStep {
            step: "llm".into(),
            duration_ms: llm_latency_ms,
            provider: llm_provider.to_string(),
            result: "ok".into(),
        };
        if let Err(e) = self.document.add_pipeline_step(call_id, step).await {
            error!("[{call_id}] Document add_pipeline_step(llm): {e}");
        }
        if let Some(tts_provider) = tts_provider {
            let step = PipelineStep {
                step: "tts".into(),
                duration_ms: tts_latency_ms.unwrap_or(0),
                provider: tts_provider.to_string(),
                result: "ok".into(),
            };
            if let Err(e) = self.document.add_pipeline_step(call_id, step).await {
                error!("[{call_id}] Document add_pipeline_step(tts): {e}");
            }
        }
        if let Err(e) = self.kv.push_message(call_id, "assistant", text).await {
            error!("[{call_id}] KV push_message(assistant): {e}");
        }
    }

    pub async fn on_barge_in(&self, call_id: &str) {
        let step = PipelineStep { step: "barge_in".into(), duration_ms: 0, provider: "vad".into(), result: "interrupted".into() };
        if let Err(e) = self.document.add_pipeline_step(call_id, step).await {
            error!("[{call_id}] Document add_pipeline_step(barge_in): {e}");
        }
        match self.kv.get_session(call_id).await {
            Ok(Some(state)) => {
                if let Err(e) = self.kv.update_session_barge_ins(call_id, state.barge_ins + 1).await {
                    error!("[{call_id}] KV update_session_barge_ins: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => error!("[{call_id}] KV get_session(barge_in): {e}"),
        }
    }

    pub async fn on_call_end(&self, call_id: &str, duration_sec: f64, turns: u32, barge_ins: u32, status: &str) {
        let summary = CallEnd { duration_sec, turns, barge_ins, status: status.to_string() };
        if let Err(e) = self.relational.finish_call(call_id, &summary).await {
            error!("[{call_id}] Relational finish_call: {e}");
        }
        if let Err(e) = self.document.finish_transcription(call_id, (duration_sec * 1000.0) as u64).await {
            error!("[{call_id}] Document finish_transcription: {e}");
        }
        if let Err(e) = self.kv.end_session(call_id).await {
            error!("[{call_id}] KV end_session: {e}");
        }
        if let Err(e) = self
            .kv
            .publish_event("call_ended", serde_json::json!({"call_id": call_id, "duration_sec": duration_sec, "turns": turns, "status": status}))
            .await
        {
            error!("[{call_id}] KV publish_event(call_ended): {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_memory::InMemoryDocumentSink;
    use crate::kv_memory::InMemoryKvSink;
    use crate::relational_sqlite::SqliteRelationalSink;

    async fn telemetry() -> Telemetry {
        let relational = Arc::new(SqliteRelationalSink::connect("sqlite::memory:").await.unwrap());
        let document = Arc::new(InMemoryDocumentSink::new());
        let kv = Arc::new(InMemoryKvSink::new());
        Telemetry::new(relational, document, kv)
    }

    #[tokio::test]
    async fn full_call_lifecycle_touches_all_sinks() {
        let t = telemetry().await;
        t.on_call_start("call-0001", "uuid-a", "0991234567", "pipeline", "robot-1", "ru", None).await;
        t.on_user_speech("call-0001", "hello", 0.9, "yandex", 150).await;
        t.on_bot_response("call-0001", "hi there", "yandexgpt", 300, Some("zvukogram"), Some(200)).await;
        t.on_barge_in("call-0001").await;
        t.on_call_end("call-0001", 12.5, 1, 1, "completed").await;
    }

    #[tokio::test]
    async fn unknown_call_id_does_not_panic() {
        let t = telemetry().await;
        // None of these calls touch a previously-created session/document;
        // every op must log and swallow rather than unwind.
        t.on_user_speech("ghost-call", "hi", 0.0, "yandex", 0).await;
        t.on_bot_response("ghost-call", "hi", "yandexgpt", 0, None, None).await;
        t.on_barge_in("ghost-call").await;
        t.on_call_end("ghost-call", 0.0, 0, 0, "failed").await;
    }
}
