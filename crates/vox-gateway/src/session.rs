//! Shared per-call session skeleton (§4.F): boot bookkeeping, the turn
//! lock, transcript/turn-metric accumulation, and the terminator. The
//! three session variants (`pipeline_session`, `script_session`,
//! `realtime_session`) each embed a [`SessionContext`] and differ only in
//! the inner reply stage.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{error, info};

use vox_core::config::Config;
use vox_telemetry::call_log::{save_call_log, TranscriptLine, TurnMetricLog};
use vox_telemetry::notify::{format_call_report, send_telegram};
use vox_telemetry::Telemetry;

/// Outbound event for the optional browser demo WebSocket (§6). `Audio`
/// carries its header fields only; the PCM payload follows as a separate
/// binary frame, matching the wire pairing in the event table.
#[derive(Debug, Clone)]
pub enum DemoEvent {
    Ready,
    Listening,
    SpeechStart,
    Processing,
    Audio { sample_rate: u32, pcm: Vec<u8> },
    Transcript { role: &'static str, text: String },
    ResponseEnd,
}

/// Recognize the external UUID out of a first text frame: a JSON object
/// carrying a `uuid` field, or a short plain token containing a dash that
/// is not itself valid JSON. Mirrors the boot heuristics in the original
/// platform's connection handler.
pub fn sniff_uuid_from_text(s: &str) -> Option<String> {
    match serde_json::from_str::<serde_json::Value>(s) {
        Ok(v) => v.get("uuid").and_then(|u| u.as_str()).map(str::to_string),
        Err(_) => {
            let trimmed = s.trim();
            if trimmed.contains('-') && trimmed.len() < 50 {
                Some(trimmed.to_string())
            } else {
                None
            }
        }
    }
}

/// Recognize the external UUID out of a first binary frame: the leading
/// 36 bytes decode as ASCII and contain a dash.
pub fn sniff_uuid_from_binary(bytes: &[u8]) -> Option<String> {
    if bytes.len() <= 36 {
        return None;
    }
    let head = std::str::from_utf8(&bytes[..36]).ok()?;
    if head.contains('-') {
        Some(head.to_string())
    } else {
        None
    }
}

pub struct SessionContext {
    pub call_id: String,
    pub config: Arc<Config>,
    pub telemetry: Arc<Telemetry>,
    pub mode_name: &'static str,
    started_at: DateTime<Utc>,

    uuid: RwLock<Option<String>>,
    caller_number: RwLock<String>,
    is_active: AtomicBool,
    greeting_done: AtomicBool,
    turn_lock: AtomicBool,
    total_turns: AtomicU32,
    barge_in_count: AtomicU32,
    barge_in_triggered: AtomicBool,

    transcript: Mutex<Vec<TranscriptLine>>,
    turn_metrics: Mutex<Vec<TurnMetricLog>>,

    http_client: reqwest::Client,
    demo_tx: Option<mpsc::UnboundedSender<DemoEvent>>,
}

impl SessionContext {
    pub fn new(
        call_id: impl Into<String>,
        config: Arc<Config>,
        telemetry: Arc<Telemetry>,
        mode_name: &'static str,
        demo_tx: Option<mpsc::UnboundedSender<DemoEvent>>,
    ) -> Self {
        SessionContext {
            call_id: call_id.into(),
            config,
            telemetry,
            mode_name,
            started_at: Utc::now(),
            uuid: RwLock::new(None),
            caller_number: RwLock::new("unknown".to_string()),
            is_active: AtomicBool::new(true),
            greeting_done: AtomicBool::new(false),
            turn_lock: AtomicBool::new(false),
            total_turns: AtomicU32::new(0),
            barge_in_count: AtomicU32::new(0),
            barge_in_triggered: AtomicBool::new(false),
            transcript: Mutex::new(Vec::new()),
            turn_metrics: Mutex::new(Vec::new()),
            http_client: reqwest::Client::new(),
            demo_tx,
        }
    }

    pub async fn set_uuid(&self, uuid: String) {
        *self.uuid.write().await = Some(uuid);
    }

    pub async fn uuid(&self) -> Option<String> {
        self.uuid.read().await.clone()
    }

    pub async fn has_uuid(&self) -> bool {
        self.uuid.read().await.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.is_active.store(false, Ordering::SeqCst);
    }

    pub fn greeting_done(&self) -> bool {
        self.greeting_done.load(Ordering::SeqCst)
    }

    pub fn mark_greeting_done(&self) {
        self.greeting_done.store(true, Ordering::SeqCst);
    }

    /// Checked-and-set before dispatching `_process_speech`; resolves the
    /// ambiguity around overlapping utterances in favor of a guard that
    /// drops a second speech-end while the first is still in flight.
    pub fn try_acquire_turn_lock(&self) -> bool {
        self.turn_lock.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn release_turn_lock(&self) {
        self.turn_lock.store(false, Ordering::SeqCst);
    }

    pub async fn set_caller_number(&self, number: String) {
        *self.caller_number.write().await = number;
    }

    pub async fn caller_number(&self) -> String {
        self.caller_number.read().await.clone()
    }

    pub fn barge_in_count(&self) -> u32 {
        self.barge_in_count.load(Ordering::SeqCst)
    }

    pub fn record_barge_in(&self) {
        self.barge_in_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Set when a barge-in fires mid-turn; the in-flight reply loop checks
    /// this (OR'd with `!is_active()`) and breaks rather than enqueuing
    /// further TTS over the caller's new speech.
    pub fn barge_in_triggered(&self) -> bool {
        self.barge_in_triggered.load(Ordering::SeqCst)
    }

    pub fn set_barge_in_triggered(&self) {
        self.barge_in_triggered.store(true, Ordering::SeqCst);
    }

    /// Cleared at the start of each new turn so a prior barge-in doesn't
    /// bleed into the next one.
    pub fn clear_barge_in_triggered(&self) {
        self.barge_in_triggered.store(false, Ordering::SeqCst);
    }

    pub fn total_turns(&self) -> u32 {
        self.total_turns.load(Ordering::SeqCst)
    }

    pub fn record_turn(&self) -> u32 {
        self.total_turns.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn push_transcript(&self, role: impl Into<String>, text: impl Into<String>) {
        self.transcript.lock().await.push(TranscriptLine { role: role.into(), text: text.into() });
    }

    pub async fn push_turn_metric(&self, metric: TurnMetricLog) {
        self.turn_metrics.lock().await.push(metric);
    }

    pub async fn emit_demo(&self, event: DemoEvent) {
        if let Some(tx) = &self.demo_tx {
            let _ = tx.send(event);
        }
    }

    pub fn robot_name(&self) -> String {
        self.config
            .robot_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "robot".to_string())
    }

    /// Cleared `is_active`, telemetry `on_call_end`, a Telegram report when
    /// enabled and the transcript is non-empty, and a JSON call log — in
    /// that order, matching the terminator described in §4.F.
    pub async fn terminate(&self, status: &str) {
        self.deactivate();
        let duration = (Utc::now() - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let turns = self.total_turns();
        let barge_ins = self.barge_in_count();
        let uuid = self.uuid().await.unwrap_or_default();
        let caller = self.caller_number().await;
        let call_time = self.started_at.format("%Y-%m-%d %H:%M:%S").to_string();

        self.telemetry.on_call_end(&self.call_id, duration, turns, barge_ins, status).await;

        let transcript = self.transcript.lock().await.clone();
        let turn_metrics = self.turn_metrics.lock().await.clone();

        if self.config.telegram.enabled && !transcript.is_empty() {
            let asr_avg_ms = avg_asr_ms(&turn_metrics);
            let lines: Vec<String> = transcript.iter().map(|t| format!("{}: {}", t.role, t.text)).collect();
            let report = format_call_report(&caller, &uuid, &call_time, duration, turns, barge_ins, asr_avg_ms, &lines);
            if let (Some(token), Some(chat_id)) =
                (self.config.secrets.resolve_tg_token(), self.config.secrets.resolve_tg_chat_id())
            {
                send_telegram(&self.http_client, &token, &chat_id, &report).await;
            }
        }

        save_call_log(
            &self.config.robot_dir,
            &uuid,
            &caller,
            &call_time,
            duration,
            turns,
            barge_ins,
            &turn_metrics,
            &transcript,
        )
        .await;

        info!("[{}] call ended: {:.1}s, {} turns, {} barge-ins", self.call_id, duration, turns, barge_ins);
    }

    pub fn scratch_dir(&self) -> PathBuf {
        PathBuf::from("/tmp/voice_pipeline")
    }
}

fn avg_asr_ms(turn_metrics: &[TurnMetricLog]) -> u64 {
    if turn_metrics.is_empty() {
        return 0;
    }
    let total: u64 = turn_metrics.iter().map(|m| m.asr_ms).sum();
    total / turn_metrics.len() as u64
}

pub fn log_error(call_id: &str, what: &str, err: impl std::fmt::Display) {
    error!("[{call_id}] {what}: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_uuid_from_json_text() {
        let uuid = sniff_uuid_from_text(r#"{"uuid": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa"}"#);
        assert_eq!(uuid.as_deref(), Some("aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa"));
    }

    #[test]
    fn sniffs_uuid_from_plain_dash_token() {
        assert_eq!(sniff_uuid_from_text("short-uuid-1"), Some("short-uuid-1".to_string()));
    }

    #[test]
    fn rejects_json_without_uuid_field() {
        assert_eq!(sniff_uuid_from_text(r#"{"other": 1}"#), None);
    }

    #[test]
    fn rejects_plain_text_without_dash() {
        assert_eq!(sniff_uuid_from_text("hello there"), None);
    }

    #[test]
    fn sniffs_uuid_from_long_binary_frame() {
        let mut frame = b"aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa".to_vec();
        frame.extend_from_slice(&[0u8; 10]);
        assert_eq!(sniff_uuid_from_binary(&frame).as_deref(), Some("aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa"));
    }

    #[test]
    fn short_binary_frame_is_audio_not_uuid() {
        let frame = vec![0u8; 10];
        assert_eq!(sniff_uuid_from_binary(&frame), None);
    }

    #[tokio::test]
    async fn turn_lock_rejects_reentry_until_released() {
        let config = Arc::new(Config::default());
        let telemetry = test_telemetry().await;
        let ctx = SessionContext::new("call-0001", config, telemetry, "pipeline", None);
        assert!(ctx.try_acquire_turn_lock());
        assert!(!ctx.try_acquire_turn_lock());
        ctx.release_turn_lock();
        assert!(ctx.try_acquire_turn_lock());
    }

    #[tokio::test]
    async fn barge_in_triggered_clears_for_next_turn() {
        let config = Arc::new(Config::default());
        let telemetry = test_telemetry().await;
        let ctx = SessionContext::new("call-0001", config, telemetry, "pipeline", None);
        assert!(!ctx.barge_in_triggered());
        ctx.set_barge_in_triggered();
        assert!(ctx.barge_in_triggered());
        ctx.clear_barge_in_triggered();
        assert!(!ctx.barge_in_triggered());
    }

    async fn test_telemetry() -> Arc<Telemetry> {
        use vox_telemetry::document_memory::InMemoryDocumentSink;
        use vox_telemetry::kv_memory::InMemoryKvSink;
        use vox_telemetry::relational_sqlite::SqliteRelationalSink;
        let relational = Arc::new(SqliteRelationalSink::connect("sqlite::memory:").await.unwrap());
        let document = Arc::new(InMemoryDocumentSink::new());
        let kv = Arc::new(InMemoryKvSink::new());
        Arc::new(Telemetry::new(relational, document, kv))
    }
}
