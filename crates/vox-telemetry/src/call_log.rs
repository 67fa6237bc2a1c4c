//! JSON call-log persistence (§4.K).
//!
//! Grounded on the original platform's `core/logging/call_logger.py`:
//! one JSON file per call under the robot's `logs/` directory, named
//! from the call time, caller, and a short UUID prefix.

use std::path::Path;

use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct CallLogEntry<'a> {
    pub uuid: &'a str,
    pub caller: &'a str,
    pub call_time: &'a str,
    pub duration_sec: f64,
    pub turns: u32,
    pub barge_ins: u32,
    pub asr_details: &'a [TurnMetricLog],
    pub transcript: &'a [TranscriptLine],
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnMetricLog {
    pub turn_index: u32,
    pub asr_ms: u64,
    pub text: String,
    pub llm_ms: Option<u64>,
    pub tts_ms: Option<u64>,
    pub first_audio_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLine {
    pub role: String,
    pub text: String,
}

/// Build the log filename the same way the original does: spaces in the
/// call time become `_`, colons and dashes are removed outright (not
/// replaced), caller number, and the first 8 chars of the UUID (or `x` if
/// absent) — e.g. `"2026-07-28 09:30:00"` becomes `20260728_093000`.
fn log_filename(call_time: &str, caller: &str, uuid: &str) -> String {
    let safe_time: String = call_time.replace(' ', "_").replace([':', '-'], "");
    let uuid_prefix = if uuid.is_empty() { "x" } else { &uuid[..uuid.len().min(8)] };
    format!("{safe_time}_{caller}_{uuid_prefix}.json")
}

/// Write one call's JSON log to `{robot_dir}/logs/`. Errors are logged and
/// swallowed, matching the original's best-effort persistence.
pub async fn save_call_log(
    robot_dir: &Path,
    uuid: &str,
    caller: &str,
    call_time: &str,
    duration: f64,
    turns: u32,
    barge_ins: u32,
    turn_metrics: &[TurnMetricLog],
    transcript: &[TranscriptLine],
) {
    let logs_dir = robot_dir.join("logs");
    if let Err(e) = tokio::fs::create_dir_all(&logs_dir).await {
        error!("log dir create error: {e}");
        return;
    }

    let entry = CallLogEntry {
        uuid,
        caller,
        call_time,
        duration_sec: (duration * 10.0).round() / 10.0,
        turns,
        barge_ins,
        asr_details: turn_metrics,
        transcript,
    };

    let fname = log_filename(call_time, caller, uuid);
    let path = logs_dir.join(&fname);

    match serde_json::to_string_pretty(&entry) {
        Ok(json) => match tokio::fs::write(&path, json).await {
            Ok(()) => info!("Log saved: {fname}"),
            Err(e) => error!("Log save error: {e}"),
        },
        Err(e) => error!("Log save error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filename_strips_time_punctuation() {
        let name = log_filename("2026-07-28 09:30:00", "0991234567", "abcdef1234567890");
        assert_eq!(name, "20260728_093000_0991234567_abcdef12.json");
    }

    #[test]
    fn log_filename_falls_back_to_x_without_uuid() {
        let name = log_filename("2026-07-28 09:30:00", "unknown", "");
        assert!(name.ends_with("_x.json"));
    }

    #[tokio::test]
    async fn save_call_log_writes_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = vec![
            TranscriptLine { role: "user".into(), text: "hello".into() },
            TranscriptLine { role: "assistant".into(), text: "hi".into() },
        ];
        save_call_log(dir.path(), "uuid-abcdef12", "0991234567", "2026-07-28 09:30:00", 12.34, 2, 0, &[], &transcript).await;

        let mut entries = tokio::fs::read_dir(dir.path().join("logs")).await.unwrap();
        let file = entries.next_entry().await.unwrap().unwrap();
        let contents = tokio::fs::read_to_string(file.path()).await.unwrap();
        assert!(contents.contains("\"duration_sec\": 12.3"));
        assert!(contents.contains("hello"));
    }
}
