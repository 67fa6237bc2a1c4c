//! Telegram call notifications (§4.K).
//!
//! Grounded on the original platform's `core/logging/telegram.py`: a
//! best-effort POST with a 5 second timeout, and report text formatting
//! with a fixed emoji header.

use std::time::Duration;

use tracing::warn;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Send a call report to a Telegram chat. A missing token/chat id is a
/// silent no-op (Telegram delivery is an optional notification channel,
/// not a dependency of the call path); transport failures are logged and
/// swallowed.
pub async fn send_telegram(client: &reqwest::Client, token: &str, chat_id: &str, text: &str) {
    if token.is_empty() || chat_id.is_empty() {
        return;
    }
    let url = format!("https://api.telegram.org/bot{token}/sendMessage");
    let payload = serde_json::json!({"chat_id": chat_id, "text": text, "parse_mode": "HTML"});

    match client.post(&url).json(&payload).timeout(TIMEOUT).send().await {
        Ok(resp) if resp.status().is_success() => {}
        Ok(resp) => warn!("TG send failed: {}", resp.status()),
        Err(e) => warn!("TG error: {e}"),
    }
}

/// Format the call-report body sent to Telegram and/or persisted alongside
/// the JSON call log.
pub fn format_call_report(
    caller: &str,
    uuid: &str,
    call_time: &str,
    duration: f64,
    turns: u32,
    barge_ins: u32,
    asr_avg_ms: u64,
    transcript: &[String],
) -> String {
    let header = format!(
        "\u{1F4DE} <b>Call Report</b>\n\
         Tel: {caller}\n\
         Call time: {call_time}\n\
         Call uuid: {uuid}\n\
         Duration: {duration:.0}s | Turns: {turns} | Barge-ins: {barge_ins} | ASR avg: {asr_avg_ms}ms\n\n\
         \u{270D}\u{FE0F} <b>Transcript:</b>\n"
    );
    format!("{header}{}", transcript.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_telegram_noop_without_credentials() {
        let client = reqwest::Client::new();
        // Must not attempt a network call when token/chat_id are empty.
        send_telegram(&client, "", "", "report").await;
    }

    #[test]
    fn format_call_report_includes_key_fields() {
        let report = format_call_report("0991234567", "uuid-a", "2026-07-28 09:30:00", 12.5, 3, 1, 140, &["user: hi".to_string(), "assistant: hello".to_string()]);
        assert!(report.contains("Tel: 0991234567"));
        assert!(report.contains("Turns: 3"));
        assert!(report.contains("Barge-ins: 1"));
        assert!(report.contains("ASR avg: 140ms"));
        assert!(report.contains("user: hi"));
        assert!(report.contains("assistant: hello"));
    }
}
