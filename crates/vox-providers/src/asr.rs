//! Speech recognition contract (§4.C) and a Yandex SpeechKit adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use vox_core::error::{Result, VoxError};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of recognizing one utterance of PCM16 LE mono audio.
#[derive(Debug, Clone, Default)]
pub struct AsrResult {
    pub text: String,
    pub confidence: f64,
    pub language: String,
}

#[async_trait]
pub trait Asr: Send + Sync {
    /// An empty `text` on success means "nothing to transcribe," not a fault.
    async fn recognize(&self, pcm: &[u8], sample_rate: u32) -> Result<AsrResult>;

    /// Idempotent; releases the pooled HTTP client if one was created.
    async fn close(&self);
}

/// Yandex SpeechKit recognizer — raw LPCM body, no multipart envelope.
pub struct YandexAsr {
    api_key: String,
    folder_id: String,
    language: String,
    client: reqwest::Client,
}

impl YandexAsr {
    const URL: &'static str = "https://stt.api.cloud.yandex.net/speech/v1/stt:recognize";

    pub fn new(api_key: impl Into<String>, folder_id: impl Into<String>, language: impl Into<String>) -> Self {
        YandexAsr {
            api_key: api_key.into(),
            folder_id: folder_id.into(),
            language: language.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SttResponse {
    #[serde(default)]
    result: String,
}

#[async_trait]
impl Asr for YandexAsr {
    async fn recognize(&self, pcm: &[u8], sample_rate: u32) -> Result<AsrResult> {
        let rate = sample_rate.to_string();
        let resp = self
            .client
            .post(Self::URL)
            .query(&[
                ("topic", "general"),
                ("lang", self.language.as_str()),
                ("folderId", self.folder_id.as_str()),
                ("format", "lpcm"),
                ("sampleRateHertz", rate.as_str()),
            ])
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .body(pcm.to_vec())
            .timeout(TIMEOUT)
            .send()
            .await
            .map_err(|e| VoxError::ProviderTransport {
                provider: "yandex-asr".into(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoxError::ProviderTransport {
                provider: "yandex-asr".into(),
                message: format!("http {status}: {}", truncate(&body, 200)),
            });
        }

        let parsed: SttResponse = resp.json().await.map_err(|e| VoxError::ProviderSemantic {
            provider: "yandex-asr".into(),
            message: e.to_string(),
        })?;

        Ok(AsrResult {
            text: parsed.result,
            confidence: 1.0,
            language: self.language.clone(),
        })
    }

    async fn close(&self) {}
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asr_result_default_is_empty() {
        let r = AsrResult::default();
        assert_eq!(r.text, "");
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn truncate_respects_char_boundary() {
        assert_eq!(truncate("hello world", 5), "hello");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
