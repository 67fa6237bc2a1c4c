//! Speech synthesis contract (§4.C) and ElevenLabs / Zvukogram adapters.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};
use vox_core::error::{Result, VoxError};
use vox_media::audio::wav_from_bytes;

const SINGLE_SHOT_TIMEOUT: Duration = Duration::from_secs(15);
const STREAM_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CHUNK_LEN: usize = 900;
const SPLIT_ENDERS: &[char] = &['.', '!', '?', '։'];

/// Synthesized audio: PCM16 LE mono samples at `sample_rate`.
#[derive(Debug, Clone, Default)]
pub struct TtsResult {
    pub audio: Vec<u8>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait Tts: Send + Sync {
    /// Empty/whitespace-only input yields empty audio with no network
    /// round-trip. A provider's transport failure is swallowed and logged;
    /// callers treat empty audio as "nothing to play."
    async fn synthesize(&self, text: &str) -> Result<TtsResult>;

    /// Idempotent; releases the pooled HTTP client if one was created.
    async fn close(&self);
}

/// Split `text` on sentence terminators into chunks of at most `max_len`
/// characters, packing whole sentences greedily. Grounded in the original
/// `ZvukogramTTS._split_text(text, max_len=900)`.
pub fn split_text(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut sentences = Vec::new();
    let mut temp = String::new();
    for ch in text.chars() {
        temp.push(ch);
        if SPLIT_ENDERS.contains(&ch) && temp.chars().count() > 1 {
            sentences.push(temp.trim().to_string());
            temp.clear();
        }
    }
    if !temp.trim().is_empty() {
        sentences.push(temp.trim().to_string());
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in sentences {
        let candidate_len = current.chars().count() + sentence.chars().count() + 1;
        if candidate_len <= max_len {
            current = if current.is_empty() {
                sentence
            } else {
                format!("{current} {sentence}")
            };
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current = sentence;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.is_empty() {
        vec![text.chars().take(max_len).collect()]
    } else {
        chunks
    }
}

// --- ElevenLabs ---

pub struct ElevenLabsTts {
    api_key: String,
    voice_id: String,
    model_id: String,
    stability: f64,
    similarity_boost: f64,
    style: f64,
    sample_rate: u32,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    const BASE_URL: &'static str = "https://api.elevenlabs.io/v1/text-to-speech";

    pub fn new(api_key: impl Into<String>, voice_id: impl Into<String>, proxy: Option<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| VoxError::Config(format!("invalid TTS proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| VoxError::Config(format!("failed to build TTS client: {e}")))?;
        Ok(ElevenLabsTts {
            api_key: api_key.into(),
            voice_id: voice_id.into(),
            model_id: "eleven_multilingual_v2".into(),
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            sample_rate: 16000,
            client,
        })
    }
}

#[async_trait]
impl Tts for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<TtsResult> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TtsResult { audio: Vec::new(), sample_rate: self.sample_rate });
        }

        let mut all_pcm = Vec::new();
        for chunk in split_text(text, MAX_CHUNK_LEN) {
            let url = format!("{}/{}", Self::BASE_URL, self.voice_id);
            let payload = serde_json::json!({
                "text": chunk,
                "model_id": self.model_id,
                "voice_settings": {
                    "stability": self.stability,
                    "similarity_boost": self.similarity_boost,
                    "style": self.style,
                    "use_speaker_boost": true,
                },
            });

            let result = self
                .client
                .post(&url)
                .header("xi-api-key", &self.api_key)
                .header("Accept", "audio/pcm")
                .query(&[("output_format", "pcm_16000"), ("optimize_streaming_latency", "3")])
                .json(&payload)
                .timeout(SINGLE_SHOT_TIMEOUT)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(bytes) => all_pcm.extend_from_slice(&bytes),
                    Err(e) => {
                        error!("ElevenLabs TTS read error: {e}");
                        return Ok(TtsResult { audio: Vec::new(), sample_rate: self.sample_rate });
                    }
                },
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    error!("ElevenLabs error {status}: {}", body.chars().take(200).collect::<String>());
                    return Ok(TtsResult { audio: Vec::new(), sample_rate: self.sample_rate });
                }
                Err(e) => {
                    error!("ElevenLabs TTS error: {e}");
                    return Ok(TtsResult { audio: Vec::new(), sample_rate: self.sample_rate });
                }
            }
        }

        info!("ElevenLabs: {} chars -> {} bytes", text.len(), all_pcm.len());
        Ok(TtsResult { audio: all_pcm, sample_rate: self.sample_rate })
    }

    async fn close(&self) {}
}

// --- Zvukogram ---

pub struct ZvukogramTts {
    token: String,
    email: String,
    voice: String,
    speed: f64,
    pitch: i32,
    sample_rate: u32,
    client: reqwest::Client,
}

impl ZvukogramTts {
    const URL: &'static str = "https://zvukogram.com/index.php?r=api/text";

    pub fn new(token: impl Into<String>, email: impl Into<String>, voice: impl Into<String>, sample_rate: u32) -> Self {
        ZvukogramTts {
            token: token.into(),
            email: email.into(),
            voice: voice.into(),
            speed: 1.0,
            pitch: 0,
            sample_rate,
            client: reqwest::Client::new(),
        }
    }

    async fn synthesize_chunk(&self, text: &str) -> Vec<u8> {
        let form = [
            ("token", self.token.as_str()),
            ("email", self.email.as_str()),
            ("voice", self.voice.as_str()),
            ("text", text),
            ("format", "wav"),
            ("speed", &self.speed.to_string()),
            ("pitch", &self.pitch.to_string()),
            ("sample_rate", &self.sample_rate.to_string()),
            ("channels", "1"),
        ];

        let resp = match self
            .client
            .post(Self::URL)
            .form(&form)
            .timeout(STREAM_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Zvukogram TTS error: {e}");
                return Vec::new();
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Zvukogram HTTP error {status}: {}", body.chars().take(200).collect::<String>());
            return Vec::new();
        }

        let parsed: ZvukogramResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                error!("Zvukogram response parse error: {e}");
                return Vec::new();
            }
        };

        if parsed.status != 1 {
            error!("Zvukogram API error: {}", parsed.error.unwrap_or_else(|| "unknown error".into()));
            return Vec::new();
        }
        if parsed.file.is_empty() {
            error!("Zvukogram: no file URL in response");
            return Vec::new();
        }

        info!(
            "Zvukogram: {}s audio, cost={} tokens, balance={}",
            parsed.duration, parsed.cost, parsed.balans
        );

        let audio_resp = match self.client.get(&parsed.file).timeout(SINGLE_SHOT_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Zvukogram: failed to download audio: {e}");
                return Vec::new();
            }
        };
        if !audio_resp.status().is_success() {
            error!("Zvukogram: failed to download audio: {}", audio_resp.status());
            return Vec::new();
        }
        let wav_bytes = match audio_resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                error!("Zvukogram: failed to read audio body: {e}");
                return Vec::new();
            }
        };

        match wav_from_bytes(&wav_bytes) {
            Ok(wav) => wav.pcm,
            Err(e) => {
                warn!("WAV parse error: {e}");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZvukogramResponse {
    status: i32,
    #[serde(default)]
    file: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    cost: i64,
    #[serde(default)]
    balans: String,
    #[serde(default)]
    duration: f64,
}

#[async_trait]
impl Tts for ZvukogramTts {
    async fn synthesize(&self, text: &str) -> Result<TtsResult> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TtsResult { audio: Vec::new(), sample_rate: self.sample_rate });
        }

        let mut all_pcm = Vec::new();
        for chunk in split_text(text, MAX_CHUNK_LEN) {
            let pcm = self.synthesize_chunk(&chunk).await;
            all_pcm.extend_from_slice(&pcm);
        }

        if all_pcm.is_empty() {
            return Err(VoxError::ProviderSemantic {
                provider: "zvukogram-tts".into(),
                message: "TTS returned no audio".into(),
            });
        }

        info!("Zvukogram TTS: {} chars -> {} bytes PCM @ {}Hz", text.len(), all_pcm.len(), self.sample_rate);
        Ok(TtsResult { audio: all_pcm, sample_rate: self.sample_rate })
    }

    async fn close(&self) {}
}

// --- Yandex SpeechKit ---

pub struct YandexTts {
    api_key: String,
    folder_id: String,
    voice: String,
    emotion: String,
    language: String,
    sample_rate: u32,
    client: reqwest::Client,
}

impl YandexTts {
    const URL: &'static str = "https://tts.api.cloud.yandex.net/speech/v1/tts:synthesize";

    pub fn new(api_key: impl Into<String>, folder_id: impl Into<String>, voice: impl Into<String>, language: impl Into<String>, sample_rate: u32) -> Self {
        YandexTts {
            api_key: api_key.into(),
            folder_id: folder_id.into(),
            voice: voice.into(),
            emotion: "neutral".into(),
            language: language.into(),
            sample_rate,
            client: reqwest::Client::new(),
        }
    }

    async fn synthesize_chunk(&self, text: &str) -> Vec<u8> {
        let form = [
            ("text", text),
            ("lang", self.language.as_str()),
            ("voice", self.voice.as_str()),
            ("emotion", self.emotion.as_str()),
            ("folderId", self.folder_id.as_str()),
            ("format", "lpcm"),
            ("sampleRateHertz", &self.sample_rate.to_string()),
        ];

        let resp = match self
            .client
            .post(Self::URL)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .form(&form)
            .timeout(SINGLE_SHOT_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Yandex TTS error: {e}");
                return Vec::new();
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Yandex TTS error {status}: {}", body.chars().take(200).collect::<String>());
            return Vec::new();
        }

        match resp.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                error!("Yandex TTS read error: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Tts for YandexTts {
    async fn synthesize(&self, text: &str) -> Result<TtsResult> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TtsResult { audio: Vec::new(), sample_rate: self.sample_rate });
        }

        let mut all_pcm = Vec::new();
        for chunk in split_text(text, MAX_CHUNK_LEN) {
            let pcm = self.synthesize_chunk(&chunk).await;
            all_pcm.extend_from_slice(&pcm);
        }

        info!("Yandex TTS: {} chars -> {} bytes PCM @ {}Hz", text.len(), all_pcm.len(), self.sample_rate);
        Ok(TtsResult { audio: all_pcm, sample_rate: self.sample_rate })
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_text_keeps_short_text_whole() {
        let chunks = split_text("short text", 900);
        assert_eq!(chunks, vec!["short text".to_string()]);
    }

    #[test]
    fn split_text_packs_sentences_under_limit() {
        let text = "One. Two. Three.";
        let chunks = split_text(text, 9);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9 || c.split_whitespace().count() == 1));
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn split_text_never_drops_trailing_fragment() {
        let text = "Sentence one. Sentence two without terminator";
        let chunks = split_text(text, 20);
        let joined: String = chunks.join(" ");
        assert!(joined.contains("without terminator"));
    }

    #[test]
    fn split_text_never_empty_for_nonempty_input() {
        let chunks = split_text(&"a".repeat(2000), 900);
        assert!(!chunks.is_empty());
    }
}
