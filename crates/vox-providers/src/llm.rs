//! Chat completion contract (§4.C) and a Yandex GPT adapter.
//!
//! `chat_stream_sentences` is the interesting primitive: it consumes the
//! underlying token stream and emits a chunk whenever a sentence-ender
//! appears past a minimum buffered length, so downstream TTS can start
//! speaking before the model has finished the whole reply.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::trace;
use vox_core::error::{Result, VoxError};
use vox_core::types::{Role, Turn};

use crate::sse::parse_sse_stream;

const TIMEOUT: Duration = Duration::from_secs(30);

/// ASCII sentence enders plus the Armenian full stop `։`.
const SENTENCE_ENDERS: &[char] = &['.', '!', '?', '։', ':', ';'];

#[async_trait]
pub trait Llm: Send + Sync {
    async fn chat(&self, messages: &[Turn]) -> Result<String>;

    /// Default for adapters with no native streaming support: `chat()`
    /// wrapped in a single-element sequence.
    async fn chat_stream_sentences(
        &self,
        messages: &[Turn],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String>> + Send>>> {
        let text = self.chat(messages).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    /// Idempotent; releases the pooled HTTP client if one was created.
    async fn close(&self);
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn to_api_messages(messages: &[Turn]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|t| serde_json::json!({"role": role_str(&t.role), "content": t.text}))
        .collect()
}

/// Scans `buffer` for the first sentence-ender past char index 5, splits
/// there, and leaves the remainder in `buffer`. Mirrors the original's
/// `for i, ch in enumerate(buffer): if ch in enders and i > 5: ...; break`.
fn take_sentence(buffer: &mut String) -> Option<String> {
    let mut char_idx = 0usize;
    let mut split_at = None;
    for (byte_idx, ch) in buffer.char_indices() {
        if SENTENCE_ENDERS.contains(&ch) && char_idx > 5 {
            split_at = Some(byte_idx + ch.len_utf8());
            break;
        }
        char_idx += 1;
    }
    let split_at = split_at?;
    let sentence = buffer[..split_at].trim().to_string();
    let rest = buffer[split_at..].trim().to_string();
    *buffer = rest;
    if sentence.is_empty() {
        None
    } else {
        Some(sentence)
    }
}

pub struct YandexLlm {
    api_key: String,
    folder_id: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
}

impl YandexLlm {
    const URL: &'static str = "https://llm.api.cloud.yandex.net/v1/chat/completions";

    pub fn new(
        api_key: impl Into<String>,
        folder_id: impl Into<String>,
        model: Option<String>,
        temperature: f64,
        max_tokens: u32,
    ) -> Self {
        let folder_id = folder_id.into();
        let model = model.unwrap_or_else(|| format!("gpt://{folder_id}/yandexgpt/rc"));
        YandexLlm {
            api_key: api_key.into(),
            folder_id,
            model,
            temperature,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }

    async fn send(&self, messages: &[Turn]) -> Result<reqwest::Response> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": to_api_messages(messages),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": true,
        });
        let resp = self
            .client
            .post(Self::URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Project", &self.folder_id)
            .json(&payload)
            .timeout(TIMEOUT)
            .send()
            .await
            .map_err(|e| VoxError::ProviderTransport {
                provider: "yandex-llm".into(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoxError::ProviderTransport {
                provider: "yandex-llm".into(),
                message: format!("http {status}: {}", body.chars().take(200).collect::<String>()),
            });
        }
        Ok(resp)
    }
}

fn chunk_content(data: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(data).ok()?;
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

#[async_trait]
impl Llm for YandexLlm {
    async fn chat(&self, messages: &[Turn]) -> Result<String> {
        let resp = self.send(messages).await?;
        let mut sse = Box::pin(parse_sse_stream(resp));
        let mut full = String::new();
        while let Some(event) = sse.next().await {
            let event = event.map_err(|e| VoxError::ProviderTransport {
                provider: "yandex-llm".into(),
                message: e.to_string(),
            })?;
            if event.data == "[DONE]" {
                break;
            }
            if let Some(content) = chunk_content(&event.data) {
                full.push_str(&content);
            }
        }
        Ok(full.trim().to_string())
    }

    async fn chat_stream_sentences(
        &self,
        messages: &[Turn],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String>> + Send>>> {
        let resp = self.send(messages).await?;
        let sse = parse_sse_stream(resp);

        struct State {
            sse: Pin<Box<dyn Stream<Item = anyhow::Result<crate::sse::SseEvent>> + Send>>,
            buffer: String,
            done: bool,
        }
        let state = State {
            sse: Box::pin(sse),
            buffer: String::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if state.done {
                    return None;
                }
                match state.sse.next().await {
                    Some(Ok(event)) => {
                        if event.data == "[DONE]" {
                            state.done = true;
                            let rest = state.buffer.trim().to_string();
                            if !rest.is_empty() {
                                state.buffer.clear();
                                return Some((Ok(rest), state));
                            }
                            return None;
                        }
                        if let Some(content) = chunk_content(&event.data) {
                            if !content.is_empty() {
                                state.buffer.push_str(&content);
                                if let Some(sentence) = take_sentence(&mut state.buffer) {
                                    trace!(sentence_len = sentence.len(), "sentence boundary");
                                    return Some((Ok(sentence), state));
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((
                            Err(VoxError::ProviderTransport {
                                provider: "yandex-llm".into(),
                                message: e.to_string(),
                            }),
                            state,
                        ));
                    }
                    None => {
                        state.done = true;
                        let rest = state.buffer.trim().to_string();
                        if !rest.is_empty() {
                            state.buffer.clear();
                            return Some((Ok(rest), state));
                        }
                        return None;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_sentence_requires_min_length() {
        let mut buf = "Hi.".to_string();
        assert_eq!(take_sentence(&mut buf), None);
        assert_eq!(buf, "Hi.");
    }

    #[test]
    fn take_sentence_splits_past_min_length() {
        let mut buf = "Hello there.".to_string();
        let s = take_sentence(&mut buf).unwrap();
        assert_eq!(s, "Hello there.");
        assert_eq!(buf, "");
    }

    #[test]
    fn take_sentence_leaves_remainder() {
        let mut buf = "Hello there. And more".to_string();
        let s = take_sentence(&mut buf).unwrap();
        assert_eq!(s, "Hello there.");
        assert_eq!(buf, "And more");
    }

    #[test]
    fn take_sentence_recognizes_armenian_terminator() {
        let mut buf = "Barev dzez։".to_string();
        let s = take_sentence(&mut buf).unwrap();
        assert_eq!(s, "Barev dzez։");
    }

    #[test]
    fn chunk_content_extracts_delta() {
        let data = r#"{"choices":[{"delta":{"content":"hi"}}]}"#;
        assert_eq!(chunk_content(data).as_deref(), Some("hi"));
    }

    #[test]
    fn chunk_content_tolerates_missing_fields() {
        assert_eq!(chunk_content(r#"{"choices":[]}"#), None);
        assert_eq!(chunk_content("not json"), None);
    }

    #[test]
    fn default_model_derives_from_folder_id() {
        let llm = YandexLlm::new("key", "b1gfolder", None, 0.3, 80);
        assert_eq!(llm.model, "gpt://b1gfolder/yandexgpt/rc");
    }
}
