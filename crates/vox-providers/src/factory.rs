//! Factory selection of ASR/LLM/TTS adapters by provider name (§9 Design
//! Notes: "Factory selection ... maps to a tagged variant or an interface
//! table keyed on the provider name"). Grounded on the original platform's
//! flat `get_asr`/`get_llm`/`get_tts` dispatch functions.

use std::sync::Arc;

use vox_core::config::{AsrConfig, LlmConfig, Secrets, TtsConfig};
use vox_core::error::{Result, VoxError};

use crate::asr::{Asr, YandexAsr};
use crate::llm::{Llm, YandexLlm};
use crate::tts::{ElevenLabsTts, Tts, YandexTts, ZvukogramTts};

/// Build the configured ASR adapter. Only the `yandex` provider is
/// implemented; `triton_armenian` names a local GPU model server with no
/// HTTP-shaped counterpart in this adapter set.
pub fn build_asr(cfg: &AsrConfig, secrets: &Secrets) -> Result<Arc<dyn Asr>> {
    match cfg.provider.as_str() {
        "yandex" => {
            let api_key = secrets.resolve_asr_api_key().ok_or_else(|| {
                VoxError::Config("asr provider 'yandex' requires an API key".into())
            })?;
            let folder_id = secrets.resolve_llm_folder_id().ok_or_else(|| {
                VoxError::Config("asr provider 'yandex' requires a folder id".into())
            })?;
            Ok(Arc::new(YandexAsr::new(api_key, folder_id, cfg.language.clone())))
        }
        other => Err(VoxError::Config(format!(
            "unknown ASR provider: {other}. Available: yandex"
        ))),
    }
}

/// Build the configured LLM adapter.
pub fn build_llm(cfg: &LlmConfig, secrets: &Secrets) -> Result<Arc<dyn Llm>> {
    match cfg.provider.as_str() {
        "yandex" => {
            let api_key = secrets
                .resolve_llm_api_key()
                .ok_or_else(|| VoxError::Config("llm provider 'yandex' requires an API key".into()))?;
            let folder_id = secrets
                .resolve_llm_folder_id()
                .ok_or_else(|| VoxError::Config("llm provider 'yandex' requires a folder id".into()))?;
            Ok(Arc::new(YandexLlm::new(api_key, folder_id, cfg.model.clone(), cfg.temperature, cfg.max_tokens)))
        }
        other => Err(VoxError::Config(format!("unknown LLM provider: {other}. Available: yandex"))),
    }
}

/// Build the configured TTS adapter.
pub fn build_tts(cfg: &TtsConfig, secrets: &Secrets) -> Result<Arc<dyn Tts>> {
    match cfg.provider.as_str() {
        "yandex" => {
            let api_key = secrets
                .resolve_tts_api_key()
                .ok_or_else(|| VoxError::Config("tts provider 'yandex' requires an API key".into()))?;
            let folder_id = secrets
                .resolve_llm_folder_id()
                .ok_or_else(|| VoxError::Config("tts provider 'yandex' requires a folder id".into()))?;
            Ok(Arc::new(YandexTts::new(api_key, folder_id, cfg.voice.clone(), cfg.language.clone(), cfg.sample_rate)))
        }
        "zvukogram" => {
            let token = secrets
                .resolve_tts_token()
                .ok_or_else(|| VoxError::Config("tts provider 'zvukogram' requires a token".into()))?;
            let email = secrets
                .resolve_tts_email()
                .ok_or_else(|| VoxError::Config("tts provider 'zvukogram' requires an email".into()))?;
            Ok(Arc::new(ZvukogramTts::new(token, email, cfg.voice.clone(), cfg.sample_rate)))
        }
        "elevenlabs" => {
            let api_key = secrets
                .resolve_tts_api_key()
                .ok_or_else(|| VoxError::Config("tts provider 'elevenlabs' requires an API key".into()))?;
            let proxy = if cfg.proxy.is_empty() { None } else { Some(cfg.proxy.clone()) };
            Ok(Arc::new(ElevenLabsTts::new(api_key, cfg.voice_id.clone(), proxy)?))
        }
        other => Err(VoxError::Config(format!(
            "unknown TTS provider: {other}. Available: yandex, zvukogram, elevenlabs"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_asr_rejects_unknown_provider() {
        let cfg = AsrConfig { provider: "triton_armenian".into(), ..Default::default() };
        let secrets = Secrets::default();
        assert!(build_asr(&cfg, &secrets).is_err());
    }

    #[test]
    fn build_llm_requires_api_key() {
        let cfg = LlmConfig::default();
        let secrets = Secrets::default();
        assert!(build_llm(&cfg, &secrets).is_err());
    }

    #[test]
    fn build_tts_rejects_unknown_provider() {
        let cfg = TtsConfig { provider: "acme".into(), ..Default::default() };
        let secrets = Secrets::default();
        assert!(build_tts(&cfg, &secrets).is_err());
    }

    #[test]
    fn build_tts_yandex_requires_api_key() {
        let cfg = TtsConfig { provider: "yandex".into(), ..Default::default() };
        let secrets = Secrets::default();
        assert!(build_tts(&cfg, &secrets).is_err());
    }
}
