//! ASR, LLM, and TTS provider adapters (component C).
//!
//! Three capability contracts, each with one or more concrete adapters and
//! a name-keyed registry for factory selection. The SSE parser in `sse`
//! is shared scaffolding consumed by the streaming LLM adapter.

pub mod asr;
pub mod factory;
pub mod llm;
pub mod sse;
pub mod tts;

pub use asr::Asr;
pub use factory::{build_asr, build_llm, build_tts};
pub use llm::Llm;
pub use tts::Tts;

use std::collections::HashMap;
use std::sync::Arc;

/// Name-keyed adapter table, mirroring the original platform's per-capability
/// provider dictionaries (`{"yandex": YandexASR(...), ...}`). The first
/// registered entry becomes the default.
pub struct Registry<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
    default_id: Option<String>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Registry {
            entries: HashMap::new(),
            default_id: None,
        }
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<T>) {
        let id = id.into();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        self.entries.insert(id, provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.get(id).cloned()
    }

    pub fn default(&self) -> Option<Arc<T>> {
        self.default_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn default_id(&self) -> Option<&str> {
        self.default_id.as_deref()
    }

    pub fn list_ids(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type AsrRegistry = Registry<dyn Asr>;
pub type LlmRegistry = Registry<dyn Llm>;
pub type TtsRegistry = Registry<dyn Tts>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_first_registration_becomes_default() {
        let mut reg: Registry<str> = Registry::new();
        reg.register("a", Arc::from("a-value".to_string().into_boxed_str()));
        reg.register("b", Arc::from("b-value".to_string().into_boxed_str()));
        assert_eq!(reg.default_id(), Some("a"));
        assert_eq!(&*reg.get("b").unwrap(), "b-value");
    }

    #[test]
    fn registry_list_ids_reflects_registrations() {
        let mut reg: Registry<str> = Registry::new();
        reg.register("yandex", Arc::from("x".to_string().into_boxed_str()));
        assert_eq!(reg.list_ids(), vec!["yandex"]);
    }
}
