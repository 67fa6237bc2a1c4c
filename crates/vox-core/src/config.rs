//! Layered configuration loading and validation for a single robot.
//!
//! Priority, lowest first: built-in [`Config::default`], then a per-robot
//! `config.json`/`config.json5`, then environment files (robot-local
//! overrides platform-root). Secrets never live in the merged structured
//! tree; they are resolved on demand through [`Secrets`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Pipeline,
    Realtime,
    LlmScript,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Pipeline
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: SessionMode,

    #[serde(default = "default_ws_host")]
    pub ws_host: String,

    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    #[serde(default = "default_fs_sample_rate")]
    pub fs_sample_rate: u32,

    #[serde(default)]
    pub vad: VadConfig,

    #[serde(default)]
    pub asr: AsrConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime: Option<RealtimeConfig>,

    #[serde(default)]
    pub greeting_text: String,

    /// Populated at load time from `<robot_dir>/greeting.wav`, not part of config.json.
    #[serde(skip)]
    pub greeting_wav: Option<PathBuf>,

    /// Loaded at load time from `<robot_dir>/prompt.txt`, not part of config.json.
    #[serde(skip)]
    pub system_prompt: String,

    #[serde(skip)]
    pub robot_dir: PathBuf,

    #[serde(skip)]
    pub platform_root: PathBuf,

    #[serde(skip)]
    pub secrets: Secrets,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: SessionMode::default(),
            ws_host: default_ws_host(),
            ws_port: default_ws_port(),
            fs_sample_rate: default_fs_sample_rate(),
            vad: VadConfig::default(),
            asr: AsrConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            telegram: TelegramConfig::default(),
            realtime: None,
            greeting_text: String::new(),
            greeting_wav: None,
            system_prompt: default_system_prompt(),
            robot_dir: PathBuf::new(),
            platform_root: PathBuf::new(),
            secrets: Secrets::default(),
        }
    }
}

fn default_ws_host() -> String {
    "0.0.0.0".into()
}

fn default_ws_port() -> u16 {
    5200
}

fn default_fs_sample_rate() -> u32 {
    8000
}

fn default_system_prompt() -> String {
    "You are a helpful voice assistant.".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f64,
    #[serde(default = "default_silence_frames")]
    pub silence_frames: u32,
    #[serde(default = "default_min_speech_frames")]
    pub min_speech_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        VadConfig {
            enabled: true,
            energy_threshold: default_energy_threshold(),
            silence_frames: default_silence_frames(),
            min_speech_frames: default_min_speech_frames(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_energy_threshold() -> f64 {
    200.0
}
fn default_silence_frames() -> u32 {
    25
}
fn default_min_speech_frames() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    #[serde(default = "default_asr_provider")]
    pub provider: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub server_url: String,
    #[serde(default = "default_asr_model")]
    pub model_name: String,
}

impl Default for AsrConfig {
    fn default() -> Self {
        AsrConfig {
            provider: default_asr_provider(),
            language: default_language(),
            server_url: String::new(),
            model_name: default_asr_model(),
        }
    }
}

fn default_asr_provider() -> String {
    "yandex".into()
}
fn default_language() -> String {
    "ru-RU".into()
}
fn default_asr_model() -> String {
    "streaming_asr".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: default_llm_provider(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_llm_provider() -> String {
    "yandex".into()
}
fn default_temperature() -> f64 {
    0.5
}
fn default_max_tokens() -> u32 {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub pitch: i32,
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_tts_model_id")]
    pub model_id: String,
    #[serde(default = "default_stability")]
    pub stability: f64,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f64,
    #[serde(default)]
    pub proxy: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        TtsConfig {
            provider: default_tts_provider(),
            voice: default_tts_voice(),
            language: default_language(),
            speed: default_speed(),
            pitch: 0,
            sample_rate: default_tts_sample_rate(),
            voice_id: String::new(),
            model_id: default_tts_model_id(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            proxy: String::new(),
        }
    }
}

fn default_tts_provider() -> String {
    "yandex".into()
}
fn default_tts_voice() -> String {
    "alena".into()
}
fn default_speed() -> f64 {
    1.0
}
fn default_tts_sample_rate() -> u32 {
    48000
}
fn default_tts_model_id() -> String {
    "eleven_multilingual_v2".into()
}
fn default_stability() -> f64 {
    0.5
}
fn default_similarity_boost() -> f64 {
    0.75
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub url: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default = "default_realtime_vad_threshold")]
    pub vad_threshold: f64,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u64,
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u64,
}

fn default_realtime_vad_threshold() -> f64 {
    0.5
}
fn default_silence_duration_ms() -> u64 {
    500
}
fn default_prefix_padding_ms() -> u64 {
    300
}

/// Secrets kept out of the structured config tree; each resolvable as a
/// direct value or via an environment variable reference.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub asr_api_key: Option<String>,
    pub asr_api_key_env: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_api_key_env: Option<String>,
    pub tts_api_key: Option<String>,
    pub tts_api_key_env: Option<String>,
    pub tts_token: Option<String>,
    pub tts_token_env: Option<String>,
    pub tts_email: Option<String>,
    pub tts_email_env: Option<String>,
    pub tg_token: Option<String>,
    pub tg_token_env: Option<String>,
    pub tg_chat_id: Option<String>,
    pub tg_chat_id_env: Option<String>,
    pub realtime_url: Option<String>,
    pub realtime_url_env: Option<String>,
    pub llm_folder_id: Option<String>,
    pub llm_folder_id_env: Option<String>,
}

impl Secrets {
    pub fn resolve_asr_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.asr_api_key, &self.asr_api_key_env)
    }
    pub fn resolve_llm_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.llm_api_key, &self.llm_api_key_env)
    }
    pub fn resolve_tts_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.tts_api_key, &self.tts_api_key_env)
    }
    pub fn resolve_tts_token(&self) -> Option<String> {
        resolve_secret_field(&self.tts_token, &self.tts_token_env)
    }
    pub fn resolve_tts_email(&self) -> Option<String> {
        resolve_secret_field(&self.tts_email, &self.tts_email_env)
    }
    pub fn resolve_tg_token(&self) -> Option<String> {
        resolve_secret_field(&self.tg_token, &self.tg_token_env)
    }
    pub fn resolve_tg_chat_id(&self) -> Option<String> {
        resolve_secret_field(&self.tg_chat_id, &self.tg_chat_id_env)
    }
    pub fn resolve_realtime_url(&self) -> Option<String> {
        resolve_secret_field(&self.realtime_url, &self.realtime_url_env)
    }
    pub fn resolve_llm_folder_id(&self) -> Option<String> {
        resolve_secret_field(&self.llm_folder_id, &self.llm_folder_id_env)
    }

    /// Populate secrets by looking each field up in the process environment,
    /// matching the original platform's flat `.env`-driven secret loading.
    fn from_env() -> Self {
        fn env_opt(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }
        Secrets {
            asr_api_key: env_opt("YANDEX_API_KEY"),
            asr_api_key_env: None,
            llm_api_key: env_opt("YANDEX_API_KEY"),
            llm_api_key_env: None,
            tts_api_key: env_opt("TTS_API_KEY").or_else(|| env_opt("YANDEX_API_KEY")),
            tts_api_key_env: None,
            tts_token: env_opt("TTS_TOKEN"),
            tts_token_env: None,
            tts_email: env_opt("TTS_EMAIL"),
            tts_email_env: None,
            tg_token: env_opt("TG_TOKEN"),
            tg_token_env: None,
            tg_chat_id: env_opt("TG_CHAT_ID"),
            tg_chat_id_env: None,
            realtime_url: env_opt("YANDEX_REALTIME_URL"),
            realtime_url_env: None,
            llm_folder_id: env_opt("YANDEX_FOLDER_ID"),
            llm_folder_id_env: None,
        }
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load the full layered configuration for one robot directory.
    ///
    /// 1. Built-in defaults.
    /// 2. `<robot_dir>/config.json` (json5-tolerant: comments, trailing commas).
    /// 3. `.env` files: robot-local first, platform-root fills any gaps.
    /// 4. Secrets resolved from the environment.
    /// 5. `prompt.txt` and `greeting.wav` sidecar files.
    pub fn load(robot_dir: &Path) -> Result<Self> {
        let robot_dir = robot_dir
            .canonicalize()
            .unwrap_or_else(|_| robot_dir.to_path_buf());

        let platform_root = find_platform_root(&robot_dir);

        load_env_file(&robot_dir.join(".env"));
        load_env_file(&platform_root.join(".env"));

        let config_file = robot_dir.join("config.json");
        let mut config = if config_file.exists() {
            let raw = std::fs::read_to_string(&config_file).map_err(VoxError::Io)?;
            let substituted = substitute_env_vars(&raw);
            json5::from_str(&substituted).map_err(|e| VoxError::Config(e.to_string()))?
        } else {
            Config::default()
        };

        config.robot_dir = robot_dir.clone();
        config.platform_root = platform_root;
        config.secrets = Secrets::from_env();

        if config.llm.model.is_none() {
            if let Some(folder_id) = config.secrets.resolve_llm_folder_id() {
                config.llm.model = Some(format!("gpt://{folder_id}/yandexgpt/rc"));
            }
        }

        let prompt_file = robot_dir.join("prompt.txt");
        config.system_prompt = if prompt_file.exists() {
            std::fs::read_to_string(&prompt_file)
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| default_system_prompt())
        } else {
            default_system_prompt()
        };

        let greeting_wav = robot_dir.join("greeting.wav");
        config.greeting_wav = greeting_wav.exists().then_some(greeting_wav);

        Ok(config)
    }

    /// Validate config, returning (warnings, errors). Never fails the call;
    /// the server starts with defaults for anything unset and logs loudly instead.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.asr.provider != "whisper_local" && self.secrets.resolve_asr_api_key().is_none() {
            warnings.push(format!(
                "ASR provider '{}' has no API key configured",
                self.asr.provider
            ));
        }
        if self.secrets.resolve_llm_api_key().is_none() {
            warnings.push(format!(
                "LLM provider '{}' has no API key configured",
                self.llm.provider
            ));
        }
        if self.tts.provider != "none" && self.secrets.resolve_tts_api_key().is_none() {
            warnings.push(format!(
                "TTS provider '{}' has no API key configured",
                self.tts.provider
            ));
        }

        if self.telegram.enabled
            && (self.secrets.resolve_tg_token().is_none() || self.secrets.resolve_tg_chat_id().is_none())
        {
            warnings.push("telegram.enabled is true but TG_TOKEN/TG_CHAT_ID are not set".into());
        }

        if matches!(self.mode, SessionMode::Realtime) {
            if self.realtime.is_none() && self.secrets.resolve_realtime_url().is_none() {
                errors.push("mode is 'realtime' but no realtime.url or YANDEX_REALTIME_URL secret is configured".into());
            }
        }

        if self.ws_port == 0 {
            errors.push("ws_port cannot be 0".into());
        }

        if self.greeting_text.is_empty() && self.greeting_wav.is_none() {
            warnings.push("no greeting_text or greeting.wav configured; the session will skip greeting playback".into());
        }

        (warnings, errors)
    }

    /// Get a config value by dotted path (e.g. "vad.energy_threshold").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn find_platform_root(robot_dir: &Path) -> PathBuf {
    let mut current = robot_dir.to_path_buf();
    for _ in 0..5 {
        if current.join("core").is_dir() {
            return current;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    robot_dir.to_path_buf()
}

fn load_env_file(path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if std::env::var(key).is_err() {
            // SAFETY: called once during config load, before any worker tasks spawn.
            unsafe { std::env::set_var(key, value) };
        }
    }
}

/// Base directory for this server's own runtime state: `~/.vox_dialog/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vox_dialog")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_substitution() {
        unsafe { std::env::set_var("TEST_VOX_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_VOX_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_VOX_KEY") };
    }

    #[test]
    fn env_var_missing_substitutes_empty() {
        let input = r#"{"key": "${NONEXISTENT_VOX_VAR}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn defaults_match_original_vad_constants() {
        let config = Config::default();
        assert_eq!(config.vad.energy_threshold, 200.0);
        assert_eq!(config.vad.silence_frames, 25);
        assert_eq!(config.vad.min_speech_frames, 5);
        assert!(config.vad.enabled);
    }

    #[test]
    fn resolve_secret_field_prefers_direct_value() {
        unsafe { std::env::set_var("TEST_VOX_SECRET", "from-env") };
        let direct = Some("direct".to_string());
        let env = Some("TEST_VOX_SECRET".to_string());
        assert_eq!(resolve_secret_field(&direct, &env), Some("direct".into()));
        assert_eq!(resolve_secret_field(&None, &env), Some("from-env".into()));
        unsafe { std::env::remove_var("TEST_VOX_SECRET") };
    }

    #[test]
    fn validate_warns_on_missing_telegram_secrets() {
        let mut config = Config::default();
        config.telegram.enabled = true;
        let (warnings, _errors) = config.validate();
        assert!(warnings.iter().any(|w| w.contains("telegram")));
    }

    #[test]
    fn validate_errors_on_zero_port() {
        let mut config = Config::default();
        config.ws_port = 0;
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("ws_port")));
    }

    #[test]
    fn load_missing_config_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.ws_port, 5200);
        assert_eq!(config.system_prompt, default_system_prompt());
    }

    #[test]
    fn load_reads_config_json_and_prompt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "ws_port": 6000, "vad": { "energy_threshold": 300 } }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("prompt.txt"), "  Be concise.  ").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.ws_port, 6000);
        assert_eq!(config.vad.energy_threshold, 300.0);
        assert_eq!(config.system_prompt, "Be concise.");
    }
}
