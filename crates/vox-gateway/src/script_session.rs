//! Pre-recorded-response session: ASR -> non-streaming LLM choosing a track
//! file name -> playback of that file's PCM (§4.F "Script variant reply").
//!
//! Grounded on the original platform's `core/sessions/session_llm_script.py`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OnceCell};
use tracing::{error, info, warn};

use vox_core::types::{Track, TrackCatalog, Turn};
use vox_media::audio::load_wav;
use vox_media::playback::Playback;
use vox_media::vad::{EnergyVad, VadEvent};
use vox_providers::factory::{build_asr, build_llm};
use vox_providers::{Asr, Llm};
use vox_telemetry::call_log::TurnMetricLog;

use crate::session::{DemoEvent, SessionContext};

/// Loads `{robot_dir}/tracks/*.wav`, falling back to `{robot_dir}/*.wav`
/// directly when no `tracks/` subdirectory exists. `greeting.wav` is
/// excluded from the catalog.
pub async fn load_track_catalog(robot_dir: &std::path::Path) -> TrackCatalog {
    let tracks_dir = robot_dir.join("tracks");
    let scan_dir = if tokio::fs::metadata(&tracks_dir).await.is_ok() { tracks_dir } else { robot_dir.to_path_buf() };

    let mut catalog = TrackCatalog::new();
    let mut entries = match tokio::fs::read_dir(&scan_dir).await {
        Ok(e) => e,
        Err(e) => {
            warn!("failed to read track directory {scan_dir:?}: {e}");
            return catalog;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("wav") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else { continue };
        if name == "greeting.wav" {
            continue;
        }
        match load_wav(&path).await {
            Ok(wav) => {
                catalog.insert(name, Track { pcm: wav.pcm, sample_rate: wav.sample_rate });
            }
            Err(e) => warn!("failed to load track {path:?}: {e}"),
        }
    }
    catalog
}

fn build_system_prompt(base_prompt: &str, catalog: &TrackCatalog) -> String {
    let mut names: Vec<&str> = catalog.keys().map(String::as_str).collect();
    names.sort();
    let files_list = names.join("\n");
    let example = names.first().copied().unwrap_or("file.wav");
    format!(
        "{base_prompt}\n\nДОСТУПНЫЕ АУДИО-ФАЙЛЫ:\n{files_list}\n\nПРАВИЛО: отвечай СТРОГО одним именем файла из списка выше, например \"{example}\", и ничем более."
    )
}

pub struct ScriptSession {
    ctx: Arc<SessionContext>,
    vad: Mutex<EnergyVad>,
    messages: Mutex<Vec<Turn>>,
    tracks: TrackCatalog,
    playback: OnceCell<Playback>,
    asr: Arc<dyn Asr>,
    llm: Arc<dyn Llm>,
}

impl ScriptSession {
    pub async fn new(ctx: Arc<SessionContext>) -> anyhow::Result<Self> {
        let config = ctx.config.clone();
        let asr = build_asr(&config.asr, &config.secrets)?;
        let llm = build_llm(&config.llm, &config.secrets)?;
        let vad = EnergyVad::new(config.vad.energy_threshold, config.vad.min_speech_frames, config.vad.silence_frames, config.vad.enabled);
        let tracks = load_track_catalog(&config.robot_dir).await;
        info!("[{}] loaded {} track(s): {:?}", ctx.call_id, tracks.len(), tracks.keys().collect::<Vec<_>>());
        let system_prompt = build_system_prompt(&config.system_prompt, &tracks);

        Ok(ScriptSession {
            ctx,
            vad: Mutex::new(vad),
            messages: Mutex::new(vec![Turn::system(system_prompt)]),
            tracks,
            playback: OnceCell::new(),
            asr,
            llm,
        })
    }

    pub async fn start(self: Arc<Self>) {
        let uuid = self.ctx.uuid().await.unwrap_or_default();
        let playback = Playback::new(self.ctx.call_id.clone(), uuid.clone());

        let caller = playback.get_caller_number().await;
        self.ctx.set_caller_number(caller.clone()).await;
        self.ctx
            .telemetry
            .on_call_start(&self.ctx.call_id, &uuid, &caller, "llm_script", &self.ctx.robot_name(), &self.ctx.config.asr.language, None)
            .await;
        info!("[{}] script session ready, caller={caller}", self.ctx.call_id);

        if let Some(path) = self.ctx.config.greeting_wav.clone() {
            match load_wav(&path).await {
                Ok(wav) => {
                    playback.play_pcm(&wav.pcm, wav.sample_rate).await;
                }
                Err(e) => warn!("[{}] failed to load greeting wav: {e}", self.ctx.call_id),
            }
        }

        let _ = self.playback.set(playback);
        self.ctx.mark_greeting_done();
        self.ctx.emit_demo(DemoEvent::Ready).await;
    }

    pub async fn handle_audio(self: Arc<Self>, frame: Vec<u8>) {
        if !self.ctx.greeting_done() {
            return;
        }
        let Some(playback) = self.playback.get() else { return };

        if playback.is_playing() {
            let triggered = self.vad.lock().await.check_barge_in(&frame);
            if triggered {
                info!("[{}] barge-in detected", self.ctx.call_id);
                self.ctx.record_barge_in();
                self.ctx.set_barge_in_triggered();
                playback.stop().await;
                self.vad.lock().await.start_listening_after_barge_in(&frame);
                let ctx = self.ctx.clone();
                tokio::spawn(async move { ctx.telemetry.on_barge_in(&ctx.call_id).await });
            }
            return;
        }

        let event = self.vad.lock().await.feed(&frame);
        match event {
            VadEvent::SpeechStart => {
                self.ctx.emit_demo(DemoEvent::SpeechStart).await;
            }
            VadEvent::SpeechEnd(audio) => {
                if self.ctx.try_acquire_turn_lock() {
                    self.ctx.emit_demo(DemoEvent::Processing).await;
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.process_speech(audio).await;
                        this.ctx.release_turn_lock();
                    });
                } else {
                    warn!("[{}] dropping overlapping utterance, turn in progress", self.ctx.call_id);
                }
            }
            VadEvent::Speaking | VadEvent::Silence => {}
        }
    }

    async fn process_speech(self: Arc<Self>, audio: Vec<u8>) {
        self.ctx.clear_barge_in_triggered();
        let turn_index = self.ctx.record_turn();
        let t0 = Instant::now();

        let asr_result = match self.asr.recognize(&audio, self.ctx.config.fs_sample_rate).await {
            Ok(r) => r,
            Err(e) => {
                error!("[{}] ASR failed: {e}", self.ctx.call_id);
                return;
            }
        };
        let asr_ms = t0.elapsed().as_millis() as u64;

        if asr_result.text.trim().is_empty() {
            warn!("[{}] ASR returned empty text, skipping turn", self.ctx.call_id);
            return;
        }

        self.messages.lock().await.push(Turn::user(asr_result.text.clone()));
        self.ctx.push_transcript("user", asr_result.text.clone()).await;
        self.ctx.emit_demo(DemoEvent::Transcript { role: "user", text: asr_result.text.clone() }).await;
        {
            let ctx = self.ctx.clone();
            let text = asr_result.text.clone();
            tokio::spawn(async move { ctx.telemetry.on_user_speech(&ctx.call_id, &text, asr_result.confidence, "yandex", asr_ms).await });
        }

        let llm_t0 = Instant::now();
        let raw_answer = {
            let messages = self.messages.lock().await.clone();
            match self.llm.chat(&messages).await {
                Ok(a) => a,
                Err(e) => {
                    error!("[{}] LLM failed: {e}", self.ctx.call_id);
                    return;
                }
            }
        };
        let llm_ms = llm_t0.elapsed().as_millis() as u64;

        let chosen_file = raw_answer.trim().trim_matches('"').trim_matches('\'').trim().to_string();
        info!("[{}] chosen track: {chosen_file} ({llm_ms}ms)", self.ctx.call_id);
        self.messages.lock().await.push(Turn::assistant(chosen_file.clone()));

        {
            let ctx = self.ctx.clone();
            let text = chosen_file.clone();
            tokio::spawn(async move { ctx.telemetry.on_bot_response(&ctx.call_id, &text, "yandexgpt", llm_ms, None, None).await });
        }

        if let Some(track) = self.tracks.get(&chosen_file) {
            if let Some(playback) = self.playback.get() {
                if self.ctx.is_active() && !self.ctx.barge_in_triggered() {
                    playback.play_pcm(&track.pcm, track.sample_rate).await;
                }
            }
            self.ctx.push_transcript("assistant", format!("[{chosen_file}]")).await;
            self.ctx.emit_demo(DemoEvent::Transcript { role: "bot", text: chosen_file.clone() }).await;
        } else {
            warn!("[{}] unknown track {chosen_file}, available: {:?}", self.ctx.call_id, self.tracks.keys().collect::<Vec<_>>());
            self.ctx.push_transcript("assistant", format!("[unknown: {chosen_file}]")).await;
        }

        self.ctx.push_turn_metric(TurnMetricLog { turn_index, asr_ms, text: chosen_file, llm_ms: Some(llm_ms), tts_ms: None, first_audio_ms: None }).await;
        self.ctx.emit_demo(DemoEvent::ResponseEnd).await;
    }

    pub async fn stop(&self) {
        if let Some(playback) = self.playback.get() {
            playback.close();
        }
        self.ctx.terminate("completed").await;
        self.asr.close().await;
        self.llm.close().await;
    }
}
