//! Full pipeline session: local ASR -> streamed LLM -> incremental TTS ->
//! playback, with VAD-driven barge-in (§4.F "Pipeline variant reply").
//!
//! Grounded on the original platform's `core/sessions/session_pipeline.py`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OnceCell};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use vox_core::types::Turn;
use vox_media::audio::load_wav;
use vox_media::playback::Playback;
use vox_media::vad::{EnergyVad, VadEvent};
use vox_providers::factory::{build_asr, build_llm, build_tts};
use vox_providers::{Asr, Llm, Tts};
use vox_telemetry::call_log::TurnMetricLog;

use crate::session::{DemoEvent, SessionContext};

pub struct PipelineSession {
    ctx: Arc<SessionContext>,
    vad: Mutex<EnergyVad>,
    messages: Mutex<Vec<Turn>>,
    playback: OnceCell<Playback>,
    asr: Arc<dyn Asr>,
    llm: Arc<dyn Llm>,
    tts: Arc<dyn Tts>,
}

impl PipelineSession {
    pub fn new(ctx: Arc<SessionContext>) -> anyhow::Result<Self> {
        let config = ctx.config.clone();
        let asr = build_asr(&config.asr, &config.secrets)?;
        let llm = build_llm(&config.llm, &config.secrets)?;
        let tts = build_tts(&config.tts, &config.secrets)?;
        let vad = EnergyVad::new(config.vad.energy_threshold, config.vad.min_speech_frames, config.vad.silence_frames, config.vad.enabled);
        Ok(PipelineSession {
            ctx,
            vad: Mutex::new(vad),
            messages: Mutex::new(vec![Turn::system(config.system_prompt.clone())]),
            playback: OnceCell::new(),
            asr,
            llm,
            tts,
        })
    }

    /// Boot: bind the playback controller to the now-known UUID, query the
    /// caller number, notify telemetry, play the greeting.
    pub async fn start(self: Arc<Self>) {
        let uuid = self.ctx.uuid().await.unwrap_or_default();
        let playback = Playback::new(self.ctx.call_id.clone(), uuid.clone());

        let caller = playback.get_caller_number().await;
        self.ctx.set_caller_number(caller.clone()).await;

        self.ctx
            .telemetry
            .on_call_start(&self.ctx.call_id, &uuid, &caller, "pipeline", &self.ctx.robot_name(), &self.ctx.config.asr.language, None)
            .await;
        info!("[{}] pipeline session ready, caller={caller}", self.ctx.call_id);

        if let Some(path) = self.ctx.config.greeting_wav.clone() {
            match load_wav(&path).await {
                Ok(wav) => {
                    if !self.ctx.config.greeting_text.is_empty() {
                        let text = self.ctx.config.greeting_text.clone();
                        self.messages.lock().await.push(Turn::assistant(text.clone()));
                        self.ctx.push_transcript("assistant", text).await;
                    }
                    playback.play_pcm(&wav.pcm, wav.sample_rate).await;
                }
                Err(e) => warn!("[{}] failed to load greeting wav: {e}", self.ctx.call_id),
            }
        } else if !self.ctx.config.greeting_text.is_empty() {
            let text = self.ctx.config.greeting_text.clone();
            self.messages.lock().await.push(Turn::assistant(text.clone()));
            self.ctx.push_transcript("assistant", text.clone()).await;
            self.speak_text(&playback, &text).await;
        }

        let _ = self.playback.set(playback);
        self.ctx.mark_greeting_done();
        self.ctx.emit_demo(DemoEvent::Ready).await;
    }

    async fn speak_text(&self, playback: &Playback, text: &str) {
        match self.tts.synthesize(text).await {
            Ok(result) if !result.audio.is_empty() => {
                playback.play_pcm(&result.audio, result.sample_rate).await;
            }
            Ok(_) => {}
            Err(e) => error!("[{}] greeting TTS failed: {e}", self.ctx.call_id),
        }
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
                info!("[{}] speech start", self.ctx.call_id);
                self.ctx.emit_demo(DemoEvent::SpeechStart).await;
            }
            VadEvent::SpeechEnd(audio) => {
                info!("[{}] speech end, {} bytes", self.ctx.call_id, audio.len());
                if self.ctx.try_acquire_turn_lock() {
                    self.ctx.emit_demo(DemoEvent::Processing).await;
                    let this = self.clone();
                    // Detached so frame ingress keeps progressing while the
                    // reply is produced (§5).
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

        info!("[{}] user: {} ({asr_ms}ms)", self.ctx.call_id, asr_result.text);
        self.messages.lock().await.push(Turn::user(asr_result.text.clone()));
        self.ctx.push_transcript("user", asr_result.text.clone()).await;
        self.ctx.emit_demo(DemoEvent::Transcript { role: "user", text: asr_result.text.clone() }).await;
        {
            let ctx = self.ctx.clone();
            let text = asr_result.text.clone();
            tokio::spawn(async move { ctx.telemetry.on_user_speech(&ctx.call_id, &text, asr_result.confidence, "yandex", asr_ms).await });
        }

        self.run_reply(turn_index, asr_ms).await;
    }

    async fn run_reply(&self, turn_index: u32, asr_ms: u64) {
        let messages = self.messages.lock().await.clone();
        let mut stream = match self.llm.chat_stream_sentences(&messages).await {
            Ok(s) => s,
            Err(e) => {
                error!("[{}] LLM failed: {e}", self.ctx.call_id);
                return;
            }
        };
        let Some(playback) = self.playback.get() else { return };

        let llm_t0 = Instant::now();
        let mut full_response = String::new();
        let mut first_audio_ms: Option<u64> = None;
        let mut last_tts_ms: Option<u64> = None;

        while let Some(sentence) = stream.next().await {
            if !self.ctx.is_active() || self.ctx.barge_in_triggered() {
                break;
            }
            let sentence = match sentence {
                Ok(s) => s,
                Err(e) => {
                    error!("[{}] LLM stream error: {e}", self.ctx.call_id);
                    break;
                }
            };
            info!("[{}] sentence: {sentence} ({}ms)", self.ctx.call_id, llm_t0.elapsed().as_millis());
            full_response.push_str(&sentence);
            full_response.push(' ');

            let tts_t0 = Instant::now();
            let tts_result = match self.tts.synthesize(&sentence).await {
                Ok(r) => r,
                Err(e) => {
                    error!("[{}] TTS failed: {e}", self.ctx.call_id);
                    continue;
                }
            };
            last_tts_ms = Some(tts_t0.elapsed().as_millis() as u64);

            if !tts_result.audio.is_empty() && self.ctx.is_active() && !self.ctx.barge_in_triggered() {
                if first_audio_ms.is_none() {
                    first_audio_ms = Some(llm_t0.elapsed().as_millis() as u64);
                }
                self.ctx.emit_demo(DemoEvent::Audio { sample_rate: tts_result.sample_rate, pcm: tts_result.audio.clone() }).await;
                playback.play_pcm(&tts_result.audio, tts_result.sample_rate).await;
            }
        }

        let full_response = full_response.trim().to_string();
        if !full_response.is_empty() {
            let llm_ms = llm_t0.elapsed().as_millis() as u64;
            self.messages.lock().await.push(Turn::assistant(full_response.clone()));
            self.ctx.push_transcript("assistant", full_response.clone()).await;
            self.ctx.emit_demo(DemoEvent::Transcript { role: "bot", text: full_response.clone() }).await;
            self.ctx
                .push_turn_metric(TurnMetricLog { turn_index, asr_ms, text: full_response.clone(), llm_ms: Some(llm_ms), tts_ms: last_tts_ms, first_audio_ms })
                .await;

            let ctx = self.ctx.clone();
            let text = full_response.clone();
            tokio::spawn(async move { ctx.telemetry.on_bot_response(&ctx.call_id, &text, "yandexgpt", llm_ms, Some("tts"), last_tts_ms).await });
        }
        self.ctx.emit_demo(DemoEvent::ResponseEnd).await;
    }

    pub async fn stop(&self) {
        if let Some(playback) = self.playback.get() {
            playback.close();
        }
        self.ctx.terminate("completed").await;
        self.asr.close().await;
        self.llm.close().await;
        self.tts.close().await;
    }
}
