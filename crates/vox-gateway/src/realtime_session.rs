//! Full-duplex session: forwards PBX audio to an external realtime endpoint
//! and plays back whatever it streams out (§4.F "Full-duplex variant").
//!
//! Grounded on the original platform's `core/sessions/session_realtime.py`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use vox_media::playback::Playback;
use vox_telemetry::call_log::TurnMetricLog;

use crate::session::{DemoEvent, SessionContext};

/// PCM16 sample rate the remote endpoint speaks, matching the telephony side
/// before the shared playback controller downsamples to 8 kHz on its own.
const REALTIME_SAMPLE_RATE: u32 = 24000;

pub struct RealtimeSession {
    ctx: Arc<SessionContext>,
    playback: OnceCell<Playback>,
    outbound: mpsc::UnboundedSender<WsMessage>,
    response_pcm: Mutex<Vec<u8>>,
    response_text: Mutex<String>,
    turn_t0: Mutex<Instant>,
    connected: AtomicBool,
}

impl RealtimeSession {
    /// Dials the remote endpoint and spawns the event-reader loop. The
    /// returned session is usable immediately; `start()` still gates
    /// playback on the caller's UUID being known, as with the other variants.
    pub async fn connect(ctx: Arc<SessionContext>) -> anyhow::Result<Arc<Self>> {
        let realtime_cfg = ctx
            .config
            .realtime
            .clone()
            .ok_or_else(|| anyhow::anyhow!("session mode is realtime but no [realtime] config section is set"))?;
        let url = ctx
            .config
            .secrets
            .resolve_realtime_url()
            .unwrap_or(realtime_cfg.url.clone());

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let session = Arc::new(RealtimeSession {
            ctx: ctx.clone(),
            playback: OnceCell::new(),
            outbound: tx,
            response_pcm: Mutex::new(Vec::new()),
            response_text: Mutex::new(String::new()),
            turn_t0: Mutex::new(Instant::now()),
            connected: AtomicBool::new(true),
        });

        session.send_session_update(&realtime_cfg).await;
        session.send_response_create().await;

        let reader_session = session.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => reader_session.clone().handle_event(&text).await,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        error!("[{}] realtime websocket error: {e}", reader_session.ctx.call_id);
                        break;
                    }
                }
            }
            reader_session.connected.store(false, Ordering::SeqCst);
            info!("[{}] realtime endpoint disconnected", reader_session.ctx.call_id);
        });

        Ok(session)
    }

    async fn send_session_update(&self, cfg: &vox_core::config::RealtimeConfig) {
        let update = json!({
            "type": "session.update",
            "session": {
                "modalities": ["audio", "text"],
                "instructions": self.ctx.config.system_prompt,
                "voice": cfg.voice,
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "input_audio_transcription": { "model": "whisper-1" },
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": cfg.vad_threshold,
                    "prefix_padding_ms": cfg.prefix_padding_ms,
                    "silence_duration_ms": cfg.silence_duration_ms,
                }
            }
        });
        self.send_json(&update);
    }

    async fn send_response_create(&self) {
        self.send_json(&json!({ "type": "response.create" }));
    }

    fn send_json(&self, value: &serde_json::Value) {
        let _ = self.outbound.send(WsMessage::Text(value.to_string().into()));
    }

    pub async fn start(self: Arc<Self>) {
        let uuid = self.ctx.uuid().await.unwrap_or_default();
        let playback = Playback::new(self.ctx.call_id.clone(), uuid.clone());

        let caller = playback.get_caller_number().await;
        self.ctx.set_caller_number(caller.clone()).await;
        self.ctx
            .telemetry
            .on_call_start(&self.ctx.call_id, &uuid, &caller, "realtime", &self.ctx.robot_name(), &self.ctx.config.asr.language, None)
            .await;
        info!("[{}] realtime session ready, caller={caller}", self.ctx.call_id);

        let _ = self.playback.set(playback);
        *self.turn_t0.lock().await = Instant::now();
        self.ctx.mark_greeting_done();
        self.ctx.emit_demo(DemoEvent::Ready).await;
    }

    /// Forwards one PBX frame unless the bound playback is active, matching
    /// the original's reliance on the remote's server-VAD to stay quiet
    /// while the bot is speaking rather than local echo cancellation.
    pub async fn handle_audio(self: Arc<Self>, frame: Vec<u8>) {
        if !self.ctx.greeting_done() || !self.connected.load(Ordering::SeqCst) {
            return;
        }
        let Some(playback) = self.playback.get() else { return };
        if playback.is_playing() {
            return;
        }
        let b64 = BASE64.encode(&frame);
        self.send_json(&json!({ "type": "input_audio_buffer.append", "audio": b64 }));
    }

    async fn handle_event(self: Arc<Self>, raw: &str) {
        let Ok(event) = serde_json::from_str::<serde_json::Value>(raw) else {
            warn!("[{}] unparseable realtime event", self.ctx.call_id);
            return;
        };
        let Some(event_type) = event.get("type").and_then(|t| t.as_str()) else { return };

        match event_type {
            "response.output_audio.delta" => {
                if let Some(delta) = event.get("delta").and_then(|d| d.as_str()) {
                    if let Ok(bytes) = BASE64.decode(delta) {
                        self.response_pcm.lock().await.extend_from_slice(&bytes);
                    }
                }
            }
            "response.output_text.delta" => {
                if let Some(delta) = event.get("delta").and_then(|d| d.as_str()) {
                    self.response_text.lock().await.push_str(delta);
                }
            }
            "response.done" => self.on_response_done().await,
            "conversation.item.input_audio_transcription.completed" => {
                if let Some(text) = event.get("transcript").and_then(|t| t.as_str()) {
                    info!("[{}] user: {text}", self.ctx.call_id);
                    self.ctx.push_transcript("user", text.to_string()).await;
                    self.ctx.emit_demo(DemoEvent::Transcript { role: "user", text: text.to_string() }).await;
                    let ctx = self.ctx.clone();
                    let text = text.to_string();
                    tokio::spawn(async move { ctx.telemetry.on_user_speech(&ctx.call_id, &text, 1.0, "realtime", 0).await });
                }
            }
            "input_audio_buffer.speech_started" => {
                info!("[{}] barge-in (remote VAD)", self.ctx.call_id);
                self.response_pcm.lock().await.clear();
                self.response_text.lock().await.clear();
                self.ctx.record_barge_in();
                if let Some(playback) = self.playback.get() {
                    playback.stop().await;
                }
                self.ctx.emit_demo(DemoEvent::SpeechStart).await;
                let ctx = self.ctx.clone();
                tokio::spawn(async move { ctx.telemetry.on_barge_in(&ctx.call_id).await });
            }
            "input_audio_buffer.speech_stopped" => {
                info!("[{}] remote VAD: speech stopped", self.ctx.call_id);
            }
            "error" => {
                error!("[{}] realtime endpoint error: {event}", self.ctx.call_id);
            }
            _ => {}
        }
    }

    async fn on_response_done(&self) {
        let pcm = std::mem::take(&mut *self.response_pcm.lock().await);
        let text = std::mem::take(&mut *self.response_text.lock().await);
        let turn_index = self.ctx.record_turn();
        let llm_ms = self.turn_t0.lock().await.elapsed().as_millis() as u64;

        if !pcm.is_empty() {
            if let Some(playback) = self.playback.get() {
                self.ctx.emit_demo(DemoEvent::Audio { sample_rate: REALTIME_SAMPLE_RATE, pcm: pcm.clone() }).await;
                playback.play_pcm(&pcm, REALTIME_SAMPLE_RATE).await;
            }
        }

        if !text.trim().is_empty() {
            self.ctx.push_transcript("assistant", text.clone()).await;
            self.ctx.emit_demo(DemoEvent::Transcript { role: "bot", text: text.clone() }).await;
            let ctx = self.ctx.clone();
            let reply = text.clone();
            tokio::spawn(async move { ctx.telemetry.on_bot_response(&ctx.call_id, &reply, "realtime", llm_ms, None, None).await });
        }

        self.ctx
            .push_turn_metric(TurnMetricLog { turn_index, asr_ms: 0, text, llm_ms: Some(llm_ms), tts_ms: None, first_audio_ms: None })
            .await;
        self.ctx.emit_demo(DemoEvent::ResponseEnd).await;
        *self.turn_t0.lock().await = Instant::now();
    }

    pub async fn stop(&self) {
        if let Some(playback) = self.playback.get() {
            playback.close();
        }
        let _ = self.outbound.send(WsMessage::Close(None));
        self.ctx.terminate("completed").await;
    }
}
