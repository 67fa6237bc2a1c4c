//! Axum WebSocket front: the PBX bridge route and the browser demo route.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use vox_core::config::{Config, SessionMode};
use vox_telemetry::Telemetry;

use crate::pipeline_session::PipelineSession;
use crate::rate_limit::RateLimiter;
use crate::realtime_session::RealtimeSession;
use crate::script_session::ScriptSession;
use crate::session::{sniff_uuid_from_binary, sniff_uuid_from_text, DemoEvent, SessionContext};

pub struct ServerState {
    pub config: Arc<Config>,
    pub telemetry: Arc<Telemetry>,
    pub rate_limiter: RateLimiter,
    call_counter: AtomicU32,
    connections: AtomicU32,
}

impl ServerState {
    pub fn new(config: Arc<Config>, telemetry: Arc<Telemetry>, max_connections_per_ip: u32) -> Arc<Self> {
        Arc::new(ServerState {
            config,
            telemetry,
            rate_limiter: RateLimiter::new(max_connections_per_ip),
            call_counter: AtomicU32::new(0),
            connections: AtomicU32::new(0),
        })
    }

    fn next_call_id(&self) -> String {
        let n = self.call_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("call-{n:04}")
    }
}

/// The three session variants behind one handle so the connection loop can
/// dispatch without caring which is configured (§4.G).
enum AnySession {
    Pipeline(Arc<PipelineSession>),
    Script(Arc<ScriptSession>),
    Realtime(Arc<RealtimeSession>),
}

impl AnySession {
    async fn build(ctx: Arc<SessionContext>) -> anyhow::Result<Self> {
        match ctx.config.mode {
            SessionMode::Pipeline => Ok(AnySession::Pipeline(Arc::new(PipelineSession::new(ctx)?))),
            SessionMode::LlmScript => Ok(AnySession::Script(Arc::new(ScriptSession::new(ctx).await?))),
            SessionMode::Realtime => Ok(AnySession::Realtime(RealtimeSession::connect(ctx).await?)),
        }
    }

    async fn start(&self) {
        match self {
            AnySession::Pipeline(s) => s.clone().start().await,
            AnySession::Script(s) => s.clone().start().await,
            AnySession::Realtime(s) => s.clone().start().await,
        }
    }

    async fn handle_audio(&self, frame: Vec<u8>) {
        match self {
            AnySession::Pipeline(s) => s.clone().handle_audio(frame).await,
            AnySession::Script(s) => s.clone().handle_audio(frame).await,
            AnySession::Realtime(s) => s.clone().handle_audio(frame).await,
        }
    }

    async fn stop(&self) {
        match self {
            AnySession::Pipeline(s) => s.stop().await,
            AnySession::Script(s) => s.stop().await,
            AnySession::Realtime(s) => s.stop().await,
        }
    }
}

pub async fn start(state: Arc<ServerState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/demo", get(demo_ws_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    let addr = format!("{}:{}", state.config.ws_host, state.config.ws_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("vox-gateway listening on {addr}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    if !state.rate_limiter.check(addr.ip()) {
        return axum::http::StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    ws.on_upgrade(move |socket| handle_pbx_connection(state, socket, addr)).into_response()
}

async fn demo_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_demo_connection(state, socket)).into_response()
}

/// Boot sequence shared by both routes: consume frames until the external
/// UUID is known, construct the configured session variant, start it, then
/// hand every subsequent binary frame to `handle_audio`. `stop()` always
/// runs, whether the loop ends via a close frame or a read error.
async fn handle_pbx_connection(state: Arc<ServerState>, mut socket: WebSocket, addr: SocketAddr) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let call_id = state.next_call_id();
    info!("[{call_id}] accepted PBX connection from {addr}");

    let ctx = Arc::new(SessionContext::new(call_id.clone(), state.config.clone(), state.telemetry.clone(), mode_name(&state.config.mode), None));

    // No provider connections are opened until external_uuid is known: a
    // malformed or truncated first frame must close without ever dialing
    // ASR/LLM/TTS or a realtime endpoint.
    while !ctx.has_uuid().await {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(uuid) = sniff_uuid_from_text(&text) {
                    ctx.set_uuid(uuid).await;
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                if let Some(uuid) = sniff_uuid_from_binary(&bytes) {
                    ctx.set_uuid(uuid).await;
                } else {
                    warn!("[{call_id}] binary frame before uuid is known, dropping");
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                info!("[{call_id}] closed before uuid was established");
                state.connections.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("[{call_id}] read error while awaiting uuid: {e}");
                state.connections.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }

    let session = match AnySession::build(ctx.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!("[{call_id}] failed to build session: {e}");
            state.connections.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    };

    session.start().await;

    loop {
        match socket.recv().await {
            Some(Ok(Message::Binary(frame))) => session.handle_audio(frame.to_vec()).await,
            Some(Ok(Message::Close(_))) => {
                info!("[{call_id}] closed by peer");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("[{call_id}] read error: {e}");
                break;
            }
            None => break,
        }
    }

    session.stop().await;
    state.connections.fetch_sub(1, Ordering::SeqCst);
}

/// The optional browser demo surface (§4.G/§6): drives the same session
/// skeleton from microphone input, emitting [`DemoEvent`]s back out as
/// JSON text frames, with `Audio` events followed by a binary PCM frame.
async fn handle_demo_connection(state: Arc<ServerState>, mut socket: WebSocket) {
    let call_id = state.next_call_id();
    info!("[{call_id}] accepted browser demo connection");

    let (demo_tx, mut demo_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(SessionContext::new(call_id.clone(), state.config.clone(), state.telemetry.clone(), mode_name(&state.config.mode), Some(demo_tx)));
    ctx.set_uuid(format!("demo-{call_id}")).await;

    let session = match AnySession::build(ctx.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!("[{call_id}] failed to build demo session: {e}");
            return;
        }
    };
    session.start().await;

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Binary(pcm))) => session.handle_audio(pcm.to_vec()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("[{call_id}] demo read error: {e}");
                        break;
                    }
                }
            }
            event = demo_rx.recv() => {
                match event {
                    Some(event) => {
                        if send_demo_event(&mut socket, event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    session.stop().await;
}

async fn send_demo_event(socket: &mut WebSocket, event: DemoEvent) -> Result<(), axum::Error> {
    match event {
        DemoEvent::Audio { sample_rate, pcm } => {
            socket.send(Message::Text(json!({ "type": "audio", "sample_rate": sample_rate }).to_string().into())).await?;
            socket.send(Message::Binary(pcm.into())).await
        }
        DemoEvent::Ready => socket.send(Message::Text(json!({ "type": "ready" }).to_string().into())).await,
        DemoEvent::Listening => socket.send(Message::Text(json!({ "type": "listening" }).to_string().into())).await,
        DemoEvent::SpeechStart => socket.send(Message::Text(json!({ "type": "speech_start" }).to_string().into())).await,
        DemoEvent::Processing => socket.send(Message::Text(json!({ "type": "processing" }).to_string().into())).await,
        DemoEvent::Transcript { role, text } => {
            socket.send(Message::Text(json!({ "type": "transcript", "role": role, "text": text }).to_string().into())).await
        }
        DemoEvent::ResponseEnd => socket.send(Message::Text(json!({ "type": "response_end" }).to_string().into())).await,
    }
}

fn mode_name(mode: &SessionMode) -> &'static str {
    match mode {
        SessionMode::Pipeline => "pipeline",
        SessionMode::LlmScript => "llm_script",
        SessionMode::Realtime => "realtime",
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connections.load(Ordering::SeqCst),
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
}
