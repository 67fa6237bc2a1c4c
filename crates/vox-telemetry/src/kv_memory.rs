//! In-process ephemeral key/value sink.
//!
//! Stands in for the original platform's Redis client: active-session
//! state keyed on `call_id`, a rolling dialog history with a ~30 minute
//! TTL, and `call_started`/`call_ended` events published to a named
//! channel. Pub/sub is a `tokio::sync::broadcast` channel rather than a
//! network round-trip — in-process, but the same fire-and-forget shape.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use crate::sinks::{KvSink, SessionState};

/// Matches the original's session TTL.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// One published telemetry event: `(channel, payload)`.
#[derive(Debug, Clone)]
pub struct Event {
    pub channel: String,
    pub payload: serde_json::Value,
}

struct Entry {
    state: SessionState,
    last_touched: Instant,
}

pub struct InMemoryKvSink {
    sessions: Mutex<HashMap<String, Entry>>,
    events: broadcast::Sender<Event>,
}

impl InMemoryKvSink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        InMemoryKvSink { sessions: Mutex::new(HashMap::new()), events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn prune_expired(&self, sessions: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        sessions.retain(|_, entry| now.duration_since(entry.last_touched) < SESSION_TTL);
    }
}

impl Default for InMemoryKvSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvSink for InMemoryKvSink {
    async fn create_session(&self, call_id: &str, state: SessionState) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        self.prune_expired(&mut sessions);
        sessions.insert(call_id.to_string(), Entry { state, last_touched: Instant::now() });
        Ok(())
    }

    async fn update_session_turns(&self, call_id: &str, turns: u32) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions
            .get_mut(call_id)
            .ok_or_else(|| anyhow::anyhow!("no session for {call_id}"))?;
        entry.state.turns = turns;
        entry.last_touched = Instant::now();
        Ok(())
    }

    async fn update_session_barge_ins(&self, call_id: &str, barge_ins: u32) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions
            .get_mut(call_id)
            .ok_or_else(|| anyhow::anyhow!("no session for {call_id}"))?;
        entry.state.barge_ins = barge_ins;
        entry.last_touched = Instant::now();
        Ok(())
    }

    async fn get_session(&self, call_id: &str) -> anyhow::Result<Option<SessionState>> {
        let mut sessions = self.sessions.lock().unwrap();
        self.prune_expired(&mut sessions);
        Ok(sessions.get(call_id).map(|e| e.state.clone()))
    }

    async fn push_message(&self, call_id: &str, role: &str, text: &str) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions
            .get_mut(call_id)
            .ok_or_else(|| anyhow::anyhow!("no session for {call_id}"))?;
        entry.state.history.push((role.to_string(), text.to_string()));
        entry.last_touched = Instant::now();
        Ok(())
    }

    async fn end_session(&self, call_id: &str) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions
            .get_mut(call_id)
            .ok_or_else(|| anyhow::anyhow!("no session for {call_id}"))?;
        entry.state.ended = true;
        Ok(())
    }

    async fn publish_event(&self, channel: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        // No subscribers is not an error — matches fire-and-forget pub/sub.
        let _ = self.events.send(Event { channel: channel.to_string(), payload });
        trace!(channel, "published telemetry event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_session_round_trips() {
        let sink = InMemoryKvSink::new();
        sink.create_session("call-0001", SessionState { mode: "pipeline".into(), ..Default::default() })
            .await
            .unwrap();
        let state = sink.get_session("call-0001").await.unwrap().unwrap();
        assert_eq!(state.mode, "pipeline");
    }

    #[tokio::test]
    async fn push_message_appends_history() {
        let sink = InMemoryKvSink::new();
        sink.create_session("call-0001", SessionState::default()).await.unwrap();
        sink.push_message("call-0001", "user", "hello").await.unwrap();
        sink.push_message("call-0001", "assistant", "hi there").await.unwrap();
        let state = sink.get_session("call-0001").await.unwrap().unwrap();
        assert_eq!(state.history, vec![("user".to_string(), "hello".to_string()), ("assistant".to_string(), "hi there".to_string())]);
    }

    #[tokio::test]
    async fn publish_event_reaches_subscriber() {
        let sink = InMemoryKvSink::new();
        let mut rx = sink.subscribe();
        sink.publish_event("call_started", serde_json::json!({"call_id": "call-0001"})).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "call_started");
    }

    #[tokio::test]
    async fn publish_event_with_no_subscribers_does_not_error() {
        let sink = InMemoryKvSink::new();
        sink.publish_event("call_ended", serde_json::json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn get_session_missing_returns_none() {
        let sink = InMemoryKvSink::new();
        assert!(sink.get_session("nope").await.unwrap().is_none());
    }
}
