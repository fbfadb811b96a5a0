//! Real-time progress channel at `/ws`.
//!
//! Frames are JSON `{"event": ..., "data": ...}` in both directions. A
//! client joins one or more session rooms and receives every event the
//! pipeline publishes for them.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use coursecast_core::events::{Connected, Heartbeat, SessionJoined};
use coursecast_core::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::request_context::RequestContext;
use super::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, ctx.request_id))
}

type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Session rooms this connection is subscribed to.
#[derive(Default)]
struct Rooms {
    forwarders: HashMap<String, JoinHandle<()>>,
}

impl Rooms {
    fn join(&mut self, state: &AppState, session_id: &str, out: &Outbox) {
        // A forwarder ends on its own once the session's final event closes the room.
        if self.forwarders.get(session_id).is_some_and(|task| !task.is_finished()) {
            return;
        }
        let mut events = state.hub.join(session_id);
        let out = out.clone();
        let id = session_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if out.send(event).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session_id = %id, skipped, "websocket client lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.forwarders.insert(session_id.to_string(), task);
    }

    /// Aborting a forwarder drops its subscription, which releases an empty room.
    fn leave(&mut self, session_id: &str) -> bool {
        match self.forwarders.remove(session_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn session_ids(&self) -> Vec<String> {
        self.forwarders.keys().cloned().collect()
    }

    fn close(&mut self) {
        for (_, task) in self.forwarders.drain() {
            task.abort();
        }
    }
}

fn joined_event(state: &AppState, session_id: &str) -> ServerEvent {
    let (status, progress) = state
        .registry
        .get(session_id)
        .map(|record| (record.status.as_str().to_string(), record.progress))
        .unwrap_or_else(|| ("unknown".to_string(), 0.0));
    ServerEvent::SessionJoined(SessionJoined {
        session_id: session_id.to_string(),
        status,
        progress,
        timestamp: Utc::now(),
    })
}

/// Apply one client frame. Replies go through `out`.
fn handle_client_event(state: &AppState, rooms: &mut Rooms, out: &Outbox, event: ClientEvent) {
    match event {
        ClientEvent::JoinSession { session_id } => {
            let session_id = session_id.trim();
            if session_id.is_empty() {
                let _ = out.send(ServerEvent::error("No session_id provided"));
                return;
            }
            rooms.join(state, session_id, out);
            info!(session_id, "websocket client joined session");
            let _ = out.send(joined_event(state, session_id));
            let _ = out.send(ServerEvent::Heartbeat(Heartbeat::alive(session_id)));
        }
        ClientEvent::LeaveSession { session_id } => {
            if rooms.leave(session_id.trim()) {
                debug!(session_id = %session_id, "websocket client left session");
            }
        }
        ClientEvent::Ping => {
            for session_id in rooms.session_ids() {
                let _ = out.send(ServerEvent::Heartbeat(Heartbeat::alive(session_id)));
            }
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, connection_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Could not encode {} event: {}", event.name(), e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    info!(connection_id = %connection_id, "websocket client connected");
    let _ = out_tx.send(ServerEvent::Connected(Connected {
        message: "Connected to coursecast server".to_string(),
        connection_id: connection_id.clone(),
        server_time: Utc::now(),
    }));

    let mut rooms = Rooms::default();
    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                warn!("websocket receive error: {err}");
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => handle_client_event(&state, &mut rooms, &out_tx, event),
                Err(e) => {
                    let _ = out_tx.send(ServerEvent::error(format!("Invalid message: {e}")));
                }
            },
            Message::Binary(_) => {
                let _ = out_tx.send(ServerEvent::error("Binary frames are not supported"));
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    rooms.close();
    drop(out_tx);
    let _ = writer.await;
    info!(connection_id = %connection_id, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::state::testing;
    use coursecast_core::GenerationRequest;
    use coursecast_core::events::CourseFailed;
    use coursecast_core::request::{Complexity, LearningStyle};

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_replies_with_status_and_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        state
            .registry
            .register(
                "s1",
                GenerationRequest::new("Rust", Complexity::Beginner, "5 minutes", LearningStyle::Visual),
            )
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rooms = Rooms::default();
        handle_client_event(&state, &mut rooms, &tx, ClientEvent::JoinSession { session_id: "s1".into() });

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            ServerEvent::SessionJoined(joined) => assert_eq!(joined.status, "initializing"),
            other => panic!("unexpected {}", other.name()),
        }
        assert_eq!(events[1].name(), "heartbeat");
        assert_eq!(state.hub.listener_count("s1"), 1);

        rooms.close();
    }

    #[tokio::test]
    async fn test_published_events_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rooms = Rooms::default();
        handle_client_event(&state, &mut rooms, &tx, ClientEvent::JoinSession { session_id: "s2".into() });
        drain(&mut rx);

        state.hub.publish("s2", ServerEvent::Heartbeat(Heartbeat::alive("s2")));
        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.session_id(), Some("s2"));

        assert!(rooms.leave("s2"));
        assert!(!rooms.leave("s2"));
    }

    async fn wait_for_rooms(state: &AppState, expected: usize) {
        for _ in 0..50 {
            if state.hub.room_count() == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(state.hub.room_count(), expected);
    }

    #[tokio::test]
    async fn test_leaving_and_closing_release_rooms() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rooms = Rooms::default();
        for i in 0..20 {
            handle_client_event(&state, &mut rooms, &tx, ClientEvent::JoinSession { session_id: format!("r{i}") });
        }
        drain(&mut rx);
        assert_eq!(state.hub.room_count(), 20);

        handle_client_event(&state, &mut rooms, &tx, ClientEvent::LeaveSession { session_id: "r0".into() });
        wait_for_rooms(&state, 19).await;

        rooms.close();
        wait_for_rooms(&state, 0).await;
    }

    #[tokio::test]
    async fn test_rejoin_after_final_event() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rooms = Rooms::default();
        handle_client_event(&state, &mut rooms, &tx, ClientEvent::JoinSession { session_id: "done".into() });
        drain(&mut rx);

        state.hub.publish(
            "done",
            ServerEvent::CourseError(CourseFailed {
                session_id: "done".into(),
                error: "outline failed".into(),
                stage: "Generating Course Structure".into(),
                timestamp: Utc::now(),
            }),
        );
        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.name(), "course_error");
        wait_for_rooms(&state, 0).await;
        for _ in 0..50 {
            if rooms.forwarders.get("done").is_some_and(|task| task.is_finished()) {
                break;
            }
            tokio::task::yield_now().await;
        }

        handle_client_event(&state, &mut rooms, &tx, ClientEvent::JoinSession { session_id: "done".into() });
        assert_eq!(state.hub.listener_count("done"), 1);
        rooms.close();
    }

    #[tokio::test]
    async fn test_join_without_id_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rooms = Rooms::default();
        handle_client_event(&state, &mut rooms, &tx, ClientEvent::JoinSession { session_id: " ".into() });

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
    }

    #[tokio::test]
    async fn test_ping_beats_for_each_room() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rooms = Rooms::default();
        for id in ["a", "b"] {
            handle_client_event(&state, &mut rooms, &tx, ClientEvent::JoinSession { session_id: id.into() });
        }
        drain(&mut rx);

        handle_client_event(&state, &mut rooms, &tx, ClientEvent::Ping);
        let beats = drain(&mut rx);
        assert_eq!(beats.len(), 2);
        assert!(beats.iter().all(|e| e.name() == "heartbeat"));
        rooms.close();
    }
}
