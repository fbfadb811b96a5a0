//! Real-time event protocol and per-session fan-out.
//!
//! Every frame on the wire is `{"event": <name>, "data": {...}}`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::course::{CourseRecord, CourseSummary};
use crate::progress::{ProcessingStatistics, ProgressReport, ProgressStatus, Timing};

const ROOM_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connected {
    pub message: String,
    pub connection_id: String,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionJoined {
    pub session_id: String,
    pub status: String,
    pub progress: f64,
    pub timestamp: DateTime<Utc>,
}

/// Flat progress frame kept for older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyProgress {
    pub session_id: String,
    pub progress: f64,
    pub step: String,
    pub stage: String,
    pub details: String,
    pub statistics: ProcessingStatistics,
    pub timing: Timing,
    pub timestamp: DateTime<Utc>,
}

impl LegacyProgress {
    pub fn from_status(status: &ProgressStatus) -> Self {
        Self {
            session_id: status.session_id.clone(),
            progress: status.overall_progress,
            step: status.current_stage.name.clone(),
            stage: status.current_stage.id.clone(),
            details: status.current_stage.description.clone(),
            statistics: status.statistics.clone(),
            timing: status.timing.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseComplete {
    pub session_id: String,
    pub course: CourseRecord,
    pub summary: CourseSummary,
    pub progress_report: ProgressReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseFailed {
    pub session_id: String,
    pub error: String,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub session_id: String,
    pub status: String,
    pub server_time: DateTime<Utc>,
}

impl Heartbeat {
    pub fn alive(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: "alive".to_string(),
            server_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Events pushed from the server to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected(Connected),
    SessionJoined(SessionJoined),
    CourseProgress(LegacyProgress),
    EnhancedProgress(Box<ProgressStatus>),
    CourseComplete(Box<CourseComplete>),
    CourseError(CourseFailed),
    Heartbeat(Heartbeat),
    Error(ErrorMessage),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::SessionJoined(_) => "session_joined",
            ServerEvent::CourseProgress(_) => "course_progress",
            ServerEvent::EnhancedProgress(_) => "enhanced_progress",
            ServerEvent::CourseComplete(_) => "course_complete",
            ServerEvent::CourseError(_) => "course_error",
            ServerEvent::Heartbeat(_) => "heartbeat",
            ServerEvent::Error(_) => "error",
        }
    }

    /// The session an event belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerEvent::SessionJoined(e) => Some(&e.session_id),
            ServerEvent::CourseProgress(e) => Some(&e.session_id),
            ServerEvent::EnhancedProgress(e) => Some(&e.session_id),
            ServerEvent::CourseComplete(e) => Some(&e.session_id),
            ServerEvent::CourseError(e) => Some(&e.session_id),
            ServerEvent::Heartbeat(e) => Some(&e.session_id),
            ServerEvent::Connected(_) | ServerEvent::Error(_) => None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorMessage { message: message.into() })
    }
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinSession {
        #[serde(default)]
        session_id: String,
    },
    LeaveSession {
        #[serde(default)]
        session_id: String,
    },
    Ping,
}

/// Callback receiving events for one session.
pub type EventSink = Arc<dyn Fn(ServerEvent) + Send + Sync>;

/// One broadcast room per session id.
///
/// A room lives while it has listeners. It is dropped when its last
/// [`Subscription`] goes away, when a publish finds nobody listening, and
/// after a session's final `course_complete` or `course_error`.
#[derive(Default)]
pub struct EventHub {
    rooms: Mutex<HashMap<String, broadcast::Sender<ServerEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<ServerEvent>>> {
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join a room, creating it on first use.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ServerEvent> {
        self.rooms()
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Like [`EventHub::subscribe`], but leaving is automatic on drop.
    pub fn join(self: &Arc<Self>, session_id: &str) -> Subscription {
        Subscription {
            events: Some(self.subscribe(session_id)),
            hub: Arc::clone(self),
            session_id: session_id.to_string(),
        }
    }

    /// Deliver to everyone in the room. Returns the number of receivers.
    pub fn publish(&self, session_id: &str, event: ServerEvent) -> usize {
        let mut rooms = self.rooms();
        let Some(sender) = rooms.get(session_id) else {
            debug!(session_id, event = event.name(), "no listeners for event");
            return 0;
        };
        let terminal = matches!(event, ServerEvent::CourseComplete(_) | ServerEvent::CourseError(_));
        let delivered = sender.send(event).unwrap_or(0);
        // Receivers still drain buffered events after the sender is gone.
        if terminal || delivered == 0 {
            rooms.remove(session_id);
        }
        delivered
    }

    pub fn listener_count(&self, session_id: &str) -> usize {
        self.rooms().get(session_id).map(|s| s.receiver_count()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms().len()
    }

    /// Drop the room if nobody listens any more. Returns true when removed.
    pub fn release(&self, session_id: &str) -> bool {
        let mut rooms = self.rooms();
        match rooms.get(session_id) {
            Some(sender) if sender.receiver_count() == 0 => {
                rooms.remove(session_id);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.rooms().remove(session_id);
    }

    /// A sink publishing into this hub under the event's own session id.
    pub fn sink(self: &Arc<Self>) -> EventSink {
        let hub = Arc::clone(self);
        Arc::new(move |event: ServerEvent| {
            if let Some(session_id) = event.session_id().map(str::to_string) {
                hub.publish(&session_id, event);
            }
        })
    }
}

/// A listener in one room. Dropping it releases the room once empty.
pub struct Subscription {
    events: Option<broadcast::Receiver<ServerEvent>>,
    hub: Arc<EventHub>,
    session_id: String,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn recv(&mut self) -> Result<ServerEvent, broadcast::error::RecvError> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.events.take());
        self.hub.release(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressTracker;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let event = ServerEvent::Heartbeat(Heartbeat::alive("s1"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "heartbeat");
        assert_eq!(value["data"]["session_id"], "s1");
        assert_eq!(value["data"]["status"], "alive");
    }

    #[test]
    fn test_client_events_parse() {
        let join: ClientEvent =
            serde_json::from_value(json!({"event": "join_session", "data": {"session_id": "s1"}})).unwrap();
        assert_eq!(join, ClientEvent::JoinSession { session_id: "s1".to_string() });

        let ping: ClientEvent = serde_json::from_value(json!({"event": "ping"})).unwrap();
        assert_eq!(ping, ClientEvent::Ping);

        assert!(serde_json::from_value::<ClientEvent>(json!({"event": "dance"})).is_err());
    }

    #[test]
    fn test_legacy_progress_mirrors_tracker() {
        let mut tracker = ProgressTracker::new("s1");
        tracker.start_stage("initialization", None);
        tracker.complete_stage("initialization");
        let status = tracker.status();
        let legacy = LegacyProgress::from_status(&status);
        assert_eq!(legacy.progress, status.overall_progress);
        assert_eq!(legacy.stage, "course_structure");
        assert_eq!(legacy.step, "Generating Course Structure");
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let hub = Arc::new(EventHub::new());
        let mut a = hub.subscribe("a");
        let mut b = hub.subscribe("b");

        let sink = hub.sink();
        sink(ServerEvent::Heartbeat(Heartbeat::alive("a")));

        let received = a.recv().await.unwrap();
        assert_eq!(received.session_id(), Some("a"));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_room_is_noop() {
        let hub = EventHub::new();
        assert_eq!(hub.publish("ghost", ServerEvent::error("x")), 0);
        let _rx = hub.subscribe("s1");
        assert_eq!(hub.listener_count("s1"), 1);
        hub.remove("s1");
        assert_eq!(hub.listener_count("s1"), 0);
    }

    #[test]
    fn test_dropped_subscriptions_release_rooms() {
        let hub = Arc::new(EventHub::new());
        let subscriptions: Vec<Subscription> = (0..1000).map(|i| hub.join(&format!("s{}", i))).collect();
        assert_eq!(hub.room_count(), 1000);

        let shared = hub.join("s0");
        drop(subscriptions);
        assert_eq!(hub.room_count(), 1);
        assert_eq!(hub.listener_count("s0"), 1);

        drop(shared);
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_publish_prunes_abandoned_room() {
        let hub = EventHub::new();
        drop(hub.subscribe("s1"));
        assert_eq!(hub.room_count(), 1);
        assert_eq!(hub.publish("s1", ServerEvent::Heartbeat(Heartbeat::alive("s1"))), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_final_event_closes_room_after_delivery() {
        let hub = Arc::new(EventHub::new());
        let mut subscription = hub.join("s1");
        let sink = hub.sink();
        sink(ServerEvent::CourseError(CourseFailed {
            session_id: "s1".to_string(),
            error: "outline failed".to_string(),
            stage: "Generating Course Structure".to_string(),
            timestamp: Utc::now(),
        }));
        assert_eq!(hub.room_count(), 0);

        let last = subscription.recv().await.unwrap();
        assert_eq!(last.name(), "course_error");
        assert!(subscription.recv().await.is_err());
    }
}
