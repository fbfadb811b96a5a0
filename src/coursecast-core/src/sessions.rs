//! Registry of generation sessions started by this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::course::CourseSummary;
use crate::error::CourseError;
use crate::progress::ProgressTracker;
use crate::request::GenerationRequest;

pub type SharedTracker = Arc<Mutex<ProgressTracker>>;

/// Lock a tracker, recovering from a panicked holder.
pub fn lock_tracker(tracker: &SharedTracker) -> MutexGuard<'_, ProgressTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Running,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub status: SessionStatus,
    pub progress: f64,
    pub stage: String,
    pub details: Option<Value>,
    pub request: GenerationRequest,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<CourseSummary>,
    pub error: Option<String>,
}

struct Entry {
    record: SessionRecord,
    tracker: SharedTracker,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new session. A finished session with the same id is replaced.
    pub fn register(&self, session_id: &str, request: GenerationRequest) -> Result<SharedTracker, CourseError> {
        let mut sessions = self.sessions();
        if let Some(existing) = sessions.get(session_id)
            && !existing.record.status.is_terminal()
        {
            return Err(CourseError::SessionConflict(session_id.to_string()));
        }

        let now = Utc::now();
        let tracker = Arc::new(Mutex::new(ProgressTracker::new(session_id)));
        sessions.insert(
            session_id.to_string(),
            Entry {
                record: SessionRecord {
                    session_id: session_id.to_string(),
                    status: SessionStatus::Initializing,
                    progress: 0.0,
                    stage: "Initializing".to_string(),
                    details: None,
                    request,
                    started_at: now,
                    last_updated: now,
                    ended_at: None,
                    result: None,
                    error: None,
                },
                tracker: Arc::clone(&tracker),
            },
        );
        info!(session_id, "session registered");
        Ok(tracker)
    }

    pub fn mark_running(&self, session_id: &str) -> bool {
        self.with_active(session_id, |record| {
            record.status = SessionStatus::Running;
        })
    }

    /// Record progress. Ignored once the session has finished.
    pub fn update_progress(&self, session_id: &str, progress: f64, stage: &str, details: Option<Value>) -> bool {
        self.with_active(session_id, |record| {
            record.progress = progress.clamp(0.0, 100.0);
            record.stage = stage.to_string();
            record.details = details;
        })
    }

    pub fn complete(&self, session_id: &str, summary: CourseSummary) -> bool {
        let done = self.with_active(session_id, |record| {
            record.status = SessionStatus::Completed;
            record.progress = 100.0;
            record.stage = "Presentation ready".to_string();
            record.result = Some(summary);
            record.ended_at = Some(Utc::now());
        });
        if done {
            info!(session_id, "session completed");
        }
        done
    }

    pub fn fail(&self, session_id: &str, error: &str) -> bool {
        let done = self.with_active(session_id, |record| {
            record.status = SessionStatus::Error;
            record.error = Some(error.to_string());
            record.ended_at = Some(Utc::now());
        });
        if done {
            warn!(session_id, error, "session failed");
        }
        done
    }

    fn with_active<F>(&self, session_id: &str, update: F) -> bool
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut sessions = self.sessions();
        let Some(entry) = sessions.get_mut(session_id) else {
            debug!(session_id, "update for unknown session");
            return false;
        };
        if entry.record.status.is_terminal() {
            debug!(session_id, status = entry.record.status.as_str(), "ignoring update after terminal state");
            return false;
        }
        update(&mut entry.record);
        entry.record.last_updated = Utc::now();
        true
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions().get(session_id).map(|e| e.record.clone())
    }

    pub fn tracker(&self, session_id: &str) -> Option<SharedTracker> {
        self.sessions().get(session_id).map(|e| Arc::clone(&e.tracker))
    }

    /// Whether a session exists and has not finished.
    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions()
            .get(session_id)
            .is_some_and(|e| !e.record.status.is_terminal())
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions().remove(session_id).is_some()
    }

    pub fn list(&self) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self.sessions().values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Complexity, LearningStyle};

    fn request() -> GenerationRequest {
        GenerationRequest::new("Rust", Complexity::Beginner, "10 minutes", LearningStyle::Visual)
    }

    fn summary() -> CourseSummary {
        CourseSummary {
            total_slides: 3,
            total_images: 0,
            generation_time: "1.00s".to_string(),
            presentation_file: None,
            audio_files_count: 0,
            transcript_files_count: 3,
        }
    }

    #[test]
    fn test_lifecycle() {
        let registry = SessionRegistry::new();
        registry.register("s1", request()).unwrap();
        assert_eq!(registry.get("s1").unwrap().status, SessionStatus::Initializing);

        assert!(registry.mark_running("s1"));
        assert!(registry.update_progress("s1", 40.0, "Generating Slide Content", None));
        assert!(registry.complete("s1", summary()));

        let record = registry.get("s1").unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.progress, 100.0);
        assert!(record.ended_at.is_some());
        assert!(!registry.is_active("s1"));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let registry = SessionRegistry::new();
        registry.register("s1", request()).unwrap();
        registry.mark_running("s1");
        assert!(registry.fail("s1", "model unavailable"));

        assert!(!registry.update_progress("s1", 90.0, "late", None));
        assert!(!registry.complete("s1", summary()));
        let record = registry.get("s1").unwrap();
        assert_eq!(record.status, SessionStatus::Error);
        assert_eq!(record.error.as_deref(), Some("model unavailable"));
    }

    #[test]
    fn test_duplicate_running_session_rejected() {
        let registry = SessionRegistry::new();
        registry.register("s1", request()).unwrap();
        let err = registry.register("s1", request()).unwrap_err();
        assert!(matches!(err, CourseError::SessionConflict(_)));

        registry.fail("s1", "x");
        assert!(registry.register("s1", request()).is_ok());
        assert_eq!(registry.get("s1").unwrap().status, SessionStatus::Initializing);
    }

    #[test]
    fn test_tracker_is_shared() {
        let registry = SessionRegistry::new();
        let tracker = registry.register("s1", request()).unwrap();
        lock_tracker(&tracker).start_stage("initialization", None);
        lock_tracker(&tracker).complete_stage("initialization");

        let same = registry.tracker("s1").unwrap();
        assert_eq!(lock_tracker(&same).overall_progress(), 5.0);
        assert!(registry.tracker("missing").is_none());
    }
}
