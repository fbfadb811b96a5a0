//! Client-side view of a generation session.
//!
//! Server events are folded into [`ClientState`] so a UI stays consistent
//! even when frames arrive late, twice or for another session.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationMessage, Speaker};
use crate::course::CourseRecord;
use crate::events::ServerEvent;
use crate::progress::ProcessingStatistics;
use crate::request::GenerationRequest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl GenerationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, GenerationPhase::Completed | GenerationPhase::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationView {
    pub session_id: Option<String>,
    pub phase: GenerationPhase,
    pub progress: f64,
    pub stage: String,
    pub statistics: Option<ProcessingStatistics>,
    pub error: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub config: Option<GenerationRequest>,
    pub generation: GenerationView,
    pub course: Option<CourseRecord>,
    pub current_slide: usize,
    pub conversation: Vec<ConversationMessage>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config(&mut self, request: GenerationRequest) {
        self.config = Some(request);
    }

    /// Start following `session_id`. Any previous run is forgotten.
    pub fn begin(&mut self, session_id: impl Into<String>) {
        self.generation = GenerationView {
            session_id: Some(session_id.into()),
            phase: GenerationPhase::Running,
            stage: "Initializing".to_string(),
            last_heartbeat: Some(Utc::now()),
            ..GenerationView::default()
        };
    }

    fn follows(&self, session_id: Option<&str>) -> bool {
        session_id.is_some() && self.generation.session_id.as_deref() == session_id
    }

    fn advance(&mut self, progress: f64, stage: &str) {
        if progress > self.generation.progress {
            self.generation.progress = progress.min(100.0);
        }
        if !stage.is_empty() {
            self.generation.stage = stage.to_string();
        }
    }

    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        self.apply_at(event, Utc::now())
    }

    /// Fold one event into the state. Returns whether anything changed.
    pub fn apply_at(&mut self, event: &ServerEvent, now: DateTime<Utc>) -> bool {
        if !self.follows(event.session_id()) || self.generation.phase != GenerationPhase::Running {
            return false;
        }

        match event {
            ServerEvent::CourseProgress(progress) => {
                self.advance(progress.progress, &progress.step);
                self.generation.statistics = Some(progress.statistics.clone());
            }
            ServerEvent::EnhancedProgress(status) => {
                self.advance(status.overall_progress, &status.current_stage.name);
                self.generation.statistics = Some(status.statistics.clone());
            }
            ServerEvent::SessionJoined(joined) => {
                self.advance(joined.progress, "");
            }
            ServerEvent::Heartbeat(_) => {
                self.generation.last_heartbeat = Some(now);
            }
            ServerEvent::CourseComplete(complete) => {
                self.generation.phase = GenerationPhase::Completed;
                self.generation.progress = 100.0;
                self.generation.stage = "Presentation ready".to_string();
                self.course = Some(complete.course.clone());
                self.current_slide = 0;
                self.conversation.clear();
            }
            ServerEvent::CourseError(failed) => {
                self.generation.phase = GenerationPhase::Failed;
                self.generation.error = Some(failed.error.clone());
                self.generation.stage = failed.stage.clone();
            }
            ServerEvent::Connected(_) | ServerEvent::Error(_) => return false,
        }
        true
    }

    /// A running session whose last heartbeat is older than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: ChronoDuration) -> bool {
        self.generation.phase == GenerationPhase::Running
            && self
                .generation
                .last_heartbeat
                .is_none_or(|beat| now - beat > timeout)
    }

    pub fn load_course(&mut self, course: CourseRecord) {
        self.course = Some(course);
        self.current_slide = 0;
        self.conversation.clear();
    }

    pub fn slide_count(&self) -> usize {
        self.course.as_ref().map_or(0, |c| c.slides.len())
    }

    pub fn select_slide(&mut self, index: usize) -> bool {
        if index >= self.slide_count() {
            return false;
        }
        self.current_slide = index;
        true
    }

    pub fn push_message(&mut self, role: Speaker, content: impl Into<String>) {
        self.conversation.push(ConversationMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::fixtures::sample_record;
    use crate::events::{CourseComplete, CourseFailed, Heartbeat, LegacyProgress};
    use crate::progress::ProgressTracker;

    fn progress_event(session_id: &str, stages: &[&str]) -> ServerEvent {
        let mut tracker = ProgressTracker::new(session_id);
        for stage in stages {
            tracker.start_stage(stage, None);
            tracker.complete_stage(stage);
        }
        ServerEvent::CourseProgress(LegacyProgress::from_status(&tracker.status()))
    }

    fn complete_event(session_id: &str) -> ServerEvent {
        let course = sample_record(session_id);
        let mut tracker = ProgressTracker::new(session_id);
        tracker.start_stage("initialization", None);
        ServerEvent::CourseComplete(Box::new(CourseComplete {
            session_id: session_id.to_string(),
            summary: course.summary(),
            course,
            progress_report: tracker.report(),
        }))
    }

    fn failed_event(session_id: &str) -> ServerEvent {
        ServerEvent::CourseError(CourseFailed {
            session_id: session_id.to_string(),
            error: "model offline".to_string(),
            stage: "Generating Course Structure".to_string(),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_progress_never_moves_backwards() {
        let mut state = ClientState::new();
        state.begin("s1");
        assert!(state.apply(&progress_event("s1", &["initialization", "course_structure"])));
        assert_eq!(state.generation.progress, 20.0);

        state.apply(&progress_event("s1", &["initialization"]));
        assert_eq!(state.generation.progress, 20.0);
    }

    #[test]
    fn test_other_sessions_are_ignored() {
        let mut state = ClientState::new();
        state.begin("s1");
        assert!(!state.apply(&progress_event("s2", &["initialization"])));
        assert!(!state.apply(&complete_event("s2")));
        assert_eq!(state.generation.phase, GenerationPhase::Running);

        let mut idle = ClientState::new();
        assert!(!idle.apply(&progress_event("s1", &["initialization"])));
    }

    #[test]
    fn test_completion_loads_course() {
        let mut state = ClientState::new();
        state.begin("s1");
        state.push_message(Speaker::Student, "old question");
        assert!(state.apply(&complete_event("s1")));

        assert_eq!(state.generation.phase, GenerationPhase::Completed);
        assert_eq!(state.generation.progress, 100.0);
        assert_eq!(state.current_slide, 0);
        assert_eq!(state.slide_count(), 3);
        assert!(state.conversation.is_empty());
    }

    #[test]
    fn test_terminal_phase_is_sticky() {
        let mut state = ClientState::new();
        state.begin("s1");
        assert!(state.apply(&failed_event("s1")));
        assert_eq!(state.generation.phase, GenerationPhase::Failed);
        assert_eq!(state.generation.error.as_deref(), Some("model offline"));

        assert!(!state.apply(&progress_event("s1", &["initialization"])));
        assert!(!state.apply(&ServerEvent::Heartbeat(Heartbeat::alive("s1"))));
        assert!(!state.apply(&complete_event("s1")));
        assert_eq!(state.generation.phase, GenerationPhase::Failed);
    }

    #[test]
    fn test_stale_heartbeat() {
        let mut state = ClientState::new();
        state.begin("s1");
        let start = Utc::now();
        state.apply_at(&ServerEvent::Heartbeat(Heartbeat::alive("s1")), start);

        let timeout = ChronoDuration::seconds(30);
        assert!(!state.is_stale(start + ChronoDuration::seconds(10), timeout));
        assert!(state.is_stale(start + ChronoDuration::seconds(31), timeout));

        state.apply(&failed_event("s1"));
        assert!(!state.is_stale(start + ChronoDuration::seconds(300), timeout));
    }

    #[test]
    fn test_select_slide_bounds() {
        let mut state = ClientState::new();
        assert!(!state.select_slide(0));
        state.load_course(sample_record("s1"));
        assert!(state.select_slide(2));
        assert_eq!(state.current_slide, 2);
        assert!(!state.select_slide(3));
        assert_eq!(state.current_slide, 2);
    }
}
