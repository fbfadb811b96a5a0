//! End-to-end course generation.
//!
//! Runs outline → plan → slides → images → deck → audio for one session,
//! keeping the session registry and progress tracker current and reporting
//! every change through an [`EventSink`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use crate::course::CourseRecord;
use crate::deck::PresentationBuilder;
use crate::error::CourseError;
use crate::events::{CourseComplete, CourseFailed, EventSink, Heartbeat, LegacyProgress, ServerEvent};
use crate::images::ImageManager;
use crate::outline::OutlineGenerator;
use crate::planner::PresentationPlanner;
use crate::progress::LogLevel;
use crate::request::GenerationRequest;
use crate::sessions::{SessionRegistry, SharedTracker, lock_tracker};
use crate::slides::SlideGenerator;
use crate::speech::SpeechService;
use crate::store::CourseStore;

fn details(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Pushes tracker state to the registry and the event sink.
struct Reporter {
    session_id: String,
    tracker: SharedTracker,
    registry: Arc<SessionRegistry>,
    sink: EventSink,
}

impl Reporter {
    fn emit(&self) {
        let status = lock_tracker(&self.tracker).status();
        self.registry.update_progress(
            &self.session_id,
            status.overall_progress,
            &status.current_stage.name,
            Some(Value::Object(status.current_stage.details.clone())),
        );
        let legacy = LegacyProgress::from_status(&status);
        (self.sink)(ServerEvent::EnhancedProgress(Box::new(status)));
        (self.sink)(ServerEvent::CourseProgress(legacy));
    }

    fn start(&self, stage: &str, stage_details: Value) {
        lock_tracker(&self.tracker).start_stage(stage, details(stage_details));
        self.emit();
    }

    fn progress(&self, stage: &str, percent: f32) {
        lock_tracker(&self.tracker).update_stage_progress(stage, f64::from(percent), None);
        self.emit();
    }

    fn complete(&self, stage: &str) {
        lock_tracker(&self.tracker).complete_stage(stage);
        self.emit();
    }

    fn stats<F>(&self, update: F)
    where
        F: FnOnce(&mut crate::progress::ProcessingStatistics),
    {
        lock_tracker(&self.tracker).update_statistics(update);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        lock_tracker(&self.tracker).add_log_entry(level, message);
    }

    fn current_stage_name(&self) -> String {
        lock_tracker(&self.tracker).status().current_stage.name
    }
}

/// The generation stages and the services they call.
pub struct CoursePipeline {
    outline: OutlineGenerator,
    planner: PresentationPlanner,
    slides: SlideGenerator,
    images: Option<ImageManager>,
    speech: Option<Arc<SpeechService>>,
    store: Arc<CourseStore>,
    registry: Arc<SessionRegistry>,
    heartbeat: Duration,
}

impl CoursePipeline {
    pub fn new(
        outline: OutlineGenerator,
        planner: PresentationPlanner,
        slides: SlideGenerator,
        store: Arc<CourseStore>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            outline,
            planner,
            slides,
            images: None,
            speech: None,
            store,
            registry,
            heartbeat: Duration::from_secs(10),
        }
    }

    pub fn with_images(mut self, images: ImageManager) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_speech(mut self, speech: Arc<SpeechService>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    pub fn store(&self) -> &Arc<CourseStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run every stage for `session_id`.
    ///
    /// Registers the session when the caller has not. Terminal events
    /// (`course_complete` / `course_error`) are always emitted.
    pub async fn run(
        &self,
        session_id: &str,
        request: GenerationRequest,
        sink: EventSink,
    ) -> Result<CourseRecord, CourseError> {
        let tracker = match self.registry.tracker(session_id) {
            Some(tracker) if self.registry.is_active(session_id) => tracker,
            _ => self.registry.register(session_id, request.clone())?,
        };
        self.registry.mark_running(session_id);

        let reporter = Reporter {
            session_id: session_id.to_string(),
            tracker,
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&sink),
        };
        let heartbeat = self.spawn_heartbeat(session_id, Arc::clone(&sink));

        let started = Instant::now();
        let result = self.execute(&reporter, &request, started).await;
        heartbeat.abort();

        match result {
            Ok(record) => {
                let summary = record.summary();
                reporter.log(LogLevel::Info, format!("Final course data saved for session: {}", session_id));
                self.registry.complete(session_id, summary.clone());
                sink(ServerEvent::Heartbeat(Heartbeat::alive(session_id)));
                let progress_report = lock_tracker(&reporter.tracker).report();
                sink(ServerEvent::CourseComplete(Box::new(CourseComplete {
                    session_id: session_id.to_string(),
                    course: record.clone(),
                    summary,
                    progress_report,
                })));
                info!(session_id, elapsed = ?started.elapsed(), "Course generation completed");
                Ok(record)
            }
            Err(e) => {
                let stage = reporter.current_stage_name();
                reporter.log(LogLevel::Error, format!("{} failed: {}", stage, e));
                self.registry.fail(session_id, &e.to_string());
                sink(ServerEvent::Heartbeat(Heartbeat::alive(session_id)));
                sink(ServerEvent::CourseError(CourseFailed {
                    session_id: session_id.to_string(),
                    error: e.to_string(),
                    stage,
                    timestamp: Utc::now(),
                }));
                error!(session_id, "Error in course generation: {}", e);
                Err(e)
            }
        }
    }

    fn spawn_heartbeat(&self, session_id: &str, sink: EventSink) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let session_id = session_id.to_string();
        let period = self.heartbeat;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if !registry.is_active(&session_id) {
                    break;
                }
                sink(ServerEvent::Heartbeat(Heartbeat::alive(&session_id)));
            }
        })
    }

    async fn execute(
        &self,
        reporter: &Reporter,
        request: &GenerationRequest,
        started: Instant,
    ) -> Result<CourseRecord, CourseError> {
        let session_id = reporter.session_id.as_str();

        reporter.start(
            "initialization",
            json!({"topic": request.topic, "complexity": request.complexity, "duration": request.duration}),
        );
        let dirs = self.store.session_dirs(session_id)?;
        reporter.complete("initialization");

        reporter.start("course_structure", json!({"topic": request.topic}));
        let structure = self.outline.generate(session_id, request).await?;
        let structure_summary = structure.summary();
        reporter.stats(|s| {
            s.total_topics = structure_summary.main_topics_count;
            s.total_subtopics = structure_summary.subtopics_count;
            s.api_calls_made += 1;
        });
        reporter.complete("course_structure");

        reporter.start("presentation_planning", json!({"slide_count": request.slide_count.to_string()}));
        let plan = self
            .planner
            .create_plan(session_id, &structure, request.slide_count, request.content_density)
            .await?;
        let total_slides = plan.slides.len();
        reporter.stats(|s| {
            s.total_slides = total_slides;
            s.api_calls_made += 1;
        });
        reporter.complete("presentation_planning");

        reporter.start(
            "slide_generation",
            json!({"total_slides": total_slides, "batch_size": request.batch_size}),
        );
        let slides = self
            .slides
            .generate_all(session_id, &plan, request.batch_size, |percent| {
                reporter.stats(|s| {
                    s.slides_generated = ((f64::from(percent) / 100.0) * total_slides as f64).round() as usize;
                });
                reporter.progress("slide_generation", percent);
            })
            .await?;
        let batches = slides.len().div_ceil(request.batch_size.clamp(1, 10));
        reporter.stats(|s| {
            s.slides_generated = slides.len();
            s.api_calls_made += batches;
        });
        reporter.complete("slide_generation");

        let total_images: usize = slides.iter().map(|s| s.images.len()).sum();
        reporter.stats(|s| s.total_images = total_images);
        reporter.start("image_processing", json!({"total_images": total_images}));
        let mut images = match &self.images {
            Some(manager) => {
                manager
                    .process_slides(&dirs.images, &slides, |percent| {
                        reporter.stats(|s| {
                            s.images_processed = ((f64::from(percent) / 100.0) * total_images as f64).round() as usize;
                        });
                        reporter.progress("image_processing", percent);
                    })
                    .await
            }
            None => Vec::new(),
        };
        reporter.stats(|s| s.images_processed = images.iter().map(|i| i.images.len()).sum());
        reporter.complete("image_processing");

        reporter.start("presentation_building", json!({"theme": request.theme}));
        let presentation_path = self.store.presentation_path(session_id)?;
        let built = PresentationBuilder::new(&request.theme).build(
            &presentation_path,
            &plan.presentation_title,
            &slides,
            &images,
        )?;
        if built.error_slides > 0 {
            reporter.log(
                LogLevel::Warning,
                format!("{} slides could not be built and were replaced", built.error_slides),
            );
        }
        reporter.complete("presentation_building");

        reporter.stats(|s| s.total_audio_files = slides.len());
        reporter.start(
            "audio_generation",
            json!({"total_audio_files": slides.len(), "voice": request.voice}),
        );
        let audio: Vec<Option<PathBuf>> = match &self.speech {
            Some(speech) => {
                speech
                    .synthesize_all(&dirs.audio, &slides, &request.voice, request.speed, |percent| {
                        reporter.progress("audio_generation", percent);
                    })
                    .await
            }
            None => vec![None; slides.len()],
        };
        let generated_audio = audio.iter().flatten().count();
        if generated_audio < slides.len() {
            warn!(session_id, generated_audio, total = slides.len(), "some slides have no narration");
        }
        reporter.stats(|s| s.audio_files_generated = generated_audio);
        reporter.complete("audio_generation");

        reporter.start("finalization", json!({"audio_files_count": generated_audio}));
        for slide_images in &mut images {
            for image in &mut slide_images.images {
                if let Some(path) = image.local_path.take() {
                    image.local_path = Some(PathBuf::from(self.store.relative_path(&path)));
                }
            }
        }
        let record = CourseRecord {
            session_id: session_id.to_string(),
            request: request.clone(),
            course_structure: structure,
            presentation_plan: plan,
            slides,
            images,
            presentation_file: Some(self.store.relative_path(&built.path)),
            audio_files: audio
                .iter()
                .map(|p| p.as_deref().map(|p| self.store.relative_path(p)))
                .collect(),
            transcript_files: Vec::new(),
            created_at: Utc::now(),
            generation_time_secs: started.elapsed().as_secs_f64(),
        };
        let record = self.store.save_presentation(record)?;
        reporter.complete("finalization");
        Ok(record)
    }
}

/// Reply to a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStarted {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

/// Accepts generation requests and runs them in the background.
pub struct GenerationService {
    pipeline: Arc<CoursePipeline>,
    sink: EventSink,
}

impl GenerationService {
    pub fn new(pipeline: Arc<CoursePipeline>, sink: EventSink) -> Self {
        Self { pipeline, sink }
    }

    pub fn pipeline(&self) -> &Arc<CoursePipeline> {
        &self.pipeline
    }

    /// Validate, register and spawn. Returns as soon as the run is scheduled.
    pub fn start(&self, request: GenerationRequest) -> Result<GenerationStarted, CourseError> {
        let request = request.normalized().validated()?;
        let session_id = request
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.pipeline.store().session_dir(&session_id)?;
        self.pipeline.registry().register(&session_id, request.clone())?;

        let pipeline = Arc::clone(&self.pipeline);
        let sink = Arc::clone(&self.sink);
        let id = session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run(&id, request, sink).await {
                warn!(session_id = %id, "background generation ended with error: {}", e);
            }
        });

        info!(session_id = %session_id, "Course generation started");
        Ok(GenerationStarted {
            session_id,
            status: "started".to_string(),
            message: "Course generation started".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::testing::FakeImages;
    use crate::llm::RateLimiter;
    use crate::llm::testing::ScriptedModel;
    use crate::outline::fixtures::STRUCTURE_REPLY;
    use crate::planner::fixtures::PLAN_REPLY;
    use crate::request::{Complexity, LearningStyle};
    use crate::sessions::SessionStatus;
    use crate::speech::testing::FakeSpeech;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const SLIDES_REPLY: &str = r#"[
        {"slide_number": 1, "title": "Welcome", "transcript": "Welcome to the course.", "layout": {}, "images": [{"description": "a crab"}]},
        {"slide_number": 2, "title": "Ownership", "transcript": "Every value has an owner.", "layout": {}},
        {"slide_number": 3, "title": "Wrap up", "transcript": "That is all.", "layout": {}}
    ]"#;

    fn pipeline(dir: &TempDir, replies: Vec<&str>) -> (CoursePipeline, Arc<SessionRegistry>) {
        let model: Arc<ScriptedModel> = Arc::new(ScriptedModel::new(replies));
        let store = Arc::new(CourseStore::new(dir.path()).unwrap());
        let registry = Arc::new(SessionRegistry::new());
        let pipeline = CoursePipeline::new(
            OutlineGenerator::new(model.clone(), "structure").with_store(Arc::clone(&store)),
            PresentationPlanner::new(model.clone(), "planning").with_store(Arc::clone(&store)),
            SlideGenerator::new(model, "slides", Arc::new(RateLimiter::per_minute(10))),
            store,
            Arc::clone(&registry),
        )
        .with_images(ImageManager::new(Arc::new(FakeImages::ok()), 1))
        .with_speech(Arc::new(SpeechService::new(Arc::new(FakeSpeech))))
        .with_heartbeat(Duration::from_millis(20));
        (pipeline, registry)
    }

    fn recording_sink() -> (EventSink, Arc<Mutex<Vec<ServerEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let sink: EventSink = Arc::new(move |event| captured.lock().unwrap().push(event));
        (sink, events)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("Rust programming", Complexity::Beginner, "10 minutes", LearningStyle::Visual)
    }

    #[tokio::test]
    async fn test_full_run() {
        let dir = TempDir::new().unwrap();
        let (pipeline, registry) = pipeline(&dir, vec![STRUCTURE_REPLY, PLAN_REPLY, SLIDES_REPLY]);
        let (sink, events) = recording_sink();

        let record = pipeline.run("s1", request(), sink).await.unwrap();
        assert_eq!(record.slides.len(), 3);
        assert_eq!(record.presentation_file.as_deref(), Some("sessions/s1/presentation.pptx"));
        assert_eq!(record.audio_files.iter().flatten().count(), 3);
        assert_eq!(record.transcript_files.len(), 3);
        assert!(dir.path().join("sessions/s1/presentation.pptx").is_file());
        let image = record.images[0].images[0].local_path.as_ref().unwrap();
        assert!(image.is_relative());

        let session = registry.get("s1").unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.result.unwrap().total_slides, 3);

        let events = events.lock().unwrap();
        let progress: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::EnhancedProgress(s) => Some(s.overall_progress),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last().copied(), Some(100.0));

        let enhanced = events.iter().filter(|e| e.name() == "enhanced_progress").count();
        let legacy = events.iter().filter(|e| e.name() == "course_progress").count();
        assert_eq!(enhanced, legacy);
        assert_eq!(events.last().unwrap().name(), "course_complete");
        assert!(events.iter().all(|e| e.name() != "course_error"));
    }

    #[tokio::test]
    async fn test_outline_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let (pipeline, registry) = pipeline(&dir, vec!["not json at all"]);
        let (sink, events) = recording_sink();

        let err = pipeline.run("s2", request(), sink).await.unwrap_err();
        assert!(matches!(err, CourseError::ParseError(_)));

        let session = registry.get("s2").unwrap();
        assert_eq!(session.status, SessionStatus::Error);

        let events = events.lock().unwrap();
        match events.last().unwrap() {
            ServerEvent::CourseError(failed) => {
                assert_eq!(failed.session_id, "s2");
                assert_eq!(failed.stage, "Generating Course Structure");
            }
            other => panic!("unexpected last event {}", other.name()),
        }
        assert!(events.iter().all(|e| e.name() != "course_complete"));
    }

    #[tokio::test]
    async fn test_heartbeat_stops_after_run() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(&dir, vec![STRUCTURE_REPLY, PLAN_REPLY, SLIDES_REPLY]);
        let (sink, events) = recording_sink();
        pipeline.run("s3", request(), sink).await.unwrap();

        let count = events.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(events.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn test_service_rejects_duplicate_running_session() {
        let dir = TempDir::new().unwrap();
        let (pipeline, registry) = pipeline(&dir, vec![STRUCTURE_REPLY, PLAN_REPLY, SLIDES_REPLY]);
        registry.register("busy", request()).unwrap();
        let (sink, _) = recording_sink();
        let service = GenerationService::new(Arc::new(pipeline), sink);

        let mut duplicate = request();
        duplicate.session_id = Some("busy".to_string());
        assert!(matches!(service.start(duplicate), Err(CourseError::SessionConflict(_))));

        let mut invalid = request();
        invalid.topic = "  ".to_string();
        assert!(service.start(invalid).unwrap_err().is_client_error());
    }

    #[tokio::test]
    async fn test_service_starts_in_background() {
        let dir = TempDir::new().unwrap();
        let (pipeline, registry) = pipeline(&dir, vec![STRUCTURE_REPLY, PLAN_REPLY, SLIDES_REPLY]);
        let (sink, _) = recording_sink();
        let service = GenerationService::new(Arc::new(pipeline), sink);

        let started = service.start(request()).unwrap();
        assert_eq!(started.status, "started");
        assert!(uuid::Uuid::parse_str(&started.session_id).is_ok());

        for _ in 0..100 {
            if !registry.is_active(&started.session_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.get(&started.session_id).unwrap().status, SessionStatus::Completed);
    }
}
