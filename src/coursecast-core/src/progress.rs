//! Weighted, stage-based progress tracking for a generation session.
//!
//! The overall figure is the sum of completed stage weights plus the
//! in-flight fraction of started stages. It never moves backwards.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

const HISTORY_LIMIT: usize = 100;
const TARGET_SLIDES_PER_MINUTE: f64 = 2.0;

struct StageDef {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    weight: f64,
    substages: &'static [&'static str],
}

const STAGES: [StageDef; 8] = [
    StageDef {
        id: "initialization",
        name: "Initializing",
        description: "Setting up course generation pipeline",
        weight: 5.0,
        substages: &["validation", "configuration", "setup"],
    },
    StageDef {
        id: "course_structure",
        name: "Generating Course Structure",
        description: "Creating hierarchical course outline with AI",
        weight: 15.0,
        substages: &["topic_analysis", "structure_generation", "validation"],
    },
    StageDef {
        id: "presentation_planning",
        name: "Planning Presentation",
        description: "Converting course structure to slide format",
        weight: 10.0,
        substages: &["format_conversion", "slide_planning", "optimization"],
    },
    StageDef {
        id: "slide_generation",
        name: "Generating Slide Content",
        description: "Creating detailed content for each slide",
        weight: 35.0,
        substages: &["content_creation", "layout_design", "quality_check"],
    },
    StageDef {
        id: "image_processing",
        name: "Processing Images",
        description: "Finding and generating images for slides",
        weight: 20.0,
        substages: &["image_search", "image_generation", "optimization"],
    },
    StageDef {
        id: "presentation_building",
        name: "Building Presentation",
        description: "Assembling PowerPoint presentation",
        weight: 8.0,
        substages: &["slide_assembly", "formatting", "final_review"],
    },
    StageDef {
        id: "audio_generation",
        name: "Generating Audio",
        description: "Creating TTS narration for slides",
        weight: 5.0,
        substages: &["text_processing", "speech_synthesis", "audio_optimization"],
    },
    StageDef {
        id: "finalization",
        name: "Finalizing",
        description: "Saving files and creating metadata",
        weight: 2.0,
        substages: &["file_saving", "metadata_creation", "cleanup"],
    },
];

/// Ids of all stages in pipeline order.
pub fn stage_ids() -> impl Iterator<Item = &'static str> {
    STAGES.iter().map(|s| s.id)
}

struct StageState {
    def: &'static StageDef,
    progress: f64,
    current_substage: &'static str,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    details: Map<String, Value>,
}

/// Counters and derived rates for the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatistics {
    pub total_topics: usize,
    pub total_subtopics: usize,
    pub total_slides: usize,
    pub slides_generated: usize,
    pub images_processed: usize,
    pub total_images: usize,
    pub audio_files_generated: usize,
    pub total_audio_files: usize,
    pub avg_slides_per_minute: f64,
    pub avg_images_per_minute: f64,
    pub estimated_completion_time: Option<String>,
    pub processing_speed: String,
    pub api_calls_made: usize,
    pub total_tokens_used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStage {
    pub id: String,
    pub name: String,
    pub description: String,
    pub progress: f64,
    pub current_substage: String,
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub elapsed_time_seconds: f64,
    pub elapsed_time_formatted: String,
    pub estimated_total_time: String,
    pub estimated_remaining: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub id: String,
    pub name: String,
    pub completed: bool,
    pub progress: f64,
}

/// Snapshot broadcast as `enhanced_progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStatus {
    pub session_id: String,
    pub overall_progress: f64,
    pub current_stage: CurrentStage,
    pub statistics: ProcessingStatistics,
    pub timing: Timing,
    pub stages_summary: Vec<StageSummary>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage_id: String,
    pub name: String,
    pub description: String,
    pub weight: f64,
    pub completed: bool,
    pub time_spent: f64,
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub avg_slides_per_minute: f64,
    pub avg_images_per_minute: f64,
    pub processing_efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub session_id: String,
    pub total_elapsed_time: f64,
    pub total_elapsed_formatted: String,
    pub overall_progress: f64,
    pub stages: Vec<StageReport>,
    pub statistics: ProcessingStatistics,
    pub performance_summary: PerformanceSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub stage: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct ProgressTracker {
    session_id: String,
    started: Instant,
    stages: Vec<StageState>,
    current: usize,
    overall: f64,
    statistics: ProcessingStatistics,
    history: Vec<ProgressLogEntry>,
}

/// `42s`, `3m 5s` or `1h 2m`.
pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl ProgressTracker {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started: Instant::now(),
            stages: STAGES
                .iter()
                .map(|def| StageState {
                    def,
                    progress: 0.0,
                    current_substage: "",
                    started_at: None,
                    finished_at: None,
                    details: Map::new(),
                })
                .collect(),
            current: 0,
            overall: 0.0,
            statistics: ProcessingStatistics {
                processing_speed: "Calculating...".to_string(),
                ..Default::default()
            },
            history: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn overall_progress(&self) -> f64 {
        self.overall
    }

    pub fn statistics(&self) -> &ProcessingStatistics {
        &self.statistics
    }

    pub fn history(&self) -> &[ProgressLogEntry] {
        &self.history
    }

    fn index_of(&self, stage_id: &str) -> Option<usize> {
        let index = self.stages.iter().position(|s| s.def.id == stage_id);
        if index.is_none() {
            warn!(session_id = %self.session_id, "Stage {} not found", stage_id);
        }
        index
    }

    pub fn start_stage(&mut self, stage_id: &str, details: Option<Map<String, Value>>) {
        let Some(index) = self.index_of(stage_id) else {
            return;
        };
        self.current = index;
        let stage = &mut self.stages[index];
        stage.started_at = Some(Instant::now());
        stage.finished_at = None;
        stage.progress = 0.0;
        stage.current_substage = stage.def.substages.first().copied().unwrap_or_default();
        if let Some(details) = details {
            stage.details.extend(details);
        }
        self.recompute();
        debug!(session_id = %self.session_id, stage = stage_id, "stage started");
    }

    pub fn update_stage_progress(&mut self, stage_id: &str, progress: f64, details: Option<Map<String, Value>>) {
        let Some(index) = self.index_of(stage_id) else {
            return;
        };
        let stage = &mut self.stages[index];
        if stage.started_at.is_none() {
            stage.started_at = Some(Instant::now());
        }
        stage.progress = if progress.is_finite() { progress.clamp(0.0, 100.0) } else { 0.0 };

        let substages = stage.def.substages;
        if !substages.is_empty() {
            let slot = (stage.progress / (100.0 / substages.len() as f64)) as usize;
            stage.current_substage = substages[slot.min(substages.len() - 1)];
        }
        if let Some(details) = details {
            stage.details.extend(details);
        }
        self.recompute();
    }

    pub fn complete_stage(&mut self, stage_id: &str) {
        let Some(index) = self.index_of(stage_id) else {
            return;
        };
        let now = Instant::now();
        let stage = &mut self.stages[index];
        stage.started_at.get_or_insert(now);
        stage.finished_at = Some(now);
        stage.progress = 100.0;
        stage.current_substage = "";

        if index + 1 < self.stages.len() {
            self.current = index + 1;
        } else {
            self.current = self.stages.len();
        }
        self.recompute();
        debug!(session_id = %self.session_id, stage = stage_id, overall = self.overall, "stage completed");
    }

    /// Mutate counters, then refresh derived rates.
    pub fn update_statistics<F>(&mut self, update: F)
    where
        F: FnOnce(&mut ProcessingStatistics),
    {
        update(&mut self.statistics);
        self.refresh_metrics(self.started.elapsed());
    }

    pub fn add_log_entry(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(session_id = %self.session_id, "{}", message),
            LogLevel::Info => info!(session_id = %self.session_id, "{}", message),
            LogLevel::Warning => warn!(session_id = %self.session_id, "{}", message),
            LogLevel::Error => error!(session_id = %self.session_id, "{}", message),
        }

        let stage = self.stages.get(self.current).map(|s| s.def.id.to_string());
        self.history.push(ProgressLogEntry {
            level,
            message,
            stage,
            timestamp: Utc::now(),
        });
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    fn recompute(&mut self) {
        let total: f64 = self
            .stages
            .iter()
            .map(|s| {
                if s.finished_at.is_some() {
                    s.def.weight
                } else if s.started_at.is_some() {
                    s.progress / 100.0 * s.def.weight
                } else {
                    0.0
                }
            })
            .sum();
        self.overall = self.overall.max(total.min(100.0));
        self.refresh_metrics(self.started.elapsed());
    }

    fn refresh_metrics(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let minutes = secs / 60.0;
        let stats = &mut self.statistics;
        if minutes > 0.0 {
            stats.avg_slides_per_minute = round1(stats.slides_generated as f64 / minutes);
            stats.avg_images_per_minute = round1(stats.images_processed as f64 / minutes);
        }
        if stats.slides_generated > 0 {
            let per_slide = secs / stats.slides_generated as f64;
            stats.processing_speed = if per_slide < 30.0 {
                "Fast"
            } else if per_slide < 60.0 {
                "Normal"
            } else {
                "Slow"
            }
            .to_string();
        }
        if self.overall > 5.0 {
            let total = secs / self.overall * 100.0;
            stats.estimated_completion_time = Some(format_duration(total - secs));
        }
    }

    fn estimates(&self, secs: f64) -> (String, String) {
        if self.overall > 5.0 {
            let total = secs / self.overall * 100.0;
            (format_duration(total), format_duration(total - secs))
        } else {
            ("Calculating...".to_string(), "Calculating...".to_string())
        }
    }

    pub fn status(&self) -> ProgressStatus {
        self.status_with_elapsed(self.started.elapsed())
    }

    pub fn status_with_elapsed(&self, elapsed: Duration) -> ProgressStatus {
        let secs = elapsed.as_secs_f64();
        let (estimated_total_time, estimated_remaining) = self.estimates(secs);

        let current_stage = match self.stages.get(self.current) {
            Some(stage) => CurrentStage {
                id: stage.def.id.to_string(),
                name: stage.def.name.to_string(),
                description: stage.def.description.to_string(),
                progress: round1(stage.progress),
                current_substage: stage.current_substage.to_string(),
                details: stage.details.clone(),
            },
            None => CurrentStage {
                id: "completed".to_string(),
                name: "Completed".to_string(),
                description: "Course generation completed".to_string(),
                progress: 100.0,
                current_substage: String::new(),
                details: Map::new(),
            },
        };

        ProgressStatus {
            session_id: self.session_id.clone(),
            overall_progress: round1(self.overall),
            current_stage,
            statistics: self.statistics.clone(),
            timing: Timing {
                elapsed_time_seconds: round1(secs),
                elapsed_time_formatted: format_duration(secs),
                estimated_total_time,
                estimated_remaining,
            },
            stages_summary: self
                .stages
                .iter()
                .map(|s| StageSummary {
                    id: s.def.id.to_string(),
                    name: s.def.name.to_string(),
                    completed: s.finished_at.is_some(),
                    progress: if s.finished_at.is_some() {
                        100.0
                    } else if s.started_at.is_some() {
                        round1(s.progress)
                    } else {
                        0.0
                    },
                })
                .collect(),
            last_updated: Utc::now(),
        }
    }

    /// Slides per minute against the two-per-minute target, capped at 100.
    pub fn processing_efficiency(&self) -> f64 {
        if self.statistics.total_slides == 0 {
            return 0.0;
        }
        let rate = self.statistics.avg_slides_per_minute;
        round1((rate / TARGET_SLIDES_PER_MINUTE * 100.0).min(100.0))
    }

    pub fn report(&self) -> ProgressReport {
        let secs = self.started.elapsed().as_secs_f64();
        ProgressReport {
            session_id: self.session_id.clone(),
            total_elapsed_time: secs,
            total_elapsed_formatted: format_duration(secs),
            overall_progress: self.overall,
            stages: self
                .stages
                .iter()
                .map(|s| StageReport {
                    stage_id: s.def.id.to_string(),
                    name: s.def.name.to_string(),
                    description: s.def.description.to_string(),
                    weight: s.def.weight,
                    completed: s.finished_at.is_some(),
                    time_spent: match (s.started_at, s.finished_at) {
                        (Some(start), Some(end)) => end.duration_since(start).as_secs_f64(),
                        _ => 0.0,
                    },
                    details: s.details.clone(),
                })
                .collect(),
            statistics: self.statistics.clone(),
            performance_summary: PerformanceSummary {
                avg_slides_per_minute: self.statistics.avg_slides_per_minute,
                avg_images_per_minute: self.statistics.avg_images_per_minute,
                processing_efficiency: self.processing_efficiency(),
            },
        }
    }
}
