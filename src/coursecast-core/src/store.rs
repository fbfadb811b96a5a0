//! On-disk persistence for generated courses.
//!
//! Layout under the data directory:
//!
//! ```text
//! data/
//!   index.json
//!   settings.json
//!   sessions/{id}/course.json, metadata.json, presentation.pptx
//!   sessions/{id}/{audio,images,transcripts,logs}/
//!   exports/
//!   temp/
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::course::CourseRecord;
use crate::error::CourseError;
use crate::request::Customizations;
use crate::slides::SlideContent;

const INDEX_FILE: &str = "index.json";
const COURSE_FILE: &str = "course.json";
const METADATA_FILE: &str = "metadata.json";
pub const PRESENTATION_FILE: &str = "presentation.pptx";

/// Per-session working directories.
#[derive(Debug, Clone)]
pub struct SessionDirs {
    pub root: PathBuf,
    pub audio: PathBuf,
    pub images: PathBuf,
    pub transcripts: PathBuf,
    pub logs: PathBuf,
}

/// Index entry for a saved course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseMetadata {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub course_title: String,
    pub topic: String,
    pub complexity: String,
    pub duration: String,
    pub slide_count: usize,
    pub presentation_path: Option<String>,
    #[serde(default)]
    pub audio_files: Vec<Option<String>>,
    pub status: String,
    #[serde(default)]
    pub customizations: Customizations,
    pub file_size: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseSort {
    #[default]
    CreatedAt,
    Title,
    Topic,
    Size,
}

impl CourseSort {
    /// Unknown keys fall back to newest first.
    pub fn parse(value: &str) -> Self {
        match value {
            "title" => CourseSort::Title,
            "topic" => CourseSort::Topic,
            "size" => CourseSort::Size,
            _ => CourseSort::CreatedAt,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseQuery {
    #[serde(default)]
    pub sort_by: CourseSort,
    /// Case-insensitive substring of the topic.
    pub topic: Option<String>,
    pub complexity: Option<String>,
    /// Matches when the course carries any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

impl CourseQuery {
    fn matches(&self, course: &CourseMetadata) -> bool {
        if let Some(topic) = &self.topic
            && !course.topic.to_lowercase().contains(&topic.to_lowercase())
        {
            return false;
        }
        if let Some(complexity) = &self.complexity
            && !course.complexity.eq_ignore_ascii_case(complexity)
        {
            return false;
        }
        self.tags.is_empty() || self.tags.iter().any(|tag| course.tags.contains(tag))
    }
}

/// One logged model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInteraction {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub stage: String,
    pub model_name: String,
    pub processing_time_seconds: f64,
    pub request: Value,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
    pub request_size_chars: usize,
    pub response_size_chars: usize,
    pub success: bool,
}

impl AiInteraction {
    pub fn success(
        session_id: &str,
        stage: &str,
        model_name: &str,
        request: Value,
        response: &str,
        processing_time_seconds: f64,
        total_tokens: Option<u32>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            stage: stage.to_string(),
            model_name: model_name.to_string(),
            processing_time_seconds,
            request_size_chars: request.to_string().len(),
            request,
            response_size_chars: response.len(),
            response: Some(response.to_string()),
            error: None,
            total_tokens,
            success: true,
        }
    }

    pub fn failure(
        session_id: &str,
        stage: &str,
        model_name: &str,
        request: Value,
        error: &str,
        processing_time_seconds: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            stage: stage.to_string(),
            model_name: model_name.to_string(),
            processing_time_seconds,
            request_size_chars: request.to_string().len(),
            request,
            response: None,
            response_size_chars: 0,
            error: Some(error.to_string()),
            total_tokens: None,
            success: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub total_api_calls: usize,
    pub average_processing_time: f64,
    pub total_tokens_used: u64,
    pub stages_covered: Vec<String>,
    pub success_rate: f64,
}

pub fn log_summary(logs: &[AiInteraction]) -> LogSummary {
    let calls = logs.len();
    let total_time: f64 = logs.iter().map(|l| l.processing_time_seconds).sum();
    let successes = logs.iter().filter(|l| l.success).count();
    let stages: BTreeSet<String> = logs.iter().map(|l| l.stage.clone()).collect();
    LogSummary {
        total_api_calls: calls,
        average_processing_time: (total_time / calls.max(1) as f64 * 1000.0).round() / 1000.0,
        total_tokens_used: logs.iter().filter_map(|l| l.total_tokens).map(u64::from).sum(),
        stages_covered: stages.into_iter().collect(),
        success_rate: successes as f64 / calls.max(1) as f64 * 100.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFile {
    pub slide_number: u32,
    pub filename: String,
    pub content: String,
    pub file_size: u64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirStats {
    pub size: u64,
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_courses: usize,
    pub total_size: u64,
    pub directories: BTreeMap<String, DirStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub exists: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_file: bool,
    pub is_directory: bool,
    pub name: String,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub original_filename: String,
    pub path: String,
    pub size: u64,
}

/// Tags derived from the topic, level and length of a course.
pub fn course_tags(topic: &str, complexity: &str, slide_count: usize) -> Vec<String> {
    let topic = topic.to_lowercase();
    let words: Vec<&str> = topic.split(|c: char| !c.is_alphanumeric()).collect();
    let mut tags = Vec::new();

    if topic.contains("programming") || topic.contains("coding") {
        tags.push("programming".to_string());
    }
    if topic.contains("machine learning") || words.contains(&"ai") {
        tags.push("ai".to_string());
    }
    if topic.contains("data") {
        tags.push("data-science".to_string());
    }
    if topic.contains("web") {
        tags.push("web-development".to_string());
    }
    if topic.contains("design") {
        tags.push("design".to_string());
    }
    if topic.contains("business") {
        tags.push("business".to_string());
    }

    tags.push(format!("level-{}", complexity));
    tags.push(
        match slide_count {
            0..=9 => "short",
            10..=29 => "medium",
            _ => "long",
        }
        .to_string(),
    );
    tags
}

fn validate_session_id(session_id: &str) -> Result<(), CourseError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CourseError::ValidationError(format!("Invalid session id: {}", session_id)))
    }
}

fn system_time_utc(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

fn dir_stats(path: &Path) -> DirStats {
    let mut stats = DirStats::default();
    let Ok(entries) = fs::read_dir(path) else {
        return stats;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            let nested = dir_stats(&entry.path());
            stats.size += nested.size;
            stats.file_count += nested.file_count;
        } else {
            stats.size += meta.len();
            stats.file_count += 1;
        }
    }
    stats
}

fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// File-backed course store rooted at the configured data directory.
pub struct CourseStore {
    root: PathBuf,
    index: Mutex<BTreeMap<String, CourseMetadata>>,
}

impl CourseStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CourseError> {
        let root = root.into();
        for dir in ["sessions", "exports", "temp"] {
            fs::create_dir_all(root.join(dir))?;
        }

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            match fs::read_to_string(&index_path).map(|s| serde_json::from_str(&s)) {
                Ok(Ok(index)) => index,
                Ok(Err(e)) => {
                    warn!("Ignoring unreadable session index: {}", e);
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!("Could not read session index: {}", e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        let store = Self {
            root,
            index: Mutex::new(index),
        };
        if let Ok(removed) = store.cleanup_old_files(1) {
            debug!(removed, "cleaned temp directory");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf, CourseError> {
        validate_session_id(session_id)?;
        Ok(self.sessions_dir().join(session_id))
    }

    /// Session directories, created on first use.
    pub fn session_dirs(&self, session_id: &str) -> Result<SessionDirs, CourseError> {
        let root = self.session_dir(session_id)?;
        let dirs = SessionDirs {
            audio: root.join("audio"),
            images: root.join("images"),
            transcripts: root.join("transcripts"),
            logs: root.join("logs"),
            root,
        };
        for dir in [&dirs.audio, &dirs.images, &dirs.transcripts, &dirs.logs] {
            fs::create_dir_all(dir)?;
        }
        Ok(dirs)
    }

    pub fn presentation_path(&self, session_id: &str) -> Result<PathBuf, CourseError> {
        Ok(self.session_dir(session_id)?.join(PRESENTATION_FILE))
    }

    /// Path relative to the data directory, with forward slashes.
    pub fn relative_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a client supplied path inside the data directory.
    pub fn resolve_data_path(&self, relative: &str) -> Result<PathBuf, CourseError> {
        let trimmed = relative.trim_start_matches("data/");
        let candidate = Path::new(trimmed);
        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(CourseError::ValidationError(format!(
                        "Path escapes the data directory: {}",
                        relative
                    )));
                }
            }
        }
        if resolved == self.root {
            return Err(CourseError::ValidationError("Path is empty".to_string()));
        }
        Ok(resolved)
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, CourseMetadata>> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_index(&self, index: &BTreeMap<String, CourseMetadata>) -> Result<(), CourseError> {
        let content = serde_json::to_string_pretty(index)?;
        fs::write(self.root.join(INDEX_FILE), content)?;
        Ok(())
    }

    /// Write `course.json` and `metadata.json` and index the course.
    pub fn save_course_session(&self, record: &CourseRecord) -> Result<CourseMetadata, CourseError> {
        let dirs = self.session_dirs(&record.session_id)?;
        fs::write(dirs.root.join(COURSE_FILE), serde_json::to_string_pretty(record)?)?;

        let complexity = record.request.complexity.as_str().to_string();
        let mut metadata = CourseMetadata {
            session_id: record.session_id.clone(),
            created_at: record.created_at,
            course_title: record.title().to_string(),
            topic: record.request.topic.clone(),
            complexity: complexity.clone(),
            duration: record
                .course_structure
                .total_estimated_time
                .clone()
                .unwrap_or_else(|| record.request.duration.clone()),
            slide_count: record.slides.len(),
            presentation_path: record.presentation_file.clone(),
            audio_files: record.audio_files.clone(),
            status: "completed".to_string(),
            customizations: record.request.customizations.clone(),
            file_size: 0,
            tags: course_tags(&record.request.topic, &complexity, record.slides.len()),
            imported_at: None,
        };
        if let Some(previous) = self.course_metadata(&record.session_id) {
            metadata.imported_at = previous.imported_at;
        }

        let metadata_path = dirs.root.join(METADATA_FILE);
        fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;
        metadata.file_size = dir_stats(&dirs.root).size;
        fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        let mut index = self.lock_index();
        index.insert(record.session_id.clone(), metadata.clone());
        self.write_index(&index)?;

        info!(session_id = %record.session_id, "Saved course session");
        Ok(metadata)
    }

    pub fn load_course_session(&self, session_id: &str) -> Result<Option<CourseRecord>, CourseError> {
        let path = self.session_dir(session_id)?.join(COURSE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn course_metadata(&self, session_id: &str) -> Option<CourseMetadata> {
        self.lock_index().get(session_id).cloned()
    }

    pub fn list_courses(&self, query: &CourseQuery) -> Vec<CourseMetadata> {
        let mut courses: Vec<CourseMetadata> = self
            .lock_index()
            .values()
            .filter(|c| query.matches(c))
            .cloned()
            .collect();

        match query.sort_by {
            CourseSort::CreatedAt => courses.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            CourseSort::Title => courses.sort_by_key(|c| c.course_title.to_lowercase()),
            CourseSort::Topic => courses.sort_by_key(|c| c.topic.to_lowercase()),
            CourseSort::Size => courses.sort_by(|a, b| b.file_size.cmp(&a.file_size)),
        }

        if let Some(limit) = query.limit {
            courses.truncate(limit);
        }
        courses
    }

    /// Remove a course and all its files. Returns false for unknown ids.
    pub fn delete_course_session(&self, session_id: &str) -> Result<bool, CourseError> {
        let dir = self.session_dir(session_id)?;
        let mut index = self.lock_index();
        let indexed = index.remove(session_id).is_some();
        let on_disk = dir.exists();
        if !indexed && !on_disk {
            warn!(session_id, "No session found to delete");
            return Ok(false);
        }
        if on_disk {
            fs::remove_dir_all(&dir)?;
        }
        if indexed {
            self.write_index(&index)?;
        }
        info!(session_id, "Deleted course session");
        Ok(true)
    }

    /// Write one `slide_NN.txt` per slide with a transcript.
    pub fn save_transcripts(&self, session_id: &str, slides: &[SlideContent]) -> Result<Vec<PathBuf>, CourseError> {
        let dirs = self.session_dirs(session_id)?;
        let mut paths = Vec::new();
        for (i, slide) in slides.iter().enumerate() {
            if slide.transcript.trim().is_empty() {
                continue;
            }
            let path = dirs.transcripts.join(format!("slide_{:02}.txt", i + 1));
            match fs::write(&path, &slide.transcript) {
                Ok(()) => paths.push(path),
                Err(e) => warn!(session_id, slide = i + 1, "Error saving transcript: {}", e),
            }
        }
        info!(session_id, count = paths.len(), "Saved transcripts");
        Ok(paths)
    }

    /// Store transcripts and the finished course, returning the saved record.
    pub fn save_presentation(&self, mut record: CourseRecord) -> Result<CourseRecord, CourseError> {
        let transcripts = self.save_transcripts(&record.session_id, &record.slides)?;
        record.transcript_files = transcripts.iter().map(|p| self.relative_path(p)).collect();
        self.save_course_session(&record)?;
        Ok(record)
    }

    pub fn session_transcripts(&self, session_id: &str) -> Result<Vec<TranscriptFile>, CourseError> {
        let dir = self.session_dir(session_id)?.join("transcripts");
        if !dir.is_dir() {
            return Err(CourseError::NotFound(format!("No transcripts found for session {}", session_id)));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        files.sort();

        let mut transcripts = Vec::new();
        for path in files {
            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            let slide_number = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.split('_').nth(1))
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            match (fs::read_to_string(&path), fs::metadata(&path)) {
                (Ok(content), Ok(meta)) => transcripts.push(TranscriptFile {
                    slide_number,
                    filename,
                    content,
                    file_size: meta.len(),
                    created_at: system_time_utc(meta.created().or_else(|_| meta.modified())),
                }),
                (Err(e), _) | (_, Err(e)) => warn!(session_id, "Error reading transcript {}: {}", filename, e),
            }
        }
        Ok(transcripts)
    }

    pub fn save_ai_interaction_log(&self, entry: &AiInteraction) -> Result<PathBuf, CourseError> {
        let dirs = self.session_dirs(&entry.session_id)?;
        let stage: String = entry
            .stage
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let path = dirs
            .logs
            .join(format!("{}_{}.json", entry.timestamp.format("%Y%m%d_%H%M%S%6f"), stage));
        fs::write(&path, serde_json::to_string_pretty(entry)?)?;
        debug!(path = %path.display(), "Saved AI interaction log");
        Ok(path)
    }

    /// Interaction logs in chronological order. Unreadable files are skipped.
    pub fn session_logs(&self, session_id: &str) -> Result<Vec<AiInteraction>, CourseError> {
        let dir = self.session_dir(session_id)?.join("logs");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut logs = Vec::new();
        for path in files {
            let parsed = fs::read_to_string(&path)
                .map_err(CourseError::from)
                .and_then(|s| serde_json::from_str::<AiInteraction>(&s).map_err(CourseError::from));
            match parsed {
                Ok(entry) => logs.push(entry),
                Err(e) => debug!(path = %path.display(), "Skipping log file: {}", e),
            }
        }
        Ok(logs)
    }

    pub fn storage_stats(&self) -> StorageStats {
        let mut directories = BTreeMap::new();
        for name in ["sessions", "exports", "temp"] {
            directories.insert(name.to_string(), dir_stats(&self.root.join(name)));
        }
        StorageStats {
            total_courses: self.lock_index().len(),
            total_size: directories.values().map(|d| d.size).sum(),
            directories,
        }
    }

    /// Delete temp files older than `max_age_days` and empty temp dirs.
    pub fn cleanup_old_files(&self, max_age_days: u64) -> Result<usize, CourseError> {
        let max_age = Duration::from_secs(max_age_days * 24 * 60 * 60);
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(self.temp_dir())?.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                if fs::remove_dir(&path).is_ok() {
                    removed += 1;
                }
                continue;
            }
            let expired = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .is_some_and(|age| age >= max_age);
            if expired {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Error cleaning temp file {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up old files");
        }
        Ok(removed)
    }

    pub fn file_info(&self, relative: &str) -> Result<FileInfo, CourseError> {
        let path = self.resolve_data_path(relative)?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let Ok(meta) = fs::metadata(&path) else {
            return Ok(FileInfo {
                exists: false,
                size: 0,
                modified: None,
                is_file: false,
                is_directory: false,
                name,
                extension,
            });
        };
        Ok(FileInfo {
            exists: true,
            size: meta.len(),
            modified: system_time_utc(meta.modified()),
            is_file: meta.is_file(),
            is_directory: meta.is_dir(),
            name,
            extension,
        })
    }

    pub fn upload_to_temp(&self, original_filename: &str, bytes: &[u8]) -> Result<UploadedFile, CourseError> {
        if original_filename.trim().is_empty() {
            return Err(CourseError::ValidationError("No file provided".to_string()));
        }
        let filename = format!("{}_{}", Uuid::new_v4(), sanitize_file_name(original_filename));
        let path = self.temp_dir().join(&filename);
        fs::write(&path, bytes)?;
        Ok(UploadedFile {
            filename,
            original_filename: original_filename.to_string(),
            path: self.relative_path(&path),
            size: bytes.len() as u64,
        })
    }

    /// Import a `course.json` document under a fresh session id.
    ///
    /// Media paths belong to the source installation and are dropped.
    pub fn import_course_json(&self, bytes: &[u8]) -> Result<String, CourseError> {
        let mut record: CourseRecord = serde_json::from_slice(bytes)
            .map_err(|e| CourseError::ValidationError(format!("Failed to import JSON: {}", e)))?;

        let session_id = Uuid::new_v4().to_string();
        record.session_id = session_id.clone();
        record.request.session_id = Some(session_id.clone());
        record.presentation_file = None;
        record.audio_files = Vec::new();
        record.images = Vec::new();
        record.transcript_files = Vec::new();

        let record = self.save_presentation(record)?;
        let mut index = self.lock_index();
        if let Some(entry) = index.get_mut(&record.session_id) {
            entry.imported_at = Some(Utc::now());
            let snapshot = entry.clone();
            fs::write(
                self.session_dir(&session_id)?.join(METADATA_FILE),
                serde_json::to_string_pretty(&snapshot)?,
            )?;
            self.write_index(&index)?;
        }
        info!(session_id = %session_id, "Imported course session");
        Ok(session_id)
    }

    /// Bundle a saved course into `exports/{id}.zip`.
    pub fn export_course_zip(&self, session_id: &str) -> Result<PathBuf, CourseError> {
        let record = self
            .load_course_session(session_id)?
            .ok_or_else(|| CourseError::NotFound(format!("Session not found: {}", session_id)))?;
        let metadata = self.course_metadata(session_id);
        let session_dir = self.session_dir(session_id)?;

        let export_path = self.exports_dir().join(format!("{}.zip", session_id));
        let file = fs::File::create(&export_path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(COURSE_FILE, options)?;
        zip.write_all(serde_json::to_string_pretty(&record)?.as_bytes())?;
        if let Some(metadata) = metadata {
            zip.start_file(METADATA_FILE, options)?;
            zip.write_all(serde_json::to_string_pretty(&metadata)?.as_bytes())?;
        }

        let presentation = session_dir.join(PRESENTATION_FILE);
        if presentation.is_file() {
            zip.start_file(PRESENTATION_FILE, options)?;
            zip.write_all(&fs::read(&presentation)?)?;
        }

        for sub in ["audio", "transcripts"] {
            let dir = session_dir.join(sub);
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            let mut files: Vec<PathBuf> = entries.flatten().map(|e| e.path()).filter(|p| p.is_file()).collect();
            files.sort();
            for path in files {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                zip.start_file(format!("{}/{}", sub, name), options)?;
                zip.write_all(&fs::read(&path)?)?;
            }
        }

        zip.finish()?;
        info!(session_id, path = %export_path.display(), "Exported course session");
        Ok(export_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::fixtures::sample_record;
    use std::io::Read;
    use tempfile::TempDir;

    fn store() -> (TempDir, CourseStore) {
        let dir = TempDir::new().unwrap();
        let store = CourseStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_layout_is_created() {
        let (dir, store) = store();
        assert!(dir.path().join("sessions").is_dir());
        assert!(dir.path().join("exports").is_dir());
        let dirs = store.session_dirs("abc").unwrap();
        assert!(dirs.audio.is_dir());
        assert!(dirs.logs.ends_with("sessions/abc/logs"));
    }

    #[test]
    fn test_rejects_unsafe_session_ids() {
        let (_dir, store) = store();
        assert!(store.session_dir("../etc").is_err());
        assert!(store.session_dir("").is_err());
        assert!(store.session_dir("a/b").is_err());
    }

    #[test]
    fn test_save_load_and_index() {
        let (dir, store) = store();
        let record = store.save_presentation(sample_record("s1")).unwrap();
        assert_eq!(record.transcript_files.len(), 3);
        assert_eq!(record.transcript_files[0], "sessions/s1/transcripts/slide_01.txt");

        let loaded = store.load_course_session("s1").unwrap().unwrap();
        assert_eq!(loaded.slides.len(), 3);
        assert!(store.load_course_session("missing").unwrap().is_none());

        let metadata = store.course_metadata("s1").unwrap();
        assert_eq!(metadata.slide_count, 3);
        assert!(metadata.file_size > 0);
        assert!(metadata.tags.contains(&"programming".to_string()));
        assert!(metadata.tags.contains(&"level-beginner".to_string()));

        let reopened = CourseStore::new(dir.path()).unwrap();
        assert!(reopened.course_metadata("s1").is_some());
    }

    #[test]
    fn test_list_courses_sort_filter_limit() {
        let (_dir, store) = store();
        let mut first = sample_record("a");
        first.request.topic = "Web design".to_string();
        first.created_at = Utc::now() - chrono::Duration::hours(1);
        store.save_course_session(&first).unwrap();
        store.save_course_session(&sample_record("b")).unwrap();

        let all = store.list_courses(&CourseQuery::default());
        assert_eq!(all[0].session_id, "b");

        let topic = store.list_courses(&CourseQuery {
            topic: Some("WEB".to_string()),
            ..Default::default()
        });
        assert_eq!(topic.len(), 1);
        assert_eq!(topic[0].session_id, "a");

        let tagged = store.list_courses(&CourseQuery {
            tags: vec!["design".to_string()],
            ..Default::default()
        });
        assert_eq!(tagged.len(), 1);

        let limited = store.list_courses(&CourseQuery {
            sort_by: CourseSort::Topic,
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(limited[0].topic, "Rust programming");
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_delete_course() {
        let (dir, store) = store();
        store.save_course_session(&sample_record("s1")).unwrap();
        assert!(store.delete_course_session("s1").unwrap());
        assert!(!dir.path().join("sessions/s1").exists());
        assert!(!store.delete_course_session("s1").unwrap());
    }

    #[test]
    fn test_interaction_logs_and_summary() {
        let (_dir, store) = store();
        let request = serde_json::json!({"prompt": "hi"});
        store
            .save_ai_interaction_log(&AiInteraction::success("s1", "course_structure", "m", request.clone(), "{}", 1.5, Some(100)))
            .unwrap();
        store
            .save_ai_interaction_log(&AiInteraction::failure("s1", "slide_generation", "m", request, "boom", 0.5))
            .unwrap();

        let logs = store.session_logs("s1").unwrap();
        assert_eq!(logs.len(), 2);
        let summary = log_summary(&logs);
        assert_eq!(summary.total_api_calls, 2);
        assert_eq!(summary.total_tokens_used, 100);
        assert_eq!(summary.average_processing_time, 1.0);
        assert_eq!(summary.success_rate, 50.0);
        assert_eq!(summary.stages_covered, vec!["course_structure", "slide_generation"]);
    }

    #[test]
    fn test_session_transcripts() {
        let (_dir, store) = store();
        store.save_transcripts("s1", &sample_record("s1").slides).unwrap();
        let transcripts = store.session_transcripts("s1").unwrap();
        assert_eq!(transcripts.len(), 3);
        assert_eq!(transcripts[1].slide_number, 2);
        assert!(matches!(store.session_transcripts("nope"), Err(CourseError::NotFound(_))));
    }

    #[test]
    fn test_resolve_data_path() {
        let (dir, store) = store();
        assert_eq!(
            store.resolve_data_path("sessions/s1/audio/slide_01.wav").unwrap(),
            dir.path().join("sessions/s1/audio/slide_01.wav")
        );
        assert!(store.resolve_data_path("../secret").is_err());
        assert!(store.resolve_data_path("/etc/passwd").is_err());
        assert!(store.resolve_data_path("").is_err());
    }

    #[test]
    fn test_upload_and_file_info() {
        let (_dir, store) = store();
        let upload = store.upload_to_temp("../notes.txt", b"hello").unwrap();
        assert!(upload.filename.ends_with("_notes.txt"));
        assert!(upload.path.starts_with("temp/"));

        let info = store.file_info(&upload.path).unwrap();
        assert!(info.exists);
        assert_eq!(info.size, 5);
        assert_eq!(info.extension, ".txt");
        assert!(!store.file_info("temp/none.bin").unwrap().exists);
    }

    #[test]
    fn test_cleanup_removes_expired_temp_files() {
        let (dir, store) = store();
        fs::write(dir.path().join("temp/old.bin"), b"x").unwrap();
        fs::create_dir(dir.path().join("temp/empty")).unwrap();
        assert_eq!(store.cleanup_old_files(0).unwrap(), 2);
        assert_eq!(store.storage_stats().directories["temp"].file_count, 0);
    }

    #[test]
    fn test_import_assigns_new_session() {
        let (_dir, store) = store();
        let mut record = sample_record("orig");
        record.presentation_file = Some("sessions/orig/presentation.pptx".to_string());
        let bytes = serde_json::to_vec(&record).unwrap();

        let id = store.import_course_json(&bytes).unwrap();
        assert_ne!(id, "orig");
        let imported = store.load_course_session(&id).unwrap().unwrap();
        assert!(imported.presentation_file.is_none());
        assert!(store.course_metadata(&id).unwrap().imported_at.is_some());

        assert!(matches!(store.import_course_json(b"{"), Err(CourseError::ValidationError(_))));
    }

    #[test]
    fn test_export_zip_contents() {
        let (_dir, store) = store();
        store.save_presentation(sample_record("s1")).unwrap();
        fs::write(store.presentation_path("s1").unwrap(), b"pptx").unwrap();

        let path = store.export_course_zip("s1").unwrap();
        let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert!(names.contains(&"course.json".to_string()));
        assert!(names.contains(&"presentation.pptx".to_string()));
        assert!(names.contains(&"transcripts/slide_01.txt".to_string()));

        let mut content = String::new();
        archive.by_name("metadata.json").unwrap().read_to_string(&mut content).unwrap();
        assert!(content.contains("\"session_id\": \"s1\""));

        assert!(matches!(store.export_course_zip("missing"), Err(CourseError::NotFound(_))));
    }

    #[test]
    fn test_course_tags() {
        assert_eq!(course_tags("Intro to AI", "advanced", 45), vec!["ai", "level-advanced", "long"]);
        assert_eq!(course_tags("Maintaining gardens", "beginner", 12), vec!["level-beginner", "medium"]);
    }
}
