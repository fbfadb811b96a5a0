//! User preferences stored beside the course data, and built-in course templates.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CourseError;
use crate::request::{Complexity, ContentDensity, LearningStyle};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub voice: String,
    pub speed: f32,
    pub volume: f32,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            voice: "default".to_string(),
            speed: 1.0,
            volume: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationSettings {
    pub theme: String,
    pub layout: String,
    pub animations: bool,
    pub auto_advance: bool,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            layout: "modern".to_string(),
            animations: true,
            auto_advance: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseDefaults {
    pub complexity: Complexity,
    pub duration: String,
    pub learning_style: LearningStyle,
    pub content_density: ContentDensity,
    pub batch_size: usize,
}

impl Default for CourseDefaults {
    fn default() -> Self {
        Self {
            complexity: Complexity::Intermediate,
            duration: "45-60 minutes".to_string(),
            learning_style: LearningStyle::Visual,
            content_density: ContentDensity::Medium,
            batch_size: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub prerequisites_handling: String,
    pub specialized_focus: String,
    pub presentation_style: String,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            prerequisites_handling: "auto".to_string(),
            specialized_focus: "balanced".to_string(),
            presentation_style: "professional".to_string(),
        }
    }
}

/// Preferences edited in the settings screen.
///
/// Keys this version does not know are preserved on save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub tts: TtsSettings,
    pub presentation: PresentationSettings,
    pub course_defaults: CourseDefaults,
    pub advanced: AdvancedSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}

/// Stored settings, or the defaults when none were saved.
pub fn load_settings(data_dir: &Path) -> Result<UserSettings, CourseError> {
    let path = settings_path(data_dir);
    if !path.exists() {
        debug!("no saved settings, using defaults");
        return Ok(UserSettings::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_settings(data_dir: &Path, settings: &UserSettings) -> Result<(), CourseError> {
    fs::create_dir_all(data_dir)?;
    fs::write(settings_path(data_dir), serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub duration: String,
    pub complexity: Complexity,
    pub prerequisites: Vec<String>,
    pub focus_areas: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
fn template(
    id: &str,
    name: &str,
    description: &str,
    category: &str,
    duration: &str,
    complexity: Complexity,
    prerequisites: &[&str],
    focus_areas: &[&str],
) -> CourseTemplate {
    CourseTemplate {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        duration: duration.to_string(),
        complexity,
        prerequisites: prerequisites.iter().map(|s| s.to_string()).collect(),
        focus_areas: focus_areas.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn course_templates() -> Vec<CourseTemplate> {
    vec![
        template(
            "math_fundamentals",
            "Mathematics Fundamentals",
            "Basic mathematical concepts and operations",
            "mathematics",
            "45-60 minutes",
            Complexity::Beginner,
            &[],
            &["arithmetic", "algebra", "geometry"],
        ),
        template(
            "programming_intro",
            "Introduction to Programming",
            "Programming basics with practical examples",
            "computer_science",
            "60+ minutes",
            Complexity::Beginner,
            &[],
            &["syntax", "logic", "problem_solving"],
        ),
        template(
            "history_overview",
            "Historical Overview",
            "Comprehensive historical analysis",
            "history",
            "45-60 minutes",
            Complexity::Intermediate,
            &["basic_chronology"],
            &["timeline", "causes", "effects"],
        ),
        template(
            "science_exploration",
            "Scientific Exploration",
            "Scientific method and discoveries",
            "science",
            "45-60 minutes",
            Complexity::Intermediate,
            &["basic_math"],
            &["hypothesis", "experimentation", "analysis"],
        ),
        template(
            "business_basics",
            "Business Fundamentals",
            "Essential business concepts and practices",
            "business",
            "60+ minutes",
            Complexity::Intermediate,
            &[],
            &["strategy", "marketing", "finance"],
        ),
    ]
}
