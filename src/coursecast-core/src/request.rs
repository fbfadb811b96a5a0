//! Course generation request and its option enums.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::CourseError;

/// How much prior knowledge the course assumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Beginner,
    Intermediate,
    Advanced,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Beginner => "beginner",
            Complexity::Intermediate => "intermediate",
            Complexity::Advanced => "advanced",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningStyle {
    Visual,
    Auditory,
    Mixed,
}

impl LearningStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStyle::Visual => "visual",
            LearningStyle::Auditory => "auditory",
            LearningStyle::Mixed => "mixed",
        }
    }
}

impl fmt::Display for LearningStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount of material packed onto each slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentDensity {
    Low,
    #[default]
    Medium,
    High,
}

impl ContentDensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentDensity::Low => "low",
            ContentDensity::Medium => "medium",
            ContentDensity::High => "high",
        }
    }
}

impl fmt::Display for ContentDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target slide count: chosen by the model, or an exact number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlideCount {
    #[default]
    Auto,
    Exact(u32),
}

impl fmt::Display for SlideCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlideCount::Auto => f.write_str("auto"),
            SlideCount::Exact(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for SlideCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SlideCount::Auto => serializer.serialize_str("auto"),
            SlideCount::Exact(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for SlideCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(0) => Ok(SlideCount::Auto),
            Raw::Number(n) => Ok(SlideCount::Exact(n)),
            Raw::Text(s) => {
                let s = s.trim();
                if s.is_empty() || s.eq_ignore_ascii_case("auto") {
                    return Ok(SlideCount::Auto);
                }
                s.parse::<u32>()
                    .map(|n| if n == 0 { SlideCount::Auto } else { SlideCount::Exact(n) })
                    .map_err(|_| serde::de::Error::custom(format!("invalid slide count '{}'", s)))
            }
        }
    }
}

/// Optional emphasis switches for the course structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Customizations {
    pub theoretical_focus: bool,
    pub practical_focus: bool,
    pub prerequisites_included: bool,
    pub specialized_focus: Option<String>,
}

impl Customizations {
    /// Labelled values for the ones that are switched on.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if self.theoretical_focus {
            out.push(("Theoretical Focus", "yes".to_string()));
        }
        if self.practical_focus {
            out.push(("Practical Focus", "yes".to_string()));
        }
        if self.prerequisites_included {
            out.push(("Prerequisites Included", "yes".to_string()));
        }
        if let Some(focus) = self.specialized_focus.as_deref().map(str::trim)
            && !focus.is_empty()
        {
            out.push(("Specialized Focus", focus.to_string()));
        }
        out
    }
}

fn default_batch_size() -> usize {
    5
}

fn default_voice() -> String {
    "default".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_theme() -> String {
    "default".to_string()
}

/// A request to generate a full course presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    pub topic: String,
    pub complexity: Complexity,
    pub duration: String,
    #[serde(alias = "learningStyle")]
    pub learning_style: LearningStyle,
    #[serde(default, alias = "slideCount")]
    pub slide_count: SlideCount,
    #[serde(default, alias = "contentDensity")]
    pub content_density: ContentDensity,
    #[serde(default = "default_batch_size", alias = "batchSize")]
    pub batch_size: usize,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub customizations: Customizations,
}

impl GenerationRequest {
    pub fn new(
        topic: impl Into<String>,
        complexity: Complexity,
        duration: impl Into<String>,
        learning_style: LearningStyle,
    ) -> Self {
        Self {
            session_id: None,
            topic: topic.into(),
            complexity,
            duration: duration.into(),
            learning_style,
            slide_count: SlideCount::Auto,
            content_density: ContentDensity::Medium,
            batch_size: default_batch_size(),
            voice: default_voice(),
            speed: default_speed(),
            theme: default_theme(),
            customizations: Customizations::default(),
        }
    }

    /// Parse a JSON request body, reporting every missing field at once.
    pub fn from_json(value: Value) -> Result<Self, CourseError> {
        let missing = missing_fields(&value);
        if !missing.is_empty() {
            return Err(CourseError::ValidationError(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let request: GenerationRequest = serde_json::from_value(value)
            .map_err(|e| CourseError::ValidationError(e.to_string()))?;
        request.normalized().validated()
    }

    /// Clamp numeric options into their supported ranges.
    pub fn normalized(mut self) -> Self {
        self.topic = self.topic.trim().to_string();
        self.duration = self.duration.trim().to_string();
        self.batch_size = self.batch_size.clamp(1, 10);
        if !self.speed.is_finite() {
            self.speed = default_speed();
        }
        self.speed = self.speed.clamp(0.5, 2.0);
        if self.voice.trim().is_empty() {
            self.voice = default_voice();
        }
        self
    }

    pub fn validated(self) -> Result<Self, CourseError> {
        if self.topic.is_empty() {
            return Err(CourseError::ValidationError("Topic cannot be empty".to_string()));
        }
        if self.duration.is_empty() {
            return Err(CourseError::ValidationError("Duration cannot be empty".to_string()));
        }
        Ok(self)
    }
}

/// Names of required fields that are absent or empty in a raw request body.
pub fn missing_fields(value: &Value) -> Vec<String> {
    let present = |key: &str| match value.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    };

    let mut missing: Vec<String> = ["topic", "complexity", "duration"]
        .iter()
        .filter(|field| !present(field))
        .map(|field| field.to_string())
        .collect();

    if !present("learning_style") && !present("learningStyle") {
        missing.push("learning_style (or learningStyle)".to_string());
    }

    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_camel_case_aliases() {
        let request = GenerationRequest::from_json(json!({
            "topic": "Rust ownership",
            "complexity": "intermediate",
            "duration": "20 slides",
            "learningStyle": "visual",
            "slideCount": "20",
            "contentDensity": "high",
            "batchSize": 3
        }))
        .unwrap();

        assert_eq!(request.learning_style, LearningStyle::Visual);
        assert_eq!(request.slide_count, SlideCount::Exact(20));
        assert_eq!(request.content_density, ContentDensity::High);
        assert_eq!(request.batch_size, 3);
        assert_eq!(request.voice, "default");
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        let err = GenerationRequest::from_json(json!({ "topic": "  ", "duration": "1 hour" }))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("topic"));
        assert!(message.contains("complexity"));
        assert!(message.contains("learning_style (or learningStyle)"));
        assert!(!message.contains("duration"));
    }

    #[test]
    fn test_slide_count_forms() {
        let parse = |v: Value| serde_json::from_value::<SlideCount>(v).unwrap();
        assert_eq!(parse(json!("auto")), SlideCount::Auto);
        assert_eq!(parse(json!("AUTO")), SlideCount::Auto);
        assert_eq!(parse(json!(12)), SlideCount::Exact(12));
        assert_eq!(parse(json!("7")), SlideCount::Exact(7));
        assert!(serde_json::from_value::<SlideCount>(json!("many")).is_err());
    }

    #[test]
    fn test_options_are_clamped() {
        let request = GenerationRequest::from_json(json!({
            "topic": "Graphs",
            "complexity": "advanced",
            "duration": "45 minutes",
            "learning_style": "mixed",
            "batch_size": 40,
            "speed": 9.0
        }))
        .unwrap();

        assert_eq!(request.batch_size, 10);
        assert_eq!(request.speed, 2.0);
    }

    #[test]
    fn test_unknown_complexity_is_rejected() {
        let err = GenerationRequest::from_json(json!({
            "topic": "Graphs",
            "complexity": "expert",
            "duration": "45 minutes",
            "learning_style": "mixed"
        }))
        .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_customization_entries() {
        let custom = Customizations {
            practical_focus: true,
            specialized_focus: Some("embedded systems".to_string()),
            ..Default::default()
        };
        let entries = custom.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], ("Specialized Focus", "embedded systems".to_string()));
    }
}
