//! Course structure generation.
//!
//! Turns a [`GenerationRequest`] into a hierarchy of topics, subtopics and
//! learning units that the planner later flattens into slides.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::course::{lenient_opt_string, lenient_string, lenient_strings};
use crate::error::CourseError;
use crate::llm::{CompletionRequest, TextModel, complete_logged, parse_json_reply};
use crate::request::{Complexity, GenerationRequest, LearningStyle};
use crate::store::CourseStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub learning_units: Vec<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub estimated_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainTopic {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    pub subtopics: Vec<Subtopic>,
}

/// Where and how a structure was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureMetadata {
    pub topic: String,
    pub complexity: Complexity,
    pub duration: String,
    pub learning_style: LearningStyle,
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseStructure {
    #[serde(deserialize_with = "lenient_string")]
    pub course_title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub course_description: String,
    pub main_topics: Vec<MainTopic>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub total_estimated_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub prerequisites: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub learning_outcomes: Vec<String>,
    #[serde(default)]
    pub metadata: Option<StructureMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureSummary {
    pub course_title: String,
    pub main_topics_count: usize,
    pub subtopics_count: usize,
    pub learning_units_count: usize,
    pub estimated_duration: String,
}

impl CourseStructure {
    pub fn summary(&self) -> StructureSummary {
        let subtopics = self.main_topics.iter().flat_map(|t| t.subtopics.iter());
        StructureSummary {
            course_title: self.course_title.clone(),
            main_topics_count: self.main_topics.len(),
            subtopics_count: self.main_topics.iter().map(|t| t.subtopics.len()).sum(),
            learning_units_count: subtopics.map(|s| s.learning_units.len()).sum(),
            estimated_duration: self
                .total_estimated_time
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

const BASE_INSTRUCTION: &str = r#"You are an expert curriculum designer and university-level instructor. Build complete, well-structured course outlines.

RESPONSIBILITIES:
1. Produce a hierarchy of main topics, subtopics and granular learning units
2. Progress from foundational concepts to advanced applications
3. Scale depth and breadth to the requested complexity and duration

OUTPUT FORMAT:
Respond with a single JSON object containing:
- course_title: main course title
- course_description: what students will learn
- main_topics: array of objects with
  - title, description
  - subtopics: array of objects with title, description,
    learning_units (array of objectives) and estimated_time
- total_estimated_time: total course duration
- prerequisites: array of recommended prerequisites
- learning_outcomes: array of concrete outcomes"#;

fn complexity_instruction(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Beginner => {
            "COMPLEXITY LEVEL: BEGINNER\n- Start from fundamental concepts and basic terminology\n- Give background and context before detail\n- Use practical, real-world examples\n- Assume no prior knowledge"
        }
        Complexity::Intermediate => {
            "COMPLEXITY LEVEL: INTERMEDIATE\n- Assume familiarity with core concepts\n- Focus on practical application and deeper understanding\n- Connect concepts across topics\n- Work towards harder problem-solving scenarios"
        }
        Complexity::Advanced => {
            "COMPLEXITY LEVEL: ADVANCED\n- Assume strong foundations\n- Cover edge cases, advanced techniques and current research\n- Emphasise analysis and original application\n- Target professional-level competency"
        }
    }
}

fn learning_style_instruction(style: LearningStyle) -> &'static str {
    match style {
        LearningStyle::Visual => {
            "LEARNING STYLE: VISUAL\n- Favour topics that suit diagrams, charts and visual examples\n- Plan for flowcharts, infographics and visual comparisons"
        }
        LearningStyle::Auditory => {
            "LEARNING STYLE: AUDITORY\n- Structure content for spoken delivery\n- Plan for storytelling, analogies and verbal examples\n- Keep a clear logical flow for narration"
        }
        LearningStyle::Mixed => {
            "LEARNING STYLE: MIXED\n- Balance visual aids with strong verbal explanation\n- Vary presentation methods throughout the course"
        }
    }
}

fn duration_instruction(duration: &str) -> String {
    if duration.to_lowercase().contains("slide") {
        format!(
            "DURATION: {}\n- Fit the content to the slide count\n- Each main topic becomes roughly 3-6 slides\n- Each subtopic becomes 1-2 slides",
            duration
        )
    } else {
        format!(
            "DURATION: {}\n- Fit the content to the time frame\n- Balance depth and breadth for the duration\n- Give a time estimate for every subtopic",
            duration
        )
    }
}

/// System instruction for the structure model.
pub fn build_system_instruction(request: &GenerationRequest) -> String {
    let mut custom = String::new();
    let c = &request.customizations;
    if c.theoretical_focus {
        custom.push_str("\n- Emphasise theoretical foundations and conceptual understanding");
    }
    if c.practical_focus {
        custom.push_str("\n- Focus on practical applications and hands-on learning");
    }
    if c.prerequisites_included {
        custom.push_str("\n- Teach prerequisite concepts inside the course");
    }
    if let Some(focus) = c.specialized_focus.as_deref().filter(|f| !f.trim().is_empty()) {
        custom.push_str(&format!("\n- Specialise in: {}", focus.trim()));
    }

    format!(
        "{}\n\n{}\n\n{}\n\n{}\n{}\n\nQUALITY STANDARDS:\n- University-level rigour\n- Logical learning progression\n- Comprehensive coverage\n\nOutput ONLY valid JSON. No extra text.",
        BASE_INSTRUCTION,
        complexity_instruction(request.complexity),
        learning_style_instruction(request.learning_style),
        duration_instruction(&request.duration),
        custom
    )
}

/// User prompt for the structure model.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "Create a comprehensive course structure for the topic: \"{}\"\n\nREQUIREMENTS:\n- Complexity Level: {}\n- Duration/Scope: {}\n- Learning Style: {}",
        request.topic, request.complexity, request.duration, request.learning_style
    );

    let entries = request.customizations.entries();
    if !entries.is_empty() {
        prompt.push_str("\n\nADDITIONAL CUSTOMIZATIONS:");
        for (label, value) in entries {
            prompt.push_str(&format!("\n- {}: {}", label, value));
        }
    }

    prompt.push_str(
        "\n\nBuild the structure from foundational concepts up to advanced applications.\n\nRespond with valid JSON only.",
    );
    prompt
}

/// Parse and validate a structure reply.
pub fn parse_course_structure(text: &str) -> Result<CourseStructure, CourseError> {
    let value = parse_json_reply(text)?;

    for field in ["course_title", "main_topics"] {
        if value.get(field).is_none() {
            return Err(CourseError::ParseError(format!("Missing required field: {}", field)));
        }
    }

    let topics = value
        .get("main_topics")
        .and_then(Value::as_array)
        .ok_or_else(|| CourseError::ParseError("main_topics must be an array".to_string()))?;
    for topic in topics {
        if topic.get("title").is_none() || !topic.get("subtopics").is_some_and(Value::is_array) {
            return Err(CourseError::ParseError("Invalid main topic structure".to_string()));
        }
        for subtopic in topic["subtopics"].as_array().into_iter().flatten() {
            if subtopic.get("title").is_none() {
                return Err(CourseError::ParseError("Invalid subtopic structure".to_string()));
            }
        }
    }

    serde_json::from_value(value)
        .map_err(|e| CourseError::ParseError(format!("Invalid course structure: {}", e)))
}

/// Generates course structures with a chat model.
pub struct OutlineGenerator {
    model: Arc<dyn TextModel>,
    model_name: String,
    store: Option<Arc<CourseStore>>,
}

impl OutlineGenerator {
    pub fn new(model: Arc<dyn TextModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<CourseStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn generate(
        &self,
        session_id: &str,
        request: &GenerationRequest,
    ) -> Result<CourseStructure, CourseError> {
        info!(session_id, topic = %request.topic, "generating course structure");

        let completion = complete_logged(
            self.model.as_ref(),
            self.store.as_deref(),
            session_id,
            "course_structure",
            CompletionRequest::new(
                &self.model_name,
                build_system_instruction(request),
                build_prompt(request),
            ),
        )
        .await?;

        let mut structure = parse_course_structure(&completion.text)?;
        structure.metadata = Some(StructureMetadata {
            topic: request.topic.clone(),
            complexity: request.complexity,
            duration: request.duration.clone(),
            learning_style: request.learning_style,
            session_id: session_id.to_string(),
            generated_at: Utc::now(),
            model_used: self.model_name.clone(),
        });

        info!(
            session_id,
            main_topics = structure.main_topics.len(),
            "course structure ready"
        );
        Ok(structure)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const STRUCTURE_REPLY: &str = r#"```json
{
  "course_title": "Intro to Rust",
  "course_description": "Ownership and borrowing from first principles.",
  "main_topics": [
    {
      "title": "Ownership",
      "description": "Who owns what",
      "subtopics": [
        {"title": "Moves", "learning_units": ["move semantics", "Copy types"], "estimated_time": 10},
        {"title": "Drop", "learning_units": ["RAII"]}
      ]
    },
    {
      "title": "Borrowing",
      "subtopics": [{"title": "References", "learning_units": ["&T", "&mut T"]}]
    }
  ],
  "total_estimated_time": "45 minutes",
  "prerequisites": ["basic programming"],
  "learning_outcomes": ["write safe code"]
}
```"#;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::request::Customizations;

    fn request() -> GenerationRequest {
        GenerationRequest::new("Rust", Complexity::Beginner, "10 slides", LearningStyle::Visual)
    }

    #[test]
    fn test_system_instruction_variants() {
        let mut req = request();
        let text = build_system_instruction(&req);
        assert!(text.contains("BEGINNER"));
        assert!(text.contains("VISUAL"));
        assert!(text.contains("Each subtopic becomes 1-2 slides"));

        req.duration = "2 hours".to_string();
        req.customizations = Customizations {
            specialized_focus: Some("embedded".to_string()),
            ..Default::default()
        };
        let text = build_system_instruction(&req);
        assert!(text.contains("time estimate"));
        assert!(text.contains("Specialise in: embedded"));
    }

    #[test]
    fn test_prompt_lists_customizations() {
        let mut req = request();
        assert!(!build_prompt(&req).contains("ADDITIONAL CUSTOMIZATIONS"));
        req.customizations.practical_focus = true;
        assert!(build_prompt(&req).contains("- Practical Focus: yes"));
    }

    #[test]
    fn test_parse_and_summary() {
        let structure = parse_course_structure(fixtures::STRUCTURE_REPLY).unwrap();
        let summary = structure.summary();
        assert_eq!(summary.main_topics_count, 2);
        assert_eq!(summary.subtopics_count, 3);
        assert_eq!(summary.learning_units_count, 5);
        assert_eq!(structure.main_topics[0].subtopics[0].estimated_time.as_deref(), Some("10"));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let err = parse_course_structure(r#"{"course_title": "x"}"#).unwrap_err();
        assert!(err.to_string().contains("main_topics"));

        let err = parse_course_structure(
            r#"{"course_title": "x", "main_topics": [{"title": "t", "subtopics": [{"description": "d"}]}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("subtopic"));
    }

    #[tokio::test]
    async fn test_generate_attaches_metadata() {
        let model = Arc::new(ScriptedModel::new([fixtures::STRUCTURE_REPLY]));
        let generator = OutlineGenerator::new(model.clone(), "test-model");

        let structure = generator.generate("s1", &request()).await.unwrap();
        let metadata = structure.metadata.unwrap();
        assert_eq!(metadata.session_id, "s1");
        assert_eq!(metadata.model_used, "test-model");
        assert_eq!(model.request_count(), 1);
    }
}
