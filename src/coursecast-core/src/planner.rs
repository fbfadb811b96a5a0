//! Presentation planning: flattens a course structure into an ordered slide plan.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::course::{leading_number, lenient_string, lenient_strings, lenient_u32};
use crate::error::CourseError;
use crate::llm::{CompletionRequest, TextModel, complete_logged, parse_json_reply};
use crate::outline::CourseStructure;
use crate::request::{ContentDensity, SlideCount};
use crate::store::CourseStore;

const DEFAULT_SLIDE_MINUTES: f64 = 2.0;

fn default_slide_type() -> String {
    "content".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSlide {
    #[serde(deserialize_with = "lenient_u32")]
    pub slide_number: u32,
    #[serde(default = "default_slide_type", deserialize_with = "lenient_string")]
    pub slide_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub content_brief: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub main_points: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub estimated_time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub transition_note: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub visual_suggestions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationPlan {
    #[serde(deserialize_with = "lenient_string")]
    pub presentation_title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub presentation_description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub estimated_duration: String,
    pub slides: Vec<PlannedSlide>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub presentation_title: String,
    pub total_slides: usize,
    pub slide_types: BTreeMap<String, usize>,
    pub estimated_minutes: f64,
}

impl PresentationPlan {
    pub fn summary(&self) -> PlanSummary {
        let mut slide_types = BTreeMap::new();
        for slide in &self.slides {
            *slide_types.entry(slide.slide_type.clone()).or_insert(0) += 1;
        }

        PlanSummary {
            presentation_title: self.presentation_title.clone(),
            total_slides: self.slides.len(),
            slide_types,
            estimated_minutes: self
                .slides
                .iter()
                .map(|s| leading_number(&s.estimated_time).unwrap_or(DEFAULT_SLIDE_MINUTES))
                .sum(),
        }
    }
}

const BASE_INSTRUCTION: &str = r#"You are an expert presentation designer for educational content. Convert hierarchical course structures into a sequential slide plan that works for both on-screen display and narration.

OUTPUT FORMAT:
Respond with a single JSON object containing:
- presentation_title
- presentation_description
- estimated_duration
- slides: array of objects with
  - slide_number: sequential, starting at 1
  - slide_type: intro, content, transition, summary or conclusion
  - title
  - content_brief: 2-3 sentences describing the slide
  - main_points: array of key points
  - estimated_time: minutes for the slide
  - transition_note: how it leads into the next slide
  - visual_suggestions: images or diagrams that would help

DESIGN PRINCIPLES:
1. Open with context and expectations
2. Build each slide on the previous ones
3. Use transitions between major topics
4. Close by reinforcing the learning outcomes"#;

fn slide_count_instruction(slide_count: SlideCount) -> String {
    match slide_count {
        SlideCount::Auto => "SLIDE COUNT: AUTOMATIC\n- Choose the count from the depth of the content\n- Typical range is 15-40 slides\n- Give each major topic 3-8 slides".to_string(),
        SlideCount::Exact(n) => format!(
            "SLIDE COUNT: {n} SLIDES\n- Fit the content into exactly {n} slides\n- Distribute content evenly\n- Condense to the most important concepts if needed"
        ),
    }
}

fn density_instruction(density: ContentDensity) -> &'static str {
    match density {
        ContentDensity::Low => {
            "CONTENT DENSITY: LOW\n- One main concept per slide\n- More introduction, transition and summary slides"
        }
        ContentDensity::Medium => {
            "CONTENT DENSITY: MEDIUM\n- One or two related concepts per slide\n- Standard pacing"
        }
        ContentDensity::High => {
            "CONTENT DENSITY: HIGH\n- Several related concepts per slide\n- Faster pacing with less repetition"
        }
    }
}

pub fn build_system_instruction(slide_count: SlideCount, density: ContentDensity) -> String {
    format!(
        "{}\n\n{}\n\n{}\n\nOutput ONLY valid JSON. No extra text.",
        BASE_INSTRUCTION,
        slide_count_instruction(slide_count),
        density_instruction(density)
    )
}

pub fn build_prompt(
    structure: &CourseStructure,
    slide_count: SlideCount,
    density: ContentDensity,
) -> Result<String, CourseError> {
    let mut outline = structure.clone();
    outline.metadata = None;
    let outline_json = serde_json::to_string_pretty(&outline)?;

    Ok(format!(
        "Convert the following course structure into a sequential presentation plan.\n\nCOURSE: {}\nTARGET SLIDES: {}\nCONTENT DENSITY: {}\n\nCOURSE STRUCTURE:\n{}\n\nRespond with valid JSON only.",
        structure.course_title, slide_count, density, outline_json
    ))
}

/// Parse and validate a plan reply, renumbering slides from 1.
pub fn parse_presentation_plan(text: &str) -> Result<PresentationPlan, CourseError> {
    let value = parse_json_reply(text)?;

    for field in ["presentation_title", "slides"] {
        if value.get(field).is_none() {
            return Err(CourseError::ParseError(format!("Missing required field: {}", field)));
        }
    }

    let slides = value
        .get("slides")
        .and_then(Value::as_array)
        .ok_or_else(|| CourseError::ParseError("slides must be an array".to_string()))?;
    if slides.is_empty() {
        return Err(CourseError::ParseError("Presentation plan has no slides".to_string()));
    }
    for (i, slide) in slides.iter().enumerate() {
        for field in ["slide_number", "title", "content_brief"] {
            if slide.get(field).is_none() {
                return Err(CourseError::ParseError(format!(
                    "Missing required field '{}' in slide {}",
                    field,
                    i + 1
                )));
            }
        }
    }

    let mut plan: PresentationPlan = serde_json::from_value(value)
        .map_err(|e| CourseError::ParseError(format!("Invalid presentation plan: {}", e)))?;
    for (i, slide) in plan.slides.iter_mut().enumerate() {
        slide.slide_number = i as u32 + 1;
    }
    Ok(plan)
}

/// Produces presentation plans with a chat model.
pub struct PresentationPlanner {
    model: Arc<dyn TextModel>,
    model_name: String,
    store: Option<Arc<CourseStore>>,
}

impl PresentationPlanner {
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

    pub async fn create_plan(
        &self,
        session_id: &str,
        structure: &CourseStructure,
        slide_count: SlideCount,
        density: ContentDensity,
    ) -> Result<PresentationPlan, CourseError> {
        info!(session_id, %slide_count, %density, "planning presentation");

        let completion = complete_logged(
            self.model.as_ref(),
            self.store.as_deref(),
            session_id,
            "presentation_planning",
            CompletionRequest::new(
                &self.model_name,
                build_system_instruction(slide_count, density),
                build_prompt(structure, slide_count, density)?,
            ),
        )
        .await?;

        let plan = parse_presentation_plan(&completion.text)?;
        info!(session_id, slides = plan.slides.len(), "presentation plan ready");
        Ok(plan)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const PLAN_REPLY: &str = r#"{
  "presentation_title": "Intro to Rust",
  "estimated_duration": "12 minutes",
  "slides": [
    {"slide_number": 1, "slide_type": "intro", "title": "Welcome", "content_brief": "What we will cover.", "estimated_time": "2 minutes", "transition_note": "Let's start with ownership."},
    {"slide_number": 5, "title": "Ownership", "content_brief": "Every value has one owner.", "main_points": ["moves", "drops"], "estimated_time": 4},
    {"slide_number": 9, "slide_type": "conclusion", "title": "Wrap up", "content_brief": "", "main_points": ["recap"], "transition_note": "End of presentation."}
  ]
}"#;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::outline::{fixtures::STRUCTURE_REPLY, parse_course_structure};

    #[test]
    fn test_parse_renumbers_slides() {
        let plan = parse_presentation_plan(fixtures::PLAN_REPLY).unwrap();
        let numbers: Vec<u32> = plan.slides.iter().map(|s| s.slide_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(plan.slides[1].slide_type, "content");
        assert_eq!(plan.slides[1].estimated_time, "4");
    }

    #[test]
    fn test_parse_requires_content_brief() {
        let err = parse_presentation_plan(
            r#"{"presentation_title": "x", "slides": [{"slide_number": 1, "title": "t"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("content_brief"));
    }

    #[test]
    fn test_summary_uses_default_minutes() {
        let plan = parse_presentation_plan(fixtures::PLAN_REPLY).unwrap();
        let summary = plan.summary();
        assert_eq!(summary.total_slides, 3);
        assert_eq!(summary.slide_types.get("content"), Some(&1));
        assert_eq!(summary.estimated_minutes, 2.0 + 4.0 + 2.0);
    }

    #[test]
    fn test_instruction_variants() {
        assert!(build_system_instruction(SlideCount::Exact(12), ContentDensity::Low)
            .contains("exactly 12 slides"));
        assert!(build_system_instruction(SlideCount::Auto, ContentDensity::High)
            .contains("AUTOMATIC"));
    }

    #[tokio::test]
    async fn test_create_plan_sends_structure() {
        let structure = parse_course_structure(STRUCTURE_REPLY).unwrap();
        let model = Arc::new(ScriptedModel::new([fixtures::PLAN_REPLY]));
        let planner = PresentationPlanner::new(model.clone(), "planner");

        let plan = planner
            .create_plan("s1", &structure, SlideCount::Auto, ContentDensity::Medium)
            .await
            .unwrap();
        assert_eq!(plan.slides.len(), 3);

        let requests = model.requests.lock().unwrap();
        assert!(requests[0].messages[0].content.contains("Ownership"));
    }
}
