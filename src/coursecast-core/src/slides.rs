//! Slide content generation: narration transcript, layout and image specs per slide.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::course::{lenient_lines, lenient_opt_string, lenient_string, lenient_u32};
use crate::error::CourseError;
use crate::llm::{CompletionRequest, RateLimiter, TextModel, complete_logged, parse_json_reply};
use crate::planner::{PlannedSlide, PresentationPlan};
use crate::store::CourseStore;

/// Position and size in inches on a 10 x 7.5 slide.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the box has a usable size.
    pub fn is_sized(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Formatting {
    #[serde(default, alias = "size")]
    pub font_size: Option<f64>,
    #[serde(default)]
    pub font_name: Option<String>,
    #[serde(default)]
    pub bold: Option<bool>,
    #[serde(default)]
    pub italic: Option<bool>,
    /// `#RRGGBB`, `{"rgb": [r, g, b]}` or `[r, g, b]`.
    #[serde(default)]
    pub color: Option<Value>,
    #[serde(default)]
    pub fill_color: Option<Value>,
    #[serde(default)]
    pub alignment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Title,
    Textbox,
    Bullet,
    Image,
    Shape,
    Chart,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutElement {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(default)]
    pub position: Option<Position>,
    /// Text; list content arrives one item per line.
    #[serde(default, deserialize_with = "lenient_lines")]
    pub content: String,
    #[serde(default)]
    pub formatting: Formatting,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub shape_type: Option<String>,
}

impl LayoutElement {
    pub fn new(kind: ElementKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            position: None,
            content: content.into(),
            formatting: Formatting::default(),
            shape_type: None,
        }
    }
}

fn default_layout_type() -> String {
    "content_slide".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideLayout {
    #[serde(default = "default_layout_type", deserialize_with = "lenient_string")]
    pub slide_type: String,
    #[serde(default)]
    pub background_color: Option<Value>,
    #[serde(default)]
    pub elements: Vec<LayoutElement>,
}

impl Default for SlideLayout {
    fn default() -> Self {
        Self {
            slide_type: default_layout_type(),
            background_color: None,
            elements: Vec::new(),
        }
    }
}

/// An image the slide asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub alt_text: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideContent {
    #[serde(deserialize_with = "lenient_u32")]
    pub slide_number: u32,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub transcript: String,
    #[serde(default)]
    pub layout: SlideLayout,
    #[serde(default)]
    pub images: Vec<ImageSpec>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub visual_notes: String,
}

impl SlideContent {
    /// Slide built from the plan alone when the model skipped it.
    pub fn from_plan(planned: &PlannedSlide) -> Self {
        Self {
            slide_number: planned.slide_number,
            title: planned.title.clone(),
            transcript: clean_transcript_for_tts(&fallback_transcript(planned)),
            layout: SlideLayout {
                slide_type: format!("{}_slide", planned.slide_type),
                ..SlideLayout::default()
            },
            images: Vec::new(),
            visual_notes: planned.visual_suggestions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlidesSummary {
    pub total_slides: usize,
    pub total_transcript_words: usize,
    pub estimated_audio_duration_minutes: f64,
    pub total_textboxes: usize,
    pub total_images: usize,
    pub average_words_per_slide: f64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn summarize(slides: &[SlideContent]) -> SlidesSummary {
    let words: usize = slides
        .iter()
        .map(|s| s.transcript.split_whitespace().count())
        .sum();
    let textboxes = slides
        .iter()
        .flat_map(|s| s.layout.elements.iter())
        .filter(|e| e.kind == ElementKind::Textbox)
        .count();

    SlidesSummary {
        total_slides: slides.len(),
        total_transcript_words: words,
        estimated_audio_duration_minutes: round1(words as f64 / 150.0),
        total_textboxes: textboxes,
        total_images: slides.iter().map(|s| s.images.len()).sum(),
        average_words_per_slide: if slides.is_empty() {
            0.0
        } else {
            round1(words as f64 / slides.len() as f64)
        },
    }
}

/// Narration used when a slide has no generated transcript.
pub fn fallback_transcript(planned: &PlannedSlide) -> String {
    let mut text = if !planned.content_brief.trim().is_empty() {
        planned.content_brief.trim().to_string()
    } else if !planned.main_points.is_empty() {
        format!("In this slide we cover {}.", planned.main_points.join(", "))
    } else {
        format!("This slide covers {}.", planned.title)
    };

    let note = planned.transition_note.trim();
    if !note.is_empty() && note != "End of presentation." {
        text.push(' ');
        text.push_str(note);
    }
    text
}

/// Remove markup and spell out symbols so the narration reads cleanly.
pub fn clean_transcript_for_tts(transcript: &str) -> String {
    let mut cleaned: String = transcript
        .chars()
        .filter(|c| !matches!(c, '*' | '#' | '_' | '`'))
        .collect();

    for (symbol, word) in [("&", " and "), ("%", " percent"), ("@", " at "), ("$", " dollars ")] {
        cleaned = cleaned.replace(symbol, word);
    }

    if let Ok(ws) = Regex::new(r"\s+") {
        cleaned = ws.replace_all(&cleaned, " ").to_string();
    }
    if let Ok(sentence) = Regex::new(r"([.!?])([A-Z])") {
        cleaned = sentence.replace_all(&cleaned, "$1 $2").to_string();
    }
    cleaned.trim().to_string()
}

const SYSTEM_INSTRUCTION: &str = r#"You are an expert educational content creator. Write the narration, layout and visual elements for presentation slides.

OUTPUT FORMAT:
Respond with a JSON array. Each slide object has:
- slide_number
- title
- transcript: spoken narration as plain text
- layout: object with
  - slide_type: title_slide, content_slide, comparison_slide, ...
  - background_color: "#RRGGBB"
  - elements: array of {type: title|textbox|bullet|shape|chart, position: {x, y, width, height} in inches, content, formatting: {font_size, bold, italic, color, alignment}, shape_type}
- images: array of {position: {x, y, width, height}, description, alt_text, caption}
- visual_notes: extra design notes

TRANSCRIPT RULES:
- Conversational teacher tone, written to be heard
- Explain the slide instead of reading it
- Describe formulas in words
- No markdown or special characters
- 150-250 words per slide

LAYOUT RULES:
- Slides are 10 x 7.5 inches
- Elements must not overlap
- Body text at least 16pt

Output ONLY the JSON array."#;

pub fn build_batch_prompt(batch: &[PlannedSlide], presentation_title: &str, start_number: u32) -> String {
    let mut prompt = format!(
        "Generate slide content for the following slides from the presentation \"{}\".\n\nSLIDES TO GENERATE:\n",
        presentation_title
    );

    for (i, slide) in batch.iter().enumerate() {
        let estimated = if slide.estimated_time.is_empty() {
            "2 minutes"
        } else {
            slide.estimated_time.as_str()
        };
        let visuals = if slide.visual_suggestions.is_empty() {
            "Standard educational visuals"
        } else {
            slide.visual_suggestions.as_str()
        };
        prompt.push_str(&format!(
            "\nSlide {}:\n- Title: {}\n- Type: {}\n- Content Brief: {}\n- Main Points: {}\n- Estimated Time: {}\n- Visual Suggestions: {}\n",
            start_number + i as u32,
            slide.title,
            slide.slide_type,
            slide.content_brief,
            slide.main_points.join(", "),
            estimated,
            visuals
        ));
    }

    prompt.push_str("\nKeep the narrative flowing from slide to slide.\n\nRespond with a valid JSON array only.");
    prompt
}

/// Parse one batch reply and line it up with the planned slides.
///
/// Slides are renumbered from `start_number`. Planned slides the model left
/// out are filled from the plan, and extra slides are dropped.
pub fn parse_batch_response(
    text: &str,
    batch: &[PlannedSlide],
    start_number: u32,
) -> Result<Vec<SlideContent>, CourseError> {
    let value = parse_json_reply(text)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("slides") {
            Some(Value::Array(items)) => items,
            _ => vec![Value::Object(map)],
        },
        _ => {
            return Err(CourseError::ParseError(
                "Response must be a JSON array of slides".to_string(),
            ));
        }
    };

    let mut slides = Vec::with_capacity(batch.len());
    for (i, item) in items.into_iter().enumerate().take(batch.len()) {
        for field in ["slide_number", "title", "transcript", "layout"] {
            if item.get(field).is_none() {
                return Err(CourseError::ParseError(format!(
                    "Missing required field '{}' in slide {}",
                    field,
                    i + 1
                )));
            }
        }

        let mut slide: SlideContent = serde_json::from_value(item)
            .map_err(|e| CourseError::ParseError(format!("Invalid slide {}: {}", i + 1, e)))?;
        slide.slide_number = start_number + i as u32;
        slide.transcript = clean_transcript_for_tts(&slide.transcript);
        if slide.transcript.is_empty() {
            slide.transcript = clean_transcript_for_tts(&fallback_transcript(&batch[i]));
        }
        slides.push(slide);
    }

    for (i, planned) in batch.iter().enumerate().skip(slides.len()) {
        warn!(slide = start_number + i as u32, "model skipped slide, using plan");
        let mut slide = SlideContent::from_plan(planned);
        slide.slide_number = start_number + i as u32;
        slides.push(slide);
    }

    Ok(slides)
}

/// Generates slide content in rate-limited batches.
pub struct SlideGenerator {
    model: Arc<dyn TextModel>,
    model_name: String,
    store: Option<Arc<CourseStore>>,
    limiter: Arc<RateLimiter>,
}

impl SlideGenerator {
    pub fn new(model: Arc<dyn TextModel>, model_name: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            store: None,
            limiter,
        }
    }

    pub fn with_store(mut self, store: Arc<CourseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Generate every planned slide. `on_progress` receives 0-100 after each batch.
    pub async fn generate_all<F>(
        &self,
        session_id: &str,
        plan: &PresentationPlan,
        batch_size: usize,
        on_progress: F,
    ) -> Result<Vec<SlideContent>, CourseError>
    where
        F: Fn(f32) + Send + Sync,
    {
        let batch_size = batch_size.clamp(1, 10);
        let total = plan.slides.len();
        let mut generated = Vec::with_capacity(total);

        info!(session_id, total, batch_size, "generating slide content");

        for batch in plan.slides.chunks(batch_size) {
            self.limiter.acquire().await;

            let start_number = generated.len() as u32 + 1;
            let end_number = start_number + batch.len() as u32 - 1;
            let completion = complete_logged(
                self.model.as_ref(),
                self.store.as_deref(),
                session_id,
                &format!("slide_generation_batch_{}-{}", start_number, end_number),
                CompletionRequest::new(
                    &self.model_name,
                    SYSTEM_INSTRUCTION,
                    build_batch_prompt(batch, &plan.presentation_title, start_number),
                ),
            )
            .await?;

            generated.extend(parse_batch_response(&completion.text, batch, start_number)?);
            on_progress(generated.len() as f32 / total.max(1) as f32 * 100.0);
            info!(session_id, "generated slides {}-{} ({}/{})", start_number, end_number, generated.len(), total);
        }

        Ok(generated)
    }
}
