//! The assembled course and the lenient field decoders shared by model parsers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::images::SlideImages;
use crate::outline::CourseStructure;
use crate::planner::PresentationPlan;
use crate::request::GenerationRequest;
use crate::slides::SlideContent;

/// Everything produced for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseRecord {
    pub session_id: String,
    pub request: GenerationRequest,
    pub course_structure: CourseStructure,
    pub presentation_plan: PresentationPlan,
    pub slides: Vec<SlideContent>,
    #[serde(default)]
    pub images: Vec<SlideImages>,
    #[serde(default)]
    pub presentation_file: Option<String>,
    #[serde(default)]
    pub audio_files: Vec<Option<String>>,
    #[serde(default)]
    pub transcript_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub generation_time_secs: f64,
}

impl CourseRecord {
    pub fn title(&self) -> &str {
        if self.presentation_plan.presentation_title.is_empty() {
            &self.course_structure.course_title
        } else {
            &self.presentation_plan.presentation_title
        }
    }

    pub fn summary(&self) -> CourseSummary {
        CourseSummary {
            total_slides: self.slides.len(),
            total_images: self.images.iter().map(|s| s.images.len()).sum(),
            generation_time: format!("{:.2}s", self.generation_time_secs),
            presentation_file: self.presentation_file.clone(),
            audio_files_count: self.audio_files.iter().flatten().count(),
            transcript_files_count: self.transcript_files.len(),
        }
    }
}

/// Totals reported when generation completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub total_slides: usize,
    pub total_images: usize,
    pub generation_time: String,
    pub presentation_file: Option<String>,
    pub audio_files_count: usize,
    pub transcript_files_count: usize,
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(value_to_text).collect();
            Some(parts.join(", "))
        }
        Value::Object(map) => ["title", "text", "description", "content", "name"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()).map(str::to_string))
            .or_else(|| Some(Value::Object(map).to_string())),
    }
}

/// Accept a string, a number or an object with a text-like field.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

/// Like [`lenient_string`], but list items become separate lines.
pub(crate) fn lenient_lines<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(value_to_text)
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")),
        other => Ok(value_to_text(other).unwrap_or_default()),
    }
}

pub(crate) fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(deserializer)?).filter(|s| !s.is_empty()))
}

/// Accept a list of loosely typed items, or a single string.
pub(crate) fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(value_to_text).collect(),
        Value::Null => Vec::new(),
        other => value_to_text(other).into_iter().collect(),
    };
    Ok(items.into_iter().filter(|s| !s.trim().is_empty()).collect())
}

/// Accept an integer or a numeric string.
pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n.as_f64().map(|f| f.max(0.0) as u32).unwrap_or(0)),
        Value::String(s) => Ok(s.trim().parse().unwrap_or(0)),
        _ => Ok(0),
    }
}

/// First number found in free text such as "3-4 minutes".
pub fn leading_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.trim_end_matches('.').parse().ok()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::outline::{fixtures::STRUCTURE_REPLY, parse_course_structure};
    use crate::planner::{fixtures::PLAN_REPLY, parse_presentation_plan};
    use crate::request::{Complexity, LearningStyle};

    /// A three-slide course on Rust ownership with no media attached.
    pub fn sample_record(session_id: &str) -> CourseRecord {
        let plan = parse_presentation_plan(PLAN_REPLY).unwrap();
        let mut request = GenerationRequest::new(
            "Rust programming",
            Complexity::Beginner,
            "10 minutes",
            LearningStyle::Visual,
        );
        request.session_id = Some(session_id.to_string());
        CourseRecord {
            session_id: session_id.to_string(),
            request,
            course_structure: parse_course_structure(STRUCTURE_REPLY).unwrap(),
            slides: plan.slides.iter().map(SlideContent::from_plan).collect(),
            presentation_plan: plan,
            images: Vec::new(),
            presentation_file: None,
            audio_files: Vec::new(),
            transcript_files: Vec::new(),
            created_at: Utc::now(),
            generation_time_secs: 12.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient_string")]
        time: String,
        #[serde(default, deserialize_with = "lenient_strings")]
        points: Vec<String>,
        #[serde(default, deserialize_with = "lenient_u32")]
        number: u32,
    }

    #[test]
    fn test_lenient_fields() {
        let probe: Probe = serde_json::from_value(serde_json::json!({
            "time": 15,
            "points": ["a", {"title": "b"}, "", null],
            "number": "4"
        }))
        .unwrap();
        assert_eq!(probe.time, "15");
        assert_eq!(probe.points, vec!["a", "b"]);
        assert_eq!(probe.number, 4);
    }

    #[test]
    fn test_lenient_single_string_becomes_list() {
        let probe: Probe =
            serde_json::from_value(serde_json::json!({ "points": "diagram of a cell" })).unwrap();
        assert_eq!(probe.points, vec!["diagram of a cell"]);
        assert_eq!(probe.number, 0);
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("3-4 minutes"), Some(3.0));
        assert_eq!(leading_number("about 2.5 min"), Some(2.5));
        assert_eq!(leading_number("a while"), None);
    }
}
