//! Live Q&A with a teacher persona while a presentation plays.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CourseError;
use crate::llm::{CompletionRequest, TextModel, complete_logged, sanitize_response};
use crate::speech::SpeechService;
use crate::store::CourseStore;
use crate::transcription::Transcriber;

/// Returned instead of an answer when the model call fails.
pub const APOLOGY: &str =
    "I apologize, but I'm having trouble processing your question right now. Please try again.";

const HISTORY_WINDOW: usize = 6;
const ANSWER_MAX_TOKENS: u32 = 1024;
const SUMMARY_FILE: &str = "conversation_summary.json";

const TEACHER_INSTRUCTION: &str = r#"You are an expert educational AI teacher assistant. You are helping a student during an interactive presentation.

CONTEXT:
- The student is viewing a specific slide in an educational presentation
- You have access to the slide's transcript
- You can see the conversation history to maintain context
- The student may ask questions about the current slide or related topics

YOUR ROLE:
- Act as a knowledgeable, patient, and encouraging teacher
- Provide clear, educational explanations appropriate for the student's level
- Use the slide transcript to inform your responses
- Relate concepts to real-world applications when helpful
- Keep responses concise but thorough (2-4 sentences usually)

RESPONSE GUIDELINES:
- Be conversational and approachable
- Use simple, clear language
- Provide examples when helpful
- If uncertain about something, acknowledge it honestly
- Encourage follow-up questions
- Stay focused on educational content

IMPORTANT:
- Do not contradict the slide content unless it is clearly incorrect
- Reference the slide content when relevant
- Avoid off-topic conversations"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Student,
    Teacher,
}

impl Speaker {
    fn label(self) -> &'static str {
        match self {
            Speaker::Student => "Student",
            Speaker::Teacher => "Teacher",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// What the student is looking at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideContext {
    pub transcript: Option<String>,
    pub title: Option<String>,
    pub slide_number: Option<u32>,
    pub has_screenshot: bool,
}

impl SlideContext {
    /// Take over every field `update` provides.
    fn merge(&mut self, update: &SlideContext) {
        if let Some(transcript) = update.transcript.as_ref().filter(|t| !t.trim().is_empty()) {
            self.transcript = Some(transcript.clone());
        }
        if let Some(title) = &update.title {
            self.title = Some(title.clone());
        }
        if update.slide_number.is_some() {
            self.slide_number = update.slide_number;
        }
        if update.has_screenshot {
            self.has_screenshot = true;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<ConversationMessage>,
    pub slide_context: SlideContext,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    fn new(slide_context: SlideContext) -> Self {
        Self {
            messages: Vec::new(),
            slide_context,
            created_at: Utc::now(),
        }
    }

    pub fn questions_asked(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Speaker::Student).count()
    }
}

/// Result of a voice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpokenAnswer {
    pub question: String,
    pub answer: String,
    pub audio_path: Option<PathBuf>,
}

/// Voice settings for spoken answers.
#[derive(Debug, Clone)]
pub struct AnswerVoice<'a> {
    pub audio_dir: &'a Path,
    pub voice: &'a str,
    pub speed: f32,
}

/// Build the user turn: transcript, recent history, then the question.
pub fn build_prompt(context: &SlideContext, history: &[ConversationMessage], question: &str) -> String {
    let mut parts = Vec::new();
    if let Some(title) = &context.title {
        parts.push(format!("--- CURRENT SLIDE ---\n{}", title));
    }
    if let Some(transcript) = &context.transcript {
        parts.push(format!("--- CURRENT SLIDE TRANSCRIPT ---\n{}", transcript));
    }
    if !history.is_empty() {
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        let lines: Vec<String> = history[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect();
        parts.push(format!("--- CONVERSATION HISTORY ---\n{}", lines.join("\n")));
    }
    parts.push(format!("--- STUDENT QUESTION ---\n{}", question));
    parts.join("\n\n")
}

pub struct ConversationManager {
    model: Arc<dyn TextModel>,
    model_name: String,
    store: Option<Arc<CourseStore>>,
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl ConversationManager {
    pub fn new(model: Arc<dyn TextModel>, model_name: impl Into<String>, store: Option<Arc<CourseStore>>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            store,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    fn conversations(&self) -> MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open (or reopen) a conversation with an initial slide context.
    pub fn start(&self, session_id: &str, context: SlideContext) -> String {
        self.conversations()
            .insert(session_id.to_string(), Conversation::new(context));
        info!(session_id, "conversation started");
        session_id.to_string()
    }

    /// Answer a question. Unknown ids start a conversation on the fly.
    ///
    /// A failed model call yields [`APOLOGY`] and leaves the history untouched.
    pub async fn ask(&self, session_id: &str, question: &str, context: &SlideContext) -> Result<String, CourseError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CourseError::ValidationError("Question cannot be empty".to_string()));
        }

        let (slide_context, history) = {
            let mut conversations = self.conversations();
            let conversation = conversations
                .entry(session_id.to_string())
                .or_insert_with(|| Conversation::new(SlideContext::default()));
            let mut merged = conversation.slide_context.clone();
            merged.merge(context);
            (merged, conversation.messages.clone())
        };

        let request = CompletionRequest::new(
            self.model_name.clone(),
            TEACHER_INSTRUCTION,
            build_prompt(&slide_context, &history, question),
        )
        .with_max_tokens(ANSWER_MAX_TOKENS);
        let completion = complete_logged(
            self.model.as_ref(),
            self.store.as_deref(),
            session_id,
            "conversation",
            request,
        )
        .await;

        // Reasoning blocks and markdown never reach history or TTS.
        let answer = match completion.map(|c| sanitize_response(&c.text)) {
            Ok(answer) if !answer.is_empty() => answer,
            Ok(_) => {
                warn!(session_id, "Model returned an empty answer");
                return Ok(APOLOGY.to_string());
            }
            Err(e) => {
                warn!(session_id, "Error processing question: {}", e);
                return Ok(APOLOGY.to_string());
            }
        };

        let now = Utc::now();
        let mut conversations = self.conversations();
        let conversation = conversations
            .entry(session_id.to_string())
            .or_insert_with(|| Conversation::new(SlideContext::default()));
        conversation.slide_context.merge(context);
        conversation.messages.push(ConversationMessage {
            role: Speaker::Student,
            content: question.to_string(),
            timestamp: now,
        });
        conversation.messages.push(ConversationMessage {
            role: Speaker::Teacher,
            content: answer.clone(),
            timestamp: now,
        });
        debug!(session_id, messages = conversation.messages.len(), "question answered");
        Ok(answer)
    }

    /// Speech in, speech out: transcribe, answer, then narrate the answer.
    ///
    /// Narration failures still return the text answer without audio.
    #[allow(clippy::too_many_arguments)]
    pub async fn ask_spoken(
        &self,
        session_id: &str,
        audio: Vec<u8>,
        file_name: &str,
        context: &SlideContext,
        transcriber: &dyn Transcriber,
        speech: &SpeechService,
        voice: AnswerVoice<'_>,
    ) -> Result<SpokenAnswer, CourseError> {
        let question = transcriber.transcribe(audio, file_name).await?;
        if question.trim().is_empty() {
            return Err(CourseError::ValidationError("No speech detected in the recording".to_string()));
        }

        let answer = self.ask(session_id, &question, context).await?;
        let audio_path = match speech
            .synthesize_adhoc(voice.audio_dir, &answer, voice.voice, voice.speed)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(session_id, "Could not narrate answer: {}", e);
                None
            }
        };

        Ok(SpokenAnswer {
            question: question.trim().to_string(),
            answer,
            audio_path,
        })
    }

    /// History for `session_id`, or an empty conversation when unknown.
    pub fn history(&self, session_id: &str) -> Conversation {
        self.conversations()
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| Conversation::new(SlideContext::default()))
    }

    pub fn update_context(&self, session_id: &str, context: &SlideContext) -> bool {
        match self.conversations().get_mut(session_id) {
            Some(conversation) => {
                conversation.slide_context.merge(context);
                true
            }
            None => false,
        }
    }

    /// Close a conversation, saving its summary into the session's logs.
    pub fn end(&self, session_id: &str) -> bool {
        let Some(conversation) = self.conversations().remove(session_id) else {
            return false;
        };
        info!(
            session_id,
            questions = conversation.questions_asked(),
            "conversation ended"
        );
        if let Some(store) = &self.store
            && let Err(e) = save_summary(store, session_id, &conversation)
        {
            warn!(session_id, "Error saving conversation log: {}", e);
        }
        true
    }

    /// End every conversation started more than `max_age_hours` ago.
    pub fn cleanup_older_than(&self, max_age_hours: i64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::hours(max_age_hours);
        let stale: Vec<String> = self
            .conversations()
            .iter()
            .filter(|(_, c)| c.created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in &stale {
            self.end(session_id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "cleaned up old conversations");
        }
        stale.len()
    }

    pub fn active_count(&self) -> usize {
        self.conversations().len()
    }
}

fn save_summary(store: &CourseStore, session_id: &str, conversation: &Conversation) -> Result<PathBuf, CourseError> {
    let dirs = store.session_dirs(session_id)?;
    let path = dirs.logs.join(SUMMARY_FILE);
    let mut saved = serde_json::to_value(conversation)?;
    if let Some(context) = saved.get_mut("slide_context").and_then(|c| c.as_object_mut()) {
        context.remove("has_screenshot");
    }
    fs::write(&path, serde_json::to_string_pretty(&saved)?)?;
    debug!(path = %path.display(), "saved conversation log");
    Ok(path)
}
