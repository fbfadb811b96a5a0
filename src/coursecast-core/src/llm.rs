//! Chat model access.
//!
//! Generators talk to [`TextModel`] so the pipeline can run against any
//! OpenAI-compatible endpoint, or against a scripted model in tests.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::CourseError;
use crate::store::{AiInteraction, CourseStore};

/// Speaker of a prior turn in a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// A single completion call.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatTurn>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            messages: vec![ChatTurn::user(prompt)],
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub total_tokens: Option<u32>,
    pub elapsed: Duration,
}

#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CourseError>;
}

/// [`TextModel`] backed by an OpenAI-compatible chat completions API.
pub struct OpenAiTextModel {
    client: Client<OpenAIConfig>,
    default_max_tokens: u32,
    max_retries: u32,
}

impl OpenAiTextModel {
    pub fn new(config: &LlmConfig) -> Result<Self, CourseError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CourseError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(&config.api_base);

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http_client),
            default_max_tokens: config.max_tokens,
            max_retries: 3,
        })
    }

    fn build_messages(request: &CompletionRequest) -> Vec<ChatCompletionRequestMessage> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: request.system.clone().into(),
                    name: None,
                },
            ));
        }

        for turn in &request.messages {
            let message = match turn.role {
                TurnRole::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: turn.content.clone().into(),
                    name: None,
                }),
                TurnRole::Assistant => {
                    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                        content: Some(turn.content.clone().into()),
                        name: None,
                        tool_calls: None,
                        refusal: None,
                        audio: None,
                        function_call: None,
                    })
                }
            };
            messages.push(message);
        }

        messages
    }
}

#[async_trait]
impl TextModel for OpenAiTextModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CourseError> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .max_completion_tokens(request.max_tokens.unwrap_or(self.default_max_tokens))
            .messages(Self::build_messages(&request))
            .build()?;

        let started = Instant::now();
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s
                let delay = Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }

            match self.client.chat().create(chat_request.clone()).await {
                Ok(response) => {
                    let text = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();

                    if text.trim().is_empty() {
                        warn!(model = %request.model, attempt, "empty completion, retrying");
                        last_error = Some(CourseError::EmptyResponse);
                        continue;
                    }

                    debug!(model = %request.model, chars = text.len(), "completion received");
                    return Ok(Completion {
                        text,
                        total_tokens: response.usage.as_ref().map(|u| u.total_tokens),
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) => {
                    warn!(model = %request.model, attempt, "completion failed: {}", e);
                    last_error = Some(CourseError::from(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CourseError::ConfigError("Unknown API error after retries".to_string())
        }))
    }
}

/// Run a completion and record it in the session's interaction log.
///
/// Failed calls are logged too. A failure to write the log never fails the call.
pub async fn complete_logged(
    model: &dyn TextModel,
    store: Option<&CourseStore>,
    session_id: &str,
    stage: &str,
    request: CompletionRequest,
) -> Result<Completion, CourseError> {
    let started = Instant::now();
    let logged_request = serde_json::json!({
        "system_instruction": request.system,
        "messages": request.messages,
    });
    let model_name = request.model.clone();
    let result = model.complete(request).await;

    if let Some(store) = store {
        let entry = match &result {
            Ok(completion) => AiInteraction::success(
                session_id,
                stage,
                &model_name,
                logged_request,
                &completion.text,
                completion.elapsed.as_secs_f64(),
                completion.total_tokens,
            ),
            Err(e) => AiInteraction::failure(
                session_id,
                stage,
                &model_name,
                logged_request,
                &e.to_string(),
                started.elapsed().as_secs_f64(),
            ),
        };
        if let Err(e) = store.save_ai_interaction_log(&entry) {
            warn!(session_id, stage, "failed to write interaction log: {}", e);
        }
    }

    result
}

/// Sliding one-minute window limiting calls to a model.
pub struct RateLimiter {
    max_per_minute: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn per_minute(max_per_minute: usize) -> Self {
        Self::with_window(max_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(max_per_minute: usize, window: Duration) -> Self {
        Self {
            max_per_minute: max_per_minute.max(1),
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until another call fits in the window, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    calls.pop_front();
                }

                if calls.len() < self.max_per_minute {
                    calls.push_back(now);
                    return;
                }

                calls
                    .front()
                    .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                    .unwrap_or_default()
            };

            debug!("rate limit reached, sleeping {:?}", wait);
            tokio::time::sleep(wait + Duration::from_millis(10)).await;
        }
    }
}

/// Pull the outermost JSON object or array out of a model reply.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.trim().strip_suffix("```").unwrap_or(text).trim();

    let start = match (text.find('{'), text.find('[')) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return text,
    };
    let closer = if text[start..].starts_with('[') { ']' } else { '}' };

    match text.rfind(closer) {
        Some(end) if end > start => &text[start..=end],
        _ => text,
    }
}

/// Parse a model reply as JSON after stripping fences and surrounding prose.
pub fn parse_json_reply(text: &str) -> Result<serde_json::Value, CourseError> {
    serde_json::from_str(extract_json(text))
        .map_err(|e| CourseError::ParseError(format!("Invalid JSON response from model: {}", e)))
}

/// Strip reasoning tags and markdown emphasis from a spoken reply.
pub fn sanitize_response(response: &str) -> String {
    let tags_to_strip = ["thinking", "think", "reflection", "reasoning", "thought", "scratchpad"];

    let mut result = response.to_string();

    for tag in &tags_to_strip {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    result = result.replace('*', "");

    if let Ok(ws_re) = regex::Regex::new(r"[ \t]+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Replays canned replies in order and records every request.
    pub struct ScriptedModel {
        replies: StdMutex<VecDeque<Result<String, String>>>,
        pub requests: StdMutex<Vec<CompletionRequest>>,
    }

    impl ScriptedModel {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: StdMutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
                requests: StdMutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                replies: StdMutex::new(VecDeque::from([Err("model offline".to_string())])),
                requests: StdMutex::new(Vec::new()),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextModel for ScriptedModel {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, CourseError> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply left".to_string()));
            match reply {
                Ok(text) => Ok(Completion {
                    text,
                    total_tokens: Some(42),
                    elapsed: Duration::from_millis(5),
                }),
                Err(e) => Err(CourseError::ConfigError(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_strips_fences() {
        let reply = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(reply), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_ignores_prose() {
        let reply = "Here are your slides:\n[{\"n\": 1}, {\"n\": 2}]\nEnjoy!";
        assert_eq!(extract_json(reply), "[{\"n\": 1}, {\"n\": 2}]");
    }

    #[test]
    fn test_extract_json_prefers_first_opener() {
        let reply = "{\"slides\": [1, 2]} trailing";
        assert_eq!(extract_json(reply), "{\"slides\": [1, 2]}");
    }

    #[test]
    fn test_parse_json_reply_error() {
        let err = parse_json_reply("no json here").unwrap_err();
        assert!(matches!(err, CourseError::ParseError(_)));
    }

    #[test]
    fn test_sanitize_response_thinking_tags() {
        let input = "<think>Let me think about this...</think>The answer is 42.";
        assert_eq!(sanitize_response(input), "The answer is 42.");
    }

    #[test]
    fn test_sanitize_response_emphasis() {
        assert_eq!(sanitize_response("A **bold** claim"), "A bold claim");
    }

    #[test]
    fn test_build_messages_order() {
        let mut request = CompletionRequest::new("m", "be brief", "hi");
        request.messages.push(ChatTurn::assistant("hello"));
        let messages = OpenAiTextModel::build_messages(&request);
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
    }

    #[tokio::test]
    async fn test_rate_limiter_blocks_when_full() {
        let limiter = RateLimiter::with_window(2, Duration::from_millis(200));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(100));
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(190));
    }
}
