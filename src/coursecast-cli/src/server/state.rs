use std::sync::Arc;

use coursecast_core::transcription::Transcriber;
use coursecast_core::{
    Config, ConversationManager, CourseError, CourseStore, EventHub, GenerationService, SessionRegistry, SpeechService,
};

use crate::backends::Backends;

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<CourseStore>,
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<EventHub>,
    pub generation: Arc<GenerationService>,
    pub conversations: Arc<ConversationManager>,
    pub speech: Arc<SpeechService>,
    pub transcriber: Arc<dyn Transcriber>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, CourseError> {
        let backends = Backends::from_config(&config)?;
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: Config, backends: Backends) -> Result<Self, CourseError> {
        let store = Arc::new(CourseStore::new(&config.storage.data_dir)?);
        let registry = Arc::new(SessionRegistry::new());
        let hub = Arc::new(EventHub::new());

        let pipeline = Arc::new(backends.pipeline(&config, &store, &registry));
        let generation = Arc::new(GenerationService::new(pipeline, hub.sink()));
        let conversations = Arc::new(ConversationManager::new(
            Arc::clone(&backends.model),
            config.llm.conversation_model.clone(),
            Some(Arc::clone(&store)),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            hub,
            generation,
            conversations,
            speech: backends.speech,
            transcriber: backends.transcriber,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use coursecast_core::TextModel;
    use coursecast_core::llm::{Completion, CompletionRequest};
    use coursecast_core::speech::SpeechSynthesizer;
    use std::path::Path;
    use std::time::Duration;

    /// Answers every prompt with a fixed sentence.
    pub struct EchoModel;

    #[async_trait]
    impl TextModel for EchoModel {
        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, CourseError> {
            Ok(Completion {
                text: "A closure captures variables from its environment.".to_string(),
                total_tokens: Some(12),
                elapsed: Duration::from_millis(5),
            })
        }
    }

    pub struct SilentSpeech;

    #[async_trait]
    impl SpeechSynthesizer for SilentSpeech {
        async fn voices(&self) -> Result<Vec<String>, CourseError> {
            Ok(vec!["af_sky".to_string(), "am_adam".to_string()])
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }

        async fn synthesize(&self, _text: &str, _voice: &str, _speed: f32) -> Result<Vec<f32>, CourseError> {
            Ok(vec![0.0; 240])
        }
    }

    pub struct FixedTranscript(pub &'static str);

    #[async_trait]
    impl Transcriber for FixedTranscript {
        async fn transcribe(&self, _audio: Vec<u8>, _file_name: &str) -> Result<String, CourseError> {
            Ok(self.0.to_string())
        }
    }

    pub fn state(data_dir: &Path) -> AppState {
        let mut config = Config::default();
        config.storage.data_dir = data_dir.to_path_buf();
        let backends = Backends {
            model: Arc::new(EchoModel),
            images: None,
            speech: Arc::new(SpeechService::new(Arc::new(SilentSpeech))),
            transcriber: Arc::new(FixedTranscript("What is a closure?")),
        };
        AppState::with_backends(config, backends).unwrap()
    }
}
