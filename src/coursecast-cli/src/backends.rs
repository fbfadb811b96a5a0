//! AI backends and the generation pipeline, built from configuration.

use std::sync::Arc;
use std::time::Duration;

use coursecast_core::images::ImageProvider;
use coursecast_core::transcription::Transcriber;
use coursecast_core::{
    Config, CourseError, CoursePipeline, CourseStore, ImageManager, KokoroSynthesizer, OpenAiTextModel, OutlineGenerator,
    PollinationsProvider, PresentationPlanner, RateLimiter, SessionRegistry, SlideGenerator, SpeechService, TextModel,
    WhisperTranscriber,
};
use tracing::info;

/// External services shared by the server and the one-shot generator.
#[derive(Clone)]
pub struct Backends {
    pub model: Arc<dyn TextModel>,
    pub images: Option<Arc<dyn ImageProvider>>,
    pub speech: Arc<SpeechService>,
    pub transcriber: Arc<dyn Transcriber>,
}

impl Backends {
    pub fn from_config(config: &Config) -> Result<Self, CourseError> {
        let model: Arc<dyn TextModel> = Arc::new(OpenAiTextModel::new(&config.llm)?);
        let images: Option<Arc<dyn ImageProvider>> = if config.images.enabled {
            Some(Arc::new(PollinationsProvider::new(config.images.clone())?))
        } else {
            info!("Image generation disabled");
            None
        };
        let speech = Arc::new(SpeechService::new(Arc::new(KokoroSynthesizer::new(
            config.speech.default_voice.clone(),
        ))));
        let transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::new(config.transcription.clone())?);

        Ok(Self {
            model,
            images,
            speech,
            transcriber,
        })
    }

    /// Assemble a pipeline writing into `store` and reporting to `registry`.
    pub fn pipeline(&self, config: &Config, store: &Arc<CourseStore>, registry: &Arc<SessionRegistry>) -> CoursePipeline {
        let limiter = Arc::new(RateLimiter::per_minute(config.generation.requests_per_minute));
        let outline =
            OutlineGenerator::new(Arc::clone(&self.model), &config.llm.structure_model).with_store(Arc::clone(store));
        let planner =
            PresentationPlanner::new(Arc::clone(&self.model), &config.llm.planning_model).with_store(Arc::clone(store));
        let slides = SlideGenerator::new(Arc::clone(&self.model), &config.llm.slides_model, limiter)
            .with_store(Arc::clone(store));

        let mut pipeline = CoursePipeline::new(outline, planner, slides, Arc::clone(store), Arc::clone(registry))
            .with_heartbeat(Duration::from_secs(config.server.heartbeat_secs.max(1)));
        if let Some(provider) = &self.images {
            pipeline = pipeline.with_images(ImageManager::new(Arc::clone(provider), config.images.max_retries));
        }
        if config.speech.enabled {
            pipeline = pipeline.with_speech(Arc::clone(&self.speech));
        }
        pipeline
    }
}
