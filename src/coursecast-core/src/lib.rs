//! Coursecast Core Library
//!
//! Generates narrated slide courses with AI models: outline, plan, slide
//! content, images, PowerPoint deck and audio, with live progress events,
//! persistence and an interactive Q&A loop for playback.

pub mod client_state;
pub mod config;
pub mod conversation;
pub mod course;
pub mod deck;
pub mod error;
pub mod events;
pub mod images;
pub mod llm;
pub mod outline;
pub mod pipeline;
pub mod planner;
pub mod player;
pub mod pptx;
pub mod progress;
pub mod request;
pub mod sessions;
pub mod settings;
pub mod slides;
pub mod speech;
pub mod store;
pub mod transcription;

pub use client_state::{ClientState, GenerationPhase, GenerationView};
pub use config::Config;
pub use conversation::{ConversationManager, SlideContext, SpokenAnswer};
pub use course::{CourseRecord, CourseSummary};
pub use deck::PresentationBuilder;
pub use error::CourseError;
pub use events::{ClientEvent, EventHub, EventSink, ServerEvent};
pub use images::{ImageManager, PollinationsProvider};
pub use llm::{OpenAiTextModel, RateLimiter, TextModel};
pub use outline::OutlineGenerator;
pub use pipeline::{CoursePipeline, GenerationService, GenerationStarted};
pub use planner::PresentationPlanner;
pub use player::{Effect, PlayerEvent, PlayerMode, PlayerState, transition};
pub use progress::ProgressTracker;
pub use request::GenerationRequest;
pub use sessions::{SessionRegistry, SessionStatus};
pub use slides::SlideGenerator;
pub use speech::{KokoroSynthesizer, SpeechService};
pub use store::CourseStore;
pub use transcription::WhisperTranscriber;
