//! Coursecast CLI - AI course generator
//!
//! Serves the course generation API or generates a single course in the terminal.

mod backends;
mod console;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use coursecast_core::{Config, CourseStore, GenerationRequest, SessionRegistry};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backends::Backends;

#[derive(Parser)]
#[command(
    name = "coursecast",
    version,
    about = "AI course generator - narrated slide decks from a topic",
    long_about = "Generates educational presentations with OpenAI-compatible models: outline, slides, images, a PowerPoint deck and narration."
)]
struct Cli {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate one course and print its progress
    Generate {
        /// The course topic
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// beginner, intermediate or advanced
        #[arg(long, default_value = "intermediate")]
        complexity: String,

        /// Target length, e.g. "15 minutes"
        #[arg(short, long, default_value = "15 minutes")]
        duration: String,

        /// visual, auditory or mixed
        #[arg(long, default_value = "mixed")]
        learning_style: String,

        /// Exact number of slides (the model decides when omitted)
        #[arg(short, long, value_name = "COUNT")]
        slides: Option<u32>,

        /// low, medium or high
        #[arg(long, default_value = "medium")]
        density: String,

        /// Deck theme name
        #[arg(long, default_value = "default")]
        theme: String,

        /// Narration voice
        #[arg(long)]
        voice: Option<String>,

        /// Skip image generation
        #[arg(long)]
        no_images: bool,

        /// Skip narration audio
        #[arg(long)]
        no_audio: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let mut config = Config::load_or_default(path)?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursecast=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::serve(config).await
        }
        Command::Generate {
            topic,
            complexity,
            duration,
            learning_style,
            slides,
            density,
            theme,
            voice,
            no_images,
            no_audio,
        } => {
            if no_images {
                config.images.enabled = false;
            }
            if no_audio {
                config.speech.enabled = false;
            }
            let request = GenerationRequest::from_json(json!({
                "topic": topic,
                "complexity": complexity,
                "duration": duration,
                "learning_style": learning_style,
                "slide_count": slides.unwrap_or(0),
                "content_density": density,
                "theme": theme,
                "voice": voice.unwrap_or_else(|| config.speech.default_voice.clone()),
            }))?;
            generate(config, request).await
        }
    }
}

async fn generate(config: Config, request: GenerationRequest) -> anyhow::Result<()> {
    if config.llm.api_key.is_empty() {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
    }

    let store = Arc::new(CourseStore::new(&config.storage.data_dir)?);
    let registry = Arc::new(SessionRegistry::new());
    let pipeline = Backends::from_config(&config)?.pipeline(&config, &store, &registry);
    let session_id = uuid::Uuid::new_v4().to_string();

    println!();
    println!("{}", console::rule_heavy().bright_blue());
    println!("{}", format!("  {} - course generation", "Coursecast".bold()).bright_blue().bold());
    println!("{}", console::rule_heavy().bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), request.topic.bright_white());
    println!(
        "{} {} · {} · {}",
        "Setup:".bold(),
        request.complexity.as_str().yellow(),
        request.duration,
        request.learning_style.as_str()
    );
    println!("{}", console::rule_light().dimmed());
    info!(session_id = %session_id, "Starting one-shot generation");

    let course = pipeline.run(&session_id, request, console::console_sink()).await?;
    console::print_slides(&course);
    println!("{} {}", "Session:".bold(), session_id.dimmed());
    println!(
        "{} {}",
        "Saved to:".bold(),
        store.session_dir(&session_id)?.display().to_string().bright_white()
    );
    println!();

    Ok(())
}
