//! Slide image generation with placeholder fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ImagesConfig;
use crate::error::CourseError;
use crate::slides::{ImageSpec, SlideContent};

const MIN_DIMENSION: u32 = 100;
const MAX_WIDTH: u32 = 1920;
const MAX_HEIGHT: u32 = 1080;
const PLACEHOLDER_SIZE: (u32, u32) = (800, 600);

/// Source of raw image bytes for a text prompt.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, CourseError>;
}

/// Pollinations text-to-image HTTP endpoint.
pub struct PollinationsProvider {
    client: reqwest::Client,
    config: ImagesConfig,
}

impl PollinationsProvider {
    pub fn new(config: ImagesConfig) -> Result<Self, CourseError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourseError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn request_url(&self, prompt: &str) -> Result<reqwest::Url, CourseError> {
        let mut url = reqwest::Url::parse(&self.config.base_url)
            .map_err(|e| CourseError::ConfigError(format!("Invalid image base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| CourseError::ConfigError("Image base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .push("prompt")
            .push(prompt);
        url.query_pairs_mut()
            .append_pair("width", &self.config.width.to_string())
            .append_pair("height", &self.config.height.to_string())
            .append_pair("nologo", "true")
            .append_pair("model", &self.config.model)
            .append_pair("private", "true");
        Ok(url)
    }
}

#[async_trait]
impl ImageProvider for PollinationsProvider {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, CourseError> {
        let url = self.request_url(prompt)?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Success,
    Placeholder,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Generated,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub spec: ImageSpec,
    pub status: ImageStatus,
    pub source: Option<ImageSource>,
    pub local_path: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideImages {
    pub slide_number: u32,
    pub images: Vec<ProcessedImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSummary {
    pub total_images: usize,
    pub successful: usize,
    pub generated: usize,
    pub placeholders: usize,
    pub failed: usize,
    pub success_rate: f64,
}

pub fn summarize(processed: &[SlideImages]) -> ImageSummary {
    let all: Vec<&ProcessedImage> = processed.iter().flat_map(|s| s.images.iter()).collect();
    let count = |status: ImageStatus| all.iter().filter(|i| i.status == status).count();

    let total = all.len();
    let generated = count(ImageStatus::Success);
    let placeholders = count(ImageStatus::Placeholder);
    let successful = generated + placeholders;
    ImageSummary {
        total_images: total,
        successful,
        generated,
        placeholders,
        failed: count(ImageStatus::Failed),
        success_rate: if total == 0 {
            0.0
        } else {
            (successful as f64 / total as f64 * 1000.0).round() / 10.0
        },
    }
}

/// Prompt sent to the image model for one spec.
pub fn image_prompt(spec: &ImageSpec) -> String {
    let subject = if spec.description.trim().is_empty() {
        spec.alt_text.trim()
    } else {
        spec.description.trim()
    };
    format!(
        "High-quality educational illustration: {}. Professional, clean, suitable for academic presentation.",
        subject
    )
}

pub fn image_file_name(slide_number: u32, index: usize) -> String {
    format!("slide_{:02}_img_{:02}.png", slide_number, index + 1)
}

fn placeholder_file_name(slide_number: u32, index: usize) -> String {
    format!("slide_{:02}_img_{:02}_placeholder.png", slide_number, index + 1)
}

/// Decode, size-check and shrink raw bytes to presentation limits.
pub fn prepare_image(bytes: &[u8]) -> Result<DynamicImage, CourseError> {
    let img = image::load_from_memory(bytes)?;
    if img.width() <= MIN_DIMENSION || img.height() <= MIN_DIMENSION {
        return Err(CourseError::ValidationError(format!(
            "Image too small: {}x{}",
            img.width(),
            img.height()
        )));
    }
    if img.width() > MAX_WIDTH || img.height() > MAX_HEIGHT {
        return Ok(img.thumbnail(MAX_WIDTH, MAX_HEIGHT));
    }
    Ok(img)
}

pub fn write_placeholder(path: &Path) -> Result<(), CourseError> {
    let (w, h) = PLACEHOLDER_SIZE;
    RgbImage::from_pixel(w, h, Rgb([211, 211, 211])).save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Fetches every image a course asks for. Individual failures degrade to placeholders.
pub struct ImageManager {
    provider: Arc<dyn ImageProvider>,
    max_retries: u32,
    retry_delay: Duration,
}

impl ImageManager {
    pub fn new(provider: Arc<dyn ImageProvider>, max_retries: u32) -> Self {
        Self {
            provider,
            max_retries: max_retries.max(1),
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn fetch(&self, prompt: &str) -> Result<DynamicImage, CourseError> {
        let mut last_error = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
            match self.provider.generate(prompt).await {
                Ok(bytes) => match prepare_image(&bytes) {
                    Ok(img) => return Ok(img),
                    Err(e) => {
                        debug!(attempt, "rejected generated image: {}", e);
                        last_error = Some(e);
                    }
                },
                Err(e) => {
                    debug!(attempt, "image generation failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| CourseError::ConfigError("no image attempts made".to_string())))
    }

    async fn process_one(&self, dir: &Path, slide_number: u32, index: usize, spec: &ImageSpec) -> ProcessedImage {
        let mut processed = ProcessedImage {
            spec: spec.clone(),
            status: ImageStatus::Failed,
            source: None,
            local_path: None,
            width: None,
            height: None,
            error: None,
        };

        let fetched = self.fetch(&image_prompt(spec)).await.and_then(|img| {
            let path = dir.join(image_file_name(slide_number, index));
            img.save_with_format(&path, ImageFormat::Png)?;
            Ok((img, path))
        });

        match fetched {
            Ok((img, path)) => {
                processed.status = ImageStatus::Success;
                processed.source = Some(ImageSource::Generated);
                processed.width = Some(img.width());
                processed.height = Some(img.height());
                processed.local_path = Some(path);
            }
            Err(e) => {
                warn!(slide_number, index, "image unavailable, using placeholder: {}", e);
                let path = dir.join(placeholder_file_name(slide_number, index));
                match write_placeholder(&path) {
                    Ok(()) => {
                        processed.status = ImageStatus::Placeholder;
                        processed.source = Some(ImageSource::Placeholder);
                        processed.width = Some(PLACEHOLDER_SIZE.0);
                        processed.height = Some(PLACEHOLDER_SIZE.1);
                        processed.local_path = Some(path);
                        processed.error = Some(e.to_string());
                    }
                    Err(placeholder_err) => {
                        processed.error = Some(format!("{}; placeholder failed: {}", e, placeholder_err));
                    }
                }
            }
        }
        processed
    }

    /// Process every image spec on every slide. `on_progress` receives 0-100.
    pub async fn process_slides<F>(&self, images_dir: &Path, slides: &[SlideContent], on_progress: F) -> Vec<SlideImages>
    where
        F: Fn(f32) + Send + Sync,
    {
        let total: usize = slides.iter().map(|s| s.images.len()).sum();
        let mut done = 0usize;
        let mut results = Vec::with_capacity(slides.len());

        if let Err(e) = std::fs::create_dir_all(images_dir) {
            warn!("cannot create image dir {}: {}", images_dir.display(), e);
        }

        for slide in slides {
            let mut images = Vec::with_capacity(slide.images.len());
            for (index, spec) in slide.images.iter().enumerate() {
                images.push(self.process_one(images_dir, slide.slide_number, index, spec).await);
                done += 1;
                on_progress(done as f32 / total as f32 * 100.0);
            }
            results.push(SlideImages {
                slide_number: slide.slide_number,
                images,
            });
        }

        let summary = summarize(&results);
        info!(
            total = summary.total_images,
            generated = summary.generated,
            placeholders = summary.placeholders,
            "image processing finished"
        );
        results
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        RgbImage::from_pixel(width, height, Rgb([10, 120, 200]))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Fails the first `failures` calls, then returns an image of the given size.
    pub struct FakeImages {
        pub failures: usize,
        pub size: (u32, u32),
        pub calls: AtomicUsize,
    }

    impl FakeImages {
        pub fn ok() -> Self {
            Self {
                failures: 0,
                size: (400, 300),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn broken() -> Self {
            Self {
                failures: usize::MAX,
                size: (400, 300),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageProvider for FakeImages {
        async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, CourseError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CourseError::ConfigError("image service down".to_string()));
            }
            Ok(png_bytes(self.size.0, self.size.1))
        }
    }
}
