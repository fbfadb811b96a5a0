//! Text-to-speech for slide narration using kokoro-tiny.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tokio::task;
use tracing::{info, warn};

use crate::error::CourseError;
use crate::slides::SlideContent;

/// Kokoro output rate.
pub const KOKORO_SAMPLE_RATE: u32 = 24_000;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn voices(&self) -> Result<Vec<String>, CourseError>;

    fn sample_rate(&self) -> u32;

    /// Mono f32 samples at [`SpeechSynthesizer::sample_rate`].
    async fn synthesize(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<f32>, CourseError>;
}

/// Local kokoro-tiny engine, loaded on first use (downloads the model on first run).
///
/// Inference is CPU bound, so every engine call runs on the blocking pool.
pub struct KokoroSynthesizer {
    engine: OnceCell<Arc<Mutex<TtsEngine>>>,
    default_voice: String,
}

impl KokoroSynthesizer {
    pub fn new(default_voice: impl Into<String>) -> Self {
        Self {
            engine: OnceCell::new(),
            default_voice: default_voice.into(),
        }
    }

    async fn engine(&self) -> Result<Arc<Mutex<TtsEngine>>, CourseError> {
        self.engine
            .get_or_try_init(|| async {
                info!("loading kokoro TTS engine");
                TtsEngine::new()
                    .await
                    .map(|engine| Arc::new(Mutex::new(engine)))
                    .map_err(|e| CourseError::TtsError(format!("Failed to initialize TTS: {}", e)))
            })
            .await
            .cloned()
    }

    async fn with_engine<T, F>(&self, f: F) -> Result<T, CourseError>
    where
        T: Send + 'static,
        F: FnOnce(&mut TtsEngine) -> Result<T, CourseError> + Send + 'static,
    {
        run_locked(self.engine().await?, f).await
    }
}

/// Lock `engine` and run `f` on the blocking pool, off the async workers.
async fn run_locked<E, T, F>(engine: Arc<Mutex<E>>, f: F) -> Result<T, CourseError>
where
    E: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut E) -> Result<T, CourseError> + Send + 'static,
{
    task::spawn_blocking(move || {
        let mut engine = engine
            .lock()
            .map_err(|_| CourseError::TtsError("TTS engine lock poisoned".to_string()))?;
        f(&mut engine)
    })
    .await
    .map_err(|e| CourseError::TtsError(format!("TTS worker failed: {}", e)))?
}

#[async_trait]
impl SpeechSynthesizer for KokoroSynthesizer {
    async fn voices(&self) -> Result<Vec<String>, CourseError> {
        self.with_engine(|engine| Ok(engine.voices())).await
    }

    fn sample_rate(&self) -> u32 {
        KOKORO_SAMPLE_RATE
    }

    async fn synthesize(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<f32>, CourseError> {
        let text = text.to_string();
        let voice = voice.to_string();
        let default_voice = self.default_voice.clone();

        let samples = self
            .with_engine(move |engine| {
                let voice_id = resolve_voice(&voice, &engine.voices(), &default_voice);

                // Kokoro has a ~200 char safe limit per call
                let pause = (0.3 * KOKORO_SAMPLE_RATE as f32) as usize;
                let mut all_samples = Vec::new();
                for chunk in split_into_chunks(&text, 200) {
                    if chunk.trim().is_empty() {
                        continue;
                    }
                    let samples = engine
                        .synthesize(&chunk, Some(voice_id.as_str()))
                        .map_err(|e| CourseError::TtsError(format!("Synthesis failed: {}", e)))?;
                    all_samples.extend(samples);
                    all_samples.extend(vec![0.0; pause]);
                }

                // Trailing padding so players do not clip the last word
                all_samples.extend(vec![0.0; (0.5 * KOKORO_SAMPLE_RATE as f32) as usize]);
                Ok(all_samples)
            })
            .await?;

        Ok(adjust_audio_speed(samples, speed.clamp(0.5, 2.0)))
    }
}

/// `tts_{digest}.wav`, stable across builds so the cache survives upgrades.
pub fn adhoc_file_name(text: &str, voice: &str, speed: f32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0]);
    hasher.update(voice.as_bytes());
    hasher.update([0]);
    hasher.update(speed.to_le_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("tts_{}.wav", hex)
}

/// Pick an installed voice: exact id, then substring match, then the default.
pub fn resolve_voice(requested: &str, available: &[String], default_voice: &str) -> String {
    let requested = requested.trim();
    if !requested.is_empty() && !requested.eq_ignore_ascii_case("default") {
        if available.iter().any(|v| v == requested) {
            return requested.to_string();
        }
        let needle = requested.to_lowercase();
        if let Some(found) = available.iter().find(|v| v.to_lowercase().contains(&needle)) {
            return found.clone();
        }
        warn!("Unknown voice '{}', using '{}'", requested, default_voice);
    }

    if available.is_empty() || available.iter().any(|v| v == default_voice) {
        default_voice.to_string()
    } else {
        available[0].clone()
    }
}

/// Strip markup and spell out symbols the TTS engine would read badly.
pub fn clean_text_for_tts(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '*' | '#' | '_' | '`' | '[' | ']' => {}
            '&' => cleaned.push_str(" and "),
            '%' => cleaned.push_str(" percent"),
            '@' => cleaned.push_str(" at "),
            '$' => cleaned.push_str(" dollars "),
            '+' => cleaned.push_str(" plus "),
            '=' => cleaned.push_str(" equals "),
            _ => cleaned.push(c),
        }
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .replace(" ,", ",")
        .replace(" .", ".")
        .replace(" !", "!")
        .replace(" ?", "?")
}

/// Split text into chunks that are safe for TTS synthesis.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current_chunk.len() + sentence.len() > max_chars {
            if !current_chunk.is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk = String::new();
            }

            // A single overlong sentence is split on commas
            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current_chunk.len() + part.len() > max_chars && !current_chunk.is_empty() {
                        chunks.push(current_chunk.trim().to_string());
                        current_chunk = String::new();
                    }
                    current_chunk.push_str(part.trim());
                    current_chunk.push(' ');
                }
                continue;
            }
        }

        current_chunk.push_str(sentence);
        current_chunk.push(' ');
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}

/// Change playback speed using linear interpolation.
/// Rate < 1.0 is slower, rate > 1.0 is faster.
pub fn adjust_audio_speed(samples: Vec<f32>, rate: f32) -> Vec<f32> {
    if (rate - 1.0).abs() < 0.001 || rate <= 0.0 {
        return samples;
    }

    let new_len = (samples.len() as f32 / rate) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f32 * rate;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f32;

        if src_idx + 1 < samples.len() {
            result.push(samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac);
        } else if src_idx < samples.len() {
            result.push(samples[src_idx]);
        }
    }

    result
}

/// Write mono f32 samples as 16-bit PCM WAV.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CourseError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| CourseError::TtsError(format!("Failed to create WAV: {}", e)))?;
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(value)
            .map_err(|e| CourseError::TtsError(format!("Failed to write WAV: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| CourseError::TtsError(format!("Failed to save WAV: {}", e)))
}

pub fn slide_audio_file_name(slide_number: u32) -> String {
    format!("slide_{:02}.wav", slide_number)
}

/// Narration files for whole courses and one-off synthesis requests.
pub struct SpeechService {
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl SpeechService {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synthesizer }
    }

    pub async fn voices(&self) -> Result<Vec<String>, CourseError> {
        let mut voices = self.synthesizer.voices().await?;
        voices.sort();
        Ok(voices)
    }

    /// Synthesize `text` into a WAV file at `path`.
    pub async fn synthesize_to_file(&self, text: &str, voice: &str, speed: f32, path: &Path) -> Result<PathBuf, CourseError> {
        let cleaned = clean_text_for_tts(text);
        if cleaned.is_empty() {
            return Err(CourseError::ValidationError("Text cannot be empty".to_string()));
        }
        let samples = self.synthesizer.synthesize(&cleaned, voice, speed).await?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_wav(path, &samples, self.synthesizer.sample_rate())?;
        Ok(path.to_path_buf())
    }

    /// One-off synthesis into `dir` under a content-derived name.
    pub async fn synthesize_adhoc(&self, dir: &Path, text: &str, voice: &str, speed: f32) -> Result<PathBuf, CourseError> {
        let path = dir.join(adhoc_file_name(text, voice, speed));
        if path.exists() {
            return Ok(path);
        }
        self.synthesize_to_file(text, voice, speed, &path).await
    }

    /// One WAV per slide. The result always has one entry per slide; slides
    /// without narration or whose synthesis failed map to `None`.
    pub async fn synthesize_all<F>(
        &self,
        audio_dir: &Path,
        slides: &[SlideContent],
        voice: &str,
        speed: f32,
        on_progress: F,
    ) -> Vec<Option<PathBuf>>
    where
        F: Fn(f32) + Send + Sync,
    {
        let total = slides.len().max(1);
        let mut files = Vec::with_capacity(slides.len());

        for (i, slide) in slides.iter().enumerate() {
            let path = audio_dir.join(slide_audio_file_name(slide.slide_number));
            let result = if slide.transcript.trim().is_empty() {
                None
            } else {
                match self.synthesize_to_file(&slide.transcript, voice, speed, &path).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!(slide = slide.slide_number, "audio generation failed: {}", e);
                        None
                    }
                }
            };
            files.push(result);
            on_progress((i + 1) as f32 / total as f32 * 100.0);
        }

        info!(
            generated = files.iter().flatten().count(),
            total = slides.len(),
            "slide audio finished"
        );
        files
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Produces a short tone per character; fails on text containing "FAIL".
    pub struct FakeSpeech;

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn voices(&self) -> Result<Vec<String>, CourseError> {
            Ok(vec!["bm_george".to_string(), "af_sky".to_string()])
        }

        fn sample_rate(&self) -> u32 {
            8_000
        }

        async fn synthesize(&self, text: &str, _voice: &str, speed: f32) -> Result<Vec<f32>, CourseError> {
            if text.contains("FAIL") {
                return Err(CourseError::TtsError("synthetic failure".to_string()));
            }
            Ok(adjust_audio_speed(vec![0.25; text.len() * 10], speed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeSpeech;
    use super::*;
    use crate::slides::SlideLayout;

    fn slide(n: u32, transcript: &str) -> SlideContent {
        SlideContent {
            slide_number: n,
            title: format!("Slide {}", n),
            transcript: transcript.to_string(),
            layout: SlideLayout::default(),
            images: vec![],
            visual_notes: String::new(),
        }
    }

    #[test]
    fn test_clean_text_for_tts() {
        assert_eq!(
            clean_text_for_tts("**x** + y = [z] & 5% ."),
            "x plus y equals z and 5 percent."
        );
    }

    #[test]
    fn test_resolve_voice() {
        let available = vec!["af_sky".to_string(), "bm_george".to_string()];
        assert_eq!(resolve_voice("bm_george", &available, "af_sky"), "bm_george");
        assert_eq!(resolve_voice("george", &available, "af_sky"), "bm_george");
        assert_eq!(resolve_voice("default", &available, "af_sky"), "af_sky");
        assert_eq!(resolve_voice("nobody", &available, "af_sky"), "af_sky");
        assert_eq!(resolve_voice("nobody", &available, "missing"), "af_sky");
    }

    #[test]
    fn test_split_into_chunks() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 35);
        }
    }

    #[test]
    fn test_adjust_audio_speed_lengths() {
        let samples = vec![0.5; 100];
        assert_eq!(adjust_audio_speed(samples.clone(), 2.0).len(), 50);
        assert_eq!(adjust_audio_speed(samples.clone(), 0.5).len(), 200);
        assert_eq!(adjust_audio_speed(samples, 1.0).len(), 100);
    }

    #[test]
    fn test_write_wav_roundtrip_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, &[0.0, 0.5, -0.5, 2.0], 24_000).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.len(), 4);
    }

    #[tokio::test]
    async fn test_synthesize_all_keeps_slide_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let service = SpeechService::new(Arc::new(FakeSpeech));
        let slides = vec![slide(1, "Hello there."), slide(2, "   "), slide(3, "FAIL please"), slide(4, "Bye.")];

        let files = service.synthesize_all(dir.path(), &slides, "default", 1.0, |_| {}).await;

        assert_eq!(files.len(), 4);
        assert!(files[0].as_ref().unwrap().ends_with("slide_01.wav"));
        assert!(files[1].is_none());
        assert!(files[2].is_none());
        assert!(files[3].is_some());
    }

    #[tokio::test]
    async fn test_adhoc_reuses_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = SpeechService::new(Arc::new(FakeSpeech));
        let first = service.synthesize_adhoc(dir.path(), "Same text", "af_sky", 1.0).await.unwrap();
        let second = service.synthesize_adhoc(dir.path(), "Same text", "af_sky", 1.0).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("tts_29f820ec3a2e5eef.wav"));
    }

    #[tokio::test]
    async fn test_engine_calls_leave_the_runtime_free() {
        let engine = Arc::new(Mutex::new(0_u32));
        let (tx, rx) = std::sync::mpsc::channel();
        let notifier = tokio::spawn(async move {
            tx.send(()).unwrap();
        });

        // Only completes if the spawned task runs while this call blocks.
        let calls = run_locked(Arc::clone(&engine), move |count| {
            rx.recv_timeout(std::time::Duration::from_secs(5))
                .map_err(|_| CourseError::TtsError("runtime starved".to_string()))?;
            *count += 1;
            Ok(*count)
        })
        .await
        .unwrap();

        assert_eq!(calls, 1);
        notifier.await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_panic_becomes_tts_error() {
        let engine = Arc::new(Mutex::new(()));
        let err = run_locked(Arc::clone(&engine), |_: &mut ()| -> Result<(), CourseError> { panic!("engine crashed") })
            .await
            .unwrap_err();
        assert!(matches!(err, CourseError::TtsError(_)));

        let err = run_locked(engine, |_: &mut ()| Ok(())).await.unwrap_err();
        assert!(err.to_string().contains("poisoned"));
    }

    #[test]
    fn test_adhoc_name_depends_on_every_input() {
        let base = adhoc_file_name("Same text", "af_sky", 1.0);
        assert_eq!(base, "tts_29f820ec3a2e5eef.wav");
        assert_ne!(base, adhoc_file_name("Same text", "am_adam", 1.0));
        assert_ne!(base, adhoc_file_name("Same text", "af_sky", 1.5));
        assert_ne!(adhoc_file_name("ab", "c", 1.0), adhoc_file_name("a", "bc", 1.0));
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = SpeechService::new(Arc::new(FakeSpeech));
        let err = service.synthesize_adhoc(dir.path(), "**", "af_sky", 1.0).await.unwrap_err();
        assert!(err.is_client_error());
    }
}
