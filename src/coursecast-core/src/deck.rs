//! Presentation building: layout defaults, themes and slide composition.
//!
//! Slides are composed into plain shapes here and serialised to PowerPoint
//! by [`crate::pptx`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::CourseError;
use crate::images::SlideImages;
use crate::pptx::{self, DocumentProperties};
use crate::slides::{ElementKind, Formatting, ImageSpec, LayoutElement, Position, SlideContent, SlideLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// `RRGGBB` as used in DrawingML.
    pub fn hex(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

pub const ERROR_RED: Rgb = Rgb(255, 0, 0);

#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub name: &'static str,
    pub background: Rgb,
    pub title: Rgb,
    pub text: Rgb,
    pub accent: Rgb,
    pub title_font: &'static str,
    pub body_font: &'static str,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            name: "default",
            background: Rgb(32, 32, 32),
            title: Rgb(255, 255, 255),
            text: Rgb(230, 230, 230),
            accent: Rgb(0, 162, 255),
            title_font: "Segoe UI",
            body_font: "Segoe UI",
        }
    }

    pub fn light() -> Self {
        Self {
            name: "light",
            background: Rgb(248, 248, 248),
            title: Rgb(32, 32, 32),
            text: Rgb(64, 64, 64),
            accent: Rgb(0, 122, 255),
            title_font: "Segoe UI",
            body_font: "Segoe UI",
        }
    }

    /// Unknown names use the dark default.
    pub fn named(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "light" => Self::light(),
            _ => Self::dark(),
        }
    }
}

fn parse_hex(text: &str) -> Option<Rgb> {
    let hex = text.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
}

fn parse_triplet(items: &[Value]) -> Option<Rgb> {
    if items.len() != 3 {
        return None;
    }
    let channel = |v: &Value| v.as_u64().filter(|n| *n <= 255).map(|n| n as u8);
    Some(Rgb(channel(&items[0])?, channel(&items[1])?, channel(&items[2])?))
}

/// Parse `#RRGGBB`, `{"rgb": [r, g, b]}` or `[r, g, b]`.
pub fn parse_color(spec: &Value, fallback: Rgb) -> Rgb {
    let parsed = match spec {
        Value::String(s) => parse_hex(s),
        Value::Array(items) => parse_triplet(items),
        Value::Object(map) => map.get("rgb").and_then(|v| v.as_array()).and_then(|a| parse_triplet(a)),
        _ => None,
    };
    parsed.unwrap_or(fallback)
}

pub fn default_position(kind: ElementKind) -> Position {
    match kind {
        ElementKind::Title => Position::new(0.5, 0.5, 9.0, 1.0),
        ElementKind::Shape => Position::new(4.0, 3.0, 2.0, 1.0),
        ElementKind::Image => Position::new(6.0, 2.0, 3.0, 2.0),
        _ => Position::new(1.0, 2.0, 8.0, 3.0),
    }
}

pub fn default_formatting(kind: ElementKind) -> Formatting {
    match kind {
        ElementKind::Title => Formatting {
            font_size: Some(28.0),
            bold: Some(true),
            alignment: Some("center".to_string()),
            ..Formatting::default()
        },
        ElementKind::Shape => Formatting {
            fill_color: Some(Value::String("#0080FF".to_string())),
            ..Formatting::default()
        },
        _ => Formatting {
            font_size: Some(18.0),
            alignment: Some("left".to_string()),
            ..Formatting::default()
        },
    }
}

fn text_element(kind: ElementKind, content: String, position: Position, size: f64) -> LayoutElement {
    LayoutElement {
        position: Some(position),
        formatting: Formatting {
            font_size: Some(size),
            alignment: Some("left".to_string()),
            ..Formatting::default()
        },
        ..LayoutElement::new(kind, content)
    }
}

/// Layout for a slide the model gave no elements.
pub fn default_layout(slide: &SlideContent) -> SlideLayout {
    let mut elements = Vec::new();

    if !slide.title.trim().is_empty() {
        elements.push(LayoutElement {
            position: Some(default_position(ElementKind::Title)),
            formatting: default_formatting(ElementKind::Title),
            ..LayoutElement::new(ElementKind::Title, slide.title.clone())
        });
    }

    let transcript = slide.transcript.trim();
    if !transcript.is_empty() {
        let sentences: Vec<&str> = transcript.split(". ").collect();
        if transcript.chars().count() > 200 && sentences.len() > 3 {
            let bullets: Vec<String> = sentences
                .iter()
                .take(4)
                .map(|s| s.trim().trim_end_matches('.'))
                .filter(|s| !s.is_empty())
                .map(|s| format!("{}.", s))
                .collect();
            elements.push(text_element(
                ElementKind::Bullet,
                bullets.join("\n"),
                Position::new(1.0, 2.0, 8.0, 4.0),
                18.0,
            ));
        } else if transcript.chars().count() > 200 {
            elements.push(text_element(
                ElementKind::Textbox,
                transcript.to_string(),
                Position::new(1.0, 2.0, 8.0, 3.0),
                16.0,
            ));
        } else {
            elements.push(text_element(
                ElementKind::Textbox,
                transcript.to_string(),
                Position::new(1.0, 2.0, 8.0, 2.0),
                18.0,
            ));
        }
    }

    if !slide.images.is_empty() {
        for element in elements.iter_mut().filter(|e| e.kind != ElementKind::Title) {
            if let Some(position) = element.position.as_mut() {
                if slide.images.len() <= 2 {
                    position.width = 5.0;
                } else {
                    position.height = 2.5;
                }
            }
        }
    }

    SlideLayout {
        slide_type: "content_slide".to_string(),
        background_color: None,
        elements,
    }
}

/// Fill in missing layouts, positions and formatting.
pub fn enhance_layouts(slides: &[SlideContent]) -> Vec<SlideContent> {
    slides
        .iter()
        .map(|slide| {
            let mut slide = slide.clone();
            if slide.layout.elements.is_empty() {
                let background = slide.layout.background_color.take();
                slide.layout = SlideLayout {
                    background_color: background,
                    ..default_layout(&slide)
                };
            } else {
                for element in &mut slide.layout.elements {
                    if !element.position.is_some_and(|p| p.is_sized()) {
                        element.position = Some(default_position(element.kind));
                    }
                    if element.formatting == Formatting::default() {
                        element.formatting = default_formatting(element.kind);
                    }
                }
            }
            slide
        })
        .collect()
}

/// Where the `index`-th of `count` images goes when the slide gives no position.
pub fn default_image_position(index: usize, count: usize) -> Position {
    if count <= 2 {
        Position::new(6.2, 1.8 + index as f64 * 2.6, 3.3, 2.2)
    } else {
        let width = (9.0 / count as f64 - 0.2).min(3.0);
        Position::new(0.5 + index as f64 * (width + 0.2), 4.6, width, 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
    Justify,
}

impl Align {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.to_lowercase()).as_deref() {
            Some("center") | Some("centre") => Align::Center,
            Some("right") => Align::Right,
            Some("justify") => Align::Justify,
            _ => Align::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub position: Position,
    pub paragraphs: Vec<String>,
    pub bullets: bool,
    pub font_size: f64,
    pub font_name: String,
    pub bold: bool,
    pub italic: bool,
    pub color: Rgb,
    pub align: Align,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeBox {
    pub position: Position,
    /// DrawingML preset geometry name.
    pub geometry: &'static str,
    pub fill: Rgb,
    pub text: Option<TextBox>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PictureBox {
    pub position: Position,
    pub bytes: Vec<u8>,
    pub extension: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeckShape {
    Text(TextBox),
    Shape(ShapeBox),
    Picture(PictureBox),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeckSlide {
    pub background: Rgb,
    pub shapes: Vec<DeckShape>,
    pub notes: String,
}

pub fn shape_geometry(shape_type: &str) -> &'static str {
    match shape_type.to_lowercase().as_str() {
        "oval" | "circle" | "ellipse" => "ellipse",
        "triangle" => "triangle",
        "diamond" => "diamond",
        "rounded_rectangle" => "roundRect",
        "arrow" => "rightArrow",
        "star" => "star5",
        _ => "rect",
    }
}

fn checked_position(position: Position, what: &str) -> Result<Position, CourseError> {
    let values = [position.x, position.y, position.width, position.height];
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(CourseError::ValidationError(format!("Invalid position for {}", what)));
    }
    Ok(position)
}

fn text_box(element: &LayoutElement, theme: &Theme, title: bool) -> Result<TextBox, CourseError> {
    let position = checked_position(element.position.unwrap_or_else(|| default_position(element.kind)), "text")?;
    let formatting = &element.formatting;
    let default_color = if title { theme.title } else { theme.text };
    Ok(TextBox {
        position,
        paragraphs: element
            .content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        bullets: element.kind == ElementKind::Bullet,
        font_size: formatting.font_size.filter(|s| *s > 0.0).unwrap_or(if title { 32.0 } else { 18.0 }),
        font_name: formatting
            .font_name
            .clone()
            .unwrap_or_else(|| (if title { theme.title_font } else { theme.body_font }).to_string()),
        bold: formatting.bold.unwrap_or(title),
        italic: formatting.italic.unwrap_or(false),
        color: formatting
            .color
            .as_ref()
            .map(|c| parse_color(c, default_color))
            .unwrap_or(default_color),
        align: if title && formatting.alignment.is_none() {
            Align::Center
        } else {
            Align::parse(formatting.alignment.as_deref())
        },
    })
}

fn picture(spec: &ImageSpec, path: &Path, position: Position) -> Option<PictureBox> {
    match fs::read(path) {
        Ok(bytes) => Some(PictureBox {
            position,
            bytes,
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .unwrap_or_else(|| "png".to_string()),
            description: spec.alt_text.clone(),
        }),
        Err(e) => {
            warn!(path = %path.display(), "Image file not readable: {}", e);
            None
        }
    }
}

/// Turn one enhanced slide into shapes.
pub fn compose_slide(slide: &SlideContent, images: Option<&SlideImages>, theme: &Theme) -> Result<DeckSlide, CourseError> {
    let background = slide
        .layout
        .background_color
        .as_ref()
        .map(|c| parse_color(c, theme.background))
        .unwrap_or(theme.background);

    let mut shapes = Vec::new();
    let elements = &slide.layout.elements;
    if !slide.title.trim().is_empty() && !elements.iter().any(|e| e.kind == ElementKind::Title) {
        let title = LayoutElement::new(ElementKind::Title, slide.title.clone());
        shapes.push(DeckShape::Text(text_box(&title, theme, true)?));
    }

    for element in elements {
        match element.kind {
            ElementKind::Title => shapes.push(DeckShape::Text(text_box(element, theme, true)?)),
            ElementKind::Shape => {
                let position = checked_position(element.position.unwrap_or_else(|| default_position(ElementKind::Shape)), "shape")?;
                let fill = element
                    .formatting
                    .fill_color
                    .as_ref()
                    .map(|c| parse_color(c, theme.accent))
                    .unwrap_or(theme.accent);
                let text = if element.content.trim().is_empty() {
                    None
                } else {
                    Some(text_box(element, theme, false)?)
                };
                shapes.push(DeckShape::Shape(ShapeBox {
                    position,
                    geometry: shape_geometry(element.shape_type.as_deref().unwrap_or("rectangle")),
                    fill,
                    text,
                }));
            }
            ElementKind::Image => {}
            _ if element.content.trim().is_empty() => {}
            _ => shapes.push(DeckShape::Text(text_box(element, theme, false)?)),
        }
    }

    if let Some(processed) = images {
        let placed: Vec<_> = processed.images.iter().filter(|i| i.local_path.is_some()).collect();
        for (index, image) in placed.iter().enumerate() {
            let Some(path) = image.local_path.as_deref() else {
                continue;
            };
            let position = image
                .spec
                .position
                .filter(|p| p.is_sized())
                .unwrap_or_else(|| default_image_position(index, placed.len()));
            let position = checked_position(position, "image")?;
            let Some(pic) = picture(&image.spec, path, position) else {
                continue;
            };
            shapes.push(DeckShape::Picture(pic));

            if let Some(caption) = image.spec.caption.as_deref().filter(|c| !c.trim().is_empty()) {
                shapes.push(DeckShape::Text(TextBox {
                    position: Position::new(position.x, position.y + position.height + 0.1, position.width, 0.3),
                    paragraphs: vec![caption.to_string()],
                    bullets: false,
                    font_size: 12.0,
                    font_name: theme.body_font.to_string(),
                    bold: false,
                    italic: true,
                    color: theme.text,
                    align: Align::Center,
                }));
            }
        }
    }

    Ok(DeckSlide {
        background,
        shapes,
        notes: slide.transcript.clone(),
    })
}

/// Red message slide standing in for one that could not be built.
pub fn error_slide(slide_number: usize, message: &str, theme: &Theme) -> DeckSlide {
    DeckSlide {
        background: theme.background,
        shapes: vec![DeckShape::Text(TextBox {
            position: Position::new(1.0, 3.0, 8.0, 2.0),
            paragraphs: vec![format!("Error building slide {}:", slide_number), message.to_string()],
            bullets: false,
            font_size: 16.0,
            font_name: theme.body_font.to_string(),
            bold: false,
            italic: false,
            color: ERROR_RED,
            align: Align::Center,
        })],
        notes: String::new(),
    }
}

/// `Intro to Rust!` -> `Intro_to_Rust_20240101_120000.pptx`.
pub fn generate_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    let mut joined = String::new();
    for part in cleaned.split(|c: char| c.is_whitespace() || c == '-').filter(|p| !p.is_empty()) {
        if !joined.is_empty() {
            joined.push('_');
        }
        joined.push_str(part);
    }
    let ascii: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(50)
        .collect();
    let stem = ascii.trim_matches('_');
    let stem = if stem.is_empty() { "presentation" } else { stem };
    format!("{}_{}.pptx", stem, Local::now().format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltPresentation {
    pub path: PathBuf,
    pub slide_count: usize,
    pub error_slides: usize,
}

/// Builds a `.pptx` from generated slides.
pub struct PresentationBuilder {
    theme: Theme,
}

impl PresentationBuilder {
    pub fn new(theme_name: &str) -> Self {
        Self {
            theme: Theme::named(theme_name),
        }
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn build(
        &self,
        path: &Path,
        course_title: &str,
        slides: &[SlideContent],
        images: &[SlideImages],
    ) -> Result<BuiltPresentation, CourseError> {
        info!(title = course_title, slides = slides.len(), "Building presentation");

        let enhanced = enhance_layouts(slides);
        let mut deck = Vec::with_capacity(enhanced.len());
        let mut error_slides = 0;
        for (index, slide) in enhanced.iter().enumerate() {
            let slide_images = images.iter().find(|i| i.slide_number == slide.slide_number);
            match compose_slide(slide, slide_images, &self.theme) {
                Ok(built) => {
                    debug!(slide = index + 1, title = %slide.title, "Built slide");
                    deck.push(built);
                }
                Err(e) => {
                    error!(slide = index + 1, "Error building slide: {}", e);
                    error_slides += 1;
                    deck.push(error_slide(index + 1, &e.to_string(), &self.theme));
                }
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let properties = DocumentProperties {
            title: course_title.to_string(),
            author: "AI-Powered Educational System".to_string(),
            subject: "Educational Presentation".to_string(),
        };
        pptx::write_pptx(path, &properties, &self.theme, &deck)?;

        info!(path = %path.display(), "Saved presentation");
        Ok(BuiltPresentation {
            path: path.to_path_buf(),
            slide_count: deck.len(),
            error_slides,
        })
    }
}
