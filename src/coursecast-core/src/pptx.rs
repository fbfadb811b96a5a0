//! Minimal PresentationML writer.
//!
//! Produces a 4:3 deck with one blank layout, speaker notes and embedded
//! pictures. Parts are written straight into a zip container.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::deck::{Align, DeckShape, DeckSlide, PictureBox, Rgb, ShapeBox, TextBox, Theme};
use crate::error::CourseError;
use crate::slides::Position;

const EMU_PER_INCH: f64 = 914_400.0;
const SLIDE_WIDTH: i64 = 9_144_000;
const SLIDE_HEIGHT: i64 = 6_858_000;

const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentProperties {
    pub title: String,
    pub author: String,
    pub subject: String,
}

/// Escape text for XML content and attributes, dropping disallowed control characters.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

fn emu(inches: f64) -> i64 {
    (inches.max(0.0) * EMU_PER_INCH).round() as i64
}

fn xfrm(position: &Position) -> String {
    format!(
        r#"<a:xfrm><a:off x="{}" y="{}"/><a:ext cx="{}" cy="{}"/></a:xfrm>"#,
        emu(position.x),
        emu(position.y),
        emu(position.width),
        emu(position.height)
    )
}

fn solid_fill(color: Rgb) -> String {
    format!(r#"<a:solidFill><a:srgbClr val="{}"/></a:solidFill>"#, color.hex())
}

fn align_attr(align: Align) -> &'static str {
    match align {
        Align::Left => "l",
        Align::Center => "ctr",
        Align::Right => "r",
        Align::Justify => "just",
    }
}

fn text_body(text: &TextBox) -> String {
    let mut body = String::from(r#"<p:txBody><a:bodyPr wrap="square" rtlCol="0"><a:normAutofit/></a:bodyPr><a:lstStyle/>"#);
    let run_props = format!(
        r#"<a:rPr lang="en-US" sz="{}" b="{}" i="{}" dirty="0">{}<a:latin typeface="{}"/></a:rPr>"#,
        (text.font_size * 100.0).round() as i64,
        u8::from(text.bold),
        u8::from(text.italic),
        solid_fill(text.color),
        xml_escape(&text.font_name)
    );
    let para_props = if text.bullets {
        format!(
            r#"<a:pPr marL="342900" indent="-342900" algn="{}"><a:buFont typeface="Arial"/><a:buChar char="&#8226;"/></a:pPr>"#,
            align_attr(text.align)
        )
    } else {
        format!(r#"<a:pPr algn="{}"><a:buNone/></a:pPr>"#, align_attr(text.align))
    };

    if text.paragraphs.is_empty() {
        let _ = write!(body, "<a:p>{}<a:endParaRPr lang=\"en-US\"/></a:p>", para_props);
    }
    for paragraph in &text.paragraphs {
        let _ = write!(
            body,
            "<a:p>{}<a:r>{}<a:t>{}</a:t></a:r></a:p>",
            para_props,
            run_props,
            xml_escape(paragraph)
        );
    }
    body.push_str("</p:txBody>");
    body
}

fn text_shape(id: usize, text: &TextBox) -> String {
    format!(
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="TextBox {id}"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr>{}<a:prstGeom prst="rect"><a:avLst/></a:prstGeom><a:noFill/></p:spPr>{}</p:sp>"#,
        xfrm(&text.position),
        text_body(text)
    )
}

fn geometry_shape(id: usize, shape: &ShapeBox) -> String {
    let body = match &shape.text {
        Some(text) => text_body(text),
        None => r#"<p:txBody><a:bodyPr/><a:lstStyle/><a:p><a:endParaRPr lang="en-US"/></a:p></p:txBody>"#.to_string(),
    };
    format!(
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="Shape {id}"/><p:cNvSpPr/><p:nvPr/></p:nvSpPr><p:spPr>{}<a:prstGeom prst="{}"><a:avLst/></a:prstGeom>{}</p:spPr>{}</p:sp>"#,
        xfrm(&shape.position),
        shape.geometry,
        solid_fill(shape.fill),
        body
    )
}

fn picture_shape(id: usize, rel_id: &str, picture: &PictureBox) -> String {
    format!(
        r#"<p:pic><p:nvPicPr><p:cNvPr id="{id}" name="Picture {id}" descr="{}"/><p:cNvPicPr><a:picLocks noChangeAspect="1"/></p:cNvPicPr><p:nvPr/></p:nvPicPr><p:blipFill><a:blip r:embed="{rel_id}"/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr>{}<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic>"#,
        xml_escape(&picture.description),
        xfrm(&picture.position)
    )
}

const GROUP_PROPS: &str = r#"<p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr>"#;

/// Media part name for each picture, in slide order.
struct MediaEntry {
    part: String,
    rel_id: String,
}

fn slide_xml(slide: &DeckSlide, media: &[MediaEntry]) -> String {
    let mut tree = String::new();
    let mut pictures = media.iter();
    for (index, shape) in slide.shapes.iter().enumerate() {
        let id = index + 2;
        match shape {
            DeckShape::Text(text) => tree.push_str(&text_shape(id, text)),
            DeckShape::Shape(shape) => tree.push_str(&geometry_shape(id, shape)),
            DeckShape::Picture(picture) => {
                if let Some(entry) = pictures.next() {
                    tree.push_str(&picture_shape(id, &entry.rel_id, picture));
                }
            }
        }
    }
    format!(
        r#"{XML_DECL}<p:sld xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:bg><p:bgPr>{}<a:effectLst/></p:bgPr></p:bg><p:spTree>{GROUP_PROPS}{tree}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#,
        solid_fill(slide.background)
    )
}

fn notes_xml(notes: &str) -> String {
    let paragraphs: String = notes
        .lines()
        .map(|line| format!(r#"<a:p><a:r><a:rPr lang="en-US" dirty="0"/><a:t>{}</a:t></a:r></a:p>"#, xml_escape(line)))
        .collect();
    let paragraphs = if paragraphs.is_empty() {
        r#"<a:p><a:endParaRPr lang="en-US"/></a:p>"#.to_string()
    } else {
        paragraphs
    };
    format!(
        r#"{XML_DECL}<p:notes xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:spTree>{GROUP_PROPS}<p:sp><p:nvSpPr><p:cNvPr id="2" name="Slide Image Placeholder 1"/><p:cNvSpPr><a:spLocks noGrp="1" noRot="1" noChangeAspect="1"/></p:cNvSpPr><p:nvPr><p:ph type="sldImg"/></p:nvPr></p:nvSpPr><p:spPr/></p:sp><p:sp><p:nvSpPr><p:cNvPr id="3" name="Notes Placeholder 2"/><p:cNvSpPr><a:spLocks noGrp="1"/></p:cNvSpPr><p:nvPr><p:ph type="body" idx="1"/></p:nvPr></p:nvSpPr><p:spPr/><p:txBody><a:bodyPr/><a:lstStyle/>{paragraphs}</p:txBody></p:sp></p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:notes>"#
    )
}

struct Rel {
    id: String,
    kind: String,
    target: String,
}

impl Rel {
    fn new(id: impl Into<String>, kind: &str, target: impl Into<String>) -> Self {
        let kind = if kind.starts_with("http") {
            kind.to_string()
        } else {
            format!("{REL_BASE}/{kind}")
        };
        Self {
            id: id.into(),
            kind,
            target: target.into(),
        }
    }
}

fn relationships(entries: &[Rel]) -> String {
    let mut xml = format!(
        r#"{XML_DECL}<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#
    );
    for entry in entries {
        let _ = write!(
            xml,
            r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
            entry.id,
            entry.kind,
            xml_escape(&entry.target)
        );
    }
    xml.push_str("</Relationships>");
    xml
}

fn media_content_type(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "image/png",
    }
}

fn content_types(slide_count: usize, extensions: &[String]) -> String {
    let mut xml = format!(
        r#"{XML_DECL}<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>"#
    );
    for extension in extensions {
        let _ = write!(
            xml,
            r#"<Default Extension="{}" ContentType="{}"/>"#,
            xml_escape(extension),
            media_content_type(extension)
        );
    }
    let overrides = [
        ("/ppt/presentation.xml", "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"),
        ("/ppt/slideMasters/slideMaster1.xml", "application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml"),
        ("/ppt/slideLayouts/slideLayout1.xml", "application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml"),
        ("/ppt/notesMasters/notesMaster1.xml", "application/vnd.openxmlformats-officedocument.presentationml.notesMaster+xml"),
        ("/ppt/theme/theme1.xml", "application/vnd.openxmlformats-officedocument.theme+xml"),
        ("/ppt/theme/theme2.xml", "application/vnd.openxmlformats-officedocument.theme+xml"),
        ("/ppt/presProps.xml", "application/vnd.openxmlformats-officedocument.presentationml.presProps+xml"),
        ("/ppt/viewProps.xml", "application/vnd.openxmlformats-officedocument.presentationml.viewProps+xml"),
        ("/ppt/tableStyles.xml", "application/vnd.openxmlformats-officedocument.presentationml.tableStyles+xml"),
        ("/docProps/core.xml", "application/vnd.openxmlformats-package.core-properties+xml"),
        ("/docProps/app.xml", "application/vnd.openxmlformats-officedocument.extended-properties+xml"),
    ];
    for (part, kind) in overrides {
        let _ = write!(xml, r#"<Override PartName="{part}" ContentType="{kind}"/>"#);
    }
    for n in 1..=slide_count {
        let _ = write!(
            xml,
            r#"<Override PartName="/ppt/slides/slide{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/><Override PartName="/ppt/notesSlides/notesSlide{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.notesSlide+xml"/>"#
        );
    }
    xml.push_str("</Types>");
    xml
}

fn presentation_xml(slide_count: usize) -> String {
    let slide_ids: String = (1..=slide_count)
        .map(|n| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 255 + n, n + 3))
        .collect();
    let slide_list = if slide_ids.is_empty() {
        String::new()
    } else {
        format!("<p:sldIdLst>{slide_ids}</p:sldIdLst>")
    };
    format!(
        r#"{XML_DECL}<p:presentation xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" saveSubsetFonts="1"><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:notesMasterIdLst><p:notesMasterId r:id="rId2"/></p:notesMasterIdLst>{slide_list}<p:sldSz cx="{SLIDE_WIDTH}" cy="{SLIDE_HEIGHT}" type="screen4x3"/><p:notesSz cx="{SLIDE_HEIGHT}" cy="{SLIDE_WIDTH}"/><p:defaultTextStyle><a:defPPr><a:defRPr lang="en-US"/></a:defPPr></p:defaultTextStyle></p:presentation>"#
    )
}

fn presentation_rels(slide_count: usize) -> String {
    let mut entries = vec![
        Rel::new("rId1", "slideMaster", "slideMasters/slideMaster1.xml"),
        Rel::new("rId2", "notesMaster", "notesMasters/notesMaster1.xml"),
        Rel::new("rId3", "theme", "theme/theme1.xml"),
    ];
    for n in 1..=slide_count {
        entries.push(Rel::new(format!("rId{}", n + 3), "slide", format!("slides/slide{n}.xml")));
    }
    let next = slide_count + 4;
    entries.push(Rel::new(format!("rId{}", next), "presProps", "presProps.xml"));
    entries.push(Rel::new(format!("rId{}", next + 1), "viewProps", "viewProps.xml"));
    entries.push(Rel::new(format!("rId{}", next + 2), "tableStyles", "tableStyles.xml"));
    relationships(&entries)
}

fn slide_master_xml(theme: &Theme) -> String {
    format!(
        r#"{XML_DECL}<p:sldMaster xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:bg><p:bgPr>{}<a:effectLst/></p:bgPr></p:bg><p:spTree>{GROUP_PROPS}</p:spTree></p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst></p:sldMaster>"#,
        solid_fill(theme.background)
    )
}

fn slide_layout_xml() -> String {
    format!(
        r#"{XML_DECL}<p:sldLayout xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" type="blank" preserve="1"><p:cSld name="Blank"><p:spTree>{GROUP_PROPS}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"#
    )
}

fn notes_master_xml() -> String {
    format!(
        r#"{XML_DECL}<p:notesMaster xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:spTree>{GROUP_PROPS}</p:spTree></p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/></p:notesMaster>"#
    )
}

fn theme_xml(theme: &Theme) -> String {
    let accent = theme.accent.hex();
    let font = xml_escape(theme.body_font);
    let heading = xml_escape(theme.title_font);
    let fill = r#"<a:solidFill><a:schemeClr val="phClr"/></a:solidFill>"#;
    let line = r#"<a:ln w="9525"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln>"#;
    let effect = "<a:effectStyle><a:effectLst/></a:effectStyle>";
    format!(
        r#"{XML_DECL}<a:theme xmlns:a="{NS_A}" name="Coursecast"><a:themeElements><a:clrScheme name="Coursecast"><a:dk1><a:srgbClr val="000000"/></a:dk1><a:lt1><a:srgbClr val="FFFFFF"/></a:lt1><a:dk2><a:srgbClr val="{}"/></a:dk2><a:lt2><a:srgbClr val="{}"/></a:lt2><a:accent1><a:srgbClr val="{accent}"/></a:accent1><a:accent2><a:srgbClr val="ED7D31"/></a:accent2><a:accent3><a:srgbClr val="A5A5A5"/></a:accent3><a:accent4><a:srgbClr val="FFC000"/></a:accent4><a:accent5><a:srgbClr val="5B9BD5"/></a:accent5><a:accent6><a:srgbClr val="70AD47"/></a:accent6><a:hlink><a:srgbClr val="{accent}"/></a:hlink><a:folHlink><a:srgbClr val="954F72"/></a:folHlink></a:clrScheme><a:fontScheme name="Coursecast"><a:majorFont><a:latin typeface="{heading}"/><a:ea typeface=""/><a:cs typeface=""/></a:majorFont><a:minorFont><a:latin typeface="{font}"/><a:ea typeface=""/><a:cs typeface=""/></a:minorFont></a:fontScheme><a:fmtScheme name="Coursecast"><a:fillStyleLst>{fill}{fill}{fill}</a:fillStyleLst><a:lnStyleLst>{line}{line}{line}</a:lnStyleLst><a:effectStyleLst>{effect}{effect}{effect}</a:effectStyleLst><a:bgFillStyleLst>{fill}{fill}{fill}</a:bgFillStyleLst></a:fmtScheme></a:themeElements><a:objectDefaults/><a:extraClrSchemeLst/></a:theme>"#,
        theme.background.hex(),
        theme.text.hex()
    )
}

fn core_xml(properties: &DocumentProperties) -> String {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        r#"{XML_DECL}<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:dcmitype="http://purl.org/dc/dcmitype/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:title>{}</dc:title><dc:subject>{}</dc:subject><dc:creator>{}</dc:creator><cp:lastModifiedBy>{}</cp:lastModifiedBy><dcterms:created xsi:type="dcterms:W3CDTF">{now}</dcterms:created><dcterms:modified xsi:type="dcterms:W3CDTF">{now}</dcterms:modified></cp:coreProperties>"#,
        xml_escape(&properties.title),
        xml_escape(&properties.subject),
        xml_escape(&properties.author),
        xml_escape(&properties.author)
    )
}

fn app_xml(slide_count: usize) -> String {
    format!(
        r#"{XML_DECL}<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties" xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes"><Application>coursecast</Application><PresentationFormat>On-screen Show (4:3)</PresentationFormat><Slides>{slide_count}</Slides><Notes>{slide_count}</Notes></Properties>"#
    )
}

fn pres_props_xml() -> String {
    format!(r#"{XML_DECL}<p:presentationPr xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"/>"#)
}

fn view_props_xml() -> String {
    format!(
        r#"{XML_DECL}<p:viewPr xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:normalViewPr><p:restoredLeft sz="15620"/><p:restoredTop sz="94660"/></p:normalViewPr><p:gridSpacing cx="76200" cy="76200"/></p:viewPr>"#
    )
}

fn table_styles_xml() -> String {
    format!(r#"{XML_DECL}<a:tblStyleLst xmlns:a="{NS_A}" def="{{5C22544A-7EE6-4342-B048-85BDC9FD1C3A}}"/>"#)
}

/// Write `slides` as a `.pptx` file at `path`.
pub fn write_pptx(
    path: &Path,
    properties: &DocumentProperties,
    theme: &Theme,
    slides: &[DeckSlide],
) -> Result<(), CourseError> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut media_counter = 0;
    let mut extensions: Vec<String> = Vec::new();
    let mut slide_media: Vec<Vec<MediaEntry>> = Vec::with_capacity(slides.len());
    for slide in slides {
        let mut entries = Vec::new();
        for shape in &slide.shapes {
            if let DeckShape::Picture(picture) = shape {
                media_counter += 1;
                if !extensions.contains(&picture.extension) {
                    extensions.push(picture.extension.clone());
                }
                entries.push(MediaEntry {
                    part: format!("image{}.{}", media_counter, picture.extension),
                    rel_id: format!("rId{}", entries.len() + 3),
                });
            }
        }
        slide_media.push(entries);
    }

    let mut put = |name: &str, data: &[u8]| -> Result<(), CourseError> {
        zip.start_file(name, options)?;
        zip.write_all(data)?;
        Ok(())
    };

    put("[Content_Types].xml", content_types(slides.len(), &extensions).as_bytes())?;
    put(
        "_rels/.rels",
        relationships(&[
            Rel::new("rId1", "officeDocument", "ppt/presentation.xml"),
            Rel::new(
                "rId2",
                "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties",
                "docProps/core.xml",
            ),
            Rel::new("rId3", "extended-properties", "docProps/app.xml"),
        ])
        .as_bytes(),
    )?;
    put("docProps/core.xml", core_xml(properties).as_bytes())?;
    put("docProps/app.xml", app_xml(slides.len()).as_bytes())?;
    put("ppt/presentation.xml", presentation_xml(slides.len()).as_bytes())?;
    put("ppt/_rels/presentation.xml.rels", presentation_rels(slides.len()).as_bytes())?;
    put("ppt/presProps.xml", pres_props_xml().as_bytes())?;
    put("ppt/viewProps.xml", view_props_xml().as_bytes())?;
    put("ppt/tableStyles.xml", table_styles_xml().as_bytes())?;
    put("ppt/theme/theme1.xml", theme_xml(theme).as_bytes())?;
    put("ppt/theme/theme2.xml", theme_xml(theme).as_bytes())?;
    put("ppt/slideMasters/slideMaster1.xml", slide_master_xml(theme).as_bytes())?;
    put(
        "ppt/slideMasters/_rels/slideMaster1.xml.rels",
        relationships(&[
            Rel::new("rId1", "slideLayout", "../slideLayouts/slideLayout1.xml"),
            Rel::new("rId2", "theme", "../theme/theme1.xml"),
        ])
        .as_bytes(),
    )?;
    put("ppt/slideLayouts/slideLayout1.xml", slide_layout_xml().as_bytes())?;
    put(
        "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
        relationships(&[Rel::new("rId1", "slideMaster", "../slideMasters/slideMaster1.xml")]).as_bytes(),
    )?;
    put("ppt/notesMasters/notesMaster1.xml", notes_master_xml().as_bytes())?;
    put(
        "ppt/notesMasters/_rels/notesMaster1.xml.rels",
        relationships(&[Rel::new("rId1", "theme", "../theme/theme2.xml")]).as_bytes(),
    )?;

    for (index, (slide, media)) in slides.iter().zip(&slide_media).enumerate() {
        let n = index + 1;
        put(&format!("ppt/slides/slide{n}.xml"), slide_xml(slide, media).as_bytes())?;

        let mut rels = vec![
            Rel::new("rId1", "slideLayout", "../slideLayouts/slideLayout1.xml"),
            Rel::new("rId2", "notesSlide", format!("../notesSlides/notesSlide{n}.xml")),
        ];
        for entry in media {
            rels.push(Rel::new(entry.rel_id.clone(), "image", format!("../media/{}", entry.part)));
        }
        put(&format!("ppt/slides/_rels/slide{n}.xml.rels"), relationships(&rels).as_bytes())?;

        put(&format!("ppt/notesSlides/notesSlide{n}.xml"), notes_xml(&slide.notes).as_bytes())?;
        put(
            &format!("ppt/notesSlides/_rels/notesSlide{n}.xml.rels"),
            relationships(&[
                Rel::new("rId1", "notesMaster", "../notesMasters/notesMaster1.xml"),
                Rel::new("rId2", "slide", format!("../slides/slide{n}.xml")),
            ])
            .as_bytes(),
        )?;

        let pictures = slide.shapes.iter().filter_map(|s| match s {
            DeckShape::Picture(p) => Some(p),
            _ => None,
        });
        for (entry, picture) in media.iter().zip(pictures) {
            put(&format!("ppt/media/{}", entry.part), &picture.bytes)?;
        }
    }

    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::{DeckSlide, TextBox};
    use std::io::Read;
    use tempfile::TempDir;

    fn text(paragraphs: &[&str], bullets: bool) -> TextBox {
        TextBox {
            position: Position::new(1.0, 2.0, 8.0, 3.0),
            paragraphs: paragraphs.iter().map(|s| s.to_string()).collect(),
            bullets,
            font_size: 18.0,
            font_name: "Segoe UI".to_string(),
            bold: false,
            italic: false,
            color: Rgb(230, 230, 230),
            align: Align::Left,
        }
    }

    fn read(archive: &mut zip::ZipArchive<File>, name: &str) -> String {
        let mut content = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a < b & \"c\""), "a &lt; b &amp; &quot;c&quot;");
        assert_eq!(xml_escape("bell\u{7}"), "bell");
    }

    #[test]
    fn test_text_body_bullets_and_sizes() {
        let body = text_body(&text(&["One", "Two"], true));
        assert_eq!(body.matches("<a:buChar").count(), 2);
        assert!(body.contains(r#"sz="1800""#));
        assert!(body.contains("<a:t>Two</a:t>"));
    }

    #[test]
    fn test_emu_conversion() {
        assert_eq!(emu(1.0), 914_400);
        assert_eq!(emu(-3.0), 0);
    }

    #[test]
    fn test_writes_package() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deck.pptx");
        let slides = vec![
            DeckSlide {
                background: Rgb(32, 32, 32),
                shapes: vec![DeckShape::Text(text(&["Ownership & borrowing"], false))],
                notes: "Say <hello>".to_string(),
            },
            DeckSlide {
                background: Rgb(248, 248, 248),
                shapes: vec![DeckShape::Picture(PictureBox {
                    position: Position::new(6.0, 2.0, 3.0, 2.0),
                    bytes: vec![1, 2, 3],
                    extension: "png".to_string(),
                    description: "cell".to_string(),
                })],
                notes: String::new(),
            },
        ];
        let properties = DocumentProperties {
            title: "Intro".to_string(),
            author: "AI-Powered Educational System".to_string(),
            subject: "Educational Presentation".to_string(),
        };
        write_pptx(&path, &properties, &Theme::dark(), &slides).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        for expected in [
            "[Content_Types].xml",
            "ppt/presentation.xml",
            "ppt/slides/slide2.xml",
            "ppt/notesSlides/notesSlide1.xml",
            "ppt/media/image1.png",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }

        let slide = read(&mut archive, "ppt/slides/slide1.xml");
        assert!(slide.contains("Ownership &amp; borrowing"));
        assert!(slide.contains(r#"<a:srgbClr val="202020"/>"#));

        let notes = read(&mut archive, "ppt/notesSlides/notesSlide1.xml");
        assert!(notes.contains("Say &lt;hello&gt;"));

        let rels = read(&mut archive, "ppt/slides/_rels/slide2.xml.rels");
        assert!(rels.contains("../media/image1.png"));

        let types = read(&mut archive, "[Content_Types].xml");
        assert!(types.contains(r#"Extension="png""#));
        assert_eq!(types.matches("slide+xml").count(), 2);

        let core = read(&mut archive, "docProps/core.xml");
        assert!(core.contains("<dc:creator>AI-Powered Educational System</dc:creator>"));
    }
}
