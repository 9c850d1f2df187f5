//! PDF marking with lopdf
//!
//! Every page gets four marks: the primary watermark text, an `ID: <id>`
//! label in the bottom-left and top-right corners, and a footer with the
//! viewer's email and the delivery date. The page's original content is
//! wrapped in `q`/`Q` so its graphics state cannot leak into the marks.

use crate::{Attribution, WatermarkError};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use scriptorium_common::models::{WatermarkPosition, WatermarkSettings};
use tracing::debug;

const FONT_RESOURCE: &str = "ScWmF";
const MARK_GS: &str = "ScWmGs";
const LABEL_GS: &str = "ScWmGsId";

const LABEL_FONT_SIZE: f32 = 8.0;
const FOOTER_FONT_SIZE: f32 = 7.0;
const MARGIN: f32 = 18.0;
const MAX_LABEL_OPACITY: f32 = 0.6;
/// Mean Helvetica advance as a fraction of the font size
const HELVETICA_AVG_ADVANCE: f32 = 0.5;
const TILE_STEP: f32 = 220.0;

/// US Letter, used when a page has no usable MediaBox
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

#[derive(Debug, Clone, Copy)]
struct PageBox {
    llx: f32,
    lly: f32,
    width: f32,
    height: f32,
}

pub(crate) fn mark(
    document: &[u8],
    text: &str,
    attribution: &Attribution,
    settings: &WatermarkSettings,
) -> Result<Vec<u8>, WatermarkError> {
    let mut doc = Document::load_mem(document).map_err(|e| WatermarkError::InvalidPdf {
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(WatermarkError::InvalidPdf {
            message: "document has no pages".to_string(),
        });
    }
    debug!(page_count = pages.len(), "Watermarking PDF");

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let mark_gs_id = doc.add_object(graphics_state(settings.opacity()));
    let label_gs_id = doc.add_object(graphics_state(
        (settings.opacity() * 2.0).min(MAX_LABEL_OPACITY),
    ));

    let id_label = format!("ID: {}", attribution.watermark_id);
    let footer = format!(
        "{} | {} | {}",
        settings.text,
        attribution.user_email,
        attribution.timestamp.format("%Y-%m-%d")
    );

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));

    for (page_number, page_id) in pages {
        let page_box = media_box(&doc, page_id);
        let marks = page_marks(page_box, text, &id_label, &footer, settings);
        let encoded = Content { operations: marks }
            .encode()
            .map_err(|e| WatermarkError::Encode {
                message: format!("page {}: {}", page_number, e),
            })?;
        let marks_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let mut resources = inherited_resources(&doc, page_id);
        add_resource(&doc, &mut resources, "Font", FONT_RESOURCE, font_id);
        add_resource(&doc, &mut resources, "ExtGState", MARK_GS, mark_gs_id);
        add_resource(&doc, &mut resources, "ExtGState", LABEL_GS, label_gs_id);

        let mut contents = vec![Object::Reference(open_id)];
        contents.extend(existing_contents(&doc, page_id));
        contents.push(Object::Reference(marks_id));

        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| WatermarkError::InvalidPdf {
                message: format!("page {} is not a dictionary: {}", page_number, e),
            })?;
        page.set("Resources", Object::Dictionary(resources));
        page.set("Contents", Object::Array(contents));
    }

    let mut out = Vec::with_capacity(document.len() + 4096);
    doc.save_to(&mut out).map_err(|e| WatermarkError::Encode {
        message: format!("Failed to write PDF: {}", e),
    })?;
    Ok(out)
}

fn graphics_state(opacity: f32) -> Dictionary {
    dictionary! {
        "Type" => "ExtGState",
        "ca" => real(opacity),
        "CA" => real(opacity),
    }
}

fn real(value: f32) -> Object {
    Object::Real(value.into())
}

fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f as f32),
        _ => None,
    }
}

/// Follow one level of indirection
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Look up an inheritable page attribute, walking up the page tree
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok();
    // Page trees are shallow; the bound guards against Parent cycles
    for _ in 0..32 {
        let dict = current?;
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok();
    }
    None
}

fn media_box(doc: &Document, page_id: ObjectId) -> PageBox {
    let coords = inherited(doc, page_id, b"MediaBox")
        .and_then(|object| object.as_array().ok())
        .and_then(|array| {
            let values: Vec<f32> = array
                .iter()
                .filter_map(|item| resolve(doc, item).and_then(number))
                .collect();
            (values.len() == 4).then(|| [values[0], values[1], values[2], values[3]])
        })
        .unwrap_or(DEFAULT_MEDIA_BOX);

    let (llx, urx) = (coords[0].min(coords[2]), coords[0].max(coords[2]));
    let (lly, ury) = (coords[1].min(coords[3]), coords[1].max(coords[3]));
    PageBox {
        llx,
        lly,
        width: (urx - llx).max(1.0),
        height: (ury - lly).max(1.0),
    }
}

/// The page's effective resources as a direct dictionary the page can own
fn inherited_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    inherited(doc, page_id, b"Resources")
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_default()
}

/// Insert `entry` into the `category` sub-dictionary, resolving it if indirect
fn add_resource(
    doc: &Document,
    resources: &mut Dictionary,
    category: &str,
    entry: &str,
    id: ObjectId,
) {
    let mut sub = resources
        .get(category.as_bytes())
        .ok()
        .and_then(|object| resolve(doc, object))
        .and_then(|object| object.as_dict().ok())
        .cloned()
        .unwrap_or_default();
    sub.set(entry, Object::Reference(id));
    resources.set(category, Object::Dictionary(sub));
}

fn existing_contents(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            // An indirect array of streams is flattened into the new array
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn text_width(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * HELVETICA_AVG_ADVANCE
}

/// `BT ... ET` block drawing `text` with its baseline origin at (x, y),
/// rotated by `angle` degrees
fn text_block(text: &str, font_size: f32, x: f32, y: f32, angle: f32) -> Vec<Operation> {
    let (sin, cos) = angle.to_radians().sin_cos();
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![name(FONT_RESOURCE), real(font_size)]),
        Operation::new(
            "Tm",
            vec![real(cos), real(sin), real(-sin), real(cos), real(x), real(y)],
        ),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
    ]
}

/// Text centred on (cx, cy) along a baseline rotated by `angle`
fn centred_block(text: &str, font_size: f32, cx: f32, cy: f32, angle: f32) -> Vec<Operation> {
    let half = text_width(text, font_size) / 2.0;
    let (sin, cos) = angle.to_radians().sin_cos();
    let x = cx - half * cos + (font_size / 3.0) * sin;
    let y = cy - half * sin - (font_size / 3.0) * cos;
    text_block(text, font_size, x, y, angle)
}

fn page_marks(
    page: PageBox,
    text: &str,
    id_label: &str,
    footer: &str,
    settings: &WatermarkSettings,
) -> Vec<Operation> {
    let [r, g, b] = settings.rgb().map(|c| c as f32 / 255.0);
    let font_size = settings.font_size();
    let cx = page.llx + page.width / 2.0;
    let cy = page.lly + page.height / 2.0;

    let mut ops = vec![
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new("rg", vec![real(r), real(g), real(b)]),
        Operation::new("gs", vec![name(MARK_GS)]),
    ];

    match settings.position {
        WatermarkPosition::Diagonal => ops.extend(centred_block(text, font_size, cx, cy, 45.0)),
        WatermarkPosition::Center => ops.extend(centred_block(text, font_size, cx, cy, 0.0)),
        WatermarkPosition::Footer => ops.extend(centred_block(
            text,
            font_size,
            cx,
            page.lly + MARGIN * 2.0 + font_size,
            0.0,
        )),
        WatermarkPosition::Tiled => {
            let mut y = page.lly + TILE_STEP / 2.0;
            while y < page.lly + page.height {
                let mut x = page.llx + TILE_STEP / 2.0;
                while x < page.llx + page.width {
                    ops.extend(centred_block(text, font_size, x, y, 45.0));
                    x += TILE_STEP;
                }
                y += TILE_STEP;
            }
        }
    }

    ops.push(Operation::new("gs", vec![name(LABEL_GS)]));

    // Corner labels
    ops.extend(text_block(
        id_label,
        LABEL_FONT_SIZE,
        page.llx + MARGIN,
        page.lly + MARGIN + FOOTER_FONT_SIZE,
        0.0,
    ));
    ops.extend(text_block(
        id_label,
        LABEL_FONT_SIZE,
        page.llx + page.width - MARGIN - text_width(id_label, LABEL_FONT_SIZE),
        page.lly + page.height - MARGIN,
        0.0,
    ));

    // Footer
    ops.extend(centred_block(
        footer,
        FOOTER_FONT_SIZE,
        cx,
        page.lly + MARGIN / 2.0,
        0.0,
    ));

    ops.push(Operation::new("Q", vec![]));
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    /// Two-page PDF whose Resources and MediaBox live on the page tree root
    fn sample_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for i in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Folio {}", i + 1))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let page_tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(page_tree));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn attribution() -> Attribution {
        Attribution {
            user_id: Uuid::new_v4(),
            user_email: "jane@example.edu".into(),
            user_name: "Jane Doe".into(),
            watermark_id: "abcdefgh-1234-5678".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap(),
            institution: Some("Inst".into()),
        }
    }

    fn page_text(doc: &Document, page_id: ObjectId) -> String {
        String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
    }

    #[test]
    fn test_every_page_carries_all_marks() {
        let settings = WatermarkSettings::with_text("Scriptorium");
        let attribution = attribution();
        let text = crate::watermark_text(&attribution, &settings);

        let marked = mark(&sample_pdf(2), &text, &attribution, &settings).unwrap();
        let doc = Document::load_mem(&marked).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);

        for (number, page_id) in pages {
            let content = page_text(&doc, page_id);
            assert!(content.contains(&format!("Folio {}", number)), "original text lost");
            assert!(content.contains("Inst | Jane Doe | jane@example.edu | 2024-01-15 | abcdefgh"));
            assert_eq!(content.matches("ID: abcdefgh-1234-5678").count(), 2);
            assert!(content.contains("Scriptorium | jane@example.edu | 2024-01-15"));

            let page = doc.get_dictionary(page_id).unwrap();
            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
            assert!(fonts.has(b"F1"), "inherited font dropped");
            assert!(fonts.has(FONT_RESOURCE.as_bytes()));
            let states = resources.get(b"ExtGState").unwrap().as_dict().unwrap();
            assert!(states.has(MARK_GS.as_bytes()));
            assert!(states.has(LABEL_GS.as_bytes()));
        }
    }

    #[test]
    fn test_viewer_email_in_raw_bytes() {
        let settings = WatermarkSettings::with_text("Scriptorium");
        let attribution = attribution();
        let marked = mark(&sample_pdf(1), "mark", &attribution, &settings).unwrap();
        let needle = b"jane@example.edu";
        assert!(marked.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_original_content_is_isolated() {
        let settings = WatermarkSettings::with_text("Scriptorium");
        let marked = mark(&sample_pdf(1), "mark", &attribution(), &settings).unwrap();
        let doc = Document::load_mem(&marked).unwrap();
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();

        let contents = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Contents")
            .unwrap()
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(contents.len(), 3);

        let content = page_text(&doc, page_id);
        assert!(content.trim_start().starts_with('q'));
    }

    #[test]
    fn test_tiled_position_repeats_mark() {
        let mut settings = WatermarkSettings::with_text("Scriptorium");
        settings.position = WatermarkPosition::Tiled;
        let marked = mark(&sample_pdf(1), "TILE-MARK", &attribution(), &settings).unwrap();
        let doc = Document::load_mem(&marked).unwrap();
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        assert!(page_text(&doc, page_id).matches("TILE-MARK").count() > 4);
    }

    #[test]
    fn test_rejects_non_pdf() {
        let settings = WatermarkSettings::with_text("Scriptorium");
        let err = mark(b"%PDF-1.4 truncated", "x", &attribution(), &settings).unwrap_err();
        assert!(matches!(err, WatermarkError::InvalidPdf { .. }));
    }

    #[test]
    fn test_media_box_fallback() {
        let doc = Document::with_version("1.5");
        let page = media_box(&doc, (999, 0));
        assert_eq!(page.width, 612.0);
        assert_eq!(page.height, 792.0);
    }
}
