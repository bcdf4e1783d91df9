use super::ExtractionError;

/// Marker lopdf emits for CID fonts it cannot decode.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Below this length the alphanumeric ratio check is not applied.
const MIN_TOTAL_CHARS: usize = 50;

/// Minimum share of alphanumeric characters for text to count as readable.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// Extracts the embedded text layer, page by page.
///
/// Scanned PDFs and PDFs with undecodable fonts yield an empty string; the
/// caller treats that as "no extractable text".
pub fn extract(bytes: &[u8]) -> Result<String, ExtractionError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ExtractionError::Pdf(format!("Failed to load PDF: {}", e)))?;

    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => tracing::debug!(page = page_num, "Skipping unreadable PDF page: {}", e),
        }
    }

    if is_unreadable(&text) {
        tracing::info!("PDF has no usable text layer");
        return Ok(String::new());
    }
    Ok(text)
}

/// True for empty text, text made only of font error markers, or text that
/// is mostly non-alphanumeric noise.
fn is_unreadable(text: &str) -> bool {
    let trimmed = text.trim();
    let has_content = trimmed
        .split(IDENTITY_H_PATTERN)
        .any(|part| part.chars().any(|c| !c.is_whitespace()));
    if !has_content {
        return true;
    }

    let (total, alphanumeric) = trimmed.chars().fold((0usize, 0usize), |(total, alnum), c| {
        (total + 1, alnum + usize::from(c.is_alphanumeric()))
    });
    total > MIN_TOTAL_CHARS && alphanumeric * 100 < total * MIN_ALPHANUMERIC_PERCENT
}

#[cfg(test)]
pub(crate) fn single_page_pdf(content: &str) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.new_object_id();
    let resources_id = doc.new_object_id();
    let content_id = doc.new_object_id();
    let page_id = doc.new_object_id();

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        }),
    );
    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        }),
    );
    doc.objects.insert(
        content_id,
        Object::Stream(Stream::new(dictionary! {}, content.as_bytes().to_vec())),
    );
    doc.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        }),
    );
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
