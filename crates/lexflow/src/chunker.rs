//! Splits document text into overlapping windows.
//!
//! Sizes and offsets are in characters, not bytes, so multi-byte text never
//! splits inside a code point.

/// One window of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    /// Char offset of the first character, inclusive.
    pub char_start: usize,
    /// Char offset one past the last character.
    pub char_end: usize,
}

/// Splits `text` into windows of `size` chars where consecutive windows share
/// `overlap` chars. An overlap of `size` or more is clamped to `size - 1`.
pub fn chunk(text: &str, size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.is_empty() || size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(size - 1);
    let step = size - overlap;

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(total_chars);
        chunks.push(TextChunk {
            index: chunks.len(),
            text: text[boundaries[start]..boundaries[end]].to_string(),
            char_start: start,
            char_end: end,
        });
        if end == total_chars {
            break;
        }
        start += step;
    }
    chunks
}
