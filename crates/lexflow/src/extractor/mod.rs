//! Text extraction from non-image documents.

pub mod docx;
pub mod pdf;
pub mod plain;

use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// MIME types the pipeline accepts at intake.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    MIME_PDF,
    MIME_DOCX,
    "text/plain",
    "text/markdown",
    "text/html",
    "text/csv",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
];

pub fn is_supported(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

/// Images go to the vision model instead of a [`TextExtractor`].
pub fn is_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to process PDF: {0}")]
    Pdf(String),

    #[error("Failed to process DOCX: {0}")]
    Docx(String),

    #[error("Document is not valid UTF-8 text: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Turns document bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractionError>;
}

/// Routes by MIME type to the PDF, DOCX and plain-text readers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentTextExtractor;

impl DocumentTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for DocumentTextExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!("extractor.extract", mime_type = %mime_type).entered();
        match mime_type {
            MIME_PDF => pdf::extract(bytes),
            MIME_DOCX => docx::extract(bytes),
            "text/html" => plain::extract_html(bytes),
            m if m.starts_with("text/") => plain::extract(bytes),
            other => Err(ExtractionError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_text_types() {
        let extractor = DocumentTextExtractor::new();
        assert_eq!(
            extractor.extract(b"# Heading\nbody", "text/markdown").unwrap(),
            "# Heading\nbody"
        );
        assert_eq!(
            extractor
                .extract(b"<p>Tenant: <b>Acme</b></p>", "text/html")
                .unwrap(),
            "Tenant: Acme"
        );
    }

    #[test]
    fn test_images_are_not_extracted_here() {
        let extractor = DocumentTextExtractor::new();
        assert!(matches!(
            extractor.extract(&[0x89, 0x50], "image/png"),
            Err(ExtractionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_allow_list() {
        assert!(is_supported(MIME_PDF));
        assert!(is_supported("image/jpeg"));
        assert!(!is_supported("application/zip"));
        assert!(!is_supported("image/tiff"));
        assert!(is_image("image/webp"));
        assert!(!is_image(MIME_PDF));
    }
}
