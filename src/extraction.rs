//! PDF page-text extraction backed by `pdf-extract`, with page counts
//! from `lopdf`.

use std::path::Path;

use tracing::debug;

use crate::{
    error::{Error, Result},
    ingestion::Extractor,
};

/// Extracts page texts with `pdf-extract`.
///
/// `pdf-extract` yields the whole document as one string with form feeds
/// between pages; that string is split back into pages and padded to the
/// page count reported by the document catalogue.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for PdfExtractor {
    fn extract_pages(&self, pdf: &Path) -> Result<Vec<String>> {
        let data = std::fs::read(pdf)?;
        if !data.starts_with(b"%PDF") {
            return Err(extraction_error(pdf, "missing %PDF header"));
        }

        let text = pdf_extract::extract_text_from_mem(&data)
            .map_err(|e| extraction_error(pdf, e))?;
        let page_count = match lopdf::Document::load_mem(&data) {
            Ok(doc) => Some(doc.get_pages().len()),
            Err(e) => {
                debug!(pdf = %pdf.display(), "page count unavailable: {e}");
                None
            }
        };
        Ok(split_pages(&text, page_count))
    }
}

fn extraction_error(pdf: &Path, reason: impl ToString) -> Error {
    Error::Extraction {
        item: pdf.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Split form-feed separated text into pages.
///
/// With a known `page_count`, trailing empty pieces beyond it are dropped
/// and missing pages are padded with empty text.
pub fn split_pages(text: &str, page_count: Option<usize>) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\x0C').map(str::to_string).collect();

    if let Some(count) = page_count {
        while pages.len() > count.max(1)
            && pages.last().is_some_and(|p| p.trim().is_empty())
        {
            pages.pop();
        }
        pages.resize(pages.len().max(count), String::new());
    }
    pages
}
