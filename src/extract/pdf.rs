//! PDF text extraction via pdf-extract.

use super::ExtractError;

/// Extract the text of every page, pages separated by a blank line.
///
/// pdf-extract can panic on malformed input, so the call runs under
/// `catch_unwind` and a panic is reported as a corrupt document.
pub(super) fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));

    let text = match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => return Err(ExtractError::Corrupt(format!("PDF extraction failed: {e}"))),
        Err(_) => {
            return Err(ExtractError::Corrupt(
                "PDF decoder panicked on malformed input".to_string(),
            ))
        }
    };

    Ok(join_pages(&text))
}

/// pdf-extract separates pages with form feeds.
fn join_pages(text: &str) -> String {
    text.split('\x0c')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
