//! DOCX text extraction.
//!
//! A .docx file is a zip archive; the body lives in `word/document.xml`.
//! Paragraphs are `<w:p>` elements whose visible text is split across
//! `<w:t>` runs.

use std::io::{Cursor, Read};

use once_cell::sync::Lazy;
use regex::Regex;

use super::ExtractError;

const DOCUMENT_PART: &str = "word/document.xml";

static PARAGRAPH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:p(?:\s[^>]*)?>(.*?)</w:p>").expect("valid paragraph regex")
});

static RUN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:tab\s*/>|<w:br\s*/>")
        .expect("valid run regex")
});

static ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#x([0-9a-fA-F]{1,6})|#([0-9]{1,7})|(lt|gt|quot|apos|amp));")
        .expect("valid entity regex")
});

pub(super) fn extract_docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::Corrupt(format!("not a valid docx archive: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| ExtractError::Corrupt(format!("missing {DOCUMENT_PART}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::Corrupt(format!("unreadable {DOCUMENT_PART}: {e}")))?;

    Ok(paragraphs_from_xml(&xml).join("\n\n"))
}

/// Text of every non-empty paragraph, in document order.
fn paragraphs_from_xml(xml: &str) -> Vec<String> {
    PARAGRAPH_REGEX
        .captures_iter(xml)
        .filter_map(|cap| {
            let body = cap.get(1)?.as_str();
            let mut text = String::new();

            for run in RUN_REGEX.captures_iter(body) {
                match run.get(1) {
                    Some(t) => text.push_str(&decode_entities(t.as_str())),
                    None if run[0].starts_with("<w:tab") => text.push('\t'),
                    None => text.push('\n'),
                }
            }

            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        })
        .collect()
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    // one pass, so "&amp;lt;" stays "&lt;"
    ENTITY_REGEX
        .replace_all(s, |caps: &regex::Captures| {
            let code = match (caps.get(1), caps.get(2)) {
                (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                (_, Some(dec)) => dec.as_str().parse().ok(),
                _ => None,
            };
            if caps.get(3).is_none() {
                // invalid code points are kept verbatim
                return code
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string());
            }

            match &caps[3] {
                "lt" => "<",
                "gt" => ">",
                "quot" => "\"",
                "apos" => "'",
                _ => "&",
            }
            .to_string()
        })
        .into_owned()
}
