use serde::{Deserialize, Serialize};

use crate::extract::DocumentFormat;

/// Marker appended to snippets cut short.
pub const TRUNCATION_MARKER: &str = "...";

/// One uploaded resume.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Original filename. Becomes the result id.
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Declared format. Resolved from the filename/content when `None`.
    pub format: Option<DocumentFormat>,
}

impl Candidate {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = Some(format);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// 1-based position
    pub rank: usize,
    pub id: String,
    /// Cosine similarity rounded to 3 decimals, higher is better
    pub score: f32,
    pub snippet: String,
    /// Full indexed text, kept for explanations
    #[serde(skip)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Indexed { chars: usize },
    Skipped { reason: String },
}

/// What happened to one candidate during a ranking call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub id: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl CandidateOutcome {
    pub fn is_indexed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Indexed { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingReport {
    pub results: Vec<RankedResult>,
    /// One outcome per candidate, in input order
    pub outcomes: Vec<CandidateOutcome>,
}

impl RankingReport {
    pub fn skipped(&self) -> impl Iterator<Item = &CandidateOutcome> {
        self.outcomes.iter().filter(|o| !o.is_indexed())
    }
}

/// First `max_chars` characters of `text`, with [`TRUNCATION_MARKER`]
/// appended when anything was cut.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_pos, _)) => format!("{}{}", &text[..byte_pos], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// `1 - distance`, clamped to [-1, 1] and rounded to 3 decimals.
pub fn score_from_distance(distance: f32) -> f32 {
    let similarity = (1.0 - distance).clamp(-1.0, 1.0);
    (similarity * 1000.0).round() / 1000.0
}
