//! Ranking of resumes against a job description.

mod errors;
mod service;
mod types;

pub use errors::RankError;
pub use service::{IndexStats, RankingService};
pub use types::{
    Candidate, CandidateOutcome, OutcomeStatus, RankedResult, RankingReport, TRUNCATION_MARKER,
};
