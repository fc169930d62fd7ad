mod web;

use std::sync::Arc;

use crate::config::{IndexScope, RankingConfig};
use crate::extract::FileExtractor;
use crate::ranking::{Candidate, RankingService};
use crate::semantic::{HashingEmbedder, VectorStorage, VECTORS_FILE};

pub const PYTHON_JOB: &str = "Looking for a Python ML engineer";

pub const PYTHON_RESUME: &str = "Python developer with machine learning and ML engineer experience";
pub const ACCOUNTANT_RESUME: &str = "Accountant with bookkeeping and payroll experience";
pub const JAVA_RESUME: &str = "Java backend engineer building payment services";

/// Ranking config with the given scope and otherwise default settings.
pub fn ranking_config(scope: IndexScope) -> RankingConfig {
    RankingConfig {
        index_scope: scope,
        ..Default::default()
    }
}

/// Service backed by the offline hashing embedder.
pub fn service(scope: IndexScope) -> RankingService {
    RankingService::new(
        Arc::new(HashingEmbedder::new()),
        Arc::new(FileExtractor::new()),
        ranking_config(scope),
    )
}

/// Persistent service storing `vectors.bin` inside `dir`.
pub fn stored_service(dir: &std::path::Path) -> RankingService {
    RankingService::with_storage(
        Arc::new(HashingEmbedder::new()),
        Arc::new(FileExtractor::new()),
        ranking_config(IndexScope::Persistent),
        VectorStorage::new(dir.join(VECTORS_FILE)),
    )
    .expect("failed to open stored index")
}

pub fn text(filename: &str, body: &str) -> Candidate {
    Candidate::new(filename, body.as_bytes().to_vec())
}

/// a.txt (python), b.txt (accountant)
pub fn two_resumes() -> Vec<Candidate> {
    vec![text("a.txt", PYTHON_RESUME), text("b.txt", ACCOUNTANT_RESUME)]
}
