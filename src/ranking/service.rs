//! Resume ranking service.
//!
//! Runs one ranking call end to end:
//! extract -> embed candidates -> upsert into the index -> embed the job
//! description -> top-k query -> scores and snippets.
//!
//! The service owns no hidden global state. The embedding provider and
//! extractor are handed in at construction; the only state that outlives a
//! call is the shared index in persistent scope.

use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::cancel::CancelToken;
use crate::config::{IndexScope, RankingConfig};
use crate::extract::{DocumentFormat, ExtractError, TextExtractor};
use crate::ranking::errors::RankError;
use crate::ranking::types::{
    make_snippet, score_from_distance, Candidate, CandidateOutcome, OutcomeStatus, RankedResult,
    RankingReport,
};
use crate::semantic::{
    EmbeddingError, EmbeddingProvider, IndexEntry, Metadata, Neighbor, VectorIndex, VectorStorage,
    VectorStorageError,
};

/// Persistent-scope index plus where it is saved.
struct SharedIndex {
    index: RwLock<VectorIndex>,
    storage: Option<VectorStorage>,
}

/// Extracted text for a candidate that survived extraction.
struct Extracted {
    id: String,
    text: String,
    format: DocumentFormat,
}

/// Size and shape of the index, for status reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub scope: IndexScope,
    pub entries: usize,
    pub dimensions: Option<usize>,
    pub model: String,
}

pub struct RankingService {
    provider: Arc<dyn EmbeddingProvider>,
    extractor: Arc<dyn TextExtractor>,
    config: RankingConfig,
    shared: Option<SharedIndex>,
}

impl RankingService {
    /// Service with session scope: every `rank` call works on a private,
    /// throwaway index.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn TextExtractor>,
        config: RankingConfig,
    ) -> Self {
        let shared = match config.index_scope {
            IndexScope::Session => None,
            IndexScope::Persistent => Some(SharedIndex {
                index: RwLock::new(VectorIndex::new()),
                storage: None,
            }),
        };

        Self {
            provider,
            extractor,
            config,
            shared,
        }
    }

    /// Service with persistent scope backed by `storage`.
    ///
    /// Vectors written by another model (or with other dimensions) are not
    /// reused: the mismatch is logged and the service starts from an empty
    /// index, which replaces the stale file on the next save.
    pub fn with_storage(
        provider: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn TextExtractor>,
        mut config: RankingConfig,
        storage: VectorStorage,
    ) -> Result<Self, RankError> {
        config.index_scope = IndexScope::Persistent;

        let index = if storage.exists() {
            let model_id = provider.model_id_hash();
            let dimensions = provider.dimensions()?;

            match storage.load(&model_id, dimensions) {
                Ok(idx) => {
                    log::info!(
                        "Loaded {} vectors from {}",
                        idx.len(),
                        storage.path().display()
                    );
                    idx
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!(
                        "{} was written by a different embedding model than '{}'; its vectors are not comparable and will be replaced",
                        storage.path().display(),
                        provider.name()
                    );
                    VectorIndex::new()
                }
                Err(VectorStorageError::DimensionMismatch { expected, got }) => {
                    log::warn!(
                        "{} holds {}-d vectors but the model produces {}-d; starting a fresh index",
                        storage.path().display(),
                        got,
                        expected
                    );
                    VectorIndex::new()
                }
                Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!(
                        "Storage version {} unsupported, creating fresh index",
                        file_ver
                    );
                    VectorIndex::new()
                }
                Err(e) => {
                    log::error!("Failed to load vectors: {}", e);
                    return Err(e.into());
                }
            }
        } else {
            log::info!("No existing index, starting fresh");
            VectorIndex::new()
        };

        Ok(Self {
            provider,
            extractor,
            config,
            shared: Some(SharedIndex {
                index: RwLock::new(index),
                storage: Some(storage),
            }),
        })
    }

    pub fn scope(&self) -> IndexScope {
        self.config.index_scope
    }

    /// Rank `candidates` against `query` returning the configured top-k.
    pub fn rank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
    ) -> Result<RankingReport, RankError> {
        self.rank_with(query, candidates, None, &CancelToken::new())
    }

    /// Rank `candidates` against `query`.
    ///
    /// `top_k` overrides the configured default. Candidates that fail
    /// extraction are skipped and reported in the outcomes; the call only
    /// fails when none survive.
    pub fn rank_with(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_k: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<RankingReport, RankError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RankError::invalid_input("job description cannot be empty"));
        }
        if candidates.is_empty() {
            return Err(RankError::invalid_input("no resumes uploaded"));
        }
        let k = top_k.unwrap_or(self.config.top_k);
        if k == 0 {
            return Err(RankError::invalid_input("top_k must be at least 1"));
        }

        check_cancel(cancel, "extraction")?;
        let (extracted, mut outcomes) = self.extract_all(candidates);
        if extracted.is_empty() {
            return Err(RankError::NoUsableInput { outcomes });
        }

        check_cancel(cancel, "embedding")?;
        let (extracted, vectors) = self.embed_all(extracted, &mut outcomes)?;

        let indexed_at = Utc::now().to_rfc3339();
        let entries: Vec<IndexEntry> = extracted
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                let mut metadata = Metadata::new();
                metadata.insert("source".to_string(), doc.id.clone());
                metadata.insert("format".to_string(), doc.format.to_string());
                metadata.insert("indexed_at".to_string(), indexed_at.clone());

                IndexEntry {
                    id: doc.id,
                    vector,
                    text: doc.text,
                    metadata,
                }
            })
            .collect();

        // embed the query before touching the index so a provider failure
        // leaves it unchanged
        let query_vector = self.provider.embed(query).map_err(|e| match e {
            EmbeddingError::EmptyInput { .. } => {
                RankError::invalid_input("job description has no searchable words")
            }
            other => other.into(),
        })?;

        check_cancel(cancel, "indexing")?;
        let neighbors = match &self.shared {
            None => {
                let mut index = VectorIndex::new();
                index.add_entries(entries)?;
                check_cancel(cancel, "querying")?;
                index.query(&query_vector, k)?
            }
            Some(shared) => {
                self.upsert_shared(shared, entries)?;
                check_cancel(cancel, "querying")?;
                let index = shared.index.read().map_err(|e| {
                    RankError::Internal(format!("Lock poisoned: {}", e))
                })?;
                index.query(&query_vector, k)?
            }
        };

        let results = self.to_results(neighbors);
        log::info!(
            "Ranked {} of {} candidates, returning {}",
            outcomes.iter().filter(|o| o.is_indexed()).count(),
            outcomes.len(),
            results.len()
        );

        Ok(RankingReport { results, outcomes })
    }

    /// Look up an indexed resume (persistent scope only).
    pub fn stored_text(&self, id: &str) -> Option<String> {
        let shared = self.shared.as_ref()?;
        let index = shared.index.read().ok()?;
        index.get(id).map(|entry| entry.text.clone())
    }

    pub fn stats(&self) -> IndexStats {
        let (entries, dimensions) = self
            .shared
            .as_ref()
            .and_then(|shared| shared.index.read().ok())
            .map(|index| (index.len(), index.dimensions()))
            .unwrap_or((0, None));

        IndexStats {
            scope: self.config.index_scope,
            entries,
            dimensions,
            model: self.provider.name().to_string(),
        }
    }

    /// Ids of the persistent index in insertion order. Empty in session
    /// scope.
    pub fn indexed_ids(&self) -> Vec<String> {
        self.shared
            .as_ref()
            .and_then(|shared| shared.index.read().ok())
            .map(|index| index.ids().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Forget one indexed resume and persist the change. Returns whether
    /// anything was removed.
    pub fn remove_entry(&self, id: &str) -> Result<bool, RankError> {
        let Some(shared) = &self.shared else {
            return Ok(false);
        };

        let mut index = shared
            .index
            .write()
            .map_err(|e| RankError::Internal(format!("Lock poisoned: {}", e)))?;
        if index.remove(id).is_none() {
            return Ok(false);
        }

        if let Some(storage) = &shared.storage {
            if index.is_empty() {
                storage.delete()?;
            } else {
                storage.save(&index, &self.provider.model_id_hash())?;
            }
        }

        log::info!("Removed {} from the index, {} left", id, index.len());
        Ok(true)
    }

    /// Drop every stored entry and delete the persisted file.
    /// Returns the number of entries removed.
    pub fn clear_index(&self) -> Result<usize, RankError> {
        let Some(shared) = &self.shared else {
            return Ok(0);
        };

        let mut index = shared
            .index
            .write()
            .map_err(|e| RankError::Internal(format!("Lock poisoned: {}", e)))?;
        let removed = index.len();
        index.clear();

        if let Some(storage) = &shared.storage {
            storage.delete()?;
        }

        log::info!("Cleared {} entries from the index", removed);
        Ok(removed)
    }

    fn extract_all(&self, candidates: Vec<Candidate>) -> (Vec<Extracted>, Vec<CandidateOutcome>) {
        let mut extracted: Vec<Extracted> = Vec::with_capacity(candidates.len());
        let mut outcomes = Vec::with_capacity(candidates.len());

        for (i, candidate) in candidates.into_iter().enumerate() {
            let id = if candidate.filename.trim().is_empty() {
                format!("resume_{i}")
            } else {
                candidate.filename.clone()
            };

            // a repeated filename in one upload would collide in the index
            if extracted.iter().any(|e| e.id == id) {
                log::warn!("Skipping {}: duplicate filename in this batch", id);
                outcomes.push(CandidateOutcome {
                    id,
                    status: OutcomeStatus::Skipped {
                        reason: "duplicate filename in this batch".to_string(),
                    },
                });
                continue;
            }

            match self.extract_one(&candidate) {
                Ok((text, format)) => {
                    log::debug!("Extracted {} chars from {}", text.chars().count(), id);
                    outcomes.push(CandidateOutcome {
                        id: id.clone(),
                        status: OutcomeStatus::Indexed {
                            chars: text.chars().count(),
                        },
                    });
                    extracted.push(Extracted { id, text, format });
                }
                Err(e) => {
                    log::warn!("Error parsing {}: {}", id, e);
                    outcomes.push(CandidateOutcome {
                        id,
                        status: OutcomeStatus::Skipped {
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        (extracted, outcomes)
    }

    /// Embed every extracted text. A text the provider finds empty is
    /// dropped and its outcome turned into a skip; the rest are embedded
    /// again without it.
    fn embed_all(
        &self,
        mut extracted: Vec<Extracted>,
        outcomes: &mut [CandidateOutcome],
    ) -> Result<(Vec<Extracted>, Vec<Vec<f32>>), RankError> {
        loop {
            if extracted.is_empty() {
                return Err(RankError::NoUsableInput {
                    outcomes: outcomes.to_vec(),
                });
            }

            let texts: Vec<String> = extracted.iter().map(|e| e.text.clone()).collect();
            match self.provider.embed_batch(&texts) {
                Ok(vectors) if vectors.len() == extracted.len() => {
                    return Ok((extracted, vectors));
                }
                Ok(vectors) => {
                    return Err(RankError::Internal(format!(
                        "provider returned {} vectors for {} texts",
                        vectors.len(),
                        extracted.len()
                    )));
                }
                Err(EmbeddingError::EmptyInput { position }) if position < extracted.len() => {
                    let dropped = extracted.remove(position);
                    log::warn!("Skipping {}: no embeddable content", dropped.id);
                    if let Some(outcome) = outcomes
                        .iter_mut()
                        .find(|o| o.id == dropped.id && o.is_indexed())
                    {
                        outcome.status = OutcomeStatus::Skipped {
                            reason: "no embeddable content".to_string(),
                        };
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn extract_one(&self, candidate: &Candidate) -> Result<(String, DocumentFormat), ExtractError> {
        let format = candidate
            .format
            .or_else(|| DocumentFormat::detect(&candidate.filename, &candidate.bytes))
            .ok_or_else(|| {
                ExtractError::UnsupportedFormat(format!(
                    "cannot determine format of '{}'",
                    candidate.filename
                ))
            })?;

        let text = self.extractor.extract(&candidate.bytes, format)?;
        Ok((text, format))
    }

    /// Add a batch under the write lock, then persist it. Readers see the
    /// index either before or after the whole batch.
    fn upsert_shared(&self, shared: &SharedIndex, entries: Vec<IndexEntry>) -> Result<(), RankError> {
        let mut index = shared
            .index
            .write()
            .map_err(|e| RankError::Internal(format!("Lock poisoned: {}", e)))?;

        let count = entries.len();
        index.add_entries(entries)?;
        log::debug!("Upserted {} entries, index now holds {}", count, index.len());

        if let Some(storage) = &shared.storage {
            storage.save(&index, &self.provider.model_id_hash())?;
        }

        Ok(())
    }

    fn to_results(&self, neighbors: Vec<Neighbor>) -> Vec<RankedResult> {
        neighbors
            .into_iter()
            .enumerate()
            .map(|(i, n)| RankedResult {
                rank: i + 1,
                score: score_from_distance(n.distance),
                snippet: make_snippet(&n.text, self.config.snippet_chars),
                id: n.id,
                text: n.text,
            })
            .collect()
    }
}

fn check_cancel(cancel: &CancelToken, stage: &'static str) -> Result<(), RankError> {
    if cancel.is_cancelled() {
        log::info!("Ranking cancelled before {}", stage);
        return Err(RankError::Cancelled { stage });
    }
    Ok(())
}
