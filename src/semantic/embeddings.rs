//! Embedding providers.
//!
//! - `FastEmbedProvider`: fastembed model, loaded lazily exactly once
//! - `HashingEmbedder`: deterministic feature-hashing embedder that needs no
//!   model download (offline use and tests)
//!
//! All providers return L2-normalized vectors, one per input, in input order.

use fastembed::{InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

/// Used when the config does not set a download timeout
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Model name selecting [`HashingEmbedder`]
pub const HASHING_MODEL: &str = "hashing";

/// Dimensions of the hashing embedder
const HASHING_DIMENSIONS: usize = 384;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("could not load embedding model: {0}")]
    InitFailed(String),

    #[error("could not embed text: {0}")]
    EmbeddingFailed(String),

    #[error("model download gave up after {0} seconds")]
    DownloadTimeout(u64),

    #[error("unknown embedding model: {0}")]
    InvalidModel(String),

    #[error("Input at position {position} has no embeddable content")]
    EmptyInput { position: usize },
}

/// Converts text into fixed-length normalized vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Model name, used to tag persisted vectors.
    fn name(&self) -> &str;

    /// Output dimensionality. May trigger model initialization.
    fn dimensions(&self) -> Result<usize, EmbeddingError>;

    /// Embed several texts in one call. Output order matches input order.
    ///
    /// An input that is blank, or that yields no usable signal (a zero
    /// vector), is rejected with [`EmbeddingError::EmptyInput`] instead of
    /// producing a vector.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("provider returned no vector".to_string()))
    }

    /// Identifies vectors on disk: SHA-256 of [`name`](Self::name).
    fn model_id_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        Sha256::digest(self.name().as_bytes()).into()
    }
}

/// Build the provider named by `model_name`.
pub fn provider_for(
    model_name: &str,
    cache_dir: PathBuf,
    download_timeout: Option<Duration>,
) -> Result<Box<dyn EmbeddingProvider>, EmbeddingError> {
    if model_name.eq_ignore_ascii_case(HASHING_MODEL) {
        return Ok(Box::new(HashingEmbedder::new()));
    }

    Ok(Box::new(FastEmbedProvider::new(
        model_name,
        cache_dir,
        download_timeout,
    )?))
}

fn check_inputs(texts: &[String]) -> Result<(), EmbeddingError> {
    match texts.iter().position(|t| t.trim().is_empty()) {
        Some(position) => Err(EmbeddingError::EmptyInput { position }),
        None => Ok(()),
    }
}

/// Normalize every vector. A zero vector cannot be compared by cosine, so
/// it is reported as an empty input at its position.
fn finish(vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    vectors
        .into_iter()
        .enumerate()
        .map(|(position, v)| {
            let v = normalize(v);
            if v.iter().all(|x| *x == 0.0) {
                Err(EmbeddingError::EmptyInput { position })
            } else {
                Ok(v)
            }
        })
        .collect()
}

/// Scale `v` to unit length. Zero vectors are left untouched.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// fastembed models selectable by name
const KNOWN_MODELS: &[(&str, fastembed::EmbeddingModel)] = &[
    ("all-MiniLM-L6-v2", fastembed::EmbeddingModel::AllMiniLML6V2),
    ("all-MiniLM-L6-v2-q", fastembed::EmbeddingModel::AllMiniLML6V2Q),
    ("bge-small-en-v1.5", fastembed::EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", fastembed::EmbeddingModel::BGEBaseENV15),
    ("bge-large-en-v1.5", fastembed::EmbeddingModel::BGELargeENV15),
];

/// Lower-case, drop an organisation prefix and punctuation, so
/// "sentence-transformers/all-MiniLM-L6-v2" and "allminilml6v2" match.
fn model_key(name: &str) -> String {
    let name = name.rsplit('/').next().unwrap_or(name);
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn resolve_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    let key = model_key(name);
    KNOWN_MODELS
        .iter()
        .find(|(known, _)| model_key(known) == key)
        .map(|(_, model)| model.clone())
        .ok_or_else(|| {
            let mut names: Vec<&str> = KNOWN_MODELS.iter().map(|(known, _)| *known).collect();
            names.push(HASHING_MODEL);
            EmbeddingError::InvalidModel(format!("'{}' (expected one of {})", name, names.join(", ")))
        })
}

/// fastembed handle plus its measured output size. `embed` needs
/// `&mut self`, hence the mutex.
struct LoadedModel {
    model: Mutex<TextEmbedding>,
    dimensions: usize,
}

/// fastembed-backed provider.
///
/// Construction only validates the model name. The model itself is
/// downloaded/loaded on first use; concurrent first callers wait for a
/// single initialization and every later call reads the handle without
/// locking.
pub struct FastEmbedProvider {
    model_name: String,
    model: fastembed::EmbeddingModel,
    cache_dir: PathBuf,
    download_timeout: Duration,
    loaded: OnceCell<LoadedModel>,
}

impl FastEmbedProvider {
    /// Files are cached under `<cache_dir>/models`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            model: resolve_model(model_name)?,
            model_name: model_name.to_string(),
            cache_dir,
            download_timeout: download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
            loaded: OnceCell::new(),
        })
    }

    #[cfg(test)]
    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    fn loaded(&self) -> Result<&LoadedModel, EmbeddingError> {
        self.loaded.get_or_try_init(|| self.load())
    }

    fn load(&self) -> Result<LoadedModel, EmbeddingError> {
        log::info!(
            "Loading embedding model '{}' (download timeout {}s)",
            self.model_name,
            self.download_timeout.as_secs()
        );

        let models_dir = self.cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("{}: {}", models_dir.display(), e))
        })?;

        let options = InitOptions::new(self.model.clone())
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);
        let mut model = with_timeout(self.download_timeout, move || {
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
        })?;

        // fastembed does not expose the output size, measure it once
        let dimensions = model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?
            .first()
            .map(Vec::len)
            .ok_or_else(|| EmbeddingError::InitFailed("model produced no vector".to_string()))?;
        log::info!("Embedding model ready ({} dimensions)", dimensions);

        Ok(LoadedModel {
            model: Mutex::new(model),
            dimensions,
        })
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> Result<usize, EmbeddingError> {
        Ok(self.loaded()?.dimensions)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        check_inputs(texts)?;

        let embeddings = self
            .loaded()?
            .model
            .lock()
            .map_err(|e| EmbeddingError::EmbeddingFailed(format!("model lock poisoned: {}", e)))?
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "{} texts in, {} vectors out",
                texts.len(),
                embeddings.len()
            )));
        }

        finish(embeddings)
    }
}

/// Run `f` on a helper thread and stop waiting after `timeout`. A late
/// result is dropped together with the abandoned thread.
fn with_timeout<T, F>(timeout: Duration, f: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("model-load".to_string())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("cannot start loader thread: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            log::error!("Model load did not finish within {}s", timeout.as_secs());
            Err(EmbeddingError::DownloadTimeout(timeout.as_secs()))
        }
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader stopped without a result".to_string(),
        )),
    }
}

/// Feature-hashing bag-of-words embedder.
///
/// Tokens are lower-cased alphanumeric runs; each token adds ±1 to the
/// bucket picked by its CRC32. Texts sharing vocabulary end up close, which
/// is enough for offline ranking and deterministic tests.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_dimensions(HASHING_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Punctuation-only text produces no tokens and so a zero vector.
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = crc32fast::hash(token.to_lowercase().as_bytes());
            let bucket = (hash as usize >> 1) % self.dimensions;
            let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        HASHING_MODEL
    }

    fn dimensions(&self) -> Result<usize, EmbeddingError> {
        Ok(self.dimensions)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        check_inputs(texts)?;
        finish(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
