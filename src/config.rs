use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model (sentence-transformers MiniLM, 384 dims)
const DEFAULT_EMBEDDING_MODEL: &str = crate::semantic::DEFAULT_MODEL;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_TOP_K: usize = 3;
const DEFAULT_SNIPPET_CHARS: usize = 400;

const DEFAULT_EXPLANATION_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_EXPLANATION_MODEL: &str = "llama-3.1-8b-instant";
const DEFAULT_API_KEY_ENV: &str = "GROQ_API_KEY";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 200;
const DEFAULT_MAX_RESUME_CHARS: usize = 1500;
const DEFAULT_EXPLANATION_TIMEOUT_SECS: u64 = 30;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Configuration for the embedding provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2"), or "hashing"
    /// for the offline feature-hashing embedder
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Lifetime of the vector index a ranking call writes into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexScope {
    /// A private index per ranking call, never written to disk.
    #[default]
    Session,
    /// One shared index, loaded at start and saved after every batch.
    /// Entries accumulate across calls until cleared.
    Persistent,
}

impl std::fmt::Display for IndexScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexScope::Session => write!(f, "session"),
            IndexScope::Persistent => write!(f, "persistent"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Number of results returned when the caller does not ask for a count
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Characters of stored text kept in a result snippet
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,

    #[serde(default)]
    pub index_scope: IndexScope,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            snippet_chars: DEFAULT_SNIPPET_CHARS,
            index_scope: IndexScope::default(),
        }
    }
}

/// Configuration for the hosted explanation model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExplanationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_explanation_url")]
    pub api_url: String,

    #[serde(default = "default_explanation_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Resume text is cut to this many characters before it goes into the prompt
    #[serde(default = "default_max_resume_chars")]
    pub max_resume_chars: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_explanation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: DEFAULT_EXPLANATION_URL.to_string(),
            model: DEFAULT_EXPLANATION_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_resume_chars: DEFAULT_MAX_RESUME_CHARS,
            timeout_secs: DEFAULT_EXPLANATION_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_snippet_chars() -> usize {
    DEFAULT_SNIPPET_CHARS
}

fn default_true() -> bool {
    true
}

fn default_explanation_url() -> String {
    DEFAULT_EXPLANATION_URL.to_string()
}

fn default_explanation_model() -> String {
    DEFAULT_EXPLANATION_MODEL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_max_resume_chars() -> usize {
    DEFAULT_MAX_RESUME_CHARS
}

fn default_explanation_timeout_secs() -> u64 {
    DEFAULT_EXPLANATION_TIMEOUT_SECS
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub explanation: ExplanationConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if self.embedding.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }

        if self.ranking.top_k == 0 {
            bail!("ranking.top_k must be at least 1");
        }
        if self.ranking.snippet_chars == 0 {
            bail!("ranking.snippet_chars must be at least 1");
        }

        let exp = &self.explanation;
        if !(0.0..=2.0).contains(&exp.temperature) {
            bail!(
                "explanation.temperature must be between 0.0 and 2.0, got {}",
                exp.temperature
            );
        }
        if exp.timeout_secs == 0 {
            bail!("explanation.timeout_secs must be greater than 0");
        }
        if exp.max_resume_chars == 0 {
            bail!("explanation.max_resume_chars must be at least 1");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing the defaults first when
    /// the file does not exist yet.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(&config_path, defaults)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = self.base_path.join(CONFIG_FILE);
        let temp_path = config_path.with_extension("yaml.tmp");

        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&temp_path, config_str.as_bytes())?;
        std::fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Data directory: `$RRANK_BASE_PATH`, else `~/.local/share/rrank`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("RRANK_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;

    Ok(home.join(".local/share/rrank"))
}
