use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level configuration. Every section and field has a default, so an
/// empty file (or no file at all) yields a working setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedRagConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MedRagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigManager::validate_config(self)
    }
}

/// Chunk-size policy. Sizes are expressed in tokens and converted to char
/// windows with the `chars_per_token` estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            chars_per_token: default_chars_per_token(),
            max_document_chars: default_max_document_chars(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}

fn default_overlap_tokens() -> usize {
    50
}

fn default_chars_per_token() -> usize {
    4
}

fn default_max_document_chars() -> usize {
    1_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hash" for the deterministic local provider, "rest" for an
    /// OpenAI-compatible embeddings endpoint.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_api_key")]
    pub api_key: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,
    /// 0 disables the query-embedding cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            api_key: default_embedding_api_key(),
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_embedding_max_retries(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_batch_size() -> usize {
    64
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_api_key() -> String {
    std::env::var("MEDRAG_EMBEDDING_API_KEY").unwrap_or_default()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_embedding_max_retries() -> u32 {
    3
}

fn default_cache_capacity() -> usize {
    2048
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    #[serde(default = "default_official_boost")]
    pub official_boost: f32,
    #[serde(default = "default_reference_boost")]
    pub reference_boost: f32,
    #[serde(default = "default_user_note_boost")]
    pub user_note_boost: f32,
    #[serde(default = "default_expand_queries")]
    pub expand_queries: bool,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retrieval_max_retries")]
    pub max_retries: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            relevance_threshold: default_relevance_threshold(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            official_boost: default_official_boost(),
            reference_boost: default_reference_boost(),
            user_note_boost: default_user_note_boost(),
            expand_queries: default_expand_queries(),
            timeout_secs: default_retrieval_timeout_secs(),
            max_retries: default_retrieval_max_retries(),
        }
    }
}

fn default_max_results() -> usize {
    10
}

fn default_relevance_threshold() -> f32 {
    0.1
}

fn default_semantic_weight() -> f32 {
    0.7
}

fn default_lexical_weight() -> f32 {
    0.3
}

fn default_official_boost() -> f32 {
    1.15
}

fn default_reference_boost() -> f32 {
    1.05
}

fn default_user_note_boost() -> f32 {
    1.0
}

fn default_expand_queries() -> bool {
    true
}

fn default_retrieval_timeout_secs() -> u64 {
    10
}

fn default_retrieval_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard ceiling on retrieval passes per query. The evaluate step cannot
    /// loop once this is reached, which makes every turn terminate.
    #[serde(default = "default_retrieval_ceiling")]
    pub retrieval_ceiling: u32,
    /// Confidence floor below which the draft answer triggers another
    /// retrieval pass (while budget remains).
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            retrieval_ceiling: default_retrieval_ceiling(),
            min_confidence: default_min_confidence(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_retrieval_ceiling() -> u32 {
    3
}

fn default_min_confidence() -> f32 {
    0.3
}

fn default_history_turns() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,
    /// How many retrieved chunks make it into the prompt (and therefore into
    /// the citation list).
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_max_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: default_generation_max_tokens(),
            max_context_chunks: default_max_context_chunks(),
            snippet_chars: default_snippet_chars(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_max_retries(),
        }
    }
}

fn default_generation_model() -> String {
    "extractive-v1".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_generation_max_tokens() -> u32 {
    1024
}

fn default_max_context_chunks() -> usize {
    5
}

fn default_snippet_chars() -> usize {
    500
}

fn default_generation_timeout_secs() -> u64 {
    60
}

fn default_generation_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Installs a global tracing subscriber honoring `RUST_LOG` when set and the
/// configured level otherwise. Safe to call more than once.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Configuration manager with layered precedence:
/// 1. Environment variables (plus `.env` file)
/// 2. Config file (`.medrag.toml`)
/// 3. Defaults
pub struct ConfigManager {
    config: MedRagConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        if let Some(ref path) = config_path {
            info!("Configuration loaded from {}", path.display());
        } else {
            info!("No config file found, using defaults");
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Loads and validates a specific file, without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_toml_file(path)?;
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    pub fn config(&self) -> &MedRagConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".medrag.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .medrag.env: {}", e);
                }
            }
        }
    }

    /// Search order: `./.medrag.toml`, then `~/.medrag/config.toml`, then
    /// defaults.
    fn load_config_file() -> Result<(MedRagConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".medrag.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".medrag").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((MedRagConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<MedRagConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;

        let config: MedRagConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    fn apply_env_overrides(mut config: MedRagConfig) -> MedRagConfig {
        if let Ok(provider) = std::env::var("MEDRAG_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(value) = std::env::var("MEDRAG_EMBEDDING_DIMENSION") {
            match value.parse() {
                Ok(dimension) => config.embedding.dimension = dimension,
                Err(_) => warn!("Ignoring non-numeric MEDRAG_EMBEDDING_DIMENSION: {}", value),
            }
        }
        if let Ok(endpoint) = std::env::var("MEDRAG_EMBEDDING_ENDPOINT") {
            config.embedding.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("MEDRAG_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(api_key) = std::env::var("MEDRAG_EMBEDDING_API_KEY") {
            config.embedding.api_key = api_key;
        }
        if let Ok(value) = std::env::var("MEDRAG_EMBEDDING_BATCH_SIZE") {
            match value.parse() {
                Ok(batch_size) => config.embedding.batch_size = batch_size,
                Err(_) => warn!("Ignoring non-numeric MEDRAG_EMBEDDING_BATCH_SIZE: {}", value),
            }
        }
        if let Ok(value) = std::env::var("MEDRAG_RETRIEVAL_MAX_RESULTS") {
            match value.parse() {
                Ok(max_results) => config.retrieval.max_results = max_results,
                Err(_) => warn!("Ignoring non-numeric MEDRAG_RETRIEVAL_MAX_RESULTS: {}", value),
            }
        }
        if let Ok(value) = std::env::var("MEDRAG_RETRIEVAL_EXPAND_QUERIES") {
            match value.parse() {
                Ok(expand) => config.retrieval.expand_queries = expand,
                Err(_) => warn!(
                    "Ignoring non-boolean MEDRAG_RETRIEVAL_EXPAND_QUERIES: {}",
                    value
                ),
            }
        }
        if let Ok(value) = std::env::var("MEDRAG_AGENT_RETRIEVAL_CEILING") {
            match value.parse() {
                Ok(ceiling) => config.agent.retrieval_ceiling = ceiling,
                Err(_) => warn!(
                    "Ignoring non-numeric MEDRAG_AGENT_RETRIEVAL_CEILING: {}",
                    value
                ),
            }
        }
        if let Ok(value) = std::env::var("MEDRAG_AGENT_MIN_CONFIDENCE") {
            match value.parse() {
                Ok(floor) => config.agent.min_confidence = floor,
                Err(_) => warn!("Ignoring non-numeric MEDRAG_AGENT_MIN_CONFIDENCE: {}", value),
            }
        }
        if let Ok(model) = std::env::var("MEDRAG_GENERATION_MODEL") {
            config.generation.model = model;
        }
        if let Ok(value) = std::env::var("MEDRAG_GENERATION_TIMEOUT_SECS") {
            match value.parse() {
                Ok(timeout) => config.generation.timeout_secs = timeout,
                Err(_) => warn!(
                    "Ignoring non-numeric MEDRAG_GENERATION_TIMEOUT_SECS: {}",
                    value
                ),
            }
        }
        if let Ok(level) = std::env::var("MEDRAG_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    fn validate_config(config: &MedRagConfig) -> Result<(), ConfigError> {
        let chunking = &config.chunking;
        if chunking.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "chunking.max_tokens must be greater than 0".to_string(),
            ));
        }
        if chunking.chars_per_token == 0 {
            return Err(ConfigError::Validation(
                "chunking.chars_per_token must be greater than 0".to_string(),
            ));
        }
        if chunking.overlap_tokens >= chunking.max_tokens {
            return Err(ConfigError::Validation(format!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.max_tokens ({})",
                chunking.overlap_tokens, chunking.max_tokens
            )));
        }
        if chunking.max_document_chars < chunking.max_tokens * chunking.chars_per_token {
            return Err(ConfigError::Validation(
                "chunking.max_document_chars must hold at least one chunk window".to_string(),
            ));
        }

        let embedding = &config.embedding;
        if embedding.dimension == 0 {
            return Err(ConfigError::Validation(
                "embedding.dimension must be greater than 0".to_string(),
            ));
        }
        if embedding.batch_size == 0 {
            return Err(ConfigError::Validation(
                "embedding.batch_size must be greater than 0".to_string(),
            ));
        }
        match embedding.provider.as_str() {
            "hash" => {}
            "rest" => {
                if embedding.endpoint.is_empty() {
                    return Err(ConfigError::Validation(
                        "embedding.endpoint is required for the rest provider".to_string(),
                    ));
                }
                if embedding.api_key.is_empty() {
                    warn!("embedding.api_key is empty; requests will be unauthenticated");
                }
            }
            other => {
                return Err(ConfigError::Validation(format!(
                    "unknown embedding.provider '{}' (expected 'hash' or 'rest')",
                    other
                )));
            }
        }
        if embedding.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "embedding.timeout_secs must be greater than 0".to_string(),
            ));
        }

        let retrieval = &config.retrieval;
        if retrieval.max_results == 0 {
            return Err(ConfigError::Validation(
                "retrieval.max_results must be greater than 0".to_string(),
            ));
        }
        if retrieval.semantic_weight < 0.0 || retrieval.lexical_weight < 0.0 {
            return Err(ConfigError::Validation(
                "retrieval weights must not be negative".to_string(),
            ));
        }
        if retrieval.semantic_weight + retrieval.lexical_weight <= 0.0 {
            return Err(ConfigError::Validation(
                "at least one retrieval weight must be positive".to_string(),
            ));
        }
        if retrieval.relevance_threshold < 0.0 {
            return Err(ConfigError::Validation(
                "retrieval.relevance_threshold must not be negative".to_string(),
            ));
        }
        for (name, boost) in [
            ("official_boost", retrieval.official_boost),
            ("reference_boost", retrieval.reference_boost),
            ("user_note_boost", retrieval.user_note_boost),
        ] {
            if boost <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "retrieval.{} must be greater than 0",
                    name
                )));
            }
        }
        if retrieval.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "retrieval.timeout_secs must be greater than 0".to_string(),
            ));
        }

        let agent = &config.agent;
        if agent.retrieval_ceiling == 0 {
            return Err(ConfigError::Validation(
                "agent.retrieval_ceiling must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&agent.min_confidence) {
            return Err(ConfigError::Validation(
                "agent.min_confidence must be within [0, 1]".to_string(),
            ));
        }

        let generation = &config.generation;
        if generation.max_context_chunks == 0 {
            return Err(ConfigError::Validation(
                "generation.max_context_chunks must be greater than 0".to_string(),
            ));
        }
        if generation.snippet_chars == 0 {
            return Err(ConfigError::Validation(
                "generation.snippet_chars must be greater than 0".to_string(),
            ));
        }
        if generation.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "generation.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(ConfigError::Validation(
                "generation.temperature must be within [0, 2]".to_string(),
            ));
        }

        Ok(())
    }
}
