/// Configuration module for ragsync.
///
/// Handles loading, validating, and providing default configuration values.
/// Secrets and service coordinates can be overridden from the environment.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indexer::backoff::RetryPolicy;
use crate::indexer::chunker::ChunkingConfig;
use crate::indexer::core::IngestSettings;

pub const DEFAULT_CONFIG_PATH: &str = "ragsync.json";

// ── Default value functions ──────────────────────────────────────────

fn default_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_api_version() -> String {
    "2023-12-01-preview".to_string()
}

fn default_dimensions() -> usize {
    3072
}

fn default_batch_size() -> usize {
    64
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_batch_delay_ms() -> u64 {
    300
}

fn default_min_chunk_chars() -> usize {
    50
}

fn default_top_k() -> usize {
    5
}

fn default_excerpt_chars() -> usize {
    500
}

fn default_pdf_pattern() -> String {
    "*.pdf".to_string()
}

fn default_text_pattern() -> String {
    "*.txt".to_string()
}

fn default_text_origin() -> String {
    "confluence".to_string()
}

fn default_domains() -> BTreeMap<String, DomainConfig> {
    BTreeMap::from([
        ("legal".to_string(), DomainConfig::legal()),
        ("settlement".to_string(), DomainConfig::settlement()),
    ])
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// One independent store per document domain.
    #[serde(default = "default_domains")]
    pub domains: BTreeMap<String, DomainConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Azure,
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Deployment name of the embedding model.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Send `dimensions` in the request body (text-embedding-3 models only).
    #[serde(default)]
    pub request_dimensions: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,

    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DomainConfig {
    pub persist_dir: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_dir: Option<PathBuf>,

    #[serde(default = "default_pdf_pattern")]
    pub pdf_pattern: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_dir: Option<PathBuf>,

    #[serde(default = "default_text_pattern")]
    pub text_pattern: String,

    /// `source` tag given to text and wiki documents.
    #[serde(default = "default_text_origin")]
    pub text_origin: String,

    /// Wiki export JSON loaded directly, without converting to text first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiki_export: Option<PathBuf>,

    pub chunking: ChunkingConfig,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            domains: default_domains(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: String::new(),
            api_key: String::new(),
            model: default_model(),
            api_version: default_api_version(),
            dimensions: default_dimensions(),
            request_dimensions: false,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: None,
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl DomainConfig {
    /// Statute PDFs, small windows.
    #[must_use]
    pub fn legal() -> Self {
        Self {
            persist_dir: PathBuf::from("stores/legal"),
            pdf_dir: Some(PathBuf::from("legal_docs")),
            pdf_pattern: default_pdf_pattern(),
            text_dir: None,
            text_pattern: default_text_pattern(),
            text_origin: default_text_origin(),
            wiki_export: None,
            chunking: ChunkingConfig::LEGAL,
        }
    }

    /// Settlement wiki pages converted to text, wide windows.
    #[must_use]
    pub fn settlement() -> Self {
        Self {
            persist_dir: PathBuf::from("stores/settlement"),
            pdf_dir: None,
            pdf_pattern: default_pdf_pattern(),
            text_dir: Some(PathBuf::from("stl_docs")),
            text_pattern: default_text_pattern(),
            text_origin: default_text_origin(),
            wiki_export: None,
            chunking: ChunkingConfig::SETTLEMENT,
        }
    }
}

impl IngestConfig {
    /// Runtime settings for [`crate::indexer::Ingestor`].
    #[must_use]
    pub fn settings(&self) -> IngestSettings {
        IngestSettings {
            batch_size: self.batch_size,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            min_chunk_chars: self.min_chunk_chars,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to [`DEFAULT_CONFIG_PATH`].
    /// If the file does not exist, returns a default config and generates
    /// a template file at the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == DEFAULT_CONFIG_PATH {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        let cfg: Config =
            serde_json::from_str(&data).with_context(|| format!("invalid JSON in {path}"))?;

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Override embedding settings from process environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override embedding settings from `lookup`. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let embedding = &mut self.embedding;

        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
            embedding.endpoint = v;
        }
        if let Some(v) = get("AZURE_OPENAI_API_KEY") {
            embedding.api_key = v;
        }
        if let Some(v) = get("AZURE_OPENAI_EMBEDDING_MODEL") {
            embedding.model = v;
        }
        if let Some(v) = get("OPENAI_API_VERSION") {
            embedding.api_version = v;
        }
        if let Some(v) = get("RAGSYNC_EMBEDDING_DIMENSIONS") {
            embedding.dimensions = v
                .trim()
                .parse()
                .with_context(|| format!("RAGSYNC_EMBEDDING_DIMENSIONS is not a number: {v}"))?;
        }
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        if self.embedding.provider == EmbeddingProvider::Azure {
            anyhow::ensure!(
                !self.embedding.endpoint.is_empty(),
                "embedding.endpoint is required (or set AZURE_OPENAI_ENDPOINT)"
            );
            anyhow::ensure!(
                !self.embedding.api_key.is_empty(),
                "embedding.api_key is required (or set AZURE_OPENAI_API_KEY)"
            );
        }
        anyhow::ensure!(self.ingest.batch_size > 0, "ingest.batch_size must be positive");
        anyhow::ensure!(
            self.ingest.base_delay_ms <= self.ingest.max_delay_ms,
            "ingest.base_delay_ms must not exceed ingest.max_delay_ms"
        );
        anyhow::ensure!(self.retrieval.top_k > 0, "retrieval.top_k must be positive");
        anyhow::ensure!(!self.domains.is_empty(), "at least one domain must be configured");

        for (name, domain) in &self.domains {
            domain
                .chunking
                .validate()
                .with_context(|| format!("domain {name}"))?;
            anyhow::ensure!(
                domain.pdf_dir.is_some() || domain.text_dir.is_some() || domain.wiki_export.is_some(),
                "domain {name} has no document source"
            );
        }

        let mut persist_dirs: Vec<&Path> =
            self.domains.values().map(|d| d.persist_dir.as_path()).collect();
        persist_dirs.sort();
        persist_dirs.dedup();
        anyhow::ensure!(
            persist_dirs.len() == self.domains.len(),
            "domains must not share a persist_dir"
        );
        Ok(())
    }

    /// Look up a domain by name.
    pub fn domain(&self, name: &str) -> Result<&DomainConfig> {
        self.domains.get(name).with_context(|| {
            let known: Vec<&str> = self.domains.keys().map(String::as_str).collect();
            format!("unknown domain {name:?} (known: {})", known.join(", "))
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn mock_config() -> Config {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProvider::Mock;
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.embedding.model, "text-embedding-3-large");
        assert_eq!(config.embedding.api_version, "2023-12-01-preview");
        assert_eq!(config.embedding.dimensions, 3072);
        assert_eq!(config.ingest.batch_size, 64);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.excerpt_chars, 500);
        assert_eq!(config.domains.len(), 2);
        assert_eq!(config.domains["legal"].chunking, ChunkingConfig::LEGAL);
        assert_eq!(config.domains["settlement"].chunking, ChunkingConfig::SETTLEMENT);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"embedding": {"provider": "mock", "dimensions": 16}, "ingest": {"batch_size": 8}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.embedding.provider, EmbeddingProvider::Mock);
        assert_eq!(config.embedding.dimensions, 16);
        assert_eq!(config.ingest.batch_size, 8);
        // Other fields should have defaults
        assert_eq!(config.ingest.max_retries, 3);
        assert_eq!(config.embedding.model, "text-embedding-3-large");
        assert!(config.domains.contains_key("legal"));
    }

    #[test]
    fn test_ingest_settings() {
        let settings = IngestConfig::default().settings();
        assert_eq!(settings, IngestSettings::default());
    }

    #[test]
    fn test_validate_ok() {
        assert!(mock_config().validate().is_ok());
    }

    #[test]
    fn test_validate_azure_needs_credentials() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.embedding.endpoint = "https://example.openai.azure.com".to_string();
        config.embedding.api_key = "key".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_chunking() {
        let mut config = mock_config();
        config.domains.get_mut("legal").unwrap().chunking = ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 100,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_shared_persist_dir() {
        let mut config = mock_config();
        let legal_dir = config.domains["legal"].persist_dir.clone();
        config.domains.get_mut("settlement").unwrap().persist_dir = legal_dir;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("AZURE_OPENAI_ENDPOINT", "https://corp.openai.azure.com/"),
            ("AZURE_OPENAI_API_KEY", "secret"),
            ("OPENAI_API_VERSION", ""),
            ("RAGSYNC_EMBEDDING_DIMENSIONS", "1536"),
        ]);
        let mut config = Config::default();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.embedding.endpoint, "https://corp.openai.azure.com/");
        assert_eq!(config.embedding.api_key, "secret");
        assert_eq!(config.embedding.api_version, "2023-12-01-preview");
        assert_eq!(config.embedding.dimensions, 1536);

        let bad = HashMap::from([("RAGSYNC_EMBEDDING_DIMENSIONS", "large")]);
        assert!(
            Config::default()
                .apply_env_from(|key| bad.get(key).map(|v| v.to_string()))
                .is_err()
        );
    }

    #[test]
    fn test_domain_lookup() {
        let config = Config::default();
        assert!(config.domain("legal").is_ok());
        let err = config.domain("tax").unwrap_err().to_string();
        assert!(err.contains("legal, settlement"), "{err}");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path = path.to_str().unwrap();

        let mut config = mock_config();
        config.embedding.api_key = "secret".to_string();
        config.save(path).unwrap();

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded.embedding.provider, EmbeddingProvider::Mock);
        assert_eq!(loaded.embedding.api_key, "secret");
        assert_eq!(loaded.domains, config.domains);
    }

    #[test]
    fn test_load_missing_non_default_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.domains.len(), 2);
        assert!(!path.exists());
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }
}
