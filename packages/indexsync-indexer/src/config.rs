//! Indexer configuration
//!
//! Loaded from a versioned YAML file:
//!
//! ```yaml
//! version: 1
//! indices:
//!   content_indices: [mainstream, detailed, government]
//! rebuild:
//!   processing_batch_size: 250
//! ingest:
//!   max_attempts: 5
//! ```
//!
//! Every section is optional and falls back to its defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::error::{IndexerError, Result};

/// Env override for [`EnrichmentConfig::continue_on_links_timeout`]
pub const CONTINUE_ON_LINKS_TIMEOUT_ENV: &str = "LOG_FAILED_LINKS_LOOKUP_AND_CONTINUE";

const SUPPORTED_VERSIONS: &[u32] = &[1];

fn missing_version() -> u32 {
    0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    /// Schema version (always 1 for v1)
    #[serde(default = "missing_version")]
    pub version: u32,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub indices: IndicesConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub rebuild: RebuildConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            version: 1,
            engine: EngineConfig::default(),
            indices: IndicesConfig::default(),
            scroll: ScrollConfig::default(),
            rebuild: RebuildConfig::default(),
            ingest: IngestConfig::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Deadline for one bulk request
    pub bulk_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bulk_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndicesConfig {
    /// Logical names whose documents get popularity, format, links and
    /// self-link enrichment
    pub content_indices: Vec<String>,
    /// Settings body for new physical generations
    pub settings: Value,
    /// Mappings body for new physical generations
    pub mappings: Value,
}

impl Default for IndicesConfig {
    fn default() -> Self {
        Self {
            content_indices: vec![
                "mainstream".to_string(),
                "detailed".to_string(),
                "government".to_string(),
            ],
            settings: Value::Object(Default::default()),
            mappings: Value::Object(Default::default()),
        }
    }
}

impl IndicesConfig {
    pub fn is_content_index(&self, base_name: &str) -> bool {
        self.content_indices.iter().any(|name| name == base_name)
    }

    /// Body for `create_index`
    pub fn create_body(&self) -> Value {
        serde_json::json!({
            "settings": self.settings,
            "mappings": self.mappings,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScrollConfig {
    /// Per-shard page size for `all_documents`
    pub batch_size: usize,
    pub keep_alive_secs: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            keep_alive_secs: 60,
        }
    }
}

impl ScrollConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RebuildConfig {
    pub scroll_page_size: usize,
    pub processing_batch_size: usize,
    pub max_concurrent_batches: usize,
    /// Approximate upper bound for one bulk body
    pub max_payload_bytes: usize,
    /// Copy `_version` into `payload_version` and write with external versioning
    pub preserve_versions: bool,
    pub recovery_poll_interval_ms: u64,
    pub recovery_max_polls: u32,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            scroll_page_size: 500,
            processing_batch_size: 250,
            max_concurrent_batches: (num_cpus::get() / 2).max(1),
            max_payload_bytes: 10 * 1024 * 1024,
            preserve_versions: true,
            recovery_poll_interval_ms: 1_000,
            recovery_max_polls: 600,
        }
    }
}

impl RebuildConfig {
    pub fn recovery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Logical index the event stream writes to
    pub index: String,
    pub workers: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub classification_ttl_secs: u64,
    pub classification_cache_capacity: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            index: "govuk".to_string(),
            workers: 4,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 5,
            classification_ttl_secs: 300,
            classification_cache_capacity: 10_000,
        }
    }
}

impl IngestConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn classification_ttl(&self) -> Duration {
        Duration::from_secs(self.classification_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrichmentConfig {
    /// Attempts per relationship-service call
    pub links_max_attempts: u32,
    pub links_retry_delay_ms: u64,
    /// Log a links lookup timeout and index the document unexpanded
    pub continue_on_links_timeout: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            links_max_attempts: 5,
            links_retry_delay_ms: 100,
            continue_on_links_timeout: false,
        }
    }
}

impl EnrichmentConfig {
    pub fn links_retry_delay(&self) -> Duration {
        Duration::from_millis(self.links_retry_delay_ms)
    }
}

impl IndexerConfig {
    /// Parse a v1 YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: IndexerConfig = serde_yaml::from_str(content)?;

        if config.version == 0 {
            return Err(IndexerError::config(
                "Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.",
            ));
        }
        if !SUPPORTED_VERSIONS.contains(&config.version) {
            return Err(IndexerError::config(format!(
                "Unsupported configuration version {}. Supported versions: {:?}",
                config.version, SUPPORTED_VERSIONS
            )));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Overlay process environment
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(CONTINUE_ON_LINKS_TIMEOUT_ENV) {
            self.enrichment.continue_on_links_timeout = value.trim() == "1";
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("scroll.batch_size", self.scroll.batch_size),
            ("rebuild.scroll_page_size", self.rebuild.scroll_page_size),
            ("rebuild.processing_batch_size", self.rebuild.processing_batch_size),
            ("rebuild.max_concurrent_batches", self.rebuild.max_concurrent_batches),
            ("rebuild.max_payload_bytes", self.rebuild.max_payload_bytes),
            ("ingest.workers", self.ingest.workers),
            ("ingest.max_attempts", self.ingest.max_attempts as usize),
            ("enrichment.links_max_attempts", self.enrichment.links_max_attempts as usize),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(IndexerError::config(format!(
                    "Invalid value for field '{}': must be greater than 0",
                    field
                )));
            }
        }
        if self.ingest.base_delay_ms > self.ingest.max_delay_ms {
            return Err(IndexerError::config(format!(
                "ingest.base_delay_ms ({}) exceeds ingest.max_delay_ms ({})",
                self.ingest.base_delay_ms, self.ingest.max_delay_ms
            )));
        }
        if self.ingest.index.is_empty() {
            return Err(IndexerError::config("ingest.index must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = IndexerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rebuild.scroll_page_size, 500);
        assert_eq!(config.rebuild.processing_batch_size, 250);
        assert_eq!(config.scroll.batch_size, 50);
        assert!(config.rebuild.preserve_versions);
        assert_eq!(config.ingest.classification_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_yaml_overrides_only_named_fields() {
        let config = IndexerConfig::from_yaml_str(
            r#"
version: 1
rebuild:
  processing_batch_size: 100
indices:
  content_indices: [mainstream]
"#,
        )
        .unwrap();
        assert_eq!(config.rebuild.processing_batch_size, 100);
        assert_eq!(config.rebuild.scroll_page_size, 500);
        assert!(config.indices.is_content_index("mainstream"));
        assert!(!config.indices.is_content_index("government"));
    }

    #[test]
    fn test_yaml_missing_version() {
        let err = IndexerConfig::from_yaml_str("rebuild:\n  processing_batch_size: 10\n").unwrap_err();
        assert!(err.to_string().contains("Missing 'version'"));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let err = IndexerConfig::from_yaml_str("version: 2\n").unwrap_err();
        assert!(err.to_string().contains("Unsupported configuration version 2"));
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let result = IndexerConfig::from_yaml_str("version: 1\nrebuild:\n  batch: 10\n");
        assert!(matches!(result, Err(IndexerError::Yaml(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = IndexerConfig::from_yaml_str("version: 1\nrebuild:\n  processing_batch_size: 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("rebuild.processing_batch_size"));
    }

    #[test]
    fn test_env_overlay() {
        let config = IndexerConfig::default().apply_env_from(|key| {
            (key == CONTINUE_ON_LINKS_TIMEOUT_ENV).then(|| "1".to_string())
        });
        assert!(config.enrichment.continue_on_links_timeout);

        let config = IndexerConfig::default().apply_env_from(|_| None);
        assert!(!config.enrichment.continue_on_links_timeout);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let yaml = IndexerConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();
        let loaded = IndexerConfig::from_yaml_file(temp_file.path()).unwrap();
        assert_eq!(loaded, IndexerConfig::default());
    }
}
