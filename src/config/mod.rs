use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::codegen::DEFAULT_RESERVED_WORDS;

const ENV_PREFIX: &str = "SNIP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub codes: CodeConfig,
    pub cache: CacheConfig,
    pub bulk: BulkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    #[serde(alias = "postgresql")]
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeConfig {
    /// Length of generated codes; pick it from the expected link volume
    /// (see `codegen::recommend_length`).
    pub min_length: usize,
    /// Random candidates tried before the unchecked extended code.
    pub random_attempts: usize,
    /// Extra symbols on the final, unchecked random code.
    pub extended_padding: usize,
    pub min_custom_length: usize,
    pub max_custom_length: usize,
    pub reserved_words: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Ids per statement for set-based bulk operations.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG` when set.
    pub filter: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            url: "sqlite://./snip.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            min_length: 6,
            random_attempts: 5,
            extended_padding: 6,
            min_custom_length: 3,
            max_custom_length: 64,
            reserved_words: DEFAULT_RESERVED_WORDS
                .iter()
                .map(|w| w.to_string())
                .collect(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl_secs: 300,
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self { chunk_size: 500 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads defaults, then the optional file, then `SNIP_*` environment variables.
    ///
    /// Nested keys use a double underscore, e.g. `SNIP_DATABASE__URL`.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(Path::new(path)).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("codes.reserved_words")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("failed to read configuration sources")?
            .try_deserialize()
            .context("failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(None)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        let codes = &self.codes;
        if !(1..=11).contains(&codes.min_length) {
            bail!("codes.min_length must be between 1 and 11");
        }
        if codes.extended_padding == 0 {
            bail!("codes.extended_padding must be at least 1");
        }
        if codes.min_custom_length == 0 || codes.min_custom_length > codes.max_custom_length {
            bail!("codes.min_custom_length must be between 1 and codes.max_custom_length");
        }
        if self.bulk.chunk_size == 0 || self.bulk.chunk_size > 5_000 {
            bail!("bulk.chunk_size must be between 1 and 5000");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            bail!("cache.max_entries must be positive when the cache is enabled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.codes.min_length, 6);
        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
        assert!(config.codes.reserved_words.iter().any(|w| w == "admin"));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
backend = "postgres"
url = "postgres://localhost/snip"

[codes]
min_length = 8

[bulk]
chunk_size = 250
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.database.backend, DatabaseBackend::Postgres);
        assert_eq!(config.database.url, "postgres://localhost/snip");
        assert_eq!(config.codes.min_length, 8);
        assert_eq!(config.codes.random_attempts, 5);
        assert_eq!(config.bulk.chunk_size, 250);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.codes.min_length = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bulk.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.codes.min_custom_length = 10;
        config.codes.max_custom_length = 5;
        assert!(config.validate().is_err());
    }
}
