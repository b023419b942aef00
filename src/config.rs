//! Store-wide settings, read once when the store is constructed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix shared by every property the store understands.
pub const PROPERTY_PREFIX: &str = "msgstore.";

pub const DEFAULT_MAX_TRANSACTION_SIZE: usize = 10_000;
pub const DEFAULT_EMPTY_BATCH_SIZE: usize = 100;

/// Which medium backs `StorageStrategy::Always` entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    /// Journal kept in process memory; survives stop/start of one store.
    #[default]
    Memory,
    /// Append-only journal file at `journal_path`.
    File,
}

impl FromStr for PersistenceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(PersistenceBackend::Memory),
            "file" => Ok(PersistenceBackend::File),
            other => Err(format!("unknown persistence backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageStoreConfig {
    pub persistence: PersistenceBackend,
    pub journal_path: Option<PathBuf>,
    /// Maximum operations a single local transaction may hold.
    pub max_transaction_size: usize,
    /// Items removed per local transaction by `ItemStream::empty`.
    pub empty_batch_size: usize,
    /// Properties the store does not interpret itself.
    pub custom_properties: HashMap<String, String>,
}

impl Default for MessageStoreConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceBackend::Memory,
            journal_path: None,
            max_transaction_size: DEFAULT_MAX_TRANSACTION_SIZE,
            empty_batch_size: DEFAULT_EMPTY_BATCH_SIZE,
            custom_properties: HashMap::new(),
        }
    }
}

impl MessageStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an append-only journal file for persistent entries.
    pub fn with_journal_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence = PersistenceBackend::File;
        self.journal_path = Some(path.into());
        self
    }

    pub fn with_max_transaction_size(mut self, size: usize) -> Self {
        self.max_transaction_size = size;
        self
    }

    pub fn with_empty_batch_size(mut self, size: usize) -> Self {
        self.empty_batch_size = size;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_properties.insert(key.into(), value.into());
        self
    }

    /// Build a configuration from an opaque key-value source.
    ///
    /// Recognised keys are `msgstore.persistence`, `msgstore.journalPath`,
    /// `msgstore.maxTransactionSize` and `msgstore.emptyBatchSize`. Any other
    /// key is kept verbatim in `custom_properties`.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (key, value) in properties {
            match key.strip_prefix(PROPERTY_PREFIX) {
                Some("persistence") => {
                    config.persistence = value.parse().map_err(|reason| {
                        ConfigError::InvalidValue {
                            key: key.clone(),
                            value: value.clone(),
                            reason,
                        }
                    })?;
                }
                Some("journalPath") => {
                    config.journal_path = Some(PathBuf::from(value));
                }
                Some("maxTransactionSize") => {
                    config.max_transaction_size = parse_positive(key, value)?;
                }
                Some("emptyBatchSize") => {
                    config.empty_batch_size = parse_positive(key, value)?;
                }
                _ => {
                    config.custom_properties.insert(key.clone(), value.clone());
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persistence == PersistenceBackend::File && self.journal_path.is_none() {
            return Err(ConfigError::MissingJournalPath);
        }
        Ok(())
    }

    /// Look up a custom property, accepting the key with or without the
    /// `msgstore.` prefix, falling back to `default`.
    pub fn property(&self, key: &str, default: &str) -> String {
        let bare = key.strip_prefix(PROPERTY_PREFIX).unwrap_or(key);
        let prefixed = format!("{}{}", PROPERTY_PREFIX, bare);

        self.custom_properties
            .get(&prefixed)
            .or_else(|| self.custom_properties.get(bare))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    };

    let parsed: usize = value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
    if parsed == 0 {
        return Err(invalid("must be greater than zero".into()));
    }
    Ok(parsed)
}
