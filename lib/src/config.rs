//! Defines the configuration of a native store: where it lives, which
//! indexes it maintains, how hard it syncs, and how big its caches are.

use crate::consts::*;
use crate::errors::{Result, StoreError};
use crate::options::SyncMode;
use crate::value_store::CacheSizes;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

fn default_indexes() -> String {
    DEFAULT_INDEXES.to_string()
}

fn default_value_cache_size() -> usize {
    VALUE_CACHE_SIZE
}

fn default_value_id_cache_size() -> usize {
    VALUE_ID_CACHE_SIZE
}

fn default_namespace_cache_size() -> usize {
    NAMESPACE_CACHE_SIZE
}

fn default_namespace_id_cache_size() -> usize {
    NAMESPACE_ID_CACHE_SIZE
}

impl From<derive_builder::UninitializedFieldError> for StoreError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        StoreError::Config(e.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Builder)]
#[builder(setter(into), build_fn(error = "StoreError"))]
pub struct StoreConfig {
    /// Directory holding the store's files. Created on open if missing.
    pub data_dir: PathBuf,
    /// Comma separated index permutations; the first is the primary index.
    #[serde(default = "default_indexes")]
    #[builder(default = "default_indexes()")]
    pub triple_indexes: String,
    #[serde(default)]
    #[builder(default)]
    pub sync_mode: SyncMode,
    #[serde(default = "default_value_cache_size")]
    #[builder(default = "default_value_cache_size()")]
    pub value_cache_size: usize,
    #[serde(default = "default_value_id_cache_size")]
    #[builder(default = "default_value_id_cache_size()")]
    pub value_id_cache_size: usize,
    #[serde(default = "default_namespace_cache_size")]
    #[builder(default = "default_namespace_cache_size()")]
    pub namespace_cache_size: usize,
    #[serde(default = "default_namespace_id_cache_size")]
    #[builder(default = "default_namespace_id_cache_size()")]
    pub namespace_id_cache_size: usize,
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Default configuration for a store in `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_dir: data_dir.into(),
            triple_indexes: default_indexes(),
            sync_mode: SyncMode::default(),
            value_cache_size: VALUE_CACHE_SIZE,
            value_id_cache_size: VALUE_ID_CACHE_SIZE,
            namespace_cache_size: NAMESPACE_CACHE_SIZE,
            namespace_id_cache_size: NAMESPACE_ID_CACHE_SIZE,
        }
    }

    pub fn force_sync(&self) -> bool {
        self.sync_mode.is_force()
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        CacheSizes {
            value: self.value_cache_size,
            value_id: self.value_id_cache_size,
            namespace: self.namespace_cache_size,
            namespace_id: self.namespace_id_cache_size,
        }
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let config: StoreConfig = serde_json::from_reader(reader)?;
        Ok(config)
    }

    /// Prints out the current StoreConfig in a clear and readable way for command line output.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Data directory: {}", self.data_dir.display());
        println!("  Triple indexes: {}", self.triple_indexes);
        println!("  Sync mode: {}", self.sync_mode);
        println!("  Caches:");
        println!("    values: {}", self.value_cache_size);
        println!("    value ids: {}", self.value_id_cache_size);
        println!("    namespaces: {}", self.namespace_cache_size);
        println!("    namespace ids: {}", self.namespace_id_cache_size);
    }
}
