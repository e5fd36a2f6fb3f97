//! Provider settings storage.
//!
//! Persists the LLM configuration to disk at
//! `{base_dir}/.sandcastle/llm-config.json`. Environment variables are
//! used as initial defaults when no settings file exists.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::llm::{LlmConfig, Provider};

/// In-memory store for the LLM configuration with disk persistence.
#[derive(Debug)]
pub struct SettingsStore {
    config: RwLock<LlmConfig>,
    storage_path: PathBuf,
}

impl SettingsStore {
    /// Create a new settings store, loading from disk if available.
    ///
    /// If no settings file exists, environment variables seed the
    /// defaults:
    /// - `OPENAI_API_KEY` - API key for the default provider
    pub async fn new(base_dir: &Path) -> Self {
        let storage_path = base_dir.join(".sandcastle/llm-config.json");

        let config = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(config) => {
                    tracing::info!("Loaded LLM configuration from {}", storage_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load LLM configuration from {}: {}, using defaults",
                        storage_path.display(),
                        e
                    );
                    Self::defaults_from_env()
                }
            }
        } else {
            tracing::info!(
                "No LLM configuration found at {}, using environment defaults",
                storage_path.display()
            );
            Self::defaults_from_env()
        };

        Self {
            config: RwLock::new(config),
            storage_path,
        }
    }

    fn defaults_from_env() -> LlmConfig {
        let mut config = LlmConfig::default();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = Some(key);
        }
        config
    }

    fn load_from_path(path: &Path) -> Result<LlmConfig, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    async fn save_to_disk(&self) -> Result<(), std::io::Error> {
        let config = self.config.read().await;

        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&*config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&self.storage_path, contents)?;
        tracing::debug!("Saved LLM configuration to {}", self.storage_path.display());
        Ok(())
    }

    /// Get a clone of the current configuration.
    pub async fn get(&self) -> LlmConfig {
        self.config.read().await.clone()
    }

    /// Switch the active provider.
    ///
    /// Returns the previous provider if it changed, or None if unchanged.
    pub async fn set_provider(
        &self,
        provider: Provider,
    ) -> Result<Option<Provider>, std::io::Error> {
        let mut config = self.config.write().await;
        let previous = config.provider;

        if previous != provider {
            config.provider = provider;
            config.model = provider.default_model().to_string();
            drop(config); // Release lock before saving
            self.save_to_disk().await?;
            Ok(Some(previous))
        } else {
            Ok(None) // No change
        }
    }

    /// Replace the whole configuration at once.
    pub async fn update(&self, new_config: LlmConfig) -> Result<(), std::io::Error> {
        let mut config = self.config.write().await;
        *config = new_config;
        drop(config);
        self.save_to_disk().await
    }

    /// Reload the configuration from disk.
    pub async fn reload(&self) -> Result<(), std::io::Error> {
        if self.storage_path.exists() {
            let loaded = Self::load_from_path(&self.storage_path)?;
            let mut config = self.config.write().await;
            *config = loaded;
            tracing::info!(
                "Reloaded LLM configuration from {}",
                self.storage_path.display()
            );
        }
        Ok(())
    }
}

/// Shared settings store wrapped in Arc for concurrent access.
pub type SharedSettingsStore = Arc<SettingsStore>;
