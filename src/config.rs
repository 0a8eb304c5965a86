//! Configuration tree, loadable from YAML
//!
//! Every section and field has a default, so an empty file (or no file)
//! yields a working configuration.
//!
//! ```yaml
//! request:
//!   timeout_ms: 10000
//!   max_retries: 2
//! batch:
//!   concurrency_limit: 5
//! host:
//!   idle_timeout_ms: 30000
//! collaborators:
//!   classifier:
//!     program: ./classify.sh
//! ```

use crate::cache::CacheConfig;
use crate::channel::RequestPolicy;
use crate::collaborators::{CommandClassifier, CommandFetcher, CommandSpec, CommandSummarizer};
use crate::coordinator::CoordinatorServices;
use crate::heartbeat::HeartbeatConfig;
use crate::host::HostConfig;
use crate::pipeline::BatchConfig;
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Command lines for the external collaborators. A missing entry leaves
/// that collaborator unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    pub classifier: Option<CommandSpec>,
    pub fetcher: Option<CommandSpec>,
    pub summarizer: Option<CommandSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub request: RequestPolicy,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub heartbeat: HeartbeatConfig,
    pub host: HostConfig,
    pub collaborators: CollaboratorsConfig,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Coordinator services over `store`, with command-backed collaborators
    /// for whatever is configured.
    pub fn services(&self, store: Arc<dyn KeyValueStore>) -> CoordinatorServices {
        let mut services = CoordinatorServices::new(store)
            .with_cache_config(self.cache.clone())
            .with_batch_config(self.batch.clone())
            .with_heartbeat_config(self.heartbeat.clone());

        let c = &self.collaborators;
        if let Some(spec) = &c.classifier {
            services = services.with_classifier(Arc::new(CommandClassifier::new(spec.clone())));
        }
        if let Some(spec) = &c.fetcher {
            services = services.with_fetcher(Arc::new(CommandFetcher::new(spec.clone())));
        }
        if let Some(spec) = &c.summarizer {
            services = services.with_summarizer(Arc::new(CommandSummarizer::new(spec.clone())));
        }
        services
    }
}
