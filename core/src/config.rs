use crate::error::{KgError, KgResult};
use crate::retry::RetryPolicy;
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub wal_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    pub cache_dir: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    pub seed_concept: String,
    pub max_nodes: usize,
    pub timeout_minutes: u64,
    pub worker_count: usize,
    pub random_relationships: usize,
    pub concurrency: usize,
    /// Expansions between maintenance sweeps during traversal.
    pub traversal_maintenance_every: usize,
    /// Processed pairs between maintenance sweeps during mining.
    pub mining_maintenance_every: usize,
    pub reseed_rounds: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnricherConfig {
    pub batch_size: usize,
    pub interval_seconds: u64,
    pub concurrency: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub graph: GraphConfig,
    pub retry: RetryConfig,
    pub enricher: EnricherConfig,
}

impl AppConfig {
    /// Defaults, then `config/default`, then `config/{RUN_MODE}`, then `KG_*` env vars.
    pub fn load() -> KgResult<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = with_defaults(Config::builder())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(env_source());

        finish(builder)
    }

    /// Defaults, then the given file, then `KG_*` env vars.
    pub fn load_from_file(path: impl AsRef<Path>) -> KgResult<Self> {
        let path = path.as_ref();
        let builder = with_defaults(Config::builder())?
            .add_source(File::from(path))
            .add_source(env_source());

        finish(builder)
    }

    /// Built-in defaults only.
    pub fn defaults() -> KgResult<Self> {
        finish(with_defaults(Config::builder())?)
    }

    pub fn validate(&self) -> KgResult<()> {
        if self.llm.url.trim().is_empty() {
            return Err(KgError::config("llm.url must not be empty"));
        }
        if self.graph.max_nodes == 0 {
            return Err(KgError::config("graph.max_nodes must be greater than 0"));
        }
        if self.graph.worker_count == 0 {
            return Err(KgError::config("graph.worker_count must be greater than 0"));
        }
        if self.graph.concurrency == 0 {
            return Err(KgError::config("graph.concurrency must be greater than 0"));
        }
        if self.enricher.batch_size == 0 || self.enricher.concurrency == 0 {
            return Err(KgError::config(
                "enricher.batch_size and enricher.concurrency must be greater than 0",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(KgError::config("retry.max_attempts must be greater than 0"));
        }
        Ok(())
    }
}

impl GraphConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl EnricherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("store.wal_path", "./data/graph.wal")?
        .set_default("llm.url", "http://localhost:11434/api/generate")?
        .set_default("llm.model", "qwen2.5:3b")?
        .set_default("llm.cache_dir", "./cache/llm")?
        .set_default("llm.request_timeout_secs", 120)?
        .set_default("graph.seed_concept", "Artificial Intelligence")?
        .set_default("graph.max_nodes", 100)?
        .set_default("graph.timeout_minutes", 30)?
        .set_default("graph.worker_count", 10)?
        .set_default("graph.random_relationships", 50)?
        .set_default("graph.concurrency", 5)?
        .set_default("graph.traversal_maintenance_every", 5)?
        .set_default("graph.mining_maintenance_every", 10)?
        .set_default("graph.reseed_rounds", 0)?
        .set_default("retry.max_attempts", 3)?
        .set_default("retry.initial_delay_ms", 2000)?
        .set_default("retry.max_delay_ms", 15000)?
        .set_default("enricher.batch_size", 10)?
        .set_default("enricher.interval_seconds", 60)?
        .set_default("enricher.concurrency", 5)
}

fn env_source() -> Environment {
    Environment::with_prefix("KG")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> KgResult<AppConfig> {
    let config: AppConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_complete_and_valid() {
        let config = AppConfig::defaults().unwrap();
        assert_eq!(config.graph.seed_concept, "Artificial Intelligence");
        assert_eq!(config.graph.max_nodes, 100);
        assert_eq!(config.graph.timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.graph.mining_maintenance_every, 10);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert_eq!(config.enricher.interval(), Duration::from_secs(60));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("builder.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[graph]\nseed_concept = \"Topology\"\nmax_nodes = 12\n\n[llm]\nmodel = \"llama3\""
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.graph.seed_concept, "Topology");
        assert_eq!(config.graph.max_nodes, 12);
        assert_eq!(config.graph.worker_count, 10);
        assert_eq!(config.llm.model, "llama3");
    }

    #[test]
    fn zero_budget_is_a_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[graph]\nmax_nodes = 0\n").unwrap();

        let err = AppConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, KgError::Config { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn huge_timeout_saturates() {
        let mut config = AppConfig::defaults().unwrap();
        config.graph.timeout_minutes = u64::MAX;
        assert_eq!(config.graph.timeout(), Duration::from_secs(u64::MAX));
    }
}
