use anyhow::{Context, Result};
use pilotnodes::services::{Interpreter, PricingTable, ProcessCodeEvaluator, RetryPolicy};
use pilotruntime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "pilot.toml";

/// Settings read from `pilot.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub runtime: RuntimeSection,
    pub model: ModelSection,
    pub http: HttpSection,
    pub code: CodeSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub node_timeout_secs: u64,
    pub event_buffer_size: usize,
    pub bus_capacity: usize,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        let defaults = RuntimeConfig::default();
        Self {
            node_timeout_secs: defaults.node_timeout.as_secs(),
            event_buffer_size: defaults.event_buffer_size,
            bus_capacity: defaults.bus_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// OpenAI-compatible endpoint, without the `/chat/completions` suffix
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Replaces the built-in price list when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingTable>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
            pricing: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
    pub timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_attempts: retry.max_attempts,
            delay_ms: retry.delay_ms,
            backoff_multiplier: retry.backoff_multiplier,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeSection {
    /// Language name to interpreter; merged over the built-in set
    pub interpreters: BTreeMap<String, Interpreter>,
    /// Run snippets inside this container image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
}

impl Default for CodeSection {
    fn default() -> Self {
        Self {
            interpreters: ProcessCodeEvaluator::default_interpreters(),
            docker_image: None,
        }
    }
}

impl PilotConfig {
    /// Load an explicit config file, or `pilot.toml` from `dir` if it exists
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file yields the built-in defaults.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }
        let default_path: PathBuf = dir.join(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            tracing::debug!(path = %default_path.display(), "Loading config");
            return Self::load_file(&default_path);
        }
        Ok(Self::default())
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;

        let mut interpreters = ProcessCodeEvaluator::default_interpreters();
        interpreters.append(&mut config.code.interpreters);
        config.code.interpreters = interpreters;
        Ok(config)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            node_timeout: Duration::from_secs(self.runtime.node_timeout_secs.max(1)),
            event_buffer_size: self.runtime.event_buffer_size,
            bus_capacity: self.runtime.bus_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.http.max_attempts.max(1),
            delay_ms: self.http.delay_ms,
            backoff_multiplier: self.http.backoff_multiplier,
        }
    }

    pub fn pricing(&self) -> PricingTable {
        self.model.pricing.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn missing_default_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = PilotConfig::load(None, dir.path()).unwrap();
        assert_eq!(config, PilotConfig::default());
        assert!(config.code.interpreters.contains_key("python"));
        assert_eq!(config.runtime_config().bus_capacity, 1000);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(PilotConfig::load(Some(&path), dir.path()).is_err());
    }

    #[test]
    fn reads_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            [runtime]
            node_timeout_secs = 5

            [model]
            base_url = "http://localhost:11434/v1"
            api_key_env = "LOCAL_KEY"

            [model.pricing."local/llama"]
            input = 1.0
            output = 2.0

            [http]
            max_attempts = 0
            delay_ms = 50

            [code]
            docker_image = "python:3.12-slim"

            [code.interpreters.ruby]
            program = "ruby"
            args = ["-e"]
        "#
        )
        .unwrap();

        let config = PilotConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.runtime_config().node_timeout, Duration::from_secs(5));
        assert_eq!(config.runtime.event_buffer_size, 256);
        assert_eq!(config.model.api_key_env, "LOCAL_KEY");
        assert!(config.pricing().price("llama").is_some());
        assert!(config.pricing().price("gpt-4").is_none());

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.delay_ms, 50);
        assert_eq!(retry.backoff_multiplier, 2.0);

        assert_eq!(config.code.docker_image.as_deref(), Some("python:3.12-slim"));
        assert_eq!(config.code.interpreters["ruby"], Interpreter::new("ruby", &["-e"]));
        assert!(config.code.interpreters.contains_key("shell"));
    }
}
