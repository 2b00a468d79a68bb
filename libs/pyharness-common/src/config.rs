// Sandbox configuration for pyharness
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/sandbox.json";

/// Which execution environment runs the staged program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Disposable Docker container per invocation
    Docker,
    /// Local interpreter, no isolation (development only)
    Process,
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Backend::Docker),
            "process" => Ok(Backend::Process),
            other => bail!("Unknown sandbox backend '{}' (valid: docker, process)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: Backend,
    pub image: String,
    /// Interpreter invoked inside the container
    pub interpreter: String,
    /// Interpreter invoked by the process backend
    pub local_interpreter: String,
    pub timeout_ms: u64,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub pids_limit: i64,
    pub max_source_bytes: usize,
    pub max_output_bytes: usize,
    pub bind_addr: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Docker,
            image: "python:3.12-alpine".to_string(),
            interpreter: "python".to_string(),
            local_interpreter: "python3".to_string(),
            timeout_ms: 10_000,
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            pids_limit: 64,
            max_source_bytes: 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Sandbox config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: SandboxConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load config/sandbox.json if present, fall back to defaults, then apply
    /// PYHARNESS_* environment overrides
    pub fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::debug!("{} not found, using built-in defaults", DEFAULT_CONFIG_PATH);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PYHARNESS_BACKEND") {
            self.backend = v.parse()?;
        }
        if let Some(v) = lookup("PYHARNESS_IMAGE") {
            self.image = v;
        }
        if let Some(v) = lookup("PYHARNESS_INTERPRETER") {
            self.local_interpreter = v;
        }
        if let Some(v) = lookup("PYHARNESS_TIMEOUT_MS") {
            self.timeout_ms = v
                .parse()
                .with_context(|| format!("Invalid PYHARNESS_TIMEOUT_MS: {}", v))?;
        }
        if let Some(v) = lookup("PYHARNESS_MEMORY_MB") {
            self.memory_limit_mb = v
                .parse()
                .with_context(|| format!("Invalid PYHARNESS_MEMORY_MB: {}", v))?;
        }
        if let Some(v) = lookup("PYHARNESS_BIND_ADDR") {
            self.bind_addr = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            bail!("image must not be empty");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be greater than zero");
        }
        if !(self.cpu_limit > 0.0) {
            bail!("cpu_limit must be greater than zero");
        }
        if self.max_source_bytes == 0 || self.max_output_bytes == 0 {
            bail!("size limits must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }
}
