//! Service configuration
//!
//! Limits are resolved once at startup: built-in defaults, then an optional TOML file
//! named by `TEXD_CONFIG`, then `TEXD_*` environment variables. The resulting `Config`
//! is passed explicitly to the handler and compiler; nothing here is global.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const MIB: u64 = 1024 * 1024;

/// Complete service configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub compiler: CompilerConfig,
}

/// HTTP-facing settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (default: 0.0.0.0:8000)
    pub bind: String,
    /// Maximum accepted LaTeX source size in bytes (default: 5MB)
    pub max_input_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            max_input_bytes: 5 * MIB as usize,
        }
    }
}

/// Limits applied to every compilation
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Typesetter binary, resolved through PATH when not absolute
    pub program: String,
    /// Number of compiler passes (default: 2, resolves cross-references)
    pub passes: u32,
    /// Wall-clock deadline for a single pass (default: 30s)
    pub timeout: Duration,
    /// Aggregate RSS ceiling for the compiler process tree (default: 1024MB)
    pub memory_limit_bytes: u64,
    /// Poll cadence of the supervisor (default: 100ms)
    pub sample_interval: Duration,
    /// Largest PDF that will be returned (default: 20MB)
    pub max_artifact_bytes: u64,
    /// How much of the compiler output is read when mining diagnostics (default: 1MB)
    pub max_log_bytes: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "pdflatex".to_string(),
            passes: 2,
            timeout: Duration::from_secs(30),
            memory_limit_bytes: 1024 * MIB,
            sample_interval: Duration::from_millis(100),
            max_artifact_bytes: 20 * MIB,
            max_log_bytes: MIB,
        }
    }
}

/// Raw TOML configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    server: RawServerConfig,
    compiler: RawCompilerConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawServerConfig {
    bind: Option<String>,
    max_input_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCompilerConfig {
    program: Option<String>,
    passes: Option<u32>,
    timeout_ms: Option<u64>,
    memory_limit_mb: Option<u64>,
    sample_interval_ms: Option<u64>,
    max_artifact_bytes: Option<u64>,
    max_log_bytes: Option<u64>,
}

impl Config {
    /// Load configuration from `TEXD_CONFIG` (if set) and `TEXD_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("TEXD_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        let mut config = Self::default();

        let server = raw.server;
        if let Some(bind) = server.bind {
            config.server.bind = bind;
        }
        if let Some(bytes) = server.max_input_bytes {
            config.server.max_input_bytes = bytes;
        }

        let compiler = raw.compiler;
        if let Some(program) = compiler.program {
            config.compiler.program = program;
        }
        if let Some(passes) = compiler.passes {
            config.compiler.passes = passes;
        }
        if let Some(ms) = compiler.timeout_ms {
            config.compiler.timeout = Duration::from_millis(ms);
        }
        if let Some(mb) = compiler.memory_limit_mb {
            config.compiler.memory_limit_bytes = mib_to_bytes(mb, "memory_limit_mb")?;
        }
        if let Some(ms) = compiler.sample_interval_ms {
            config.compiler.sample_interval = Duration::from_millis(ms);
        }
        if let Some(bytes) = compiler.max_artifact_bytes {
            config.compiler.max_artifact_bytes = bytes;
        }
        if let Some(bytes) = compiler.max_log_bytes {
            config.compiler.max_log_bytes = bytes;
        }

        Ok(config)
    }

    /// Apply `TEXD_*` overrides using the given variable lookup
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup("TEXD_BIND") {
            self.server.bind = bind;
        }
        if let Some(bytes) = parse_var(&lookup, "TEXD_MAX_INPUT_BYTES")? {
            self.server.max_input_bytes = bytes;
        }
        if let Some(program) = lookup("TEXD_COMPILER") {
            self.compiler.program = program;
        }
        if let Some(passes) = parse_var(&lookup, "TEXD_PASSES")? {
            self.compiler.passes = passes;
        }
        if let Some(ms) = parse_var(&lookup, "TEXD_TIMEOUT_MS")? {
            self.compiler.timeout = Duration::from_millis(ms);
        }
        if let Some(mb) = parse_var::<u64>(&lookup, "TEXD_MEMORY_LIMIT_MB")? {
            self.compiler.memory_limit_bytes = mib_to_bytes(mb, "TEXD_MEMORY_LIMIT_MB")?;
        }
        if let Some(ms) = parse_var(&lookup, "TEXD_SAMPLE_INTERVAL_MS")? {
            self.compiler.sample_interval = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_var(&lookup, "TEXD_MAX_ARTIFACT_BYTES")? {
            self.compiler.max_artifact_bytes = bytes;
        }
        if let Some(bytes) = parse_var(&lookup, "TEXD_MAX_LOG_BYTES")? {
            self.compiler.max_log_bytes = bytes;
        }
        Ok(())
    }

    /// Reject limits the supervisor cannot work with
    pub fn validate(&self) -> Result<()> {
        let c = &self.compiler;
        if c.program.trim().is_empty() {
            anyhow::bail!("compiler program must not be empty");
        }
        if c.passes == 0 {
            anyhow::bail!("compiler passes must be at least 1");
        }
        if c.timeout.is_zero() {
            anyhow::bail!("compiler timeout must be greater than zero");
        }
        if c.sample_interval.is_zero() {
            anyhow::bail!("sample interval must be greater than zero");
        }
        if c.memory_limit_bytes == 0 || c.max_artifact_bytes == 0 {
            anyhow::bail!("memory and artifact limits must be greater than zero");
        }
        if self.server.max_input_bytes == 0 {
            anyhow::bail!("input size limit must be greater than zero");
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", key, value))
        })
        .transpose()
}

fn mib_to_bytes(mb: u64, key: &str) -> Result<u64> {
    mb.checked_mul(MIB)
        .with_context(|| format!("Value for {} is too large: {} MiB", key, mb))
}
